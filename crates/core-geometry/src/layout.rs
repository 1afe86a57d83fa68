//! Layouts: grid presets and per-layer key assignments.
//!
//! A `Layout` is pure geometry (rows, columns, inter-key gap); a `LayerMap`
//! assigns an action to each grid cell for one layer. `Layout::bindings`
//! marries the two into the flat binding list the `BindingIndex` consumes.

use tracing::debug;

use crate::{Action, Binding, BindingOrigin, Rect};
use core_events::{ModFlags, Side, keycode};

/// One grid cell's assignment on one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyAssignment {
    pub label: String,
    pub action: Action,
    pub hold_action: Option<Action>,
    pub continuous: bool,
}

impl KeyAssignment {
    pub fn key(vk: u16) -> Self {
        KeyAssignment {
            label: keycode::name(vk).to_string(),
            action: Action::Key {
                code: vk,
                flags: ModFlags::empty(),
            },
            hold_action: None,
            continuous: keycode::is_continuous(vk),
        }
    }

    pub fn modifier(vk: u16) -> Self {
        KeyAssignment {
            label: keycode::name(vk).to_string(),
            action: Action::Modifier { code: vk },
            hold_action: None,
            continuous: false,
        }
    }

    pub fn with_hold(mut self, hold: Action) -> Self {
        self.hold_action = Some(hold);
        self
    }

    pub fn named(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }
}

/// Row-major assignment table for one (side, layer).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LayerMap {
    pub rows: u16,
    pub cols: u16,
    pub keys: Vec<Option<KeyAssignment>>,
}

impl LayerMap {
    pub fn new(rows: u16, cols: u16) -> Self {
        LayerMap {
            rows,
            cols,
            keys: vec![None; rows as usize * cols as usize],
        }
    }

    pub fn set(&mut self, row: u16, col: u16, assignment: KeyAssignment) {
        let idx = row as usize * self.cols as usize + col as usize;
        self.keys[idx] = Some(assignment);
    }

    pub fn get(&self, row: u16, col: u16) -> Option<&KeyAssignment> {
        self.keys
            .get(row as usize * self.cols as usize + col as usize)
            .and_then(|slot| slot.as_ref())
    }

    fn from_rows(rows: Vec<Vec<KeyAssignment>>) -> Self {
        let row_count = rows.len() as u16;
        let col_count = rows.first().map(|r| r.len()).unwrap_or(0) as u16;
        let mut map = LayerMap::new(row_count, col_count);
        for (r, row) in rows.into_iter().enumerate() {
            for (c, assignment) in row.into_iter().enumerate() {
                map.set(r as u16, c as u16, assignment);
            }
        }
        map
    }
}

/// Pure grid geometry. `gap_fraction` is the share of each cell left as
/// dead space between keys (split evenly on both sides).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    pub rows: u16,
    pub cols: u16,
    pub gap_fraction: f32,
}

impl Layout {
    pub fn grid(rows: u16, cols: u16) -> Self {
        Layout {
            rows,
            cols,
            gap_fraction: 0.10,
        }
    }

    pub fn with_gap(mut self, gap_fraction: f32) -> Self {
        self.gap_fraction = gap_fraction.clamp(0.0, 0.9);
        self
    }

    /// Key rect for a grid cell, normalized. Row 0 is the top row as decoded.
    pub fn cell_rect(&self, row: u16, col: u16) -> Rect {
        let cw = 1.0 / self.cols as f32;
        let ch = 1.0 / self.rows as f32;
        let inset_x = cw * self.gap_fraction * 0.5;
        let inset_y = ch * self.gap_fraction * 0.5;
        Rect::new(
            col as f32 * cw + inset_x,
            row as f32 * ch + inset_y,
            cw - 2.0 * inset_x,
            ch - 2.0 * inset_y,
        )
    }

    /// Build the flat binding list for one (side, layer map), appending any
    /// custom buttons after the grid keys.
    pub fn bindings(
        &self,
        side: Side,
        layer_map: &LayerMap,
        custom_buttons: &[Binding],
    ) -> Vec<Binding> {
        let mut out = Vec::with_capacity(layer_map.keys.len() + custom_buttons.len());
        for row in 0..self.rows.min(layer_map.rows) {
            for col in 0..self.cols.min(layer_map.cols) {
                let Some(assignment) = layer_map.get(row, col) else {
                    continue;
                };
                out.push(Binding {
                    side,
                    rect: self.cell_rect(row, col),
                    label: assignment.label.clone(),
                    action: assignment.action,
                    hold_action: assignment.hold_action,
                    continuous: assignment.continuous,
                    origin: BindingOrigin::Grid { row, col },
                });
            }
        }
        out.extend(custom_buttons.iter().cloned());
        debug!(
            target: "geometry.layout",
            side = side.as_str(),
            grid = out.len() - custom_buttons.len(),
            customs = custom_buttons.len(),
            "layout_bindings_built"
        );
        out
    }
}

/// The stock 6-column, 3-row half-keyboard layout.
pub fn preset_6x3() -> Layout {
    Layout::grid(3, 6)
}

/// Default QWERTY-split layer maps for a side: layer 0 is the base half,
/// layer 1 carries digits, symbols, and arrows.
pub fn default_layer_maps(side: Side) -> Vec<LayerMap> {
    use core_events::keycode::*;
    let k = KeyAssignment::key;
    let m = KeyAssignment::modifier;
    match side {
        Side::Left => vec![
            LayerMap::from_rows(vec![
                vec![k(VK_TAB), k(VK_ANSI_Q), k(VK_ANSI_W), k(VK_ANSI_E), k(VK_ANSI_R), k(VK_ANSI_T)],
                vec![m(VK_SHIFT), k(VK_ANSI_A), k(VK_ANSI_S), k(VK_ANSI_D), k(VK_ANSI_F), k(VK_ANSI_G)],
                vec![m(VK_CONTROL), k(VK_ANSI_Z), k(VK_ANSI_X), k(VK_ANSI_C), k(VK_ANSI_V), k(VK_SPACE)],
            ]),
            LayerMap::from_rows(vec![
                vec![k(VK_ANSI_1), k(VK_ANSI_2), k(VK_ANSI_3), k(VK_ANSI_4), k(VK_ANSI_5), k(VK_ANSI_6)],
                vec![m(VK_SHIFT), k(VK_ANSI_MINUS), k(VK_ANSI_EQUAL), k(VK_ANSI_LEFT_BRACKET), k(VK_ANSI_RIGHT_BRACKET), k(VK_ANSI_BACKSLASH)],
                vec![m(VK_CONTROL), k(VK_ANSI_GRAVE), k(VK_ANSI_QUOTE), k(VK_ANSI_SLASH), k(VK_ANSI_PERIOD), k(VK_SPACE)],
            ]),
        ],
        Side::Right => vec![
            LayerMap::from_rows(vec![
                vec![k(VK_ANSI_Y), k(VK_ANSI_U), k(VK_ANSI_I), k(VK_ANSI_O), k(VK_ANSI_P), k(VK_DELETE)],
                vec![
                    k(VK_ANSI_H),
                    k(VK_ANSI_J),
                    k(VK_ANSI_K),
                    k(VK_ANSI_L),
                    k(VK_ANSI_SEMICOLON).with_hold(Action::KeyChord {
                        code: VK_ANSI_SEMICOLON,
                        extra_flags: ModFlags::SHIFT,
                    }),
                    k(VK_RETURN),
                ],
                vec![
                    k(VK_SPACE),
                    k(VK_ANSI_N),
                    k(VK_ANSI_M),
                    k(VK_ANSI_COMMA),
                    KeyAssignment {
                        label: "fn".to_string(),
                        action: Action::LayerMomentary(1),
                        hold_action: None,
                        continuous: false,
                    },
                    m(VK_SHIFT),
                ],
            ]),
            LayerMap::from_rows(vec![
                vec![k(VK_ANSI_7), k(VK_ANSI_8), k(VK_ANSI_9), k(VK_ANSI_0), k(VK_ANSI_MINUS), k(VK_ANSI_EQUAL)],
                vec![k(VK_LEFT_ARROW), k(VK_DOWN_ARROW), k(VK_UP_ARROW), k(VK_RIGHT_ARROW), k(VK_ANSI_QUOTE), k(VK_RETURN)],
                vec![
                    k(VK_SPACE),
                    k(VK_ANSI_COMMA),
                    k(VK_ANSI_PERIOD),
                    KeyAssignment {
                        label: "kbd".to_string(),
                        action: Action::TypingToggle,
                        hold_action: None,
                        continuous: false,
                    },
                    KeyAssignment {
                        label: "fn".to_string(),
                        action: Action::LayerMomentary(1),
                        hold_action: None,
                        continuous: false,
                    },
                    m(VK_SHIFT),
                ],
            ]),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Point;
    use pretty_assertions::assert_eq;

    #[test]
    fn cell_rects_tile_without_overlap() {
        let layout = preset_6x3();
        let a = layout.cell_rect(0, 0);
        let b = layout.cell_rect(0, 1);
        assert!(a.x + a.w < b.x);
        let c = layout.cell_rect(1, 0);
        assert!(a.y + a.h < c.y);
        // Whole grid stays inside the unit square.
        let last = layout.cell_rect(2, 5);
        assert!(last.x + last.w <= 1.0 + 1e-6);
        assert!(last.y + last.h <= 1.0 + 1e-6);
    }

    #[test]
    fn default_maps_cover_every_cell() {
        for side in [Side::Left, Side::Right] {
            let maps = default_layer_maps(side);
            assert_eq!(maps.len(), 2);
            for map in &maps {
                assert_eq!(map.rows, 3);
                assert_eq!(map.cols, 6);
                assert!(map.keys.iter().all(|slot| slot.is_some()));
            }
        }
    }

    #[test]
    fn bindings_land_where_cells_are() {
        let layout = preset_6x3();
        let maps = default_layer_maps(Side::Left);
        let bindings = layout.bindings(Side::Left, &maps[0], &[]);
        assert_eq!(bindings.len(), 18);
        // Row 1 col 0 is the left shift.
        let shift = bindings
            .iter()
            .find(|b| b.origin == BindingOrigin::Grid { row: 1, col: 0 })
            .unwrap();
        assert!(shift.action.is_modifier());
        assert!(shift.rect.contains(layout.cell_rect(1, 0).center()));
    }

    #[test]
    fn continuous_flag_follows_keycode_table() {
        let maps = default_layer_maps(Side::Right);
        let delete = maps[0].get(0, 5).unwrap();
        assert!(delete.continuous);
        let y = maps[0].get(0, 0).unwrap();
        assert!(!y.continuous);
    }

    #[test]
    fn default_right_alt_layer_has_typing_toggle() {
        let maps = default_layer_maps(Side::Right);
        let toggle = maps[1].get(2, 3).unwrap();
        assert_eq!(toggle.action, Action::TypingToggle);
    }

    #[test]
    fn centers_are_stable_reference_points() {
        let layout = preset_6x3();
        let rect = layout.cell_rect(0, 2);
        let center = rect.center();
        assert!(rect.contains(center));
        assert!(rect.contains(Point::new(center.x + rect.w * 0.4, center.y)));
        assert!(!rect.contains(Point::new(center.x + rect.w * 0.6, center.y)));
    }
}
