//! Spatial index over one side's bindings for one layer.
//!
//! Structure: a flat arena `Vec<Binding>` plus a coarse row/column bucket
//! grid of candidate indices, so the hot-path lookup touches one cell and a
//! handful of rects. Snap centers are kept in parallel vectors to keep the
//! nearest-center search branch-light. Custom buttons are few; up to four are
//! scanned linearly, more get their own coarser overlay grid.

use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::{Binding, BindingOrigin, Point};
use core_events::Side;

/// Second-nearest snap candidates within this ratio of the best squared
/// distance fall back to the rect-edge tie-break.
pub const AMBIGUITY_RATIO: f32 = 1.25;

const CUSTOM_LINEAR_SCAN_MAX: usize = 4;
const CUSTOM_OVERLAY_DIM: usize = 4;

#[derive(Debug, Clone)]
struct BucketGrid {
    rows: usize,
    cols: usize,
    cells: Vec<SmallVec<[u16; 4]>>,
}

impl BucketGrid {
    fn build(rows: usize, cols: usize, bindings: &[Binding], pick: impl Fn(&Binding) -> bool) -> Self {
        let mut grid = BucketGrid {
            rows,
            cols,
            cells: vec![SmallVec::new(); rows * cols],
        };
        for (idx, binding) in bindings.iter().enumerate() {
            if !pick(binding) {
                continue;
            }
            let r = binding.rect;
            let col_lo = cell_coord(r.x, cols);
            let col_hi = cell_coord(r.x + r.w, cols);
            let row_lo = cell_coord(r.y, rows);
            let row_hi = cell_coord(r.y + r.h, rows);
            for row in row_lo..=row_hi {
                for col in col_lo..=col_hi {
                    grid.cells[row * cols + col].push(idx as u16);
                }
            }
        }
        grid
    }

    fn candidates(&self, p: Point) -> &[u16] {
        let col = cell_coord(p.x, self.cols);
        let row = cell_coord(p.y, self.rows);
        &self.cells[row * self.cols + col]
    }
}

fn cell_coord(v: f32, dim: usize) -> usize {
    let clamped = v.clamp(0.0, 1.0);
    ((clamped * dim as f32) as usize).min(dim - 1)
}

/// Result of a snap-center search near a missed release.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapOutcome {
    pub binding_index: usize,
    pub distance2: f32,
    /// The second candidate was close enough that the rect-edge tie-break
    /// decided the outcome.
    pub ambiguous: bool,
}

/// Per-(side, layer) lookup structure. Invalidated by any layout, layer, or
/// keymap change; the owner rebuilds lazily and bumps its generation.
#[derive(Debug, Clone)]
pub struct BindingIndex {
    side: Side,
    layer: u8,
    bindings: Vec<Binding>,
    grid: BucketGrid,
    customs: Vec<u16>,
    custom_overlay: Option<BucketGrid>,
    snap_cx: Vec<f32>,
    snap_cy: Vec<f32>,
    snap_r2: Vec<f32>,
    snap_binding: Vec<u16>,
}

impl BindingIndex {
    /// Build the index. `grid_rows`/`grid_cols` should match the layout's key
    /// grid so one cell holds one key plus its neighbors' overhang.
    /// `snap_radius_fraction` scales each key's snap radius:
    /// `r = min(w, h) * fraction`.
    pub fn build(
        side: Side,
        layer: u8,
        bindings: Vec<Binding>,
        grid_rows: usize,
        grid_cols: usize,
        snap_radius_fraction: f32,
    ) -> Self {
        let rows = grid_rows.max(1);
        let cols = grid_cols.max(1);
        let grid = BucketGrid::build(rows, cols, &bindings, |b| {
            matches!(b.origin, BindingOrigin::Grid { .. })
        });

        let customs: Vec<u16> = bindings
            .iter()
            .enumerate()
            .filter(|(_, b)| matches!(b.origin, BindingOrigin::Custom { .. }))
            .map(|(i, _)| i as u16)
            .collect();
        let custom_overlay = if customs.len() > CUSTOM_LINEAR_SCAN_MAX {
            Some(BucketGrid::build(
                CUSTOM_OVERLAY_DIM,
                CUSTOM_OVERLAY_DIM,
                &bindings,
                |b| matches!(b.origin, BindingOrigin::Custom { .. }),
            ))
        } else {
            None
        };

        let mut snap_cx = Vec::new();
        let mut snap_cy = Vec::new();
        let mut snap_r2 = Vec::new();
        let mut snap_binding = Vec::new();
        for (idx, binding) in bindings.iter().enumerate() {
            if !binding.snap_eligible() {
                continue;
            }
            let c = binding.rect.center();
            let r = binding.rect.w.min(binding.rect.h) * snap_radius_fraction;
            snap_cx.push(c.x);
            snap_cy.push(c.y);
            snap_r2.push(r * r);
            snap_binding.push(idx as u16);
        }

        debug!(
            target: "geometry.index",
            side = side.as_str(),
            layer,
            bindings = bindings.len(),
            customs = customs.len(),
            snap_centers = snap_binding.len(),
            "index_built"
        );

        BindingIndex {
            side,
            layer,
            bindings,
            grid,
            customs,
            custom_overlay,
            snap_cx,
            snap_cy,
            snap_r2,
            snap_binding,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn layer(&self) -> u8 {
        self.layer
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn binding(&self, index: usize) -> &Binding {
        &self.bindings[index]
    }

    /// Highest-priority binding whose rect contains `p`. Tie-break: greatest
    /// inside-edge distance, then smaller rect area (the more specific key).
    pub fn at(&self, p: Point) -> Option<&Binding> {
        let mut best: Option<(usize, f32, f32)> = None; // (idx, edge_dist, area)
        let mut consider = |idx: usize| {
            let b = &self.bindings[idx];
            if !b.rect.contains(p) {
                return;
            }
            let edge = b.rect.inside_edge_distance(p);
            let area = b.rect.area();
            let better = match best {
                None => true,
                Some((_, best_edge, best_area)) => {
                    edge > best_edge || (edge == best_edge && area < best_area)
                }
            };
            if better {
                best = Some((idx, edge, area));
            }
        };

        for &idx in self.grid.candidates(p) {
            consider(idx as usize);
        }
        match &self.custom_overlay {
            Some(overlay) => {
                for &idx in overlay.candidates(p) {
                    consider(idx as usize);
                }
            }
            None => {
                for &idx in &self.customs {
                    consider(idx as usize);
                }
            }
        }

        best.map(|(idx, _, _)| &self.bindings[idx])
    }

    /// Nearest snap center to a release point that landed on no binding.
    /// Accepts the best center when the point lies within its radius; when
    /// the runner-up is within `AMBIGUITY_RATIO` of the best squared
    /// distance, the binding whose rect edge is closer wins instead.
    pub fn snap(&self, p: Point) -> Option<SnapOutcome> {
        if self.snap_cx.is_empty() {
            return None;
        }
        let mut best = (usize::MAX, f32::INFINITY);
        let mut second = (usize::MAX, f32::INFINITY);
        for i in 0..self.snap_cx.len() {
            let dx = p.x - self.snap_cx[i];
            let dy = p.y - self.snap_cy[i];
            let d2 = dx * dx + dy * dy;
            if d2 < best.1 {
                second = best;
                best = (i, d2);
            } else if d2 < second.1 {
                second = (i, d2);
            }
        }

        let (bi, bd2) = best;
        if bd2 > self.snap_r2[bi] {
            trace!(target: "geometry.index", d2 = bd2, r2 = self.snap_r2[bi], "snap_out_of_radius");
            return None;
        }

        let mut chosen = bi;
        let mut ambiguous = false;
        if second.0 != usize::MAX && second.1 <= bd2 * AMBIGUITY_RATIO {
            ambiguous = true;
            let best_edge =
                self.bindings[self.snap_binding[bi] as usize].rect.outside_distance(p);
            let second_edge =
                self.bindings[self.snap_binding[second.0] as usize].rect.outside_distance(p);
            if second_edge < best_edge && second.1 <= self.snap_r2[second.0] {
                chosen = second.0;
            }
        }

        Some(SnapOutcome {
            binding_index: self.snap_binding[chosen] as usize,
            distance2: if chosen == bi { bd2 } else { second.1 },
            ambiguous,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Action, Rect};
    use core_events::{ModFlags, keycode};
    use pretty_assertions::assert_eq;

    fn key(side: Side, rect: Rect, label: &str, vk: u16, row: u16, col: u16) -> Binding {
        Binding {
            side,
            rect,
            label: label.to_string(),
            action: Action::Key {
                code: vk,
                flags: ModFlags::empty(),
            },
            hold_action: None,
            continuous: false,
            origin: BindingOrigin::Grid { row, col },
        }
    }

    fn two_key_index() -> BindingIndex {
        let a = key(
            Side::Left,
            Rect::new(0.0, 0.0, 0.3, 0.3),
            "a",
            keycode::VK_ANSI_A,
            0,
            0,
        );
        let s = key(
            Side::Left,
            Rect::new(0.35, 0.0, 0.3, 0.3),
            "s",
            keycode::VK_ANSI_S,
            0,
            1,
        );
        BindingIndex::build(Side::Left, 0, vec![a, s], 3, 6, 0.5)
    }

    #[test]
    fn lookup_hits_containing_rect() {
        let idx = two_key_index();
        assert_eq!(idx.at(Point::new(0.1, 0.1)).unwrap().label, "a");
        assert_eq!(idx.at(Point::new(0.5, 0.1)).unwrap().label, "s");
        assert!(idx.at(Point::new(0.32, 0.1)).is_none()); // gap between keys
        assert!(idx.at(Point::new(0.1, 0.9)).is_none());
    }

    #[test]
    fn overlapping_rects_prefer_deeper_then_smaller() {
        let big = key(Side::Left, Rect::new(0.0, 0.0, 0.6, 0.6), "big", 1, 0, 0);
        let small = key(Side::Left, Rect::new(0.2, 0.2, 0.2, 0.2), "small", 2, 0, 1);
        let idx = BindingIndex::build(Side::Left, 0, vec![big, small], 3, 6, 0.5);
        // Center of the small key: deeper inside small than big is deep there.
        assert_eq!(idx.at(Point::new(0.3, 0.3)).unwrap().label, "small");
        // Well outside the small key only the big one contains.
        assert_eq!(idx.at(Point::new(0.55, 0.55)).unwrap().label, "big");
    }

    #[test]
    fn custom_buttons_resolve_via_linear_scan() {
        let mut bindings = vec![key(
            Side::Left,
            Rect::new(0.0, 0.0, 0.3, 0.3),
            "a",
            keycode::VK_ANSI_A,
            0,
            0,
        )];
        bindings.push(Binding {
            side: Side::Left,
            rect: Rect::new(0.7, 0.7, 0.2, 0.2),
            label: "macro".to_string(),
            action: Action::TypingToggle,
            hold_action: None,
            continuous: false,
            origin: BindingOrigin::Custom { id: 7 },
        });
        let idx = BindingIndex::build(Side::Left, 0, bindings, 3, 6, 0.5);
        assert_eq!(idx.at(Point::new(0.8, 0.8)).unwrap().label, "macro");
    }

    #[test]
    fn many_custom_buttons_use_the_overlay_grid() {
        let mut bindings = Vec::new();
        for i in 0..6u32 {
            bindings.push(Binding {
                side: Side::Right,
                rect: Rect::new(0.15 * i as f32, 0.85, 0.1, 0.1),
                label: format!("c{i}"),
                action: Action::LayerToggle(1),
                hold_action: None,
                continuous: false,
                origin: BindingOrigin::Custom { id: i },
            });
        }
        let idx = BindingIndex::build(Side::Right, 0, bindings, 3, 6, 0.5);
        assert_eq!(idx.at(Point::new(0.47, 0.9)).unwrap().label, "c3");
        assert!(idx.at(Point::new(0.97, 0.9)).is_none());
    }

    #[test]
    fn snap_accepts_within_radius_only() {
        let idx = two_key_index();
        // Just right of key "a" (rect ends at 0.3, radius = 0.15).
        let hit = idx.snap(Point::new(0.315, 0.15));
        // Point is 0.165 from a's center (0.15, 0.15): within r=0.15? No: 0.165 > 0.15.
        // Distance from a center: dx = 0.165, so out of radius; s center is at 0.5.
        assert!(hit.is_none());
        let hit = idx.snap(Point::new(0.25, 0.15)).unwrap();
        assert_eq!(idx.binding(hit.binding_index).label, "a");
    }

    #[test]
    fn snap_ambiguity_prefers_closer_rect_edge() {
        // Wide snap radii so both keys cover the gap; probe almost
        // equidistant from both centers, slightly nearer s's rect edge.
        let a = key(
            Side::Left,
            Rect::new(0.0, 0.0, 0.3, 0.3),
            "a",
            keycode::VK_ANSI_A,
            0,
            0,
        );
        let s = key(
            Side::Left,
            Rect::new(0.35, 0.0, 0.3, 0.3),
            "s",
            keycode::VK_ANSI_S,
            0,
            1,
        );
        let idx = BindingIndex::build(Side::Left, 0, vec![a, s], 3, 6, 0.8);
        let hit = idx.snap(Point::new(0.330, 0.15)).unwrap();
        // Centers sit at x=0.15 and x=0.50: distances 0.180 vs 0.170, within
        // the ambiguity ratio. Edges sit at 0.030 vs 0.020: s wins.
        assert!(hit.ambiguous);
        assert_eq!(idx.binding(hit.binding_index).label, "s");
    }

    #[test]
    fn snap_skips_non_key_bindings() {
        let toggle = Binding {
            side: Side::Left,
            rect: Rect::new(0.4, 0.4, 0.2, 0.2),
            label: "toggle".to_string(),
            action: Action::TypingToggle,
            hold_action: None,
            continuous: false,
            origin: BindingOrigin::Grid { row: 1, col: 1 },
        };
        let idx = BindingIndex::build(Side::Left, 0, vec![toggle], 3, 6, 0.5);
        assert!(idx.snap(Point::new(0.5, 0.39)).is_none());
    }
}
