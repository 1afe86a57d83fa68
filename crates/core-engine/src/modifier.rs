//! Reference-counted modifiers and the chord-shift latch.
//!
//! Every modifier class carries a non-negative count: the first holder emits
//! ModifierDown, the last release emits ModifierUp. The chord-shift latch
//! (four fingers planted on one side) contributes a synthetic Shift through
//! the same counters so balance invariants hold across both sources.

use core_events::{
    DispatchEvent, MODIFIER_UNDERFLOWS, ModFlags, ModifierKind, Side, keycode,
};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct ModifierBank {
    counts: [u32; 4],
}

impl ModifierBank {
    /// Increment a modifier; returns the ModifierDown edge on 0 -> 1.
    pub fn down(&mut self, kind: ModifierKind, side: Side, vk: u16, now: u64) -> Option<DispatchEvent> {
        let slot = &mut self.counts[kind.index()];
        *slot += 1;
        if *slot == 1 {
            debug!(target: "engine.modifier", kind = kind.as_str(), side = side.as_str(), "modifier_down");
            Some(DispatchEvent::modifier_edge(now, side, vk, true))
        } else {
            None
        }
    }

    /// Decrement with a floor at zero; returns the ModifierUp edge on 1 -> 0.
    /// Underflow clamps and emits a single diagnostic.
    pub fn up(&mut self, kind: ModifierKind, side: Side, vk: u16, now: u64) -> Option<DispatchEvent> {
        let slot = &mut self.counts[kind.index()];
        if *slot == 0 {
            MODIFIER_UNDERFLOWS.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            warn!(target: "engine.modifier", kind = kind.as_str(), "modifier_counter_underflow");
            return None;
        }
        *slot -= 1;
        if *slot == 0 {
            debug!(target: "engine.modifier", kind = kind.as_str(), side = side.as_str(), "modifier_up");
            Some(DispatchEvent::modifier_edge(now, side, vk, false))
        } else {
            None
        }
    }

    pub fn count(&self, kind: ModifierKind) -> u32 {
        self.counts[kind.index()]
    }

    pub fn counts(&self) -> [u32; 4] {
        self.counts
    }

    pub fn any_active(&self) -> bool {
        self.counts.iter().any(|&c| c > 0)
    }

    pub fn effective_flags(&self) -> ModFlags {
        let mut flags = ModFlags::empty();
        for kind in ModifierKind::ALL {
            if self.counts[kind.index()] > 0 {
                flags |= kind.flag();
            }
        }
        flags
    }

    /// Drive every counter to zero, emitting one synthetic Up per held class.
    /// Used by reset so the engine quiesces provably balanced.
    pub fn force_clear(&mut self, side: Side, now: u64) -> Vec<DispatchEvent> {
        let mut out = Vec::new();
        for kind in ModifierKind::ALL {
            if self.counts[kind.index()] > 0 {
                self.counts[kind.index()] = 0;
                out.push(DispatchEvent::modifier_edge(
                    now,
                    side,
                    keycode::modifier_vk(kind),
                    false,
                ));
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ChordSideState {
    active: bool,
    last_contact_ticks: u64,
}

/// Edge produced by a chord latch update; the engine routes it through the
/// modifier bank as a synthetic Shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChordEdge {
    Engage,
    Release,
}

#[derive(Debug, Default)]
pub struct ChordShift {
    sides: [ChordSideState; 2],
    /// One synthetic Shift-down is outstanding while true.
    shift_outstanding: bool,
}

impl ChordShift {
    /// Feed one side's live contact count. Returns a Shift edge when the
    /// union of side latches changes.
    pub fn observe(
        &mut self,
        side: Side,
        contact_count: usize,
        threshold: u8,
        hold_ticks: u64,
        now: u64,
    ) -> Option<ChordEdge> {
        let state = &mut self.sides[side.index()];
        // A stale latch expires before this frame's contacts refresh it, so
        // a long frameless gap cannot keep the latch alive forever.
        if state.active && now.saturating_sub(state.last_contact_ticks) >= hold_ticks {
            state.active = false;
            debug!(target: "engine.modifier", side = side.as_str(), "chord_latch_cleared");
        }
        if contact_count > 0 {
            state.last_contact_ticks = now;
            if contact_count >= threshold as usize && !state.active {
                state.active = true;
                debug!(target: "engine.modifier", side = side.as_str(), contact_count, "chord_latch_engaged");
            }
        }
        self.union_edge()
    }

    /// Time-based decay pass for sides with no contacts this frame.
    pub fn decay(&mut self, now: u64, hold_ticks: u64) -> Option<ChordEdge> {
        for state in &mut self.sides {
            if state.active && now.saturating_sub(state.last_contact_ticks) >= hold_ticks {
                state.active = false;
            }
        }
        self.union_edge()
    }

    fn union_edge(&mut self) -> Option<ChordEdge> {
        let union = self.sides.iter().any(|s| s.active);
        match (union, self.shift_outstanding) {
            (true, false) => {
                self.shift_outstanding = true;
                Some(ChordEdge::Engage)
            }
            (false, true) => {
                self.shift_outstanding = false;
                Some(ChordEdge::Release)
            }
            _ => None,
        }
    }

    pub fn side_active(&self, side: Side) -> bool {
        self.sides[side.index()].active
    }

    pub fn any_active(&self) -> bool {
        self.sides.iter().any(|s| s.active)
    }

    pub fn shift_outstanding(&self) -> bool {
        self.shift_outstanding
    }

    /// Clear both latches; returns the Release edge if a synthetic Shift-down
    /// is outstanding, so reset stays balanced.
    pub fn reset(&mut self) -> Option<ChordEdge> {
        for state in &mut self.sides {
            state.active = false;
        }
        self.union_edge()
    }
}
