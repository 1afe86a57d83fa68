//! Diagnostics tap and status snapshots.
//!
//! The tap is a fixed-capacity ring of intent transitions (plus optional
//! per-frame summaries) that replay fingerprinting and status consumers
//! drain; it never blocks the frame path.

use std::collections::VecDeque;

use core_events::QueueMetrics;

use crate::intent::IntentTransition;

pub const TAP_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameSummary {
    pub ticks: u64,
    pub device: u32,
    pub contact_count: usize,
    pub events_emitted: usize,
}

#[derive(Debug, Default)]
pub struct DiagnosticsTap {
    transitions: VecDeque<IntentTransition>,
    frames: VecDeque<FrameSummary>,
    pub record_frames: bool,
}

impl DiagnosticsTap {
    pub fn push_transitions(&mut self, batch: &[IntentTransition]) {
        for t in batch {
            if self.transitions.len() == TAP_CAPACITY {
                self.transitions.pop_front();
            }
            self.transitions.push_back(*t);
        }
    }

    pub fn push_frame(&mut self, summary: FrameSummary) {
        if !self.record_frames {
            return;
        }
        if self.frames.len() == TAP_CAPACITY {
            self.frames.pop_front();
        }
        self.frames.push_back(summary);
    }

    /// Take everything recorded so far, oldest first.
    pub fn drain_transitions(&mut self) -> Vec<IntentTransition> {
        self.transitions.drain(..).collect()
    }

    pub fn drain_frames(&mut self) -> Vec<FrameSummary> {
        self.frames.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.transitions.clear();
        self.frames.clear();
    }
}

/// Immutable value copy of engine state, returned across the actor boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub intent_mode: &'static str,
    pub typing_enabled: bool,
    pub listening: bool,
    pub keymap_editing: bool,
    pub persistent_layer: u8,
    pub active_layer: u8,
    pub live_contacts: usize,
    /// Smoothed count: never drops within the contact-hold window.
    pub held_contacts: usize,
    pub modifier_counts: [u32; 4],
    pub chord_left: bool,
    pub chord_right: bool,
    pub repeats_active: usize,
    pub repeats_started: u64,
    pub repeats_cancelled: u64,
    pub snap_attempts: u64,
    pub snap_accepted: u64,
    pub dictation_engaged: bool,
    pub frames_processed: u64,
    pub frames_ignored: u64,
    pub queue: QueueMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{IntentMode, IntentReason};

    fn transition(n: u64) -> IntentTransition {
        IntentTransition {
            prev: IntentMode::Idle,
            next: IntentMode::MouseActive,
            reason: IntentReason::Drift,
            ticks: n,
        }
    }

    #[test]
    fn ring_drops_oldest_past_capacity() {
        let mut tap = DiagnosticsTap::default();
        let batch: Vec<_> = (0..TAP_CAPACITY as u64 + 10).map(transition).collect();
        tap.push_transitions(&batch);
        let drained = tap.drain_transitions();
        assert_eq!(drained.len(), TAP_CAPACITY);
        assert_eq!(drained[0].ticks, 10);
        assert!(tap.drain_transitions().is_empty());
    }

    #[test]
    fn frame_summaries_only_recorded_when_enabled() {
        let mut tap = DiagnosticsTap::default();
        tap.push_frame(FrameSummary::default());
        assert!(tap.drain_frames().is_empty());
        tap.record_frames = true;
        tap.push_frame(FrameSummary::default());
        assert_eq!(tap.drain_frames().len(), 1);
    }
}
