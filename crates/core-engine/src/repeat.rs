//! Per-token auto-repeat scheduling.
//!
//! Entries are keyed by the holding contact. Tokens are opaque and
//! monotonically increasing; a repeat counts as cancelled the moment its
//! token's active flag clears, even if the entry has not been swept yet.
//! Polling is synchronous against caller-supplied ticks so replay stays
//! deterministic; the live actor wakes a timer task for the next deadline.

use core_events::{ContactKey, DispatchEvent, ModFlags, Side, keycode};
use tracing::{debug, trace};

use crate::table::ContactTable;

#[derive(Debug, Clone)]
pub struct RepeatEntry {
    pub vk: u16,
    pub flags: ModFlags,
    pub side: Side,
    pub label: String,
    pub token: u64,
    pub interval_ticks: u64,
    pub next_fire_ticks: u64,
    pub active: bool,
}

#[derive(Debug, Default)]
pub struct RepeatScheduler {
    entries: ContactTable<RepeatEntry>,
    next_token: u64,
    started_total: u64,
    cancelled_total: u64,
}

impl RepeatScheduler {
    /// Begin a repeat stream for a held key; returns the token carried by
    /// every KeyDown in the stream. The spacebar repeats at twice the
    /// interval to prevent runaway word breaks.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        &mut self,
        key: ContactKey,
        side: Side,
        vk: u16,
        flags: ModFlags,
        label: &str,
        now: u64,
        initial_delay_ticks: u64,
        interval_ticks: u64,
    ) -> u64 {
        // Restarting a key that already repeats cancels the old stream first.
        self.cancel(key);
        self.next_token += 1;
        let token = self.next_token;
        let interval = if vk == keycode::VK_SPACE {
            interval_ticks * 2
        } else {
            interval_ticks
        };
        self.entries.insert(
            key,
            RepeatEntry {
                vk,
                flags,
                side,
                label: label.to_string(),
                token,
                interval_ticks: interval.max(1),
                next_fire_ticks: now + initial_delay_ticks,
                active: true,
            },
        );
        self.started_total += 1;
        debug!(target: "engine.repeat", key = %key, token, vk, "repeat_started");
        token
    }

    /// Deactivate the repeat held by `key`. Returns true if a live stream
    /// was cancelled.
    pub fn cancel(&mut self, key: ContactKey) -> bool {
        if let Some(entry) = self.entries.get_mut(key) {
            if entry.active {
                entry.active = false;
                self.cancelled_total += 1;
                debug!(target: "engine.repeat", key = %key, token = entry.token, "repeat_cancelled");
                return true;
            }
        }
        false
    }

    /// Deactivate by token (used when the holder identity is gone).
    pub fn deactivate_token(&mut self, token: u64) {
        let mut hit = false;
        self.entries.for_each_mut(|_, entry| {
            if entry.token == token && entry.active {
                entry.active = false;
                hit = true;
            }
        });
        if hit {
            self.cancelled_total += 1;
        }
    }

    pub fn cancel_all(&mut self) {
        let mut cancelled = 0u64;
        self.entries.for_each_mut(|_, entry| {
            if entry.active {
                entry.active = false;
                cancelled += 1;
            }
        });
        self.cancelled_total += cancelled;
        self.sweep();
    }

    /// Fire every due entry once, advancing past missed intervals without
    /// emitting catch-up bursts, and sweep deactivated entries.
    pub fn poll(&mut self, now: u64) -> Vec<DispatchEvent> {
        let mut out = Vec::new();
        self.entries.for_each_mut(|_, entry| {
            if !entry.active || entry.next_fire_ticks > now {
                return;
            }
            out.push(DispatchEvent::key_down_repeat(
                now,
                entry.side,
                entry.vk,
                entry.flags,
                &entry.label,
                entry.token,
            ));
            while entry.next_fire_ticks <= now {
                entry.next_fire_ticks += entry.interval_ticks;
            }
            trace!(target: "engine.repeat", token = entry.token, next = entry.next_fire_ticks, "repeat_fired");
        });
        self.sweep();
        out
    }

    fn sweep(&mut self) {
        self.entries.retain(|_, entry| entry.active);
    }

    /// Earliest pending fire time, if any stream is live.
    pub fn next_deadline(&self) -> Option<u64> {
        let mut deadline: Option<u64> = None;
        self.entries.for_each(|_, entry| {
            if entry.active {
                deadline = Some(match deadline {
                    Some(d) => d.min(entry.next_fire_ticks),
                    None => entry.next_fire_ticks,
                });
            }
        });
        deadline
    }

    pub fn active_count(&self) -> usize {
        let mut n = 0;
        self.entries.for_each(|_, e| {
            if e.active {
                n += 1;
            }
        });
        n
    }

    pub fn token_for(&self, key: ContactKey) -> Option<u64> {
        self.entries.get(key).filter(|e| e.active).map(|e| e.token)
    }

    /// Live entry details for `key`, used to emit the terminating KeyUp.
    pub fn active_entry(&self, key: ContactKey) -> Option<(u64, u16, ModFlags, Side, String)> {
        self.entries
            .get(key)
            .filter(|e| e.active)
            .map(|e| (e.token, e.vk, e.flags, e.side, e.label.clone()))
    }

    /// Every live entry, for bulk shutdown paths (typing off, reset).
    pub fn active_entries(&self) -> Vec<(u64, u16, ModFlags, Side, String)> {
        let mut out = Vec::new();
        self.entries.for_each(|_, e| {
            if e.active {
                out.push((e.token, e.vk, e.flags, e.side, e.label.clone()));
            }
        });
        out
    }

    pub fn started_total(&self) -> u64 {
        self.started_total
    }

    pub fn cancelled_total(&self) -> u64 {
        self.cancelled_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: u64 = 1_000_000;
    const DELAY: u64 = 350 * MS;
    const INTERVAL: u64 = 85 * MS;

    fn key(id: u32) -> ContactKey {
        ContactKey::new(0, id)
    }

    fn start(s: &mut RepeatScheduler, id: u32, vk: u16, now: u64) -> u64 {
        s.start(
            key(id),
            Side::Left,
            vk,
            ModFlags::empty(),
            keycode::name(vk),
            now,
            DELAY,
            INTERVAL,
        )
    }

    #[test]
    fn fires_after_initial_delay_then_interval() {
        let mut s = RepeatScheduler::default();
        let token = start(&mut s, 1, keycode::VK_DELETE, 0);
        assert!(s.poll(DELAY - 1).is_empty());
        let first = s.poll(DELAY);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].repeat_token, Some(token));
        assert!(first[0].flags.repeatable);
        assert!(s.poll(DELAY + INTERVAL - 1).is_empty());
        assert_eq!(s.poll(DELAY + INTERVAL).len(), 1);
    }

    #[test]
    fn spacebar_repeats_at_double_interval() {
        let mut s = RepeatScheduler::default();
        start(&mut s, 2, keycode::VK_SPACE, 0);
        assert_eq!(s.poll(DELAY).len(), 1);
        assert!(s.poll(DELAY + INTERVAL).is_empty());
        assert_eq!(s.poll(DELAY + 2 * INTERVAL).len(), 1);
    }

    #[test]
    fn late_poll_fires_once_and_skips_missed_intervals() {
        let mut s = RepeatScheduler::default();
        start(&mut s, 3, keycode::VK_DELETE, 0);
        // Way behind: five intervals late still yields a single event.
        let late = DELAY + 5 * INTERVAL + 10 * MS;
        assert_eq!(s.poll(late).len(), 1);
        let next = s.next_deadline().unwrap();
        assert!(next > late);
        assert!(next <= late + INTERVAL);
    }

    #[test]
    fn cancel_balances_start_and_stops_firing() {
        let mut s = RepeatScheduler::default();
        start(&mut s, 4, keycode::VK_DELETE, 0);
        assert!(s.cancel(key(4)));
        assert!(!s.cancel(key(4))); // second cancel is a no-op
        assert!(s.poll(DELAY).is_empty());
        assert_eq!(s.started_total(), 1);
        assert_eq!(s.cancelled_total(), 1);
        assert_eq!(s.active_count(), 0);
        assert!(s.next_deadline().is_none());
    }

    #[test]
    fn restart_cancels_prior_stream() {
        let mut s = RepeatScheduler::default();
        let t1 = start(&mut s, 5, keycode::VK_DELETE, 0);
        let t2 = start(&mut s, 5, keycode::VK_DELETE, 10 * MS);
        assert!(t2 > t1);
        assert_eq!(s.started_total(), 2);
        assert_eq!(s.cancelled_total(), 1);
        let fired = s.poll(10 * MS + DELAY);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].repeat_token, Some(t2));
    }

    #[test]
    fn cancel_all_quiesces_every_stream() {
        let mut s = RepeatScheduler::default();
        start(&mut s, 6, keycode::VK_DELETE, 0);
        start(&mut s, 7, keycode::VK_LEFT_ARROW, 0);
        start(&mut s, 8, keycode::VK_SPACE, 0);
        s.cancel_all();
        assert_eq!(s.started_total(), 3);
        assert_eq!(s.cancelled_total(), 3);
        assert!(s.poll(DELAY * 2).is_empty());
    }

    #[test]
    fn deactivate_token_matches_cancel_semantics() {
        let mut s = RepeatScheduler::default();
        let token = start(&mut s, 9, keycode::VK_DELETE, 0);
        s.deactivate_token(token);
        assert_eq!(s.cancelled_total(), 1);
        assert!(s.poll(DELAY).is_empty());
    }
}
