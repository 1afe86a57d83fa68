//! Configuration loading and parsing.
//!
//! The core owns no persisted state; everything here is transient
//! per-process. `glasstokey.toml` (or an override path provided by the
//! binary) seeds an `EngineSettings`; runtime mutators on the engine handle
//! override individual fields between frames. Unknown fields are ignored
//! (TOML deserialization tolerance) to allow forward evolution, and parse
//! errors fall back to defaults rather than failing startup.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::{info, warn};

/// Every tunable the engine consumes. Durations are seconds or milliseconds
/// as named; distances are millimeters on the physical surface.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Resolution of the tick timestamps handed to `ingest`.
    pub tick_hz: u64,
    /// Trackpad canvas extent in device units (digitizer resolution).
    pub canvas_width_units: f64,
    pub canvas_height_units: f64,
    /// Device units per millimeter; invalid values fall back to unit scale.
    pub units_per_mm: f64,

    /// Hold threshold before a hold action / continuous repeat engages.
    pub hold_min_seconds: f64,
    /// Longest touch that still counts as a tap on release.
    pub tap_max_seconds: f64,
    /// Drift beyond this cancels a tap in progress.
    pub drag_cancel_mm: f64,
    /// After a key dispatch, any touch within this window is typing.
    pub typing_grace_ms: u64,
    /// Decision buffer before a key candidate commits to typing.
    pub key_buffer_seconds: f64,
    pub intent_move_threshold_mm: f64,
    pub intent_velocity_threshold_mm_s: f64,
    pub allow_mouse_takeover_during_typing: bool,
    /// Force-click guard; 0 disables.
    pub force_click_cap_grams: f64,

    pub haptic_strength: f32,
    pub haptic_min_interval_ms: u64,

    /// Snap radius as percent of the base radius (`min(w,h)/2`); 200 reaches
    /// the full key extent, 0 disables snapping.
    pub snap_radius_percent: u16,

    pub chordal_shift_enabled: bool,
    /// Contacts on one side that latch the chord shift.
    pub chord_threshold: u8,
    /// Stale-source timeout for the chord latch; doubles as the held-count
    /// smoothing window.
    pub contact_hold_duration_seconds: f64,

    pub tap_click_enabled: bool,
    pub tap_click_cadence_ms: u64,
    pub keyboard_mode_enabled: bool,

    pub swipe_threshold_mm: f64,
    pub corner_hold_seconds: f64,
    pub voice_hold_seconds: f64,

    pub repeat_initial_delay_seconds: f64,
    pub repeat_interval_seconds: f64,

    pub queue_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            tick_hz: Self::default_tick_hz(),
            canvas_width_units: 7612.0,
            canvas_height_units: 5065.0,
            units_per_mm: 78.0,
            hold_min_seconds: 0.35,
            tap_max_seconds: 0.25,
            drag_cancel_mm: 3.0,
            typing_grace_ms: 500,
            key_buffer_seconds: 0.05,
            intent_move_threshold_mm: 4.0,
            intent_velocity_threshold_mm_s: 80.0,
            allow_mouse_takeover_during_typing: false,
            force_click_cap_grams: 0.0,
            haptic_strength: 0.6,
            haptic_min_interval_ms: 20,
            snap_radius_percent: 100,
            chordal_shift_enabled: true,
            chord_threshold: 4,
            contact_hold_duration_seconds: 0.06,
            tap_click_enabled: true,
            tap_click_cadence_ms: 300,
            keyboard_mode_enabled: false,
            swipe_threshold_mm: 25.0,
            corner_hold_seconds: 1.0,
            voice_hold_seconds: 1.5,
            repeat_initial_delay_seconds: 0.35,
            repeat_interval_seconds: 0.085,
            queue_capacity: 4096,
        }
    }
}

impl EngineSettings {
    const fn default_tick_hz() -> u64 {
        1_000_000_000
    }

    pub fn seconds_to_ticks(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.tick_hz as f64) as u64
    }

    pub fn millis_to_ticks(&self, millis: u64) -> u64 {
        millis.saturating_mul(self.tick_hz / 1000)
    }

    pub fn ticks_to_seconds(&self, ticks: u64) -> f64 {
        ticks as f64 / self.tick_hz as f64
    }

    /// Millimeters to normalized surface distance. Falls back to a 1 unit/mm
    /// scale when the configured scale is unusable.
    pub fn mm_to_norm(&self, mm: f64) -> f32 {
        let upm = if self.units_per_mm.is_finite() && self.units_per_mm > 0.0 {
            self.units_per_mm
        } else {
            1.0
        };
        let width = if self.canvas_width_units.is_finite() && self.canvas_width_units > 0.0 {
            self.canvas_width_units
        } else {
            1.0
        };
        (mm * upm / width) as f32
    }

    pub fn snap_radius_fraction(&self) -> f32 {
        0.5 * self.snap_radius_percent as f32 / 100.0
    }

    /// Precompute the tick/normalized forms the hot path compares against.
    pub fn tunables(&self) -> Tunables {
        let drag = self.mm_to_norm(self.drag_cancel_mm);
        let mv = self.mm_to_norm(self.intent_move_threshold_mm);
        Tunables {
            hold_min_ticks: self.seconds_to_ticks(self.hold_min_seconds),
            tap_max_ticks: self.seconds_to_ticks(self.tap_max_seconds),
            key_buffer_ticks: self.seconds_to_ticks(self.key_buffer_seconds),
            typing_grace_ticks: self.millis_to_ticks(self.typing_grace_ms),
            contact_hold_ticks: self.seconds_to_ticks(self.contact_hold_duration_seconds),
            corner_hold_ticks: self.seconds_to_ticks(self.corner_hold_seconds),
            voice_hold_ticks: self.seconds_to_ticks(self.voice_hold_seconds),
            tap_click_cadence_ticks: self.millis_to_ticks(self.tap_click_cadence_ms),
            haptic_min_ticks: self.millis_to_ticks(self.haptic_min_interval_ms),
            repeat_initial_ticks: self.seconds_to_ticks(self.repeat_initial_delay_seconds),
            repeat_interval_ticks: self.seconds_to_ticks(self.repeat_interval_seconds).max(1),
            drag_cancel2: drag * drag,
            move_threshold2: mv * mv,
            velocity_threshold_norm_per_s: self.mm_to_norm(self.intent_velocity_threshold_mm_s),
            swipe_threshold_norm: self.mm_to_norm(self.swipe_threshold_mm),
            tick_hz: self.tick_hz.max(1),
        }
    }
}

/// Tick- and normalized-space forms of the settings, derived once per
/// settings application so frame processing never converts units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tunables {
    pub hold_min_ticks: u64,
    pub tap_max_ticks: u64,
    pub key_buffer_ticks: u64,
    pub typing_grace_ticks: u64,
    pub contact_hold_ticks: u64,
    pub corner_hold_ticks: u64,
    pub voice_hold_ticks: u64,
    pub tap_click_cadence_ticks: u64,
    pub haptic_min_ticks: u64,
    pub repeat_initial_ticks: u64,
    pub repeat_interval_ticks: u64,
    pub drag_cancel2: f32,
    pub move_threshold2: f32,
    pub velocity_threshold_norm_per_s: f32,
    pub swipe_threshold_norm: f32,
    pub tick_hz: u64,
}

impl Tunables {
    pub fn ticks_delta_seconds(&self, from: u64, to: u64) -> f32 {
        to.saturating_sub(from) as f32 / self.tick_hz as f32
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>, // original file string (optional)
    pub file: ConfigFile,    // parsed (or default) data
}

/// Best-effort config path: prefer a local `glasstokey.toml`, then the
/// platform config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("glasstokey.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("glasstokey").join("glasstokey.toml");
    }
    PathBuf::from("glasstokey.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                info!(target: "config", path = %path.display(), "config_loaded");
                Ok(Config {
                    raw: Some(content),
                    file,
                })
            }
            Err(e) => {
                warn!(target: "config", path = %path.display(), error = %e, "config_parse_failed_using_defaults");
                Ok(Config::default())
            }
        }
    } else {
        Ok(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_when_missing_file() {
        let cfg = load_from(Some(PathBuf::from("__nonexistent_hopefully__.toml"))).unwrap();
        assert_eq!(cfg.file.engine, EngineSettings::default());
        assert!(cfg.raw.is_none());
    }

    #[test]
    fn parses_engine_overrides() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[engine]\nhold_min_seconds = 0.5\nsnap_radius_percent = 200\nchord_threshold = 5\n",
        )
        .unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.file.engine.hold_min_seconds, 0.5);
        assert_eq!(cfg.file.engine.snap_radius_percent, 200);
        assert_eq!(cfg.file.engine.chord_threshold, 5);
        // Untouched fields keep defaults.
        assert_eq!(cfg.file.engine.tap_max_seconds, 0.25);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[engine\nhold_min_seconds = oops").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.file.engine, EngineSettings::default());
    }

    #[test]
    fn tick_conversions_round_sensibly() {
        let s = EngineSettings::default();
        assert_eq!(s.seconds_to_ticks(0.35), 350_000_000);
        assert_eq!(s.millis_to_ticks(60), 60_000_000);
        assert!((s.ticks_to_seconds(500_000_000) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn mm_conversion_uses_canvas_scale() {
        let s = EngineSettings::default();
        // 3 mm * 78 units/mm / 7612 units across.
        let norm = s.mm_to_norm(3.0);
        assert!((norm - (3.0 * 78.0 / 7612.0) as f32).abs() < 1e-7);
    }

    #[test]
    fn invalid_unit_scale_falls_back_to_unit_per_mm() {
        let mut s = EngineSettings::default();
        s.units_per_mm = 0.0;
        s.canvas_width_units = 100.0;
        assert!((s.mm_to_norm(5.0) - 0.05).abs() < 1e-7);
    }

    #[test]
    fn tunables_derive_tick_and_norm_forms() {
        let s = EngineSettings::default();
        let t = s.tunables();
        assert_eq!(t.hold_min_ticks, 350_000_000);
        assert_eq!(t.typing_grace_ticks, 500_000_000);
        let drag = s.mm_to_norm(3.0);
        assert!((t.drag_cancel2 - drag * drag).abs() < 1e-10);
        assert!((t.ticks_delta_seconds(0, 1_000_000_000) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn snap_fraction_scales_with_percent() {
        let mut s = EngineSettings::default();
        assert!((s.snap_radius_fraction() - 0.5).abs() < 1e-7);
        s.snap_radius_percent = 200;
        assert!((s.snap_radius_fraction() - 1.0).abs() < 1e-7);
        s.snap_radius_percent = 0;
        assert_eq!(s.snap_radius_fraction(), 0.0);
    }
}
