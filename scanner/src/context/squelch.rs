// Metrea LLC Intellectual Property
// Originally developed by Raw Socket Labs LLC

//! Adaptive squelch delta.
//!
//! While the scanner dwells on a signal, the VFO's squelch threshold is
//! tightened relative to where it was: either a fixed delta below the
//! user's setting, or (auto mode) a delta above the tracked noise floor.
//! The original level is saved on entry and restored on every exit path.

use crate::ports::VfoPort;
use std::time::Instant;
use tracing::{debug, warn};

pub const MIN_SQUELCH: f32 = -100.0;
pub const MAX_SQUELCH: f32 = 0.0;

/// Noise floor smoothing: 95% history, 5% new estimate.
const NOISE_ALPHA: f32 = 0.95;
/// Auto-mode re-application cadence in milliseconds.
const AUTO_UPDATE_MS: u128 = 250;

pub struct SquelchController {
    delta_db: f32,
    auto: bool,
    noise_floor_db: f32,
    original_level: f32,
    active: bool,
    last_auto_update: Instant,
}

impl SquelchController {
    pub fn new(delta_db: f32, auto: bool) -> Self {
        Self {
            delta_db,
            auto,
            noise_floor_db: -100.0,
            original_level: -50.0,
            active: false,
            last_auto_update: Instant::now(),
        }
    }

    pub fn set_delta_db(&mut self, delta_db: f32) {
        self.delta_db = delta_db;
    }

    pub fn set_auto(&mut self, auto: bool) {
        self.auto = auto;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn noise_floor_db(&self) -> f32 {
        self.noise_floor_db
    }

    /// Tighten the VFO squelch, saving the current level first. A no-op
    /// when already active, when the delta is zero, or when the VFO's
    /// squelch is disabled.
    pub fn apply_delta(&mut self, vfo: &dyn VfoPort) {
        if self.active || self.delta_db <= 0.0 {
            return;
        }
        let enabled = match vfo.squelch_enabled() {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!(error = %e, "cannot read squelch state, skipping delta");
                return;
            }
        };
        if !enabled {
            return;
        }
        let original = match vfo.squelch_level() {
            Ok(level) => level,
            Err(e) => {
                warn!(error = %e, "cannot read squelch level, skipping delta");
                return;
            }
        };

        let target = self.target_level(original);
        if let Err(e) = vfo.set_squelch_level(target) {
            debug!(error = %e, "set_squelch_level failed");
            return;
        }
        self.original_level = original;
        self.active = true;
        self.last_auto_update = Instant::now();
        debug!(original, target, auto = self.auto, "squelch delta applied");
    }

    /// Put the squelch back where the user had it. Safe to call on every
    /// exit path; a no-op when the delta is not active.
    pub fn restore(&mut self, vfo: &dyn VfoPort) {
        if !self.active {
            return;
        }
        match vfo.squelch_enabled() {
            Ok(true) => {
                if let Err(e) = vfo.set_squelch_level(self.original_level) {
                    debug!(error = %e, "squelch restore failed");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "cannot read squelch state during restore"),
        }
        self.active = false;
        debug!(level = self.original_level, "squelch restored");
    }

    /// Fold an instantaneous noise estimate into the running floor.
    /// Skipped while dwelling so a present signal cannot drag the floor
    /// up. In auto mode the closing threshold is re-applied every 250 ms.
    pub fn observe_noise(&mut self, instant_noise_db: f32, dwelling: bool, vfo: &dyn VfoPort) {
        if dwelling || !instant_noise_db.is_finite() {
            return;
        }
        self.noise_floor_db =
            NOISE_ALPHA * self.noise_floor_db + (1.0 - NOISE_ALPHA) * instant_noise_db;

        if self.auto
            && self.active
            && self.last_auto_update.elapsed().as_millis() >= AUTO_UPDATE_MS
        {
            let target = self.auto_target();
            if let Err(e) = vfo.set_squelch_level(target) {
                debug!(error = %e, "auto squelch update failed");
            }
            self.last_auto_update = Instant::now();
        }
    }

    fn target_level(&self, original: f32) -> f32 {
        let level = if self.auto {
            self.auto_target()
        } else {
            (original - self.delta_db).max(MIN_SQUELCH)
        };
        level.clamp(MIN_SQUELCH, MAX_SQUELCH)
    }

    fn auto_target(&self) -> f32 {
        (self.noise_floor_db + self.delta_db.clamp(0.0, 20.0))
            .max(MIN_SQUELCH)
            .clamp(MIN_SQUELCH, MAX_SQUELCH)
    }
}
