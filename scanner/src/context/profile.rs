// Metrea LLC Intellectual Property
// Originally developed by Raw Socket Labs LLC

//! Tuning profile application with redundancy caching.
//!
//! Applying a profile costs several VFO commands, so repeat applications
//! of the same profile to the same VFO near the same frequency are
//! skipped. The cache keys on profile identity (the `Arc` pointer), which
//! the worker invalidates whenever the scan list refreshes.

use crate::ports::{TunerPort, VfoPort};
use shared::TuningProfile;
use std::sync::Arc;
use tracing::{debug, info};

/// Applications within this distance of the cached frequency are
/// considered redundant.
const CACHE_FREQ_TOLERANCE_HZ: f64 = 1000.0;

#[derive(Default)]
pub struct ProfileApplicator {
    last: Option<(Arc<TuningProfile>, String, f64)>,
}

impl ProfileApplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the cached application, forcing the next `apply` through.
    pub fn invalidate(&mut self) {
        self.last = None;
    }

    /// Apply `profile` to the VFO for a tune to `frequency`. Returns true
    /// when commands were issued, false on a cache hit.
    ///
    /// Interface errors are logged and swallowed: a profile that fails to
    /// apply must not abort the scan loop.
    pub fn apply(
        &mut self,
        profile: &Arc<TuningProfile>,
        vfo: &dyn VfoPort,
        tuner: &dyn TunerPort,
        frequency: f64,
        context: &str,
    ) -> bool {
        if let Some((cached, vfo_name, freq)) = &self.last {
            if Arc::ptr_eq(cached, profile)
                && vfo_name == vfo.name()
                && (freq - frequency).abs() < CACHE_FREQ_TOLERANCE_HZ
            {
                debug!(
                    context,
                    profile = display_name(profile),
                    frequency,
                    "profile already applied, skipping"
                );
                return false;
            }
        }

        if let Err(e) = vfo.set_mode(profile.demod_mode) {
            debug!(error = %e, "set_mode failed");
        }
        if let Err(e) = vfo.set_bandwidth(profile.bandwidth) {
            debug!(error = %e, "set_bandwidth failed");
        }

        if profile.squelch_enabled {
            if let Err(e) = vfo.set_squelch_enabled(true) {
                debug!(error = %e, "set_squelch_enabled failed");
            }
            if let Err(e) = vfo.set_squelch_level(profile.squelch_level) {
                debug!(error = %e, "set_squelch_level failed");
            }
        } else if let Err(e) = vfo.set_squelch_enabled(false) {
            debug!(error = %e, "set_squelch_enabled failed");
        }

        if profile.rf_gain > 0.0 {
            if let Err(e) = tuner.set_gain_db(profile.rf_gain) {
                debug!(error = %e, "set_gain_db failed");
            }
        }

        // TODO: apply agc_enabled and deemphasis_mode once the VFO
        // interface grows commands for them.

        self.last = Some((Arc::clone(profile), vfo.name().to_string(), frequency));
        info!(
            context,
            profile = display_name(profile),
            frequency,
            mode = profile.demod_mode,
            bandwidth = profile.bandwidth,
            squelch = profile.squelch_enabled,
            "applied tuning profile"
        );
        true
    }
}

fn display_name(profile: &TuningProfile) -> &str {
    if profile.name.is_empty() {
        "Auto"
    } else {
        &profile.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::{SimTuner, SimVfo};

    fn profile(name: &str) -> Arc<TuningProfile> {
        Arc::new(TuningProfile {
            name: name.into(),
            demod_mode: 1,
            bandwidth: 12_500.0,
            squelch_enabled: true,
            squelch_level: -45.0,
            rf_gain: 25.0,
            ..TuningProfile::default()
        })
    }

    #[test]
    fn second_identical_apply_is_a_cache_hit() {
        let vfo = SimVfo::new("Radio");
        let tuner = SimTuner::new(2.4e6, 100e6);
        let mut appl = ProfileApplicator::new();
        let p = profile("NFM");

        assert!(appl.apply(&p, &vfo, &tuner, 100.1e6, "TEST"));
        assert!(!appl.apply(&p, &vfo, &tuner, 100.1e6, "TEST"));
        // Still a hit within the 1 kHz tolerance.
        assert!(!appl.apply(&p, &vfo, &tuner, 100.1e6 + 500.0, "TEST"));
        // A real retune breaks the cache.
        assert!(appl.apply(&p, &vfo, &tuner, 100.3e6, "TEST"));
    }

    #[test]
    fn different_profile_reapplies() {
        let vfo = SimVfo::new("Radio");
        let tuner = SimTuner::new(2.4e6, 100e6);
        let mut appl = ProfileApplicator::new();
        let a = profile("A");
        let b = profile("B");

        assert!(appl.apply(&a, &vfo, &tuner, 100.1e6, "TEST"));
        assert!(appl.apply(&b, &vfo, &tuner, 100.1e6, "TEST"));
        assert!(appl.apply(&a, &vfo, &tuner, 100.1e6, "TEST"));
    }

    #[test]
    fn invalidate_forces_reapplication() {
        let vfo = SimVfo::new("Radio");
        let tuner = SimTuner::new(2.4e6, 100e6);
        let mut appl = ProfileApplicator::new();
        let p = profile("NFM");

        assert!(appl.apply(&p, &vfo, &tuner, 100.1e6, "TEST"));
        appl.invalidate();
        assert!(appl.apply(&p, &vfo, &tuner, 100.1e6, "TEST"));
    }

    #[test]
    fn profile_state_reaches_the_vfo() {
        let vfo = SimVfo::new("Radio");
        let tuner = SimTuner::new(2.4e6, 100e6);
        let mut appl = ProfileApplicator::new();
        appl.apply(&profile("NFM"), &vfo, &tuner, 100.1e6, "TEST");

        use crate::ports::VfoPort;
        assert!(vfo.squelch_enabled().unwrap());
        assert_eq!(vfo.squelch_level().unwrap(), -45.0);
        assert_eq!(vfo.bandwidth(), 12_500.0);
    }
}
