//! End-to-end scan loop tests against mock and simulated ports.

use scanner::config::ScannerConfig;
use scanner::device::sim::{SimTone, SimTuner, SimVfo, StaticFrequencyManager};
use scanner::ports::{
    FrequencyManagerPort, PortError, SpectrumSource, SpectrumView, TunerPort, VfoPort,
};
use scanner::{ScanError, Scanner, ScannerPorts};
use shared::{ScanEntry, ScannerStatus, TuningProfile};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Host spectrum with one switchable emitter.
struct ScriptedSpectrum {
    view: SpectrumView,
    signal_hz: f64,
    signal_on: AtomicBool,
}

impl ScriptedSpectrum {
    fn new(center_hz: f64, bandwidth_hz: f64, signal_hz: f64) -> Self {
        Self {
            view: SpectrumView { center_hz, bandwidth_hz },
            signal_hz,
            signal_on: AtomicBool::new(true),
        }
    }

    fn set_signal(&self, on: bool) {
        self.signal_on.store(on, Ordering::SeqCst);
    }
}

impl SpectrumSource for ScriptedSpectrum {
    fn copy_latest(&self, out: &mut Vec<f32>) -> Option<SpectrumView> {
        const BINS: usize = 4096;
        out.clear();
        out.resize(BINS, -90.0);
        if self.signal_on.load(Ordering::SeqCst) {
            let per_bin = self.view.bandwidth_hz / BINS as f64;
            let bin = ((self.signal_hz - self.view.start_hz()) / per_bin) as usize;
            if bin < BINS {
                out[bin] = -30.0;
            }
        }
        Some(self.view)
    }
}

/// VFO wrapper recording every retune.
struct RecordingVfo {
    inner: SimVfo,
    retunes: Mutex<Vec<f64>>,
}

impl RecordingVfo {
    fn new() -> Self {
        Self {
            inner: SimVfo::new("Radio"),
            retunes: Mutex::new(Vec::new()),
        }
    }

    fn retunes(&self) -> Vec<f64> {
        self.retunes.lock().unwrap().clone()
    }
}

impl VfoPort for RecordingVfo {
    fn name(&self) -> &str {
        self.inner.name()
    }
    fn retune(&self, hz: f64) -> Result<(), PortError> {
        self.retunes.lock().unwrap().push(hz);
        self.inner.retune(hz)
    }
    fn set_mode(&self, mode: i32) -> Result<(), PortError> {
        self.inner.set_mode(mode)
    }
    fn set_bandwidth(&self, hz: f32) -> Result<(), PortError> {
        self.inner.set_bandwidth(hz)
    }
    fn set_squelch_enabled(&self, enabled: bool) -> Result<(), PortError> {
        self.inner.set_squelch_enabled(enabled)
    }
    fn set_squelch_level(&self, db: f32) -> Result<(), PortError> {
        self.inner.set_squelch_level(db)
    }
    fn squelch_enabled(&self) -> Result<bool, PortError> {
        self.inner.squelch_enabled()
    }
    fn squelch_level(&self) -> Result<f32, PortError> {
        self.inner.squelch_level()
    }
    fn bandwidth(&self) -> f64 {
        self.inner.bandwidth()
    }
}

fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn fast_config() -> ScannerConfig {
    ScannerConfig {
        tuning_time: 10,
        linger_time: 300,
        scan_rate_hz: 50,
        tuning_time_auto: false,
        squelch_delta: 2.5,
        use_dedicated_fft: false,
        level: -50.0,
        ..ScannerConfig::default()
    }
}

fn nfm_profile() -> Arc<TuningProfile> {
    Arc::new(TuningProfile {
        name: "NFM".into(),
        demod_mode: 1,
        bandwidth: 12_500.0,
        squelch_enabled: true,
        squelch_level: -50.0,
        ..TuningProfile::default()
    })
}

#[test]
fn dwell_then_linger_restores_squelch() {
    let signal_hz = 100.1e6;
    let tuner = Arc::new(SimTuner::new(1e6, signal_hz));
    tuner.start();

    let vfo = Arc::new(SimVfo::new("Radio"));
    vfo.set_squelch_enabled(true).unwrap();
    vfo.set_squelch_level(-50.0).unwrap();

    let spectrum = Arc::new(ScriptedSpectrum::new(signal_hz, 1e6, signal_hz));
    let fm = Arc::new(StaticFrequencyManager::new(vec![ScanEntry::single(
        signal_hz,
        Some(nfm_profile()),
    )]));

    let scanner = Scanner::new(
        ScannerPorts {
            tuner: Arc::clone(&tuner) as Arc<dyn TunerPort>,
            vfo: Arc::clone(&vfo) as Arc<dyn VfoPort>,
            frequency_manager: Some(fm as Arc<dyn FrequencyManagerPort>),
            host_spectrum: Some(Arc::clone(&spectrum) as Arc<dyn SpectrumSource>),
        },
        fast_config(),
    );
    scanner.start().unwrap();

    // Signal present: the scanner must settle into Dwell with the
    // squelch delta applied.
    assert!(
        wait_for(|| scanner.status().status == ScannerStatus::Dwell, Duration::from_secs(3)),
        "never entered Dwell: {:?}",
        scanner.status()
    );
    assert!(wait_for(
        || vfo.squelch_level().map(|l| (l + 52.5).abs() < 0.01).unwrap_or(false),
        Duration::from_secs(1),
    ));

    // Kill the signal: after the linger time, the scanner resumes the
    // sweep. The retune that follows re-tightens preemptively, but the
    // saved original survives, so stopping lands back at -50.
    spectrum.set_signal(false);
    assert!(
        wait_for(|| scanner.status().status != ScannerStatus::Dwell, Duration::from_secs(3)),
        "never left Dwell"
    );

    scanner.stop();
    tuner.stop();
    assert_eq!(vfo.squelch_level().unwrap(), -50.0);
}

#[test]
fn blacklisted_entries_are_never_tuned() {
    let tuner = Arc::new(SimTuner::new(1e6, 100.2e6));
    tuner.start();

    let vfo = Arc::new(RecordingVfo::new());
    let spectrum = Arc::new(ScriptedSpectrum::new(100.2e6, 1e6, 100.1e6));
    spectrum.set_signal(false); // nothing on the air, keep stepping

    let fm = Arc::new(StaticFrequencyManager::new(vec![
        ScanEntry::single(100.1e6, None),
        ScanEntry::single(100.2e6, None),
        ScanEntry::single(100.3e6, None),
    ]));

    let mut config = fast_config();
    config.blacklisted_freqs = vec![100.2e6];
    config.blacklist_tolerance = 5000.0;

    let scanner = Scanner::new(
        ScannerPorts {
            tuner: Arc::clone(&tuner) as Arc<dyn TunerPort>,
            vfo: Arc::clone(&vfo) as Arc<dyn VfoPort>,
            frequency_manager: Some(fm as Arc<dyn FrequencyManagerPort>),
            host_spectrum: Some(spectrum as Arc<dyn SpectrumSource>),
        },
        config,
    );
    scanner.start().unwrap();

    assert!(wait_for(
        || vfo.retunes().len() >= 8,
        Duration::from_secs(5),
    ));
    scanner.stop();
    tuner.stop();

    let retunes = vfo.retunes();
    assert!(
        retunes.iter().all(|&f| (f - 100.2e6).abs() > 1000.0),
        "blacklisted frequency was tuned: {retunes:?}"
    );
    assert!(retunes.iter().any(|&f| (f - 100.1e6).abs() < 1.0));
    assert!(retunes.iter().any(|&f| (f - 100.3e6).abs() < 1.0));
}

#[test]
fn removing_blacklist_entries_restores_them_to_rotation() {
    let tuner = Arc::new(SimTuner::new(1e6, 100.2e6));
    tuner.start();

    let vfo = Arc::new(RecordingVfo::new());
    let spectrum = Arc::new(ScriptedSpectrum::new(100.2e6, 1e6, 100.1e6));
    spectrum.set_signal(false); // nothing on the air, keep stepping

    let fm = Arc::new(StaticFrequencyManager::new(vec![
        ScanEntry::single(100.1e6, None),
        ScanEntry::single(100.2e6, None),
        ScanEntry::single(100.3e6, None),
    ]));

    let mut config = fast_config();
    config.blacklisted_freqs = vec![100.2e6, 100.3e6];
    config.blacklist_tolerance = 5000.0;

    let scanner = Scanner::new(
        ScannerPorts {
            tuner: Arc::clone(&tuner) as Arc<dyn TunerPort>,
            vfo: Arc::clone(&vfo) as Arc<dyn VfoPort>,
            frequency_manager: Some(fm as Arc<dyn FrequencyManagerPort>),
            host_spectrum: Some(spectrum as Arc<dyn SpectrumSource>),
        },
        config,
    );
    scanner.start().unwrap();

    // Only 100.1 is scannable at first.
    assert!(wait_for(|| vfo.retunes().len() >= 4, Duration::from_secs(5)));
    assert!(vfo
        .retunes()
        .iter()
        .all(|&f| (f - 100.1e6).abs() < 1.0));

    // Un-blacklist 100.3: it must rejoin the rotation.
    assert_eq!(scanner.remove_blacklist(100.3e6), 1);
    assert!(
        wait_for(
            || vfo.retunes().iter().any(|&f| (f - 100.3e6).abs() < 1.0),
            Duration::from_secs(5),
        ),
        "removed entry never rejoined the rotation"
    );

    // Clearing the rest brings 100.2 back too.
    scanner.clear_blacklist();
    assert!(
        wait_for(
            || vfo.retunes().iter().any(|&f| (f - 100.2e6).abs() < 1.0),
            Duration::from_secs(5),
        ),
        "cleared entry never rejoined the rotation"
    );
    assert!(scanner.config().lock().unwrap().blacklisted_freqs.is_empty());

    scanner.stop();
    tuner.stop();
}

#[test]
fn all_blacklisted_refuses_to_start() {
    let tuner = Arc::new(SimTuner::new(1e6, 100e6));
    tuner.start();
    let vfo = Arc::new(SimVfo::new("Radio"));
    let fm = Arc::new(StaticFrequencyManager::new(vec![
        ScanEntry::single(100.1e6, None),
        ScanEntry::single(100.2e6, None),
    ]));

    let mut config = fast_config();
    config.blacklisted_freqs = vec![100.1e6, 100.2e6];
    config.blacklist_tolerance = 1000.0;

    let scanner = Scanner::new(
        ScannerPorts {
            tuner: Arc::clone(&tuner) as Arc<dyn TunerPort>,
            vfo: vfo as Arc<dyn VfoPort>,
            frequency_manager: Some(fm as Arc<dyn FrequencyManagerPort>),
            host_spectrum: None,
        },
        config,
    );
    assert!(matches!(scanner.start(), Err(ScanError::AllBlacklisted)));
    tuner.stop();
}

#[test]
fn empty_scan_list_refuses_to_start() {
    let tuner = Arc::new(SimTuner::new(1e6, 100e6));
    tuner.start();
    let vfo = Arc::new(SimVfo::new("Radio"));
    let fm = Arc::new(StaticFrequencyManager::new(Vec::new()));

    let scanner = Scanner::new(
        ScannerPorts {
            tuner: Arc::clone(&tuner) as Arc<dyn TunerPort>,
            vfo: vfo as Arc<dyn VfoPort>,
            frequency_manager: Some(fm as Arc<dyn FrequencyManagerPort>),
            host_spectrum: None,
        },
        fast_config(),
    );
    assert!(matches!(scanner.start(), Err(ScanError::EmptyScanList)));
    tuner.stop();
}

#[test]
fn stopped_source_refuses_to_start() {
    let tuner = Arc::new(SimTuner::new(1e6, 100e6)); // never started
    let vfo = Arc::new(SimVfo::new("Radio"));
    let fm = Arc::new(StaticFrequencyManager::new(vec![ScanEntry::single(100.1e6, None)]));

    let scanner = Scanner::new(
        ScannerPorts {
            tuner: tuner as Arc<dyn TunerPort>,
            vfo: vfo as Arc<dyn VfoPort>,
            frequency_manager: Some(fm as Arc<dyn FrequencyManagerPort>),
            host_spectrum: None,
        },
        fast_config(),
    );
    assert!(matches!(scanner.start(), Err(ScanError::SourceNotRunning)));
}

#[test]
fn invalid_fft_size_downshifts_and_scans() {
    let signal_hz = 100.1e6;
    let tuner = Arc::new(SimTuner::new(2.4e6, signal_hz));
    tuner.set_tones(vec![SimTone { frequency: signal_hz, amplitude: 0.5 }]);
    tuner.set_noise_amplitude(1e-4);
    tuner.start();

    let vfo = Arc::new(SimVfo::new("Radio"));
    vfo.set_squelch_enabled(true).unwrap();
    vfo.set_squelch_level(-50.0).unwrap();

    let fm = Arc::new(StaticFrequencyManager::new(vec![ScanEntry::single(
        signal_hz,
        Some(nfm_profile()),
    )]));

    let mut config = fast_config();
    config.use_dedicated_fft = true;
    config.scanner_fft_size = 3_000_000; // not a power of two, over the cap

    let scanner = Scanner::new(
        ScannerPorts {
            tuner: Arc::clone(&tuner) as Arc<dyn TunerPort>,
            vfo: Arc::clone(&vfo) as Arc<dyn VfoPort>,
            frequency_manager: Some(fm as Arc<dyn FrequencyManagerPort>),
            host_spectrum: None,
        },
        config,
    );
    scanner.start().unwrap();

    let psd = scanner.psd_engine().expect("dedicated PSD must be active");
    assert_eq!(psd.fft_size(), 8192);
    assert_eq!(scanner.config().lock().unwrap().scanner_fft_size, 8192);

    // The downshifted engine still detects the tone through the full
    // CFAR path.
    assert!(
        wait_for(|| scanner.status().status == ScannerStatus::Dwell, Duration::from_secs(5)),
        "CFAR path never detected the tone: {:?}",
        scanner.status()
    );

    scanner.stop();
    tuner.stop();
}

#[test]
fn direction_flip_exits_dwell() {
    let signal_hz = 100.1e6;
    let tuner = Arc::new(SimTuner::new(1e6, signal_hz));
    tuner.start();

    let vfo = Arc::new(SimVfo::new("Radio"));
    vfo.set_squelch_enabled(true).unwrap();
    vfo.set_squelch_level(-50.0).unwrap();

    let spectrum = Arc::new(ScriptedSpectrum::new(signal_hz, 1e6, signal_hz));
    let fm = Arc::new(StaticFrequencyManager::new(vec![
        ScanEntry::single(signal_hz, None),
        ScanEntry::single(100.3e6, None),
    ]));

    let mut config = fast_config();
    config.linger_time = 10_000; // linger must not be what ends the dwell

    let scanner = Scanner::new(
        ScannerPorts {
            tuner: Arc::clone(&tuner) as Arc<dyn TunerPort>,
            vfo: Arc::clone(&vfo) as Arc<dyn VfoPort>,
            frequency_manager: Some(fm as Arc<dyn FrequencyManagerPort>),
            host_spectrum: Some(Arc::clone(&spectrum) as Arc<dyn SpectrumSource>),
        },
        config,
    );
    scanner.start().unwrap();

    assert!(wait_for(
        || scanner.status().status == ScannerStatus::Dwell,
        Duration::from_secs(3),
    ));

    // Flip the direction: the dwell ends immediately, well before the
    // 10 s linger could.
    spectrum.set_signal(false);
    scanner.set_direction(false);
    assert!(
        wait_for(|| scanner.status().status != ScannerStatus::Dwell, Duration::from_secs(2)),
        "direction flip did not exit Dwell"
    );

    scanner.stop();
    tuner.stop();
    assert_eq!(vfo.squelch_level().unwrap(), -50.0);
}

#[test]
fn bookmark_name_is_reported() {
    let signal_hz = 100.1e6;
    let tuner = Arc::new(SimTuner::new(1e6, signal_hz));
    tuner.start();

    let vfo = Arc::new(SimVfo::new("Radio"));
    let spectrum = Arc::new(ScriptedSpectrum::new(signal_hz, 1e6, signal_hz));
    let fm = Arc::new(
        StaticFrequencyManager::new(vec![ScanEntry::single(signal_hz, None)])
            .with_names(vec![(signal_hz, "Tower".into())]),
    );

    let scanner = Scanner::new(
        ScannerPorts {
            tuner: Arc::clone(&tuner) as Arc<dyn TunerPort>,
            vfo: vfo as Arc<dyn VfoPort>,
            frequency_manager: Some(fm as Arc<dyn FrequencyManagerPort>),
            host_spectrum: Some(spectrum as Arc<dyn SpectrumSource>),
        },
        fast_config(),
    );
    scanner.start().unwrap();

    assert!(wait_for(
        || scanner.status().bookmark == "Tower",
        Duration::from_secs(3),
    ));
    scanner.stop();
    tuner.stop();
}
