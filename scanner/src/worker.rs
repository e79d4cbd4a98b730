// Metrea LLC Intellectual Property
// Originally developed by Raw Socket Labs LLC

//! The scanner: a value with explicit ports and a dedicated worker thread
//! driving the select → retune → settle → detect → dwell cycle.
//!
//! The worker runs on a steady-clock schedule at the configured scan rate.
//! Parameter changes made through the shared config become visible at the
//! next tick; user commands (direction flip, resume, reset, blacklist)
//! force an immediate exit from Dwell with the squelch restored.

use crate::config::ScannerConfig;
use crate::context::{
    Blacklist, Direction, ProfileApplicator, ScanTarget, ScanTargets, SquelchController,
};
use crate::fallback::max_in_window;
use crate::ports::{FrequencyManagerPort, SpectrumSource, TunerPort, VfoPort};
use crate::ScanError;
use dsp::cfar::{CfarDetector, CfarParams};
use dsp::psd::{PsdEngine, PsdParams};
use dsp::window::WindowKind;
use shared::{ScannerStatus, StatusReport, TuningProfile};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Reference scan rate the timing constants are calibrated against.
pub const BASE_SCAN_RATE: u32 = 50;
pub const BASE_TUNING_TIME_MS: u64 = 250;
pub const BASE_LINGER_TIME_MS: u64 = 1000;
pub const MIN_TUNING_TIME_MS: u64 = 10;
pub const MIN_LINGER_TIME_MS: u64 = 50;
pub const MAX_SCAN_RATE: u32 = 200;
pub const NORMAL_MAX_SCAN_RATE: u32 = 50;
pub const MIN_SCAN_RATE: u32 = 5;

/// Detection window for single-frequency entries.
const SINGLE_FREQ_WINDOW_HZ: f64 = 5000.0;
/// Bound on candidate stepping within one sweep.
const SWEEP_MAX_ITERATIONS: usize = 1000;
/// FFT size to retry with when the configured one fails to initialize.
const PSD_FALLBACK_FFT_SIZE: usize = 8192;

/// Tuning time scaled inversely with the scan rate.
pub fn auto_tuning_time_ms(scan_rate_hz: u32) -> u64 {
    let rate = scan_rate_hz.max(1) as u64;
    MIN_TUNING_TIME_MS.max(BASE_TUNING_TIME_MS * BASE_SCAN_RATE as u64 / rate)
}

/// Linger time scaled inversely with the scan rate.
pub fn auto_linger_time_ms(scan_rate_hz: u32) -> u64 {
    let rate = scan_rate_hz.max(1) as u64;
    MIN_LINGER_TIME_MS.max(BASE_LINGER_TIME_MS * BASE_SCAN_RATE as u64 / rate)
}

/// Round an FFT size request to the nearest power of two within the
/// supported range.
pub fn round_fft_size(size: usize) -> usize {
    let clamped = size.clamp(dsp::MIN_FFT_SIZE, dsp::MAX_FFT_SIZE);
    if clamped.is_power_of_two() {
        return clamped;
    }
    let up = clamped.next_power_of_two();
    let down = up / 2;
    if clamped - down <= up - clamped {
        down
    } else {
        up
    }
}

#[derive(Default)]
struct Commands {
    /// Leave Dwell and resume the sweep now.
    resume: bool,
    /// New direction requested by the operator.
    flip_to: Option<Direction>,
    reset: bool,
    blacklist_current: bool,
}

/// External collaborators handed to the scanner at construction.
pub struct ScannerPorts {
    pub tuner: Arc<dyn TunerPort>,
    pub vfo: Arc<dyn VfoPort>,
    pub frequency_manager: Option<Arc<dyn FrequencyManagerPort>>,
    pub host_spectrum: Option<Arc<dyn SpectrumSource>>,
}

pub struct Scanner {
    ports: ScannerPorts,
    cfg: Arc<Mutex<ScannerConfig>>,
    running: Arc<AtomicBool>,
    commands: Arc<Mutex<Commands>>,
    report: Arc<Mutex<StatusReport>>,
    psd: Arc<Mutex<Option<Arc<PsdEngine>>>>,
    /// Set whenever the blacklist changes; the worker drops its memoized
    /// bookmark names on the next tick.
    bookmarks_stale: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Scanner {
    pub fn new(ports: ScannerPorts, config: ScannerConfig) -> Self {
        Self {
            ports,
            cfg: Arc::new(Mutex::new(config)),
            running: Arc::new(AtomicBool::new(false)),
            commands: Arc::new(Mutex::new(Commands::default())),
            report: Arc::new(Mutex::new(StatusReport::default())),
            psd: Arc::new(Mutex::new(None)),
            bookmarks_stale: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Shared configuration handle; changes take effect on the next tick.
    pub fn config(&self) -> Arc<Mutex<ScannerConfig>> {
        Arc::clone(&self.cfg)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> StatusReport {
        self.report.lock().unwrap().clone()
    }

    /// Dedicated PSD engine, when the dedicated path is active.
    pub fn psd_engine(&self) -> Option<Arc<PsdEngine>> {
        self.psd.lock().unwrap().clone()
    }

    /// Start scanning. Validates the scan list, brings up the dedicated
    /// PSD engine (with one downshift retry) and spawns the worker thread.
    pub fn start(&self) -> Result<(), ScanError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(ScanError::AlreadyRunning);
        }
        if !self.ports.tuner.is_started() {
            return Err(ScanError::SourceNotRunning);
        }

        let cfgs = self.cfg.lock().unwrap().clone();

        let mut targets = match &self.ports.frequency_manager {
            Some(fm) => ScanTargets::manager(fm.as_ref())?,
            None => ScanTargets::legacy(
                &cfgs.frequency_ranges,
                cfgs.start_freq,
                cfgs.stop_freq,
                cfgs.interval,
            )?,
        };
        let blacklist = Blacklist::new(cfgs.blacklisted_freqs.clone(), cfgs.blacklist_tolerance);
        let first = targets.initial(&blacklist)?;

        let psd_engine = if cfgs.use_dedicated_fft {
            self.init_psd(&cfgs)
        } else {
            None
        };
        if psd_engine.is_none() && self.ports.host_spectrum.is_none() {
            return Err(ScanError::NoSpectrum);
        }

        if let Some(psd) = &psd_engine {
            let feed = Arc::clone(psd);
            self.ports.tuner.bind_iq(Arc::new(move |samples| {
                feed.feed(samples);
            }));
        }
        *self.psd.lock().unwrap() = psd_engine.clone();

        info!(
            frequency = first.frequency,
            mode = if targets.is_manager() { "frequency-manager" } else { "legacy" },
            dedicated_fft = psd_engine.is_some(),
            "starting scanner"
        );

        self.running.store(true, Ordering::SeqCst);
        let mut worker = Worker {
            tuner: Arc::clone(&self.ports.tuner),
            vfo: Arc::clone(&self.ports.vfo),
            frequency_manager: self.ports.frequency_manager.clone(),
            host_spectrum: self.ports.host_spectrum.clone(),
            psd: psd_engine,
            cfg: Arc::clone(&self.cfg),
            running: Arc::clone(&self.running),
            commands: Arc::clone(&self.commands),
            report: Arc::clone(&self.report),
            bookmarks_stale: Arc::clone(&self.bookmarks_stale),
            targets,
            squelch: SquelchController::new(cfgs.squelch_delta, cfgs.squelch_delta_auto),
            profiles: ProfileApplicator::new(),
            current: first.frequency,
            current_profile: first.profile.clone(),
            current_single: first.single,
            initial_gain: first.gain_change,
            receiving: false,
            tuning: false,
            reverse_lock: false,
            last_signal: Instant::now(),
            last_tune: Instant::now(),
            last_level_db: f32::NEG_INFINITY,
            last_noise_db: -100.0,
            last_auto_rate: 0,
            snapshot: Vec::new(),
            bookmarks: HashMap::new(),
        };

        let handle = std::thread::Builder::new()
            .name("scan-worker".into())
            .spawn(move || worker.run())
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                ScanError::WorkerSpawn(e.to_string())
            })?;
        *self.worker.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop scanning and join the worker. The worker restores the squelch
    /// on its way out.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            // The worker may have stopped itself; still reap the handle.
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.ports.tuner.unbind_iq();
        *self.psd.lock().unwrap() = None;
        info!("scanner stopped");
    }

    /// Jump back to the start of the scan list.
    pub fn reset(&self) {
        self.commands.lock().unwrap().reset = true;
    }

    /// Leave Dwell and move on immediately.
    pub fn advance(&self) {
        self.commands.lock().unwrap().resume = true;
    }

    /// Set the sweep direction; also forces Dwell exit and locks the
    /// direction for the next sweep pass.
    pub fn set_direction(&self, up: bool) {
        {
            let mut cfg = self.cfg.lock().unwrap();
            cfg.scan_up = up;
        }
        let mut cmds = self.commands.lock().unwrap();
        cmds.flip_to = Some(Direction::from_scan_up(up));
        cmds.resume = true;
    }

    /// Blacklist the frequency currently tuned and resume the sweep.
    pub fn blacklist_current(&self) {
        self.commands.lock().unwrap().blacklist_current = true;
    }

    /// Drop every blacklist entry matching `freq` within the configured
    /// tolerance. Returns the number of entries removed. Effective
    /// whether or not the scanner is running.
    pub fn remove_blacklist(&self, freq: f64) -> usize {
        let removed = {
            let mut guard = self.cfg.lock().unwrap();
            let cfg = &mut *guard;
            let mut blacklist = Blacklist::new(
                std::mem::take(&mut cfg.blacklisted_freqs),
                cfg.blacklist_tolerance,
            );
            let removed = blacklist.remove(freq);
            cfg.blacklisted_freqs = blacklist.freqs().to_vec();
            removed
        };
        if removed > 0 {
            self.bookmarks_stale.store(true, Ordering::Relaxed);
            info!(freq, removed, "removed blacklist entries");
        }
        removed
    }

    /// Empty the blacklist.
    pub fn clear_blacklist(&self) {
        let cleared = {
            let mut guard = self.cfg.lock().unwrap();
            let cfg = &mut *guard;
            let mut blacklist = Blacklist::new(
                std::mem::take(&mut cfg.blacklisted_freqs),
                cfg.blacklist_tolerance,
            );
            let cleared = blacklist.len();
            blacklist.clear();
            cfg.blacklisted_freqs = blacklist.freqs().to_vec();
            cleared
        };
        if cleared > 0 {
            self.bookmarks_stale.store(true, Ordering::Relaxed);
            info!(cleared, "blacklist cleared");
        }
    }

    /// One-shot: scale the linger time to the current scan rate.
    pub fn scale_linger_to_rate(&self) {
        let mut cfg = self.cfg.lock().unwrap();
        cfg.linger_time = auto_linger_time_ms(cfg.scan_rate_hz);
        info!(linger_time_ms = cfg.linger_time, scan_rate_hz = cfg.scan_rate_hz, "scaled linger time");
    }

    /// Set the dedicated FFT size, rounded to the nearest power of two
    /// and clamped to the supported range. Applies live when the engine
    /// is up.
    pub fn set_scanner_fft_size(&self, size: usize) {
        let rounded = round_fft_size(size);
        self.cfg.lock().unwrap().scanner_fft_size = rounded;
        if let Some(psd) = self.psd_engine() {
            psd.set_fft_size(rounded);
        }
    }

    fn init_psd(&self, cfgs: &ScannerConfig) -> Option<Arc<PsdEngine>> {
        let sample_rate = self.ports.tuner.sample_rate();
        let params = PsdParams {
            fft_size: cfgs.scanner_fft_size,
            sample_rate,
            window: WindowKind::from_index(cfgs.scanner_window_type),
            overlap: cfgs.scanner_overlap,
            avg_time_ms: cfgs.scanner_avg_time_ms,
        };
        match PsdEngine::new(params.clone()) {
            Ok(engine) => Some(Arc::new(engine)),
            Err(e) => {
                error!(
                    error = %e,
                    fft_size = cfgs.scanner_fft_size,
                    retry_size = PSD_FALLBACK_FFT_SIZE,
                    "PSD engine init failed, downshifting"
                );
                let retry = PsdParams { fft_size: PSD_FALLBACK_FFT_SIZE, ..params };
                match PsdEngine::new(retry) {
                    Ok(engine) => {
                        self.cfg.lock().unwrap().scanner_fft_size = PSD_FALLBACK_FFT_SIZE;
                        Some(Arc::new(engine))
                    }
                    Err(e) => {
                        warn!(error = %e, "dedicated PSD disabled, using host spectrum path");
                        None
                    }
                }
            }
        }
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

struct Worker {
    tuner: Arc<dyn TunerPort>,
    vfo: Arc<dyn VfoPort>,
    frequency_manager: Option<Arc<dyn FrequencyManagerPort>>,
    host_spectrum: Option<Arc<dyn SpectrumSource>>,
    psd: Option<Arc<PsdEngine>>,
    cfg: Arc<Mutex<ScannerConfig>>,
    running: Arc<AtomicBool>,
    commands: Arc<Mutex<Commands>>,
    report: Arc<Mutex<StatusReport>>,
    bookmarks_stale: Arc<AtomicBool>,

    targets: ScanTargets,
    squelch: SquelchController,
    profiles: ProfileApplicator,

    current: f64,
    current_profile: Option<Arc<TuningProfile>>,
    current_single: bool,
    initial_gain: Option<f32>,
    receiving: bool,
    tuning: bool,
    reverse_lock: bool,
    last_signal: Instant,
    last_tune: Instant,
    last_level_db: f32,
    last_noise_db: f32,
    last_auto_rate: u32,
    snapshot: Vec<f32>,
    bookmarks: HashMap<i64, String>,
}

struct Detection {
    level_db: f32,
    noise_db: f32,
    detected: bool,
}

impl Worker {
    fn run(&mut self) {
        info!("scan worker started");

        // Move to the initial target before the first tick.
        if let Some(gain) = self.initial_gain.take() {
            if let Err(e) = self.tuner.set_gain_db(gain) {
                debug!(error = %e, "initial gain apply failed");
            }
        }
        self.retune_to_current();
        self.apply_current_profile("STARTUP");
        self.tuning = true;
        self.last_tune = Instant::now();

        let mut next_wake = Instant::now();
        while self.running.load(Ordering::SeqCst) {
            let cfgs = self.cfg.lock().unwrap().clone();

            let max_rate = if cfgs.unlock_high_speed { MAX_SCAN_RATE } else { NORMAL_MAX_SCAN_RATE };
            let safe_rate = cfgs.scan_rate_hz.clamp(MIN_SCAN_RATE, max_rate);
            let interval = Duration::from_millis((1000 / safe_rate.max(1)).max(1) as u64);

            // Scale the settle time with the scan rate when auto mode is
            // on; only write back when the change is meaningful.
            if cfgs.tuning_time_auto && safe_rate != self.last_auto_rate {
                let optimal = auto_tuning_time_ms(safe_rate);
                if cfgs.tuning_time.abs_diff(optimal) > 10 {
                    self.cfg.lock().unwrap().tuning_time = optimal;
                    info!(tuning_time_ms = optimal, scan_rate_hz = safe_rate, "auto-scaled tuning time");
                }
                self.last_auto_rate = safe_rate;
            }

            // Steady-clock schedule; reset instead of bursting to catch up
            // after a stall.
            let now = Instant::now();
            if next_wake + interval * 2 < now {
                next_wake = now;
            }
            next_wake += interval;
            let now = Instant::now();
            if next_wake > now {
                std::thread::sleep(next_wake - now);
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            if !self.tuner.is_started() {
                warn!("radio source stopped, stopping scanner");
                break;
            }

            if !self.handle_commands() {
                break;
            }

            if self.bookmarks_stale.swap(false, Ordering::Relaxed) {
                self.bookmarks.clear();
            }

            // Periodic scan-list refresh invalidates cached profile
            // references.
            match self.targets.maybe_refresh(self.frequency_manager.as_deref(), self.current) {
                Ok(true) => self.profiles.invalidate(),
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, "scan list became empty, stopping");
                    break;
                }
            }

            self.squelch.set_delta_db(cfgs.squelch_delta);
            self.squelch.set_auto(cfgs.squelch_delta_auto);

            // Settle after a retune before trusting the spectrum.
            if self.tuning {
                if self.last_tune.elapsed() >= Duration::from_millis(cfgs.tuning_time) {
                    self.tuning = false;
                    debug!(frequency = self.current, "tuning settled");
                } else {
                    self.publish_report();
                    continue;
                }
            }

            if self.receiving {
                self.dwell_tick(&cfgs);
            } else {
                self.sweep_tick(&cfgs);
            }
            self.publish_report();
        }

        // Every exit path restores the squelch.
        self.squelch.restore(self.vfo.as_ref());
        self.receiving = false;
        self.tuning = false;
        self.running.store(false, Ordering::SeqCst);
        {
            let mut report = self.report.lock().unwrap();
            report.status = ScannerStatus::Idle;
        }
        info!("scan worker ended");
    }

    /// Apply pending operator commands. Returns false when the worker
    /// should stop.
    fn handle_commands(&mut self) -> bool {
        let cmds = std::mem::take(&mut *self.commands.lock().unwrap());

        if let Some(dir) = cmds.flip_to {
            self.reverse_lock = true;
            debug!(up = dir.is_up(), "direction changed");
        }

        if cmds.blacklist_current {
            let added = {
                let mut guard = self.cfg.lock().unwrap();
                let cfg = &mut *guard;
                let mut blacklist = Blacklist::new(
                    std::mem::take(&mut cfg.blacklisted_freqs),
                    cfg.blacklist_tolerance,
                );
                let added = blacklist.add(self.current);
                cfg.blacklisted_freqs = blacklist.freqs().to_vec();
                added
            };
            if added {
                self.bookmarks.clear();
            }
        }

        if cmds.reset {
            let (blacklist, start_freq) = {
                let cfg = self.cfg.lock().unwrap();
                (
                    Blacklist::new(cfg.blacklisted_freqs.clone(), cfg.blacklist_tolerance),
                    cfg.start_freq,
                )
            };
            match self.targets.initial(&blacklist) {
                Ok(target) => {
                    self.leave_dwell();
                    self.select_target(target);
                    warn!(frequency = self.current, "scanner reset");
                }
                Err(e) => {
                    error!(error = %e, start_freq, "reset failed");
                    return false;
                }
            }
            return true;
        }

        if cmds.resume || cmds.blacklist_current || cmds.flip_to.is_some() {
            self.leave_dwell();
        }
        true
    }

    fn dwell_tick(&mut self, cfgs: &ScannerConfig) {
        if let Some(det) = self.detect_at(cfgs, self.current) {
            self.last_level_db = det.level_db;
            self.last_noise_db = det.noise_db;
            if det.detected {
                self.last_signal = Instant::now();
                self.squelch.apply_delta(self.vfo.as_ref());
            }
        }

        if self.last_signal.elapsed() >= Duration::from_millis(cfgs.linger_time) {
            debug!(frequency = self.current, "signal lost, resuming sweep");
            self.leave_dwell();
        }
    }

    fn sweep_tick(&mut self, cfgs: &ScannerConfig) {
        let direction = Direction::from_scan_up(cfgs.scan_up);
        let blacklist = Blacklist::new(cfgs.blacklisted_freqs.clone(), cfgs.blacklist_tolerance);

        // A just-blacklisted current frequency must not re-lock; step
        // straight to the next target.
        if blacklist.contains(self.current) {
            match self.targets.advance(direction, &blacklist) {
                Ok(target) => self.select_target(target),
                Err(e) => {
                    warn!(error = %e, "no scannable frequencies left, stopping");
                    self.running.store(false, Ordering::SeqCst);
                }
            }
            return;
        }

        if self.current_single {
            // Point frequency: test only the exact target.
            if let Some(det) = self.detect_at(cfgs, self.current) {
                self.last_level_db = det.level_db;
                self.last_noise_db = det.noise_db;
                self.squelch
                    .observe_noise(det.noise_db, false, self.vfo.as_ref());
                if det.detected {
                    info!(
                        frequency = self.current,
                        level_db = det.level_db,
                        noise_db = det.noise_db,
                        "signal found at single frequency"
                    );
                    self.enter_dwell("SIGNAL");
                    return;
                }
            }
        } else {
            // Band entry: search the covered spectrum from the current
            // frequency outward, then the other way unless locked.
            if self.sweep_band(cfgs, direction) {
                return;
            }
            if !self.reverse_lock {
                if self.sweep_band(cfgs, direction.flipped()) {
                    return;
                }
            } else {
                self.reverse_lock = false;
            }
        }

        // Nothing heard: step the iterator and retune.
        match self.targets.advance(direction, &blacklist) {
            Ok(target) => self.select_target(target),
            Err(e) => {
                warn!(error = %e, "no scannable frequencies left, stopping");
                self.running.store(false, Ordering::SeqCst);
            }
        }
    }

    /// Candidate sweep across the spectrum currently covered by the
    /// tuner (or host view), stepping by the interval in `direction`.
    /// The snapshot is copied once and all candidates measured against
    /// it. On detection, tunes and enters Dwell.
    fn sweep_band(&mut self, cfgs: &ScannerConfig, direction: Direction) -> bool {
        let blacklist = Blacklist::new(cfgs.blacklisted_freqs.clone(), cfgs.blacklist_tolerance);

        // Acquire one spectrum and its frequency extent.
        enum Path {
            Cfar { bin_width_hz: f64, center_hz: f64 },
            Host { view: crate::ports::SpectrumView },
        }
        let (path, view_lo, view_hi) = if let Some(psd) = &self.psd {
            if psd.copy_latest(&mut self.snapshot) == 0 {
                return false;
            }
            let center = self.tuner.center_frequency();
            let span = psd.sample_rate();
            (
                Path::Cfar { bin_width_hz: psd.bin_width_hz(), center_hz: center },
                center - span / 2.0,
                center + span / 2.0,
            )
        } else if let Some(host) = &self.host_spectrum {
            match host.copy_latest(&mut self.snapshot) {
                Some(view) => (Path::Host { view }, view.start_hz(), view.end_hz()),
                None => return false,
            }
        } else {
            return false;
        };

        // Clip to the active legacy range, when in legacy mode.
        let (lo, hi) = match self.targets.active_bounds() {
            Some((a, b)) => (a.max(view_lo), b.min(view_hi)),
            None => (view_lo, view_hi),
        };

        let detector = CfarDetector::new(CfarParams {
            guard_hz: cfgs.scanner_guard_hz,
            ref_hz: cfgs.scanner_ref_hz,
            threshold_db: cfgs.scanner_threshold_db,
        });
        let host_width = self.vfo.bandwidth() * cfgs.passband_ratio / 100.0;

        let step = cfgs.interval;
        let mut freq = self.current;
        for _ in 0..SWEEP_MAX_ITERATIONS {
            freq += if direction.is_up() { step } else { -step };
            if freq < lo || freq > hi {
                return false;
            }
            if blacklist.contains(freq) {
                continue;
            }

            let det = match &path {
                Path::Cfar { bin_width_hz, center_hz } => {
                    let m = detector.measure(
                        &self.snapshot,
                        *bin_width_hz,
                        *center_hz,
                        freq,
                        cfgs.scanner_min_width_hz,
                    );
                    Detection {
                        level_db: m.peak_db,
                        noise_db: m.noise_floor_db,
                        detected: m.detected,
                    }
                }
                Path::Host { view } => {
                    let level = max_in_window(&self.snapshot, view, freq, host_width);
                    Detection {
                        level_db: level,
                        noise_db: level - 15.0,
                        detected: level >= cfgs.level,
                    }
                }
            };

            self.squelch.observe_noise(det.noise_db, false, self.vfo.as_ref());
            if det.detected {
                self.current = freq;
                self.last_level_db = det.level_db;
                self.last_noise_db = det.noise_db;
                info!(
                    frequency = freq,
                    level_db = det.level_db,
                    noise_db = det.noise_db,
                    "sweep found signal"
                );
                self.retune_to_current();
                self.tuning = true;
                self.last_tune = Instant::now();
                self.enter_dwell("SWEEP");
                return true;
            }
        }
        false
    }

    /// One detection measurement at `freq`, through the dedicated PSD
    /// (CFAR) or the host spectrum (max-in-window) path.
    fn detect_at(&mut self, cfgs: &ScannerConfig, freq: f64) -> Option<Detection> {
        if let Some(psd) = &self.psd {
            let width = psd.copy_latest(&mut self.snapshot);
            if width == 0 {
                return None;
            }
            let roi = if self.current_single {
                SINGLE_FREQ_WINDOW_HZ
            } else {
                cfgs.scanner_min_width_hz
            };
            let detector = CfarDetector::new(CfarParams {
                guard_hz: cfgs.scanner_guard_hz,
                ref_hz: cfgs.scanner_ref_hz,
                threshold_db: cfgs.scanner_threshold_db,
            });
            let m = detector.measure(
                &self.snapshot,
                psd.bin_width_hz(),
                self.tuner.center_frequency(),
                freq,
                roi,
            );
            Some(Detection {
                level_db: m.peak_db,
                noise_db: m.noise_floor_db,
                detected: m.detected,
            })
        } else {
            let host = self.host_spectrum.as_ref()?;
            let view = host.copy_latest(&mut self.snapshot)?;
            let width = if self.current_single {
                SINGLE_FREQ_WINDOW_HZ
            } else {
                self.vfo.bandwidth() * cfgs.passband_ratio / 100.0
            };
            let level = max_in_window(&self.snapshot, &view, freq, width);
            Some(Detection {
                level_db: level,
                // The host path has no reference estimate; assume the
                // floor sits 15 dB under the measured level.
                noise_db: level - 15.0,
                detected: level >= cfgs.level,
            })
        }
    }

    fn enter_dwell(&mut self, context: &str) {
        self.receiving = true;
        self.last_signal = Instant::now();
        self.apply_current_profile(context);
        self.squelch.apply_delta(self.vfo.as_ref());
    }

    fn leave_dwell(&mut self) {
        if self.receiving {
            self.squelch.restore(self.vfo.as_ref());
            self.receiving = false;
        }
    }

    /// Move to a freshly selected target: gain, squelch delta, retune,
    /// profile, settle.
    fn select_target(&mut self, target: ScanTarget) {
        self.current = target.frequency;
        self.current_profile = target.profile;
        self.current_single = target.single;

        if let Some(gain) = target.gain_change {
            if let Err(e) = self.tuner.set_gain_db(gain) {
                debug!(error = %e, "range gain apply failed");
            }
        }

        // Tighten the squelch before the retune lands to mask the noise
        // burst while the hardware settles.
        self.squelch.apply_delta(self.vfo.as_ref());
        self.retune_to_current();
        self.apply_current_profile("PREEMPTIVE");
        self.tuning = true;
        self.last_tune = Instant::now();
        debug!(
            frequency = self.current,
            single = self.current_single,
            "stepped to next target"
        );
    }

    fn apply_current_profile(&mut self, context: &str) {
        if let Some(profile) = self.current_profile.clone() {
            self.profiles.apply(
                &profile,
                self.vfo.as_ref(),
                self.tuner.as_ref(),
                self.current,
                context,
            );
        }
    }

    /// Retune the VFO, recentering the tuner when the target would fall
    /// outside the covered spectrum.
    fn retune_to_current(&mut self) {
        if let Err(e) = self.vfo.retune(self.current) {
            debug!(error = %e, "VFO retune failed");
        }
        let span = self.tuner.sample_rate();
        if (self.current - self.tuner.center_frequency()).abs() > span * 0.45 {
            if let Err(e) = self.tuner.set_center_frequency(self.current) {
                debug!(error = %e, "tuner recenter failed");
            }
        }
    }

    fn publish_report(&mut self) {
        let status = if self.tuning {
            ScannerStatus::Tuning
        } else if self.receiving {
            ScannerStatus::Dwell
        } else {
            ScannerStatus::Sweeping
        };
        let bookmark = self.bookmark_for(self.current);
        let mut report = self.report.lock().unwrap();
        report.status = status;
        report.frequency = self.current;
        report.signal_db = self.last_level_db;
        report.noise_floor_db = self.last_noise_db;
        report.bookmark = bookmark;
    }

    /// Memoized bookmark-name lookup through the frequency manager.
    fn bookmark_for(&mut self, freq: f64) -> String {
        let Some(fm) = &self.frequency_manager else {
            return String::new();
        };
        let key = freq.round() as i64;
        if let Some(name) = self.bookmarks.get(&key) {
            return name.clone();
        }
        let name = fm.bookmark_name(freq);
        self.bookmarks.insert(key, name.clone());
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_timing_matches_reference_points() {
        // 100 Hz scan rate: 250 * 50 / 100 = 125 ms.
        assert_eq!(auto_tuning_time_ms(100), 125);
        // 25 Hz scan rate: 250 * 50 / 25 = 500 ms.
        assert_eq!(auto_tuning_time_ms(25), 500);
        // At the reference rate the base value holds.
        assert_eq!(auto_tuning_time_ms(BASE_SCAN_RATE), BASE_TUNING_TIME_MS);
        // Clamped at the floor for extreme rates.
        assert_eq!(auto_tuning_time_ms(2000), MIN_TUNING_TIME_MS);

        assert_eq!(auto_linger_time_ms(100), 500);
        assert_eq!(auto_linger_time_ms(25), 2000);
        assert_eq!(auto_linger_time_ms(BASE_SCAN_RATE), BASE_LINGER_TIME_MS);
    }

    #[test]
    fn rate_limits_depend_on_unlock() {
        assert!(NORMAL_MAX_SCAN_RATE < MAX_SCAN_RATE);
        assert!(MIN_SCAN_RATE >= 1);
    }

    #[test]
    fn fft_size_requests_round_to_supported_powers() {
        assert_eq!(round_fft_size(524_288), 524_288);
        assert_eq!(round_fft_size(500_000), 524_288);
        assert_eq!(round_fft_size(100_000), 131_072);
        assert_eq!(round_fft_size(96_000), 65_536);
        // Clamped at both ends of the supported range.
        assert_eq!(round_fft_size(16), 1024);
        assert_eq!(round_fft_size(1 << 24), 1 << 20);
    }
}
