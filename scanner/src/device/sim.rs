// Metrea LLC Intellectual Property
// Originally developed by Raw Socket Labs LLC

//! Simulated radio backends.
//!
//! A tone-plus-noise tuner, a state-holding VFO and a fixed frequency
//! manager, enough to run the whole scan loop without hardware. The tuner
//! spawns a dedicated generator thread, throttled to its sample rate, and
//! feeds whatever handler the scanner binds.

use crate::ports::{FrequencyManagerPort, IqHandler, PortError, TunerPort, VfoPort};
use dsp::IqSample;
use shared::ScanEntry;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

/// Samples per generated block.
const BLOCK_LEN: usize = 8192;

/// A continuous emitter in the simulated spectrum.
#[derive(Debug, Clone, Copy)]
pub struct SimTone {
    pub frequency: f64,
    pub amplitude: f32,
}

struct TunerState {
    center_hz: f64,
    gain_db: f32,
    tones: Vec<SimTone>,
    noise_amplitude: f32,
    handler: Option<IqHandler>,
}

/// Simulated tuner producing baseband IQ for the configured tones.
pub struct SimTuner {
    sample_rate: f64,
    started: Arc<AtomicBool>,
    state: Arc<Mutex<TunerState>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimTuner {
    pub fn new(sample_rate: f64, center_hz: f64) -> Self {
        Self {
            sample_rate,
            started: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(TunerState {
                center_hz,
                gain_db: 20.0,
                tones: Vec::new(),
                noise_amplitude: 1e-4,
                handler: None,
            })),
            worker: Mutex::new(None),
        }
    }

    pub fn set_tones(&self, tones: Vec<SimTone>) {
        self.state.lock().unwrap().tones = tones;
    }

    pub fn set_noise_amplitude(&self, amplitude: f32) {
        self.state.lock().unwrap().noise_amplitude = amplitude;
    }

    pub fn gain_db(&self) -> f32 {
        self.state.lock().unwrap().gain_db
    }

    /// Start the generator thread. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let started = Arc::clone(&self.started);
        let state = Arc::clone(&self.state);
        let sample_rate = self.sample_rate;

        let handle = std::thread::Builder::new()
            .name("sim-tuner".into())
            .spawn(move || {
                info!(sample_rate, "simulated tuner started");
                let mut block = vec![IqSample::new(0.0, 0.0); BLOCK_LEN];
                let mut sample_index: u64 = 0;
                let mut rng: u32 = 0x1234_5678;
                let block_duration = Duration::from_secs_f64(BLOCK_LEN as f64 / sample_rate);

                while started.load(Ordering::SeqCst) {
                    let (center, tones, noise, handler) = {
                        let s = state.lock().unwrap();
                        (s.center_hz, s.tones.clone(), s.noise_amplitude, s.handler.clone())
                    };

                    for (i, out) in block.iter_mut().enumerate() {
                        let t = (sample_index + i as u64) as f64 / sample_rate;
                        let mut acc = IqSample::new(0.0, 0.0);
                        for tone in &tones {
                            let offset = tone.frequency - center;
                            if offset.abs() > sample_rate / 2.0 {
                                continue;
                            }
                            let phase = TAU * offset * t;
                            acc += IqSample::new(
                                tone.amplitude * phase.cos() as f32,
                                tone.amplitude * phase.sin() as f32,
                            );
                        }
                        rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
                        let ni = ((rng >> 16) as f32 / 32768.0 - 1.0) * noise;
                        rng = rng.wrapping_mul(1664525).wrapping_add(1013904223);
                        let nq = ((rng >> 16) as f32 / 32768.0 - 1.0) * noise;
                        *out = acc + IqSample::new(ni, nq);
                    }
                    sample_index += BLOCK_LEN as u64;

                    if let Some(handler) = handler {
                        handler(&block);
                    }
                    std::thread::sleep(block_duration);
                }
                info!("simulated tuner stopped");
            })
            .expect("failed to spawn sim tuner thread");
        *self.worker.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SimTuner {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TunerPort for SimTuner {
    fn set_center_frequency(&self, hz: f64) -> Result<(), PortError> {
        let mut s = self.state.lock().unwrap();
        s.center_hz = hz;
        debug!(hz, "sim tuner retuned");
        Ok(())
    }

    fn set_gain_db(&self, gain: f32) -> Result<(), PortError> {
        self.state.lock().unwrap().gain_db = gain;
        Ok(())
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn center_frequency(&self) -> f64 {
        self.state.lock().unwrap().center_hz
    }

    fn bind_iq(&self, handler: IqHandler) {
        self.state.lock().unwrap().handler = Some(handler);
    }

    fn unbind_iq(&self) {
        self.state.lock().unwrap().handler = None;
    }
}

struct VfoState {
    frequency: f64,
    mode: i32,
    bandwidth: f32,
    squelch_enabled: bool,
    squelch_level: f32,
}

/// State-holding VFO; commands simply record their arguments.
pub struct SimVfo {
    name: String,
    state: Mutex<VfoState>,
}

impl SimVfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(VfoState {
                frequency: 0.0,
                mode: 0,
                bandwidth: 12_500.0,
                squelch_enabled: false,
                squelch_level: -50.0,
            }),
        }
    }

    pub fn frequency(&self) -> f64 {
        self.state.lock().unwrap().frequency
    }

    pub fn mode(&self) -> i32 {
        self.state.lock().unwrap().mode
    }
}

impl VfoPort for SimVfo {
    fn name(&self) -> &str {
        &self.name
    }

    fn retune(&self, hz: f64) -> Result<(), PortError> {
        self.state.lock().unwrap().frequency = hz;
        Ok(())
    }

    fn set_mode(&self, mode: i32) -> Result<(), PortError> {
        self.state.lock().unwrap().mode = mode;
        Ok(())
    }

    fn set_bandwidth(&self, hz: f32) -> Result<(), PortError> {
        self.state.lock().unwrap().bandwidth = hz;
        Ok(())
    }

    fn set_squelch_enabled(&self, enabled: bool) -> Result<(), PortError> {
        self.state.lock().unwrap().squelch_enabled = enabled;
        Ok(())
    }

    fn set_squelch_level(&self, db: f32) -> Result<(), PortError> {
        self.state.lock().unwrap().squelch_level = db;
        Ok(())
    }

    fn squelch_enabled(&self) -> Result<bool, PortError> {
        Ok(self.state.lock().unwrap().squelch_enabled)
    }

    fn squelch_level(&self) -> Result<f32, PortError> {
        Ok(self.state.lock().unwrap().squelch_level)
    }

    fn bandwidth(&self) -> f64 {
        self.state.lock().unwrap().bandwidth as f64
    }
}

/// Frequency manager serving a fixed entry list.
pub struct StaticFrequencyManager {
    entries: Vec<ScanEntry>,
    names: Vec<(f64, String)>,
}

impl StaticFrequencyManager {
    pub fn new(entries: Vec<ScanEntry>) -> Self {
        Self { entries, names: Vec::new() }
    }

    pub fn with_names(mut self, names: Vec<(f64, String)>) -> Self {
        self.names = names;
        self
    }
}

impl FrequencyManagerPort for StaticFrequencyManager {
    fn scan_list(&self) -> Vec<ScanEntry> {
        self.entries.clone()
    }

    fn bookmark_name(&self, hz: f64) -> String {
        self.names
            .iter()
            .find(|(f, _)| (f - hz).abs() < 1000.0)
            .map(|(_, n)| n.clone())
            .unwrap_or_default()
    }
}
