// STD LIB
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// THIRD PARTY CRATES
use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

// LOCAL CRATES
use scanner::cli::{parse_tone, Cli};
use scanner::device::sim::{SimTone, SimTuner, SimVfo, StaticFrequencyManager};
use scanner::logging::init_logging;
use scanner::ports::{FrequencyManagerPort, TunerPort, VfoPort};
use scanner::{Scanner, ScannerConfig, ScannerPorts};
use shared::{ScanEntry, TuningProfile};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    init_logging(&args).map_err(|e| anyhow::anyhow!("logging init failed: {e}"))?;

    let config_path = PathBuf::from(&args.config);
    let config = match ScannerConfig::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, path = %config_path.display(), "config load failed, using defaults");
            ScannerConfig::default()
        }
    };

    // Simulated emitters: explicit --tone specs, or one on the first
    // scan-list entry so a bare run has something to find.
    let tones: Vec<SimTone> = if args.tone.is_empty() {
        args.freqs
            .first()
            .map(|&f| vec![SimTone { frequency: f, amplitude: 0.5 }])
            .unwrap_or_default()
    } else {
        args.tone
            .iter()
            .map(|s| parse_tone(s).map_err(anyhow::Error::msg))
            .collect::<anyhow::Result<_>>()?
    };

    let center = args
        .center
        .or_else(|| args.freqs.first().copied())
        .unwrap_or(config.start_freq);

    let tuner = Arc::new(SimTuner::new(args.rate, center));
    tuner.set_tones(tones);
    tuner.set_noise_amplitude(args.noise);
    tuner.start();

    let vfo = Arc::new(SimVfo::new("Radio"));
    vfo.set_squelch_enabled(true).ok();

    let frequency_manager: Option<Arc<dyn FrequencyManagerPort>> = if args.legacy {
        None
    } else {
        // All entries share one profile, which also exercises the
        // profile-application cache.
        let profile = Arc::new(TuningProfile {
            name: "NFM".into(),
            demod_mode: 1,
            bandwidth: 12_500.0,
            squelch_enabled: true,
            squelch_level: -50.0,
            ..TuningProfile::default()
        });
        let entries: Vec<ScanEntry> = args
            .freqs
            .iter()
            .map(|&f| ScanEntry::single(f, Some(Arc::clone(&profile))))
            .collect();
        let names = args
            .freqs
            .iter()
            .enumerate()
            .map(|(i, &f)| (f, format!("Channel {}", i + 1)))
            .collect();
        Some(Arc::new(StaticFrequencyManager::new(entries).with_names(names)))
    };

    let scanner = Scanner::new(
        ScannerPorts {
            tuner: Arc::clone(&tuner) as Arc<dyn TunerPort>,
            vfo: Arc::clone(&vfo) as Arc<dyn VfoPort>,
            frequency_manager,
            host_spectrum: None,
        },
        config,
    );
    scanner.start().context("scanner failed to start")?;

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !scanner.is_running() {
                    warn!("scanner stopped on its own");
                    break;
                }
                let s = scanner.status();
                info!(
                    status = ?s.status,
                    frequency_mhz = s.frequency / 1e6,
                    signal_db = s.signal_db,
                    noise_db = s.noise_floor_db,
                    bookmark = %s.bookmark,
                    "status"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    scanner.stop();
    tuner.stop();

    let cfg = scanner.config().lock().unwrap().clone();
    if let Err(e) = cfg.save(&config_path) {
        warn!(error = %e, "config save failed");
    }
    Ok(())
}
