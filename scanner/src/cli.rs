use clap::Parser;

use crate::device::sim::SimTone;

#[derive(Parser, Debug)]
#[clap(name = "scanner", about = "Sweep frequency targets for active signals")]
pub struct Cli {
    /// Path to the JSON configuration file
    #[clap(long, default_value = "scanner_config.json")]
    pub config: String,

    /// Scan-list frequencies in Hz served by the simulated frequency
    /// manager
    #[clap(long, value_parser, num_args = 1.., value_delimiter = ',', default_value = "100100000,100200000,100300000")]
    pub freqs: Vec<f64>,

    /// Step the configured frequency ranges instead of using the
    /// frequency manager list
    #[clap(long, action)]
    pub legacy: bool,

    /// Sample rate of the simulated tuner
    #[clap(long, default_value = "2400000")]
    pub rate: f64,

    /// Initial center frequency of the simulated tuner; defaults to the
    /// first scan-list entry
    #[clap(long)]
    pub center: Option<f64>,

    /// Simulated emitters as freq_hz[:amplitude] pairs
    #[clap(long, value_parser, num_args = 0.., value_delimiter = ',')]
    pub tone: Vec<String>,

    /// Simulated noise amplitude
    #[clap(long, default_value = "0.0001")]
    pub noise: f32,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, default_value = "info")]
    pub log_level: String,

    /// Directory for log files
    #[clap(long, default_value = "./logs")]
    pub log_dir: String,

    /// Enable file logging (console logging always enabled)
    #[clap(long, action)]
    pub log_to_file: bool,
}

/// Parse a `freq[:amplitude]` tone spec; amplitude defaults to 0.5.
pub fn parse_tone(spec: &str) -> Result<SimTone, String> {
    let mut parts = spec.splitn(2, ':');
    let frequency: f64 = parts
        .next()
        .unwrap_or_default()
        .parse()
        .map_err(|_| format!("bad tone frequency in {spec:?}"))?;
    let amplitude: f32 = match parts.next() {
        Some(a) => a.parse().map_err(|_| format!("bad tone amplitude in {spec:?}"))?,
        None => 0.5,
    };
    Ok(SimTone { frequency, amplitude })
}
