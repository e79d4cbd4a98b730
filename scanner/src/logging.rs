// Metrea LLC Intellectual Property
// Originally developed by Raw Socket Labs LLC

use crate::cli::Cli;
use std::path::Path;
use tracing_appender::rolling::daily;
use tracing_subscriber::{
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Initialize the tracing subscriber with multiple output layers
pub fn init_logging(args: &Cli) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Create log directory if it doesn't exist
    if args.log_to_file {
        let log_dir = Path::new(&args.log_dir);
        std::fs::create_dir_all(log_dir)?;
    }

    // Create environment filter based on CLI argument
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("scanner={0},dsp={0}", args.log_level)));

    // Console layer - human-readable output to stderr
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry();

    if args.log_to_file {
        // Rolling file appenders for plain and structured output
        let file_appender = daily(&args.log_dir, "scanner.log");
        let json_appender = daily(&args.log_dir, "scanner.json");

        let file_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("scanner={0},dsp={0}", args.log_level)));
        let file_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_writer(file_appender)
            .with_filter(file_filter);

        let json_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("scanner={0},dsp={0}", args.log_level)));
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_names(true)
            .with_writer(json_appender)
            .with_filter(json_filter);

        registry
            .with(console_layer)
            .with(file_layer)
            .with(json_layer)
            .init();
    } else {
        registry.with(console_layer).init();
    }

    tracing::info!("Logging initialized with level: {}", args.log_level);
    if args.log_to_file {
        tracing::info!("Log files will be written to: {}", args.log_dir);
    }

    Ok(())
}
