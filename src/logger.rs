use std::fs::{self, File};
use std::path::PathBuf;

use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    Layer, Registry,
};

use crate::config::{LoggerConfig, LoggerFormat};

/// Builds the process-wide `tracing` subscriber: an stdout layer (format
/// selectable, default compact) plus an optional JSON file layer, each with
/// its own `EnvFilter`. Call once per process; the worker itself only emits
/// spans/events, it does not own the subscriber.
pub fn init_logger(opts: LoggerConfig) {
    let stdio_filter = tracing_subscriber::EnvFilter::new(opts.stdio_level.clone());
    let stdio_layer = match opts.format {
        LoggerFormat::Pretty => fmt::Layer::default().pretty().boxed(),
        LoggerFormat::Json => fmt::Layer::default().json().boxed(),
        LoggerFormat::Compact => fmt::Layer::default().compact().boxed(),
    }
    .with_filter(stdio_filter);

    let file_layer = opts.log_file.map(|log_file: PathBuf| {
        if log_file.exists() {
            fs::remove_file(&log_file).expect("failed to remove stale log file");
        }
        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent).expect("failed to create log directory");
        }
        let writer = File::create(&log_file).expect("failed to create log file");
        let filter = tracing_subscriber::EnvFilter::new(opts.file_level.clone());
        fmt::Layer::default()
            .json()
            .with_writer(writer)
            .with_filter(filter)
    });

    match file_layer {
        Some(file_layer) => Registry::default().with(stdio_layer).with(file_layer).init(),
        None => Registry::default().with(stdio_layer).init(),
    }
}
