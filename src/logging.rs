use crate::error::ConfigError;
use crate::network::transfer::TRANSFER_LOG_TARGET;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::{Path, PathBuf};

pub const TRANSFER_LOG_FILE: &str = "transfer_log.txt";

pub fn transfer_log_path(data_dir: &Path) -> PathBuf {
    data_dir.join(TRANSFER_LOG_FILE)
}

/// Console logging at `level`, plus the per-segment transfer trace written
/// to `<data_dir>/transfer_log.txt` and kept off the console.
pub fn init_logging(level: LevelFilter, data_dir: &Path) -> Result<log4rs::Handle, ConfigError> {
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S%.3f)} {h({l:<5})} {m}{n}",
        )))
        .build();

    let path = transfer_log_path(data_dir);
    let transfers = FileAppender::builder()
        .append(false)
        .encoder(Box::new(PatternEncoder::new("{m}{n}")))
        .build(&path)
        .map_err(|e| ConfigError::Logging(format!("{}: {}", path.display(), e)))?;

    let config = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)))
        .appender(Appender::builder().build("transfers", Box::new(transfers)))
        .logger(
            Logger::builder()
                .appender("transfers")
                .additive(false)
                .build(TRANSFER_LOG_TARGET, LevelFilter::Info),
        )
        .build(Root::builder().appender("console").build(level))
        .map_err(|e| ConfigError::Logging(e.to_string()))?;

    log4rs::init_config(config).map_err(|e| ConfigError::Logging(e.to_string()))
}
