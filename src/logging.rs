use log::LevelFilter;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Config, Root},
    encode::{json::JsonEncoder, pattern::PatternEncoder},
};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use once_cell::sync::OnceCell;

pub struct Logger;

pub static LOGGER_ENABLED: OnceCell<bool> = OnceCell::new();

#[macro_export]
macro_rules! logger {
    ($level:ident, $($arg:tt)+) => {
        if let Some(true) = $crate::logging::LOGGER_ENABLED.get() {
            ::log::$level!($($arg)+);
        }
    };
}

/// Where log records are written.
#[derive(Debug, Clone, Default)]
pub enum LogTarget {
    #[default]
    Stderr,
    /// JSON lines written to the given file, or `LOG_PATH` when unset.
    File(Option<PathBuf>),
}

impl Logger {
    pub fn init(target: LogTarget) -> Result<(), anyhow::Error> {
        let level_filter =
            LevelFilter::from_str(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))?;

        let appender: Box<dyn log4rs::append::Append> = match target {
            LogTarget::Stderr => Box::new(
                ConsoleAppender::builder()
                    .target(Target::Stderr)
                    .encoder(Box::new(PatternEncoder::new(
                        "{d(%Y-%m-%dT%H:%M:%S%.3f)} {h({l:5})} {t} - {m}{n}",
                    )))
                    .build(),
            ),
            LogTarget::File(path) => {
                let log_path = path.unwrap_or_else(|| {
                    PathBuf::from(env::var("LOG_PATH").unwrap_or_else(|_| "oci-lb.log".to_string()))
                });

                Box::new(
                    FileAppender::builder()
                        .append(false)
                        .encoder(Box::new(JsonEncoder::new()))
                        .build(log_path)?,
                )
            }
        };

        let config = Config::builder()
            .appender(Appender::builder().build("main", appender))
            .build(Root::builder().appender("main").build(level_filter))?;

        log4rs::init_config(config)?;

        LOGGER_ENABLED
            .set(true)
            .map_err(|_| anyhow::anyhow!("logger is already enabled"))?;

        Ok(())
    }
}
