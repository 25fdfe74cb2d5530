use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use colored::*;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use time::{format_description::FormatItem, OffsetDateTime};

use crate::config::BrokerConfig;

const TIMESTAMP_FORMAT_UTC: &[FormatItem] = time::macros::format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
);

const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "logs/dragonfly.log";

pub struct BrokerLogger {
    write_console: bool,
    write_file: bool,
}

impl log::Log for BrokerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let timestamp = OffsetDateTime::now_utc()
                .format(TIMESTAMP_FORMAT_UTC)
                .unwrap_or_else(|_| String::from("<no timestamp>"));

            if self.write_console {
                self.log_console(record, &timestamp);
            }

            if self.write_file {
                self.log_file(record, &timestamp);
            }
        }
    }

    fn flush(&self) {}
}

impl BrokerLogger {
    pub fn new(config: &BrokerConfig) -> Self {
        return Self {
            write_console: config.should_log_console(),
            write_file: config.should_log_file(),
        };
    }

    pub fn init(self, level: LevelFilter) -> Result<(), SetLoggerError> {
        if self.write_file {
            init_log_fs();
        }

        log::set_max_level(level);
        return log::set_boxed_logger(Box::new(self));
    }

    fn log_console(&self, record: &Record, timestamp: &str) {
        let level = format!("{:<5}", record.level().to_string());

        let colorized_level = match record.level() {
            Level::Error => level.red().to_string(),
            Level::Warn => level.yellow().to_string(),
            Level::Info => level.cyan().to_string(),
            Level::Debug => level.purple().to_string(),
            Level::Trace => level.normal().to_string(),
        };

        println!("[{timestamp}][{colorized_level}] {}", record.args());
    }

    fn log_file(&self, record: &Record, timestamp: &str) {
        let line = format!("{};{};{}\n", record.level(), record.args(), timestamp);

        match OpenOptions::new().append(true).create(true).open(LOG_FILE) {
            Ok(mut file) => {
                if let Err(err) = file.write_all(line.as_bytes()) {
                    eprintln!("Could not write to {LOG_FILE}: {err}");
                }
            }
            Err(err) => {
                eprintln!("Could not open {LOG_FILE}: {err}");
            }
        }
    }
}

fn init_log_fs() {
    let path = Path::new(LOG_DIR);

    if !path.exists() {
        if let Err(err) = fs::create_dir(path) {
            eprintln!("Could not create the {LOG_DIR} directory: {err}");
        }
    }
}
