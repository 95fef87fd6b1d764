use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;
use std::sync::OnceLock;

/// Writes log records to stderr, leaving stdout to the program's own output.
pub struct StderrLogger {
    max_level: LevelFilter,
}

impl StderrLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Call this once during early init.
    #[allow(clippy::missing_errors_doc)]
    pub fn init(self) -> Result<&'static Self, SetLoggerError> {
        static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

        let logger = LOGGER.get_or_init(|| self);
        log::set_logger(logger)?;
        log::set_max_level(logger.max_level);
        Ok(logger)
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Format: "[LEVEL] target: message\n"
        let _ = writeln!(
            std::io::stderr().lock(),
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}
