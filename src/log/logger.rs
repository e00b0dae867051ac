//! Log formatting.

use log_crate::{Level, LevelFilter, Log, Metadata, Record};

use super::log_println;

/// Per-module log level overrides.
const LOG_LEVELS: [(&str, LevelFilter); 2] = [
    ("segmem::mem::page", LevelFilter::Trace),
    ("segmem::mem::sys::emu", LevelFilter::Info),
];

/// The global logger.
struct Logger {
    /// The current global level filter.
    level: LevelFilter,
}

impl Log for Logger {
    #[inline]
    fn enabled(&self, metadata: &Metadata) -> bool {
        let level = metadata.level();
        for (target, filter) in LOG_LEVELS.iter() {
            if metadata.target().starts_with(target) {
                return level <= *filter;
            }
        }

        level <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let prefix = match record.level() {
            Level::Error => 'e',
            Level::Warn => 'w',
            Level::Info => 'i',
            Level::Debug => 'd',
            Level::Trace => 't',
        };

        let target = record
            .target()
            .strip_prefix(crate::consts::NAME)
            .map(|t| t.trim_start_matches("::"))
            .filter(|t| !t.is_empty())
            .unwrap_or("init");

        log_println!("{} ({}) --> {}", prefix, target, record.args());
    }

    fn flush(&self) {
        // no-op
    }
}

impl Logger {
    fn the() -> &'static Logger {
        static LOGGER: Logger = Logger {
            level: if cfg!(debug_assertions) {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            },
        };

        &LOGGER
    }
}

/// Initialize the logger. Does nothing if the host already installed one.
pub fn init() {
    if log_crate::set_logger(Logger::the()).is_ok() {
        log_crate::set_max_level(LevelFilter::Trace);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overrides() {
        let logger = Logger { level: LevelFilter::Warn };
        let page = Metadata::builder()
            .level(Level::Trace)
            .target("segmem::mem::page::allocator")
            .build();
        let emu = Metadata::builder()
            .level(Level::Debug)
            .target("segmem::mem::sys::emu::process")
            .build();
        let other = Metadata::builder()
            .level(Level::Info)
            .target("segmem::shmem")
            .build();
        assert!(logger.enabled(&page));
        assert!(!logger.enabled(&emu));
        assert!(!logger.enabled(&other));
    }

    #[test]
    fn init_twice() {
        init();
        init();
    }
}
