//! Kernel logging backend for the `log` facade
//!
//! Modules log through `log::info!`/`log::warn!`/... with the subsystem
//! name as the target; this backend renders each record as a
//! `[LEVEL sched] message` line on the console. Records below the
//! compile-time max level are compiled out by the `log` crate itself.

use log::{Level, LevelFilter, Log, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Debug
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        crate::println!(
            "[{} {}] {}",
            level_tag(record.level()),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

// Only the riscv64 console backend renders records; the host print
// macros are no-ops.
#[cfg_attr(not(target_arch = "riscv64"), allow(dead_code))]
fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN ",
        Level::Info => "INFO ",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Install the kernel logger. Called once from `kmain`; a second call
/// is ignored (the `log` crate rejects it).
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}
