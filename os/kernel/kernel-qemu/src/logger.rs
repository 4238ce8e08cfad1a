use crate::qemu_fmt::QemuSink;
use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` backend writing `[LEVEL] target: message` lines to the debug console.
///
/// Level filtering is left to [`log::max_level`], set by [`init`].
#[derive(Copy, Clone, Debug, Default)]
pub struct QemuLogger;

static LOGGER: QemuLogger = QemuLogger;

/// Install [`QemuLogger`] as the global logger. Call once during early boot.
///
/// # Errors
/// Fails if a logger has already been installed.
pub fn init(max_level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(max_level);
    Ok(())
}

/// Format `record` as one console line into `out`.
///
/// # Errors
/// Propagates errors of the underlying writer.
pub fn write_record(out: &mut impl Write, record: &Record<'_>) -> fmt::Result {
    writeln!(out, "[{}] {}: {}", record.level(), record.target(), record.args())
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            let _ = write_record(&mut QemuSink, record);
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn records_are_formatted_as_single_lines() {
        let mut line = String::new();
        write_record(
            &mut line,
            &Record::builder()
                .level(Level::Warn)
                .target("kernel_ipc")
                .args(format_args!("region {} still attached", 3))
                .build(),
        )
        .unwrap();
        assert_eq!(line, "[WARN] kernel_ipc: region 3 still attached\n");
    }

    #[test]
    fn trace_macro_is_a_no_op_on_the_host() {
        crate::qemu_trace!("value {:#x}\n", 0x2A);
    }
}
