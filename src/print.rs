//! `print` macros and the [`log`] backend.
//!
//! Both write into a sink installed by the kernel, usually a function that
//! forwards to the UART driver. Output is dropped until a sink is installed.

use core::fmt::Arguments;
use spin::Mutex;

/// A function that receives formatted output.
pub type Sink = fn(Arguments<'_>);

static SINK: Mutex<Option<Sink>> = Mutex::new(None);

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::print::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

#[doc(hidden)]
pub fn _print(args: Arguments<'_>) {
    // copy the sink out, so it may print itself
    let sink = *SINK.lock();
    if let Some(sink) = sink {
        sink(args);
    }
}

/// Install the sink used by the `print` macros and the logger.
pub fn set_sink(sink: Sink) {
    *SINK.lock() = Some(sink);
}

struct Logger;

impl Logger {
    /// Release builds only show `Info` and above, unless the `logging`
    /// feature is enabled.
    fn shows(level: log::Level) -> bool {
        cfg!(any(debug_assertions, feature = "logging")) || level <= log::Level::Info
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        Self::shows(metadata.level()) && SINK.lock().is_some()
    }

    fn log(&self, record: &log::Record<'_>) {
        if !Self::shows(record.level()) {
            return;
        }

        // nothing to format into before the kernel installed a sink
        let sink = match *SINK.lock() {
            Some(sink) => sink,
            None => return,
        };

        let mod_path = record
            .module_path_static()
            .or_else(|| record.module_path())
            .unwrap_or_else(|| record.target());

        sink(format_args!(
            "[ {:>5} ] [{}] {}\n",
            record.level(),
            mod_path,
            record.args()
        ));
    }

    fn flush(&self) {}
}

static LOGGER: Logger = Logger;

/// Install `sink` and register the logger for the [`log`] macros.
///
/// Fails if another logger was registered already.
pub fn init_logging(sink: Sink) -> Result<(), log::SetLoggerError> {
    set_sink(sink);
    log::set_logger(&LOGGER)?;
    log::set_max_level(log::LevelFilter::Trace);
    Ok(())
}
