// Logging facilities. All log output is printed to all enabled logging sinks.
//
// The crate only emits records through the `log` facade. Hosts that have no
// logger of their own can install this one with `init`.

use core::fmt;

mod logger;

pub use logger::init;

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    if cfg!(feature = "log_stderr") {
        use std::io::Write;
        // A failed diagnostic write has nowhere to be reported.
        let _ = std::io::stderr().lock().write_fmt(args);
    }
}

macro_rules! log_print {
    ($($arg:tt)*) => ($crate::log::_print(format_args!($($arg)*)));
}

macro_rules! log_println {
    () => ($crate::log::log_print!("\n"));
    ($($arg:tt)*) => ($crate::log::log_print!("{}\n", format_args!($($arg)*)));
}

pub(crate) use {log_print, log_println};
