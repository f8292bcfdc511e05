//! Formatted trace output.
//!
//! The core never talks to hardware directly; a platform installs a byte
//! sink and every `kprint!`/`kprintln!` line is formatted into a bounded
//! buffer and handed to it. With no sink installed, tracing is a no-op.

use core::fmt::{self, Write};

use arrayvec::ArrayString;
use spin::Mutex;

/// Where formatted trace bytes go. Typically the platform's serial
/// console; tests may install a capturing function.
pub type Sink = fn(&str);

static SINK: Mutex<Option<Sink>> = Mutex::new(None);

/// Installs the trace sink, replacing any previous one.
pub fn set_sink(sink: Sink) {
    *SINK.lock() = Some(sink);
}

/// Removes the trace sink; subsequent traces are dropped.
pub fn clear_sink() {
    *SINK.lock() = None;
}

struct Writer {
    buf: ArrayString<256>,
    sink: Sink,
}

impl Writer {
    fn flush(&mut self) {
        if !self.buf.is_empty() {
            (self.sink)(&self.buf);
            self.buf.clear();
        }
    }
}

impl Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.buf.try_push_str(s).is_err() {
            self.flush();
            if self.buf.try_push_str(s).is_err() {
                // Longer than the whole buffer; hand it over as-is.
                (self.sink)(s);
            }
        }
        Ok(())
    }
}

/// kprint! formats one trace fragment into the sink.
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ($crate::console::_print(format_args!($($arg)*)));
}

/// kprintln! formats one trace line into the sink.
#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments<'_>) {
    // Copy the sink out so the lock is not held while formatting.
    let sink = *SINK.lock();
    let sink = match sink {
        Some(sink) => sink,
        None => return,
    };
    let mut writer = Writer {
        buf: ArrayString::new(),
        sink,
    };
    let _ = writer.write_fmt(args);
    writer.flush();
}
