//! Kernel log utility interfaces.
//!
//! There's no console on the simulated board, so every record (and every `print_k!`) lands in a
//! bounded in-memory ring, the same way `printk` fills the kernel log buffer before a console is
//! attached. [`dmesg`] returns a snapshot of it.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use log::{Log, Metadata, Record};
use crate::base::sync::SpinLock;


/// Max number of lines kept in the log buffer. Older lines are dropped first.
pub const LOG_BUF_LINES: usize = 1024;

struct LogBuf {
    lines: VecDeque<String>,
    partial: String,
}

impl LogBuf {
    const fn new() -> Self {
        Self {
            lines: VecDeque::new(),
            partial: String::new(),
        }
    }

    fn push_str(&mut self, s: &str) {
        let mut rest = s;
        while let Some(pos) = rest.find('\n') {
            self.partial.push_str(&rest[..pos]);
            let line = core::mem::take(&mut self.partial);
            if self.lines.len() == LOG_BUF_LINES {
                self.lines.pop_front();
            }
            self.lines.push_back(line);
            rest = &rest[pos + 1..];
        }
        self.partial.push_str(rest);
    }
}

static LOG_BUF: SpinLock<LogBuf> = SpinLock::new(LogBuf::new());

/// Init kernel log impl. Calling it more than once is harmless.
pub fn init() {
    match log::set_logger(&KERNEL_LOGGER) {
        Ok(_) => { log::set_max_level(log::LevelFilter::Trace); }
        Err(_) => { /* already installed */ }
    }
}

/// Backend of the `print_k!` macro. The whole formatted text is pushed at once so lines of
/// different contexts never interleave.
#[doc(hidden)]
pub fn print_fmt(args: fmt::Arguments) {
    let text = alloc::fmt::format(args);
    LOG_BUF.lock().push_str(&text);
}

/// Returns a copy of all the complete lines currently in the log buffer.
pub fn dmesg() -> Vec<String> {
    LOG_BUF.lock().lines.iter().cloned().collect()
}

/// Returns true if any line in the log buffer contains `needle`.
pub fn dmesg_contains(needle: &str) -> bool {
    LOG_BUF.lock().lines.iter().any(|l| l.contains(needle))
}


struct KernelLogger;

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::Level::Trace
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            if record.level() < log::Level::Info {
                println_k!("[{}][{}:{}]: {}",
                    record.level(),
                    record.file().unwrap_or("<NONE>"),
                    record.line().unwrap_or_default(),
                    record.args());
            } else {
                println_k!("[{}]: {}", record.level(), record.args());
            }
        }
    }

    fn flush(&self) {}
}

static KERNEL_LOGGER: KernelLogger = KernelLogger;
