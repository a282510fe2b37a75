//! Injectable diagnostic sink.
//!
//! The dispatch layer never writes logs itself; every message goes through a
//! [`DiagnosticSink`] supplied at construction, tagged with the source
//! location and a severity. [`LogSink`] bridges to the `log` facade for hosts
//! that don't need a custom handler.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Trace,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Trace => write!(f, "trace"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

pub trait DiagnosticSink: Send + Sync {
    fn message(&self, file: &'static str, line: u32, severity: Severity, message: &str);
}

/// Forwards diagnostics to the `log` crate.
#[derive(Debug, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn message(&self, file: &'static str, line: u32, severity: Severity, message: &str) {
        let level = match severity {
            Severity::Trace => log::Level::Trace,
            Severity::Warning => log::Level::Warn,
            Severity::Error => log::Level::Error,
        };
        log::log!(level, "[{file}:{line}] {message}");
    }
}

/// Discards all diagnostics.
#[derive(Debug, Default)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn message(&self, _file: &'static str, _line: u32, _severity: Severity, _message: &str) {}
}

macro_rules! diag {
    ($sink:expr, $severity:expr, $($arg:tt)*) => {
        $sink.message(file!(), line!(), $severity, &format!($($arg)*))
    };
}

pub(crate) use diag;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CaptureSink {
        messages: Mutex<Vec<(Severity, String)>>,
    }

    impl DiagnosticSink for CaptureSink {
        fn message(&self, _file: &'static str, line: u32, severity: Severity, message: &str) {
            assert!(line > 0);
            self.messages
                .lock()
                .unwrap()
                .push((severity, message.to_owned()));
        }
    }

    #[test]
    fn macro_formats_and_tags_severity() {
        let sink = CaptureSink::default();
        diag!(sink, Severity::Warning, "mesh {}/{} skipped", 2, 5);
        let messages = sink.messages.lock().unwrap();
        assert_eq!(
            messages.as_slice(),
            &[(Severity::Warning, "mesh 2/5 skipped".to_owned())]
        );
    }
}
