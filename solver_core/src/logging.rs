use std::fmt;
use std::sync::{Mutex, OnceLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Trace => "trace",
        };
        write!(f, "{}", label)
    }
}

type LogSink = Box<dyn Fn(LogLevel, &str) + Send + Sync + 'static>;

fn default_sink(level: LogLevel, message: &str) {
    eprintln!("[{}] {}", level, message);
}

fn sink_cell() -> &'static Mutex<LogSink> {
    static SINK: OnceLock<Mutex<LogSink>> = OnceLock::new();
    SINK.get_or_init(|| Mutex::new(Box::new(default_sink)))
}

/// Replaces the process-wide sink. Hosts embedding the solver route this
/// into their own logging.
pub fn set_log_sink(sink: impl Fn(LogLevel, &str) + Send + Sync + 'static) {
    let mut guard = match sink_cell().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Box::new(sink);
}

pub fn log(level: LogLevel, message: impl AsRef<str>) {
    let guard = match sink_cell().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    (guard)(level, message.as_ref());
}

pub fn error(message: impl AsRef<str>) {
    log(LogLevel::Error, message);
}

pub fn warn(message: impl AsRef<str>) {
    log(LogLevel::Warn, message);
}

pub fn info(message: impl AsRef<str>) {
    log(LogLevel::Info, message);
}

pub fn trace(message: impl AsRef<str>) {
    log(LogLevel::Trace, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn replaced_sink_receives_levelled_messages() {
        let captured: Arc<Mutex<Vec<(LogLevel, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink_capture = Arc::clone(&captured);
        set_log_sink(move |level, message| {
            sink_capture
                .lock()
                .unwrap()
                .push((level, message.to_string()));
        });

        warn("spinning down");
        info("tick complete");

        let captured = captured.lock().unwrap();
        assert!(captured.contains(&(LogLevel::Warn, "spinning down".to_string())));
        assert!(captured.contains(&(LogLevel::Info, "tick complete".to_string())));
    }

    #[test]
    fn levels_render_lowercase() {
        assert_eq!(LogLevel::Error.to_string(), "error");
        assert_eq!(LogLevel::Trace.to_string(), "trace");
    }
}
