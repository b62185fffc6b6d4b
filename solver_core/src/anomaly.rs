//! Sticky record of the first anomaly seen by a run. Headless tools read it
//! after the simulation finishes to turn silent corruption into a non-zero
//! exit code.

use std::panic::{self, PanicHookInfo};
use std::sync::{Mutex, OnceLock};

use crate::logging;

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn anomaly_cell() -> &'static Mutex<Option<String>> {
    static ANOMALY: OnceLock<Mutex<Option<String>>> = OnceLock::new();
    ANOMALY.get_or_init(|| Mutex::new(None))
}

/// Records the message unless an earlier anomaly is already held.
pub fn record_anomaly(message: impl Into<String>) {
    let message = message.into();
    logging::error(&message);
    let mut guard = lock_unpoisoned(anomaly_cell());
    if guard.is_none() {
        *guard = Some(message);
    }
}

pub fn clear_anomaly() {
    let mut guard = lock_unpoisoned(anomaly_cell());
    *guard = None;
}

pub fn first_anomaly() -> Option<String> {
    let guard = lock_unpoisoned(anomaly_cell());
    guard.clone()
}

/// Routes panics into the anomaly cell before the default hook runs.
pub fn install_panic_hook() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    if INSTALLED.set(()).is_err() {
        return;
    }
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        record_anomaly(format_panic(info));
        default_hook(info);
    }));
}

fn format_panic(info: &PanicHookInfo<'_>) -> String {
    let payload = if let Some(text) = info.payload().downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = info.payload().downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic payload".to_string()
    };
    let location = info
        .location()
        .map(|loc| format!("{}:{}", loc.file(), loc.line()))
        .unwrap_or_else(|| "<unknown>".to_string());
    format!("panic at {}: {}", location, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_anomaly_sticks_until_cleared() {
        clear_anomaly();
        assert!(first_anomaly().is_none());

        record_anomaly("first");
        record_anomaly("second");
        assert_eq!(first_anomaly().as_deref(), Some("first"));

        clear_anomaly();
        assert!(first_anomaly().is_none());
    }
}
