//! Process-wide configuration
//!
//! A single [`Config`] value shared by every parser in the process. Readers
//! take a snapshot with [`get`]; writers go through [`update`] or a scoped
//! [`override_autofix`] guard. The guard only affects the calling thread.

use std::cell::Cell;
use std::marker::PhantomData;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Global options consulted by the engine, the guesser and the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Translate messages (English only; kept for front-ends)
    pub use_i18n: bool,
    /// Suppress warnings in front-ends
    pub quiet: bool,
    /// Print extra information in front-ends
    pub verbose: bool,
    /// Log every parser candidate tried by the guesser
    pub debug: bool,
    /// Allow filler fields and clamping on minor corruption
    pub autofix: bool,
    /// Maximum number of characters shown for a string display
    pub max_string_length: usize,
    /// Maximum number of bytes shown for a byte display
    pub max_byte_length: usize,
    /// Verify the content of padding and null fields
    pub check_padding_pattern: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            use_i18n: false,
            quiet: false,
            verbose: false,
            debug: false,
            autofix: true,
            max_string_length: 40,
            max_byte_length: 14,
            check_padding_pattern: true,
        }
    }
}

static CONFIG: Lazy<RwLock<Config>> = Lazy::new(|| RwLock::new(Config::default()));

thread_local! {
    static AUTOFIX_OVERRIDE: Cell<Option<bool>> = const { Cell::new(None) };
}

/// Snapshot of the current configuration, with this thread's overrides
pub fn get() -> Config {
    let mut config = *CONFIG.read();
    if let Some(autofix) = AUTOFIX_OVERRIDE.with(Cell::get) {
        config.autofix = autofix;
    }
    config
}

/// Modify the configuration in place
pub fn update<F>(f: F)
where
    F: FnOnce(&mut Config),
{
    let mut config = CONFIG.write();
    f(&mut config);
}

/// Restores the previous `autofix` override of its thread when dropped
#[must_use = "autofix is restored as soon as the guard is dropped"]
pub struct AutofixGuard {
    previous: Option<bool>,
    _thread: PhantomData<*const ()>,
}

/// Set `autofix` on the current thread for the lifetime of the returned guard
pub fn override_autofix(value: bool) -> AutofixGuard {
    let previous = AUTOFIX_OVERRIDE.with(|cell| cell.replace(Some(value)));
    AutofixGuard {
        previous,
        _thread: PhantomData,
    }
}

impl Drop for AutofixGuard {
    fn drop(&mut self) {
        AUTOFIX_OVERRIDE.with(|cell| cell.set(self.previous));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.autofix);
        assert!(config.check_padding_pattern);
        assert_eq!(config.max_string_length, 40);
        assert!(!config.quiet);
    }

    #[test]
    fn test_autofix_guard_restores() {
        let before = get().autofix;
        {
            let _guard = override_autofix(!before);
            assert_eq!(get().autofix, !before);
        }
        assert_eq!(get().autofix, before);
    }

    #[test]
    fn test_autofix_guard_nests() {
        let before = get().autofix;
        let outer = override_autofix(false);
        let inner = override_autofix(true);
        assert!(get().autofix);
        drop(inner);
        assert!(!get().autofix);
        drop(outer);
        assert_eq!(get().autofix, before);
    }

    #[test]
    fn test_autofix_guard_is_per_thread() {
        let _guard = override_autofix(false);
        let (tx, rx) = std::sync::mpsc::channel();
        let other = std::thread::spawn(move || {
            let guard = override_autofix(true);
            tx.send(()).unwrap();
            let seen = get().autofix;
            drop(guard);
            seen
        });
        rx.recv().unwrap();
        assert!(!get().autofix);
        assert!(other.join().unwrap());
        assert!(!get().autofix);
    }
}
