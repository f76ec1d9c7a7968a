// Navigator for non-interactive hosts (CLI, services)

use parking_lot::Mutex;

use super::Navigator;

/// Logs redirects and remembers the most recent target
#[derive(Debug, Default)]
pub struct LogNavigator {
    last: Mutex<Option<String>>,
}

impl LogNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent redirect target, if any
    pub fn last_redirect(&self) -> Option<String> {
        self.last.lock().clone()
    }
}

impl Navigator for LogNavigator {
    fn redirect(&self, path: &str) {
        tracing::info!(target_path = %path, "Redirecting");
        *self.last.lock() = Some(path.to_string());
    }
}
