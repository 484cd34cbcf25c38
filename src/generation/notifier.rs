//! User-facing failure notification.

use tracing::error;

/// Shows a failure to the user. The UI decides what "blocking" means.
pub trait Notifier: Send + Sync {
    fn alert(&self, message: &str);
}

/// Writes alerts to the log. Used when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn alert(&self, message: &str) {
        error!(alert = %message, "Generation failed");
    }
}
