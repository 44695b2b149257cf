use tracing::warn;

/// Best-effort channel for problems the user should hear about, such as a
/// settings file that could not be read.
pub trait UserNotifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Sends notices to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl UserNotifier for LogNotifier {
    fn notify(&self, message: &str) {
        warn!(target: "proptable::notice", "{message}");
    }
}
