// src/logging.rs - Injected text sink for client messages
use std::fmt;
use std::sync::Arc;

/// Single-argument text sink supplied by whoever owns the client.
///
/// The client never writes to a fixed output; every user-facing message goes
/// through the sink it was constructed with.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Fn(&str) + Send + Sync>,
}

impl Logger {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        Self { sink: Arc::new(sink) }
    }

    /// Forward every message to `tracing::info!`.
    pub fn tracing() -> Self {
        Self::new(|message| tracing::info!(target: "shui", "{}", message))
    }

    /// Drop everything.
    pub fn silent() -> Self {
        Self::new(|_| {})
    }

    pub fn log(&self, message: impl AsRef<str>) {
        (self.sink)(message.as_ref());
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::tracing()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Logger")
    }
}
