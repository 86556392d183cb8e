//! Per-component logging.

use std::fmt;

/// Direction or nature of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Incoming,
    Outgoing,
    Informational,
    Error,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Incoming => "incoming",
            LogKind::Outgoing => "outgoing",
            LogKind::Informational => "info",
            LogKind::Error => "error",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logger handed to each component instance.
///
/// Every entry carries the component name and a [`LogKind`] as structured
/// fields. Message traffic goes to `debug`, informational entries to `info`
/// and errors to `error`. Raw bytes are logged at `trace`.
#[derive(Debug, Clone, Copy)]
pub struct ComponentLog {
    component: &'static str,
}

impl ComponentLog {
    pub const fn new(component: &'static str) -> Self {
        Self { component }
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    pub fn log(&self, kind: LogKind, message: impl fmt::Display) {
        match kind {
            LogKind::Incoming | LogKind::Outgoing => {
                tracing::debug!(component = self.component, kind = %kind, "{}", message)
            }
            LogKind::Informational => {
                tracing::info!(component = self.component, kind = %kind, "{}", message)
            }
            LogKind::Error => {
                tracing::error!(component = self.component, kind = %kind, "{}", message)
            }
        }
    }

    pub fn incoming(&self, message: impl fmt::Display) {
        self.log(LogKind::Incoming, message);
    }

    pub fn outgoing(&self, message: impl fmt::Display) {
        self.log(LogKind::Outgoing, message);
    }

    pub fn info(&self, message: impl fmt::Display) {
        self.log(LogKind::Informational, message);
    }

    pub fn error(&self, message: impl fmt::Display) {
        self.log(LogKind::Error, message);
    }

    /// Logs raw bytes of one pipeline stage (`ble read`, `encoded`, ...).
    pub fn bytes(&self, kind: LogKind, stage: &str, data: &[u8]) {
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(
                component = self.component,
                kind = %kind,
                stage,
                len = data.len(),
                "{}",
                hex::encode_upper(data)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_kind_names() {
        assert_eq!(LogKind::Incoming.to_string(), "incoming");
        assert_eq!(LogKind::Outgoing.to_string(), "outgoing");
        assert_eq!(LogKind::Informational.to_string(), "info");
        assert_eq!(LogKind::Error.to_string(), "error");
    }

    #[test]
    fn test_component_log_without_subscriber() {
        let log = ComponentLog::new("reader");
        assert_eq!(log.component(), "reader");
        log.info("started");
        log.bytes(LogKind::Incoming, "ble read", &[0x00, 0x01]);
    }
}
