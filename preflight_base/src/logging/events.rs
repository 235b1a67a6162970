//! Log events emitted by the engine and its collaborators

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::SystemTime;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LogLevel {
    Error = 0,
    Warning = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }

    /// Parse a level name as accepted on the command line or in `PFLT_LOGLEVEL`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warning),
            "info" => Some(LogLevel::Info),
            "debug" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

/// Core log event structure
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub timestamp: SystemTime,
    pub level: LogLevel,
    pub message: String,
    pub context: BTreeMap<String, String>,
}

impl LogEvent {
    fn at(level: LogLevel, message: &str) -> Self {
        Self {
            timestamp: SystemTime::now(),
            level,
            message: message.to_string(),
            context: BTreeMap::new(),
        }
    }

    pub fn error(message: &str) -> Self {
        Self::at(LogLevel::Error, message)
    }

    pub fn warning(message: &str) -> Self {
        Self::at(LogLevel::Warning, message)
    }

    pub fn info(message: &str) -> Self {
        Self::at(LogLevel::Info, message)
    }

    pub fn debug(message: &str) -> Self {
        Self::at(LogLevel::Debug, message)
    }

    /// Attach a key/value pair to the event
    pub fn with_context(mut self, key: &str, value: &str) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == LogLevel::Error
    }

    pub fn is_warning(&self) -> bool {
        self.level == LogLevel::Warning
    }

    /// Render as a single human readable line: `LEVEL message key=value ...`
    pub fn format(&self) -> String {
        let mut line = format!("[{}] {}", self.level.as_str(), self.message);
        for (key, value) in &self.context {
            line.push_str(&format!(" {}={}", key, value));
        }
        line
    }

    /// Render as a single JSON object
    pub fn format_json(&self) -> Result<String, serde_json::Error> {
        let timestamp = self
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let json = serde_json::json!({
            "timestamp_ms": timestamp,
            "level": self.level.as_str(),
            "message": self.message,
            "context": self.context,
        });

        serde_json::to_string(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_with_context() {
        let event = LogEvent::info("running check")
            .with_context("check", "HasLicense")
            .with_context("platform", "amd64");

        assert_eq!(event.context.len(), 2);
        assert_eq!(
            event.format(),
            "[INFO] running check check=HasLicense platform=amd64"
        );
    }

    #[test]
    fn test_json_formatting() {
        let event = LogEvent::error("boom").with_context("check", "RunAsNonRoot");
        let json: serde_json::Value = serde_json::from_str(&event.format_json().unwrap()).unwrap();

        assert_eq!(json["level"], "ERROR");
        assert_eq!(json["message"], "boom");
        assert_eq!(json["context"]["check"], "RunAsNonRoot");
    }

    #[test]
    fn test_level_parsing_and_ordering() {
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("trace"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("loud"), None);
        assert!(LogLevel::Error < LogLevel::Info);
    }
}
