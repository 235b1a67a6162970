//! Logging for engine runs
//!
//! A `LoggingService` is attached to every `ExecutionContext`. Engines refuse to
//! start without one, so checks and the orchestration loop can always report
//! progress.

pub mod events;
pub mod service;

pub use events::{LogEvent, LogLevel};
pub use service::{
    ConsoleLogger, FacadeLogger, Logger, LoggingService, MemoryLogger, StructuredLogger,
};
