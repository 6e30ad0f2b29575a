//! Lectio Infrastructure Library
//!
//! Shared infrastructure used by the pipeline binary and its stages:
//! - Telemetry initialization (`tracing` subscriber)
//! - Message broker abstraction with an in-process implementation

pub mod broker;

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub use broker::{BrokerError, InMemoryBroker, MessageBroker, Subscription};

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry, LogFormat};
