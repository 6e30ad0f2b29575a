//! Tracing subscriber initialization
//!
//! Log output goes to stdout through `tracing_subscriber`. The filter comes from
//! `RUST_LOG` and defaults to `lectio=debug`; `LOG_FORMAT=json` switches to one JSON
//! object per line.

mod init_basic;

pub use init_basic::{init_telemetry, shutdown_telemetry, LogFormat};
