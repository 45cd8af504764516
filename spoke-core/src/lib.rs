//! Shared kernel for the Spoke schema registry.
//!
//! Holds the pieces every subsystem leans on: the injectable [`Clock`],
//! the domain [`Event`] envelope with its closed [`EventType`] enum, and
//! the tracing bootstrap.

pub mod clock;
pub mod event;

pub use clock::{Clock, ManualClock, SystemClock};
pub use event::{Event, EventType, ParseEventTypeError};

use tracing_subscriber::EnvFilter;

/// Initialises the global `tracing` subscriber.
///
/// Honours `RUST_LOG`; defaults to `info` when unset.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();
}
