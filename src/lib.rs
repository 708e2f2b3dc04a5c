//! # Plexus - Embedded telemetry client
//!
//! Collects numeric, string and boolean readings on constrained devices and
//! delivers them to the Plexus ingestion service over whatever transport the
//! platform provides.
//!
//! ## Key Features
//!
//! - **Bounded queue**: fixed capacity, overflow rejected rather than overwritten
//! - **Retrying delivery**: exponential backoff with jitter, rate-limit cooldown
//! - **Crash-safe backlog**: failed batches survive reboot in a checksummed ring
//! - **Remote commands**: poll, execute, report, with identifier validation
//! - **Platform-agnostic**: everything goes through one [`Hal`] implementation
//!
//! ## Quick Start
//!
//! ```rust
//! use plexus::{Client, ClientConfig, MockHal};
//!
//! let config = ClientConfig::with_endpoint("http://localhost:3000/api/ingest");
//! let mut client = Client::with_config(MockHal::new(), "plx_key", "greenhouse-1", config).unwrap();
//!
//! client.enqueue_number("temperature", 21.5).unwrap();
//! client.enqueue_bool("door_open", false).unwrap();
//! client.flush().unwrap();
//!
//! assert_eq!(client.total_sent(), 2);
//! assert_eq!(client.hal().post_count(), 1);
//!
//! // In the firmware main loop
//! client.tick().unwrap();
//! ```
//!
//! ## Modules
//!
//! - [`client`]: Queue, flush/retry engine and scheduler
//! - [`codec`]: Wire format
//! - [`persist`]: Persistent ring buffer of undelivered batches
//! - [`commands`]: Remote command protocol
//! - [`typed`]: Typed command schemas advertised to the dashboard
//! - [`hal`]: Platform contract and the in-memory [`MockHal`]
//! - [`recovery`]: Backoff, jitter and rate-limit cooldown

// Modules
pub mod client;
pub mod codec;
pub mod commands;
pub mod config;
pub mod error;
pub mod hal;
pub mod heartbeat;
pub mod metric;
pub mod persist;
pub mod recovery;
pub mod register;
pub mod sensors;
pub mod shared;
pub mod status;
pub mod timing;
pub mod typed;

// Re-exports for convenient access
pub use client::{Client, SDK_TAG, USER_AGENT};
pub use codec::CommandStatus;
pub use commands::{
    Command, CommandError, CommandHandler, CommandOutput, CommandResult, CommandState,
    PollOutcome,
};
pub use config::ClientConfig;
pub use error::{
    EncodeError, InputError, PlexusError, ProtocolError, Result, StorageError, TransportError,
};
pub use hal::{Hal, HttpRequest, MockHal};
pub use metric::{Metric, MetricValue, Tag};
pub use persist::PersistentRing;
pub use recovery::RetryPolicy;
pub use sensors::{Sensor, SensorDescriptor, SensorError};
pub use shared::SharedClient;
pub use status::{ConnectionStatus, StatusListener};
pub use typed::{ParamDescriptor, ParamType, ParamValue, TypedCommand};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
