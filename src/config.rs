// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Client configuration and compile-time bounds

/// Default ingest endpoint
pub const DEFAULT_ENDPOINT: &str = "https://app.plexus.company/api/ingest";

/// Maximum queued metrics per flush
pub const MAX_METRICS: usize = 32;
/// Metric names must be shorter than this
pub const MAX_METRIC_NAME_LEN: usize = 64;
/// String values must be shorter than this
pub const MAX_STRING_VALUE_LEN: usize = 128;
/// Source identifiers must be shorter than this
pub const MAX_SOURCE_ID_LEN: usize = 64;
/// API keys must be shorter than this
pub const MAX_API_KEY_LEN: usize = 128;
/// Endpoints must be shorter than this
pub const MAX_ENDPOINT_LEN: usize = 256;
/// Tags per metric
pub const MAX_TAGS: usize = 4;
/// Tag keys and values must be shorter than this
pub const MAX_TAG_LEN: usize = 32;
/// Metric names advertised in the heartbeat
pub const MAX_REGISTERED_METRICS: usize = 32;
/// Sensors held by a client
pub const MAX_SENSORS: usize = 8;
/// Command strings are truncated to this many bytes
pub const MAX_COMMAND_LEN: usize = 256;
/// Command output and error text are truncated to this many bytes
pub const MAX_COMMAND_RESULT_LEN: usize = 256;
/// Command identifiers must be shorter than this
pub const MAX_COMMAND_ID_LEN: usize = 64;
/// Session identifiers must be shorter than this
pub const MAX_SESSION_ID_LEN: usize = 64;
/// Hostname, platform, device type and firmware strings are truncated below this
pub const MAX_METADATA_LEN: usize = 32;
/// Typed command schemas held by a client
pub const MAX_TYPED_COMMANDS: usize = 8;
/// Parameters per typed command
pub const MAX_COMMAND_PARAMS: usize = 8;
/// Choices per enum parameter
pub const MAX_ENUM_CHOICES: usize = 8;

/// Client configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Ingest URL; other API URLs are derived from it
    pub endpoint: String,

    /// Flush from `tick()` after this many ms since the last flush (0 = disabled)
    pub flush_interval_ms: u32,

    /// Flush from enqueue once this many metrics are queued (0 = disabled)
    pub flush_count: usize,

    /// Delivery attempts per flush
    pub max_retries: u32,

    /// First retry delay
    pub retry_base_ms: u32,

    /// Retry delay cap
    pub retry_max_ms: u32,

    /// Jitter applied to every retry delay, in percent
    pub jitter_percent: u32,

    /// Delivery pause after a 429
    pub rate_limit_cooldown_ms: u32,

    /// Heartbeat period (0 = disabled)
    pub heartbeat_interval_ms: u32,

    /// Command poll period
    pub command_poll_interval_ms: u32,

    /// Route undeliverable batches to durable storage
    pub persistent_buffer: bool,

    /// Slots in the persistent ring
    pub persist_slots: usize,

    /// Upper bound of a serialized batch
    pub json_buffer_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            flush_interval_ms: 5000,
            flush_count: 16,
            max_retries: 3,
            retry_base_ms: 500,
            retry_max_ms: 8000,
            jitter_percent: 25,
            rate_limit_cooldown_ms: 30_000,
            heartbeat_interval_ms: 60_000,
            command_poll_interval_ms: 10_000,
            persistent_buffer: false,
            persist_slots: 8,
            json_buffer_size: 2048,
        }
    }
}

impl ClientConfig {
    /// Default configuration pointed at a custom endpoint
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Default configuration with the persistent ring enabled
    pub fn with_persistence() -> Self {
        Self {
            persistent_buffer: true,
            ..Default::default()
        }
    }

    /// Default configuration with both automatic flush triggers disabled
    pub fn manual_flush() -> Self {
        Self {
            flush_interval_ms: 0,
            flush_count: 0,
            ..Default::default()
        }
    }

    /// Effective auto-flush count, clamped to queue capacity
    pub fn effective_flush_count(&self) -> usize {
        self.flush_count.min(MAX_METRICS)
    }
}
