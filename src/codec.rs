// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Wire codec
//!
//! Outbound documents are serialized with `serde_json` into a bounded
//! buffer: if a document would not fit, nothing is left behind and
//! [`EncodeError::BufferOverflow`] is returned. Numbers use the shortest
//! representation that round-trips; NaN and infinities become `null`.
//!
//! Inbound documents are small and of known shape (command poll and
//! registration responses), parsed into typed structs. The lookup helpers
//! [`extract_string`] and [`extract_int`] fetch a single field by key.
//!
//! # Batch format
//!
//! ```text
//! {"sdk":"rust/0.4.0","points":[
//!   {"metric":"temperature","value":72.5,"timestamp":1700000000000,
//!    "source_id":"dev-001","tags":{"room":"lab"}}
//! ]}
//! ```

use crate::commands::Command;
use crate::config::MAX_COMMAND_LEN;
use crate::error::{EncodeError, ProtocolError};
use crate::metric::{Metric, MetricValue, Tag};
use crate::typed::TypedCommand;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use std::io;

/// Command timeout assumed when the server omits one
pub const DEFAULT_COMMAND_TIMEOUT_S: u32 = 300;

// ============================================================================
// Bounded output
// ============================================================================

/// `io::Write` adapter refusing to grow past a limit
struct BoundedWriter<'a> {
    buf: &'a mut Vec<u8>,
    limit: usize,
    overflowed: bool,
}

impl io::Write for BoundedWriter<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.buf.len() + data.len() > self.limit {
            self.overflowed = true;
            return Err(io::Error::new(io::ErrorKind::WriteZero, "output buffer full"));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Serialize `value` into `out`, replacing its contents
///
/// Returns the document length. On failure `out` is left empty.
pub fn encode_bounded<T: Serialize + ?Sized>(
    value: &T,
    out: &mut Vec<u8>,
    limit: usize,
) -> Result<usize, EncodeError> {
    out.clear();
    let mut writer = BoundedWriter {
        buf: &mut *out,
        limit,
        overflowed: false,
    };
    let result = serde_json::to_writer(&mut writer, value);
    let overflowed = writer.overflowed;
    match result {
        Ok(()) => Ok(out.len()),
        Err(e) => {
            out.clear();
            if overflowed {
                Err(EncodeError::BufferOverflow { capacity: limit })
            } else {
                Err(EncodeError::Serialize(e.to_string()))
            }
        }
    }
}

// ============================================================================
// Metric batch
// ============================================================================

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Number(v) if v.is_finite() => serializer.serialize_f64(*v),
            Self::Number(_) => serializer.serialize_none(),
            Self::String(s) => serializer.serialize_str(s),
            Self::Bool(b) => serializer.serialize_bool(*b),
        }
    }
}

/// Tags as a JSON object, in insertion order
struct TagMap<'a>(&'a [Tag]);

impl Serialize for TagMap<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for tag in self.0 {
            map.serialize_entry(&tag.key, &tag.value)?;
        }
        map.end()
    }
}

impl TagMap<'_> {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

#[derive(Serialize)]
struct Point<'a> {
    metric: &'a str,
    value: &'a MetricValue,
    #[serde(skip_serializing_if = "is_zero")]
    timestamp: u64,
    source_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "TagMap::is_empty")]
    tags: TagMap<'a>,
}

struct Points<'a> {
    metrics: &'a [Metric],
    source_id: &'a str,
    session_id: Option<&'a str>,
}

impl Serialize for Points<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.metrics.len()))?;
        for m in self.metrics {
            seq.serialize_element(&Point {
                metric: &m.name,
                value: &m.value,
                timestamp: m.timestamp_ms,
                source_id: self.source_id,
                session_id: self.session_id,
                tags: TagMap(&m.tags),
            })?;
        }
        seq.end()
    }
}

#[derive(Serialize)]
struct Batch<'a> {
    sdk: &'a str,
    points: Points<'a>,
}

/// Everything a batch document needs besides the metrics
#[derive(Debug, Clone, Copy)]
pub struct BatchContext<'a> {
    /// `<sdk-id>/<version>`
    pub sdk: &'a str,
    /// Device identifier stamped on every point
    pub source_id: &'a str,
    /// Active recording session, if any
    pub session_id: Option<&'a str>,
}

/// Serialize a metric batch into `out`, returning its length
pub fn serialize_batch(
    ctx: &BatchContext<'_>,
    metrics: &[Metric],
    out: &mut Vec<u8>,
    limit: usize,
) -> Result<usize, EncodeError> {
    let batch = Batch {
        sdk: ctx.sdk,
        points: Points {
            metrics,
            source_id: ctx.source_id,
            session_id: ctx.session_id,
        },
    };
    encode_bounded(&batch, out, limit)
}

// ============================================================================
// Other outbound documents
// ============================================================================

/// Terminal state of a remote command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    /// Handler ran and exited 0
    Completed,
    /// Handler failed or exited non-zero
    Failed,
}

/// Body of `POST /api/commands/<id>/result`
#[derive(Debug, Clone, Serialize)]
pub struct CommandResultBody<'a> {
    /// Outcome
    pub status: CommandStatus,
    /// Process-style exit code
    pub exit_code: i32,
    /// Captured output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<&'a str>,
    /// Failure description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
}

/// Body of `POST /api/sources/register`
#[derive(Debug, Clone, Serialize)]
pub struct RegisterBody<'a> {
    /// Requested source name
    pub name: &'a str,
    /// Device hostname
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<&'a str>,
    /// Platform name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<&'a str>,
}

/// Sensor entry of a heartbeat
#[derive(Debug, Clone, Serialize)]
pub struct SensorEntry<'a> {
    /// Sensor model
    pub name: &'a str,
    /// Human-readable description
    pub description: &'a str,
    /// Metric names the sensor produces
    pub metrics: &'a [&'a str],
    /// Nominal sampling rate in Hz
    pub sample_rate: f32,
}

/// Body of `POST /api/heartbeat`
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatBody<'a> {
    /// `<sdk-id>/<version>`
    pub sdk: &'a str,
    /// Device identifier
    pub source_id: &'a str,
    /// Board or product type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<&'a str>,
    /// Firmware version string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<&'a str>,
    /// Ticks since the client was created
    pub uptime_ms: u32,
    /// Points delivered
    pub total_sent: u32,
    /// Failed flushes
    pub total_errors: u32,
    /// Registered metric names
    pub metrics: &'a [String],
    /// Active sensors
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sensors: Vec<SensorEntry<'a>>,
    /// Typed command schemas
    #[serde(skip_serializing_if = "no_commands")]
    pub commands: &'a [TypedCommand],
}

fn no_commands(commands: &&[TypedCommand]) -> bool {
    commands.is_empty()
}

// ============================================================================
// Inbound documents
// ============================================================================

#[derive(Deserialize)]
struct PollResponse {
    #[serde(default)]
    commands: Vec<PolledCommand>,
}

#[derive(Deserialize)]
struct PolledCommand {
    id: String,
    #[serde(default)]
    command: String,
    #[serde(default = "default_timeout")]
    timeout_seconds: u32,
}

fn default_timeout() -> u32 {
    DEFAULT_COMMAND_TIMEOUT_S
}

#[derive(Deserialize)]
struct RegisterResponse {
    #[serde(default)]
    source_id: Option<String>,
}

/// Parse a command poll response; only the first command is taken
///
/// The identifier is returned as sent. Callers must validate it before
/// using it anywhere.
pub fn parse_poll_response(body: &[u8]) -> Result<Option<Command>, ProtocolError> {
    let response: PollResponse = serde_json::from_slice(body)
        .map_err(|e| ProtocolError::MalformedResponse(e.to_string()))?;
    Ok(response.commands.into_iter().next().map(|c| Command {
        id: c.id,
        command: truncate_utf8(&c.command, MAX_COMMAND_LEN - 1).to_string(),
        timeout_seconds: c.timeout_seconds,
    }))
}

/// Parse a registration response, returning the server's `source_id`
pub fn parse_register_response(body: &[u8]) -> Result<Option<String>, ProtocolError> {
    let response: RegisterResponse = serde_json::from_slice(body)
        .map_err(|e| ProtocolError::MalformedResponse(e.to_string()))?;
    Ok(response.source_id.filter(|s| !s.is_empty()))
}

/// First value stored under `key`, searching objects depth-first
fn find_key<'v>(value: &'v serde_json::Value, key: &str) -> Option<&'v serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map
            .get(key)
            .or_else(|| map.values().find_map(|v| find_key(v, key))),
        serde_json::Value::Array(items) => items.iter().find_map(|v| find_key(v, key)),
        _ => None,
    }
}

/// String stored under `key` anywhere in a small document
pub fn extract_string(body: &[u8], key: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    find_key(&value, key)?.as_str().map(str::to_string)
}

/// Integer stored under `key` anywhere in a small document
pub fn extract_int(body: &[u8], key: &str) -> Option<i64> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    find_key(&value, key)?.as_i64()
}

/// Longest prefix of `s` within `max` bytes that ends on a char boundary
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
