// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Metric records and the fixed-capacity metric queue
//!
//! Names are restricted to printable ASCII so nothing a producer passes
//! can alter the structure of the outbound document. Identifiers that end
//! up inside URLs (source, session, command ids) follow the stricter
//! URL-safe rule in [`validate_identifier`].

use crate::config::{MAX_METRICS, MAX_METRIC_NAME_LEN, MAX_STRING_VALUE_LEN, MAX_TAGS, MAX_TAG_LEN};
use crate::error::InputError;

/// A typed metric value
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    /// Numeric reading; NaN and infinities are sent as `null`
    Number(f64),
    /// Short text value
    String(String),
    /// Boolean flag
    Bool(bool),
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

/// A single key/value tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Tag key
    pub key: String,
    /// Tag value
    pub value: String,
}

impl Tag {
    /// Validate and build a tag
    pub fn new(key: &str, value: &str) -> Result<Self, InputError> {
        validate_printable(key, MAX_TAG_LEN)?;
        check_len(value, MAX_TAG_LEN)?;
        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// One queued reading
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    /// Metric name
    pub name: String,
    /// Value
    pub value: MetricValue,
    /// Milliseconds since the Unix epoch; 0 lets the server stamp it
    pub timestamp_ms: u64,
    /// Tags, at most [`MAX_TAGS`]
    pub tags: Vec<Tag>,
}

impl Metric {
    /// Validate and build a metric
    pub fn new(name: &str, value: MetricValue, timestamp_ms: u64) -> Result<Self, InputError> {
        validate_name(name)?;
        if let MetricValue::String(s) = &value {
            check_len(s, MAX_STRING_VALUE_LEN)?;
        }
        Ok(Self {
            name: name.to_string(),
            value,
            timestamp_ms,
            tags: Vec::new(),
        })
    }

    /// Attach tags, replacing any existing ones
    pub fn with_tags(mut self, tags: &[(&str, &str)]) -> Result<Self, InputError> {
        if tags.len() > MAX_TAGS {
            return Err(InputError::TooManyTags {
                count: tags.len(),
                max: MAX_TAGS,
            });
        }
        self.tags = tags
            .iter()
            .map(|(k, v)| Tag::new(k, v))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self)
    }
}

/// Validate a metric name: non-empty printable ASCII below the length bound
pub fn validate_name(name: &str) -> Result<(), InputError> {
    validate_printable(name, MAX_METRIC_NAME_LEN)
}

fn validate_printable(name: &str, max: usize) -> Result<(), InputError> {
    if name.is_empty() || !name.bytes().all(|b| (0x20..=0x7E).contains(&b)) {
        return Err(InputError::InvalidName);
    }
    if name.len() >= max {
        return Err(InputError::NameTooLong {
            len: name.len(),
            max: max - 1,
        });
    }
    Ok(())
}

fn check_len(s: &str, max: usize) -> Result<(), InputError> {
    if s.len() >= max {
        return Err(InputError::StringTooLong {
            len: s.len(),
            max: max - 1,
        });
    }
    Ok(())
}

/// True for non-empty `[A-Za-z0-9._-]` strings not starting with `.`
pub fn is_url_safe(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// Validate an identifier that will be embedded in a URL
pub fn validate_identifier(id: &str, max_len: usize) -> Result<(), InputError> {
    if id.len() >= max_len || !is_url_safe(id) {
        return Err(InputError::InvalidIdentifier(id.to_string()));
    }
    Ok(())
}

/// Fixed-capacity ordered metric queue
///
/// Overflow is rejected, never overwritten. Storage is reserved up front
/// so steady-state operation does not grow the allocation.
#[derive(Debug, Clone)]
pub struct MetricQueue {
    metrics: Vec<Metric>,
    capacity: usize,
}

impl MetricQueue {
    /// Queue with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(MAX_METRICS)
    }

    /// Queue holding at most `capacity` metrics
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            metrics: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a metric, O(1)
    pub fn push(&mut self, metric: Metric) -> Result<(), InputError> {
        if self.metrics.len() >= self.capacity {
            return Err(InputError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.metrics.push(metric);
        Ok(())
    }

    /// Queued metrics, oldest first
    pub fn as_slice(&self) -> &[Metric] {
        &self.metrics
    }

    /// Iterate oldest first
    pub fn iter(&self) -> std::slice::Iter<'_, Metric> {
        self.metrics.iter()
    }

    /// Number of queued metrics
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// True if nothing is queued
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// True if no more metrics fit
    pub fn is_full(&self) -> bool {
        self.metrics.len() >= self.capacity
    }

    /// Maximum number of metrics
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.metrics.clear();
    }
}

impl Default for MetricQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> IntoIterator for &'a MetricQueue {
    type Item = &'a Metric;
    type IntoIter = std::slice::Iter<'a, Metric>;

    fn into_iter(self) -> Self::IntoIter {
        self.metrics.iter()
    }
}
