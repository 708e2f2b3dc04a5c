// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Heartbeat: identity, lifetime counters and capabilities
//!
//! Sent to `POST <base>/api/heartbeat` on its own interval, independent of
//! metric traffic, so the server can show a device as alive even when it
//! has nothing to report. Registered typed command schemas ride along.

use crate::client::{api_base, Client, SDK_TAG, USER_AGENT};
use crate::codec::{self, HeartbeatBody, SensorEntry};
use crate::config::{MAX_METADATA_LEN, MAX_REGISTERED_METRICS};
use crate::error::{InputError, Result};
use crate::hal::{Hal, HttpRequest};
use crate::metric::validate_name;
use crate::timing;

/// Heartbeat URL for an endpoint
pub fn heartbeat_url(endpoint: &str) -> String {
    format!("{}/api/heartbeat", api_base(endpoint))
}

impl<H: Hal> Client<H> {
    /// Announce a metric name in heartbeats; duplicates are ignored
    pub fn register_metric(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        if self.registered_metrics.iter().any(|m| m == name) {
            return Ok(());
        }
        if self.registered_metrics.len() >= MAX_REGISTERED_METRICS {
            return Err(InputError::QueueFull {
                capacity: MAX_REGISTERED_METRICS,
            }
            .into());
        }
        self.registered_metrics.push(name.to_string());
        Ok(())
    }

    /// Metric names announced in heartbeats
    pub fn registered_metrics(&self) -> &[String] {
        &self.registered_metrics
    }

    /// Set the board type and firmware version reported in heartbeats
    pub fn set_device_info(&mut self, device_type: &str, firmware_version: &str) {
        self.device.device_type = metadata(device_type);
        self.device.firmware_version = metadata(firmware_version);
    }

    /// Send one heartbeat
    pub fn heartbeat(&mut self) -> Result<()> {
        let now = self.hal.tick_ms();
        let sensors: Vec<SensorEntry<'_>> = self
            .sensors
            .active_descriptors()
            .map(|d| SensorEntry {
                name: d.name,
                description: d.description,
                metrics: d.metrics,
                sample_rate: d.sample_rate_hz,
            })
            .collect();
        let body = HeartbeatBody {
            sdk: SDK_TAG,
            source_id: &self.source_id,
            device_type: self.device.device_type.as_deref(),
            firmware_version: self.device.firmware_version.as_deref(),
            uptime_ms: timing::elapsed(now, self.boot_tick),
            total_sent: self.total_sent,
            total_errors: self.total_errors,
            metrics: &self.registered_metrics,
            sensors,
            commands: &self.typed_commands,
        };
        let mut buf = Vec::new();
        codec::encode_bounded(&body, &mut buf, self.config.json_buffer_size)?;

        let url = heartbeat_url(&self.config.endpoint);
        self.hal.http_post(&HttpRequest {
            url: &url,
            api_key: &self.api_key,
            user_agent: USER_AGENT,
            body: &buf,
        })?;
        log::debug!("Heartbeat sent ({} bytes)", buf.len());
        Ok(())
    }
}

/// Optional metadata string, truncated to fit
pub(crate) fn metadata(value: &str) -> Option<String> {
    let value = codec::truncate_utf8(value, MAX_METADATA_LEN - 1);
    (!value.is_empty()).then(|| value.to_string())
}
