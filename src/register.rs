// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Device registration
//!
//! One-time exchange with `POST <base>/api/sources/register`. The server
//! may assign a different source id; whichever id results is written to
//! durable storage and adopted again on the next boot.

use crate::client::{api_base, Client, USER_AGENT};
use crate::codec::{self, RegisterBody};
use crate::config::MAX_SOURCE_ID_LEN;
use crate::error::{Result, TransportError};
use crate::hal::{Hal, HttpRequest};
use crate::heartbeat::metadata;
use crate::metric::is_url_safe;

/// Storage key holding the registered source id
pub const SOURCE_ID_KEY: &str = "plexus_sid";

/// Registration URL for an endpoint
pub fn register_url(endpoint: &str) -> String {
    format!("{}/api/sources/register", api_base(endpoint))
}

/// Hostname and platform reported at registration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Board or product type
    pub device_type: Option<String>,
    /// Firmware version
    pub firmware_version: Option<String>,
    /// Network hostname
    pub hostname: Option<String>,
    /// Platform name, e.g. "esp32"
    pub platform: Option<String>,
}

/// Read a previously registered source id, if one is stored and valid
pub(crate) fn load_source_id<H: Hal>(hal: &mut H) -> Option<String> {
    let raw = match hal.storage_read(SOURCE_ID_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            log::debug!("No stored source id: {}", e);
            return None;
        }
    };
    let id = String::from_utf8(raw).ok()?;
    if is_url_safe(&id) && id.len() < MAX_SOURCE_ID_LEN {
        Some(id)
    } else {
        log::warn!("Ignoring stored source id {:?}", id);
        None
    }
}

impl<H: Hal> Client<H> {
    /// Set hostname and platform sent with registration
    pub fn set_device_identity(&mut self, hostname: &str, platform: &str) {
        self.device.hostname = metadata(hostname);
        self.device.platform = metadata(platform);
    }

    /// True once the device registered, now or on a previous boot
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Register this device; a no-op once registered
    pub fn register_device(&mut self) -> Result<()> {
        if self.registered {
            return Ok(());
        }
        let body = RegisterBody {
            name: &self.source_id,
            hostname: self.device.hostname.as_deref(),
            platform: self.device.platform.as_deref(),
        };
        let mut buf = Vec::new();
        codec::encode_bounded(&body, &mut buf, self.config.json_buffer_size)?;

        let url = register_url(&self.config.endpoint);
        let response = self.hal.http_post_response(&HttpRequest {
            url: &url,
            api_key: &self.api_key,
            user_agent: USER_AGENT,
            body: &buf,
        })?;
        if response.is_empty() {
            return Err(TransportError::Network.into());
        }

        match codec::parse_register_response(&response) {
            Ok(Some(id)) if is_url_safe(&id) && id.len() < MAX_SOURCE_ID_LEN => {
                if id != self.source_id {
                    log::info!("Server assigned source id {}", id);
                    self.source_id = id;
                }
            }
            Ok(Some(id)) => log::warn!("Ignoring unsafe source id {:?}", id),
            Ok(None) => {}
            Err(e) => log::warn!("Registration response not understood: {}", e),
        }

        if let Err(e) = self.hal.storage_write(SOURCE_ID_KEY, self.source_id.as_bytes()) {
            log::debug!("Source id not persisted: {}", e);
        }
        self.registered = true;
        log::info!("Registered as {}", self.source_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlexusError;
    use crate::hal::MockHal;

    fn client(hal: MockHal) -> Client<MockHal> {
        Client::new(hal, "key", "dev-001").unwrap()
    }

    #[test]
    fn test_register_adopts_server_id() {
        let mut c = client(MockHal::new());
        c.set_device_identity("greenhouse-1", "esp32");
        c.hal_mut().set_post_response(r#"{"source_id":"gh-0042","status":"ok"}"#);

        assert!(!c.is_registered());
        c.register_device().unwrap();
        assert!(c.is_registered());
        assert_eq!(c.source_id(), "gh-0042");
        assert_eq!(c.hal().stored(SOURCE_ID_KEY), Some(&b"gh-0042"[..]));

        let post = c.hal().last_post().unwrap();
        assert_eq!(post.url, "https://app.plexus.company/api/sources/register");
        assert_eq!(
            post.body,
            r#"{"name":"dev-001","hostname":"greenhouse-1","platform":"esp32"}"#
        );

        // second call does nothing
        c.register_device().unwrap();
        assert_eq!(c.hal().post_count(), 1);
    }

    #[test]
    fn test_register_rejects_unsafe_server_id() {
        let mut c = client(MockHal::new());
        c.hal_mut().set_post_response(r#"{"source_id":"../other"}"#);
        c.register_device().unwrap();
        assert_eq!(c.source_id(), "dev-001");
    }

    #[test]
    fn test_empty_response_is_network_error() {
        let mut c = client(MockHal::new());
        assert!(matches!(
            c.register_device(),
            Err(PlexusError::Transport(TransportError::Network))
        ));
        assert!(!c.is_registered());
    }

    #[test]
    fn test_stored_id_adopted_at_boot() {
        let mut hal = MockHal::new();
        hal.put_stored(SOURCE_ID_KEY, b"gh-0042");
        let c = client(hal);
        assert!(c.is_registered());
        assert_eq!(c.source_id(), "gh-0042");

        let mut hal = MockHal::new();
        hal.put_stored(SOURCE_ID_KEY, b"bad/id");
        let c = client(hal);
        assert!(!c.is_registered());
        assert_eq!(c.source_id(), "dev-001");
    }

    #[test]
    fn test_register_without_storage() {
        let mut c = client(MockHal::without_storage());
        c.hal_mut().set_post_response(r#"{"status":"ok"}"#);
        c.register_device().unwrap();
        assert!(c.is_registered());
    }
}
