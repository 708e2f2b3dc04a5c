// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Hardware abstraction layer
//!
//! The client never touches a network stack, clock or flash driver
//! directly. A platform provides one [`Hal`] implementation and hands it to
//! [`Client::new`](crate::Client::new); everything else is built on top of
//! these primitives.
//!
//! Only `http_post`, `tick_ms` and `delay_ms` are mandatory. The other
//! primitives have defaults that report the feature as unavailable, so a
//! board without flash or without an HTTP GET still links.

pub mod mock;

pub use mock::MockHal;

use crate::error::{StorageError, TransportError};

/// An outbound HTTP POST
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpRequest<'a> {
    /// Absolute URL
    pub url: &'a str,
    /// Sent as the `x-api-key` header
    pub api_key: &'a str,
    /// Sent as the `User-Agent` header
    pub user_agent: &'a str,
    /// JSON body
    pub body: &'a [u8],
}

/// Platform primitives consumed by the client
///
/// Transport methods must translate HTTP status codes with
/// [`TransportError::from_status`] so the retry engine can tell
/// retryable failures from fatal ones. `delay_ms` must actually block (or
/// yield, on a preemptive scheduler) for the requested time.
pub trait Hal {
    /// POST a body, discarding the response
    fn http_post(&mut self, request: &HttpRequest<'_>) -> Result<(), TransportError>;

    /// POST a body and return the response body
    fn http_post_response(&mut self, request: &HttpRequest<'_>) -> Result<Vec<u8>, TransportError> {
        let _ = request;
        Err(TransportError::Unsupported)
    }

    /// GET a URL and return the response body
    fn http_get(
        &mut self,
        url: &str,
        api_key: &str,
        user_agent: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let _ = (url, api_key, user_agent);
        Err(TransportError::Unsupported)
    }

    /// Monotonic millisecond counter; wraps at `u32::MAX`
    fn tick_ms(&self) -> u32;

    /// Wall-clock milliseconds since the Unix epoch, or 0 if unknown
    fn time_ms(&self) -> u64 {
        0
    }

    /// Block or yield for `ms` milliseconds
    fn delay_ms(&mut self, ms: u32);

    /// Durably store `data` under `key`, replacing any previous value
    fn storage_write(&mut self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let _ = (key, data);
        Err(StorageError::Unsupported)
    }

    /// Read the value under `key`; a missing key is `Ok(None)`
    fn storage_read(&mut self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let _ = key;
        Ok(None)
    }

    /// Remove `key`; removing a missing key succeeds
    fn storage_clear(&mut self, key: &str) -> Result<(), StorageError> {
        let _ = key;
        Err(StorageError::Unsupported)
    }
}

impl<H: Hal + ?Sized> Hal for &mut H {
    fn http_post(&mut self, request: &HttpRequest<'_>) -> Result<(), TransportError> {
        (**self).http_post(request)
    }

    fn http_post_response(&mut self, request: &HttpRequest<'_>) -> Result<Vec<u8>, TransportError> {
        (**self).http_post_response(request)
    }

    fn http_get(
        &mut self,
        url: &str,
        api_key: &str,
        user_agent: &str,
    ) -> Result<Vec<u8>, TransportError> {
        (**self).http_get(url, api_key, user_agent)
    }

    fn tick_ms(&self) -> u32 {
        (**self).tick_ms()
    }

    fn time_ms(&self) -> u64 {
        (**self).time_ms()
    }

    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }

    fn storage_write(&mut self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        (**self).storage_write(key, data)
    }

    fn storage_read(&mut self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).storage_read(key)
    }

    fn storage_clear(&mut self, key: &str) -> Result<(), StorageError> {
        (**self).storage_clear(key)
    }
}
