// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! In-memory HAL for host-side tests and simulations
//!
//! `MockHal` records every request, lets tests script transport outcomes,
//! and simulates time: `delay_ms` advances the tick counter so retry
//! backoff and cooldowns can be observed without sleeping.

use super::{Hal, HttpRequest};
use crate::error::{StorageError, TransportError};
use std::collections::{BTreeMap, VecDeque};

/// Default wall clock, mid-November 2023
pub const MOCK_EPOCH_MS: u64 = 1_700_000_000_000;

/// Empty command poll response
pub const EMPTY_POLL_RESPONSE: &str = r#"{"commands":[]}"#;

/// A request captured by [`MockHal`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Target URL
    pub url: String,
    /// API key header
    pub api_key: String,
    /// User-Agent header
    pub user_agent: String,
    /// Body (empty for GET)
    pub body: String,
}

impl RecordedRequest {
    fn from_post(request: &HttpRequest<'_>) -> Self {
        Self {
            url: request.url.to_string(),
            api_key: request.api_key.to_string(),
            user_agent: request.user_agent.to_string(),
            body: String::from_utf8_lossy(request.body).into_owned(),
        }
    }
}

/// In-memory HAL
#[derive(Debug)]
pub struct MockHal {
    tick: u32,
    time: u64,
    /// Outcome returned once the script is exhausted
    post_result: Result<(), TransportError>,
    /// One-shot outcomes consumed before `post_result`
    post_script: VecDeque<Result<(), TransportError>>,
    posts: Vec<RecordedRequest>,
    get_result: Result<(), TransportError>,
    get_response: Vec<u8>,
    gets: Vec<String>,
    post_response: Vec<u8>,
    delays: Vec<u32>,
    storage: BTreeMap<String, Vec<u8>>,
    storage_enabled: bool,
    fail_storage_writes: bool,
}

impl MockHal {
    /// Create a mock with tick 0, every request succeeding and storage enabled
    pub fn new() -> Self {
        Self {
            tick: 0,
            time: MOCK_EPOCH_MS,
            post_result: Ok(()),
            post_script: VecDeque::new(),
            posts: Vec::new(),
            get_result: Ok(()),
            get_response: EMPTY_POLL_RESPONSE.as_bytes().to_vec(),
            gets: Vec::new(),
            post_response: Vec::new(),
            delays: Vec::new(),
            storage: BTreeMap::new(),
            storage_enabled: true,
            fail_storage_writes: false,
        }
    }

    /// Create a mock whose tick counter starts at `tick`
    pub fn with_tick(tick: u32) -> Self {
        Self {
            tick,
            ..Self::new()
        }
    }

    /// Create a mock with no durable storage
    pub fn without_storage() -> Self {
        Self {
            storage_enabled: false,
            ..Self::new()
        }
    }

    // ------------------------------------------------------------------
    // Clock
    // ------------------------------------------------------------------

    /// Set the tick counter
    pub fn set_tick(&mut self, tick: u32) {
        self.tick = tick;
    }

    /// Advance the tick counter, wrapping at `u32::MAX`
    pub fn advance_tick(&mut self, delta_ms: u32) {
        self.tick = self.tick.wrapping_add(delta_ms);
    }

    /// Set the wall clock (0 simulates a board without RTC)
    pub fn set_time(&mut self, time_ms: u64) {
        self.time = time_ms;
    }

    /// Every `delay_ms` argument so far
    pub fn delays(&self) -> &[u32] {
        &self.delays
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    /// Outcome of every POST until changed
    pub fn set_post_result(&mut self, result: Result<(), TransportError>) {
        self.post_result = result;
    }

    /// Queue a one-shot POST outcome, used before the sticky one
    pub fn push_post_result(&mut self, result: Result<(), TransportError>) {
        self.post_script.push_back(result);
    }

    /// Number of POSTs made
    pub fn post_count(&self) -> usize {
        self.posts.len()
    }

    /// All recorded POSTs, oldest first
    pub fn posts(&self) -> &[RecordedRequest] {
        &self.posts
    }

    /// Most recent POST
    pub fn last_post(&self) -> Option<&RecordedRequest> {
        self.posts.last()
    }

    /// Body returned by `http_post_response`
    pub fn set_post_response(&mut self, body: &str) {
        self.post_response = body.as_bytes().to_vec();
    }

    /// Body and outcome of every GET until changed
    pub fn set_get_response(&mut self, result: Result<(), TransportError>, body: &str) {
        self.get_result = result;
        self.get_response = body.as_bytes().to_vec();
    }

    /// URLs of all GETs, oldest first
    pub fn gets(&self) -> &[String] {
        &self.gets
    }

    /// Forget recorded requests and delays, keeping configured outcomes
    pub fn clear_history(&mut self) {
        self.posts.clear();
        self.gets.clear();
        self.delays.clear();
    }

    // ------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------

    /// Raw stored value, bypassing the HAL trait
    pub fn stored(&self, key: &str) -> Option<&[u8]> {
        self.storage.get(key).map(Vec::as_slice)
    }

    /// Overwrite a stored value, bypassing the HAL trait
    pub fn put_stored(&mut self, key: &str, data: &[u8]) {
        self.storage.insert(key.to_string(), data.to_vec());
    }

    /// Number of stored keys
    pub fn stored_keys(&self) -> usize {
        self.storage.len()
    }

    /// Make every storage write fail
    pub fn set_fail_storage_writes(&mut self, fail: bool) {
        self.fail_storage_writes = fail;
    }

    fn next_post_result(&mut self) -> Result<(), TransportError> {
        self.post_script.pop_front().unwrap_or(self.post_result)
    }
}

impl Default for MockHal {
    fn default() -> Self {
        Self::new()
    }
}

impl Hal for MockHal {
    fn http_post(&mut self, request: &HttpRequest<'_>) -> Result<(), TransportError> {
        self.posts.push(RecordedRequest::from_post(request));
        self.next_post_result()
    }

    fn http_post_response(&mut self, request: &HttpRequest<'_>) -> Result<Vec<u8>, TransportError> {
        self.posts.push(RecordedRequest::from_post(request));
        self.next_post_result()?;
        Ok(self.post_response.clone())
    }

    fn http_get(
        &mut self,
        url: &str,
        api_key: &str,
        user_agent: &str,
    ) -> Result<Vec<u8>, TransportError> {
        let _ = (api_key, user_agent);
        self.gets.push(url.to_string());
        self.get_result?;
        Ok(self.get_response.clone())
    }

    fn tick_ms(&self) -> u32 {
        self.tick
    }

    fn time_ms(&self) -> u64 {
        self.time
    }

    fn delay_ms(&mut self, ms: u32) {
        self.delays.push(ms);
        self.advance_tick(ms);
    }

    fn storage_write(&mut self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        if !self.storage_enabled {
            return Err(StorageError::Unsupported);
        }
        if self.fail_storage_writes {
            return Err(StorageError::WriteFailed {
                key: key.to_string(),
            });
        }
        self.storage.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn storage_read(&mut self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        if !self.storage_enabled {
            return Ok(None);
        }
        Ok(self.storage.get(key).cloned())
    }

    fn storage_clear(&mut self, key: &str) -> Result<(), StorageError> {
        if !self.storage_enabled {
            return Err(StorageError::Unsupported);
        }
        self.storage.remove(key);
        Ok(())
    }
}
