// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Telemetry client
//!
//! [`Client`] owns the HAL, the metric queue and all delivery state. Every
//! operation is synchronous: `flush()` blocks through its retry backoff
//! via [`Hal::delay_ms`], and `tick()` is the single scheduler entry point
//! a firmware main loop calls.
//!
//! # Flush sequence
//!
//! 1. Fail fast while a rate-limit cooldown is active.
//! 2. Drain persisted batches oldest first, one attempt each.
//! 3. Return [`PlexusError::NoData`] if the live queue is empty.
//! 4. Serialize the live queue once.
//! 5. Deliver with exponential backoff and jitter between attempts.
//! 6. Classify the outcome: clear on success, keep on auth or rate-limit,
//!    persist on exhausted retries.
//!
//! Every flush that gets past step 1 restarts the flush interval, so a
//! rejected backlog or an unencodable queue is retried once per interval
//! rather than on every tick.

use crate::codec::{self, BatchContext};
use crate::commands::{CommandHandler, CommandState};
use crate::config::{
    ClientConfig, MAX_API_KEY_LEN, MAX_ENDPOINT_LEN, MAX_METRICS, MAX_SESSION_ID_LEN,
    MAX_SOURCE_ID_LEN,
};
use crate::error::{InputError, PlexusError, Result, TransportError};
use crate::hal::{Hal, HttpRequest};
use crate::metric::{validate_identifier, Metric, MetricQueue, MetricValue};
use crate::persist::PersistentRing;
use crate::recovery::{Backoff, Cooldown, Jitter, RetryPolicy};
use crate::register::{load_source_id, DeviceInfo};
use crate::sensors::SensorRegistry;
use crate::status::{ConnectionStatus, StatusListener, StatusTracker};
use crate::timing;
use crate::typed::TypedCommand;

/// SDK identifier carried in every batch and heartbeat
pub const SDK_TAG: &str = concat!("rust/", env!("CARGO_PKG_VERSION"));

/// User-Agent header value
pub const USER_AGENT: &str = concat!("plexus-rust-sdk/", env!("CARGO_PKG_VERSION"));

/// Base URL of the API, derived from the ingest endpoint
///
/// Everything from `/api/ingest` on is cut; otherwise trailing slashes are
/// stripped.
pub fn api_base(endpoint: &str) -> &str {
    match endpoint.find("/api/ingest") {
        Some(pos) => &endpoint[..pos],
        None => endpoint.trim_end_matches('/'),
    }
}

/// Embedded telemetry client
pub struct Client<H: Hal> {
    pub(crate) hal: H,
    pub(crate) config: ClientConfig,
    pub(crate) api_key: String,
    pub(crate) source_id: String,
    session_id: Option<String>,

    queue: MetricQueue,
    scratch: Vec<u8>,

    policy: RetryPolicy,
    backoff: Backoff,
    jitter: Jitter,
    cooldown: Cooldown,
    ring: Option<PersistentRing>,

    pub(crate) total_sent: u32,
    pub(crate) total_errors: u32,
    pub(crate) boot_tick: u32,
    last_flush: u32,
    last_heartbeat: u32,
    last_command_poll: u32,

    status: StatusTracker,
    pub(crate) command_handler: Option<Box<dyn CommandHandler + Send>>,
    pub(crate) command_state: CommandState,

    pub(crate) device: DeviceInfo,
    pub(crate) registered_metrics: Vec<String>,
    pub(crate) registered: bool,
    pub(crate) sensors: SensorRegistry,
    pub(crate) typed_commands: Vec<TypedCommand>,
}

impl<H: Hal> Client<H> {
    /// Create a client with the default configuration
    pub fn new(hal: H, api_key: &str, source_id: &str) -> Result<Self> {
        Self::with_config(hal, api_key, source_id, ClientConfig::default())
    }

    /// Create a client with an explicit configuration
    ///
    /// A source id stored by an earlier registration takes precedence over
    /// `source_id`.
    pub fn with_config(
        mut hal: H,
        api_key: &str,
        source_id: &str,
        config: ClientConfig,
    ) -> Result<Self> {
        if api_key.is_empty() || api_key.len() >= MAX_API_KEY_LEN {
            return Err(InputError::InvalidArgument("api key".into()).into());
        }
        validate_identifier(source_id, MAX_SOURCE_ID_LEN)?;
        validate_endpoint(&config.endpoint)?;

        let now = hal.tick_ms();
        let (source_id, registered) = match load_source_id(&mut hal) {
            Some(stored) => (stored, true),
            None => (source_id.to_string(), false),
        };
        let ring = if config.persistent_buffer {
            let ring = PersistentRing::load(&mut hal, config.persist_slots);
            if !ring.is_empty() {
                log::info!("Restored {} undelivered batch(es)", ring.len());
            }
            Some(ring)
        } else {
            None
        };

        log::info!("Plexus client {} ready, endpoint {}", source_id, config.endpoint);
        Ok(Self {
            policy: RetryPolicy::from_config(&config),
            jitter: Jitter::seeded(&source_id, now),
            scratch: Vec::with_capacity(config.json_buffer_size),
            hal,
            api_key: api_key.to_string(),
            source_id,
            session_id: None,
            queue: MetricQueue::with_capacity(MAX_METRICS),
            backoff: Backoff::new(),
            cooldown: Cooldown::new(),
            ring,
            total_sent: 0,
            total_errors: 0,
            boot_tick: now,
            last_flush: now,
            last_heartbeat: now,
            last_command_poll: now,
            status: StatusTracker::new(),
            command_handler: None,
            command_state: CommandState::Idle,
            device: DeviceInfo::default(),
            registered_metrics: Vec::new(),
            registered,
            sensors: SensorRegistry::new(),
            typed_commands: Vec::new(),
            config,
        })
    }

    // ========================================================================
    // Enqueue
    // ========================================================================

    /// Queue a number stamped with the current wall clock
    pub fn enqueue_number(&mut self, name: &str, value: f64) -> Result<()> {
        self.enqueue(Metric::new(name, MetricValue::Number(value), 0)?)
    }

    /// Queue a number with an explicit timestamp (ms since the epoch)
    pub fn enqueue_number_at(&mut self, name: &str, value: f64, timestamp_ms: u64) -> Result<()> {
        self.enqueue(Metric::new(name, MetricValue::Number(value), timestamp_ms)?)
    }

    /// Queue a string
    pub fn enqueue_string(&mut self, name: &str, value: &str) -> Result<()> {
        self.enqueue(Metric::new(name, MetricValue::from(value), 0)?)
    }

    /// Queue a boolean
    pub fn enqueue_bool(&mut self, name: &str, value: bool) -> Result<()> {
        self.enqueue(Metric::new(name, MetricValue::Bool(value), 0)?)
    }

    /// Queue a number with tags
    pub fn enqueue_tagged(&mut self, name: &str, value: f64, tags: &[(&str, &str)]) -> Result<()> {
        self.enqueue(Metric::new(name, MetricValue::Number(value), 0)?.with_tags(tags)?)
    }

    /// Queue a prepared metric
    ///
    /// Reaching the flush count triggers one single-attempt flush. Its
    /// failure is logged, not returned: the metric is queued either way.
    pub fn enqueue(&mut self, mut metric: Metric) -> Result<()> {
        if metric.timestamp_ms == 0 {
            metric.timestamp_ms = self.hal.time_ms();
        }
        self.queue.push(metric)?;

        let threshold = self.config.effective_flush_count();
        if threshold > 0 && self.queue.len() >= threshold {
            let policy = self.policy.single_attempt();
            if let Err(e) = self.flush_with(&policy) {
                log::warn!("Auto-flush failed: {}", e);
            }
        }
        Ok(())
    }

    /// Number of queued metrics
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Drop all queued metrics
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    // ========================================================================
    // Flush engine
    // ========================================================================

    /// Deliver the backlog and the live queue
    pub fn flush(&mut self) -> Result<()> {
        let policy = self.policy;
        self.flush_with(&policy)
    }

    fn flush_with(&mut self, policy: &RetryPolicy) -> Result<()> {
        let now = self.hal.tick_ms();
        if self.cooldown.is_active(now) {
            log::debug!("Rate limited, {} ms left", self.cooldown.remaining(now));
            return Err(TransportError::RateLimited.into());
        }

        let outcome = self.run_flush(policy);
        // paces the scheduler, whichever way the flush ended
        self.last_flush = self.hal.tick_ms();
        outcome
    }

    fn run_flush(&mut self, policy: &RetryPolicy) -> Result<()> {
        self.drain_backlog()?;

        if self.queue.is_empty() {
            return Err(PlexusError::NoData);
        }

        let ctx = BatchContext {
            sdk: SDK_TAG,
            source_id: &self.source_id,
            session_id: self.session_id.as_deref(),
        };
        if let Err(e) = codec::serialize_batch(
            &ctx,
            self.queue.as_slice(),
            &mut self.scratch,
            self.config.json_buffer_size,
        ) {
            self.total_errors = self.total_errors.wrapping_add(1);
            log::error!("Batch of {} metrics not serializable: {}", self.queue.len(), e);
            return Err(e.into());
        }

        let body = std::mem::take(&mut self.scratch);
        let result = self.deliver(&body, policy);
        let outcome = self.settle(result, &body);
        self.scratch = body;
        outcome
    }

    /// Post `body` to the ingest endpoint, retrying retryable failures
    fn deliver(&mut self, body: &[u8], policy: &RetryPolicy) -> std::result::Result<(), TransportError> {
        let mut last = TransportError::Network;
        for attempt in 0..policy.max_attempts {
            if attempt > 0 {
                let delay = self.jitter.apply(self.backoff.delay(policy), policy.jitter_percent);
                log::debug!("Retry {}/{} in {} ms", attempt, policy.max_attempts - 1, delay);
                self.hal.delay_ms(delay);
                self.backoff.advance(policy);
            }
            match self.post_ingest(body) {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    log::warn!("Delivery attempt {} failed: {}", attempt + 1, e);
                    last = e;
                }
            }
        }
        Err(last)
    }

    /// Apply a live-batch delivery outcome to queue, counters and status
    fn settle(&mut self, result: std::result::Result<(), TransportError>, body: &[u8]) -> Result<()> {
        let now = self.hal.tick_ms();
        let err = match result {
            Ok(()) => {
                let count = self.queue.len();
                self.total_sent = self.total_sent.wrapping_add(count as u32);
                self.queue.clear();
                self.backoff.reset();
                self.status.set(ConnectionStatus::Connected);
                log::debug!("Delivered {} metrics ({} bytes)", count, body.len());
                return Ok(());
            }
            Err(e) => e,
        };

        self.total_errors = self.total_errors.wrapping_add(1);
        if err == TransportError::RateLimited {
            self.cooldown.arm(now, self.config.rate_limit_cooldown_ms);
            self.status.set(ConnectionStatus::RateLimited);
            log::warn!("Rate limited, backing off {} ms", self.config.rate_limit_cooldown_ms);
        } else if err.is_auth() {
            self.status.set(ConnectionStatus::AuthFailed);
            log::error!("Delivery rejected: {}", err);
        } else {
            self.status.set(ConnectionStatus::Disconnected);
            self.persist_batch(body);
        }
        Err(err.into())
    }

    /// Hand an undeliverable batch to the ring; keep the queue if that fails
    fn persist_batch(&mut self, body: &[u8]) {
        let Some(ring) = self.ring.as_mut() else {
            return;
        };
        match ring.push(&mut self.hal, body) {
            Ok(()) => {
                log::info!(
                    "Persisted {} metrics for later delivery ({} batch(es) pending)",
                    self.queue.len(),
                    ring.len()
                );
                self.queue.clear();
            }
            Err(e) => log::warn!("Batch not persisted, keeping it queued: {}", e),
        }
    }

    /// Deliver persisted batches oldest first
    ///
    /// Stops at the first failure so ordering is kept. Auth and rate-limit
    /// failures end the whole flush; anything else lets the live batch
    /// have its turn.
    fn drain_backlog(&mut self) -> Result<()> {
        loop {
            let Some(ring) = self.ring.as_mut() else {
                return Ok(());
            };
            let batch = match ring.peek_oldest(&mut self.hal) {
                Ok(Some(batch)) => batch,
                Ok(None) => return Ok(()),
                Err(e) => {
                    log::warn!("Backlog unreadable: {}", e);
                    return Ok(());
                }
            };

            match self.post_ingest(&batch) {
                Ok(()) => {
                    self.status.set(ConnectionStatus::Connected);
                    if let Some(ring) = self.ring.as_mut() {
                        if let Err(e) = ring.confirm_oldest(&mut self.hal) {
                            log::warn!("Delivered batch not released: {}", e);
                            return Ok(());
                        }
                        log::debug!("Backlog batch delivered, {} left", ring.len());
                    }
                }
                Err(TransportError::RateLimited) => {
                    let now = self.hal.tick_ms();
                    self.cooldown.arm(now, self.config.rate_limit_cooldown_ms);
                    self.total_errors = self.total_errors.wrapping_add(1);
                    self.status.set(ConnectionStatus::RateLimited);
                    return Err(TransportError::RateLimited.into());
                }
                Err(e) if e.is_auth() => {
                    self.total_errors = self.total_errors.wrapping_add(1);
                    self.status.set(ConnectionStatus::AuthFailed);
                    return Err(e.into());
                }
                Err(e) => {
                    log::debug!("Backlog drain stopped: {}", e);
                    return Ok(());
                }
            }
        }
    }

    fn post_ingest(&mut self, body: &[u8]) -> std::result::Result<(), TransportError> {
        self.hal.http_post(&HttpRequest {
            url: &self.config.endpoint,
            api_key: &self.api_key,
            user_agent: USER_AGENT,
            body,
        })
    }

    // ========================================================================
    // Scheduler
    // ========================================================================

    /// Run whatever is due: command poll, interval flush, heartbeat
    ///
    /// Only a triggered flush's failure is returned.
    pub fn tick(&mut self) -> Result<()> {
        let now = self.hal.tick_ms();
        if self.command_handler.is_some()
            && timing::interval_elapsed(now, self.last_command_poll, self.config.command_poll_interval_ms)
        {
            self.last_command_poll = now;
            if let Err(e) = self.poll_commands() {
                log::debug!("Command poll failed: {}", e);
            }
        }

        let mut result = Ok(());
        let now = self.hal.tick_ms();
        if !self.queue.is_empty()
            && timing::interval_elapsed(now, self.last_flush, self.config.flush_interval_ms)
        {
            result = self.flush();
        }

        let now = self.hal.tick_ms();
        if timing::interval_elapsed(now, self.last_heartbeat, self.config.heartbeat_interval_ms) {
            self.last_heartbeat = now;
            if let Err(e) = self.heartbeat() {
                log::debug!("Heartbeat failed: {}", e);
            }
        }
        result
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Point the client at another ingest endpoint
    pub fn set_endpoint(&mut self, endpoint: &str) -> Result<()> {
        validate_endpoint(endpoint)?;
        self.config.endpoint = endpoint.to_string();
        Ok(())
    }

    /// Change the time-based flush interval; 0 disables it
    pub fn set_flush_interval(&mut self, interval_ms: u32) {
        self.config.flush_interval_ms = interval_ms;
    }

    /// Change the count threshold; 0 disables it, values above capacity are clamped
    pub fn set_flush_count(&mut self, count: usize) {
        self.config.flush_count = count.min(MAX_METRICS);
    }

    /// Active configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Tag subsequent points with a recording session id
    pub fn session_start(&mut self, session_id: &str) -> Result<()> {
        validate_identifier(session_id, MAX_SESSION_ID_LEN)?;
        log::info!("Session {} started", session_id);
        self.session_id = Some(session_id.to_string());
        Ok(())
    }

    /// Stop tagging points
    pub fn session_end(&mut self) {
        if let Some(id) = self.session_id.take() {
            log::info!("Session {} ended", id);
        }
    }

    /// Active session id
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    // ========================================================================
    // Status and accessors
    // ========================================================================

    /// Connection status after the last delivery
    pub fn status(&self) -> ConnectionStatus {
        self.status.status()
    }

    /// Notify `listener` of status transitions
    pub fn set_status_listener<L>(&mut self, listener: L)
    where
        L: StatusListener + Send + 'static,
    {
        self.status.set_listener(Some(Box::new(listener)));
    }

    /// Remove the status listener
    pub fn clear_status_listener(&mut self) {
        self.status.set_listener(None);
    }

    /// Points delivered from the live queue
    pub fn total_sent(&self) -> u32 {
        self.total_sent
    }

    /// Failed flushes
    pub fn total_errors(&self) -> u32 {
        self.total_errors
    }

    /// Batches waiting in the persistent ring
    pub fn persisted_batches(&self) -> usize {
        self.ring.as_ref().map_or(0, PersistentRing::len)
    }

    /// True while a rate-limit cooldown is pending
    pub fn is_rate_limited(&self) -> bool {
        self.cooldown.remaining(self.hal.tick_ms()) > 0
    }

    /// Device identifier
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Ingest endpoint
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    /// The platform layer
    pub fn hal(&self) -> &H {
        &self.hal
    }

    /// The platform layer, mutably
    pub fn hal_mut(&mut self) -> &mut H {
        &mut self.hal
    }

    /// Give the platform layer back, dropping anything queued
    pub fn into_hal(self) -> H {
        self.hal
    }
}

impl<H: Hal> std::fmt::Debug for Client<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("source_id", &self.source_id)
            .field("endpoint", &self.config.endpoint)
            .field("pending", &self.queue.len())
            .field("status", &self.status.status())
            .field("total_sent", &self.total_sent)
            .field("total_errors", &self.total_errors)
            .finish_non_exhaustive()
    }
}

fn validate_endpoint(endpoint: &str) -> std::result::Result<(), InputError> {
    if endpoint.is_empty() || endpoint.len() >= MAX_ENDPOINT_LEN {
        return Err(InputError::InvalidArgument(format!(
            "endpoint must be 1..{} bytes",
            MAX_ENDPOINT_LEN
        )));
    }
    Ok(())
}
