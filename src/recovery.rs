// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Delivery recovery mechanisms
//!
//! Exponential backoff with jitter between delivery attempts, and the
//! rate-limit cooldown gate that makes `flush()` fail fast after a 429.
//! Everything is measured in platform ticks, never `std::time`, because
//! the engine is driven by the HAL clock.

use crate::config::ClientConfig;
use crate::timing;
use xxhash_rust::xxh32::xxh32;

/// Retry ceiling and delay bounds for one flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delivery attempts per flush (the first attempt included)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u32,
    /// Delay cap
    pub max_delay_ms: u32,
    /// Symmetric jitter, percent of the delay
    pub jitter_percent: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
            jitter_percent: 25,
        }
    }
}

impl RetryPolicy {
    /// Policy derived from client configuration
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay_ms: config.retry_base_ms,
            max_delay_ms: config.retry_max_ms.max(config.retry_base_ms),
            jitter_percent: config.jitter_percent.min(100),
        }
    }

    /// A policy that never retries
    pub fn single_attempt(&self) -> Self {
        Self {
            max_attempts: 1,
            ..*self
        }
    }

    /// Delay following `current`, doubling up to the cap
    pub fn next_delay(&self, current_ms: u32) -> u32 {
        current_ms.saturating_mul(2).min(self.max_delay_ms)
    }
}

/// Backoff state carried by the client between flushes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Backoff {
    /// Delay before the next retry; 0 means "start from the base"
    current_ms: u32,
}

impl Backoff {
    /// Fresh backoff state
    pub fn new() -> Self {
        Self::default()
    }

    /// Un-jittered delay for the next retry
    pub fn delay(&self, policy: &RetryPolicy) -> u32 {
        if self.current_ms == 0 {
            policy.base_delay_ms
        } else {
            self.current_ms
        }
    }

    /// Record that a retry waited; the next one waits longer
    pub fn advance(&mut self, policy: &RetryPolicy) {
        self.current_ms = policy.next_delay(self.delay(policy));
    }

    /// Back to the base delay after a delivery succeeds
    pub fn reset(&mut self) {
        self.current_ms = 0;
    }

    /// Raw state, 0 when reset
    pub fn current_ms(&self) -> u32 {
        self.current_ms
    }
}

/// Small xorshift generator spreading retries across a fleet
///
/// Seeded from the device identity and boot tick so devices that lost
/// connectivity together do not retry together.
#[derive(Debug, Clone)]
pub struct Jitter {
    state: u32,
}

impl Jitter {
    /// Seed from a device identifier and a tick value
    pub fn seeded(source_id: &str, tick: u32) -> Self {
        let seed = xxh32(source_id.as_bytes(), tick);
        Self {
            // xorshift is stuck at zero
            state: if seed == 0 { 0x9E37_79B9 } else { seed },
        }
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// `delay_ms` shifted uniformly within +/- `percent`
    pub fn apply(&mut self, delay_ms: u32, percent: u32) -> u32 {
        let span = (u64::from(delay_ms) * u64::from(percent.min(100)) / 100) as u32;
        if span == 0 {
            return delay_ms;
        }
        let offset = self.next_u32() % (span.saturating_mul(2).saturating_add(1));
        (delay_ms - span).saturating_add(offset)
    }
}

/// Rate-limit cooldown gate
///
/// Armed by a 429; while active, deliveries are refused without touching
/// the network. The deadline is compared wraparound-safe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cooldown {
    until: Option<u32>,
}

impl Cooldown {
    /// Inactive gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse deliveries for `duration_ms` from `now`
    pub fn arm(&mut self, now: u32, duration_ms: u32) {
        self.until = Some(timing::deadline_after(now, duration_ms));
    }

    /// True while the deadline lies ahead; clears itself once reached
    pub fn is_active(&mut self, now: u32) -> bool {
        match self.until {
            Some(deadline) if !timing::deadline_reached(now, deadline) => true,
            Some(_) => {
                self.until = None;
                false
            }
            None => false,
        }
    }

    /// Milliseconds left, 0 if inactive
    pub fn remaining(&self, now: u32) -> u32 {
        match self.until {
            Some(deadline) if !timing::deadline_reached(now, deadline) => {
                deadline.wrapping_sub(now)
            }
            _ => 0,
        }
    }

    /// Drop any pending deadline
    pub fn clear(&mut self) {
        self.until = None;
    }
}
