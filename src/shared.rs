// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Thread-shareable client handle
//!
//! One mutex around the whole client: each call holds it for its full
//! duration, including any retry backoff inside a flush. A
//! threshold-triggered flush runs inside the enqueue that caused it, so it
//! needs no second acquisition.

use crate::client::Client;
use crate::error::Result;
use crate::hal::Hal;
use crate::status::ConnectionStatus;
use std::sync::{Arc, Mutex, MutexGuard};

/// Cloneable handle to a client shared between threads
pub struct SharedClient<H: Hal> {
    inner: Arc<Mutex<Client<H>>>,
}

impl<H: Hal> Clone for SharedClient<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: Hal> SharedClient<H> {
    /// Wrap a client
    pub fn new(client: Client<H>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(client)),
        }
    }

    /// Lock the client
    ///
    /// A panic in another holder does not invalidate client state, so a
    /// poisoned lock is taken over.
    pub fn lock(&self) -> MutexGuard<'_, Client<H>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` with the client locked
    pub fn with<R>(&self, f: impl FnOnce(&mut Client<H>) -> R) -> R {
        f(&mut self.lock())
    }

    /// See [`Client::enqueue_number`]
    pub fn enqueue_number(&self, name: &str, value: f64) -> Result<()> {
        self.lock().enqueue_number(name, value)
    }

    /// See [`Client::enqueue_string`]
    pub fn enqueue_string(&self, name: &str, value: &str) -> Result<()> {
        self.lock().enqueue_string(name, value)
    }

    /// See [`Client::enqueue_bool`]
    pub fn enqueue_bool(&self, name: &str, value: bool) -> Result<()> {
        self.lock().enqueue_bool(name, value)
    }

    /// See [`Client::flush`]
    pub fn flush(&self) -> Result<()> {
        self.lock().flush()
    }

    /// See [`Client::tick`]
    pub fn tick(&self) -> Result<()> {
        self.lock().tick()
    }

    /// See [`Client::pending_count`]
    pub fn pending_count(&self) -> usize {
        self.lock().pending_count()
    }

    /// See [`Client::status`]
    pub fn status(&self) -> ConnectionStatus {
        self.lock().status()
    }

    /// Unwrap the client if this is the last handle
    pub fn try_unwrap(self) -> std::result::Result<Client<H>, Self> {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => Ok(mutex.into_inner().unwrap_or_else(|p| p.into_inner())),
            Err(inner) => Err(Self { inner }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::hal::MockHal;
    use std::thread;

    fn shared() -> SharedClient<MockHal> {
        let config = ClientConfig {
            flush_count: 0,
            ..ClientConfig::manual_flush()
        };
        SharedClient::new(Client::with_config(MockHal::new(), "key", "dev-001", config).unwrap())
    }

    #[test]
    fn test_concurrent_producers() {
        let client = shared();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let client = client.clone();
                thread::spawn(move || {
                    for i in 0..8 {
                        client.enqueue_number(&format!("t{}", t), i as f64).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(client.pending_count(), 32);

        client.flush().unwrap();
        assert_eq!(client.pending_count(), 0);
        assert_eq!(client.status(), ConnectionStatus::Connected);
        assert_eq!(client.with(|c| c.total_sent()), 32);
    }

    #[test]
    fn test_poisoned_lock_recovered() {
        let client = shared();
        client.enqueue_bool("ok", true).unwrap();

        let poisoner = client.clone();
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock();
            panic!("producer crashed");
        })
        .join();

        assert_eq!(client.pending_count(), 1);
        client.enqueue_string("after", "panic").unwrap();
        assert_eq!(client.pending_count(), 2);
    }

    #[test]
    fn test_try_unwrap() {
        let client = shared();
        let other = client.clone();
        let client = client.try_unwrap().unwrap_err();
        drop(other);
        assert!(client.try_unwrap().is_ok());
    }
}
