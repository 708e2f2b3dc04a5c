// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Connection status tracking
//!
//! The status follows the outcome of the most recent delivery. Listeners
//! are notified on transitions only, never on repeats.

use std::fmt;

/// Connection state derived from delivery outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// No successful delivery yet, or the last one failed on the network
    #[default]
    Disconnected,
    /// Last delivery succeeded
    Connected,
    /// Server rejected the API key or the account
    AuthFailed,
    /// Server asked us to slow down
    RateLimited,
}

impl ConnectionStatus {
    /// Short lowercase label
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::AuthFailed => "auth_failed",
            Self::RateLimited => "rate_limited",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer of status transitions
pub trait StatusListener {
    /// Called once per transition with the new status
    fn on_status_changed(&mut self, status: ConnectionStatus);
}

impl<F> StatusListener for F
where
    F: FnMut(ConnectionStatus),
{
    fn on_status_changed(&mut self, status: ConnectionStatus) {
        self(status)
    }
}

/// Current status plus the listener to notify
#[derive(Default)]
pub struct StatusTracker {
    status: ConnectionStatus,
    listener: Option<Box<dyn StatusListener + Send>>,
}

impl StatusTracker {
    /// Tracker starting in `Disconnected`
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Replace the listener
    pub fn set_listener(&mut self, listener: Option<Box<dyn StatusListener + Send>>) {
        self.listener = listener;
    }

    /// Move to `status`, notifying the listener if it differs
    ///
    /// Returns true on a transition.
    pub fn set(&mut self, status: ConnectionStatus) -> bool {
        if status == self.status {
            return false;
        }
        log::debug!("Connection status: {} -> {}", self.status, status);
        self.status = status;
        if let Some(listener) = self.listener.as_mut() {
            listener.on_status_changed(status);
        }
        true
    }
}

impl fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusTracker")
            .field("status", &self.status)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}
