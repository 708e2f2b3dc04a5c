// Plexus - Embedded telemetry client
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Remote command protocol
//!
//! The device polls `GET <base>/api/commands/poll?sourceId=<id>`, runs the
//! first returned command through the registered [`CommandHandler`] and
//! reports `POST <base>/api/commands/<id>/result`. The server-issued id is
//! validated before it is used for anything; an unsafe id is dropped
//! without running the command.
//!
//! Poll and report failures are not fatal: the next scheduled poll simply
//! tries again.

use crate::client::{api_base, Client, USER_AGENT};
use crate::codec::{self, CommandResultBody, CommandStatus};
use crate::config::{MAX_COMMAND_ID_LEN, MAX_COMMAND_RESULT_LEN};
use crate::error::{ProtocolError, Result};
use crate::hal::{Hal, HttpRequest};
use crate::metric::validate_identifier;
use thiserror::Error;

/// A command received from the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Server-issued identifier (validated before use)
    pub id: String,
    /// Command text
    pub command: String,
    /// Execution budget suggested by the server
    pub timeout_seconds: u32,
}

/// Successful handler run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Process-style exit code; non-zero reports "failed"
    pub exit_code: i32,
    /// Captured output, truncated before reporting
    pub output: String,
}

impl CommandOutput {
    /// Exit code 0 with some output
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            output: output.into(),
        }
    }
}

/// Handler failure, reported as "failed" with exit code -1
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CommandError(pub String);

/// Outcome of a handler run
pub type CommandResult = std::result::Result<CommandOutput, CommandError>;

/// Executes server-issued commands
pub trait CommandHandler {
    /// Run a command to completion
    fn execute(&mut self, command: &Command) -> CommandResult;
}

impl<F> CommandHandler for F
where
    F: FnMut(&Command) -> CommandResult,
{
    fn execute(&mut self, command: &Command) -> CommandResult {
        self(command)
    }
}

/// Where the command exchange currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandState {
    /// Waiting for the next poll
    #[default]
    Idle,
    /// Poll request in flight
    Polling,
    /// Handler running
    Executing,
    /// Result being posted
    Reporting,
}

/// What a single poll did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// No handler registered
    NoHandler,
    /// Server had nothing queued
    NoCommand,
    /// Command ran and its result was accepted
    Executed {
        /// Command identifier
        id: String,
        /// Reported status
        status: CommandStatus,
    },
}

/// Validate a server-issued command identifier
///
/// Accepts `[A-Za-z0-9._-]`, not starting with `.`, shorter than
/// [`MAX_COMMAND_ID_LEN`]. Anything else (slashes, `..`, query or
/// fragment characters, whitespace) is rejected.
pub fn validate_command_id(id: &str) -> std::result::Result<(), ProtocolError> {
    validate_identifier(id, MAX_COMMAND_ID_LEN)
        .map_err(|_| ProtocolError::UnsafeIdentifier(id.to_string()))
}

/// Poll URL for a device
pub fn poll_url(endpoint: &str, source_id: &str) -> String {
    format!("{}/api/commands/poll?sourceId={}", api_base(endpoint), source_id)
}

/// Result URL for a validated command id
pub fn result_url(endpoint: &str, id: &str) -> String {
    format!("{}/api/commands/{}/result", api_base(endpoint), id)
}

impl<H: Hal> Client<H> {
    /// Install the command handler, enabling polling from `tick()`
    pub fn set_command_handler<C>(&mut self, handler: C)
    where
        C: CommandHandler + Send + 'static,
    {
        self.command_handler = Some(Box::new(handler));
    }

    /// Remove the command handler
    pub fn clear_command_handler(&mut self) {
        self.command_handler = None;
    }

    /// Current phase of the command exchange
    pub fn command_state(&self) -> CommandState {
        self.command_state
    }

    /// Poll once, run a received command and report its result
    pub fn poll_commands(&mut self) -> Result<PollOutcome> {
        if self.command_handler.is_none() {
            return Ok(PollOutcome::NoHandler);
        }
        let outcome = self.poll_and_execute();
        self.command_state = CommandState::Idle;
        outcome
    }

    fn poll_and_execute(&mut self) -> Result<PollOutcome> {
        self.command_state = CommandState::Polling;
        let url = poll_url(&self.config.endpoint, &self.source_id);
        let response = self.hal.http_get(&url, &self.api_key, USER_AGENT)?;
        if response.is_empty() {
            return Ok(PollOutcome::NoCommand);
        }

        let command = match codec::parse_poll_response(&response) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(PollOutcome::NoCommand),
            Err(e) => {
                log::warn!("Ignoring command poll response: {}", e);
                return Err(e.into());
            }
        };

        if let Err(e) = validate_command_id(&command.id) {
            log::warn!("Rejected command: {}", e);
            return Err(e.into());
        }
        log::info!(
            "Received command {} ({:?}, timeout {}s)",
            command.id,
            command.command,
            command.timeout_seconds
        );

        self.command_state = CommandState::Executing;
        let run = match self.command_handler.as_mut() {
            Some(handler) => handler.execute(&command),
            None => return Ok(PollOutcome::NoHandler),
        };
        let (status, exit_code, output, error) = match &run {
            Ok(out) if out.exit_code == 0 => (CommandStatus::Completed, 0, out.output.as_str(), None),
            Ok(out) => (CommandStatus::Failed, out.exit_code, out.output.as_str(), None),
            Err(CommandError(msg)) => (CommandStatus::Failed, -1, "", Some(msg.as_str())),
        };

        self.command_state = CommandState::Reporting;
        let limit = MAX_COMMAND_RESULT_LEN - 1;
        let output = codec::truncate_utf8(output, limit);
        let body = CommandResultBody {
            status,
            exit_code,
            output: Some(output).filter(|s| !s.is_empty()),
            error: error.map(|e| codec::truncate_utf8(e, limit)).filter(|s| !s.is_empty()),
        };
        let mut buf = Vec::new();
        codec::encode_bounded(&body, &mut buf, self.config.json_buffer_size)?;

        let url = result_url(&self.config.endpoint, &command.id);
        self.hal.http_post(&HttpRequest {
            url: &url,
            api_key: &self.api_key,
            user_agent: USER_AGENT,
            body: &buf,
        })?;
        log::debug!("Command {} reported: {:?} (exit {})", command.id, status, exit_code);

        Ok(PollOutcome::Executed {
            id: command.id,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PlexusError, TransportError};
    use crate::hal::MockHal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn client() -> Client<MockHal> {
        Client::new(MockHal::new(), "plx_key", "dev-001").unwrap()
    }

    fn echo(cmd: &Command) -> CommandResult {
        Ok(CommandOutput::success(format!("ran {}", cmd.command)))
    }

    #[test]
    fn test_validate_command_id() {
        assert!(validate_command_id("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_command_id("cmd_1.retry").is_ok());
        for bad in ["", "../admin", "a/b", "a?x=1", "a#f", "a b", ".env", "%2e%2e"] {
            assert!(validate_command_id(bad).is_err(), "accepted {:?}", bad);
        }
        assert!(validate_command_id(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_urls() {
        assert_eq!(
            poll_url("https://app.plexus.company/api/ingest", "dev-001"),
            "https://app.plexus.company/api/commands/poll?sourceId=dev-001"
        );
        assert_eq!(
            result_url("http://localhost:3000/", "c1"),
            "http://localhost:3000/api/commands/c1/result"
        );
    }

    #[test]
    fn test_no_handler() {
        let mut c = client();
        assert_eq!(c.poll_commands().unwrap(), PollOutcome::NoHandler);
        assert!(c.hal().gets().is_empty());
    }

    #[test]
    fn test_empty_poll() {
        let mut c = client();
        c.set_command_handler(echo);
        assert_eq!(c.poll_commands().unwrap(), PollOutcome::NoCommand);
        assert_eq!(c.hal().gets().len(), 1);
        assert!(c.hal().gets()[0].ends_with("/api/commands/poll?sourceId=dev-001"));
        assert_eq!(c.hal().post_count(), 0);
        assert_eq!(c.command_state(), CommandState::Idle);
    }

    #[test]
    fn test_execute_and_report() {
        let mut c = client();
        c.set_command_handler(echo);
        c.hal_mut().set_get_response(
            Ok(()),
            r#"{"commands":[{"id":"c-42","command":"uptime","timeout_seconds":5}]}"#,
        );

        let outcome = c.poll_commands().unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Executed {
                id: "c-42".to_string(),
                status: CommandStatus::Completed
            }
        );
        let post = c.hal().last_post().unwrap();
        assert_eq!(post.url, "https://app.plexus.company/api/commands/c-42/result");
        assert_eq!(
            post.body,
            r#"{"status":"completed","exit_code":0,"output":"ran uptime"}"#
        );
    }

    #[test]
    fn test_nonzero_exit_reports_failed() {
        let mut c = client();
        c.set_command_handler(|_: &Command| -> CommandResult {
            Ok(CommandOutput {
                exit_code: 2,
                output: "no such file".into(),
            })
        });
        c.hal_mut()
            .set_get_response(Ok(()), r#"{"commands":[{"id":"c1","command":"cat x"}]}"#);
        c.poll_commands().unwrap();
        let body = &c.hal().last_post().unwrap().body;
        assert!(body.contains(r#""status":"failed""#));
        assert!(body.contains(r#""exit_code":2"#));
    }

    #[test]
    fn test_handler_error_reported() {
        let mut c = client();
        c.set_command_handler(|_: &Command| -> CommandResult {
            Err(CommandError("unsupported".into()))
        });
        c.hal_mut()
            .set_get_response(Ok(()), r#"{"commands":[{"id":"c1","command":"reboot"}]}"#);
        c.poll_commands().unwrap();
        assert_eq!(
            c.hal().last_post().unwrap().body,
            r#"{"status":"failed","exit_code":-1,"error":"unsupported"}"#
        );
    }

    #[test]
    fn test_unsafe_id_never_executed() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let mut c = client();
        c.set_command_handler(move |_: &Command| -> CommandResult {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(CommandOutput::default())
        });
        c.hal_mut().set_get_response(
            Ok(()),
            r#"{"commands":[{"id":"../../sources/dev-002","command":"rm -rf /"}]}"#,
        );

        let err = c.poll_commands().unwrap_err();
        assert!(matches!(
            err,
            PlexusError::Protocol(ProtocolError::UnsafeIdentifier(_))
        ));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(c.hal().post_count(), 0);
        assert_eq!(c.command_state(), CommandState::Idle);
    }

    #[test]
    fn test_output_truncated() {
        let mut c = client();
        c.set_command_handler(|_: &Command| -> CommandResult {
            Ok(CommandOutput::success("y".repeat(1000)))
        });
        c.hal_mut()
            .set_get_response(Ok(()), r#"{"commands":[{"id":"c1","command":"yes"}]}"#);
        c.poll_commands().unwrap();
        let body = &c.hal().last_post().unwrap().body;
        assert!(body.contains(&"y".repeat(MAX_COMMAND_RESULT_LEN - 1)));
        assert!(!body.contains(&"y".repeat(MAX_COMMAND_RESULT_LEN)));
    }

    #[test]
    fn test_poll_failures_not_fatal() {
        let mut c = client();
        c.set_command_handler(echo);

        c.hal_mut().set_get_response(Err(TransportError::Network), "");
        assert!(c.poll_commands().is_err());

        c.hal_mut().set_get_response(Ok(()), "<html>bad gateway</html>");
        assert!(matches!(
            c.poll_commands(),
            Err(PlexusError::Protocol(ProtocolError::MalformedResponse(_)))
        ));
        assert_eq!(c.command_state(), CommandState::Idle);

        c.hal_mut().set_get_response(Ok(()), r#"{"commands":[]}"#);
        assert_eq!(c.poll_commands().unwrap(), PollOutcome::NoCommand);
    }
}
