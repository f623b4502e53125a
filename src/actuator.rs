//! Priority actuator.
//!
//! The actuator is an LED controller on the camera board. Commands are
//! best-effort: every call is bounded by a short timeout and failures never
//! reach the priority state.

use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::SentinelError;
use crate::priority::Priority;

/// Default bound on one actuator call.
pub const DEFAULT_ACTUATOR_TIMEOUT: Duration = Duration::from_secs(1);

pub trait Actuator: Send {
    fn name(&self) -> &'static str;

    /// Deliver one priority command.
    fn send(&mut self, priority: Priority) -> Result<()>;
}

/// Drops every command. Used for file sources and when no target is known.
#[derive(Debug, Default)]
pub struct NoopActuator;

impl Actuator for NoopActuator {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn send(&mut self, _: Priority) -> Result<()> {
        Ok(())
    }
}

/// LED controller reachable at `http://{host}/led?color={color}`.
pub struct HttpLedActuator {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpLedActuator {
    pub fn new(host: &str, timeout: Duration) -> Self {
        let host = host.trim_end_matches('/');
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{}", host)
        };
        Self {
            base_url,
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn command_url(&self, priority: Priority) -> String {
        format!("{}/led?color={}", self.base_url, priority.color())
    }
}

impl Actuator for HttpLedActuator {
    fn name(&self) -> &'static str {
        "http-led"
    }

    fn send(&mut self, priority: Priority) -> Result<()> {
        let url = self.command_url(priority);
        self.agent
            .get(&url)
            .call()
            .map_err(|e| SentinelError::ActuatorFailure {
                command: priority.color().to_string(),
                message: format!("{}: {}", url, e),
            })?;
        Ok(())
    }
}

/// Records commands in memory; shares the record through `commands()`.
#[derive(Clone, Debug, Default)]
pub struct RecordingActuator {
    commands: Arc<Mutex<Vec<Priority>>>,
    fail: bool,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder whose every call reports failure after recording.
    pub fn failing() -> Self {
        Self {
            commands: Arc::default(),
            fail: true,
        }
    }

    pub fn commands(&self) -> Vec<Priority> {
        self.commands
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl Actuator for RecordingActuator {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn send(&mut self, priority: Priority) -> Result<()> {
        self.commands
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(priority);
        if self.fail {
            anyhow::bail!("actuator unreachable");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn led_command_urls() {
        let led = HttpLedActuator::new("192.168.1.50", DEFAULT_ACTUATOR_TIMEOUT);
        assert_eq!(
            led.command_url(Priority::High),
            "http://192.168.1.50/led?color=red"
        );
        let led = HttpLedActuator::new("http://cam.local:8080/", DEFAULT_ACTUATOR_TIMEOUT);
        assert_eq!(
            led.command_url(Priority::None),
            "http://cam.local:8080/led?color=off"
        );
    }

    #[test]
    fn recording_actuator_shares_history() {
        let recorder = RecordingActuator::new();
        let mut handle = recorder.clone();
        handle.send(Priority::Low).unwrap();
        assert_eq!(recorder.commands(), vec![Priority::Low]);
    }
}
