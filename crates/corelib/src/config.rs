//! Dialer and listener configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Capacity of the request queues unless configured otherwise.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Settings for a `Dialer`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialerConfig {
    /// Bound of the outbound request queue. A full queue blocks `dial`.
    pub queue_capacity: usize,
    /// How long an inbound connection may take to send its token.
    pub handshake_timeout: Duration,
    /// Timeout used by `dial_default`.
    pub default_timeout: Duration,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            handshake_timeout: Duration::from_secs(5),
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl DialerConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_capacity(self.queue_capacity)?;
        if self.handshake_timeout.is_zero() {
            return Err(Error::Config("handshake_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

/// Settings for a `Listener`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bound of the inbound request queue. A full queue blocks the producer.
    pub queue_capacity: usize,
    /// Upper bound on the outbound connect made for each request.
    pub connect_timeout: Duration,
    /// Timeout used by `accept_default`.
    pub default_timeout: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            connect_timeout: Duration::from_secs(10),
            default_timeout: Duration::from_secs(30),
        }
    }
}

impl ListenerConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_capacity(self.queue_capacity)
    }
}

fn validate_capacity(capacity: usize) -> Result<()> {
    // tokio's bounded channels panic on zero capacity
    if capacity == 0 {
        return Err(Error::Config("queue_capacity must be at least 1".into()));
    }
    Ok(())
}
