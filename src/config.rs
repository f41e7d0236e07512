use std::time::Duration;
use url::Url;

use crate::classify::ProtocolPolicy;
use crate::poller::{DEFAULT_POLL_INTERVAL, MIN_POLL_INTERVAL};

pub const DEFAULT_SERVER: &str = "http://localhost:2201";

/// Connection settings for a [`crate::Client`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Service root. Always ends in `/` so endpoint paths join below it.
    pub server: Url,
    /// Per-request timeout; `None` waits for as long as the service takes.
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
    pub policy: ProtocolPolicy,
}

impl ClientConfig {
    pub fn new(server: &str) -> Result<Self, url::ParseError> {
        let mut server = Url::parse(server)?;
        if !server.path().ends_with('/') {
            let path = format!("{}/", server.path());
            server.set_path(&path);
        }
        Ok(Self {
            server,
            timeout: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            policy: ProtocolPolicy::default(),
        })
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Clamped to [`MIN_POLL_INTERVAL`].
    pub fn with_poll_interval(mut self, every: Duration) -> Self {
        self.poll_interval = every.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn with_policy(mut self, policy: ProtocolPolicy) -> Self {
        self.policy = policy;
        self
    }
}
