use std::fmt;
use std::time::Duration;

use clap::ValueEnum;

pub const DEFAULT_DATA_LABEL: &str = "data";
pub const DEFAULT_RELAY_LABEL: &str = "candidates";
/// Capacity of the queues between engine callbacks and the session flow.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Role {
    Offerer,
    Answerer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Offerer => f.write_str("offerer"),
            Role::Answerer => f.write_str("answerer"),
        }
    }
}

/// What the session waits for before exporting its local description.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ReadinessPolicy {
    /// Export as soon as one local candidate exists (trickle style).
    FirstCandidate,
    /// Export once the engine reports the end of candidate gathering.
    GatheringComplete,
}

impl ReadinessPolicy {
    pub fn default_for(role: Role) -> Self {
        match role {
            Role::Offerer => ReadinessPolicy::FirstCandidate,
            Role::Answerer => ReadinessPolicy::GatheringComplete,
        }
    }
}

/// Settings for one signaling session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub role: Role,
    pub readiness: ReadinessPolicy,
    /// Upper bound for every blocking wait; `None` waits forever.
    pub wait_timeout: Option<Duration>,
    pub data_label: String,
    pub relay_label: String,
    pub queue_capacity: usize,
}

impl SessionConfig {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            readiness: ReadinessPolicy::default_for(role),
            wait_timeout: None,
            data_label: DEFAULT_DATA_LABEL.to_string(),
            relay_label: DEFAULT_RELAY_LABEL.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_wait_timeout(mut self, limit: Option<Duration>) -> Self {
        self.wait_timeout = limit;
        self
    }

    pub fn with_labels(mut self, data: impl Into<String>, relay: impl Into<String>) -> Self {
        self.data_label = data.into();
        self.relay_label = relay.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_defaults_keep_trickle_offerer_and_vanilla_answerer() {
        let offerer = SessionConfig::new(Role::Offerer);
        assert_eq!(offerer.readiness, ReadinessPolicy::FirstCandidate);
        let answerer = SessionConfig::new(Role::Answerer);
        assert_eq!(answerer.readiness, ReadinessPolicy::GatheringComplete);
        assert_eq!(answerer.data_label, "data");
        assert_eq!(answerer.relay_label, "candidates");
        assert!(answerer.wait_timeout.is_none());
    }

    #[test]
    fn builders_override_defaults() {
        let config = SessionConfig::new(Role::Answerer)
            .with_readiness(ReadinessPolicy::FirstCandidate)
            .with_wait_timeout(Some(Duration::from_secs(5)))
            .with_labels("chat", "ice");
        assert_eq!(config.readiness, ReadinessPolicy::FirstCandidate);
        assert_eq!(config.wait_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.data_label, "chat");
        assert_eq!(config.relay_label, "ice");
    }

    #[test]
    fn readiness_parses_from_cli_names() {
        assert_eq!(
            ReadinessPolicy::from_str("gathering-complete", true).unwrap(),
            ReadinessPolicy::GatheringComplete
        );
        assert_eq!(
            ReadinessPolicy::from_str("first-candidate", true).unwrap(),
            ReadinessPolicy::FirstCandidate
        );
    }
}
