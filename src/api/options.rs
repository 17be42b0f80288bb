use std::convert::TryFrom;
use std::time::Duration;
use thiserror::Error;

/// Caller-facing tuning knobs. All optional; unset fields take defaults
/// sized for a LAN cluster.
#[derive(Clone, Default)]
pub struct ClusterOptions {
    /// Leader heartbeat cadence.
    pub heartbeat_interval: Option<Duration>,
    /// Lower bound of the randomized election timeout.
    pub election_min_timeout: Option<Duration>,
    /// Upper bound of the randomized election timeout.
    pub election_max_timeout: Option<Duration>,
    /// When true, follower log writes are flushed to the store before the
    /// acknowledgement is sent, so an ack implies durability.
    pub durable_ack_writes: Option<bool>,
    /// Max inbound frames drained from the transport per driver tick.
    pub max_inbound_batch: Option<usize>,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct OptionsError(&'static str);

impl OptionsError {
    pub(crate) fn invalid(message: &'static str) -> Self {
        OptionsError(message)
    }
}

pub(crate) struct ClusterOptionsValidated {
    pub heartbeat_interval: Duration,
    pub election_min_timeout: Duration,
    pub election_max_timeout: Duration,
    pub durable_ack_writes: bool,
    pub max_inbound_batch: usize,
}

impl ClusterOptionsValidated {
    fn validate(&self) -> Result<(), OptionsError> {
        if self.heartbeat_interval >= self.election_min_timeout {
            return Err(OptionsError(
                "Election minimum timeout must be greater than the leader's heartbeat interval",
            ));
        }
        if self.election_min_timeout >= self.election_max_timeout {
            return Err(OptionsError(
                "Election minimum timeout must be less than the maximum timeout",
            ));
        }
        if self.max_inbound_batch == 0 {
            return Err(OptionsError("Inbound batch size must be at least 1"));
        }

        Ok(())
    }
}

impl TryFrom<ClusterOptions> for ClusterOptionsValidated {
    type Error = OptionsError;

    fn try_from(options: ClusterOptions) -> Result<Self, Self::Error> {
        let values = ClusterOptionsValidated {
            heartbeat_interval: options.heartbeat_interval.unwrap_or(Duration::from_millis(100)),
            election_min_timeout: options.election_min_timeout.unwrap_or(Duration::from_millis(500)),
            election_max_timeout: options.election_max_timeout.unwrap_or(Duration::from_millis(1500)),
            durable_ack_writes: options.durable_ack_writes.unwrap_or(false),
            max_inbound_batch: options.max_inbound_batch.unwrap_or(64),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ClusterOptionsValidated::try_from(ClusterOptions::default()).is_ok());
    }

    #[test]
    fn heartbeat_must_undercut_election_timeout() {
        let options = ClusterOptions {
            heartbeat_interval: Some(Duration::from_millis(600)),
            ..ClusterOptions::default()
        };
        assert!(ClusterOptionsValidated::try_from(options).is_err());
    }

    #[test]
    fn election_range_must_be_ordered() {
        let options = ClusterOptions {
            election_min_timeout: Some(Duration::from_millis(800)),
            election_max_timeout: Some(Duration::from_millis(700)),
            ..ClusterOptions::default()
        };
        assert!(ClusterOptionsValidated::try_from(options).is_err());
    }
}
