//! Reconnect policy for dropped connections.
//!
//! Linear backoff: attempt `n` (zero-based) waits `base_delay * (n + 1)`.

use crate::socket::DisconnectReason;
use std::time::Duration;
use wagate_common::ReconnectConfig;

/// What the supervisor should do after a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Sleep for the given delay, then connect again.
    Reconnect(Duration),
    /// Credentials are dead: wipe the auth state and stop.
    ClearCredentials,
    /// Leave the session closed.
    Stop,
}

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// `attempt` is the number of counted reconnects already made.
    pub fn decide(&self, reason: DisconnectReason, attempt: u32) -> ReconnectAction {
        match reason {
            DisconnectReason::LoggedOut
            | DisconnectReason::BadSession
            | DisconnectReason::MultideviceMismatch => ReconnectAction::ClearCredentials,
            DisconnectReason::ConnectionReplaced => ReconnectAction::Stop,
            DisconnectReason::RestartRequired => ReconnectAction::Reconnect(Duration::ZERO),
            _ if attempt < self.max_retries => {
                ReconnectAction::Reconnect(self.base_delay * (attempt + 1))
            }
            _ => ReconnectAction::Stop,
        }
    }

    /// Whether a disconnect for this reason uses up a retry.
    pub fn counts_as_retry(reason: DisconnectReason) -> bool {
        reason != DisconnectReason::RestartRequired
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.base_delay_ms),
        )
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::new(3, Duration::from_secs(2))
    }

    #[test]
    fn test_linear_backoff() {
        let p = policy();
        let lost = DisconnectReason::ConnectionLost;
        assert_eq!(p.decide(lost, 0), ReconnectAction::Reconnect(Duration::from_secs(2)));
        assert_eq!(p.decide(lost, 1), ReconnectAction::Reconnect(Duration::from_secs(4)));
        assert_eq!(p.decide(lost, 2), ReconnectAction::Reconnect(Duration::from_secs(6)));
        assert_eq!(p.decide(lost, 3), ReconnectAction::Stop);
    }

    #[test]
    fn test_dead_credentials_are_cleared() {
        let p = policy();
        for reason in [
            DisconnectReason::LoggedOut,
            DisconnectReason::BadSession,
            DisconnectReason::MultideviceMismatch,
        ] {
            assert_eq!(p.decide(reason, 0), ReconnectAction::ClearCredentials);
        }
    }

    #[test]
    fn test_replaced_stops() {
        assert_eq!(
            policy().decide(DisconnectReason::ConnectionReplaced, 0),
            ReconnectAction::Stop
        );
    }

    #[test]
    fn test_restart_required_is_immediate_and_free() {
        let p = policy();
        assert_eq!(
            p.decide(DisconnectReason::RestartRequired, 99),
            ReconnectAction::Reconnect(Duration::ZERO)
        );
        assert!(!ReconnectPolicy::counts_as_retry(DisconnectReason::RestartRequired));
        assert!(ReconnectPolicy::counts_as_retry(DisconnectReason::TimedOut));
    }

    #[test]
    fn test_from_config() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.max_retries, 5);
        assert_eq!(p.base_delay, Duration::from_millis(3000));
    }
}
