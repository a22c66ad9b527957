use nbroker_frame::Target;

use crate::error::{BrokerError, Result};
use crate::registry::SubscriberEntry;

/// Work out which processes a send to `target` reaches.
///
/// Recipients are returned in registry order. An empty set is an error.
pub fn resolve(entries: &[SubscriberEntry], target: Target) -> Result<Vec<i32>> {
    let recipients: Vec<i32> = match target {
        Target::Broadcast => entries.iter().map(|e| e.pid).collect(),
        Target::Unicast(pid) => entries
            .iter()
            .filter(|e| e.pid == pid)
            .map(|e| e.pid)
            .take(1)
            .collect(),
        Target::Multicast(channel) => entries
            .iter()
            .filter(|e| e.channel == channel)
            .map(|e| e.pid)
            .collect(),
    };

    if recipients.is_empty() {
        return Err(BrokerError::NoSubscribers { target });
    }
    Ok(recipients)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<SubscriberEntry> {
        vec![
            SubscriberEntry {
                pid: 10,
                channel: -5,
            },
            SubscriberEntry {
                pid: 11,
                channel: -5,
            },
            SubscriberEntry {
                pid: 12,
                channel: -6,
            },
        ]
    }

    #[test]
    fn broadcast_reaches_everyone() {
        assert_eq!(
            resolve(&entries(), Target::Broadcast).unwrap(),
            vec![10, 11, 12]
        );
    }

    #[test]
    fn multicast_matches_exact_channel() {
        assert_eq!(
            resolve(&entries(), Target::Multicast(-5)).unwrap(),
            vec![10, 11]
        );
        assert_eq!(resolve(&entries(), Target::Multicast(-6)).unwrap(), vec![12]);
    }

    #[test]
    fn unicast_reaches_only_that_pid() {
        assert_eq!(resolve(&entries(), Target::Unicast(11)).unwrap(), vec![11]);
    }

    #[test]
    fn unicast_to_unsubscribed_pid_has_no_subscribers() {
        let err = resolve(&entries(), Target::Unicast(99)).unwrap_err();
        assert!(matches!(err, BrokerError::NoSubscribers { .. }));
    }

    #[test]
    fn empty_sets_are_errors() {
        assert!(matches!(
            resolve(&[], Target::Broadcast),
            Err(BrokerError::NoSubscribers { .. })
        ));
        assert!(matches!(
            resolve(&entries(), Target::Multicast(-7)),
            Err(BrokerError::NoSubscribers { .. })
        ));
    }
}
