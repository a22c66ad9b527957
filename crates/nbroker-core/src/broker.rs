use std::sync::Arc;

use nbroker_frame::{is_channel, Envelope, Message, Target};
use nbroker_sysv::{current_pid, signal};
use tracing::{debug, info, warn};

use crate::delivery::{self, Handler};
use crate::directory::{self, BrokerHandle};
use crate::error::{BrokerError, Result};
use crate::registry::{Registry, SubscriberEntry};
use crate::resolver::resolve;

/// Subscribe this process to `channel` on `handle`.
///
/// `handler` runs on the delivery thread once per message addressed to this
/// process, whether by broadcast, unicast or a multicast to `channel`. A
/// process holds one subscription per instance; subscribing again replaces
/// the channel, and the handler is shared by every instance the process is
/// subscribed to.
pub fn subscribe<F>(handle: BrokerHandle, channel: i64, handler: F) -> Result<()>
where
    F: Fn(Message) + Send + Sync + 'static,
{
    subscribe_with(handle, channel, Arc::new(handler))
}

/// [`subscribe`] with an already shared handler.
pub fn subscribe_with(handle: BrokerHandle, channel: i64, handler: Handler) -> Result<()> {
    let (registry, _) = directory::instance(handle)?;
    if !is_channel(channel) {
        return Err(BrokerError::InvalidChannel { channel });
    }

    let pid = current_pid();
    let previous_channel = registry.channel_of(pid);
    registry.register(pid, channel)?;

    let rollback = |err: BrokerError| {
        if let Err(restore) = restore_registration(&registry, pid, previous_channel) {
            warn!(%handle, pid, error = %restore, "failed to restore previous channel");
        }
        if !directory::has_subscriptions() {
            if let Err(disarm) = delivery::disarm() {
                warn!(error = %disarm, "failed to disarm after subscribe error");
            }
        }
        err
    };

    let previous_handler = delivery::arm(registry.wake_signal(), handler).map_err(&rollback)?;
    if let Err(err) = directory::mark_subscribed(handle) {
        delivery::restore_handler(previous_handler);
        return Err(rollback(err));
    }

    info!(%handle, pid, channel, "subscribed");
    Ok(())
}

/// Put `pid`'s registry entry back the way it was before a failed subscribe.
fn restore_registration(registry: &Registry, pid: i32, previous: Option<i64>) -> Result<()> {
    match previous {
        Some(channel) => registry.register(pid, channel),
        None => {
            registry.unregister(pid);
            Ok(())
        }
    }
}

/// Send `payload` to the recipients selected by `target`.
///
/// The payload is truncated to the fixed payload size. The message is stamped
/// with this process's pid and the raw target discriminator. Returns the
/// number of recipients that were notified.
///
/// Delivery is best effort per recipient. Recipients whose process has died
/// are dropped from the registry; recipients that cannot be signalled have
/// their envelopes discarded. Either way the send reports
/// [`BrokerError::RecipientUnreachable`] while every other recipient still
/// receives the message. A full transport aborts the send at that point.
pub fn send(handle: BrokerHandle, payload: impl AsRef<[u8]>, target: Target) -> Result<usize> {
    let (registry, transport) = directory::instance(handle)?;
    let recipients = resolve(&registry.entries(), target)?;

    let sender = current_pid();
    let message = Message::new(target.as_raw(), sender, payload);
    let wake_signal = registry.wake_signal();

    let mut delivered = 0;
    let mut unreachable = Vec::new();
    for pid in recipients {
        if !signal::is_alive(pid) {
            warn!(%handle, pid, "reaping subscriber whose process is gone");
            registry.unregister(pid);
            unreachable.push(pid);
            continue;
        }

        transport.enqueue(&Envelope::new(pid, message.clone()))?;

        if let Err(err) = signal::notify(pid, wake_signal) {
            warn!(%handle, pid, error = %err, "failed to signal recipient");
            if let Err(purge) = transport.purge_for(pid) {
                warn!(%handle, pid, error = %purge, "failed to purge envelopes");
            }
            unreachable.push(pid);
            continue;
        }
        delivered += 1;
    }

    if !unreachable.is_empty() {
        return Err(BrokerError::RecipientUnreachable {
            unreachable,
            delivered,
        });
    }
    debug!(%handle, %target, delivered, len = message.payload().len(), "sent");
    Ok(delivered)
}

/// Close `handle`: drop this process's subscription and detach the instance.
///
/// Closing the last subscription in the process disarms delivery. The
/// instance itself survives until [`crate::remove`] is called.
pub fn close(handle: BrokerHandle) -> Result<()> {
    let instance = directory::take(handle)?;
    let pid = current_pid();
    if instance.registry.unregister(pid) {
        debug!(%handle, pid, "released subscription");
    }

    let detached = match Arc::try_unwrap(instance.registry) {
        Ok(registry) => registry.detach(),
        // A concurrent send still holds the mapping; it detaches on drop.
        Err(_shared) => Ok(()),
    };

    let disarmed = if directory::has_subscriptions() {
        Ok(())
    } else {
        delivery::disarm()
    };

    info!(%handle, "closed broker instance");
    detached.and(disarmed)
}

/// Snapshot of the registry behind `handle`.
pub fn subscribers(handle: BrokerHandle) -> Result<Vec<SubscriberEntry>> {
    let (registry, _) = directory::instance(handle)?;
    Ok(registry.entries())
}

/// Envelopes waiting in the transport behind `handle`, across all recipients.
pub fn pending(handle: BrokerHandle) -> Result<u64> {
    let (_, transport) = directory::instance(handle)?;
    transport.pending()
}

/// Registry capacity and wake signal of the instance behind `handle`.
pub fn settings(handle: BrokerHandle) -> Result<(usize, i32)> {
    let (registry, _) = directory::instance(handle)?;
    Ok((registry.capacity(), registry.wake_signal()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::private_registry;

    #[test]
    fn failed_resubscribe_restores_previous_channel() {
        let registry = private_registry(2);
        registry.register(100, -1).unwrap();
        registry.register(100, -3).unwrap();

        restore_registration(&registry, 100, Some(-1)).unwrap();
        assert_eq!(registry.channel_of(100), Some(-1));
        assert_eq!(registry.entries().len(), 1);
    }

    #[test]
    fn failed_first_subscribe_leaves_no_entry() {
        let registry = private_registry(2);
        registry.register(200, -4).unwrap();
        registry.register(100, -1).unwrap();

        restore_registration(&registry, 100, None).unwrap();
        assert_eq!(registry.channel_of(100), None);
        assert_eq!(registry.channel_of(200), Some(-4));
    }
}
