//! Instance lifecycle and the table of instances this process has open.
//!
//! An instance is a registry segment plus a transport queue sharing one key.
//! `create` and `remove` act on the kernel objects; `open` attaches them and
//! records the pair under a [`BrokerHandle`] in a process-wide table that the
//! delivery thread walks on every wake.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nbroker_sysv::{current_pid, IpcKey, MessageQueue, SharedSegment, SysvError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::registry::Registry;
use crate::transport::Transport;

/// Process-local handle to an open broker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BrokerHandle(i32);

impl BrokerHandle {
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for BrokerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub(crate) struct OpenInstance {
    pub(crate) key: IpcKey,
    pub(crate) registry: Arc<Registry>,
    pub(crate) transport: Arc<Transport>,
    pub(crate) subscribed: bool,
}

struct Directory {
    owner_pid: i32,
    instances: BTreeMap<BrokerHandle, OpenInstance>,
}

impl Directory {
    const fn new() -> Self {
        Self {
            owner_pid: 0,
            instances: BTreeMap::new(),
        }
    }

    /// A forked child inherits the mappings but not the subscriptions.
    fn forget_subscriptions_if_forked(&mut self) {
        let pid = current_pid();
        if self.owner_pid == pid {
            return;
        }
        if self.owner_pid != 0 {
            debug!(parent = self.owner_pid, pid, "clearing subscriptions inherited across fork");
            for instance in self.instances.values_mut() {
                instance.subscribed = false;
            }
        }
        self.owner_pid = pid;
    }
}

static DIRECTORY: Mutex<Directory> = Mutex::new(Directory::new());

fn directory() -> MutexGuard<'static, Directory> {
    let mut guard = DIRECTORY.lock().unwrap_or_else(PoisonError::into_inner);
    guard.forget_subscriptions_if_forked();
    guard
}

fn already_exists(key: IpcKey, err: SysvError) -> BrokerError {
    match err {
        SysvError::AlreadyExists { .. } => BrokerError::AlreadyExists { key },
        other => other.into(),
    }
}

fn not_found(key: IpcKey, err: SysvError) -> BrokerError {
    match err {
        SysvError::NotFound { .. } | SysvError::Removed { .. } => {
            BrokerError::InstanceNotFound { key }
        }
        other => other.into(),
    }
}

fn check_key(key: IpcKey) -> Result<()> {
    if key.is_private() {
        return Err(BrokerError::InvalidArgument(
            "a private key cannot name a shared instance".into(),
        ));
    }
    Ok(())
}

/// Create the instance for `key` with default settings.
pub fn create(key: IpcKey) -> Result<()> {
    create_with_config(key, &BrokerConfig::default())
}

/// Create the instance for `key`: an empty registry and an empty transport.
///
/// Fails with [`BrokerError::AlreadyExists`] if either half already exists.
/// Nothing is left behind on failure.
pub fn create_with_config(key: IpcKey, config: &BrokerConfig) -> Result<()> {
    check_key(key)?;
    config.validate()?;

    let size = Registry::segment_size(config.registry_capacity);
    let segment =
        SharedSegment::create(key, size, config.mode).map_err(|err| already_exists(key, err))?;

    let queue = match MessageQueue::create(key, config.mode) {
        Ok(queue) => queue,
        Err(err) => {
            if let Err(cleanup) = segment.mark_for_removal() {
                warn!(%key, error = %cleanup, "failed to roll back registry segment");
            }
            return Err(already_exists(key, err));
        }
    };

    let registry =
        match Registry::initialize(segment, config.registry_capacity, config.wake_signal) {
            Ok(registry) => registry,
            Err(err) => {
                if let Err(cleanup) = queue.mark_for_removal() {
                    warn!(%key, error = %cleanup, "failed to roll back transport queue");
                }
                if let Err(cleanup) = SharedSegment::remove(key) {
                    warn!(%key, error = %cleanup, "failed to roll back registry segment");
                }
                return Err(err);
            }
        };
    registry.detach()?;

    info!(
        %key,
        queue = queue.id(),
        capacity = config.registry_capacity,
        wake_signal = config.wake_signal,
        "created broker instance"
    );
    Ok(())
}

/// Attach the instance for `key` and return a handle to it.
///
/// Opening a key that is already open returns the existing handle.
pub fn open(key: IpcKey) -> Result<BrokerHandle> {
    check_key(key)?;
    let mut dir = directory();

    let queue = MessageQueue::open(key).map_err(|err| not_found(key, err))?;
    let handle = BrokerHandle(queue.id());
    if dir.instances.contains_key(&handle) {
        debug!(%key, %handle, "instance already open");
        return Ok(handle);
    }

    let segment = SharedSegment::open(key).map_err(|err| not_found(key, err))?;
    let registry = Registry::attach(segment)?;

    info!(%key, %handle, capacity = registry.capacity(), "opened broker instance");
    dir.instances.insert(
        handle,
        OpenInstance {
            key,
            registry: Arc::new(registry),
            transport: Arc::new(Transport::new(queue)),
            subscribed: false,
        },
    );
    Ok(handle)
}

/// Destroy the instance for `key`, removing whichever halves exist.
///
/// Fails with [`BrokerError::InstanceNotFound`] only if neither half exists.
/// Processes that still have the instance open keep their mappings until
/// they close it, but can no longer send or receive through it.
pub fn remove(key: IpcKey) -> Result<()> {
    check_key(key)?;

    let queue = MessageQueue::remove(key);
    let segment = SharedSegment::remove(key);
    match (queue, segment) {
        (Err(SysvError::NotFound { .. }), Err(SysvError::NotFound { .. })) => {
            return Err(BrokerError::InstanceNotFound { key });
        }
        (Err(err @ SysvError::Os { .. }), _) | (_, Err(err @ SysvError::Os { .. })) => {
            return Err(err.into());
        }
        _ => {}
    }

    let dropped = {
        let mut dir = directory();
        let handles: Vec<BrokerHandle> = dir
            .instances
            .iter()
            .filter(|(_, instance)| instance.key == key)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in &handles {
            dir.instances.remove(handle);
        }
        handles.len()
    };
    if dropped > 0 && !has_subscriptions() {
        if let Err(err) = crate::delivery::disarm() {
            warn!(%key, error = %err, "failed to disarm after remove");
        }
    }

    info!(%key, "removed broker instance");
    Ok(())
}

pub(crate) fn instance(handle: BrokerHandle) -> Result<(Arc<Registry>, Arc<Transport>)> {
    let dir = directory();
    let instance = dir
        .instances
        .get(&handle)
        .ok_or(BrokerError::HandleNotOpen { handle })?;
    Ok((Arc::clone(&instance.registry), Arc::clone(&instance.transport)))
}

pub(crate) fn mark_subscribed(handle: BrokerHandle) -> Result<()> {
    let mut dir = directory();
    let instance = dir
        .instances
        .get_mut(&handle)
        .ok_or(BrokerError::HandleNotOpen { handle })?;
    instance.subscribed = true;
    Ok(())
}

/// Take `handle` out of the table.
pub(crate) fn take(handle: BrokerHandle) -> Result<OpenInstance> {
    directory()
        .instances
        .remove(&handle)
        .ok_or(BrokerError::HandleNotOpen { handle })
}

pub(crate) fn has_subscriptions() -> bool {
    directory().instances.values().any(|i| i.subscribed)
}

/// Transports of every open instance, in ascending handle order.
pub(crate) fn transports() -> Vec<(BrokerHandle, Arc<Transport>)> {
    directory()
        .instances
        .iter()
        .map(|(handle, instance)| (*handle, Arc::clone(&instance.transport)))
        .collect()
}
