//! The shared subscriber registry.
//!
//! The registry is a fixed-capacity table living in a shared memory segment
//! that every process attached to a broker instance maps at its own address.
//! All fields are atomics and nothing in the table is a pointer, so the layout
//! is valid regardless of where each process maps it.
//!
//! ```text
//! ┌───────────────────────── header (16B) ─────────────────────────┐
//! │ magic u32 │ version u32 │ capacity u32 │ wake signal i32       │
//! ├───────────────────────── slot (16B) × capacity ────────────────┤
//! │ pid i32   │ reserved i32 │ channel i64                         │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A slot is claimed by compare-and-swapping its pid from 0 to the caller's
//! pid; the channel is published afterwards. A slot whose channel is still 0
//! is in the middle of a claim or release and is skipped by readers.

use std::mem::size_of;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU32, Ordering};

use nbroker_sysv::{IpcKey, SharedSegment};
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{BrokerError, Result};

/// "NBRG".
const REGISTRY_MAGIC: u32 = 0x4e42_5247;
const LAYOUT_VERSION: u32 = 1;

#[repr(C)]
struct Header {
    magic: AtomicU32,
    version: AtomicU32,
    capacity: AtomicU32,
    wake_signal: AtomicI32,
}

#[repr(C)]
struct Slot {
    pid: AtomicI32,
    _reserved: AtomicI32,
    channel: AtomicI64,
}

/// One live registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubscriberEntry {
    pub pid: i32,
    pub channel: i64,
}

/// Typed view over an attached registry segment.
pub struct Registry {
    segment: SharedSegment,
    capacity: usize,
}

impl Registry {
    /// Bytes needed for a registry with `capacity` slots.
    pub fn segment_size(capacity: usize) -> usize {
        size_of::<Header>() + capacity * size_of::<Slot>()
    }

    /// Lay out an empty registry in a freshly created, zero-filled segment.
    pub fn initialize(segment: SharedSegment, capacity: usize, wake_signal: i32) -> Result<Self> {
        let needed = Self::segment_size(capacity);
        if capacity == 0 || segment.len() < needed {
            return Err(BrokerError::Corrupt(format!(
                "segment of {} bytes cannot hold {capacity} slots ({needed} bytes needed)",
                segment.len()
            )));
        }
        let capacity_field = u32::try_from(capacity)
            .map_err(|_| BrokerError::InvalidArgument(format!("capacity {capacity} too large")))?;

        let registry = Self { segment, capacity };
        let header = registry.header();
        header.version.store(LAYOUT_VERSION, Ordering::Relaxed);
        header.capacity.store(capacity_field, Ordering::Relaxed);
        header.wake_signal.store(wake_signal, Ordering::Relaxed);
        for slot in registry.slots() {
            slot.channel.store(0, Ordering::Relaxed);
            slot.pid.store(0, Ordering::Relaxed);
        }
        // Published last: openers that see the magic see a complete header.
        header.magic.store(REGISTRY_MAGIC, Ordering::Release);

        debug!(key = %registry.key(), capacity, wake_signal, "initialized registry");
        Ok(registry)
    }

    /// Interpret an existing segment as a registry, validating its header.
    pub fn attach(segment: SharedSegment) -> Result<Self> {
        if segment.len() < size_of::<Header>() {
            return Err(BrokerError::Corrupt(format!(
                "segment of {} bytes is smaller than the registry header",
                segment.len()
            )));
        }

        // SAFETY: the segment is page aligned and at least header-sized.
        let header = unsafe { &*(segment.as_ptr() as *const Header) };
        let magic = header.magic.load(Ordering::Acquire);
        if magic != REGISTRY_MAGIC {
            return Err(BrokerError::Corrupt(format!(
                "bad magic {magic:#010x}, expected {REGISTRY_MAGIC:#010x}"
            )));
        }
        let version = header.version.load(Ordering::Relaxed);
        if version != LAYOUT_VERSION {
            return Err(BrokerError::Corrupt(format!(
                "unsupported layout version {version}"
            )));
        }

        let capacity = header.capacity.load(Ordering::Relaxed) as usize;
        if capacity == 0 || segment.len() < Self::segment_size(capacity) {
            return Err(BrokerError::Corrupt(format!(
                "header claims {capacity} slots but segment is {} bytes",
                segment.len()
            )));
        }

        Ok(Self { segment, capacity })
    }

    fn header(&self) -> &Header {
        // SAFETY: construction checked the segment holds a header at offset 0.
        unsafe { &*(self.segment.as_ptr() as *const Header) }
    }

    fn slots(&self) -> &[Slot] {
        // SAFETY: construction checked the segment holds `capacity` slots after
        // the header; the header size keeps slots 8-byte aligned.
        unsafe {
            let base = self.segment.as_ptr().add(size_of::<Header>()) as *const Slot;
            std::slice::from_raw_parts(base, self.capacity)
        }
    }

    pub fn key(&self) -> IpcKey {
        self.segment.key()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wake signal chosen when the instance was created.
    pub fn wake_signal(&self) -> i32 {
        self.header().wake_signal.load(Ordering::Relaxed)
    }

    /// Record that `pid` is subscribed to `channel`.
    ///
    /// A process holds at most one entry; registering again replaces its channel.
    pub fn register(&self, pid: i32, channel: i64) -> Result<()> {
        debug_assert!(pid > 0 && channel < 0);
        let slots = self.slots();

        if let Some(slot) = slots
            .iter()
            .find(|slot| slot.pid.load(Ordering::Acquire) == pid)
        {
            slot.channel.store(channel, Ordering::Release);
            trace!(pid, channel, "replaced registry entry");
            return Ok(());
        }

        for slot in slots {
            if slot
                .pid
                .compare_exchange(0, pid, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                slot.channel.store(channel, Ordering::Release);
                trace!(pid, channel, "claimed registry slot");
                return Ok(());
            }
        }

        Err(BrokerError::RegistryFull {
            capacity: self.capacity,
        })
    }

    /// Drop every entry owned by `pid`. Returns whether one existed.
    ///
    /// Also used to reap entries left behind by processes that died.
    pub fn unregister(&self, pid: i32) -> bool {
        let mut removed = false;
        for slot in self.slots() {
            if slot.pid.load(Ordering::Acquire) != pid {
                continue;
            }
            slot.channel.store(0, Ordering::Release);
            if slot
                .pid
                .compare_exchange(pid, 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                removed = true;
            }
        }
        if removed {
            trace!(pid, "released registry slot");
        }
        removed
    }

    /// Channel `pid` is subscribed to, if any.
    pub fn channel_of(&self, pid: i32) -> Option<i64> {
        self.slots().iter().find_map(|slot| {
            if slot.pid.load(Ordering::Acquire) != pid {
                return None;
            }
            match slot.channel.load(Ordering::Acquire) {
                0 => None,
                channel => Some(channel),
            }
        })
    }

    /// Snapshot of all published entries, in slot order.
    pub fn entries(&self) -> Vec<SubscriberEntry> {
        self.slots()
            .iter()
            .filter_map(|slot| {
                let pid = slot.pid.load(Ordering::Acquire);
                let channel = slot.channel.load(Ordering::Acquire);
                (pid > 0 && channel != 0).then_some(SubscriberEntry { pid, channel })
            })
            .collect()
    }

    /// Detach this process's mapping.
    pub fn detach(self) -> Result<()> {
        self.segment.detach()?;
        Ok(())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("key", &self.key())
            .field("segment", &self.segment.id())
            .field("capacity", &self.capacity)
            .finish()
    }
}
