//! Named notification spaces shared between processes on one host.
//!
//! A broker instance is identified by an [`IpcKey`] and consists of a shared
//! subscriber [`Registry`] and a per-recipient [`Transport`]. Processes
//! [`open`] an instance, [`subscribe`] to a negative channel with a handler,
//! and [`send`] fixed-size messages by broadcast, unicast (to a pid) or
//! multicast (to a channel). Recipients are woken by a signal and their
//! handler runs on a background delivery thread.
//!
//! ```no_run
//! use nbroker_core::{create, open, send, subscribe, IpcKey, Target};
//!
//! let key = IpcKey::new(0x4e42_0001);
//! create(key)?;
//! let handle = open(key)?;
//! subscribe(handle, -5, |message| {
//!     println!("{} from {}", message.payload_str().unwrap_or("?"), message.sender());
//! })?;
//! send(handle, "hello", Target::Multicast(-5))?;
//! # Ok::<(), nbroker_core::BrokerError>(())
//! ```

pub mod broker;
pub mod config;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod transport;

pub use broker::{close, pending, send, settings, subscribe, subscribe_with, subscribers};
pub use config::{BrokerConfig, DEFAULT_REGISTRY_CAPACITY, DEFAULT_WAKE_SIGNAL, MAX_REGISTRY_CAPACITY};
pub use delivery::{is_armed, Handler};
pub use directory::{create, create_with_config, open, remove, BrokerHandle};
pub use error::{BrokerError, ErrorKind, Result};
pub use registry::{Registry, SubscriberEntry};
pub use resolver::resolve;
pub use transport::Transport;

pub use nbroker_frame::{Message, Target, PAYLOAD_SIZE};
pub use nbroker_sysv::IpcKey;
