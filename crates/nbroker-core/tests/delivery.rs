#![cfg(target_os = "linux")]

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use nbroker_core::{
    close, create, create_with_config, is_armed, open, pending, remove, send, settings, subscribe,
    subscribe_with, subscribers, BrokerConfig, BrokerError, ErrorKind, Handler, IpcKey, Message,
    Registry, SubscriberEntry, Target, Transport,
};
use nbroker_frame::Envelope;
use nbroker_sysv::{current_pid, MessageQueue, SharedSegment};
use serial_test::serial;

const TIMEOUT: Duration = Duration::from_secs(5);

fn unique_key() -> IpcKey {
    static COUNTER: AtomicI32 = AtomicI32::new(1);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    IpcKey::new(0x4e00_0000 ^ (current_pid() << 8) ^ n)
}

/// Removes the instance when dropped, so failed assertions do not leak IPC objects.
struct Instance(IpcKey);

impl Instance {
    fn create() -> Self {
        let key = unique_key();
        create(key).expect("instance should be created");
        Self(key)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        let _ = remove(self.0);
    }
}

fn collector() -> (impl Fn(Message) + Send + Sync + 'static, mpsc::Receiver<Message>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let handler = move |message: Message| {
        let _ = tx.lock().unwrap().send(message);
    };
    (handler, rx)
}

/// Handler that forwards `(tag, payload)` so tests can tell handlers apart.
fn tagged(
    tag: &'static str,
    tx: &mpsc::Sender<(&'static str, String)>,
) -> impl Fn(Message) + Send + Sync + 'static {
    let tx = Mutex::new(tx.clone());
    move |message: Message| {
        let payload = message.payload_str().unwrap_or_default().to_owned();
        let _ = tx.lock().unwrap().send((tag, payload));
    }
}

#[test]
#[serial]
fn multicast_to_own_channel_is_delivered() {
    let instance = Instance::create();
    let handle = open(instance.0).unwrap();
    let (handler, rx) = collector();
    subscribe(handle, -5, handler).unwrap();
    assert!(is_armed());

    assert_eq!(send(handle, "hi", Target::Multicast(-5)).unwrap(), 1);

    let message = rx.recv_timeout(TIMEOUT).expect("message should arrive");
    assert_eq!(message.payload(), b"hi");
    assert_eq!(message.sender(), current_pid());
    assert_eq!(message.channel(), -5);

    close(handle).unwrap();
    assert!(!is_armed());
}

#[test]
#[serial]
fn burst_is_drained_in_order() {
    let instance = Instance::create();
    let handle = open(instance.0).unwrap();
    let (handler, rx) = collector();
    subscribe(handle, -1, handler).unwrap();

    for i in 0..50 {
        send(handle, format!("m{i}"), Target::Broadcast).unwrap();
    }

    let received: Vec<String> = (0..50)
        .map(|_| {
            let message = rx.recv_timeout(TIMEOUT).expect("burst should drain");
            message.payload_str().unwrap().to_owned()
        })
        .collect();
    let expected: Vec<String> = (0..50).map(|i| format!("m{i}")).collect();
    assert_eq!(received, expected);
    assert_eq!(pending(handle).unwrap(), 0);

    close(handle).unwrap();
}

#[test]
#[serial]
fn unicast_reaches_subscribed_pid_only() {
    let instance = Instance::create();
    let handle = open(instance.0).unwrap();
    let (handler, rx) = collector();
    subscribe(handle, -3, handler).unwrap();

    send(handle, "direct", Target::Unicast(current_pid())).unwrap();
    let message = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(message.channel(), i64::from(current_pid()));

    let err = send(handle, "nobody", Target::Unicast(1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSubscribers);
    let err = send(handle, "nobody", Target::Multicast(-4)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSubscribers);

    close(handle).unwrap();
}

#[test]
#[serial]
fn non_negative_channels_are_rejected() {
    let instance = Instance::create();
    let handle = open(instance.0).unwrap();

    for channel in [0, 3] {
        let err = subscribe(handle, channel, |_| {}).unwrap_err();
        assert!(matches!(err, BrokerError::InvalidChannel { .. }));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
    assert!(subscribers(handle).unwrap().is_empty());
    assert!(!is_armed());

    close(handle).unwrap();
}

#[test]
#[serial]
fn send_with_no_subscribers_fails() {
    let instance = Instance::create();
    let handle = open(instance.0).unwrap();
    let err = send(handle, "x", Target::Broadcast).unwrap_err();
    assert!(matches!(err, BrokerError::NoSubscribers { .. }));
    close(handle).unwrap();
}

#[test]
#[serial]
fn lifecycle_errors() {
    let key = unique_key();
    assert_eq!(open(key).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(remove(key).unwrap_err().kind(), ErrorKind::NotFound);

    create(key).unwrap();
    assert_eq!(create(key).unwrap_err().kind(), ErrorKind::AlreadyExists);

    let handle = open(key).unwrap();
    assert_eq!(open(key).unwrap(), handle);
    close(handle).unwrap();
    assert_eq!(close(handle).unwrap_err().kind(), ErrorKind::NotFound);

    remove(key).unwrap();
    assert_eq!(remove(key).unwrap_err().kind(), ErrorKind::NotFound);

    create(key).unwrap();
    let handle = open(key).unwrap();
    assert!(subscribers(handle).unwrap().is_empty());
    close(handle).unwrap();
    remove(key).unwrap();
}

#[test]
#[serial]
fn create_applies_config() {
    let key = unique_key();
    let config = BrokerConfig::default()
        .with_registry_capacity(4)
        .with_wake_signal(12);
    create_with_config(key, &config).unwrap();
    let _guard = Instance(key);

    let handle = open(key).unwrap();
    assert_eq!(settings(handle).unwrap(), (4, 12));
    close(handle).unwrap();
}

#[test]
#[serial]
fn create_rolls_back_when_queue_exists() {
    let key = unique_key();
    let queue = MessageQueue::create(key, 0o600).unwrap();

    assert_eq!(create(key).unwrap_err().kind(), ErrorKind::AlreadyExists);
    assert!(!SharedSegment::exists(key).unwrap());

    drop(queue);
    // Only the queue half exists; remove still succeeds.
    remove(key).unwrap();
    assert!(!MessageQueue::exists(key).unwrap());
}

#[test]
#[serial]
fn dead_subscribers_are_reaped_and_reported() {
    let instance = Instance::create();
    let handle = open(instance.0).unwrap();
    let (handler, rx) = collector();
    subscribe(handle, -5, handler).unwrap();

    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead = child.id() as i32;
    child.wait().unwrap();

    let registry = Registry::attach(SharedSegment::open(instance.0).unwrap()).unwrap();
    registry.register(dead, -5).unwrap();

    match send(handle, "still arrives", Target::Multicast(-5)) {
        Err(BrokerError::RecipientUnreachable {
            unreachable,
            delivered,
        }) => {
            assert_eq!(unreachable, vec![dead]);
            assert_eq!(delivered, 1);
        }
        other => panic!("expected RecipientUnreachable, got {other:?}"),
    }
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().payload(), b"still arrives");
    assert_eq!(registry.channel_of(dead), None);

    registry.detach().unwrap();
    close(handle).unwrap();
}

#[test]
#[serial]
fn panicking_handler_does_not_stop_delivery() {
    let instance = Instance::create();
    let handle = open(instance.0).unwrap();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    subscribe(handle, -2, move |message: Message| {
        if message.payload() == b"boom" {
            panic!("handler failure");
        }
        let _ = tx.lock().unwrap().send(message);
    })
    .unwrap();

    send(handle, "boom", Target::Broadcast).unwrap();
    send(handle, "after", Target::Broadcast).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().payload(), b"after");

    close(handle).unwrap();
}

#[test]
#[serial]
fn handler_may_close_its_own_subscription() {
    let instance = Instance::create();
    let handle = open(instance.0).unwrap();
    let (tx, rx) = mpsc::channel();
    let tx = Arc::new(Mutex::new(tx));
    subscribe(handle, -8, move |_message: Message| {
        let result = close(handle);
        let _ = tx.lock().unwrap().send(result.is_ok());
    })
    .unwrap();

    send(handle, "close yourself", Target::Multicast(-8)).unwrap();
    assert!(rx.recv_timeout(TIMEOUT).unwrap());
    assert!(!is_armed());
    assert_eq!(close(handle).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
#[serial]
fn long_payloads_are_truncated() {
    let instance = Instance::create();
    let handle = open(instance.0).unwrap();
    let (handler, rx) = collector();
    subscribe(handle, -1, handler).unwrap();

    send(handle, vec![b'a'; 1000], Target::Broadcast).unwrap();
    let message = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(message.payload().len(), nbroker_core::PAYLOAD_SIZE);

    close(handle).unwrap();
}

#[test]
#[serial]
fn one_wake_drains_every_open_instance() {
    let first = Instance::create();
    let second = Instance::create();
    let ha = open(first.0).unwrap();
    let hb = open(second.0).unwrap();
    let (handler, rx) = collector();
    let handler: Handler = Arc::new(handler);
    subscribe_with(ha, -1, Arc::clone(&handler)).unwrap();
    subscribe_with(hb, -1, handler).unwrap();

    // Queue on the second instance without signalling anyone.
    let quiet = Transport::new(MessageQueue::open(second.0).unwrap());
    for i in 0..5 {
        let message = Message::new(-1, current_pid(), format!("b{i}"));
        quiet.enqueue(&Envelope::new(current_pid(), message)).unwrap();
    }
    for i in 0..5 {
        send(ha, format!("a{i}"), Target::Multicast(-1)).unwrap();
    }

    let mut received: Vec<String> = (0..10)
        .map(|_| {
            let message = rx.recv_timeout(TIMEOUT).expect("both instances should drain");
            message.payload_str().unwrap().to_owned()
        })
        .collect();
    let from_b: Vec<String> = received.iter().filter(|p| p.starts_with('b')).cloned().collect();
    assert_eq!(from_b, ["b0", "b1", "b2", "b3", "b4"]);
    received.sort();
    assert_eq!(received, ["a0", "a1", "a2", "a3", "a4", "b0", "b1", "b2", "b3", "b4"]);
    assert_eq!(pending(hb).unwrap(), 0);

    close(ha).unwrap();
    close(hb).unwrap();
}

#[test]
#[serial]
fn failed_subscribe_keeps_existing_handler() {
    let first = Instance::create();
    let ha = open(first.0).unwrap();
    let (tx, rx) = mpsc::channel();
    subscribe(ha, -1, tagged("first", &tx)).unwrap();

    let key = unique_key();
    create_with_config(key, &BrokerConfig::default().with_registry_capacity(1)).unwrap();
    let _full = Instance(key);
    let hb = open(key).unwrap();
    let other = Registry::attach(SharedSegment::open(key).unwrap()).unwrap();
    // pid 1 is always alive, so the slot stays taken.
    other.register(1, -1).unwrap();

    let err = subscribe(hb, -1, tagged("second", &tx)).unwrap_err();
    assert!(matches!(err, BrokerError::RegistryFull { capacity: 1 }));
    assert_eq!(
        subscribers(hb).unwrap(),
        vec![SubscriberEntry { pid: 1, channel: -1 }]
    );
    assert!(is_armed());

    send(ha, "x", Target::Multicast(-1)).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ("first", "x".to_owned()));

    other.detach().unwrap();
    close(hb).unwrap();
    close(ha).unwrap();
    assert!(!is_armed());
}

#[test]
#[serial]
fn failed_arm_rolls_back_registration() {
    let first = Instance::create();
    let ha = open(first.0).unwrap();
    let (tx, rx) = mpsc::channel();
    subscribe(ha, -2, tagged("first", &tx)).unwrap();

    // An instance whose wake signal cannot be caught (SIGKILL).
    let key = unique_key();
    let segment = SharedSegment::create(key, Registry::segment_size(4), 0o600).unwrap();
    Registry::initialize(segment, 4, 9).unwrap().detach().unwrap();
    MessageQueue::create(key, 0o600).unwrap();
    let _broken = Instance(key);
    let hb = open(key).unwrap();

    assert!(subscribe(hb, -2, tagged("second", &tx)).is_err());
    assert!(subscribers(hb).unwrap().is_empty());
    assert_eq!(
        subscribers(ha).unwrap(),
        vec![SubscriberEntry {
            pid: current_pid(),
            channel: -2
        }]
    );

    send(ha, "y", Target::Multicast(-2)).unwrap();
    assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ("first", "y".to_owned()));

    close(hb).unwrap();
    close(ha).unwrap();
}

#[test]
#[serial]
fn remove_while_subscribed_disarms() {
    let key = unique_key();
    create(key).unwrap();
    let handle = open(key).unwrap();
    let (handler, _rx) = collector();
    subscribe(handle, -1, handler).unwrap();
    assert!(is_armed());

    remove(key).unwrap();
    assert!(!is_armed());
    assert_eq!(close(handle).unwrap_err().kind(), ErrorKind::NotFound);
}
