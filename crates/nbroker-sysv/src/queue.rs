use tracing::{debug, info, trace};

use crate::error::{Result, SysvError};
use crate::key::IpcKey;

const OBJECT: &str = "message queue";

/// Largest message body accepted by [`MessageQueue::send`].
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Kernel wire layout for msgsnd/msgrcv: a positive type tag followed by the body.
#[repr(C)]
struct MsgBuf {
    mtype: libc::c_long,
    mtext: [u8; MAX_MESSAGE_SIZE],
}

impl MsgBuf {
    fn new(mtype: libc::c_long) -> Box<Self> {
        Box::new(Self {
            mtype,
            mtext: [0u8; MAX_MESSAGE_SIZE],
        })
    }
}

/// A System V message queue.
///
/// Messages carry a positive type tag. The queue is FIFO overall, and a
/// receiver can retrieve the oldest message carrying a given tag without
/// disturbing messages with other tags. All operations are non-blocking.
#[derive(Debug)]
pub struct MessageQueue {
    id: i32,
    key: IpcKey,
}

impl MessageQueue {
    /// Create a fresh queue for `key`.
    ///
    /// Fails with [`SysvError::AlreadyExists`] if a queue already exists for `key`.
    pub fn create(key: IpcKey, mode: u32) -> Result<Self> {
        let flags = libc::IPC_CREAT | libc::IPC_EXCL | (mode & 0o777) as libc::c_int;
        // SAFETY: msgget has no memory-safety preconditions.
        let id = unsafe { libc::msgget(key.raw(), flags) };
        if id == -1 {
            let source = std::io::Error::last_os_error();
            return Err(match source.raw_os_error() {
                Some(libc::EEXIST) => SysvError::AlreadyExists {
                    object: OBJECT,
                    key: key.raw(),
                },
                _ => SysvError::Os {
                    op: "msgget",
                    source,
                },
            });
        }
        info!(%key, id, "created message queue");
        Ok(Self { id, key })
    }

    /// Open the existing queue for `key`.
    pub fn open(key: IpcKey) -> Result<Self> {
        let id = lookup(key)?;
        debug!(%key, id, "opened message queue");
        Ok(Self { id, key })
    }

    /// Remove the queue for `key`. Pending messages are discarded.
    pub fn remove(key: IpcKey) -> Result<()> {
        let id = lookup(key)?;
        remove_id(id)?;
        info!(%key, id, "removed message queue");
        Ok(())
    }

    /// Whether a queue exists for `key`.
    pub fn exists(key: IpcKey) -> Result<bool> {
        match lookup(key) {
            Ok(_) => Ok(true),
            Err(SysvError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Remove this queue.
    pub fn mark_for_removal(&self) -> Result<()> {
        remove_id(self.id)
    }

    /// Kernel identifier of the queue.
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn key(&self) -> IpcKey {
        self.key
    }

    /// Append a message tagged `tag` (must be positive).
    ///
    /// Never blocks: a full queue reports [`SysvError::QueueFull`].
    pub fn send(&self, tag: i64, body: &[u8]) -> Result<()> {
        let mtype = positive_tag(tag)?;
        if body.len() > MAX_MESSAGE_SIZE {
            return Err(SysvError::MessageTooLarge {
                size: body.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut buf = MsgBuf::new(mtype);
        buf.mtext[..body.len()].copy_from_slice(body);

        loop {
            // SAFETY: `buf` is a valid MsgBuf whose mtext holds at least `body.len()` bytes.
            let rc = unsafe {
                libc::msgsnd(
                    self.id,
                    (&*buf as *const MsgBuf).cast::<libc::c_void>(),
                    body.len(),
                    libc::IPC_NOWAIT,
                )
            };
            if rc == 0 {
                trace!(id = self.id, tag, len = body.len(), "enqueued message");
                return Ok(());
            }

            let source = std::io::Error::last_os_error();
            return Err(match source.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::EAGAIN) => SysvError::QueueFull { id: self.id },
                Some(libc::EIDRM) | Some(libc::EINVAL) => SysvError::Removed {
                    object: OBJECT,
                    id: self.id,
                },
                _ => SysvError::Os {
                    op: "msgsnd",
                    source,
                },
            });
        }
    }

    /// Retrieve the oldest message tagged `tag` into `buf`, without blocking.
    ///
    /// Returns `Ok(None)` when no such message is pending, otherwise the body length.
    pub fn try_recv(&self, tag: i64, buf: &mut [u8]) -> Result<Option<usize>> {
        let mtype = positive_tag(tag)?;
        let mut raw = MsgBuf::new(0);

        loop {
            // SAFETY: `raw` is a valid writable MsgBuf with MAX_MESSAGE_SIZE bytes of mtext.
            let received = unsafe {
                libc::msgrcv(
                    self.id,
                    (&mut *raw as *mut MsgBuf).cast::<libc::c_void>(),
                    MAX_MESSAGE_SIZE,
                    mtype,
                    libc::IPC_NOWAIT,
                )
            };
            if received >= 0 {
                let len = received as usize;
                if len > buf.len() {
                    return Err(SysvError::MessageTooLarge {
                        size: len,
                        max: buf.len(),
                    });
                }
                buf[..len].copy_from_slice(&raw.mtext[..len]);
                trace!(id = self.id, tag, len, "dequeued message");
                return Ok(Some(len));
            }

            let source = std::io::Error::last_os_error();
            return match source.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ENOMSG) => Ok(None),
                Some(libc::EIDRM) | Some(libc::EINVAL) => Err(SysvError::Removed {
                    object: OBJECT,
                    id: self.id,
                }),
                _ => Err(SysvError::Os {
                    op: "msgrcv",
                    source,
                }),
            };
        }
    }

    /// Number of messages currently pending, across all tags.
    pub fn pending(&self) -> Result<u64> {
        // SAFETY: msqid_ds is plain old data; all-zero is a valid bit pattern.
        let mut ds: libc::msqid_ds = unsafe { std::mem::zeroed() };
        // SAFETY: `ds` is a valid writable msqid_ds for IPC_STAT.
        let rc = unsafe { libc::msgctl(self.id, libc::IPC_STAT, &mut ds) };
        if rc == -1 {
            let source = std::io::Error::last_os_error();
            return Err(match source.raw_os_error() {
                Some(libc::EIDRM) | Some(libc::EINVAL) => SysvError::Removed {
                    object: OBJECT,
                    id: self.id,
                },
                _ => SysvError::Os {
                    op: "msgctl(IPC_STAT)",
                    source,
                },
            });
        }
        Ok(ds.msg_qnum as u64)
    }
}

fn positive_tag(tag: i64) -> Result<libc::c_long> {
    match libc::c_long::try_from(tag) {
        Ok(mtype) if mtype > 0 => Ok(mtype),
        _ => Err(SysvError::Os {
            op: "msgsnd/msgrcv",
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("message tag must be a positive long, got {tag}"),
            ),
        }),
    }
}

fn lookup(key: IpcKey) -> Result<i32> {
    // SAFETY: msgget has no memory-safety preconditions.
    let id = unsafe { libc::msgget(key.raw(), 0) };
    if id == -1 {
        let source = std::io::Error::last_os_error();
        return Err(match source.raw_os_error() {
            Some(libc::ENOENT) => SysvError::NotFound {
                object: OBJECT,
                key: key.raw(),
            },
            _ => SysvError::Os {
                op: "msgget",
                source,
            },
        });
    }
    Ok(id)
}

fn remove_id(id: i32) -> Result<()> {
    // SAFETY: IPC_RMID ignores the buffer argument.
    let rc = unsafe { libc::msgctl(id, libc::IPC_RMID, std::ptr::null_mut()) };
    if rc == -1 {
        let source = std::io::Error::last_os_error();
        return Err(match source.raw_os_error() {
            Some(libc::EIDRM) | Some(libc::EINVAL) => SysvError::Removed { object: OBJECT, id },
            _ => SysvError::Os {
                op: "msgctl(IPC_RMID)",
                source,
            },
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn private_queue() -> MessageQueue {
        MessageQueue::create(IpcKey::PRIVATE, 0o600).expect("private queue should be creatable")
    }

    #[test]
    fn selective_receive_by_tag() {
        let queue = private_queue();
        queue.send(10, b"for-ten").unwrap();
        queue.send(20, b"for-twenty").unwrap();

        let mut buf = [0u8; 64];
        let n = queue.try_recv(20, &mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"for-twenty");
        assert_eq!(queue.pending().unwrap(), 1);

        let n = queue.try_recv(10, &mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"for-ten");

        queue.mark_for_removal().unwrap();
    }

    #[test]
    fn fifo_within_one_tag() {
        let queue = private_queue();
        queue.send(7, b"first").unwrap();
        queue.send(8, b"other").unwrap();
        queue.send(7, b"second").unwrap();

        let mut buf = [0u8; 64];
        let n = queue.try_recv(7, &mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"first");
        let n = queue.try_recv(7, &mut buf).unwrap().unwrap();
        assert_eq!(&buf[..n], b"second");

        queue.mark_for_removal().unwrap();
    }

    #[test]
    fn try_recv_does_not_block_when_empty() {
        let queue = private_queue();
        let mut buf = [0u8; 16];
        assert!(queue.try_recv(1234, &mut buf).unwrap().is_none());
        queue.mark_for_removal().unwrap();
    }

    #[test]
    fn full_queue_reports_queue_full() {
        let queue = private_queue();
        let body = [0x5Au8; MAX_MESSAGE_SIZE];

        let mut result = Ok(());
        for _ in 0..100_000 {
            result = queue.send(1, &body);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(SysvError::QueueFull { .. })));

        queue.mark_for_removal().unwrap();
    }

    #[test]
    fn rejects_non_positive_tag_and_oversized_body() {
        let queue = private_queue();
        assert!(queue.send(0, b"x").is_err());
        assert!(queue.send(-3, b"x").is_err());

        let oversized = vec![0u8; MAX_MESSAGE_SIZE + 1];
        assert!(matches!(
            queue.send(1, &oversized),
            Err(SysvError::MessageTooLarge { .. })
        ));

        queue.mark_for_removal().unwrap();
    }

    #[test]
    fn removed_queue_reports_removed() {
        let queue = private_queue();
        queue.mark_for_removal().unwrap();
        assert!(matches!(
            queue.send(1, b"late"),
            Err(SysvError::Removed { .. })
        ));
    }
}
