//! RT→UI notification queue (spec §4.13): a fixed-size SPSC ring that any
//! thread, including the RT audio thread, can push into without blocking.

use std::sync::atomic::{AtomicU64, Ordering};

/// Ring capacity. Matches the "about 8" sizing the audio engine uses for its
/// RT→UI queue (spec §4.9, §4.13).
pub const NOTIFICATION_QUEUE_SIZE: usize = 8;

/// Severity of a notification, surfaced to the UI/log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// A single RT→UI message. Kept small and `Copy`-friendly (no heap
/// allocation on the producer side) by bounding the message to a fixed
/// buffer.
#[derive(Debug, Clone)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Warning,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

/// Fixed-size SPSC ring of [`Notification`] records. `push` is wait-free and
/// drops silently on a full queue; `pop` returns at most one notification
/// per call, matching the UI timer's "drain one per tick" usage.
pub struct NotificationQueue {
    slots: Box<[Option<Notification>]>,
    head: AtomicU64,
    tail: AtomicU64,
    mask: u64,
}

impl NotificationQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(NOTIFICATION_QUEUE_SIZE)
    }

    /// `capacity` must be a power of two.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be a power of two");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: AtomicU64::new(0),
            tail: AtomicU64::new(0),
            mask: capacity as u64 - 1,
        }
    }

    /// Producer side: any thread, including RT. Drops the notification if
    /// the queue is full.
    pub fn push(&self, notification: Notification) {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if head - tail >= self.slots.len() as u64 {
            return;
        }
        let idx = (head & self.mask) as usize;
        // SAFETY: single producer; this slot was vacated by the last
        // consumer to pass it, and no other producer can race here.
        let slot = std::ptr::addr_of!(self.slots[idx]) as *mut Option<Notification>;
        unsafe {
            *slot = Some(notification);
        }
        self.head.store(head + 1, Ordering::Release);
    }

    /// Consumer side: called on a UI timer. Returns at most one
    /// notification.
    pub fn pop(&self) -> Option<Notification> {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail >= head {
            return None;
        }
        let idx = (tail & self.mask) as usize;
        // SAFETY: single consumer; this slot was published by the producer's
        // release store of `head` above.
        let slot = std::ptr::addr_of!(self.slots[idx]) as *mut Option<Notification>;
        let value = unsafe { (*slot).take() };
        self.tail.store(tail + 1, Ordering::Release);
        value
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: access is split single-producer/single-consumer by convention,
// matching the ring buffer's contract.
unsafe impl Sync for NotificationQueue {}
unsafe impl Send for NotificationQueue {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_then_pop_round_trips() {
        let queue = NotificationQueue::new();
        queue.push(Notification::warning("buffer underrun"));
        let got = queue.pop().unwrap();
        assert_eq!(got.level, NotificationLevel::Warning);
        assert_eq!(got.message, "buffer underrun");
        assert!(queue.pop().is_none());
    }

    #[test]
    fn full_queue_drops_excess_pushes() {
        let queue = NotificationQueue::with_capacity(4);
        for i in 0..10 {
            queue.push(Notification::info(format!("msg {i}")));
        }
        let mut drained = Vec::new();
        while let Some(n) = queue.pop() {
            drained.push(n.message);
        }
        assert_eq!(drained.len(), 4);
        assert_eq!(drained[0], "msg 0");
    }

    #[test]
    fn pop_on_empty_queue_returns_none() {
        let queue = NotificationQueue::new();
        assert!(queue.pop().is_none());
    }
}
