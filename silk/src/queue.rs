use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::error::QueueError;
use crate::msg::RawMessage;

/// The default ring-buffer capacity, matching the original's
/// `MSG_QUEUE_SIZE` (8 * 1024).
pub const DEFAULT_CAPACITY: u32 = 8 * 1024;

struct RingState {
    msgs: Box<[RawMessage]>,
    /// Bitmask for wrapping indices; `capacity - 1` since capacity is a
    /// power of two.
    mask: u32,
    next_write: u32,
    next_read: u32,
    /// Tracked separately from `next_write - next_read` so all `capacity`
    /// slots are usable — a plain two-index ring would need to sacrifice
    /// one slot to tell full from empty, but spec.md's capacity is meant
    /// to hold exactly `capacity` messages, not `capacity - 1`.
    count: u32,
}

impl RingState {
    fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn is_full(&self) -> bool {
        self.count as usize == self.msgs.len()
    }

    fn len(&self) -> u32 {
        self.count
    }
}

/// A bounded FIFO of `(silk_id, code, ctx)` messages, protected by one
/// mutex held only for the O(1) index manipulation.
///
/// Producers may be any thread: the application idle callback, an external
/// thread, or a silk sending to another silk. Ordering across the single
/// mutex is strict FIFO regardless of producer.
pub struct MessageQueue {
    state: Mutex<RingState>,
    not_empty: Condvar,
}

impl MessageQueue {
    /// Creates a queue with the given power-of-two capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero or not a power of two — this is a
    /// configuration error caught during [`crate::Engine::init`]'s own
    /// validation, not something callers should reach with an untrusted
    /// value.
    pub fn new(capacity: u32) -> Self {
        assert!(capacity.is_power_of_two(), "queue capacity must be a power of two");
        let msgs = vec![RawMessage::zeroed(); capacity as usize].into_boxed_slice();
        Self {
            state: Mutex::new(RingState {
                msgs,
                mask: capacity - 1,
                next_write: 0,
                next_read: 0,
                count: 0,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueues at the tail. Fails with [`QueueError::QueueFull`] once
    /// capacity is reached; there is no retry or blocking.
    pub(crate) fn send(&self, msg: RawMessage) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        if state.is_full() {
            return Err(QueueError::QueueFull);
        }
        let idx = (state.next_write & state.mask) as usize;
        state.msgs[idx] = msg;
        state.next_write = state.next_write.wrapping_add(1);
        state.count += 1;
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeues from the head, or returns `None` if the queue is empty.
    pub(crate) fn try_next(&self) -> Option<RawMessage> {
        let mut state = self.state.lock().unwrap();
        if state.is_empty() {
            return None;
        }
        let idx = (state.next_read & state.mask) as usize;
        let msg = state.msgs[idx];
        state.next_read = state.next_read.wrapping_add(1);
        state.count -= 1;
        Some(msg)
    }

    /// Dequeues from the head, parking the calling thread on a condvar
    /// while the queue is empty instead of busy-polling.
    pub(crate) fn recv_blocking(&self) -> RawMessage {
        let mut state = self.state.lock().unwrap();
        while state.is_empty() {
            state = self.not_empty.wait(state).unwrap();
        }
        let idx = (state.next_read & state.mask) as usize;
        let msg = state.msgs[idx];
        state.next_read = state.next_read.wrapping_add(1);
        state.count -= 1;
        msg
    }

    /// Dequeues from the head, parking for at most `timeout` while the
    /// queue is empty. Returns `None` on timeout rather than spuriously
    /// retrying forever, so callers can interleave idle work.
    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Option<RawMessage> {
        let mut state = self.state.lock().unwrap();
        while state.is_empty() {
            let (guard, result) = self.not_empty.wait_timeout(state, timeout).unwrap();
            state = guard;
            if result.timed_out() && state.is_empty() {
                return None;
            }
        }
        let idx = (state.next_read & state.mask) as usize;
        let msg = state.msgs[idx];
        state.next_read = state.next_read.wrapping_add(1);
        state.count -= 1;
        Some(msg)
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().unwrap().is_full()
    }

    pub fn len(&self) -> u32 {
        self.state.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{Message, MsgCode};
    use crate::record::SilkId;

    fn raw(code: MsgCode) -> RawMessage {
        RawMessage::from_message(Message::new(SilkId::new(0), code), 0)
    }

    #[test]
    fn fifo_ordering() {
        let q = MessageQueue::new(8);
        for i in 0..5u32 {
            q.send(raw(MsgCode::App(1000 + i))).unwrap();
        }
        for i in 0..5u32 {
            let m = q.try_next().unwrap().to_message();
            assert_eq!(m.code, MsgCode::App(1000 + i));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn full_then_drains_one() {
        let q = MessageQueue::new(8);
        for _ in 0..8 {
            q.send(raw(MsgCode::Boot)).unwrap();
        }
        assert!(q.is_full());
        assert!(matches!(q.send(raw(MsgCode::Boot)), Err(QueueError::QueueFull)));
        assert!(q.try_next().is_some());
        assert!(q.send(raw(MsgCode::Boot)).is_ok());
    }

    #[test]
    fn empty_try_next_is_none() {
        let q = MessageQueue::new(8);
        assert!(q.try_next().is_none());
    }
}
