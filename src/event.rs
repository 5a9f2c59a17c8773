//! Event bus: per-window bounded FIFO queues fed by the keyboard driver
//! and the compositor (resize, quit).
//!
//! Grounded in `spec.md` §4.7/§3. Overflow drops the oldest event; within
//! one window, source order is preserved, but there is no ordering
//! guarantee across windows.

use std::{
    collections::VecDeque,
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

/// A keyboard modifier mask (ctrl/shift/alt/super), kept as a plain bitset
/// rather than `bitflags!` since apps only ever compare it, never combine
/// it programmatically.
pub type Modifiers = u32;

/// The tagged event union delivered to windows.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Event {
    /// No event was available (a non-blocking poll found nothing).
    None,
    /// The application should terminate.
    Quit,
    /// A key changed state.
    Key {
        /// Hardware scancode.
        scancode: u32,
        /// Logical keycode.
        keycode: u32,
        /// Active modifier mask at the time of the event.
        modifiers: Modifiers,
        /// Decoded text codepoint, if any.
        text: Option<char>,
        /// True if this is a key-down, false if key-up.
        down: bool,
        /// True if this is an auto-repeat of a held key.
        repeat: bool,
    },
    /// The window's logical size changed.
    WindowResize {
        /// New width in pixels.
        width: u32,
        /// New height in pixels.
        height: u32,
    },
}

/// A bounded, FIFO, single-consumer event queue for one window.
pub struct EventQueue {
    capacity: usize,
    state: Mutex<VecDeque<Event>>,
    cond: Condvar,
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue").field("capacity", &self.capacity).finish()
    }
}

impl EventQueue {
    /// Creates a queue holding at most `capacity` events before dropping
    /// the oldest on overflow.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(VecDeque::with_capacity(capacity)),
            cond: Condvar::new(),
        }
    }

    /// Appends `event`, dropping the oldest queued event if at capacity.
    pub fn push(&self, event: Event) {
        let mut queue = self.state.lock().expect("event queue poisoned");
        if queue.len() == self.capacity {
            queue.pop_front();
            log::warn!("event queue full, dropped oldest event");
        }
        queue.push_back(event);
        self.cond.notify_one();
    }

    /// Pops the oldest queued event, or [`Event::None`] if empty.
    pub fn pop(&self) -> Event {
        self.state
            .lock()
            .expect("event queue poisoned")
            .pop_front()
            .unwrap_or(Event::None)
    }

    /// Pops the oldest queued event, blocking up to `timeout` (or
    /// indefinitely if `None`) for one to arrive.
    pub fn pop_blocking(&self, timeout: Option<Duration>) -> Event {
        let mut queue = self.state.lock().expect("event queue poisoned");
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(event) = queue.pop_front() {
                return event;
            }
            match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Event::None;
                    }
                    let (guard, result) = self
                        .cond
                        .wait_timeout(queue, remaining)
                        .expect("event queue poisoned");
                    queue = guard;
                    if result.timed_out() && queue.is_empty() {
                        return Event::None;
                    }
                }
                None => {
                    queue = self.cond.wait(queue).expect("event queue poisoned");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn fifo_order_is_preserved_within_one_window() {
        let q = EventQueue::new(8);
        q.push(Event::Quit);
        q.push(Event::WindowResize { width: 1, height: 2 });
        assert_eq!(q.pop(), Event::Quit);
        assert_eq!(q.pop(), Event::WindowResize { width: 1, height: 2 });
    }

    #[test]
    fn overflow_drops_oldest() {
        let q = EventQueue::new(2);
        q.push(Event::WindowResize { width: 1, height: 1 });
        q.push(Event::WindowResize { width: 2, height: 2 });
        q.push(Event::WindowResize { width: 3, height: 3 });
        assert_eq!(q.pop(), Event::WindowResize { width: 2, height: 2 });
        assert_eq!(q.pop(), Event::WindowResize { width: 3, height: 3 });
    }

    #[test]
    fn empty_nonblocking_poll_returns_none() {
        let q = EventQueue::new(4);
        assert_eq!(q.pop(), Event::None);
    }

    #[test]
    fn blocking_poll_times_out() {
        let q = EventQueue::new(4);
        let start = Instant::now();
        assert_eq!(q.pop_blocking(Some(Duration::from_millis(20))), Event::None);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
