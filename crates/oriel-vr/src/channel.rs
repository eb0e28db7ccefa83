//! Bounded signal channel for handing control messages to the render thread.
//!
//! One producer (the owning/lifecycle thread) posts discrete signals, one
//! consumer (the render thread) drains them between frames. Neither side may
//! block: `post` drops the signal when the buffer is full (recoverable
//! signals can be reissued, and the one mandatory signal — shutdown — is
//! posted once and stays queued until polled, so the capacity only needs to
//! be generous relative to the expected number of in-flight messages), and
//! `poll` returns immediately when the buffer is empty.
//!
//! A mutex around a bounded deque is enough here: the render thread touches
//! the lock once per drained signal, a handful of times per frame at most. A
//! lock-free ring would satisfy the same contract but is a performance
//! choice, not a correctness requirement.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Default capacity of the signal buffer.
pub const SIGNAL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// The owning thread wants the render loop to wind down.
    ExitRequested,
}

/// A control message with an optional payload interpreted per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signal {
    pub kind: SignalKind,
    pub payload: u64,
}

impl Signal {
    pub fn new(kind: SignalKind, payload: u64) -> Self {
        Self { kind, payload }
    }

    pub fn exit() -> Self {
        Self::new(SignalKind::ExitRequested, 0)
    }
}

/// Single-producer single-consumer bounded FIFO of [`Signal`]s.
#[derive(Debug)]
pub struct SignalChannel {
    queue: Mutex<VecDeque<Signal>>,
    capacity: usize,
}

impl Default for SignalChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalChannel {
    pub fn new() -> Self {
        Self::with_capacity(SIGNAL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Post a signal without blocking. Dropped silently when the buffer is
    /// full.
    pub fn post(&self, signal: Signal) {
        let mut queue = match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if queue.len() < self.capacity {
            queue.push_back(signal);
        }
    }

    /// Take the oldest pending signal, if any, without blocking.
    pub fn poll(&self) -> Option<Signal> {
        let mut queue = match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        queue.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{thread_rng, Rng};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn poll_on_empty_returns_none() {
        let channel = SignalChannel::new();
        assert_eq!(channel.poll(), None);
    }

    #[test]
    fn signals_are_fifo_and_delivered_once() {
        let channel = SignalChannel::new();
        for payload in 0..5 {
            channel.post(Signal::new(SignalKind::ExitRequested, payload));
        }
        for payload in 0..5 {
            assert_eq!(
                channel.poll(),
                Some(Signal::new(SignalKind::ExitRequested, payload))
            );
        }
        assert_eq!(channel.poll(), None);
    }

    #[test]
    fn full_channel_drops_new_signals() {
        let channel = SignalChannel::with_capacity(2);
        channel.post(Signal::new(SignalKind::ExitRequested, 1));
        channel.post(Signal::new(SignalKind::ExitRequested, 2));
        channel.post(Signal::new(SignalKind::ExitRequested, 3));

        assert_eq!(channel.poll().map(|s| s.payload), Some(1));
        assert_eq!(channel.poll().map(|s| s.payload), Some(2));
        assert_eq!(channel.poll(), None);
    }

    #[test]
    fn draining_frees_capacity_again() {
        let channel = SignalChannel::with_capacity(1);
        channel.post(Signal::new(SignalKind::ExitRequested, 1));
        channel.post(Signal::new(SignalKind::ExitRequested, 2));
        assert_eq!(channel.poll().map(|s| s.payload), Some(1));

        channel.post(Signal::new(SignalKind::ExitRequested, 3));
        assert_eq!(channel.poll().map(|s| s.payload), Some(3));
    }

    #[test]
    fn posted_signal_is_visible_to_the_consumer_thread() {
        let channel = Arc::new(SignalChannel::new());
        let producer = channel.clone();

        let handle = thread::spawn(move || {
            producer.post(Signal::exit());
        });
        handle.join().unwrap();

        assert_eq!(channel.poll(), Some(Signal::exit()));
    }

    #[test]
    fn random_post_poll_interleaving_matches_model() {
        let mut rng = thread_rng();
        let channel = SignalChannel::with_capacity(8);
        let mut model: VecDeque<u64> = VecDeque::new();
        let mut next: u64 = 0;

        for _ in 0..10_000 {
            if rng.gen_bool(0.5) {
                channel.post(Signal::new(SignalKind::ExitRequested, next));
                if model.len() < 8 {
                    model.push_back(next);
                }
                next += 1;
            } else {
                match channel.poll() {
                    Some(signal) => assert_eq!(Some(signal.payload), model.pop_front()),
                    None => assert!(model.is_empty()),
                }
            }
        }
    }
}
