//! # Timer Queue
//!
//! Software timers multiplexed with socket readiness by the [`Poller`].
//!
//! Deadlines live in a min-heap. Cancellation is lazy: a cancelled id is
//! dropped from the live set and skipped when its heap entry surfaces, which
//! keeps [`TimerQueue::cancel`] O(1) and idempotent.
//!
//! [`Poller`]: crate::poller::Poller

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use mio::Token;

/// Identifier of one scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId
{
    /// Raw numeric id.
    #[must_use]
    pub const fn as_u64(self) -> u64
    {
        self.0
    }
}

/// Min-heap of `(deadline, id)` plus the live set of ids.
#[derive(Debug, Default)]
pub struct TimerQueue
{
    heap: BinaryHeap<Reverse<(Instant, TimerId)>>,
    live: HashMap<TimerId, Token>,
    next_id: u64,
}

impl TimerQueue
{
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Schedule a timer for `token`, firing `after` from now.
    pub fn add(&mut self, token: Token, after: Duration) -> TimerId
    {
        self.add_at(token, Instant::now() + after)
    }

    /// Schedule a timer for `token` at an absolute deadline.
    pub fn add_at(&mut self, token: Token, deadline: Instant) -> TimerId
    {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.heap.push(Reverse((deadline, id)));
        self.live.insert(id, token);
        id
    }

    /// Cancel a timer. Returns `false` if it already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool
    {
        self.live.remove(&id).is_some()
    }

    /// Number of timers still pending.
    #[must_use]
    pub fn len(&self) -> usize
    {
        self.live.len()
    }

    /// `true` if no timer is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.live.is_empty()
    }

    /// Time left until the earliest live deadline, saturating at zero.
    pub fn next_timeout(&mut self, now: Instant) -> Option<Duration>
    {
        self.discard_cancelled();
        self.heap
            .peek()
            .map(|Reverse((deadline, _))| deadline.saturating_duration_since(now))
    }

    /// Pop every live timer whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<(Token, TimerId)>
    {
        let mut fired = Vec::new();
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            if let Some(token) = self.live.remove(&id) {
                fired.push((token, id));
            }
        }
        fired
    }

    fn discard_cancelled(&mut self)
    {
        while let Some(Reverse((_, id))) = self.heap.peek() {
            if self.live.contains_key(id) {
                break;
            }
            self.heap.pop();
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_expire_in_deadline_order()
    {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        let late = queue.add_at(Token(1), now + Duration::from_millis(20));
        let early = queue.add_at(Token(2), now + Duration::from_millis(10));

        let fired = queue.expire(now + Duration::from_millis(30));
        assert_eq!(fired, vec![(Token(2), early), (Token(1), late)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_cancel_is_idempotent()
    {
        let mut queue = TimerQueue::new();
        let id = queue.add(Token(7), Duration::from_secs(60));
        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(queue.expire(Instant::now() + Duration::from_secs(120)).is_empty());
    }

    #[test]
    fn test_next_timeout_skips_cancelled()
    {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        let first = queue.add_at(Token(1), now + Duration::from_millis(5));
        queue.add_at(Token(2), now + Duration::from_millis(50));
        queue.cancel(first);

        assert_eq!(queue.next_timeout(now), Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_next_timeout_empty()
    {
        let mut queue = TimerQueue::new();
        assert_eq!(queue.next_timeout(Instant::now()), None);
    }
}
