//! # Poller
//!
//! Readiness multiplexer over [`mio::Poll`] with a software timer queue.
//!
//! The poller owns no sockets, only registrations. Owners (listener,
//! sessions, clients) register their sources under a [`Token`] handed out by
//! [`Poller::next_token`], then route the [`PollEvent`]s returned from
//! [`Poller::wait`] back to themselves by token.

use std::io;
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};
use tracing::trace;

use crate::timer::{TimerId, TimerQueue};

const EVENTS_CAPACITY: usize = 64;

/// One dispatched readiness or timer notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent
{
    /// Socket readiness.
    Io
    {
        /// Registration the event belongs to.
        token: Token,
        /// Data (or a pending accept) can be read.
        readable: bool,
        /// The socket accepts writes (or a connect finished).
        writable: bool,
        /// Peer closed one or both directions.
        hangup: bool,
        /// The socket reported an error condition.
        error: bool,
    },

    /// A timer scheduled with [`Poller::add_timer`] expired.
    Timer
    {
        /// Registration the timer belongs to.
        token: Token,
        /// Which timer fired.
        id: TimerId,
    },
}

impl PollEvent
{
    /// Token of the registration this event is addressed to.
    #[must_use]
    pub const fn token(&self) -> Token
    {
        match self {
            Self::Io { token, .. } | Self::Timer { token, .. } => *token,
        }
    }
}

/// Readiness poller plus timers.
pub struct Poller
{
    poll: Poll,
    events: Events,
    timers: TimerQueue,
    next_token: usize,
}

impl std::fmt::Debug for Poller
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Poller")
            .field("timers", &self.timers.len())
            .field("next_token", &self.next_token)
            .finish_non_exhaustive()
    }
}

impl Poller
{
    /// Create a new poller.
    ///
    /// ## Errors
    ///
    /// Fails if the OS readiness queue (epoll/kqueue/IOCP) cannot be created.
    pub fn new() -> io::Result<Self>
    {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
            timers: TimerQueue::new(),
            next_token: 0,
        })
    }

    /// Hand out a fresh token, unique for the lifetime of this poller.
    pub fn next_token(&mut self) -> Token
    {
        self.next_token += 1;
        Token(self.next_token)
    }

    /// Register a source for the first time.
    ///
    /// ## Errors
    ///
    /// Propagates the OS registration error.
    pub fn register<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().register(source, token, interest)
    }

    /// Change the interest of an already registered source.
    ///
    /// ## Errors
    ///
    /// Propagates the OS registration error.
    pub fn reregister<S>(&self, source: &mut S, token: Token, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().reregister(source, token, interest)
    }

    /// Remove a source from the poller.
    ///
    /// ## Errors
    ///
    /// Propagates the OS error; callers treat removal as best effort.
    pub fn deregister<S>(&self, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.poll.registry().deregister(source)
    }

    /// Schedule a timer delivering [`PollEvent::Timer`] to `token`.
    pub fn add_timer(&mut self, token: Token, after: Duration) -> TimerId
    {
        self.timers.add(token, after)
    }

    /// Cancel a timer. Cancelling twice (or after it fired) is a no-op.
    pub fn cancel_timer(&mut self, id: TimerId)
    {
        self.timers.cancel(id);
    }

    /// Block up to `timeout` for readiness or a timer and return what fired.
    ///
    /// The effective timeout is shortened to the nearest timer deadline. A
    /// signal interrupting the wait is reported as "nothing happened".
    ///
    /// ## Errors
    ///
    /// Propagates any OS polling failure other than `EINTR`.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<Vec<PollEvent>>
    {
        let now = Instant::now();
        let timeout = match self.timers.next_timeout(now) {
            Some(next) => timeout.min(next),
            None => timeout,
        };

        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                self.events.clear();
            }
            Err(e) => return Err(e),
        }

        let mut fired: Vec<PollEvent> = self
            .events
            .iter()
            .map(|event| PollEvent::Io {
                token: event.token(),
                readable: event.is_readable(),
                writable: event.is_writable(),
                hangup: event.is_read_closed() || event.is_write_closed(),
                error: event.is_error(),
            })
            .collect();

        for (token, id) in self.timers.expire(Instant::now()) {
            fired.push(PollEvent::Timer { token, id });
        }

        if !fired.is_empty() {
            trace!(count = fired.len(), "poller dispatch");
        }
        Ok(fired)
    }
}
