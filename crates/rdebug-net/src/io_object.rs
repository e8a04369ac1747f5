//! # IO Object
//!
//! Registration bookkeeping binding one socket to the [`Poller`].
//!
//! An [`IoObject`] remembers its token, the interest currently registered
//! and the timer it owns (if any). It never touches protocol data. Owners
//! implement [`EventHandler`] and let [`dispatch`] route events to the right
//! callback.

use std::io;
use std::time::Duration;

use mio::event::Source;
use mio::{Interest, Token};
use tracing::trace;

use crate::poller::{PollEvent, Poller};
use crate::timer::TimerId;

/// Registration state of one socket.
#[derive(Debug)]
pub struct IoObject
{
    token: Token,
    interest: Option<Interest>,
    timer: Option<TimerId>,
}

impl IoObject
{
    /// Reserve a token on `poller`. Nothing is registered yet.
    pub fn new(poller: &mut Poller) -> Self
    {
        Self {
            token: poller.next_token(),
            interest: None,
            timer: None,
        }
    }

    /// Token this object receives events under.
    #[must_use]
    pub const fn token(&self) -> Token
    {
        self.token
    }

    /// `true` while the socket is registered with the poller.
    #[must_use]
    pub const fn is_registered(&self) -> bool
    {
        self.interest.is_some()
    }

    /// Register (or re-register) `source` with exactly `interest`.
    ///
    /// ## Errors
    ///
    /// Propagates the OS registration error.
    pub fn set_fd<S>(&mut self, poller: &Poller, source: &mut S, interest: Interest) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        match self.interest {
            Some(current) if current == interest => return Ok(()),
            Some(_) => poller.reregister(source, self.token, interest)?,
            None => poller.register(source, self.token, interest)?,
        }
        self.interest = Some(interest);
        Ok(())
    }

    /// Add write interest, keeping read interest.
    ///
    /// ## Errors
    ///
    /// Propagates the OS registration error.
    pub fn set_pollout<S>(&mut self, poller: &Poller, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.set_fd(poller, source, Interest::READABLE | Interest::WRITABLE)
    }

    /// Drop write interest, keeping read interest.
    ///
    /// ## Errors
    ///
    /// Propagates the OS registration error.
    pub fn unset_pollout<S>(&mut self, poller: &Poller, source: &mut S) -> io::Result<()>
    where
        S: Source + ?Sized,
    {
        self.set_fd(poller, source, Interest::READABLE)
    }

    /// Remove the socket from the poller. Idempotent.
    pub fn rm_fd<S>(&mut self, poller: &Poller, source: &mut S)
    where
        S: Source + ?Sized,
    {
        if self.interest.take().is_some() {
            if let Err(e) = poller.deregister(source) {
                trace!(token = self.token.0, error = %e, "deregister failed");
            }
        }
    }

    /// Arm this object's timer, replacing any pending one.
    pub fn set_timer(&mut self, poller: &mut Poller, after: Duration) -> TimerId
    {
        self.cancel_timer(poller);
        let id = poller.add_timer(self.token, after);
        self.timer = Some(id);
        id
    }

    /// Cancel the pending timer, if any. Idempotent.
    pub fn cancel_timer(&mut self, poller: &mut Poller)
    {
        if let Some(id) = self.timer.take() {
            poller.cancel_timer(id);
        }
    }

    /// Forget a timer that just fired so it is not cancelled twice.
    pub fn timer_fired(&mut self, id: TimerId)
    {
        if self.timer == Some(id) {
            self.timer = None;
        }
    }

    /// `true` while a timer is armed.
    #[must_use]
    pub const fn has_timer(&self) -> bool
    {
        self.timer.is_some()
    }
}

/// Callbacks an IO object owner receives from [`dispatch`].
///
/// `event_in`/`event_out` return `false` when the socket is no longer
/// usable, in which case [`dispatch`] invokes `event_close`.
pub trait EventHandler
{
    /// Socket readable.
    fn event_in(&mut self, poller: &mut Poller) -> bool;

    /// Socket writable.
    fn event_out(&mut self, poller: &mut Poller) -> bool;

    /// Socket failed or the peer went away.
    fn event_close(&mut self, poller: &mut Poller);

    /// A timer owned by this object fired.
    fn event_timer(&mut self, _poller: &mut Poller, _id: TimerId) {}
}

/// Route one poll event to `handler`.
///
/// Read readiness is handled first so data that arrived together with a
/// hangup is still buffered before the close callback runs.
pub fn dispatch<H>(handler: &mut H, poller: &mut Poller, event: &PollEvent)
where
    H: EventHandler + ?Sized,
{
    match *event {
        PollEvent::Timer { id, .. } => handler.event_timer(poller, id),
        PollEvent::Io {
            readable,
            writable,
            hangup,
            error,
            ..
        } => {
            if (readable || hangup) && !handler.event_in(poller) {
                handler.event_close(poller);
                return;
            }
            if writable && !handler.event_out(poller) {
                handler.event_close(poller);
                return;
            }
            if error {
                handler.event_close(poller);
            }
        }
    }
}
