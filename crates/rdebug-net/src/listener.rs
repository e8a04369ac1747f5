//! # Listener
//!
//! Owns a listening socket and hands every accepted connection to an
//! [`Accept`] implementation.
//!
//! State machine: `Idle → Listening → Idle`. [`Listener::event_in`] drains
//! the accept queue until the OS reports "would block", which is the normal
//! steady state and not an error. A fatal accept error makes `event_in`
//! return `false` so the owner can close the listener.

use std::net::SocketAddr;

use mio::net::{TcpListener, TcpStream};
use mio::Interest;
use tracing::{debug, warn};

use crate::error::{NetError, Result};
use crate::io_object::IoObject;
use crate::poller::Poller;
use crate::socket::{self, ErrorClass};

/// Receives connections accepted by a [`Listener`].
pub trait Accept
{
    /// One inbound connection is ready.
    fn event_accept(&mut self, poller: &mut Poller, stream: TcpStream, peer: SocketAddr);
}

impl<F> Accept for F
where
    F: FnMut(&mut Poller, TcpStream, SocketAddr),
{
    fn event_accept(&mut self, poller: &mut Poller, stream: TcpStream, peer: SocketAddr)
    {
        self(poller, stream, peer);
    }
}

/// Lifecycle of a [`Listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState
{
    /// No socket bound.
    Idle,
    /// Bound and registered for read readiness.
    Listening,
}

/// Listening socket registered with a [`Poller`].
#[derive(Debug)]
pub struct Listener
{
    io: IoObject,
    socket: Option<TcpListener>,
}

impl Listener
{
    /// Create an idle listener with a token reserved on `poller`.
    pub fn new(poller: &mut Poller) -> Self
    {
        Self {
            io: IoObject::new(poller),
            socket: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ListenerState
    {
        if self.socket.is_some() {
            ListenerState::Listening
        } else {
            ListenerState::Idle
        }
    }

    /// Token readiness events for this listener arrive under.
    #[must_use]
    pub const fn token(&self) -> mio::Token
    {
        self.io.token()
    }

    /// Bound address while listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr>
    {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bind `addr` and register read interest.
    ///
    /// A listener that is already listening is closed first.
    ///
    /// ## Errors
    ///
    /// [`NetError::Listen`] carrying the OS error if binding fails,
    /// [`NetError::Io`] if registration fails.
    pub fn listen(&mut self, poller: &mut Poller, addr: SocketAddr, rebind: bool) -> Result<()>
    {
        self.close(poller);

        let std_listener = socket::bind_listener(addr, rebind).map_err(|source| NetError::Listen {
            endpoint: addr.to_string(),
            source,
        })?;
        let mut listener = TcpListener::from_std(std_listener);
        self.io.set_fd(poller, &mut listener, Interest::READABLE)?;
        debug!(%addr, "listener ready");
        self.socket = Some(listener);
        Ok(())
    }

    /// Accept until the queue is empty.
    ///
    /// Returns `false` on a fatal accept error; the owner should call
    /// [`Listener::close`].
    pub fn event_in<A>(&mut self, poller: &mut Poller, acceptor: &mut A) -> bool
    where
        A: Accept + ?Sized,
    {
        let Some(listener) = self.socket.as_ref() else {
            return false;
        };

        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "accepted connection");
                    acceptor.event_accept(poller, stream, peer);
                }
                Err(e) => match socket::classify(&e) {
                    ErrorClass::WouldBlock => return true,
                    ErrorClass::Interrupted | ErrorClass::Transient => {
                        debug!(error = %e, "accept retried");
                    }
                    ErrorClass::Fatal => {
                        warn!(error = %e, "accept failed");
                        return false;
                    }
                },
            }
        }
    }

    /// Deregister and close the socket. Calling it again is a no-op.
    pub fn close(&mut self, poller: &mut Poller)
    {
        self.io.cancel_timer(poller);
        if let Some(mut listener) = self.socket.take() {
            self.io.rm_fd(poller, &mut listener);
            debug!("listener closed");
        }
    }
}
