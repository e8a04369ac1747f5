//! # Session Stream
//!
//! Buffered duplex byte channel over an accepted or connected socket.
//!
//! Inbound bytes are drained from the socket on every read-readiness event
//! and buffered until the engine asks for them. Outbound bytes are appended
//! to a send buffer and flushed as far as the socket allows; whatever is
//! left waits for write readiness. Backpressure therefore never surfaces as
//! a failed [`Session::raw_send`].
//!
//! A peer half-close is detected by a zero-length read during the read
//! drain, so [`Session::is_closed`] flips without the owner ever calling
//! send or receive.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr};

use mio::net::TcpStream;
use mio::{Interest, Token};
use tracing::{debug, trace, warn};

use crate::io_object::{EventHandler, IoObject};
use crate::poller::Poller;
use crate::socket::{self, ErrorClass};

const READ_CHUNK: usize = 16 * 1024;

/// Duplex byte stream registered with a [`Poller`].
#[derive(Debug)]
pub struct Session
{
    io: IoObject,
    stream: Option<TcpStream>,
    peer: SocketAddr,
    recv_buf: Vec<u8>,
    send_buf: Vec<u8>,
}

impl Session
{
    /// Wrap a freshly accepted or connected stream and register it for reads.
    ///
    /// ## Errors
    ///
    /// Fails if socket options or registration fail; the stream is dropped.
    pub fn new(poller: &mut Poller, mut stream: TcpStream, peer: SocketAddr) -> io::Result<Self>
    {
        socket::configure_stream(&stream)?;
        let mut io = IoObject::new(poller);
        io.set_fd(poller, &mut stream, Interest::READABLE)?;
        debug!(%peer, token = io.token().0, "session opened");
        Ok(Self {
            io,
            stream: Some(stream),
            peer,
            recv_buf: Vec::new(),
            send_buf: Vec::new(),
        })
    }

    /// Token readiness events for this session arrive under.
    #[must_use]
    pub const fn token(&self) -> Token
    {
        self.io.token()
    }

    /// Remote address.
    #[must_use]
    pub const fn peer(&self) -> SocketAddr
    {
        self.peer
    }

    /// Number of received bytes buffered and not yet consumed.
    #[must_use]
    pub fn raw_peek(&self) -> usize
    {
        self.recv_buf.len()
    }

    /// Fill `buf` completely from the receive buffer.
    ///
    /// Returns `false` (consuming nothing) if fewer than `buf.len()` bytes
    /// are buffered. Buffered bytes remain readable after the peer closed.
    pub fn raw_recv(&mut self, buf: &mut [u8]) -> bool
    {
        if buf.len() > self.recv_buf.len() {
            return false;
        }
        buf.copy_from_slice(&self.recv_buf[..buf.len()]);
        self.recv_buf.drain(..buf.len());
        true
    }

    /// Queue all of `buf` for sending and flush what the socket accepts.
    ///
    /// Returns `false` only if the session is closed.
    pub fn raw_send(&mut self, poller: &mut Poller, buf: &[u8]) -> bool
    {
        if self.stream.is_none() {
            return false;
        }
        self.send_buf.extend_from_slice(buf);
        if self.flush(poller) {
            true
        } else {
            self.close(poller);
            false
        }
    }

    /// Bytes queued but not yet written to the socket.
    #[must_use]
    pub fn pending_send(&self) -> usize
    {
        self.send_buf.len()
    }

    /// `true` after a local close, a peer close or a socket error.
    #[must_use]
    pub const fn is_closed(&self) -> bool
    {
        self.stream.is_none()
    }

    /// Deregister and close the socket. Idempotent.
    pub fn close(&mut self, poller: &mut Poller)
    {
        self.io.cancel_timer(poller);
        if let Some(mut stream) = self.stream.take() {
            self.io.rm_fd(poller, &mut stream);
            let _ = stream.shutdown(Shutdown::Both);
            self.send_buf.clear();
            debug!(peer = %self.peer, "session closed");
        }
    }

    /// Write as much of the send buffer as the socket takes.
    ///
    /// Returns `false` on a fatal write error.
    fn flush(&mut self, poller: &mut Poller) -> bool
    {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };

        let mut written = 0;
        while written < self.send_buf.len() {
            match stream.write(&self.send_buf[written..]) {
                Ok(0) => return false,
                Ok(n) => written += n,
                Err(e) => match socket::classify(&e) {
                    ErrorClass::WouldBlock => break,
                    ErrorClass::Interrupted => {}
                    ErrorClass::Transient | ErrorClass::Fatal => {
                        warn!(peer = %self.peer, error = %e, "send failed");
                        return false;
                    }
                },
            }
        }
        self.send_buf.drain(..written);

        let interest = if self.send_buf.is_empty() {
            self.io.unset_pollout(poller, stream)
        } else {
            trace!(pending = self.send_buf.len(), "send buffer backlog");
            self.io.set_pollout(poller, stream)
        };
        interest.is_ok()
    }
}

impl EventHandler for Session
{
    fn event_in(&mut self, _poller: &mut Poller) -> bool
    {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };

        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    debug!(peer = %self.peer, "peer closed connection");
                    return false;
                }
                Ok(n) => self.recv_buf.extend_from_slice(&chunk[..n]),
                Err(e) => match socket::classify(&e) {
                    ErrorClass::WouldBlock => return true,
                    ErrorClass::Interrupted => {}
                    ErrorClass::Transient | ErrorClass::Fatal => {
                        debug!(peer = %self.peer, error = %e, "receive failed");
                        return false;
                    }
                },
            }
        }
    }

    fn event_out(&mut self, poller: &mut Poller) -> bool
    {
        self.flush(poller)
    }

    fn event_close(&mut self, poller: &mut Poller)
    {
        self.close(poller);
    }
}
