//! # Socket Client
//!
//! Connects outward to a listening debugger frontend.
//!
//! The connect is non-blocking: [`SocketClient::connect`] only starts it and
//! the pump completes it once the socket reports write readiness. A failed
//! attempt, or a connection that drops, is retried on a one second timer
//! until [`Transport::close`] is called.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use mio::net::TcpStream;
use mio::Interest;
use tracing::{debug, error, info};

use crate::endpoint::Endpoint;
use crate::error::{NetError, Result};
use crate::io_object::{self, IoObject};
use crate::poller::{PollEvent, Poller};
use crate::session::Session;
use crate::transport::Transport;

/// Delay between connection attempts.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum ClientState
{
    /// Waiting for the reconnect timer.
    Waiting,
    /// Non-blocking connect in flight.
    Connecting(TcpStream),
    /// Connected.
    Connected(Session),
    /// Closed by the owner; never reconnects.
    Closed,
}

/// Connecting transport.
#[derive(Debug)]
pub struct SocketClient
{
    poller: Poller,
    io: IoObject,
    addr: SocketAddr,
    state: ClientState,
}

impl SocketClient
{
    /// Start connecting to `endpoint`.
    ///
    /// ## Errors
    ///
    /// Fails if the poller cannot be created or the connect cannot even be
    /// started (unroutable address family, descriptor exhaustion). Refused
    /// connections are not errors; they are retried.
    pub fn connect(endpoint: &Endpoint) -> Result<Self>
    {
        let mut poller = Poller::new()?;
        let io = IoObject::new(&mut poller);
        let mut client = Self {
            poller,
            io,
            addr: endpoint.addr(),
            state: ClientState::Waiting,
        };
        client.start_connect().map_err(|source| NetError::Connect {
            endpoint: endpoint.to_string(),
            source,
        })?;
        Ok(client)
    }

    /// `true` once the connection is established and live.
    #[must_use]
    pub fn is_connected(&self) -> bool
    {
        matches!(&self.state, ClientState::Connected(session) if !session.is_closed())
    }

    fn start_connect(&mut self) -> io::Result<()>
    {
        let mut stream = TcpStream::connect(self.addr)?;
        self.io.set_fd(&self.poller, &mut stream, Interest::WRITABLE)?;
        debug!(addr = %self.addr, "connect started");
        self.state = ClientState::Connecting(stream);
        Ok(())
    }

    fn schedule_reconnect(&mut self)
    {
        self.state = ClientState::Waiting;
        self.io.set_timer(&mut self.poller, RECONNECT_INTERVAL);
    }

    fn finish_connect(&mut self)
    {
        if !matches!(self.state, ClientState::Connecting(_)) {
            return;
        }
        let ClientState::Connecting(mut stream) = std::mem::replace(&mut self.state, ClientState::Waiting) else {
            return;
        };

        let outcome = match stream.take_error() {
            Ok(Some(e)) | Err(e) => Err(e),
            Ok(None) => stream.peer_addr(),
        };
        match outcome {
            Ok(peer) => {
                self.io.rm_fd(&self.poller, &mut stream);
                match Session::new(&mut self.poller, stream, peer) {
                    Ok(session) => {
                        info!(%peer, "connected to debug client");
                        self.state = ClientState::Connected(session);
                    }
                    Err(e) => {
                        debug!(error = %e, "session setup failed");
                        self.schedule_reconnect();
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                self.state = ClientState::Connecting(stream);
            }
            Err(e) => {
                debug!(addr = %self.addr, error = %e, "connect failed, retrying");
                self.io.rm_fd(&self.poller, &mut stream);
                self.schedule_reconnect();
            }
        }
    }

    fn dispatch(&mut self, event: &PollEvent)
    {
        let token = event.token();
        if token == self.io.token() {
            match *event {
                PollEvent::Timer { id, .. } => {
                    self.io.timer_fired(id);
                    if matches!(self.state, ClientState::Waiting) {
                        if let Err(e) = self.start_connect() {
                            debug!(error = %e, "reconnect failed to start");
                            self.schedule_reconnect();
                        }
                    }
                }
                PollEvent::Io { .. } => self.finish_connect(),
            }
            return;
        }

        let mut dropped = false;
        if let ClientState::Connected(session) = &mut self.state {
            if session.token() == token {
                io_object::dispatch(session, &mut self.poller, event);
                dropped = session.is_closed();
            }
        }
        if dropped {
            info!(addr = %self.addr, "connection lost, reconnecting");
            self.schedule_reconnect();
        }
    }
}

impl Transport for SocketClient
{
    fn update(&mut self, timeout_ms: u64)
    {
        let events = match self.poller.wait(Duration::from_millis(timeout_ms)) {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "poll failed");
                return;
            }
        };
        for event in &events {
            self.dispatch(event);
        }
    }

    fn raw_peek(&self) -> usize
    {
        match &self.state {
            ClientState::Connected(session) => session.raw_peek(),
            _ => 0,
        }
    }

    fn raw_recv(&mut self, buf: &mut [u8]) -> bool
    {
        match &mut self.state {
            ClientState::Connected(session) => session.raw_recv(buf),
            _ => false,
        }
    }

    fn raw_send(&mut self, buf: &[u8]) -> bool
    {
        match &mut self.state {
            ClientState::Connected(session) => session.raw_send(&mut self.poller, buf),
            _ => false,
        }
    }

    fn is_closed(&self) -> bool
    {
        !self.is_connected()
    }

    fn close(&mut self)
    {
        self.io.cancel_timer(&mut self.poller);
        match std::mem::replace(&mut self.state, ClientState::Closed) {
            ClientState::Connected(mut session) => session.close(&mut self.poller),
            ClientState::Connecting(mut stream) => self.io.rm_fd(&self.poller, &mut stream),
            ClientState::Waiting | ClientState::Closed => {}
        }
    }
}

impl Drop for SocketClient
{
    fn drop(&mut self)
    {
        self.close();
    }
}
