//! # Socket Server
//!
//! Listens on one endpoint and serves exactly one client at a time.
//!
//! The first connection accepted while no session is live becomes the
//! session. Connections arriving while a session is live are closed
//! immediately. When the session ends the listener keeps running, so a
//! debugger frontend can reconnect.

use std::net::SocketAddr;
use std::time::Duration;

use mio::net::TcpStream;
use tracing::{error, info, warn};

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::io_object::{self, EventHandler};
use crate::listener::Listener;
use crate::poller::{PollEvent, Poller};
use crate::session::Session;
use crate::transport::Transport;

/// Listening transport.
#[derive(Debug)]
pub struct SocketServer
{
    poller: Poller,
    listener: Listener,
    session: Option<Session>,
}

impl SocketServer
{
    /// Bind `endpoint` (port `0` picks an ephemeral port) and start listening.
    ///
    /// ## Errors
    ///
    /// Returns the bind/registration failure with its OS error code.
    pub fn listen(endpoint: &Endpoint) -> Result<Self>
    {
        let mut poller = Poller::new()?;
        let mut listener = Listener::new(&mut poller);
        listener.listen(&mut poller, endpoint.addr(), true)?;
        info!(endpoint = %endpoint, "debug server listening");
        Ok(Self {
            poller,
            listener,
            session: None,
        })
    }

    /// Bound port, `0` once closed.
    #[must_use]
    pub fn port(&self) -> u16
    {
        self.listener.local_addr().map_or(0, |addr| addr.port())
    }

    /// Address of the connected client, if any.
    #[must_use]
    pub fn peer(&self) -> Option<SocketAddr>
    {
        self.session
            .as_ref()
            .filter(|s| !s.is_closed())
            .map(Session::peer)
    }

    fn dispatch(&mut self, event: &PollEvent)
    {
        let token = event.token();
        if token == self.listener.token() {
            let session = &mut self.session;
            let mut accept = |poller: &mut Poller, stream: TcpStream, peer: SocketAddr| {
                if session.as_ref().is_some_and(|s| !s.is_closed()) {
                    warn!(%peer, "client already connected, rejecting");
                    drop(stream);
                    return;
                }
                match Session::new(poller, stream, peer) {
                    Ok(new_session) => {
                        info!(%peer, "debug client connected");
                        *session = Some(new_session);
                    }
                    Err(e) => warn!(%peer, error = %e, "failed to set up client session"),
                }
            };
            if !self.listener.event_in(&mut self.poller, &mut accept) {
                error!("listener failed, closing");
                self.listener.close(&mut self.poller);
            }
            return;
        }

        if let Some(session) = self.session.as_mut() {
            if session.token() == token {
                io_object::dispatch(session, &mut self.poller, event);
                if session.is_closed() {
                    info!(peer = %session.peer(), "debug client disconnected");
                }
            }
        }
    }
}

impl Transport for SocketServer
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
        self.session.as_ref().map_or(0, Session::raw_peek)
    }

    fn raw_recv(&mut self, buf: &mut [u8]) -> bool
    {
        self.session.as_mut().is_some_and(|s| s.raw_recv(buf))
    }

    fn raw_send(&mut self, buf: &[u8]) -> bool
    {
        match self.session.as_mut() {
            Some(session) => session.raw_send(&mut self.poller, buf),
            None => false,
        }
    }

    fn is_closed(&self) -> bool
    {
        self.session.as_ref().map_or(true, Session::is_closed)
    }

    fn close(&mut self)
    {
        if let Some(session) = self.session.as_mut() {
            session.event_close(&mut self.poller);
        }
        self.listener.close(&mut self.poller);
    }
}

impl Drop for SocketServer
{
    fn drop(&mut self)
    {
        self.close();
    }
}
