//! The byte-level surface the debugger engine talks to.

/// A pumped, non-blocking byte transport.
///
/// Implemented by [`SocketServer`](crate::SocketServer) and
/// [`SocketClient`](crate::SocketClient); the engine's tests provide an
/// in-memory implementation.
pub trait Transport
{
    /// Wait up to `timeout_ms` for network activity and dispatch it.
    fn update(&mut self, timeout_ms: u64);

    /// Number of received bytes ready for [`Transport::raw_recv`].
    fn raw_peek(&self) -> usize;

    /// Fill `buf` completely or consume nothing and return `false`.
    fn raw_recv(&mut self, buf: &mut [u8]) -> bool;

    /// Queue all of `buf`; `false` only when no connection is live.
    fn raw_send(&mut self, buf: &[u8]) -> bool;

    /// `true` while no client connection is live.
    fn is_closed(&self) -> bool;

    /// Close every socket. Idempotent.
    fn close(&mut self);
}

impl<T> Transport for Box<T>
where
    T: Transport + ?Sized,
{
    fn update(&mut self, timeout_ms: u64)
    {
        (**self).update(timeout_ms);
    }

    fn raw_peek(&self) -> usize
    {
        (**self).raw_peek()
    }

    fn raw_recv(&mut self, buf: &mut [u8]) -> bool
    {
        (**self).raw_recv(buf)
    }

    fn raw_send(&mut self, buf: &[u8]) -> bool
    {
        (**self).raw_send(buf)
    }

    fn is_closed(&self) -> bool
    {
        (**self).is_closed()
    }

    fn close(&mut self)
    {
        (**self).close();
    }
}
