//! # Socket Helpers
//!
//! Socket creation and option plumbing below what `std`/`mio` expose.
//!
//! Every socket the transport creates is non-blocking, close-on-exec and
//! gets 64 KiB send and receive buffers. Listening sockets optionally enable
//! reuse-address so a restarted agent can rebind its port immediately.
//!
//! On unix the listening socket is built by hand through `libc` so that
//! reuse-address is actually under our control; elsewhere we fall back to
//! `std::net::TcpListener::bind` and skip the buffer options.

use std::io;
use std::net::SocketAddr;

use tracing::debug;

/// Send/receive buffer size applied to every socket.
pub const SOCKET_BUFFER_SIZE: usize = 64 * 1024;

/// Backlog passed to `listen(2)`.
pub const LISTEN_BACKLOG: i32 = 0x100;

/// What an I/O error means for the operation that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass
{
    /// Nothing to do right now; retry once the poller says so.
    WouldBlock,
    /// Interrupted by a signal; retry immediately.
    Interrupted,
    /// Affects one connection only (reset, aborted handshake).
    Transient,
    /// The socket is unusable.
    Fatal,
}

/// Classify an I/O error for retry decisions.
#[must_use]
pub fn classify(err: &io::Error) -> ErrorClass
{
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorClass::WouldBlock,
        io::ErrorKind::Interrupted => ErrorClass::Interrupted,
        io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

/// Create a bound, listening, non-blocking TCP socket.
///
/// ## Errors
///
/// Returns the OS error from `socket`, `setsockopt`, `bind` or `listen`.
#[cfg(unix)]
pub fn bind_listener(addr: SocketAddr, rebind: bool) -> io::Result<std::net::TcpListener>
{
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    let family = match addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };

    // SAFETY: plain syscall, result checked below.
    let raw = unsafe { libc::socket(family, libc::SOCK_STREAM, 0) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `raw` is a fresh descriptor owned by nobody else.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    set_nonblocking_cloexec(fd.as_raw_fd())?;
    if rebind {
        set_int_option(fd.as_raw_fd(), libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)?;
    }
    set_buffer_sizes(fd.as_raw_fd())?;

    let (storage, len) = sockaddr_from(&addr);
    // SAFETY: `storage` holds a valid sockaddr of `len` bytes.
    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            std::ptr::addr_of!(storage).cast::<libc::sockaddr>(),
            len,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: bound stream socket.
    if unsafe { libc::listen(fd.as_raw_fd(), LISTEN_BACKLOG) } < 0 {
        return Err(io::Error::last_os_error());
    }

    debug!(%addr, rebind, "listening socket created");
    Ok(std::net::TcpListener::from(fd))
}

/// Create a bound, listening, non-blocking TCP socket.
///
/// ## Errors
///
/// Returns the OS error from `bind`.
#[cfg(not(unix))]
pub fn bind_listener(addr: SocketAddr, _rebind: bool) -> io::Result<std::net::TcpListener>
{
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    debug!(%addr, "listening socket created");
    Ok(listener)
}

/// Apply buffer sizes and `TCP_NODELAY` to a connected stream.
///
/// ## Errors
///
/// Returns the OS error from `setsockopt`.
pub fn configure_stream(stream: &mio::net::TcpStream) -> io::Result<()>
{
    stream.set_nodelay(true)?;
    #[cfg(unix)]
    {
        use std::os::fd::AsRawFd;
        set_buffer_sizes(stream.as_raw_fd())?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_buffer_sizes(fd: std::os::fd::RawFd) -> io::Result<()>
{
    let size = i32::try_from(SOCKET_BUFFER_SIZE).unwrap_or(i32::MAX);
    set_int_option(fd, libc::SOL_SOCKET, libc::SO_SNDBUF, size)?;
    set_int_option(fd, libc::SOL_SOCKET, libc::SO_RCVBUF, size)
}

#[cfg(unix)]
fn set_int_option(fd: std::os::fd::RawFd, level: i32, name: i32, value: i32) -> io::Result<()>
{
    let value: libc::c_int = value;
    // SAFETY: `value` outlives the call and the length matches its type.
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            std::ptr::addr_of!(value).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(unix)]
fn set_nonblocking_cloexec(fd: std::os::fd::RawFd) -> io::Result<()>
{
    // SAFETY: fcntl on a descriptor we own.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd_flags = libc::fcntl(fd, libc::F_GETFD);
        if fd_flags < 0 || libc::fcntl(fd, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(unix)]
fn sockaddr_from(addr: &SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t)
{
    // SAFETY: all-zero is a valid sockaddr_storage.
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let len = match addr {
        SocketAddr::V4(v4) => {
            // SAFETY: sockaddr_storage is large and aligned enough for sockaddr_in.
            let sin = unsafe { &mut *std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr_in>() };
            sin.sin_family = libc::AF_INET as libc::sa_family_t;
            sin.sin_port = v4.port().to_be();
            sin.sin_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(v4.ip().octets()),
            };
            std::mem::size_of::<libc::sockaddr_in>()
        }
        SocketAddr::V6(v6) => {
            // SAFETY: sockaddr_storage is large and aligned enough for sockaddr_in6.
            let sin6 = unsafe { &mut *std::ptr::addr_of_mut!(storage).cast::<libc::sockaddr_in6>() };
            sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sin6.sin6_port = v6.port().to_be();
            sin6.sin6_flowinfo = v6.flowinfo();
            sin6.sin6_addr = libc::in6_addr {
                s6_addr: v6.ip().octets(),
            };
            sin6.sin6_scope_id = v6.scope_id();
            std::mem::size_of::<libc::sockaddr_in6>()
        }
    };
    (storage, len as libc::socklen_t)
}
