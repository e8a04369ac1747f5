//! # Output Redirection
//!
//! Two ways output reaches the engine's byte sink:
//!
//! - **VM primitives** (`print`, `io.write`) are replaced by the VM backend.
//!   If the engine is busy (the replacement ran from inside the hook, e.g.
//!   during an evaluation) the bytes are parked in the shared
//!   [`OutputQueue`] and flushed on the next pump.
//! - **Process streams** (stdout/stderr) are captured with [`StdRedirect`]:
//!   the descriptor is pointed at a pipe, and a reader thread moves what
//!   arrives into a channel the pump drains. Writers never wait on the
//!   engine, so a large write cannot stall the VM between pumps.
//!   Dropping the redirect restores the original descriptor.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
#[cfg(unix)]
use std::sync::mpsc::{self, Receiver, Sender};
#[cfg(unix)]
use std::time::{Duration, Instant};

use crate::types::Redirect;

/// Bytes captured while the engine could not take them directly.
#[derive(Debug, Clone, Default)]
pub struct OutputQueue(Rc<RefCell<VecDeque<(Redirect, Vec<u8>)>>>);

impl OutputQueue
{
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Park bytes.
    pub fn push(&self, kind: Redirect, bytes: Vec<u8>)
    {
        self.0.borrow_mut().push_back((kind, bytes));
    }

    /// Take everything parked so far.
    #[must_use]
    pub fn drain(&self) -> Vec<(Redirect, Vec<u8>)>
    {
        self.0.borrow_mut().drain(..).collect()
    }

    /// `true` if nothing is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.0.borrow().is_empty()
    }
}

/// How long a dropped redirect waits for the reader to hand over the tail.
#[cfg(unix)]
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Captured standard stream.
#[cfg(unix)]
#[derive(Debug)]
pub struct StdRedirect
{
    kind: Redirect,
    target_fd: std::os::fd::RawFd,
    saved: std::fs::File,
    captured: Receiver<Vec<u8>>,
}

#[cfg(unix)]
impl StdRedirect
{
    /// Point stdout or stderr at a fresh pipe and start its reader thread.
    ///
    /// ## Errors
    ///
    /// `Unsupported` for VM-level kinds, otherwise the OS error from
    /// `pipe`/`dup`/`dup2` or from spawning the reader.
    #[allow(unsafe_code)]
    pub fn open(kind: Redirect) -> io::Result<Self>
    {
        use std::io::Write;
        use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

        let target_fd = match kind {
            Redirect::Stdout => {
                io::stdout().flush()?;
                libc::STDOUT_FILENO
            }
            Redirect::Stderr => {
                io::stderr().flush()?;
                libc::STDERR_FILENO
            }
            Redirect::Print | Redirect::IoWrite => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "VM output is redirected by the VM backend",
                ))
            }
        };

        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: `fds` has room for the two descriptors.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: both descriptors were just created and are owned here.
        let (read_end, write_end) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };

        // Child processes must not keep the pipe open.
        for fd in [read_end.as_raw_fd(), write_end.as_raw_fd()] {
            // SAFETY: fcntl on a descriptor we own.
            if unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
                return Err(io::Error::last_os_error());
            }
        }

        // SAFETY: duplicating a standard descriptor.
        let saved = unsafe { libc::dup(target_fd) };
        if saved < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `saved` is a fresh descriptor owned here.
        let saved = unsafe { OwnedFd::from_raw_fd(saved) };

        let (sender, captured) = mpsc::channel();
        let reader = std::fs::File::from(read_end);
        std::thread::Builder::new()
            .name(format!("rdebug-{}", kind.category()))
            .spawn(move || forward(reader, &sender))?;

        // SAFETY: both descriptors are valid.
        if unsafe { libc::dup2(write_end.as_raw_fd(), target_fd) } < 0 {
            return Err(io::Error::last_os_error());
        }
        drop(write_end);

        Ok(Self {
            kind,
            target_fd,
            saved: std::fs::File::from(saved),
            captured,
        })
    }

    /// Which stream this captures.
    #[must_use]
    pub const fn kind(&self) -> Redirect
    {
        self.kind
    }

    /// Take everything the reader has collected so far.
    pub fn drain(&mut self) -> Vec<u8>
    {
        self.captured.try_iter().flatten().collect()
    }

    /// Write bytes to the original stream (used while no client listens).
    pub fn passthrough(&mut self, bytes: &[u8])
    {
        use std::io::Write;
        let _ = self.saved.write_all(bytes);
    }
}

#[cfg(unix)]
impl Drop for StdRedirect
{
    #[allow(unsafe_code)]
    fn drop(&mut self)
    {
        use std::io::Write;
        use std::os::fd::AsRawFd;

        let _ = match self.kind {
            Redirect::Stderr => io::stderr().flush(),
            _ => io::stdout().flush(),
        };
        // SAFETY: restoring the descriptor saved in `open`.
        unsafe {
            libc::dup2(self.saved.as_raw_fd(), self.target_fd);
        }

        // That closed the last write end, so the reader is about to see EOF.
        let deadline = Instant::now() + DRAIN_GRACE;
        let mut rest = Vec::new();
        while let Ok(chunk) = self.captured.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            rest.extend(chunk);
        }
        self.passthrough(&rest);
    }
}

/// Reader thread body: copy the pipe into the channel until EOF.
#[cfg(unix)]
fn forward(mut reader: std::fs::File, sender: &Sender<Vec<u8>>)
{
    use std::io::Read;

    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                if sender.send(chunk[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
}

/// Captured standard stream (unsupported on this platform).
#[cfg(not(unix))]
#[derive(Debug)]
pub struct StdRedirect
{
    kind: Redirect,
}

#[cfg(not(unix))]
impl StdRedirect
{
    /// Always fails on this platform.
    ///
    /// ## Errors
    ///
    /// `Unsupported`.
    pub fn open(_kind: Redirect) -> io::Result<Self>
    {
        Err(io::Error::new(io::ErrorKind::Unsupported, "stream redirection needs unix"))
    }

    /// Which stream this captures.
    #[must_use]
    pub const fn kind(&self) -> Redirect
    {
        self.kind
    }

    /// Nothing to read.
    pub fn drain(&mut self) -> Vec<u8>
    {
        Vec::new()
    }

    /// No-op.
    pub fn passthrough(&mut self, _bytes: &[u8]) {}
}
