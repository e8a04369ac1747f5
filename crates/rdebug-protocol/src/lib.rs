//! # rdebug-protocol
//!
//! Framed message layer between the rdebug agent and a debugger frontend.
//!
//! Messages are JSON objects framed with a `Content-Length` header, the
//! same framing the Debug Adapter Protocol uses:
//!
//! ```text
//! Content-Length: 52\r\n
//! \r\n
//! {"seq":1,"type":"request","command":"initialize"}
//! ```
//!
//! The crate has no I/O of its own. [`encode`] turns a message into bytes
//! and [`FrameDecoder`] reassembles messages from whatever byte chunks the
//! transport delivers.

pub mod codec;
pub mod error;
pub mod message;
pub mod types;

pub use codec::{encode, FrameDecoder, MAX_FRAME_SIZE};
pub use error::{ProtocolError, Result};
pub use message::{Event, ProtocolMessage, Request, Response};
