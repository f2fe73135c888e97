mod pipe;
pub mod tls;
pub mod websocket;

use std::io::{Read, Write};

use crate::error::Result;

pub use pipe::{bound_pipe, PipeReader, PipeWriter, WriteOnlySink, PIPE_CAPACITY_BYTES};

/// One connected transport, handed to the session layer as a pair of
/// `Read`/`Write` halves (§4.2). Both transports converge on this shape so
/// the lifecycle controller and session never need to know which one is
/// live.
pub struct DuplexByteChannel {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    /// Tears the transport down from the owning thread — closing the TCP
    /// socket or WebSocket — so a blocked `reader.read()` unblocks with an
    /// `Ok(0)`/`Err` rather than hanging until the peer notices.
    pub shutdown: Box<dyn Fn() + Send + Sync>,
}

/// External collaborator (§6): establishes one of the two supported
/// transports and returns it as a `DuplexByteChannel`. A fresh adapter
/// attempt is made on every (re)connect; there is no persistent adapter
/// state across attempts.
pub trait TransportAdapter: Send + Sync {
    fn connect(&self) -> Result<DuplexByteChannel>;
}
