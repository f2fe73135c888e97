use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex};

/// Capacity of the internal pipe bridging WebSocket binary frames to the
/// session's input stream (§4.2): large enough to hold one full MQTT
/// message, since the session's decoder cannot recover from a message
/// split across two reads that the writer was forced to produce by running
/// out of buffer space.
pub const PIPE_CAPACITY_BYTES: usize = 128 * 1024;

struct Shared {
    buffer: VecDeque<u8>,
    capacity: usize,
    closed: bool,
}

/// A bound in-memory pipe: bytes written to `PipeWriter` are readable, in
/// order, from `PipeReader` (§4.2, "Bound pipe" in the glossary). Used to
/// make the WebSocket path look like a socket to the MQTT session, which
/// only knows how to read and write byte streams.
#[derive(Clone)]
pub struct PipeWriter {
    shared: Arc<(Mutex<Shared>, Condvar)>,
}

pub struct PipeReader {
    shared: Arc<(Mutex<Shared>, Condvar)>,
}

pub fn bound_pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new((
        Mutex::new(Shared {
            buffer: VecDeque::with_capacity(capacity.min(8192)),
            capacity,
            closed: false,
        }),
        Condvar::new(),
    ));
    (
        PipeWriter {
            shared: shared.clone(),
        },
        PipeReader { shared },
    )
}

impl PipeWriter {
    /// Writes a complete inbound WebSocket binary message into the pipe.
    /// Blocks (without holding the lock) until enough capacity frees up,
    /// preserving the "no partial reads" guarantee §4.2 requires: a whole
    /// message is enqueued atomically, never interleaved with another.
    pub fn write_message(&self, data: &[u8]) -> io::Result<()> {
        if data.len() > PIPE_CAPACITY_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "message exceeds pipe capacity",
            ));
        }
        let (lock, cvar) = &*self.shared;
        let mut guard = lock.lock().unwrap();
        loop {
            if guard.closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
            }
            if guard.buffer.len() + data.len() <= guard.capacity {
                break;
            }
            guard = cvar.wait(guard).unwrap();
        }
        guard.buffer.extend(data.iter().copied());
        cvar.notify_all();
        Ok(())
    }

    pub fn close(&self) {
        let (lock, cvar) = &*self.shared;
        lock.lock().unwrap().closed = true;
        cvar.notify_all();
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (lock, cvar) = &*self.shared;
        let mut guard = lock.lock().unwrap();
        loop {
            if !guard.buffer.is_empty() {
                let n = buf.len().min(guard.buffer.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = guard.buffer.pop_front().unwrap();
                }
                cvar.notify_all();
                return Ok(n);
            }
            if guard.closed {
                return Ok(0);
            }
            guard = cvar.wait(guard).unwrap();
        }
    }
}

// The MQTT session writes outbound bytes through this no-op-buffering
// adapter, which the WebSocket transport wraps to forward each write as a
// binary WebSocket message (§4.2). Kept separate from `PipeWriter` because
// outbound traffic never needs the blocking-pipe semantics: it goes
// straight out over the wire.
pub struct WriteOnlySink<F: FnMut(&[u8]) -> io::Result<()>> {
    sink: F,
}

impl<F: FnMut(&[u8]) -> io::Result<()>> WriteOnlySink<F> {
    pub fn new(sink: F) -> Self {
        WriteOnlySink { sink }
    }
}

impl<F: FnMut(&[u8]) -> io::Result<()>> Write for WriteOnlySink<F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (self.sink)(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_single_message() {
        let (writer, mut reader) = bound_pipe(PIPE_CAPACITY_BYTES);
        writer.write_message(b"hello").unwrap();
        let mut buf = [0u8; 5];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn preserves_fifo_order_across_messages() {
        let (writer, mut reader) = bound_pipe(PIPE_CAPACITY_BYTES);
        writer.write_message(b"one").unwrap();
        writer.write_message(b"two").unwrap();
        let mut buf = [0u8; 6];
        let mut got = Vec::new();
        while got.len() < 6 {
            let n = reader.read(&mut buf[got.len()..]).unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(&got, b"onetwo");
    }

    #[test]
    fn read_returns_zero_after_close_and_drain() {
        let (writer, mut reader) = bound_pipe(PIPE_CAPACITY_BYTES);
        writer.write_message(b"x").unwrap();
        writer.close();
        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let (writer, _reader) = bound_pipe(PIPE_CAPACITY_BYTES);
        let too_big = vec![0u8; PIPE_CAPACITY_BYTES + 1];
        assert!(writer.write_message(&too_big).is_err());
    }

    #[test]
    fn write_blocks_until_capacity_frees_then_succeeds() {
        let (writer, mut reader) = bound_pipe(4);
        writer.write_message(b"abcd").unwrap();
        let writer = Arc::new(writer);
        let writer2 = writer.clone();
        let handle = std::thread::spawn(move || {
            writer2.write_message(b"ef").unwrap();
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        let mut buf = [0u8; 4];
        reader.read(&mut buf).unwrap();
        handle.join().unwrap();
    }
}
