// send_buffer.rs -- Per-client deferred send buffer and backpressure.
//
// Converted from the write path described for every client-facing
// service: `{data, size, start, cur}`, compacted on queue rather than
// on drain, grown monotonically, never shrunk. Mirrors the shipgate's
// own `send_raw`/`sendbuf_start`/`sendbuf_cur` handling in
// original_source/shipgate/src/packets.c, generalized to every
// client-facing service rather than duplicated per service.

use std::io::{self, Write};

use crate::error::{ProtoError, Result};

/// Invariant enforced throughout: `0 <= start <= cur <= data.len()`.
#[derive(Default)]
pub struct SendBuffer {
    data: Vec<u8>,
    start: usize,
    cur: usize,
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.cur
    }

    pub fn pending(&self) -> &[u8] {
        &self.data[self.start..self.cur]
    }

    /// Current allocation size -- grows monotonically, never shrinks
    /// on send (it resets to the drained state, not to zero capacity).
    pub fn size(&self) -> usize {
        self.data.capacity()
    }

    fn compact(&mut self) {
        if self.start > 0 {
            self.data.copy_within(self.start..self.cur, 0);
            self.cur -= self.start;
            self.start = 0;
        }
    }

    /// Append bytes to the deferred buffer. Compacts `[start, cur)` to
    /// offset 0 first if `start > 0`. A failed growth is a fatal
    /// per-client error, modeled here with `try_reserve`.
    pub fn queue(&mut self, bytes: &[u8]) -> Result<()> {
        self.compact();
        self.data
            .try_reserve(bytes.len())
            .map_err(|_| ProtoError::ResourceExhaustion("send buffer growth failed"))?;
        self.data.truncate(self.cur);
        self.data.extend_from_slice(bytes);
        self.cur += bytes.len();
        Ok(())
    }

    /// Record that `n` bytes starting at `start` have been written out.
    fn advance(&mut self, n: usize) {
        self.start += n;
        debug_assert!(self.start <= self.cur);
        if self.start == self.cur {
            self.start = 0;
            self.cur = 0;
            self.data.clear();
        }
    }

    /// Drain as much of the deferred buffer as the transport will take
    /// right now. Returns `true` once fully drained.
    pub fn drain<W: Write>(&mut self, transport: &mut W) -> Result<bool> {
        while !self.is_empty() {
            match transport.write(self.pending()) {
                Ok(0) => return Err(ProtoError::TransportClosed),
                Ok(n) => self.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }
}

/// Send `packet` on `transport`, using `buf` for whatever can't be
/// written immediately. If the deferred buffer is already non-empty, a
/// direct write is skipped entirely -- packets must stay in order.
pub fn send_packet<W: Write>(
    buf: &mut SendBuffer,
    transport: &mut W,
    packet: &[u8],
) -> Result<()> {
    let mut offset = 0;

    if buf.is_empty() {
        loop {
            if offset == packet.len() {
                return Ok(());
            }
            match transport.write(&packet[offset..]) {
                Ok(0) => return Err(ProtoError::TransportClosed),
                Ok(n) => offset += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    if offset < packet.len() {
        buf.queue(&packet[offset..])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// A transport whose socket send buffer can only absorb
    /// `capacity` bytes per readiness tick, then reports `WouldBlock`
    /// until the test calls `become_writable` again -- the way a real
    /// non-blocking socket behaves under a slow peer.
    struct ThrottledWriter {
        capacity: usize,
        sink: VecDeque<u8>,
    }

    impl ThrottledWriter {
        fn become_writable(&mut self, n: usize) {
            self.capacity += n;
        }
    }

    impl Write for ThrottledWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.capacity == 0 {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, "would block"));
            }
            let n = buf.len().min(self.capacity);
            self.sink.extend(&buf[..n]);
            self.capacity -= n;
            Ok(n)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn backpressure_scenario_2048_byte_packet_10_bytes_per_event() {
        let mut buf = SendBuffer::new();
        let mut transport = ThrottledWriter {
            capacity: 0,
            sink: VecDeque::new(),
        };
        let packet = vec![0xABu8; 2048];

        // The client's transport can't take anything yet: the whole
        // packet lands in the deferred buffer.
        send_packet(&mut buf, &mut transport, &packet).unwrap();
        assert!(!buf.is_empty());
        assert_eq!(buf.pending().len(), 2048);

        let mut events = 0;
        loop {
            assert!(buf.start <= buf.cur && buf.cur <= buf.data.len());
            transport.become_writable(10);
            events += 1;
            if buf.drain(&mut transport).unwrap() {
                break;
            }
            assert!(events <= 205, "must fully drain within 205 writable events");
        }

        assert_eq!(events, 205);
        assert_eq!(transport.sink.len(), packet.len());
        assert!(buf.is_empty());
    }

    #[test]
    fn compaction_resets_start_to_zero() {
        let mut buf = SendBuffer::new();
        let mut transport = ThrottledWriter {
            capacity: 4,
            sink: VecDeque::new(),
        };
        // Direct write takes the first 4 bytes; the rest is deferred.
        send_packet(&mut buf, &mut transport, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(buf.pending(), &[5, 6, 7, 8]);

        // Drain one more chunk so `start` moves off zero without fully
        // emptying the buffer.
        transport.become_writable(2);
        assert!(!buf.drain(&mut transport).unwrap());
        assert!(buf.start > 0);

        // Queueing more data must compact back to offset 0.
        buf.queue(&[9, 10]).unwrap();
        assert_eq!(buf.start, 0);
        assert_eq!(buf.pending(), &[7, 8, 9, 10]);
    }
}
