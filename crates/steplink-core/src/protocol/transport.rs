//! Readiness-checked, deadline-bounded I/O over a [`Channel`]
//!
//! Every wait goes through `poll(2)` on the channel's descriptor, so no call
//! blocks past the budget it was given. The transport knows nothing about
//! frames beyond the terminator byte.

use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

use super::channel::Channel;
use super::error::MalformedReason;
use super::framer::Frame;
use super::{ProtocolError, MAX_RESPONSE_SIZE, TERMINATOR};

/// Bytes read back for one request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawResponse {
    bytes: Vec<u8>,
}

impl RawResponse {
    /// Wrap bytes taken off the wire
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Bytes exactly as received
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Response as text; non-ASCII noise is replaced rather than rejected
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// Number of bytes received
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True when nothing was received
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the frame terminator has arrived
    pub fn is_complete(&self) -> bool {
        self.bytes.contains(&(TERMINATOR as u8))
    }
}

fn millis_ceil(budget: Duration) -> libc::c_int {
    let millis = budget.as_micros().div_ceil(1000);
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}

/// Wait until `fd` reports `events` or `timeout` expires.
///
/// EINTR resumes the wait with whatever budget remains.
fn wait_ready(fd: RawFd, events: libc::c_short, timeout: Duration) -> Result<bool, ProtocolError> {
    let deadline = Instant::now() + timeout;
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        pfd.revents = 0;
        // SAFETY: `pfd` is a live local for the whole call and nfds is 1. The
        // kernel reports a stale descriptor as POLLNVAL instead of faulting.
        let rc = unsafe { libc::poll(&mut pfd, 1, millis_ceil(remaining)) };

        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }
        if rc == 0 {
            return Ok(false);
        }
        if pfd.revents & libc::POLLNVAL != 0 {
            return Err(ProtocolError::BadHandle);
        }
        if pfd.revents & libc::POLLERR != 0 {
            let err = io::Error::new(
                io::ErrorKind::Other,
                "descriptor reported an error condition",
            );
            return Err(err.into());
        }
        // POLLHUP falls through: the read that follows reports end of stream
        return Ok(true);
    }
}

/// Discard unread input so the next reply cannot be confused with a stale one
pub fn flush_input(channel: &mut Channel) -> Result<(), ProtocolError> {
    let name = channel.name().to_string();
    let discarded = channel.link_mut()?.discard_input()?;
    if discarded > 0 {
        warn!("{}: discarded {} stale input bytes", name, discarded);
    }
    Ok(())
}

/// Write `frame` in one call once the channel accepts output, then drain.
pub fn send(
    channel: &mut Channel,
    frame: &Frame,
    write_timeout: Duration,
) -> Result<usize, ProtocolError> {
    let link = channel.link_mut()?;
    if !wait_ready(link.as_raw_fd(), libc::POLLOUT, write_timeout)? {
        return Err(ProtocolError::Timeout);
    }

    let expected = frame.len();
    let written = match link.write(frame.as_bytes()) {
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
        Err(e) => return Err(e.into()),
    };
    if written < expected {
        return Err(ProtocolError::PartialWrite { written, expected });
    }

    link.drain()?;
    trace!("TX {}", frame);
    Ok(written)
}

/// Perform one read once input is available, up to [`MAX_RESPONSE_SIZE`] bytes.
pub fn receive(
    channel: &mut Channel,
    read_timeout: Duration,
) -> Result<RawResponse, ProtocolError> {
    let link = channel.link_mut()?;
    if !wait_ready(link.as_raw_fd(), libc::POLLIN, read_timeout)? {
        return Err(ProtocolError::Timeout);
    }

    let mut buf = [0u8; MAX_RESPONSE_SIZE];
    loop {
        match link.read(&mut buf) {
            Ok(0) => {
                let err = io::Error::new(io::ErrorKind::UnexpectedEof, "channel closed by peer");
                return Err(err.into());
            }
            Ok(n) => {
                let response = RawResponse::new(buf[..n].to_vec());
                trace!("RX {:?}", response.text());
                return Ok(response);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Readiness was reported but the byte was gone by the time we read
            Err(e)
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                return Err(ProtocolError::Timeout)
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Collect reads until the terminator arrives, [`MAX_RESPONSE_SIZE`] bytes are
/// held, or `read_timeout` has elapsed in total.
///
/// Silence is a [`ProtocolError::Timeout`]; bytes without a terminator are an
/// incomplete frame carrying whatever did arrive.
pub fn receive_frame(
    channel: &mut Channel,
    read_timeout: Duration,
) -> Result<RawResponse, ProtocolError> {
    let deadline = Instant::now() + read_timeout;
    let mut bytes: Vec<u8> = Vec::with_capacity(MAX_RESPONSE_SIZE);

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match receive(channel, remaining) {
            Ok(chunk) => {
                let room = MAX_RESPONSE_SIZE - bytes.len();
                let take = chunk.len().min(room);
                bytes.extend_from_slice(&chunk.as_bytes()[..take]);

                let response = RawResponse::new(bytes);
                if response.is_complete() || response.len() >= MAX_RESPONSE_SIZE {
                    return Ok(response);
                }
                bytes = response.bytes;
            }
            Err(ProtocolError::Timeout) => break,
            Err(e) => return Err(e),
        }
        if Instant::now() >= deadline {
            break;
        }
    }

    if bytes.is_empty() {
        Err(ProtocolError::Timeout)
    } else {
        Err(ProtocolError::malformed(
            MalformedReason::IncompleteFrame,
            String::from_utf8_lossy(&bytes),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{framer, Address, ChannelConfig, Command, Link, Mnemonic};
    use pretty_assertions::assert_eq;
    use std::os::unix::net::UnixStream;
    use std::thread;

    /// Link that accepts at most two bytes per write
    struct ShortWriter(UnixStream);

    impl Read for ShortWriter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(2);
            self.0.write_all(&buf[..n])?;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.0.flush()
        }
    }

    impl AsRawFd for ShortWriter {
        fn as_raw_fd(&self) -> RawFd {
            self.0.as_raw_fd()
        }
    }

    impl Link for ShortWriter {
        fn discard_input(&mut self) -> io::Result<usize> {
            Ok(0)
        }

        fn drain(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn describe(&self) -> String {
            "short writer".to_string()
        }
    }

    fn read_position() -> Frame {
        framer::build(Address::new(1).unwrap(), &Command::new(Mnemonic::ReadPosition)).unwrap()
    }

    fn loopback() -> (Channel, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let channel = Channel::from_link(Box::new(ours), ChannelConfig::default()).unwrap();
        (channel, theirs)
    }

    #[test]
    fn test_millis_round_up() {
        assert_eq!(millis_ceil(Duration::ZERO), 0);
        assert_eq!(millis_ceil(Duration::from_micros(1)), 1);
        assert_eq!(millis_ceil(Duration::from_micros(1500)), 2);
        assert_eq!(millis_ceil(Duration::from_millis(100)), 100);
    }

    #[test]
    fn test_send_writes_exact_frame() {
        let (mut channel, mut peer) = loopback();
        let n = send(&mut channel, &read_position(), Duration::from_millis(100)).unwrap();
        assert_eq!(n, 4);

        let mut buf = [0u8; 4];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"#1C\r");
    }

    #[test]
    fn test_receive_returns_exactly_bytes_read() {
        let (mut channel, mut peer) = loopback();
        peer.write_all(b"1C+1234\r").unwrap();
        let response = receive(&mut channel, Duration::from_millis(100)).unwrap();
        assert_eq!(response.as_bytes(), b"1C+1234\r");
        assert!(response.is_complete());
    }

    #[test]
    fn test_receive_times_out_on_silence() {
        let (mut channel, _peer) = loopback();
        let start = Instant::now();
        let err = receive(&mut channel, Duration::from_millis(100)).unwrap_err();
        let elapsed = start.elapsed();
        assert!(err.is_timeout());
        assert!(elapsed >= Duration::from_millis(95), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(400), "{:?}", elapsed);
    }

    #[test]
    fn test_receive_caps_at_buffer_size() {
        let (mut channel, mut peer) = loopback();
        peer.write_all(&[b'x'; 200]).unwrap();
        let response = receive(&mut channel, Duration::from_millis(100)).unwrap();
        assert_eq!(response.len(), MAX_RESPONSE_SIZE);
    }

    #[test]
    fn test_receive_frame_joins_split_reply() {
        let (mut channel, mut peer) = loopback();
        let writer = thread::spawn(move || {
            peer.write_all(b"1Zp+1s-400").unwrap();
            thread::sleep(Duration::from_millis(20));
            peer.write_all(b"u+400\r").unwrap();
            peer
        });
        let response = receive_frame(&mut channel, Duration::from_millis(300)).unwrap();
        assert_eq!(response.text(), "1Zp+1s-400u+400\r");
        writer.join().unwrap();
    }

    #[test]
    fn test_receive_frame_incomplete() {
        let (mut channel, mut peer) = loopback();
        peer.write_all(b"1C+12").unwrap();
        match receive_frame(&mut channel, Duration::from_millis(50)).unwrap_err() {
            ProtocolError::MalformedResponse { reason, raw } => {
                assert_eq!(reason, MalformedReason::IncompleteFrame);
                assert_eq!(raw, "1C+12");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_flush_input_discards_stale_reply() {
        let (mut channel, mut peer) = loopback();
        peer.write_all(b"1C+99\r").unwrap();
        flush_input(&mut channel).unwrap();
        assert!(receive(&mut channel, Duration::from_millis(20)).unwrap_err().is_timeout());
    }

    #[test]
    fn test_peer_hangup_is_io_error() {
        let (mut channel, peer) = loopback();
        drop(peer);
        let err = receive(&mut channel, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof
        ));
    }

    #[test]
    fn test_closed_channel_is_bad_handle() {
        let (mut channel, _peer) = loopback();
        channel.close();
        let frame =
            framer::build(Address::new(1).unwrap(), &Command::new(Mnemonic::ReadStatus)).unwrap();
        assert!(matches!(
            send(&mut channel, &frame, Duration::from_millis(10)),
            Err(ProtocolError::BadHandle)
        ));
        assert!(matches!(
            receive(&mut channel, Duration::from_millis(10)),
            Err(ProtocolError::BadHandle)
        ));
        assert!(matches!(flush_input(&mut channel), Err(ProtocolError::BadHandle)));
    }

    #[test]
    fn test_send_times_out_when_output_is_full() {
        let (ours, _theirs) = UnixStream::pair().unwrap();
        ours.set_nonblocking(true).unwrap();
        let mut filler = &ours;
        loop {
            match filler.write(&[0u8; 4096]) {
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => panic!("filling socket: {}", e),
            }
        }
        ours.set_nonblocking(false).unwrap();
        let mut channel = Channel::from_link(Box::new(ours), ChannelConfig::default()).unwrap();

        let start = Instant::now();
        let err = send(&mut channel, &read_position(), Duration::from_millis(50)).unwrap_err();
        let elapsed = start.elapsed();
        assert!(err.is_timeout(), "{:?}", err);
        assert!(elapsed >= Duration::from_millis(45), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(300), "{:?}", elapsed);
    }

    #[test]
    fn test_short_write_is_partial_write() {
        let (ours, mut peer) = UnixStream::pair().unwrap();
        let link = ShortWriter(ours);
        let mut channel = Channel::from_link(Box::new(link), ChannelConfig::default()).unwrap();

        match send(&mut channel, &read_position(), Duration::from_millis(100)) {
            Err(ProtocolError::PartialWrite { written, expected }) => {
                assert_eq!((written, expected), (2, 4));
            }
            other => panic!("unexpected {:?}", other),
        }

        let mut buf = [0u8; 2];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"#1");
    }
}
