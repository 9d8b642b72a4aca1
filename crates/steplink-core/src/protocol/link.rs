//! Descriptor-backed byte streams a channel can own
//!
//! The transport waits on the raw descriptor with `poll(2)`, so anything that
//! is `AsRawFd` can carry the protocol: a tty opened through `serialport`, or a
//! Unix socket when the controller sits behind a local relay (and in tests).

use serialport::{ClearBuffer, FlowControl, SerialPort, TTYPort};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use super::channel::{ChannelConfig, LineMode};
use super::{ProtocolError, TERMINATOR};

/// Abstraction for the stream underneath a [`Channel`](super::Channel)
pub trait Link: Read + Write + AsRawFd + Send {
    /// Apply line settings. Links without a line discipline accept and ignore them.
    fn configure(&mut self, config: &ChannelConfig) -> Result<(), ProtocolError> {
        let _ = config;
        Ok(())
    }

    /// Drop unread input, returning how many bytes were pending if known
    fn discard_input(&mut self) -> io::Result<usize>;

    /// Block until written bytes have left the local buffer
    fn drain(&mut self) -> io::Result<()>;

    /// Human readable name for logs
    fn describe(&self) -> String;
}

fn serial_err(e: serialport::Error) -> ProtocolError {
    ProtocolError::Config(e.to_string())
}

/// Switch the tty between canonical and raw input.
///
/// Carriage return must reach us untranslated in both modes since it is the
/// frame terminator.
fn apply_line_mode(fd: RawFd, mode: LineMode, inter_char_ds: u8) -> Result<(), ProtocolError> {
    // SAFETY: termios is plain old data; tcgetattr fills it completely on success.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    // SAFETY: `tio` outlives the call and is a valid termios to write into. A
    // descriptor that is closed or not a tty fails with EBADF or ENOTTY.
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(ProtocolError::Config(format!(
            "tcgetattr: {}",
            io::Error::last_os_error()
        )));
    }

    tio.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON);
    tio.c_oflag &= !libc::OPOST;
    tio.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ISIG | libc::IEXTEN);

    match mode {
        LineMode::Canonical => {
            tio.c_lflag |= libc::ICANON;
            tio.c_cc[libc::VEOL] = TERMINATOR as u8;
        }
        LineMode::Raw => {
            tio.c_lflag &= !libc::ICANON;
            tio.c_cc[libc::VMIN] = 1;
            tio.c_cc[libc::VTIME] = inter_char_ds;
        }
    }

    // SAFETY: `tio` was filled by tcgetattr above and is only read by the call.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(ProtocolError::Config(format!(
            "tcsetattr: {}",
            io::Error::last_os_error()
        )));
    }
    Ok(())
}

impl Link for TTYPort {
    fn configure(&mut self, config: &ChannelConfig) -> Result<(), ProtocolError> {
        self.set_baud_rate(config.baud_rate).map_err(serial_err)?;
        self.set_data_bits(config.char_size.into()).map_err(serial_err)?;
        self.set_parity(config.parity.into()).map_err(serial_err)?;
        self.set_stop_bits(config.stop_bits.into()).map_err(serial_err)?;
        self.set_flow_control(FlowControl::None).map_err(serial_err)?;
        apply_line_mode(self.as_raw_fd(), config.mode, config.inter_char_timeout_ds)
    }

    fn discard_input(&mut self) -> io::Result<usize> {
        let pending = self
            .bytes_to_read()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.clear(ClearBuffer::Input)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(pending as usize)
    }

    fn drain(&mut self) -> io::Result<()> {
        // SAFETY: the descriptor belongs to `self`, which stays borrowed until
        // tcdrain returns. No memory is passed.
        if unsafe { libc::tcdrain(self.as_raw_fd()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.name().unwrap_or_else(|| format!("tty fd {}", self.as_raw_fd()))
    }
}

impl Link for UnixStream {
    fn discard_input(&mut self) -> io::Result<usize> {
        // No flush syscall for sockets: read until the kernel buffer is empty.
        self.set_nonblocking(true)?;
        let mut buf = [0u8; 256];
        let mut discarded = 0;
        let result = loop {
            match self.read(&mut buf) {
                Ok(0) => break Ok(discarded),
                Ok(n) => discarded += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(discarded),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        self.set_nonblocking(false)?;
        result
    }

    fn drain(&mut self) -> io::Result<()> {
        self.flush()
    }

    fn describe(&self) -> String {
        format!("unix socket fd {}", self.as_raw_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::{assert_eq, assert_ne};

    #[test]
    fn test_socket_discard_counts_bytes() {
        let (mut ours, mut theirs) = UnixStream::pair().unwrap();
        theirs.write_all(b"1C+5\r1C+6\r").unwrap();
        assert_eq!(ours.discard_input().unwrap(), 10);
        assert_eq!(ours.discard_input().unwrap(), 0);
    }

    #[test]
    fn test_socket_configure_is_noop() {
        let (mut ours, _theirs) = UnixStream::pair().unwrap();
        assert!(Link::configure(&mut ours, &ChannelConfig::default()).is_ok());
        assert!(ours.describe().starts_with("unix socket"));
    }

    fn read_attrs(fd: RawFd) -> libc::termios {
        let mut tio: libc::termios = unsafe { std::mem::zeroed() };
        assert_eq!(unsafe { libc::tcgetattr(fd, &mut tio) }, 0);
        tio
    }

    #[test]
    fn test_line_mode_on_socket_is_config_error() {
        let (ours, _theirs) = UnixStream::pair().unwrap();
        let err = apply_line_mode(ours.as_raw_fd(), LineMode::Canonical, 1).unwrap_err();
        match err {
            ProtocolError::Config(msg) => assert!(msg.starts_with("tcgetattr"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_line_mode_on_pty() {
        // Sandboxes without /dev/ptmx cannot run this
        let (_master, slave) = match TTYPort::pair() {
            Ok(pair) => pair,
            Err(e) => {
                eprintln!("skipping, no pty available: {}", e);
                return;
            }
        };
        let fd = slave.as_raw_fd();

        apply_line_mode(fd, LineMode::Canonical, 1).unwrap();
        let tio = read_attrs(fd);
        assert_ne!(tio.c_lflag & libc::ICANON, 0);
        assert_eq!(tio.c_lflag & libc::ECHO, 0);
        assert_eq!(tio.c_iflag & (libc::ICRNL | libc::IGNCR), 0);
        assert_eq!(tio.c_cc[libc::VEOL], b'\r');

        apply_line_mode(fd, LineMode::Raw, 3).unwrap();
        let tio = read_attrs(fd);
        assert_eq!(tio.c_lflag & libc::ICANON, 0);
        assert_eq!(tio.c_iflag & (libc::ICRNL | libc::IGNCR), 0);
        assert_eq!(tio.c_cc[libc::VMIN], 1);
        assert_eq!(tio.c_cc[libc::VTIME], 3);
    }
}
