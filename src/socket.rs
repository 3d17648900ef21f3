//! Unix socket transport with file-descriptor passing.

use std::collections::VecDeque;
use std::io::{IoSlice, IoSliceMut};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use nix::sys::socket::{self, ControlMessage, ControlMessageOwned, MsgFlags};

use crate::wire::{self, ArgKind, Message, ParseError};

/// Maximum number of descriptors attached to a single socket message.
pub const MAX_FDS_OUT: usize = 28;
/// Transmission chunk size; the outgoing buffer is flushed beyond this.
pub const MAX_BYTES_OUT: usize = 4096;

/// A connected stream socket able to carry file descriptors.
#[derive(Debug)]
pub struct Socket {
    stream: UnixStream,
}

impl Socket {
    pub fn new(stream: UnixStream) -> Socket {
        Socket { stream }
    }

    /// Send bytes plus ancillary descriptors; never blocks.
    ///
    /// Returns the number of bytes accepted by the kernel, which may be
    /// short. The descriptors are attached to the first byte sent, so on
    /// a short write the caller must not resend them.
    pub fn send(&self, bytes: &[u8], fds: &[RawFd]) -> nix::Result<usize> {
        let iov = [IoSlice::new(bytes)];
        let flags = MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_NOSIGNAL;
        if fds.is_empty() {
            socket::sendmsg::<()>(self.stream.as_raw_fd(), &iov, &[], flags, None)
        } else {
            let cmsgs = [ControlMessage::ScmRights(fds)];
            socket::sendmsg::<()>(self.stream.as_raw_fd(), &iov, &cmsgs, flags, None)
        }
    }

    /// Receive bytes into `buf`, appending any descriptors to `fds`.
    ///
    /// Never blocks; a return of `Ok(0)` means the peer closed the
    /// connection.
    pub fn receive(&self, buf: &mut [u8], fds: &mut Vec<RawFd>) -> nix::Result<usize> {
        let mut cmsg = nix::cmsg_space!([RawFd; MAX_FDS_OUT]);
        let mut iov = [IoSliceMut::new(buf)];
        let msg = socket::recvmsg::<()>(
            self.stream.as_raw_fd(),
            &mut iov,
            Some(&mut cmsg),
            MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_CMSG_CLOEXEC,
        )?;
        for cmsg in msg.cmsgs() {
            if let ControlMessageOwned::ScmRights(received) = cmsg {
                fds.extend(received);
            }
        }
        Ok(msg.bytes)
    }
}

impl AsRawFd for Socket {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// A [`Socket`] with message-level buffering on both directions.
///
/// Outgoing messages accumulate until [`flush`](BufferedSocket::flush);
/// incoming bytes accumulate until enough of a message is present for
/// [`next_message`](BufferedSocket::next_message) to decode it.
#[derive(Debug)]
pub struct BufferedSocket {
    socket: Socket,
    out_bytes: Vec<u8>,
    out_fds: Vec<RawFd>,
    in_bytes: Vec<u8>,
    in_fds: VecDeque<RawFd>,
}

impl BufferedSocket {
    pub fn new(socket: Socket) -> BufferedSocket {
        BufferedSocket {
            socket,
            out_bytes: Vec::with_capacity(MAX_BYTES_OUT),
            out_fds: Vec::new(),
            in_bytes: Vec::with_capacity(2 * MAX_BYTES_OUT),
            in_fds: VecDeque::new(),
        }
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Queue a message in the outgoing buffer, flushing first if the
    /// buffer is already at the transmission chunk size.
    pub fn write_message(&mut self, msg: &Message) -> nix::Result<()> {
        if self.out_bytes.len() >= MAX_BYTES_OUT || self.out_fds.len() >= MAX_FDS_OUT {
            self.flush()?;
        }
        match msg.marshal(&mut self.out_bytes, &mut self.out_fds) {
            Ok(()) => Ok(()),
            Err(wire::MarshalError::Oversize) => Err(nix::errno::Errno::E2BIG),
            Err(wire::MarshalError::DupFailed(e)) => Err(e),
        }
    }

    /// Push the outgoing buffer to the socket.
    ///
    /// Transmitted descriptors are closed (they are duplicates owned by
    /// the transport). Errors with `EAGAIN` if the kernel buffer is
    /// full; the unsent tail is kept for a later retry.
    pub fn flush(&mut self) -> nix::Result<()> {
        while !self.out_bytes.is_empty() {
            let sent = self.socket.send(&self.out_bytes, &self.out_fds)?;
            self.out_bytes.drain(..sent);
            for fd in self.out_fds.drain(..) {
                let _ = nix::unistd::close(fd);
            }
        }
        Ok(())
    }

    /// Read whatever the socket has pending into the incoming buffers.
    ///
    /// Returns the number of bytes received; `Ok(0)` means end of
    /// stream. Errors with `EAGAIN` when nothing is available.
    pub fn fill_incoming(&mut self) -> nix::Result<usize> {
        let mut chunk = [0u8; 2 * MAX_BYTES_OUT];
        let mut fds = Vec::new();
        let received = self.socket.receive(&mut chunk, &mut fds)?;
        self.in_bytes.extend_from_slice(&chunk[..received]);
        self.in_fds.extend(fds);
        Ok(received)
    }

    /// Decode the next buffered message, if a complete one is present.
    ///
    /// `lookup` maps `(sender id, opcode)` to the message signature;
    /// returning `None` from it aborts decoding with
    /// [`ParseError::Malformed`], as an unknown couple means the streams
    /// have diverged and no message boundary can be trusted.
    pub fn next_message<F>(&mut self, lookup: F) -> Result<Option<Message>, ParseError>
    where
        F: FnOnce(u32, u16) -> Option<&'static [ArgKind]>,
    {
        let (sender, opcode, len) = match wire::peek_header(&self.in_bytes) {
            Some(header) => header,
            None => return Ok(None),
        };
        if len < wire::HEADER_LEN {
            return Err(ParseError::Malformed);
        }
        if self.in_bytes.len() < len {
            return Ok(None);
        }
        let signature = lookup(sender, opcode).ok_or(ParseError::Malformed)?;
        if self.in_fds.len() < wire::fd_count(signature) {
            // ancillary data lags behind the byte stream; wait for it
            return Ok(None);
        }
        let msg = Message::unmarshal(sender, opcode, signature, &self.in_bytes[..len], &mut self.in_fds)?;
        self.in_bytes.drain(..len);
        Ok(Some(msg))
    }
}

impl Drop for BufferedSocket {
    fn drop(&mut self) {
        for fd in self.out_fds.drain(..) {
            let _ = nix::unistd::close(fd);
        }
        for fd in self.in_fds.drain(..) {
            let _ = nix::unistd::close(fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Arg;
    use std::ffi::CString;

    fn pair() -> (BufferedSocket, BufferedSocket) {
        let (a, b) = UnixStream::pair().unwrap();
        (
            BufferedSocket::new(Socket::new(a)),
            BufferedSocket::new(Socket::new(b)),
        )
    }

    #[test]
    fn messages_cross_the_socket() {
        let (mut tx, mut rx) = pair();
        let first = Message {
            sender: 1,
            opcode: 1,
            args: smallvec::smallvec![Arg::NewId(2)],
        };
        let second = Message {
            sender: 2,
            opcode: 0,
            args: smallvec::smallvec![
                Arg::Uint(14),
                Arg::Str(CString::new("wl_compositor").unwrap()),
                Arg::Uint(4),
            ],
        };
        tx.write_message(&first).unwrap();
        tx.write_message(&second).unwrap();
        tx.flush().unwrap();

        assert!(rx.fill_incoming().unwrap() > 0);
        static SIG_NEW_ID: &[ArgKind] = &[ArgKind::NewId];
        static SIG_GLOBAL: &[ArgKind] = &[ArgKind::Uint, ArgKind::Str, ArgKind::Uint];
        let got = rx
            .next_message(|sender, _| match sender {
                1 => Some(SIG_NEW_ID),
                2 => Some(SIG_GLOBAL),
                _ => None,
            })
            .unwrap()
            .unwrap();
        assert_eq!(got, first);
        let got = rx
            .next_message(|sender, _| match sender {
                1 => Some(SIG_NEW_ID),
                2 => Some(SIG_GLOBAL),
                _ => None,
            })
            .unwrap()
            .unwrap();
        assert_eq!(got.sender, 2);
    }

    #[test]
    fn eof_is_distinguished_from_empty() {
        let (tx, mut rx) = pair();
        assert_eq!(rx.fill_incoming(), Err(nix::errno::Errno::EAGAIN));
        drop(tx);
        assert_eq!(rx.fill_incoming().unwrap(), 0);
    }

    #[test]
    fn descriptor_rides_along() {
        let (mut tx, mut rx) = pair();
        let msg = Message {
            sender: 6,
            opcode: 0,
            args: smallvec::smallvec![Arg::NewId(7), Arg::Fd(0), Arg::Int(64)],
        };
        tx.write_message(&msg).unwrap();
        tx.flush().unwrap();

        rx.fill_incoming().unwrap();
        static SIG: &[ArgKind] = &[ArgKind::NewId, ArgKind::Fd, ArgKind::Int];
        let got = rx.next_message(|_, _| Some(SIG)).unwrap().unwrap();
        match got.args[1] {
            Arg::Fd(fd) => {
                assert!(fd > 0);
                nix::unistd::close(fd).unwrap();
            }
            ref other => panic!("expected fd, got {:?}", other),
        }
    }
}
