//! Wire-format messages and their (de)serialization.
//!
//! Every protocol message is a 32-bit-aligned record: a sender object id,
//! a 16-bit size / 16-bit opcode word, then the arguments in signature
//! order. File descriptors never appear in the byte stream, they travel
//! as ancillary data and are matched up against `Fd` slots in the
//! signature on receipt.

use std::ffi::CString;
use std::os::unix::io::RawFd;

use nix::fcntl;
use smallvec::SmallVec;

/// Size of a message header on the wire, in bytes.
pub const HEADER_LEN: usize = 8;

/// Wire metadata of a single request or event.
pub struct MessageDesc {
    /// Name of the message, as in the protocol XML.
    pub name: &'static str,
    /// Argument layout on the wire.
    pub signature: &'static [ArgKind],
    /// Minimum interface version carrying this message.
    pub since: u32,
    /// Whether sending this request destroys the sender object.
    pub destructor: bool,
}

/// The argument types understood by the wire format.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ArgKind {
    /// i32
    Int,
    /// u32
    Uint,
    /// signed 24.8 fixed point
    Fixed,
    /// NUL-terminated string
    Str,
    /// id of an existing object (0 for null)
    Object,
    /// id reserved for a newly created object
    NewId,
    /// raw byte array with a length header
    Array,
    /// file descriptor, passed as ancillary data
    Fd,
}

/// An argument value carried by a message.
#[derive(Clone, PartialEq, Debug)]
pub enum Arg {
    Int(i32),
    Uint(u32),
    Fixed(i32),
    Str(CString),
    Object(u32),
    NewId(u32),
    Array(Vec<u8>),
    Fd(RawFd),
}

impl Arg {
    pub fn kind(&self) -> ArgKind {
        match *self {
            Arg::Int(_) => ArgKind::Int,
            Arg::Uint(_) => ArgKind::Uint,
            Arg::Fixed(_) => ArgKind::Fixed,
            Arg::Str(_) => ArgKind::Str,
            Arg::Object(_) => ArgKind::Object,
            Arg::NewId(_) => ArgKind::NewId,
            Arg::Array(_) => ArgKind::Array,
            Arg::Fd(_) => ArgKind::Fd,
        }
    }
}

/// Convert a signed 24.8 fixed-point wire value to a float.
pub fn fixed_to_f64(fixed: i32) -> f64 {
    f64::from(fixed) / 256.0
}

/// A single protocol message.
#[derive(Clone, PartialEq, Debug)]
pub struct Message {
    /// Id of the object this message is addressed from/to.
    pub sender: u32,
    /// Opcode within the sender's interface.
    pub opcode: u16,
    /// Argument values, in signature order.
    pub args: SmallVec<[Arg; 4]>,
}

/// Failure to serialize a message.
#[derive(Clone, Debug)]
pub enum MarshalError {
    /// The encoded message would exceed the 16-bit size field.
    Oversize,
    /// A file descriptor argument could not be duplicated.
    DupFailed(nix::Error),
}

impl std::error::Error for MarshalError {}

impl std::fmt::Display for MarshalError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MarshalError::Oversize => f.write_str("message too large for the wire size field"),
            MarshalError::DupFailed(e) => write!(f, "could not duplicate a file descriptor: {}", e),
        }
    }
}

/// Failure to deserialize a message.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ParseError {
    /// The signature references a file descriptor that has not arrived.
    MissingFd,
    /// The payload does not match the expected signature.
    Malformed,
}

impl std::error::Error for ParseError {}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ParseError::MissingFd => f.write_str("message references a file descriptor that was not received"),
            ParseError::Malformed => f.write_str("message is malformed"),
        }
    }
}

/// Decode a message header: `(sender, opcode, total length in bytes)`.
///
/// Returns `None` if fewer than [`HEADER_LEN`] bytes are available.
pub fn peek_header(bytes: &[u8]) -> Option<(u32, u16, usize)> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    let sender = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let word = u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let opcode = (word & 0xFFFF) as u16;
    let len = (word >> 16) as usize;
    Some((sender, opcode, len))
}

fn pad(len: usize) -> usize {
    (len + 3) & !3
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_ne_bytes());
}

fn put_array(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
    for _ in bytes.len()..pad(bytes.len()) {
        out.push(0);
    }
}

impl Message {
    /// Append this message to `out`, and any `Fd` arguments to `fds`.
    ///
    /// File descriptors are duplicated with `CLOEXEC` set, so the caller
    /// keeps ownership of the originals; the duplicates in `fds` belong
    /// to the transport and must be closed once transmitted. On error
    /// nothing is appended and all duplicates made so far are closed.
    pub fn marshal(&self, out: &mut Vec<u8>, fds: &mut Vec<RawFd>) -> Result<(), MarshalError> {
        let start = out.len();
        put_u32(out, self.sender);
        put_u32(out, 0); // size/opcode word, patched below
        let mut dup_guard = FdGuard::default();
        for arg in &self.args {
            match arg {
                Arg::Int(v) => put_u32(out, *v as u32),
                Arg::Uint(v) => put_u32(out, *v),
                Arg::Fixed(v) => put_u32(out, *v as u32),
                Arg::Object(id) => put_u32(out, *id),
                Arg::NewId(id) => put_u32(out, *id),
                Arg::Str(s) => put_array(out, s.as_bytes_with_nul()),
                Arg::Array(a) => put_array(out, a),
                Arg::Fd(fd) => match dup_cloexec(*fd) {
                    Ok(dup) => dup_guard.push(dup),
                    Err(e) => {
                        out.truncate(start);
                        return Err(MarshalError::DupFailed(e));
                    }
                },
            }
        }
        let size = out.len() - start;
        if size > u16::MAX as usize {
            out.truncate(start);
            return Err(MarshalError::Oversize);
        }
        let word = ((size as u32) << 16) | u32::from(self.opcode);
        out[start + 4..start + 8].copy_from_slice(&word.to_ne_bytes());
        fds.append(&mut dup_guard.take());
        Ok(())
    }

    /// Decode one message of `len` bytes matching `signature`.
    ///
    /// `bytes` must hold the full message including its header; `fds` is
    /// drained front-first, one descriptor per `Fd` slot. The caller has
    /// already checked (via [`peek_header`]) that `len` bytes are
    /// available and knows how many descriptors the signature consumes.
    pub fn unmarshal(
        sender: u32,
        opcode: u16,
        signature: &'static [ArgKind],
        bytes: &[u8],
        fds: &mut std::collections::VecDeque<RawFd>,
    ) -> Result<Message, ParseError> {
        let mut offset = HEADER_LEN;
        let mut args = SmallVec::new();
        for kind in signature {
            match kind {
                ArgKind::Fd => {
                    let fd = fds.pop_front().ok_or(ParseError::MissingFd)?;
                    args.push(Arg::Fd(fd));
                    continue;
                }
                _ => {}
            }
            if bytes.len() < offset + 4 {
                return Err(ParseError::Malformed);
            }
            let word = u32::from_ne_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]);
            offset += 4;
            match kind {
                ArgKind::Int => args.push(Arg::Int(word as i32)),
                ArgKind::Uint => args.push(Arg::Uint(word)),
                ArgKind::Fixed => args.push(Arg::Fixed(word as i32)),
                ArgKind::Object => args.push(Arg::Object(word)),
                ArgKind::NewId => args.push(Arg::NewId(word)),
                ArgKind::Str | ArgKind::Array => {
                    let body_len = word as usize;
                    let end = offset + pad(body_len);
                    if bytes.len() < end {
                        return Err(ParseError::Malformed);
                    }
                    let body = &bytes[offset..offset + body_len];
                    offset = end;
                    if let ArgKind::Str = kind {
                        let s = std::ffi::CStr::from_bytes_with_nul(body)
                            .map_err(|_| ParseError::Malformed)?;
                        args.push(Arg::Str(s.to_owned()));
                    } else {
                        args.push(Arg::Array(body.to_vec()));
                    }
                }
                ArgKind::Fd => unreachable!(),
            }
        }
        Ok(Message { sender, opcode, args })
    }
}

/// Count the `Fd` slots in a signature.
pub fn fd_count(signature: &[ArgKind]) -> usize {
    signature.iter().filter(|k| **k == ArgKind::Fd).count()
}

/// Duplicate a descriptor with the CLOEXEC flag set on the copy.
pub fn dup_cloexec(fd: RawFd) -> nix::Result<RawFd> {
    fcntl::fcntl(fd, fcntl::FcntlArg::F_DUPFD_CLOEXEC(0))
}

/// Closes every descriptor it still holds on drop.
#[derive(Default)]
struct FdGuard {
    fds: Vec<RawFd>,
}

impl FdGuard {
    fn push(&mut self, fd: RawFd) {
        self.fds.push(fd);
    }

    fn take(&mut self) -> Vec<RawFd> {
        std::mem::replace(&mut self.fds, Vec::new())
    }
}

impl Drop for FdGuard {
    fn drop(&mut self) {
        for fd in self.fds.drain(..) {
            let _ = nix::unistd::close(fd);
        }
    }
}
