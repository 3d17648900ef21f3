//! Connection state: the transport socket, the object store, and the
//! queue of decoded-but-undispatched events.

use std::collections::VecDeque;
use std::env;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use log::trace;
use nix::errno::Errno;
use nix::fcntl;
use nix::poll::{poll, PollFd, PollFlags};

use crate::map::{ObjectMap, Role, DISPLAY_ID};
use crate::protocol::{wl_display, Interface};
use crate::socket::{BufferedSocket, Socket};
use crate::wire::{Arg, Message};
use crate::{ConnectError, ProtocolError, SessionError};

/// The transport connection to the compositor; root of all object
/// lifetimes. Dropping it tears the whole session down server-side.
pub(crate) struct Connection {
    socket: BufferedSocket,
    pub(crate) map: ObjectMap,
    pending: VecDeque<Message>,
    last_error: Option<SessionError>,
}

impl Connection {
    /// Connect following the environment: an inherited `WAYLAND_SOCKET`
    /// descriptor if present, otherwise the socket named by
    /// `WAYLAND_DISPLAY` under `XDG_RUNTIME_DIR`.
    pub fn connect_to_env() -> Result<Connection, ConnectError> {
        if let Ok(fd_str) = env::var("WAYLAND_SOCKET") {
            let fd: RawFd = fd_str.parse().map_err(|_| ConnectError::InvalidFd)?;
            // consume the variable so child processes don't reuse the fd
            env::remove_var("WAYLAND_SOCKET");
            let flags = fcntl::fcntl(fd, fcntl::FcntlArg::F_GETFD).map_err(|_| ConnectError::InvalidFd)?;
            let flags = fcntl::FdFlag::from_bits_truncate(flags) | fcntl::FdFlag::FD_CLOEXEC;
            fcntl::fcntl(fd, fcntl::FcntlArg::F_SETFD(flags)).map_err(|_| ConnectError::InvalidFd)?;
            let stream = unsafe { UnixStream::from_raw_fd(fd) };
            return Ok(Connection::from_stream(stream));
        }

        let name = env::var_os("WAYLAND_DISPLAY").unwrap_or_else(|| "wayland-0".into());
        let path = if PathBuf::from(&name).is_absolute() {
            PathBuf::from(name)
        } else {
            let dir = env::var_os("XDG_RUNTIME_DIR").ok_or(ConnectError::NoCompositor)?;
            let mut path = PathBuf::from(dir);
            path.push(name);
            path
        };
        let stream = UnixStream::connect(path).map_err(|_| ConnectError::NoCompositor)?;
        Ok(Connection::from_stream(stream))
    }

    /// Take over an already connected stream.
    pub fn from_stream(stream: UnixStream) -> Connection {
        let mut map = ObjectMap::new();
        let display = map.insert_new(&wl_display::INTERFACE, 1, Role::Display);
        debug_assert_eq!(display, DISPLAY_ID);
        Connection {
            socket: BufferedSocket::new(Socket::new(stream)),
            map,
            pending: VecDeque::new(),
            last_error: None,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    /// Record `err` as the sticky session error (first one wins) and
    /// hand it back.
    pub fn record_error(&mut self, err: SessionError) -> SessionError {
        if self.last_error.is_none() {
            self.last_error = Some(err.clone());
        }
        err
    }

    /// Allocate an id and register a new protocol object.
    pub fn create_object(&mut self, interface: &'static Interface, version: u32, role: Role) -> u32 {
        self.map.insert_new(interface, version, role)
    }

    /// Queue a request for transmission. A request whose table entry is
    /// a destructor marks the sender dead in the object store.
    pub fn send_request(&mut self, msg: Message) -> Result<(), SessionError> {
        if let Some(err) = &self.last_error {
            return Err(err.clone());
        }
        let info = {
            let slot = self.map.find(msg.sender).filter(|s| s.alive);
            slot.and_then(|s| {
                s.interface
                    .requests
                    .get(msg.opcode as usize)
                    .map(|d| (s.interface.name, d.name, d.destructor, s.version >= d.since))
            })
        };
        let (interface, request, destructor, version_ok) = match info {
            Some(info) => info,
            None => {
                let err = SessionError::Protocol(ProtocolError {
                    object: msg.sender,
                    code: 0,
                    message: format!("request {} sent on unknown or dead object", msg.opcode),
                });
                return Err(self.record_error(err));
            }
        };
        if !version_ok {
            let err = SessionError::Protocol(ProtocolError {
                object: msg.sender,
                code: 0,
                message: format!("request {} needs a newer {} than was bound", request, interface),
            });
            return Err(self.record_error(err));
        }
        trace!("-> {}@{}.{}", interface, msg.sender, request);
        if self.socket.write_message(&msg).is_err() {
            return Err(self.record_error(SessionError::ConnectionLost));
        }
        if destructor {
            self.map.mark_dead(msg.sender);
        }
        Ok(())
    }

    /// Transmit everything queued, waiting out short writes.
    pub fn flush(&mut self) -> Result<(), SessionError> {
        loop {
            match self.socket.flush() {
                Ok(()) => return Ok(()),
                Err(Errno::EAGAIN) => self.wait_for(PollFlags::POLLOUT)?,
                Err(_) => return Err(self.record_error(SessionError::ConnectionLost)),
            }
        }
    }

    /// Block until the socket has something to read.
    pub fn wait_readable(&mut self) -> Result<(), SessionError> {
        self.wait_for(PollFlags::POLLIN)
    }

    fn wait_for(&mut self, interest: PollFlags) -> Result<(), SessionError> {
        loop {
            let mut fds = [PollFd::new(self.socket.as_raw_fd(), interest)];
            match poll(&mut fds, -1) {
                Ok(_) => return Ok(()),
                Err(Errno::EINTR) => continue,
                Err(_) => return Err(self.record_error(SessionError::ConnectionLost)),
            }
        }
    }

    /// Pull readable data off the socket and decode complete messages
    /// into the pending queue. Never blocks. `Ok(0)` means no event was
    /// queued; end of stream surfaces as `ConnectionLost` immediately.
    pub fn read_events(&mut self) -> Result<usize, SessionError> {
        if let Some(err) = &self.last_error {
            return Err(err.clone());
        }
        match self.socket.fill_incoming() {
            Ok(0) => return Err(self.record_error(SessionError::ConnectionLost)),
            Ok(_) => {}
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => {}
            Err(_) => return Err(self.record_error(SessionError::ConnectionLost)),
        }

        let mut queued = 0;
        let mut malformed = None;
        {
            let Connection { socket, map, pending, .. } = self;
            loop {
                match socket.next_message(|id, opcode| map.event_signature(id, opcode)) {
                    Ok(Some(msg)) => {
                        let alive = map.find(msg.sender).map(|slot| slot.alive).unwrap_or(false);
                        if !alive {
                            // the event raced a destructor we already
                            // sent; swallow it, closing any payload fds
                            for arg in &msg.args {
                                if let Arg::Fd(fd) = arg {
                                    let _ = nix::unistd::close(*fd);
                                }
                            }
                            continue;
                        }
                        pending.push_back(msg);
                        queued += 1;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        malformed = Some(SessionError::Protocol(ProtocolError {
                            object: 0,
                            code: 0,
                            message: "compositor sent an undecodable message".into(),
                        }));
                        break;
                    }
                }
            }
        }
        if let Some(err) = malformed {
            return Err(self.record_error(err));
        }
        Ok(queued)
    }

    /// Next decoded event awaiting dispatch.
    pub fn take_event(&mut self) -> Option<Message> {
        self.pending.pop_front()
    }
}
