//! A single-connection Wayland client session core.
//!
//! This crate speaks the client side of the wayland wire protocol
//! itself: it connects to the compositor socket, runs the registry
//! discovery roundtrip, binds the capability globals it needs
//! (`wl_compositor`, `xdg_wm_base`, `wl_seat`, plus `wl_shm` when
//! offered), builds a surface → xdg_surface → toplevel window graph and
//! then services a cooperative, single-threaded event loop.
//!
//! The embedding application drives the loop: call
//! [`Session::dispatch`] (blocking) or [`Session::dispatch_pending`]
//! once per frame/tick, with a [`SessionHandler`] receiving window
//! configure/close notifications and frame-batched pointer input.
//! Pixel content travels through anonymous shared-memory buffers
//! ([`shm`]) handed to the compositor by file descriptor.
//!
//! ```no_run
//! use wayline::{Session, SessionConfig, SessionHandler};
//!
//! struct App;
//! impl SessionHandler for App {
//!     fn configure(&mut self, width: i32, height: i32) {
//!         // resize and submit a matching buffer
//!         let _ = (width, height);
//!     }
//! }
//!
//! let mut session = Session::connect(SessionConfig::new("demo")).unwrap();
//! let mut app = App;
//! loop {
//!     session.dispatch(&mut app).unwrap();
//! }
//! ```
//!
//! Reconnection is out of scope: a lost connection is fatal for the
//! session, and every terminal error tears the transport down, letting
//! the compositor reclaim all objects the connection owned.

use std::fmt;

mod connection;
mod map;

pub mod globals;
pub mod input;
pub mod protocol;
pub mod session;
pub mod shm;
pub mod socket;
pub mod wire;

pub use crate::globals::GlobalEntry;
pub use crate::input::PointerEvent;
pub use crate::session::{Feature, Session, SessionConfig, SessionHandler};
pub use crate::shm::{alloc_shm_region, Buffer, PoolError, ShmMapping, ShmPool};

/// A fatal error reported by (or about) the compositor.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ProtocolError {
    /// Object the failure is attributed to (0 when unknown).
    pub object: u32,
    /// Interface-specific error code (0 when synthesized locally).
    pub code: u32,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "protocol error {} on object {}: {}", self.code, self.object, self.message)
    }
}

/// Why establishing a session failed. All variants leave the transport
/// closed; none is retried internally.
#[derive(Clone, Debug)]
pub enum ConnectError {
    /// No compositor socket could be found or connected to. Absence is
    /// not transient, so there is no retry.
    NoCompositor,
    /// `WAYLAND_SOCKET` was set but did not hold a usable descriptor.
    InvalidFd,
    /// A mandatory global was not advertised before discovery
    /// completed; carries the missing interface name.
    MissingCapability(&'static str),
    /// The compositor misbehaved during the handshake.
    Protocol(ProtocolError),
    /// The transport dropped while the session was being built.
    ConnectionLost,
}

impl std::error::Error for ConnectError {}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectError::NoCompositor => f.write_str("no compositor is listening"),
            ConnectError::InvalidFd => f.write_str("WAYLAND_SOCKET does not hold a valid descriptor"),
            ConnectError::MissingCapability(name) => {
                write!(f, "compositor does not advertise required global {}", name)
            }
            ConnectError::Protocol(e) => write!(f, "{}", e),
            ConnectError::ConnectionLost => f.write_str("connection lost during session bootstrap"),
        }
    }
}

/// A terminal failure of a live session. Either way the session is
/// finished; there is no automatic reconnection.
#[derive(Clone, Debug)]
pub enum SessionError {
    /// The transport was severed.
    ConnectionLost,
    /// The compositor sent something that cannot be made sense of, or
    /// reported a fatal error itself.
    Protocol(ProtocolError),
}

impl std::error::Error for SessionError {}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionError::ConnectionLost => f.write_str("connection to the compositor was lost"),
            SessionError::Protocol(e) => write!(f, "{}", e),
        }
    }
}

impl From<SessionError> for ConnectError {
    fn from(e: SessionError) -> ConnectError {
        match e {
            SessionError::ConnectionLost => ConnectError::ConnectionLost,
            SessionError::Protocol(e) => ConnectError::Protocol(e),
        }
    }
}

/// Shared-memory allocation failure. Recoverable: the caller may back
/// off and retry later, the session itself is unaffected.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AllocError {
    /// The retry budget was exhausted or the OS refused the region.
    ResourceExhausted,
}

impl std::error::Error for AllocError {}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AllocError::ResourceExhausted => f.write_str("shared memory region allocation failed"),
        }
    }
}
