//! Hand-written descriptions of the protocol interfaces the session
//! speaks, with typed events and request constructors.
//!
//! Each interface module carries the wire tables (request/event
//! signatures in opcode order), a typed `Event` enum decoded from a raw
//! [`Message`], and constructors for the requests this client sends.
//! Tables list every message of the supported interface version so that
//! any event the compositor is allowed to send can be sized and decoded.

use std::ffi::CString;
use std::fmt;
use std::os::unix::io::RawFd;

use smallvec::smallvec;

use crate::wire::{Arg, ArgKind, Message, MessageDesc};

/// Static description of a protocol interface.
pub struct Interface {
    pub name: &'static str,
    /// Highest version this client implements.
    pub version: u32,
    pub requests: &'static [MessageDesc],
    pub events: &'static [MessageDesc],
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Interface({}@{})", self.name, self.version)
    }
}

impl PartialEq for Interface {
    fn eq(&self, other: &Interface) -> bool {
        self.name == other.name
    }
}

/// Resolve an interface description from its advertised name.
pub fn interface_by_name(name: &str) -> Option<&'static Interface> {
    match name {
        "wl_display" => Some(&wl_display::INTERFACE),
        "wl_callback" => Some(&wl_callback::INTERFACE),
        "wl_registry" => Some(&wl_registry::INTERFACE),
        "wl_compositor" => Some(&wl_compositor::INTERFACE),
        "wl_shm" => Some(&wl_shm::INTERFACE),
        "wl_shm_pool" => Some(&wl_shm_pool::INTERFACE),
        "wl_buffer" => Some(&wl_buffer::INTERFACE),
        "wl_surface" => Some(&wl_surface::INTERFACE),
        "wl_seat" => Some(&wl_seat::INTERFACE),
        "wl_pointer" => Some(&wl_pointer::INTERFACE),
        "xdg_wm_base" => Some(&xdg_wm_base::INTERFACE),
        "xdg_surface" => Some(&xdg_surface::INTERFACE),
        "xdg_toplevel" => Some(&xdg_toplevel::INTERFACE),
        _ => None,
    }
}

const fn desc(
    name: &'static str,
    signature: &'static [ArgKind],
    since: u32,
    destructor: bool,
) -> MessageDesc {
    MessageDesc { name, signature, since, destructor }
}

/// Build a protocol string argument, dropping interior NUL bytes.
fn c_string(s: &str) -> CString {
    let bytes: Vec<u8> = s.bytes().filter(|&b| b != 0).collect();
    // cannot contain a NUL after the filter above
    unsafe { CString::from_vec_unchecked(bytes) }
}

/// Sequential typed extraction of message arguments.
struct Args {
    iter: smallvec::IntoIter<[Arg; 4]>,
}

impl Args {
    fn new(msg: Message) -> Args {
        Args { iter: msg.args.into_iter() }
    }

    fn uint(&mut self) -> Option<u32> {
        match self.iter.next()? {
            Arg::Uint(v) => Some(v),
            _ => None,
        }
    }

    fn int(&mut self) -> Option<i32> {
        match self.iter.next()? {
            Arg::Int(v) => Some(v),
            _ => None,
        }
    }

    fn fixed(&mut self) -> Option<f64> {
        match self.iter.next()? {
            Arg::Fixed(v) => Some(crate::wire::fixed_to_f64(v)),
            _ => None,
        }
    }

    fn object(&mut self) -> Option<u32> {
        match self.iter.next()? {
            Arg::Object(id) => Some(id),
            _ => None,
        }
    }

    fn string(&mut self) -> Option<String> {
        match self.iter.next()? {
            Arg::Str(s) => s.into_string().ok(),
            _ => None,
        }
    }

    fn array(&mut self) -> Option<Vec<u8>> {
        match self.iter.next()? {
            Arg::Array(a) => Some(a),
            _ => None,
        }
    }
}

pub mod wl_display {
    use super::*;

    pub const REQ_SYNC: u16 = 0;
    pub const REQ_GET_REGISTRY: u16 = 1;
    pub const EVT_ERROR: u16 = 0;
    pub const EVT_DELETE_ID: u16 = 1;

    pub static INTERFACE: Interface = Interface {
        name: "wl_display",
        version: 1,
        requests: &[
            desc("sync", &[ArgKind::NewId], 1, false),
            desc("get_registry", &[ArgKind::NewId], 1, false),
        ],
        events: &[
            desc("error", &[ArgKind::Object, ArgKind::Uint, ArgKind::Str], 1, false),
            desc("delete_id", &[ArgKind::Uint], 1, false),
        ],
    };

    #[derive(Debug)]
    pub enum Event {
        Error { object: u32, code: u32, message: String },
        DeleteId { id: u32 },
    }

    impl Event {
        pub fn from_message(msg: Message) -> Option<Event> {
            let opcode = msg.opcode;
            let mut args = Args::new(msg);
            match opcode {
                EVT_ERROR => Some(Event::Error {
                    object: args.object()?,
                    code: args.uint()?,
                    message: args.string()?,
                }),
                EVT_DELETE_ID => Some(Event::DeleteId { id: args.uint()? }),
                _ => None,
            }
        }
    }

    pub fn sync(display: u32, callback: u32) -> Message {
        Message { sender: display, opcode: REQ_SYNC, args: smallvec![Arg::NewId(callback)] }
    }

    pub fn get_registry(display: u32, registry: u32) -> Message {
        Message { sender: display, opcode: REQ_GET_REGISTRY, args: smallvec![Arg::NewId(registry)] }
    }
}

pub mod wl_callback {
    use super::*;

    pub const EVT_DONE: u16 = 0;

    pub static INTERFACE: Interface = Interface {
        name: "wl_callback",
        version: 1,
        requests: &[],
        events: &[desc("done", &[ArgKind::Uint], 1, false)],
    };

    #[derive(Debug)]
    pub enum Event {
        Done { data: u32 },
    }

    impl Event {
        pub fn from_message(msg: Message) -> Option<Event> {
            let opcode = msg.opcode;
            let mut args = Args::new(msg);
            match opcode {
                EVT_DONE => Some(Event::Done { data: args.uint()? }),
                _ => None,
            }
        }
    }
}

pub mod wl_registry {
    use super::*;

    pub const REQ_BIND: u16 = 0;
    pub const EVT_GLOBAL: u16 = 0;
    pub const EVT_GLOBAL_REMOVE: u16 = 1;

    pub static INTERFACE: Interface = Interface {
        name: "wl_registry",
        version: 1,
        requests: &[desc(
            "bind",
            &[ArgKind::Uint, ArgKind::Str, ArgKind::Uint, ArgKind::NewId],
            1,
            false,
        )],
        events: &[
            desc("global", &[ArgKind::Uint, ArgKind::Str, ArgKind::Uint], 1, false),
            desc("global_remove", &[ArgKind::Uint], 1, false),
        ],
    };

    #[derive(Debug)]
    pub enum Event {
        Global { name: u32, interface: String, version: u32 },
        GlobalRemove { name: u32 },
    }

    impl Event {
        pub fn from_message(msg: Message) -> Option<Event> {
            let opcode = msg.opcode;
            let mut args = Args::new(msg);
            match opcode {
                EVT_GLOBAL => Some(Event::Global {
                    name: args.uint()?,
                    interface: args.string()?,
                    version: args.uint()?,
                }),
                EVT_GLOBAL_REMOVE => Some(Event::GlobalRemove { name: args.uint()? }),
                _ => None,
            }
        }
    }

    /// The new_id of `bind` is untyped on the wire, so the target
    /// interface name and version travel alongside it.
    pub fn bind(registry: u32, name: u32, interface: &'static Interface, version: u32, id: u32) -> Message {
        Message {
            sender: registry,
            opcode: REQ_BIND,
            args: smallvec![
                Arg::Uint(name),
                Arg::Str(c_string(interface.name)),
                Arg::Uint(version),
                Arg::NewId(id),
            ],
        }
    }
}

pub mod wl_compositor {
    use super::*;

    pub const REQ_CREATE_SURFACE: u16 = 0;
    pub const REQ_CREATE_REGION: u16 = 1;

    pub static INTERFACE: Interface = Interface {
        name: "wl_compositor",
        version: 4,
        requests: &[
            desc("create_surface", &[ArgKind::NewId], 1, false),
            desc("create_region", &[ArgKind::NewId], 1, false),
        ],
        events: &[],
    };

    pub fn create_surface(compositor: u32, id: u32) -> Message {
        Message { sender: compositor, opcode: REQ_CREATE_SURFACE, args: smallvec![Arg::NewId(id)] }
    }
}

pub mod wl_shm {
    use super::*;

    pub const REQ_CREATE_POOL: u16 = 0;
    pub const EVT_FORMAT: u16 = 0;

    pub static INTERFACE: Interface = Interface {
        name: "wl_shm",
        version: 1,
        requests: &[desc("create_pool", &[ArgKind::NewId, ArgKind::Fd, ArgKind::Int], 1, false)],
        events: &[desc("format", &[ArgKind::Uint], 1, false)],
    };

    /// Pixel formats this client submits. The compositor may advertise
    /// many more; unknown ones are kept as raw codes.
    #[repr(u32)]
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub enum ShmFormat {
        Argb8888 = 0,
        Xrgb8888 = 1,
    }

    impl ShmFormat {
        pub fn to_raw(self) -> u32 {
            self as u32
        }
    }

    #[derive(Debug)]
    pub enum Event {
        Format { format: u32 },
    }

    impl Event {
        pub fn from_message(msg: Message) -> Option<Event> {
            let opcode = msg.opcode;
            let mut args = Args::new(msg);
            match opcode {
                EVT_FORMAT => Some(Event::Format { format: args.uint()? }),
                _ => None,
            }
        }
    }

    pub fn create_pool(shm: u32, id: u32, fd: RawFd, size: i32) -> Message {
        Message {
            sender: shm,
            opcode: REQ_CREATE_POOL,
            args: smallvec![Arg::NewId(id), Arg::Fd(fd), Arg::Int(size)],
        }
    }
}

pub mod wl_shm_pool {
    use super::*;

    pub const REQ_CREATE_BUFFER: u16 = 0;
    pub const REQ_DESTROY: u16 = 1;
    pub const REQ_RESIZE: u16 = 2;

    pub static INTERFACE: Interface = Interface {
        name: "wl_shm_pool",
        version: 1,
        requests: &[
            desc(
                "create_buffer",
                &[
                    ArgKind::NewId,
                    ArgKind::Int,
                    ArgKind::Int,
                    ArgKind::Int,
                    ArgKind::Int,
                    ArgKind::Uint,
                ],
                1,
                false,
            ),
            desc("destroy", &[], 1, true),
            desc("resize", &[ArgKind::Int], 1, false),
        ],
        events: &[],
    };

    pub fn create_buffer(
        pool: u32,
        id: u32,
        offset: i32,
        width: i32,
        height: i32,
        stride: i32,
        format: u32,
    ) -> Message {
        Message {
            sender: pool,
            opcode: REQ_CREATE_BUFFER,
            args: smallvec![
                Arg::NewId(id),
                Arg::Int(offset),
                Arg::Int(width),
                Arg::Int(height),
                Arg::Int(stride),
                Arg::Uint(format),
            ],
        }
    }

    pub fn destroy(pool: u32) -> Message {
        Message { sender: pool, opcode: REQ_DESTROY, args: smallvec![] }
    }
}

pub mod wl_buffer {
    use super::*;

    pub const REQ_DESTROY: u16 = 0;
    pub const EVT_RELEASE: u16 = 0;

    pub static INTERFACE: Interface = Interface {
        name: "wl_buffer",
        version: 1,
        requests: &[desc("destroy", &[], 1, true)],
        events: &[desc("release", &[], 1, false)],
    };

    #[derive(Debug)]
    pub enum Event {
        Release,
    }

    impl Event {
        pub fn from_message(msg: Message) -> Option<Event> {
            match msg.opcode {
                EVT_RELEASE => Some(Event::Release),
                _ => None,
            }
        }
    }

    pub fn destroy(buffer: u32) -> Message {
        Message { sender: buffer, opcode: REQ_DESTROY, args: smallvec![] }
    }
}

pub mod wl_surface {
    use super::*;

    pub const REQ_DESTROY: u16 = 0;
    pub const REQ_ATTACH: u16 = 1;
    pub const REQ_DAMAGE: u16 = 2;
    pub const REQ_FRAME: u16 = 3;
    pub const REQ_COMMIT: u16 = 6;
    pub const EVT_ENTER: u16 = 0;
    pub const EVT_LEAVE: u16 = 1;

    pub static INTERFACE: Interface = Interface {
        name: "wl_surface",
        version: 4,
        requests: &[
            desc("destroy", &[], 1, true),
            desc("attach", &[ArgKind::Object, ArgKind::Int, ArgKind::Int], 1, false),
            desc("damage", &[ArgKind::Int, ArgKind::Int, ArgKind::Int, ArgKind::Int], 1, false),
            desc("frame", &[ArgKind::NewId], 1, false),
            desc("set_opaque_region", &[ArgKind::Object], 1, false),
            desc("set_input_region", &[ArgKind::Object], 1, false),
            desc("commit", &[], 1, false),
            desc("set_buffer_transform", &[ArgKind::Int], 2, false),
            desc("set_buffer_scale", &[ArgKind::Int], 3, false),
            desc(
                "damage_buffer",
                &[ArgKind::Int, ArgKind::Int, ArgKind::Int, ArgKind::Int],
                4,
                false,
            ),
        ],
        events: &[
            desc("enter", &[ArgKind::Object], 1, false),
            desc("leave", &[ArgKind::Object], 1, false),
        ],
    };

    #[derive(Debug)]
    pub enum Event {
        Enter { output: u32 },
        Leave { output: u32 },
    }

    impl Event {
        pub fn from_message(msg: Message) -> Option<Event> {
            let opcode = msg.opcode;
            let mut args = Args::new(msg);
            match opcode {
                EVT_ENTER => Some(Event::Enter { output: args.object()? }),
                EVT_LEAVE => Some(Event::Leave { output: args.object()? }),
                _ => None,
            }
        }
    }

    /// Attach `buffer` (0 detaches) to be presented at the next commit.
    pub fn attach(surface: u32, buffer: u32, x: i32, y: i32) -> Message {
        Message {
            sender: surface,
            opcode: REQ_ATTACH,
            args: smallvec![Arg::Object(buffer), Arg::Int(x), Arg::Int(y)],
        }
    }

    pub fn damage(surface: u32, x: i32, y: i32, width: i32, height: i32) -> Message {
        Message {
            sender: surface,
            opcode: REQ_DAMAGE,
            args: smallvec![Arg::Int(x), Arg::Int(y), Arg::Int(width), Arg::Int(height)],
        }
    }

    pub fn commit(surface: u32) -> Message {
        Message { sender: surface, opcode: REQ_COMMIT, args: smallvec![] }
    }

    pub fn destroy(surface: u32) -> Message {
        Message { sender: surface, opcode: REQ_DESTROY, args: smallvec![] }
    }
}

pub mod wl_seat {
    use super::*;

    pub const REQ_GET_POINTER: u16 = 0;
    pub const REQ_RELEASE: u16 = 3;
    pub const EVT_CAPABILITIES: u16 = 0;
    pub const EVT_NAME: u16 = 1;

    pub static INTERFACE: Interface = Interface {
        name: "wl_seat",
        version: 5,
        requests: &[
            desc("get_pointer", &[ArgKind::NewId], 1, false),
            desc("get_keyboard", &[ArgKind::NewId], 1, false),
            desc("get_touch", &[ArgKind::NewId], 1, false),
            desc("release", &[], 5, true),
        ],
        events: &[
            desc("capabilities", &[ArgKind::Uint], 1, false),
            desc("name", &[ArgKind::Str], 2, false),
        ],
    };

    bitflags::bitflags! {
        /// Input device classes a seat exposes.
        pub struct Capability: u32 {
            const POINTER = 1;
            const KEYBOARD = 2;
            const TOUCH = 4;
        }
    }

    #[derive(Debug)]
    pub enum Event {
        Capabilities { capabilities: Capability },
        Name { name: String },
    }

    impl Event {
        pub fn from_message(msg: Message) -> Option<Event> {
            let opcode = msg.opcode;
            let mut args = Args::new(msg);
            match opcode {
                EVT_CAPABILITIES => Some(Event::Capabilities {
                    capabilities: Capability::from_bits_truncate(args.uint()?),
                }),
                EVT_NAME => Some(Event::Name { name: args.string()? }),
                _ => None,
            }
        }
    }

    pub fn get_pointer(seat: u32, id: u32) -> Message {
        Message { sender: seat, opcode: REQ_GET_POINTER, args: smallvec![Arg::NewId(id)] }
    }
}

pub mod wl_pointer {
    use super::*;

    pub const REQ_SET_CURSOR: u16 = 0;
    pub const REQ_RELEASE: u16 = 1;
    pub const EVT_ENTER: u16 = 0;
    pub const EVT_LEAVE: u16 = 1;
    pub const EVT_MOTION: u16 = 2;
    pub const EVT_BUTTON: u16 = 3;
    pub const EVT_AXIS: u16 = 4;
    pub const EVT_FRAME: u16 = 5;

    pub static INTERFACE: Interface = Interface {
        name: "wl_pointer",
        version: 5,
        requests: &[
            desc(
                "set_cursor",
                &[ArgKind::Uint, ArgKind::Object, ArgKind::Int, ArgKind::Int],
                1,
                false,
            ),
            desc("release", &[], 3, true),
        ],
        events: &[
            desc("enter", &[ArgKind::Uint, ArgKind::Object, ArgKind::Fixed, ArgKind::Fixed], 1, false),
            desc("leave", &[ArgKind::Uint, ArgKind::Object], 1, false),
            desc("motion", &[ArgKind::Uint, ArgKind::Fixed, ArgKind::Fixed], 1, false),
            desc("button", &[ArgKind::Uint, ArgKind::Uint, ArgKind::Uint, ArgKind::Uint], 1, false),
            desc("axis", &[ArgKind::Uint, ArgKind::Uint, ArgKind::Fixed], 1, false),
            desc("frame", &[], 5, false),
            desc("axis_source", &[ArgKind::Uint], 5, false),
            desc("axis_stop", &[ArgKind::Uint, ArgKind::Uint], 5, false),
            desc("axis_discrete", &[ArgKind::Uint, ArgKind::Int], 5, false),
        ],
    };

    /// Binary state of a pointer button.
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub enum ButtonState {
        Released,
        Pressed,
    }

    impl ButtonState {
        pub fn from_raw(raw: u32) -> Option<ButtonState> {
            match raw {
                0 => Some(ButtonState::Released),
                1 => Some(ButtonState::Pressed),
                _ => None,
            }
        }
    }

    #[derive(Debug)]
    pub enum Event {
        Enter { serial: u32, surface: u32, x: f64, y: f64 },
        Leave { serial: u32, surface: u32 },
        Motion { time: u32, x: f64, y: f64 },
        Button { serial: u32, time: u32, button: u32, state: ButtonState },
        Axis { time: u32, axis: u32, value: f64 },
        Frame,
        AxisSource { source: u32 },
        AxisStop { time: u32, axis: u32 },
        AxisDiscrete { axis: u32, discrete: i32 },
    }

    impl Event {
        pub fn from_message(msg: Message) -> Option<Event> {
            let opcode = msg.opcode;
            let mut args = Args::new(msg);
            match opcode {
                EVT_ENTER => Some(Event::Enter {
                    serial: args.uint()?,
                    surface: args.object()?,
                    x: args.fixed()?,
                    y: args.fixed()?,
                }),
                EVT_LEAVE => Some(Event::Leave { serial: args.uint()?, surface: args.object()? }),
                EVT_MOTION => Some(Event::Motion {
                    time: args.uint()?,
                    x: args.fixed()?,
                    y: args.fixed()?,
                }),
                EVT_BUTTON => Some(Event::Button {
                    serial: args.uint()?,
                    time: args.uint()?,
                    button: args.uint()?,
                    state: ButtonState::from_raw(args.uint()?)?,
                }),
                EVT_AXIS => Some(Event::Axis {
                    time: args.uint()?,
                    axis: args.uint()?,
                    value: args.fixed()?,
                }),
                EVT_FRAME => Some(Event::Frame),
                6 => Some(Event::AxisSource { source: args.uint()? }),
                7 => Some(Event::AxisStop { time: args.uint()?, axis: args.uint()? }),
                8 => Some(Event::AxisDiscrete { axis: args.uint()?, discrete: args.int()? }),
                _ => None,
            }
        }
    }

    pub fn release(pointer: u32) -> Message {
        Message { sender: pointer, opcode: REQ_RELEASE, args: smallvec![] }
    }
}

pub mod xdg_wm_base {
    use super::*;

    pub const REQ_DESTROY: u16 = 0;
    pub const REQ_GET_XDG_SURFACE: u16 = 2;
    pub const REQ_PONG: u16 = 3;
    pub const EVT_PING: u16 = 0;

    pub static INTERFACE: Interface = Interface {
        name: "xdg_wm_base",
        version: 1,
        requests: &[
            desc("destroy", &[], 1, true),
            desc("create_positioner", &[ArgKind::NewId], 1, false),
            desc("get_xdg_surface", &[ArgKind::NewId, ArgKind::Object], 1, false),
            desc("pong", &[ArgKind::Uint], 1, false),
        ],
        events: &[desc("ping", &[ArgKind::Uint], 1, false)],
    };

    #[derive(Debug)]
    pub enum Event {
        Ping { serial: u32 },
    }

    impl Event {
        pub fn from_message(msg: Message) -> Option<Event> {
            let opcode = msg.opcode;
            let mut args = Args::new(msg);
            match opcode {
                EVT_PING => Some(Event::Ping { serial: args.uint()? }),
                _ => None,
            }
        }
    }

    pub fn get_xdg_surface(wm_base: u32, id: u32, surface: u32) -> Message {
        Message {
            sender: wm_base,
            opcode: REQ_GET_XDG_SURFACE,
            args: smallvec![Arg::NewId(id), Arg::Object(surface)],
        }
    }

    pub fn pong(wm_base: u32, serial: u32) -> Message {
        Message { sender: wm_base, opcode: REQ_PONG, args: smallvec![Arg::Uint(serial)] }
    }
}

pub mod xdg_surface {
    use super::*;

    pub const REQ_DESTROY: u16 = 0;
    pub const REQ_GET_TOPLEVEL: u16 = 1;
    pub const REQ_ACK_CONFIGURE: u16 = 4;
    pub const EVT_CONFIGURE: u16 = 0;

    pub static INTERFACE: Interface = Interface {
        name: "xdg_surface",
        version: 1,
        requests: &[
            desc("destroy", &[], 1, true),
            desc("get_toplevel", &[ArgKind::NewId], 1, false),
            desc("get_popup", &[ArgKind::NewId, ArgKind::Object, ArgKind::Object], 1, false),
            desc(
                "set_window_geometry",
                &[ArgKind::Int, ArgKind::Int, ArgKind::Int, ArgKind::Int],
                1,
                false,
            ),
            desc("ack_configure", &[ArgKind::Uint], 1, false),
        ],
        events: &[desc("configure", &[ArgKind::Uint], 1, false)],
    };

    #[derive(Debug)]
    pub enum Event {
        Configure { serial: u32 },
    }

    impl Event {
        pub fn from_message(msg: Message) -> Option<Event> {
            let opcode = msg.opcode;
            let mut args = Args::new(msg);
            match opcode {
                EVT_CONFIGURE => Some(Event::Configure { serial: args.uint()? }),
                _ => None,
            }
        }
    }

    pub fn get_toplevel(xdg_surface: u32, id: u32) -> Message {
        Message { sender: xdg_surface, opcode: REQ_GET_TOPLEVEL, args: smallvec![Arg::NewId(id)] }
    }

    pub fn ack_configure(xdg_surface: u32, serial: u32) -> Message {
        Message { sender: xdg_surface, opcode: REQ_ACK_CONFIGURE, args: smallvec![Arg::Uint(serial)] }
    }
}

pub mod xdg_toplevel {
    use super::*;

    pub const REQ_DESTROY: u16 = 0;
    pub const REQ_SET_TITLE: u16 = 2;
    pub const REQ_SET_APP_ID: u16 = 3;
    pub const EVT_CONFIGURE: u16 = 0;
    pub const EVT_CLOSE: u16 = 1;

    pub static INTERFACE: Interface = Interface {
        name: "xdg_toplevel",
        version: 1,
        requests: &[
            desc("destroy", &[], 1, true),
            desc("set_parent", &[ArgKind::Object], 1, false),
            desc("set_title", &[ArgKind::Str], 1, false),
            desc("set_app_id", &[ArgKind::Str], 1, false),
            desc(
                "show_window_menu",
                &[ArgKind::Object, ArgKind::Uint, ArgKind::Int, ArgKind::Int],
                1,
                false,
            ),
            desc("move", &[ArgKind::Object, ArgKind::Uint], 1, false),
            desc("resize", &[ArgKind::Object, ArgKind::Uint, ArgKind::Uint], 1, false),
            desc("set_max_size", &[ArgKind::Int, ArgKind::Int], 1, false),
            desc("set_min_size", &[ArgKind::Int, ArgKind::Int], 1, false),
            desc("set_maximized", &[], 1, false),
            desc("unset_maximized", &[], 1, false),
            desc("set_fullscreen", &[ArgKind::Object], 1, false),
            desc("unset_fullscreen", &[], 1, false),
            desc("set_minimized", &[], 1, false),
        ],
        events: &[
            desc("configure", &[ArgKind::Int, ArgKind::Int, ArgKind::Array], 1, false),
            desc("close", &[], 1, false),
        ],
    };

    #[derive(Debug)]
    pub enum Event {
        /// The size the compositor wants the window at; zero means the
        /// client decides. The states array is an opaque list of
        /// activation/maximization flags this client does not act on.
        Configure { width: i32, height: i32, states: Vec<u8> },
        Close,
    }

    impl Event {
        pub fn from_message(msg: Message) -> Option<Event> {
            let opcode = msg.opcode;
            let mut args = Args::new(msg);
            match opcode {
                EVT_CONFIGURE => Some(Event::Configure {
                    width: args.int()?,
                    height: args.int()?,
                    states: args.array()?,
                }),
                EVT_CLOSE => Some(Event::Close),
                _ => None,
            }
        }
    }

    pub fn set_title(toplevel: u32, title: &str) -> Message {
        Message {
            sender: toplevel,
            opcode: REQ_SET_TITLE,
            args: smallvec![Arg::Str(c_string(title))],
        }
    }

    pub fn set_app_id(toplevel: u32, app_id: &str) -> Message {
        Message {
            sender: toplevel,
            opcode: REQ_SET_APP_ID,
            args: smallvec![Arg::Str(c_string(app_id))],
        }
    }

    pub fn destroy(toplevel: u32) -> Message {
        Message { sender: toplevel, opcode: REQ_DESTROY, args: smallvec![] }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tables_are_in_opcode_order() {
        // the decoder indexes event tables by opcode, so a misordered
        // table would silently misparse
        assert_eq!(wl_pointer::INTERFACE.events[wl_pointer::EVT_FRAME as usize].name, "frame");
        assert_eq!(wl_seat::INTERFACE.events[wl_seat::EVT_NAME as usize].name, "name");
        assert_eq!(
            xdg_toplevel::INTERFACE.events[xdg_toplevel::EVT_CLOSE as usize].name,
            "close"
        );
        assert_eq!(
            xdg_wm_base::INTERFACE.requests[xdg_wm_base::REQ_PONG as usize].name,
            "pong"
        );
        assert_eq!(
            wl_surface::INTERFACE.requests[wl_surface::REQ_COMMIT as usize].name,
            "commit"
        );
    }

    #[test]
    fn registry_bind_carries_the_interface_inline() {
        let msg = wl_registry::bind(2, 14, &wl_seat::INTERFACE, 5, 3);
        assert_eq!(msg.opcode, wl_registry::REQ_BIND);
        match &msg.args[1] {
            Arg::Str(s) => assert_eq!(s.to_bytes(), b"wl_seat"),
            other => panic!("expected interface name, got {:?}", other),
        }
        assert_eq!(msg.args[3], Arg::NewId(3));
    }

    #[test]
    fn pointer_events_decode() {
        let raw = Message {
            sender: 9,
            opcode: wl_pointer::EVT_BUTTON,
            args: smallvec![Arg::Uint(77), Arg::Uint(123456), Arg::Uint(0x110), Arg::Uint(1)],
        };
        match wl_pointer::Event::from_message(raw) {
            Some(wl_pointer::Event::Button { serial: 77, button: 0x110, state, .. }) => {
                assert_eq!(state, wl_pointer::ButtonState::Pressed)
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn mismatched_arguments_fail_to_decode() {
        let raw = Message {
            sender: 4,
            opcode: wl_seat::EVT_CAPABILITIES,
            args: smallvec![Arg::Int(3)],
        };
        assert!(wl_seat::Event::from_message(raw).is_none());
    }
}
