//! The client session: bootstrap, event dispatch, window lifecycle.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::os::unix::io::RawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;

use log::{debug, error, trace};

use crate::connection::Connection;
use crate::globals::{GlobalEntry, GlobalTable};
use crate::input::{PointerEvent, PointerState};
use crate::map::{Role, DISPLAY_ID};
use crate::protocol::{
    wl_buffer, wl_callback, wl_compositor, wl_display, wl_pointer, wl_registry, wl_seat, wl_shm,
    wl_shm_pool, wl_surface, xdg_surface, xdg_toplevel, xdg_wm_base, Interface,
};
use crate::shm::{self, Buffer, PoolError, ShmMapping, ShmPool};
use crate::wire::Message;
use crate::{ConnectError, ProtocolError, SessionError};

/// Startup parameters for the window this session creates.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub title: String,
    pub app_id: Option<String>,
}

impl SessionConfig {
    pub fn new(title: impl Into<String>) -> SessionConfig {
        SessionConfig { title: title.into(), app_id: None }
    }

    pub fn app_id(mut self, app_id: impl Into<String>) -> SessionConfig {
        self.app_id = Some(app_id.into());
        self
    }
}

/// The collaborators a session reports into. Handlers run inside
/// dispatch and must not block or re-enter the session.
pub trait SessionHandler {
    /// The compositor asked for a new window size (zero means the
    /// client decides); answer by eventually submitting a matching
    /// buffer.
    fn configure(&mut self, _width: i32, _height: i32) {}

    /// The user asked the window to close.
    fn close_requested(&mut self) {}

    /// One atomic batch of pointer transitions, delimited by the
    /// compositor's frame markers.
    fn pointer_batch(&mut self, _events: &[PointerEvent]) {}
}

impl SessionHandler for () {}

/// Capabilities a caller may probe before relying on them.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Feature {
    Mouse,
    Hidpi,
    Touchscreen,
    Clipboard,
    MouseWarp,
    VirtualKeyboard,
    CursorShape,
    Subwindows,
    WindowTransparency,
    NativeIcon,
    ScreenCapture,
}

const REQUIRED_GLOBALS: [&Interface; 3] =
    [&wl_compositor::INTERFACE, &xdg_wm_base::INTERFACE, &wl_seat::INTERFACE];

/// Ids of the bound capability proxies and the window object graph.
/// Only constructed once every member exists.
#[derive(Debug)]
struct WindowGraph {
    compositor: u32,
    wm_base: u32,
    seat: u32,
    shm: Option<u32>,
    surface: u32,
    xdg_surface: u32,
    toplevel: u32,
}

/// A live connection with a bound capability set and a single toplevel
/// window, ready for steady-state dispatch.
pub struct Session {
    conn: Connection,
    globals: GlobalTable,
    registry: u32,
    win: WindowGraph,
    seat_version: u32,
    pointer: Option<u32>,
    pointer_state: PointerState,
    sync_done: HashSet<u32>,
    shm_formats: Vec<u32>,
    configured: bool,
    pending_size: Option<(i32, i32)>,
    latest_size: Option<(i32, i32)>,
    buffers: HashMap<u32, Rc<Cell<bool>>>,
}

impl Session {
    /// Connect to the compositor named by the environment and build the
    /// session. The window is not visible yet: presentation starts with
    /// the first buffer submitted after the first configure.
    pub fn connect(config: SessionConfig) -> Result<Session, ConnectError> {
        let conn = Connection::connect_to_env()?;
        Session::bootstrap(conn, config)
    }

    /// Build a session on an already connected socket.
    pub fn connect_on(stream: UnixStream, config: SessionConfig) -> Result<Session, ConnectError> {
        Session::bootstrap(Connection::from_stream(stream), config)
    }

    fn bootstrap(mut conn: Connection, config: SessionConfig) -> Result<Session, ConnectError> {
        // registry first; from here on any failure tears the whole
        // connection down rather than unwinding object by object
        let registry = conn.create_object(&wl_registry::INTERFACE, 1, Role::Registry);
        conn.send_request(wl_display::get_registry(DISPLAY_ID, registry))?;

        // discovery is only guaranteed complete once this roundtrip
        // finishes; globals announced later are not considered
        let mut globals = GlobalTable::new();
        bootstrap_roundtrip(&mut conn, &mut globals)?;

        for interface in REQUIRED_GLOBALS.iter() {
            if globals.get(interface.name).is_none() {
                return Err(ConnectError::MissingCapability(interface.name));
            }
        }

        let (compositor, compositor_version) = bind_global(
            &mut conn,
            registry,
            &globals,
            &wl_compositor::INTERFACE,
            Role::Compositor,
        )?;
        let (wm_base, wm_base_version) =
            bind_global(&mut conn, registry, &globals, &xdg_wm_base::INTERFACE, Role::WmBase)?;
        let (seat, seat_version) =
            bind_global(&mut conn, registry, &globals, &wl_seat::INTERFACE, Role::Seat)?;
        let shm = if globals.get(wl_shm::INTERFACE.name).is_some() {
            Some(bind_global(&mut conn, registry, &globals, &wl_shm::INTERFACE, Role::Shm)?.0)
        } else {
            None
        };

        let surface = conn.create_object(&wl_surface::INTERFACE, compositor_version, Role::Surface);
        conn.send_request(wl_compositor::create_surface(compositor, surface))?;
        let xdg_surf = conn.create_object(&xdg_surface::INTERFACE, wm_base_version, Role::XdgSurface);
        conn.send_request(xdg_wm_base::get_xdg_surface(wm_base, xdg_surf, surface))?;
        let toplevel = conn.create_object(&xdg_toplevel::INTERFACE, wm_base_version, Role::Toplevel);
        conn.send_request(xdg_surface::get_toplevel(xdg_surf, toplevel))?;

        conn.send_request(xdg_toplevel::set_title(toplevel, &config.title))?;
        if let Some(app_id) = &config.app_id {
            conn.send_request(xdg_toplevel::set_app_id(toplevel, app_id))?;
        }
        // the initial commit maps the window role; the compositor
        // answers with the first configure sequence
        conn.send_request(wl_surface::commit(surface))?;
        conn.flush()?;

        debug!("session ready, toplevel@{} \"{}\"", toplevel, config.title);
        Ok(Session {
            conn,
            globals,
            registry,
            win: WindowGraph { compositor, wm_base, seat, shm, surface, xdg_surface: xdg_surf, toplevel },
            seat_version,
            pointer: None,
            pointer_state: PointerState::new(),
            sync_done: HashSet::new(),
            shm_formats: Vec::new(),
            configured: false,
            pending_size: None,
            latest_size: None,
            buffers: HashMap::new(),
        })
    }

    /// Process queued events, blocking until at least one has been
    /// handled. A severed connection returns `ConnectionLost`
    /// immediately, never a hang.
    pub fn dispatch(&mut self, handler: &mut dyn SessionHandler) -> Result<usize, SessionError> {
        self.conn.flush()?;
        loop {
            self.conn.read_events()?;
            let handled = self.process_pending(handler)?;
            if handled > 0 {
                self.conn.flush()?;
                return Ok(handled);
            }
            self.conn.wait_readable()?;
        }
    }

    /// Process whatever is already available without blocking.
    pub fn dispatch_pending(&mut self, handler: &mut dyn SessionHandler) -> Result<usize, SessionError> {
        self.conn.flush()?;
        self.conn.read_events()?;
        let handled = self.process_pending(handler)?;
        if handled > 0 {
            self.conn.flush()?;
        }
        Ok(handled)
    }

    /// Block until the compositor has processed every request sent so
    /// far, dispatching everything that arrives meanwhile.
    pub fn roundtrip(&mut self, handler: &mut dyn SessionHandler) -> Result<usize, SessionError> {
        let callback = self.conn.create_object(&wl_callback::INTERFACE, 1, Role::SyncCallback);
        self.conn.send_request(wl_display::sync(DISPLAY_ID, callback))?;
        self.conn.flush()?;
        let mut total = 0;
        while !self.sync_done.remove(&callback) {
            total += self.dispatch(handler)?;
        }
        Ok(total)
    }

    fn process_pending(&mut self, handler: &mut dyn SessionHandler) -> Result<usize, SessionError> {
        let mut count = 0;
        while let Some(msg) = self.conn.take_event() {
            self.handle_event(msg, handler)?;
            count += 1;
        }
        Ok(count)
    }

    /// The single mapping from (object role, event) to handling.
    fn handle_event(&mut self, msg: Message, handler: &mut dyn SessionHandler) -> Result<(), SessionError> {
        let sender = msg.sender;
        let slot = match self.conn.map.find(sender) {
            Some(slot) => *slot,
            None => return Err(self.conn.record_error(malformed(sender))),
        };
        if let Some(desc) = slot.interface.events.get(msg.opcode as usize) {
            trace!("<- {}@{}.{}", slot.interface.name, sender, desc.name);
        }
        match slot.role {
            Role::Display => handle_display_event(&mut self.conn, msg),

            Role::SyncCallback => match wl_callback::Event::from_message(msg) {
                Some(wl_callback::Event::Done { .. }) => {
                    self.sync_done.insert(sender);
                    self.conn.map.mark_dead(sender);
                    Ok(())
                }
                None => Err(self.conn.record_error(malformed(sender))),
            },

            Role::Registry => match wl_registry::Event::from_message(msg) {
                Some(wl_registry::Event::Global { name, interface, version }) => {
                    self.globals.announce(name, interface, version);
                    Ok(())
                }
                Some(wl_registry::Event::GlobalRemove { name }) => {
                    let bound = self
                        .globals
                        .entries()
                        .iter()
                        .find(|e| e.name == name)
                        .map(|e| self.is_bound(&e.interface))
                        .unwrap_or(false);
                    self.globals.withdraw(name, bound);
                    Ok(())
                }
                None => Err(self.conn.record_error(malformed(sender))),
            },

            Role::WmBase => match xdg_wm_base::Event::from_message(msg) {
                Some(xdg_wm_base::Event::Ping { serial }) => {
                    // answered before dispatch returns; a late pong can
                    // get the client disconnected
                    self.conn.send_request(xdg_wm_base::pong(self.win.wm_base, serial))
                }
                None => Err(self.conn.record_error(malformed(sender))),
            },

            Role::XdgSurface => match xdg_surface::Event::from_message(msg) {
                Some(xdg_surface::Event::Configure { serial }) => {
                    self.conn.send_request(xdg_surface::ack_configure(self.win.xdg_surface, serial))?;
                    self.configured = true;
                    let (width, height) = self.pending_size.take().unwrap_or((0, 0));
                    self.latest_size = Some((width, height));
                    handler.configure(width, height);
                    Ok(())
                }
                None => Err(self.conn.record_error(malformed(sender))),
            },

            Role::Toplevel => match xdg_toplevel::Event::from_message(msg) {
                Some(xdg_toplevel::Event::Configure { width, height, .. }) => {
                    // latched here, applied when the xdg_surface
                    // configure that ends the sequence arrives
                    self.pending_size = Some((width, height));
                    Ok(())
                }
                Some(xdg_toplevel::Event::Close) => {
                    handler.close_requested();
                    Ok(())
                }
                None => Err(self.conn.record_error(malformed(sender))),
            },

            Role::Seat => match wl_seat::Event::from_message(msg) {
                Some(wl_seat::Event::Capabilities { capabilities }) => {
                    self.seat_capabilities(capabilities)
                }
                Some(wl_seat::Event::Name { name }) => {
                    debug!("seat name: {}", name);
                    Ok(())
                }
                None => Err(self.conn.record_error(malformed(sender))),
            },

            Role::Pointer => match wl_pointer::Event::from_message(msg) {
                Some(event) => {
                    self.pointer_event(event, handler);
                    Ok(())
                }
                None => Err(self.conn.record_error(malformed(sender))),
            },

            Role::Surface => match wl_surface::Event::from_message(msg) {
                Some(wl_surface::Event::Enter { output }) => {
                    trace!("surface entered output {}", output);
                    Ok(())
                }
                Some(wl_surface::Event::Leave { output }) => {
                    trace!("surface left output {}", output);
                    Ok(())
                }
                None => Err(self.conn.record_error(malformed(sender))),
            },

            Role::Shm => match wl_shm::Event::from_message(msg) {
                Some(wl_shm::Event::Format { format }) => {
                    self.shm_formats.push(format);
                    Ok(())
                }
                None => Err(self.conn.record_error(malformed(sender))),
            },

            Role::Buffer => match wl_buffer::Event::from_message(msg) {
                Some(wl_buffer::Event::Release) => {
                    if let Some(busy) = self.buffers.get(&sender) {
                        busy.set(false);
                    }
                    Ok(())
                }
                None => Err(self.conn.record_error(malformed(sender))),
            },

            // these interfaces define no events at the versions we bind
            Role::Compositor | Role::ShmPool => Err(self.conn.record_error(malformed(sender))),
        }
    }

    fn pointer_event(&mut self, event: wl_pointer::Event, handler: &mut dyn SessionHandler) {
        use wl_pointer::Event;
        match event {
            Event::Enter { surface, x, y, .. } => self.pointer_state.enter(surface, x, y),
            Event::Leave { surface, .. } => self.pointer_state.leave(surface),
            Event::Motion { time, x, y } => self.pointer_state.motion(time, x, y),
            Event::Button { serial, time, button, state } => {
                self.pointer_state.button(serial, time, button, state)
            }
            Event::Frame => {
                if let Some(batch) = self.pointer_state.frame() {
                    handler.pointer_batch(&batch);
                }
            }
            // TODO: translate axis events into scroll batches
            Event::Axis { .. }
            | Event::AxisSource { .. }
            | Event::AxisStop { .. }
            | Event::AxisDiscrete { .. } => {}
        }
    }

    /// Pointer presence follows the capability bit: created on the 0→1
    /// transition only (repeat announcements are idempotent), released
    /// when the bit clears.
    fn seat_capabilities(&mut self, caps: wl_seat::Capability) -> Result<(), SessionError> {
        let has_pointer = caps.contains(wl_seat::Capability::POINTER);
        if has_pointer && self.pointer.is_none() {
            let version = self.seat_version.min(wl_pointer::INTERFACE.version);
            let id = self.conn.create_object(&wl_pointer::INTERFACE, version, Role::Pointer);
            self.conn.send_request(wl_seat::get_pointer(self.win.seat, id))?;
            debug!("pointer capability gained, wl_pointer@{}", id);
            self.pointer = Some(id);
        } else if !has_pointer {
            if let Some(id) = self.pointer.take() {
                debug!("pointer capability lost, releasing wl_pointer@{}", id);
                if self.seat_version >= 3 {
                    self.conn.send_request(wl_pointer::release(id))?;
                } else {
                    // no release request before v3; drop it locally
                    self.conn.map.mark_dead(id);
                }
                self.pointer_state.reset();
            }
        }
        Ok(())
    }

    fn is_bound(&self, interface: &str) -> bool {
        match interface {
            "wl_compositor" | "xdg_wm_base" | "wl_seat" => true,
            "wl_shm" => self.win.shm.is_some(),
            _ => false,
        }
    }

    /// Create a shared-memory pool of `len` bytes backed by a fresh
    /// anonymous region.
    pub fn create_pool(&mut self, len: usize) -> Result<ShmPool, PoolError> {
        let shm = self.win.shm.ok_or(PoolError::ShmUnavailable)?;
        let fd = shm::alloc_shm_region(len)?;
        let mapping = ShmMapping::new(fd, len)?;
        let id = self.conn.create_object(&wl_shm_pool::INTERFACE, 1, Role::ShmPool);
        self.conn.send_request(wl_shm::create_pool(shm, id, mapping.fd(), len as i32))?;
        Ok(ShmPool { id, mapping })
    }

    /// Carve a buffer out of `pool`.
    pub fn create_buffer(
        &mut self,
        pool: &ShmPool,
        offset: i32,
        width: i32,
        height: i32,
        stride: i32,
        format: wl_shm::ShmFormat,
    ) -> Result<Buffer, SessionError> {
        let id = self.conn.create_object(&wl_buffer::INTERFACE, 1, Role::Buffer);
        self.conn.send_request(wl_shm_pool::create_buffer(
            pool.id,
            id,
            offset,
            width,
            height,
            stride,
            format.to_raw(),
        ))?;
        let busy = Rc::new(Cell::new(false));
        self.buffers.insert(id, busy.clone());
        Ok(Buffer { id, offset, width, height, stride, busy })
    }

    /// Attach `buffer` to the window surface and commit it. The buffer
    /// is busy until the compositor releases it.
    pub fn submit(&mut self, buffer: &Buffer) -> Result<(), SessionError> {
        self.conn.send_request(wl_surface::attach(self.win.surface, buffer.id, 0, 0))?;
        self.conn
            .send_request(wl_surface::damage(self.win.surface, 0, 0, buffer.width, buffer.height))?;
        self.conn.send_request(wl_surface::commit(self.win.surface))?;
        buffer.busy.set(true);
        self.conn.flush()
    }

    /// Destroy a buffer object. The slot is reclaimed once the display
    /// confirms the destruction.
    pub fn destroy_buffer(&mut self, buffer: Buffer) -> Result<(), SessionError> {
        self.buffers.remove(&buffer.id);
        self.conn.send_request(wl_buffer::destroy(buffer.id))
    }

    /// Destroy a pool object; the local mapping (and region descriptor)
    /// goes away with `pool`.
    pub fn destroy_pool(&mut self, pool: ShmPool) -> Result<(), SessionError> {
        self.conn.send_request(wl_shm_pool::destroy(pool.id))
    }

    pub fn set_title(&mut self, title: &str) -> Result<(), SessionError> {
        self.conn.send_request(xdg_toplevel::set_title(self.win.toplevel, title))?;
        self.conn.flush()
    }

    /// Raw connection handle, for a rendering backend to adopt.
    pub fn connection_fd(&self) -> RawFd {
        self.conn.fd()
    }

    /// Protocol id of the window surface, the second half of the native
    /// handle pair.
    pub fn surface_handle(&self) -> u32 {
        self.win.surface
    }

    /// Protocol id of the bound compositor, for collaborators that
    /// create their own surfaces (cursors, subsurfaces).
    pub fn compositor_handle(&self) -> u32 {
        self.win.compositor
    }

    /// Whether the compositor has acknowledged the window with its
    /// first configure; content submitted before that is not shown.
    pub fn configured(&self) -> bool {
        self.configured
    }

    /// Size from the most recent configure, zero meaning free choice.
    pub fn latest_size(&self) -> Option<(i32, i32)> {
        self.latest_size
    }

    /// Globals currently advertised by the compositor.
    pub fn globals(&self) -> &[GlobalEntry] {
        self.globals.entries()
    }

    /// Bound interfaces whose global has since been withdrawn.
    pub fn defunct_globals(&self) -> &[String] {
        self.globals.defunct()
    }

    /// Pixel formats the compositor advertised for shared-memory
    /// buffers, raw protocol codes.
    pub fn shm_formats(&self) -> &[u32] {
        &self.shm_formats
    }

    /// Registry object id; useful only for diagnostics.
    pub fn registry_handle(&self) -> u32 {
        self.registry
    }

    /// What this windowing backend can do. Every feature maps
    /// explicitly so a new variant cannot fall through unanswered.
    pub fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::Mouse | Feature::Hidpi => true,
            Feature::Touchscreen
            | Feature::Clipboard
            | Feature::MouseWarp
            | Feature::VirtualKeyboard
            | Feature::CursorShape
            | Feature::Subwindows
            | Feature::WindowTransparency
            | Feature::NativeIcon
            | Feature::ScreenCapture => false,
        }
    }
}

fn malformed(object: u32) -> SessionError {
    SessionError::Protocol(ProtocolError {
        object,
        code: 0,
        message: "undecodable event".into(),
    })
}

fn handle_display_event(conn: &mut Connection, msg: Message) -> Result<(), SessionError> {
    let sender = msg.sender;
    match wl_display::Event::from_message(msg) {
        Some(wl_display::Event::Error { object, code, message }) => {
            error!("protocol error {} on object {}: {}", code, object, message);
            Err(conn.record_error(SessionError::Protocol(ProtocolError { object, code, message })))
        }
        Some(wl_display::Event::DeleteId { id }) => {
            conn.map.remove(id);
            Ok(())
        }
        None => Err(conn.record_error(malformed(sender))),
    }
}

/// The discovery roundtrip: everything announced before the sync
/// callback fires is the capability set the bootstrap judges.
fn bootstrap_roundtrip(conn: &mut Connection, globals: &mut GlobalTable) -> Result<(), ConnectError> {
    let callback = conn.create_object(&wl_callback::INTERFACE, 1, Role::SyncCallback);
    conn.send_request(wl_display::sync(DISPLAY_ID, callback))?;
    conn.flush()?;

    let mut done = false;
    while !done {
        if conn.read_events()? == 0 {
            conn.wait_readable()?;
            continue;
        }
        while let Some(msg) = conn.take_event() {
            let sender = msg.sender;
            let role = conn.map.find(sender).map(|slot| slot.role);
            match role {
                Some(Role::Display) => handle_display_event(conn, msg)?,
                Some(Role::SyncCallback) if sender == callback => {
                    match wl_callback::Event::from_message(msg) {
                        Some(wl_callback::Event::Done { .. }) => {
                            conn.map.mark_dead(callback);
                            done = true;
                        }
                        None => return Err(conn.record_error(malformed(sender)).into()),
                    }
                }
                Some(Role::Registry) => match wl_registry::Event::from_message(msg) {
                    Some(wl_registry::Event::Global { name, interface, version }) => {
                        globals.announce(name, interface, version)
                    }
                    Some(wl_registry::Event::GlobalRemove { name }) => {
                        globals.withdraw(name, false);
                    }
                    None => return Err(conn.record_error(malformed(sender)).into()),
                },
                _ => debug!("ignoring event for object {} during bootstrap", sender),
            }
        }
    }
    Ok(())
}

/// Bind an advertised global at the version this client supports,
/// clamped to what the compositor offers.
fn bind_global(
    conn: &mut Connection,
    registry: u32,
    globals: &GlobalTable,
    interface: &'static Interface,
    role: Role,
) -> Result<(u32, u32), ConnectError> {
    let (name, version) = globals
        .bind_version(interface.name, interface.version)
        .ok_or(ConnectError::MissingCapability(interface.name))?;
    let id = conn.create_object(interface, version, role);
    conn.send_request(wl_registry::bind(registry, name, interface, version, id))?;
    debug!("bound {} v{} (global name {})", interface.name, version, name);
    Ok((id, version))
}
