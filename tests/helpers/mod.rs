//! A scripted fake compositor for integration tests.
//!
//! Runs on its own thread over one end of a socketpair, decoding client
//! requests with the crate's own wire tables, recording everything it
//! sees, and playing back whatever events the test scripts.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags};

use wayline::protocol::{
    self, wl_callback, wl_display, wl_pointer, wl_registry, wl_seat, wl_surface, xdg_surface,
    xdg_toplevel, xdg_wm_base, Interface,
};
use wayline::socket::{BufferedSocket, Socket};
use wayline::wire::{Arg, Message};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A request the fake compositor saw, resolved to names.
#[derive(Debug)]
pub struct Recorded {
    pub interface: &'static str,
    pub object: u32,
    pub request: &'static str,
    pub args: Vec<Arg>,
}

pub struct Server {
    sock: BufferedSocket,
    objects: HashMap<u32, &'static Interface>,
    inbox: VecDeque<Message>,
    alive: bool,
    /// Every request received, in order.
    pub requests: Vec<Recorded>,
    /// Registry object the client asked for, once seen.
    pub registry: Option<u32>,
    /// Interface name → object id for every `wl_registry.bind`.
    pub binds: HashMap<String, u32>,
    /// The client's window surface, once created.
    pub surface: Option<u32>,
}

/// Pair a client stream with a server thread running `behavior`; the
/// finished `Server` (with its records) comes back through the handle.
pub fn spawn<F>(behavior: F) -> (UnixStream, thread::JoinHandle<Server>)
where
    F: FnOnce(&mut Server) + Send + 'static,
{
    let (client, server) = UnixStream::pair().expect("socketpair");
    let handle = thread::spawn(move || {
        let mut server = Server::new(server);
        behavior(&mut server);
        server
    });
    (client, handle)
}

/// The globals a fully featured fake advertises.
pub fn full_globals() -> Vec<(u32, &'static str, u32)> {
    vec![
        (1, "wl_compositor", 5),
        (2, "wl_shm", 1),
        (3, "wl_seat", 7),
        (4, "xdg_wm_base", 3),
        (5, "wl_output", 4),
    ]
}

pub fn evt(sender: u32, opcode: u16, args: Vec<Arg>) -> Message {
    Message { sender, opcode, args: args.into() }
}

pub fn arg_uint(args: &[Arg], index: usize) -> u32 {
    match args[index] {
        Arg::Uint(v) => v,
        ref other => panic!("argument {} is not a uint: {:?}", index, other),
    }
}

pub fn arg_int(args: &[Arg], index: usize) -> i32 {
    match args[index] {
        Arg::Int(v) => v,
        ref other => panic!("argument {} is not an int: {:?}", index, other),
    }
}

pub fn arg_new_id(args: &[Arg], index: usize) -> u32 {
    match args[index] {
        Arg::NewId(v) => v,
        ref other => panic!("argument {} is not a new_id: {:?}", index, other),
    }
}

pub fn arg_str(args: &[Arg], index: usize) -> String {
    match args[index] {
        Arg::Str(ref s) => s.to_string_lossy().into_owned(),
        ref other => panic!("argument {} is not a string: {:?}", index, other),
    }
}

impl Server {
    pub fn new(stream: UnixStream) -> Server {
        let mut objects = HashMap::new();
        objects.insert(1u32, &wl_display::INTERFACE);
        Server {
            sock: BufferedSocket::new(Socket::new(stream)),
            objects,
            inbox: VecDeque::new(),
            alive: true,
            requests: Vec::new(),
            registry: None,
            binds: HashMap::new(),
            surface: None,
        }
    }

    pub fn interface_of(&self, id: u32) -> &'static str {
        self.objects.get(&id).map(|i| i.name).unwrap_or("<unknown>")
    }

    pub fn bound(&self, interface: &str) -> u32 {
        match self.binds.get(interface) {
            Some(id) => *id,
            None => panic!("client never bound {}", interface),
        }
    }

    fn wait_readable(&self, deadline: Instant) {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                panic!("timed out waiting for the client");
            }
            let mut fds = [PollFd::new(self.sock.as_raw_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, remaining.as_millis() as i32) {
                Ok(0) => panic!("timed out waiting for the client"),
                Ok(_) => return,
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => panic!("poll failed: {}", e),
            }
        }
    }

    /// Drain the socket into the inbox; false once the client hung up.
    fn pump(&mut self) -> bool {
        match self.sock.fill_incoming() {
            Ok(0) => return false,
            Ok(_) => {}
            Err(nix::errno::Errno::EAGAIN) => {}
            Err(e) => panic!("server socket error: {}", e),
        }
        loop {
            let decoded = {
                let Server { sock, objects, .. } = self;
                sock.next_message(|id, opcode| {
                    objects
                        .get(&id)
                        .and_then(|iface| iface.requests.get(opcode as usize))
                        .map(|desc| desc.signature)
                })
                .expect("client sent a malformed request")
            };
            match decoded {
                Some(msg) => self.ingest(msg),
                None => break,
            }
        }
        true
    }

    fn ingest(&mut self, msg: Message) {
        let iface = self.objects[&msg.sender];
        let desc = &iface.requests[msg.opcode as usize];
        self.register_children(iface, &msg);
        self.requests.push(Recorded {
            interface: iface.name,
            object: msg.sender,
            request: desc.name,
            args: msg.args.to_vec(),
        });
        self.inbox.push_back(msg);
    }

    /// Track objects the client creates so later requests on them can
    /// be decoded.
    fn register_children(&mut self, parent: &'static Interface, msg: &Message) {
        match (parent.name, msg.opcode) {
            ("wl_display", wl_display::REQ_SYNC) => {
                self.objects.insert(arg_new_id(&msg.args, 0), &wl_callback::INTERFACE);
            }
            ("wl_display", wl_display::REQ_GET_REGISTRY) => {
                let id = arg_new_id(&msg.args, 0);
                self.registry = Some(id);
                self.objects.insert(id, &wl_registry::INTERFACE);
            }
            ("wl_registry", wl_registry::REQ_BIND) => {
                let name = arg_str(&msg.args, 1);
                let id = arg_new_id(&msg.args, 3);
                let iface = protocol::interface_by_name(&name)
                    .unwrap_or_else(|| panic!("client bound unknown interface {}", name));
                self.binds.insert(name, id);
                self.objects.insert(id, iface);
            }
            ("wl_compositor", 0) => {
                let id = arg_new_id(&msg.args, 0);
                self.surface = Some(id);
                self.objects.insert(id, &wl_surface::INTERFACE);
            }
            ("wl_shm", 0) => {
                self.objects.insert(arg_new_id(&msg.args, 0), &protocol::wl_shm_pool::INTERFACE);
            }
            ("wl_shm_pool", 0) => {
                self.objects.insert(arg_new_id(&msg.args, 0), &protocol::wl_buffer::INTERFACE);
            }
            ("wl_seat", wl_seat::REQ_GET_POINTER) => {
                self.objects.insert(arg_new_id(&msg.args, 0), &wl_pointer::INTERFACE);
            }
            ("xdg_wm_base", xdg_wm_base::REQ_GET_XDG_SURFACE) => {
                self.objects.insert(arg_new_id(&msg.args, 0), &xdg_surface::INTERFACE);
            }
            ("xdg_surface", xdg_surface::REQ_GET_TOPLEVEL) => {
                self.objects.insert(arg_new_id(&msg.args, 0), &xdg_toplevel::INTERFACE);
            }
            _ => {}
        }
    }

    /// Next request, blocking up to the timeout. Panics if the client
    /// disconnects first.
    pub fn next_request(&mut self) -> Message {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            if let Some(msg) = self.inbox.pop_front() {
                return msg;
            }
            if !self.alive {
                panic!("client hung up while a request was expected");
            }
            self.wait_readable(deadline);
            if !self.pump() {
                self.alive = false;
            }
        }
    }

    /// Skip (but record) requests until one matches.
    pub fn expect_request(&mut self, interface: &str, opcode: u16) -> Message {
        loop {
            let msg = self.next_request();
            if self.interface_of(msg.sender) == interface && msg.opcode == opcode {
                return msg;
            }
        }
    }

    /// Record requests until the client closes its end.
    pub fn run_to_eof(&mut self) {
        let deadline = Instant::now() + TIMEOUT;
        while self.alive {
            self.wait_readable(deadline);
            if !self.pump() {
                self.alive = false;
            }
        }
    }

    pub fn send_event(&mut self, msg: Message) {
        self.sock.write_message(&msg).expect("server write failed");
        self.sock.flush().expect("server flush failed");
    }

    pub fn send_global(&mut self, name: u32, interface: &str, version: u32) {
        let registry = self.registry.expect("client has no registry yet");
        let msg = evt(
            registry,
            wl_registry::EVT_GLOBAL,
            vec![
                Arg::Uint(name),
                Arg::Str(std::ffi::CString::new(interface).expect("interface name")),
                Arg::Uint(version),
            ],
        );
        self.send_event(msg);
    }

    pub fn send_global_remove(&mut self, name: u32) {
        let registry = self.registry.expect("client has no registry yet");
        self.send_event(evt(registry, wl_registry::EVT_GLOBAL_REMOVE, vec![Arg::Uint(name)]));
    }

    /// Complete a sync: callback done plus the id reclaim notice, sent
    /// as one batch so the client drains both together.
    pub fn send_done(&mut self, callback: u32) {
        self.sock
            .write_message(&evt(callback, wl_callback::EVT_DONE, vec![Arg::Uint(0)]))
            .expect("server write failed");
        self.sock
            .write_message(&evt(1, wl_display::EVT_DELETE_ID, vec![Arg::Uint(callback)]))
            .expect("server write failed");
        self.sock.flush().expect("server flush failed");
    }

    pub fn send_ping(&mut self, serial: u32) {
        let wm_base = self.bound("xdg_wm_base");
        self.send_event(evt(wm_base, xdg_wm_base::EVT_PING, vec![Arg::Uint(serial)]));
    }

    pub fn send_toplevel_configure(&mut self, width: i32, height: i32) {
        let toplevel = self.client_object("xdg_toplevel");
        self.send_event(evt(
            toplevel,
            xdg_toplevel::EVT_CONFIGURE,
            vec![Arg::Int(width), Arg::Int(height), Arg::Array(Vec::new())],
        ));
    }

    pub fn send_xdg_surface_configure(&mut self, serial: u32) {
        let xdg_surf = self.client_object("xdg_surface");
        self.send_event(evt(xdg_surf, xdg_surface::EVT_CONFIGURE, vec![Arg::Uint(serial)]));
    }

    pub fn send_toplevel_close(&mut self) {
        let toplevel = self.client_object("xdg_toplevel");
        self.send_event(evt(toplevel, xdg_toplevel::EVT_CLOSE, Vec::new()));
    }

    pub fn send_seat_capabilities(&mut self, caps: u32) {
        let seat = self.bound("wl_seat");
        self.send_event(evt(seat, wl_seat::EVT_CAPABILITIES, vec![Arg::Uint(caps)]));
    }

    /// Id of the first client-created object of `interface`.
    pub fn client_object(&self, interface: &str) -> u32 {
        self.objects
            .iter()
            .find(|(_, iface)| iface.name == interface)
            .map(|(id, _)| *id)
            .unwrap_or_else(|| panic!("client never created a {}", interface))
    }

    /// Answer the registry discovery phase: `get_registry` gets
    /// `globals` announced, the sync completes, and `late` globals are
    /// announced only after the sync callback has fired.
    pub fn serve_discovery(
        &mut self,
        globals: &[(u32, &'static str, u32)],
        late: &[(u32, &'static str, u32)],
    ) {
        loop {
            let msg = self.next_request();
            match (self.interface_of(msg.sender), msg.opcode) {
                ("wl_display", wl_display::REQ_GET_REGISTRY) => {
                    for &(name, interface, version) in globals {
                        self.send_global(name, interface, version);
                    }
                }
                ("wl_display", wl_display::REQ_SYNC) => {
                    let callback = arg_new_id(&msg.args, 0);
                    self.send_done(callback);
                    for &(name, interface, version) in late {
                        self.send_global(name, interface, version);
                    }
                    return;
                }
                other => panic!("unexpected request during discovery: {:?}", other),
            }
        }
    }

    /// Serve a full client bootstrap: discovery, binds, window setup,
    /// through the initial surface commit.
    pub fn serve_bootstrap(&mut self, globals: &[(u32, &'static str, u32)]) {
        self.serve_discovery(globals, &[]);
        loop {
            let msg = self.next_request();
            if self.interface_of(msg.sender) == "wl_surface" && msg.opcode == wl_surface::REQ_COMMIT {
                return;
            }
        }
    }

    /// Wait for the client's next sync and complete it, recording
    /// everything that arrives before it.
    pub fn serve_roundtrip(&mut self) {
        let msg = self.expect_request("wl_display", wl_display::REQ_SYNC);
        let callback = arg_new_id(&msg.args, 0);
        self.send_done(callback);
    }
}
