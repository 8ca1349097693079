use crate::library::{
    connection::{Connection, Next},
    network::{
        epoll::{Epoll, Event, Interest, Multiplexer},
        socket_helpers::prepare_incoming_socket,
    },
    server_internals::{
        DEFAULT_LISTEN_BACKLOG, LISTENER_TOKEN, OP_READINESS, ServerInternal, UserData,
    },
    uring::{AioContext, DEFAULT_AIO_DEPTH},
    utils::kernel::fatal,
};
use stable_vec::ExternStableVec;
use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    os::fd::{AsRawFd, RawFd},
    path::PathBuf,
};
use tracing::{debug, error, info, trace};

pub const DEFAULT_ADDR: &str = "0.0.0.0:8888";
pub const DEFAULT_DOCUMENT_ROOT: &str = "./";
pub const DEFAULT_STATIC_FOLDER: &str = "static/";
pub const DEFAULT_DYNAMIC_FOLDER: &str = "dynamic/";
const EVENTS_CAPACITY: usize = 256;

/// What the state machine needs to know about the server's filesystem layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub document_root: PathBuf,
    pub static_folder: String,
    pub dynamic_folder: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            document_root: PathBuf::from(DEFAULT_DOCUMENT_ROOT),
            static_folder: DEFAULT_STATIC_FOLDER.to_owned(),
            dynamic_folder: DEFAULT_DYNAMIC_FOLDER.to_owned(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Server {
    addr: String,
    backlog: i32,
    aio_depth: u32,
    settings: Settings,
}
impl ServerInternal for Server {}

/// Everything the process owns while serving: built once by `Server::bind`,
/// then driven by `run` until the process dies.
pub struct Reactor {
    listener: TcpListener,
    multiplexer: Epoll,
    aio: AioContext,
    // Indexed by socket descriptor. An open descriptor is never handed out twice,
    // so a slot holds at most one live connection.
    connections: ExternStableVec<Connection>,
    settings: Settings,
    generation: u16,
    events: Vec<Event>,
}

// Reactor engine
impl Reactor {
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves forever. Any error that escapes here is a broken invariant and aborts.
    pub fn run(mut self) -> ! {
        info!(
            "Server waiting for connections on {}",
            self.local_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_else(|_| "<unknown>".to_owned())
        );
        loop {
            self.turn();
        }
    }

    /// One blocking wait and the dispatch of everything it returned.
    pub fn turn(&mut self) {
        let ready: usize = match self.multiplexer.wait(&mut self.events) {
            Ok(ready) => ready,
            Err(err) => fatal("epoll_wait failed", err),
        };
        trace!("{ready} events ready");
        for index in 0..ready {
            let event: Event = self.events[index];
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: Event) {
        if event.token == LISTENER_TOKEN {
            if event.readable {
                self.handle_new_connection();
            }
            return;
        }
        let tag: UserData = UserData::unpack_user_data(event.token);
        let slot: usize = tag.client_id as usize;
        let Some(conn) = self.connections.get_mut(slot) else {
            trace!("Event for vanished FD:{slot}");
            return;
        };
        if conn.generation() != tag.generation {
            trace!("Stale event for recycled FD:{slot}");
            return;
        }
        let mut next: Option<Next> = None;
        if event.readable {
            next = Some(conn.on_input());
        }
        if event.writable && next != Some(Next::Close) {
            next = Some(conn.on_output(&self.settings, &mut self.aio));
        }
        match next {
            Some(Next::Close) => self.close_connection(slot),
            Some(Next::Wait(interest)) => self.rearm(slot as RawFd, event.token, interest),
            None => {}
        }
    }

    fn rearm(&mut self, fd: RawFd, token: u64, interest: Interest) {
        if let Err(err) = self.multiplexer.modify(fd, token, interest) {
            fatal("epoll interest update failed", err);
        }
    }

    fn handle_new_connection(&mut self) {
        let (stream, peer): (TcpStream, SocketAddr) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::Interrupted
                        | io::ErrorKind::ConnectionAborted
                ) =>
            {
                trace!("Accept raced away: {err}");
                return;
            }
            Err(err) => fatal("accept failed", err),
        };
        if let Err(err) = prepare_incoming_socket(&stream) {
            // Dropping the stream closes it; nothing was registered yet.
            error!("Cannot make socket from {peer} non-blocking: {err}");
            return;
        }
        let fd: RawFd = stream.as_raw_fd();
        self.generation = self.generation.wrapping_add(1);
        let conn: Connection = Connection::new(stream, self.generation);
        let token: u64 = UserData {
            client_id: fd as u32,
            generation: self.generation,
            uniq_id: OP_READINESS,
        }
        .pack_user_data();

        let slot: usize = fd as usize;
        self.connections.reserve_for(slot);
        if self.connections.insert(slot, conn).is_some() {
            fatal("connection table corrupted", format_args!("FD:{fd} already had an owner"));
        }
        debug!("New connection from {peer} on socket {fd}");
        if let Err(err) = self.multiplexer.add(fd, token, Interest::Read) {
            fatal("epoll registration failed", err);
        }
    }

    /// The only place a connection leaves the table.
    fn close_connection(&mut self, slot: usize) {
        if let Err(err) = self.multiplexer.remove(slot as RawFd) {
            fatal("epoll deregistration failed", err);
        }
        match self.connections.remove(slot) {
            Some(conn) => conn.close(),
            None => fatal("connection table corrupted", format_args!("FD:{slot} has no owner")),
        }
        trace!("{} connections still open", self.connections.num_elements());
    }
}

// Public server endpoints
impl Server {
    pub fn new(addr: &str) -> Server {
        Server {
            addr: addr.to_owned(),
            backlog: DEFAULT_LISTEN_BACKLOG,
            aio_depth: DEFAULT_AIO_DEPTH,
            settings: Settings::default(),
        }
    }
    #[inline(always)]
    pub fn set_aio_depth(&mut self, depth: u32) -> &mut Self {
        self.aio_depth = depth;
        self
    }
    #[inline(always)]
    pub fn set_backlog(&mut self, backlog: i32) -> &mut Self {
        self.backlog = backlog;
        self
    }
    #[inline(always)]
    pub fn set_document_root(&mut self, root: impl Into<PathBuf>) -> &mut Self {
        self.settings.document_root = root.into();
        self
    }
    #[inline(always)]
    pub fn set_static_folder(&mut self, folder: &str) -> &mut Self {
        self.settings.static_folder = folder.to_owned();
        self
    }
    #[inline(always)]
    pub fn set_dynamic_folder(&mut self, folder: &str) -> &mut Self {
        self.settings.dynamic_folder = folder.to_owned();
        self
    }
    #[inline(always)]
    pub fn build(&mut self) -> Self {
        self.clone()
    }

    /// Creates the async I/O context, the multiplexer and the listening socket,
    /// and registers the listener. Every failure here is a startup failure.
    pub fn bind(self) -> io::Result<Reactor> {
        let addr: SocketAddr = self.addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} does not resolve to an address", self.addr),
            )
        })?;
        info!("Build async I/O context. Depth: {}", self.aio_depth);
        let aio: AioContext = self.build_aio(self.aio_depth)?;
        info!("Build multiplexer.");
        let mut multiplexer: Epoll = self.build_multiplexer()?;
        info!("Creating base listener on {addr}");
        let listener: TcpListener = self.build_listener(addr, self.backlog)?;
        multiplexer.add(listener.as_raw_fd(), LISTENER_TOKEN, Interest::Read)?;
        info!(
            "Serving {} ({}* static, {}* dynamic)",
            self.settings.document_root.display(),
            self.settings.static_folder,
            self.settings.dynamic_folder
        );
        Ok(Reactor {
            listener,
            multiplexer,
            aio,
            connections: ExternStableVec::new(),
            settings: self.settings,
            generation: 0,
            events: Vec::with_capacity(EVENTS_CAPACITY),
        })
    }
}

pub fn run(server: Server) -> io::Result<()> {
    let reactor: Reactor = server.bind()?;
    reactor.run()
}
