use crate::library::{
    network::epoll::Interest,
    resource::ResourceKind,
    server_internals::{OP_READINESS, UserData},
    utils::{
        data_lake::DataLake,
        http::{RequestParser, has_header_terminator},
    },
};
use bytes::{Buf, BytesMut};
use std::{
    fs::File,
    io::{self, Write},
    net::TcpStream,
    os::fd::{AsRawFd, RawFd},
};
use tracing::{debug, trace};

pub const RECV_BUFFER_SIZE: usize = 8192;
pub const AIO_BUFFER_SIZE: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    Receiving,
    RequestReceived,
    Sending404,
    SendingHeader,
    SendingData,
    AsyncOngoing,
    DataSent,
    HeaderSent,
    NotFoundSent,
    Closed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::DataSent
                | ConnectionState::HeaderSent
                | ConnectionState::NotFoundSent
                | ConnectionState::Closed
        )
    }

    /// Readiness this state is waiting for.
    pub fn interest(self) -> Interest {
        match self {
            ConnectionState::Initial | ConnectionState::Receiving => Interest::Read,
            _ => Interest::Write,
        }
    }
}

/// What the reactor must do with a connection after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Wait(Interest),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Receive {
    /// Terminator seen, peer finished sending, or the buffer is full.
    Complete,
    Pending,
    /// Read error, or the peer left without sending a byte.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flush {
    Drained,
    Blocked,
}

pub struct Connection {
    pub(crate) socket: TcpStream,
    pub(crate) generation: u16,
    pub(crate) state: ConnectionState,
    pub(crate) recv: Box<DataLake<RECV_BUFFER_SIZE>>,
    pub(crate) parser: RequestParser,
    pub(crate) request_path: Option<String>,
    pub(crate) resource: ResourceKind,
    pub(crate) file: Option<File>,
    pub(crate) file_size: u64,
    pub(crate) file_pos: u64,
    pub(crate) remaining: u64,
    pub(crate) send_buffer: BytesMut,
    pub(crate) header_ready: bool,
    pub(crate) aio_buffer: Option<Box<[u8]>>,
}

impl Connection {
    pub fn new(socket: TcpStream, generation: u16) -> Connection {
        Connection {
            socket,
            generation,
            state: ConnectionState::Initial,
            recv: Box::new(DataLake::build()),
            parser: RequestParser::new(),
            request_path: None,
            resource: ResourceKind::None,
            file: None,
            file_size: 0,
            file_pos: 0,
            remaining: 0,
            send_buffer: BytesMut::with_capacity(128),
            header_ready: false,
            aio_buffer: None,
        }
    }

    #[inline(always)]
    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    #[inline(always)]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[inline(always)]
    pub fn resource(&self) -> ResourceKind {
        self.resource
    }

    #[inline(always)]
    pub fn request_path(&self) -> Option<&str> {
        self.request_path.as_deref()
    }

    #[inline(always)]
    pub fn generation(&self) -> u16 {
        self.generation
    }

    pub fn user_data(&self) -> UserData {
        UserData {
            client_id: self.fd() as u32,
            generation: self.generation,
            uniq_id: OP_READINESS,
        }
    }

    /// Drains the socket into the receive buffer until it would block.
    pub(crate) fn receive_data(&mut self) -> Receive {
        loop {
            if self.recv.is_full() {
                debug!("FD:{} receive buffer full without terminator", self.fd());
                return Receive::Complete;
            }
            match self.recv.fill_from(&mut self.socket) {
                Ok(0) => {
                    trace!("FD:{} peer finished sending", self.fd());
                    return if self.recv.is_empty() {
                        Receive::Closed
                    } else {
                        Receive::Complete
                    };
                }
                Ok(read) => {
                    trace!("FD:{} received {read} bytes", self.fd());
                    if has_header_terminator(self.recv.as_slice()) {
                        return Receive::Complete;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Receive::Pending,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("FD:{} receive failed: {err}", self.fd());
                    return Receive::Closed;
                }
            }
        }
    }

    /// Pushes as much of the send buffer as the socket takes right now.
    pub(crate) fn flush_send_buffer(&mut self) -> io::Result<Flush> {
        while !self.send_buffer.is_empty() {
            match self.socket.write(&self.send_buffer) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(sent) => {
                    trace!("FD:{} sent {sent} buffered bytes", self.fd());
                    self.send_buffer.advance(sent);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(Flush::Blocked),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(Flush::Drained)
    }

    /// Releases everything the connection owns: the file first, then the socket.
    /// The caller has already taken it out of the table and the multiplexer.
    pub fn close(mut self) {
        debug!(
            "Closing FD:{} in state {:?} ({:?} {:?})",
            self.fd(),
            self.state,
            self.resource,
            self.request_path
        );
        self.state = ConnectionState::Closed;
        drop(self.file.take());
    }
}
