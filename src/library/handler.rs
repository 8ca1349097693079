use crate::library::{
    connection::{Connection, ConnectionState, Flush, Next, Receive},
    network::epoll::Interest,
    resource::{ResourceKind, classify, resolve},
    response::{NOT_FOUND_BODY, not_found_header, ok_header},
    server::Settings,
    transfer::{Progress, send_dynamic, send_static},
    uring::AioContext,
};
use std::{fs::File, io, path::PathBuf};
use tracing::{debug, trace, warn};

/// Outcome of running the current state once.
enum Transition {
    /// Move on without waiting for the reactor.
    Goto(ConnectionState),
    /// Stay put until the state's readiness fires again.
    Park,
    /// Socket failure: drop the connection without an answer.
    Abort,
}

impl Connection {
    /// Input readiness. Only the two receive states care.
    pub fn on_input(&mut self) -> Next {
        match self.state {
            ConnectionState::Initial => {
                trace!("FD:{} initial -> receiving", self.fd());
                self.state = ConnectionState::Receiving;
                Next::Wait(Interest::Read)
            }
            ConnectionState::Receiving => match self.receive_data() {
                Receive::Complete => {
                    self.state = ConnectionState::RequestReceived;
                    Next::Wait(Interest::Write)
                }
                Receive::Pending => Next::Wait(Interest::Read),
                Receive::Closed => {
                    self.state = ConnectionState::Closed;
                    Next::Close
                }
            },
            state if state.is_terminal() => Next::Close,
            state => Next::Wait(state.interest()),
        }
    }

    /// Output readiness. Runs states back to back until one of them needs the
    /// reactor again or the connection is finished.
    pub fn on_output(&mut self, settings: &Settings, aio: &mut AioContext) -> Next {
        loop {
            let transition: Transition = match self.state {
                ConnectionState::Initial | ConnectionState::Receiving => {
                    return Next::Wait(Interest::Read);
                }
                ConnectionState::RequestReceived => Transition::Goto(self.process_request(settings)),
                ConnectionState::SendingHeader => {
                    self.prepare_reply_header();
                    Transition::Goto(ConnectionState::SendingData)
                }
                ConnectionState::Sending404 => self.send_not_found(),
                ConnectionState::SendingData => self.send_data(),
                ConnectionState::AsyncOngoing => self.send_async(aio),
                ConnectionState::DataSent
                | ConnectionState::HeaderSent
                | ConnectionState::NotFoundSent
                | ConnectionState::Closed => return Next::Close,
            };
            match transition {
                Transition::Goto(state) => {
                    trace!("FD:{} {:?} -> {:?}", self.fd(), self.state, state);
                    self.state = state;
                }
                Transition::Park => return Next::Wait(self.state.interest()),
                Transition::Abort => {
                    self.state = ConnectionState::Closed;
                    return Next::Close;
                }
            }
        }
    }

    fn process_request(&mut self, settings: &Settings) -> ConnectionState {
        let mut decoded: Option<String> = None;
        if let Err(err) = self
            .parser
            .execute(self.recv.as_slice(), |path| decoded = Some(path.to_owned()))
        {
            debug!("FD:{} unparsable request: {err}", self.fd());
            return ConnectionState::Sending404;
        }
        let Some(path) = decoded else {
            return ConnectionState::Sending404;
        };
        self.resource = classify(&path, &settings.static_folder, &settings.dynamic_folder);
        debug!("FD:{} requested {path} ({:?})", self.fd(), self.resource);
        self.request_path = Some(path);
        if self.resource == ResourceKind::None {
            return ConnectionState::Sending404;
        }
        match self.open_file(settings) {
            Ok(()) => ConnectionState::SendingHeader,
            Err(err) => {
                debug!("FD:{} cannot serve {:?}: {err}", self.fd(), self.request_path);
                ConnectionState::Sending404
            }
        }
    }

    fn open_file(&mut self, settings: &Settings) -> io::Result<()> {
        let path: &str = self.request_path.as_deref().unwrap_or("/");
        let full: PathBuf = match resolve(&settings.document_root, path) {
            Some(full) => full,
            None => {
                warn!("FD:{} rejected path outside document root: {path}", self.fd());
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "path leaves the document root",
                ));
            }
        };
        let file: File = File::open(&full)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            ));
        }
        trace!("FD:{} opened {} ({} bytes)", self.fd(), full.display(), metadata.len());
        self.file_size = metadata.len();
        self.remaining = metadata.len();
        self.file_pos = 0;
        self.file = Some(file);
        Ok(())
    }

    fn prepare_reply_header(&mut self) {
        self.send_buffer.clear();
        self.send_buffer
            .extend_from_slice(ok_header(self.file_size).as_bytes());
        self.header_ready = true;
    }

    fn send_not_found(&mut self) -> Transition {
        if !self.header_ready {
            self.send_buffer.clear();
            self.send_buffer
                .extend_from_slice(not_found_header().as_bytes());
            self.send_buffer.extend_from_slice(NOT_FOUND_BODY);
            self.header_ready = true;
        }
        match self.flush_send_buffer() {
            Ok(Flush::Drained) => Transition::Goto(ConnectionState::NotFoundSent),
            Ok(Flush::Blocked) => Transition::Park,
            Err(err) => {
                debug!("FD:{} 404 send failed: {err}", self.fd());
                Transition::Abort
            }
        }
    }

    fn send_data(&mut self) -> Transition {
        match self.flush_send_buffer() {
            Ok(Flush::Drained) => {}
            Ok(Flush::Blocked) => return Transition::Park,
            Err(err) => {
                debug!("FD:{} header send failed: {err}", self.fd());
                return Transition::Abort;
            }
        }
        if self.remaining == 0 {
            return Transition::Goto(ConnectionState::HeaderSent);
        }
        match self.resource {
            ResourceKind::Static => match send_static(self) {
                Ok(Progress::Done) => Transition::Goto(ConnectionState::DataSent),
                Ok(Progress::Blocked | Progress::More) => Transition::Park,
                Err(err) => {
                    debug!("FD:{} sendfile gave up with {} bytes left: {err}", self.fd(), self.remaining);
                    Transition::Goto(ConnectionState::DataSent)
                }
            },
            ResourceKind::Dynamic => Transition::Goto(ConnectionState::AsyncOngoing),
            ResourceKind::None => Transition::Goto(ConnectionState::DataSent),
        }
    }

    fn send_async(&mut self, aio: &mut AioContext) -> Transition {
        match send_dynamic(self, aio) {
            Ok(Progress::Done) => Transition::Goto(ConnectionState::DataSent),
            Ok(Progress::Blocked | Progress::More) => Transition::Park,
            Err(err) => {
                debug!("FD:{} async transfer gave up with {} bytes left: {err}", self.fd(), self.remaining);
                Transition::Goto(ConnectionState::DataSent)
            }
        }
    }
}
