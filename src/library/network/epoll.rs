use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLHUP, EPOLLIN,
    EPOLLOUT, EPOLLRDHUP, epoll_event,
};
use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
};
use tracing::trace;

const DEFAULT_EVENTS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub token: u64,
    pub readable: bool,
    pub writable: bool,
}

/// Readiness source driven by the reactor. One registration per descriptor,
/// one interest at a time, level triggered.
pub trait Multiplexer {
    fn add(&mut self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()>;
    fn modify(&mut self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()>;
    fn remove(&mut self, fd: RawFd) -> io::Result<()>;
    /// Blocks until at least one event is ready (no timeout) and replaces the
    /// content of `events` with what arrived.
    fn wait(&mut self, events: &mut Vec<Event>) -> io::Result<usize>;
}

pub struct Epoll {
    fd: OwnedFd,
    ready: Vec<epoll_event>,
}

impl Epoll {
    pub fn new() -> io::Result<Epoll> {
        Self::with_capacity(DEFAULT_EVENTS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> io::Result<Epoll> {
        let raw: RawFd = unsafe { libc::epoll_create1(EPOLL_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd: OwnedFd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Epoll {
            fd,
            ready: vec![epoll_event { events: 0, u64: 0 }; capacity.max(1)],
        })
    }

    fn ctl(&self, op: i32, fd: RawFd, token: u64, interest: Option<Interest>) -> io::Result<()> {
        let events: i32 = match interest {
            Some(Interest::Read) => EPOLLIN | EPOLLRDHUP,
            Some(Interest::Write) => EPOLLOUT,
            None => 0,
        };
        let mut event: epoll_event = epoll_event {
            events: events as u32,
            u64: token,
        };
        let rc: i32 = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for Epoll {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Multiplexer for Epoll {
    fn add(&mut self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        trace!("epoll add FD:{fd} {interest:?}");
        self.ctl(EPOLL_CTL_ADD, fd, token, Some(interest))
    }

    fn modify(&mut self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        trace!("epoll mod FD:{fd} {interest:?}");
        self.ctl(EPOLL_CTL_MOD, fd, token, Some(interest))
    }

    fn remove(&mut self, fd: RawFd) -> io::Result<()> {
        trace!("epoll del FD:{fd}");
        self.ctl(EPOLL_CTL_DEL, fd, 0, None)
    }

    fn wait(&mut self, events: &mut Vec<Event>) -> io::Result<usize> {
        events.clear();
        let n: i32 = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                self.ready.as_mut_ptr(),
                self.ready.len() as i32,
                -1,
            )
        };
        if n < 0 {
            let err: io::Error = io::Error::last_os_error();
            // A signal landing on the thread is not a broken multiplexer.
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        for raw in &self.ready[..n as usize] {
            let flags: i32 = raw.events as i32;
            let broken: bool = flags & (EPOLLHUP | EPOLLERR) != 0;
            events.push(Event {
                token: raw.u64,
                readable: broken || flags & (EPOLLIN | EPOLLRDHUP) != 0,
                writable: broken || flags & EPOLLOUT != 0,
            });
        }
        Ok(events.len())
    }
}
