use libc::{F_GETFL, F_SETFL, O_NONBLOCK, fcntl};
use socket2::SockRef;
use std::{
    io,
    net::TcpStream,
    os::fd::{AsRawFd, RawFd},
};
use tracing::trace;

/// Flips `O_NONBLOCK` on. Nothing the reactor calls on a client socket may block.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags: i32 = unsafe { fcntl(fd, F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & O_NONBLOCK != 0 {
        return Ok(());
    }
    if unsafe { fcntl(fd, F_SETFL, flags | O_NONBLOCK) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub fn prepare_incoming_socket(stream: &TcpStream) -> io::Result<()> {
    let fd: RawFd = stream.as_raw_fd();
    set_nonblocking(fd)?;
    // Headers are tiny and followed by the body right away; don't let Nagle sit on them.
    let socket: SockRef<'_> = SockRef::from(stream);
    if let Err(err) = socket.set_tcp_nodelay(true) {
        trace!("TCP_NODELAY refused on FD:{fd}: {err}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn accepted_socket_becomes_nonblocking() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, _) = listener.accept().unwrap();
        prepare_incoming_socket(&stream).unwrap();
        let flags = unsafe { fcntl(stream.as_raw_fd(), F_GETFL) };
        assert_ne!(flags & O_NONBLOCK, 0);
        assert!(stream.nodelay().unwrap());
    }

    #[test]
    fn closed_descriptor_is_reported() {
        assert!(set_nonblocking(-1).is_err());
    }
}
