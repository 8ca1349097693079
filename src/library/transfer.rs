use crate::library::{
    connection::{AIO_BUFFER_SIZE, Connection},
    server_internals::UserData,
    uring::{AioContext, CycleResult},
};
use std::{
    io,
    os::fd::{AsRawFd, RawFd},
};
use tracing::trace;

/// Largest count Linux moves in one sendfile(2) call.
const MAX_SENDFILE_CHUNK: u64 = 0x7fff_f000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Every byte of the file is on the socket.
    Done,
    /// The socket buffer is full; try again on output readiness.
    Blocked,
    /// A cycle went through and more remains.
    More,
}

fn file_fd(conn: &Connection) -> io::Result<RawFd> {
    conn.file
        .as_ref()
        .map(|file| file.as_raw_fd())
        .ok_or_else(|| io::Error::other("transfer without an open file"))
}

/// Zero-copy file -> socket. Loops until the whole file is out; the file's own
/// offset tracks progress so an interrupted loop resumes where it stopped.
pub fn send_static(conn: &mut Connection) -> io::Result<Progress> {
    let in_fd: RawFd = file_fd(conn)?;
    let out_fd: RawFd = conn.fd();
    while conn.remaining > 0 {
        let chunk: usize = conn.remaining.min(MAX_SENDFILE_CHUNK) as usize;
        let sent: isize = unsafe { libc::sendfile(out_fd, in_fd, std::ptr::null_mut(), chunk) };
        if sent < 0 {
            let err: io::Error = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::WouldBlock => return Ok(Progress::Blocked),
                io::ErrorKind::Interrupted => continue,
                _ => return Err(err),
            }
        }
        if sent == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank during transfer",
            ));
        }
        trace!("FD:{out_fd} sendfile moved {sent} bytes");
        conn.remaining -= sent as u64;
    }
    Ok(Progress::Done)
}

/// One asynchronous cycle: read the next chunk of the file into the
/// connection's private buffer and send it, then account for what the socket
/// actually took.
pub fn send_dynamic(conn: &mut Connection, aio: &mut AioContext) -> io::Result<Progress> {
    if conn.remaining == 0 {
        return Ok(Progress::Done);
    }
    let in_fd: RawFd = file_fd(conn)?;
    let out_fd: RawFd = conn.fd();
    let owner: UserData = conn.user_data();
    let len: usize = conn.remaining.min(AIO_BUFFER_SIZE as u64) as usize;
    let offset: u64 = conn.file_pos;

    let buffer: &mut Box<[u8]> = conn
        .aio_buffer
        .get_or_insert_with(|| vec![0u8; AIO_BUFFER_SIZE].into_boxed_slice());
    let result: io::Result<CycleResult> =
        aio.read_then_send(owner, in_fd, out_fd, &mut buffer[..len], offset);
    let CycleResult { read, sent } = result?;
    trace!("FD:{out_fd} async cycle at {offset}: read {read} sent {sent}");
    account_cycle(conn, len, read, sent)
}

/// Applies one completed cycle to the connection's offset and byte count.
fn account_cycle(conn: &mut Connection, len: usize, read: i32, sent: i32) -> io::Result<Progress> {
    if read < 0 {
        return Err(io::Error::from_raw_os_error(-read));
    }
    let read: u64 = read as u64;
    if read == 0 {
        // End of file before the advertised length: nothing more to send.
        conn.remaining = 0;
        return Ok(Progress::Done);
    }
    let short_read: bool = read < len as u64;
    if sent >= 0 {
        let sent: u64 = (sent as u64).min(read);
        conn.file_pos += sent;
        conn.remaining -= sent;
        if short_read {
            // A short read is the last chunk the file has.
            conn.remaining = conn.remaining.min(read - sent);
        }
        return Ok(if conn.remaining == 0 {
            Progress::Done
        } else {
            Progress::More
        });
    }
    if short_read {
        // The short read severed the link; resend exactly what the file still holds.
        conn.remaining = read;
    }
    match -sent {
        libc::ECANCELED | libc::EINTR => Ok(Progress::More),
        errno if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK => Ok(Progress::Blocked),
        errno => Err(io::Error::from_raw_os_error(errno)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use socket2::SockRef;
    use std::{
        fs::{self, File},
        io::Read,
        net::{TcpListener, TcpStream},
        thread,
        time::Duration,
    };

    fn connection_with_file(name: &str, content: &[u8]) -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let path = std::env::temp_dir().join(format!("aws-transfer-{name}-{}", std::process::id()));
        fs::write(&path, content).unwrap();
        let mut conn = Connection::new(server, 1);
        conn.file = Some(File::open(&path).unwrap());
        fs::remove_file(&path).unwrap();
        conn.file_size = content.len() as u64;
        conn.remaining = content.len() as u64;
        (conn, client)
    }

    #[test]
    fn sendfile_moves_the_whole_file() {
        let content: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let (mut conn, mut client) = connection_with_file("static", &content);
        assert_eq!(send_static(&mut conn).unwrap(), Progress::Done);
        assert_eq!(conn.remaining, 0);
        drop(conn);
        let mut got = Vec::new();
        client.read_to_end(&mut got).unwrap();
        assert_eq!(got, content);
    }

    /// Tiny socket buffers and a peer that is not reading yet.
    fn choke(conn: &Connection, client: &TcpStream) {
        conn.socket.set_nonblocking(true).unwrap();
        SockRef::from(&conn.socket).set_send_buffer_size(4096).unwrap();
        SockRef::from(client).set_recv_buffer_size(4096).unwrap();
    }

    fn drain_in_background(mut client: TcpStream) -> thread::JoinHandle<Vec<u8>> {
        thread::spawn(move || {
            let mut got = Vec::new();
            client.read_to_end(&mut got).unwrap();
            got
        })
    }

    #[test]
    fn sendfile_parks_on_a_full_socket_and_resumes() {
        let content: Vec<u8> = (0..2 * 1024 * 1024u32).map(|i| (i % 249) as u8).collect();
        let (mut conn, client) = connection_with_file("static-full", &content);
        choke(&conn, &client);
        assert_eq!(send_static(&mut conn).unwrap(), Progress::Blocked);
        let parked_at: u64 = conn.remaining;
        assert!(parked_at > 0 && parked_at < content.len() as u64);

        let reader = drain_in_background(client);
        while send_static(&mut conn).unwrap() == Progress::Blocked {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(conn.remaining, 0);
        drop(conn);
        assert_eq!(reader.join().unwrap(), content);
    }

    #[test]
    fn async_cycle_parks_on_a_full_socket_and_resumes() {
        let Ok(mut aio) = AioContext::new(8) else {
            eprintln!("io_uring unavailable, skipping");
            return;
        };
        let content: Vec<u8> = (0..2 * 1024 * 1024u32).map(|i| (i % 241) as u8).collect();
        let (mut conn, client) = connection_with_file("dynamic-full", &content);
        choke(&conn, &client);
        let mut parked: bool = false;
        for _ in 0..content.len() / AIO_BUFFER_SIZE + 1 {
            if send_dynamic(&mut conn, &mut aio).unwrap() == Progress::Blocked {
                parked = true;
                break;
            }
        }
        assert!(parked);
        assert!(conn.remaining > 0);
        assert_eq!(conn.file_pos + conn.remaining, content.len() as u64);

        let reader = drain_in_background(client);
        while send_dynamic(&mut conn, &mut aio).unwrap() != Progress::Done {
            thread::sleep(Duration::from_micros(200));
        }
        drop(conn);
        assert_eq!(reader.join().unwrap(), content);
    }

    #[test]
    fn sendfile_without_file_is_an_error() {
        let (mut conn, _client) = connection_with_file("nofile", b"x");
        conn.file = None;
        assert!(send_static(&mut conn).is_err());
    }

    #[test]
    fn full_cycle_advances_offset() {
        let (mut conn, _client) = connection_with_file("acct-full", &[0u8; 10]);
        conn.remaining = 10;
        assert_eq!(account_cycle(&mut conn, 8, 8, 8).unwrap(), Progress::More);
        assert_eq!((conn.file_pos, conn.remaining), (8, 2));
        assert_eq!(account_cycle(&mut conn, 2, 2, 2).unwrap(), Progress::Done);
        assert_eq!((conn.file_pos, conn.remaining), (10, 0));
    }

    #[test]
    fn partial_send_resumes_from_what_was_sent() {
        let (mut conn, _client) = connection_with_file("acct-partial", &[0u8; 10]);
        assert_eq!(account_cycle(&mut conn, 8, 8, 3).unwrap(), Progress::More);
        assert_eq!((conn.file_pos, conn.remaining), (3, 7));
    }

    #[test]
    fn short_read_becomes_the_final_chunk() {
        let (mut conn, _client) = connection_with_file("acct-short", &[0u8; 10]);
        // File shrank to 4 bytes: link severed, send cancelled.
        assert_eq!(account_cycle(&mut conn, 8, 4, -libc::ECANCELED).unwrap(), Progress::More);
        assert_eq!((conn.file_pos, conn.remaining), (0, 4));
        assert_eq!(account_cycle(&mut conn, 4, 4, 4).unwrap(), Progress::Done);
        assert_eq!(conn.file_pos, 4);
    }

    #[test]
    fn eof_ends_the_transfer() {
        let (mut conn, _client) = connection_with_file("acct-eof", &[0u8; 10]);
        assert_eq!(account_cycle(&mut conn, 8, 0, -libc::ECANCELED).unwrap(), Progress::Done);
        assert_eq!(conn.remaining, 0);
    }

    #[test]
    fn full_socket_blocks_without_progress() {
        let (mut conn, _client) = connection_with_file("acct-eagain", &[0u8; 10]);
        assert_eq!(account_cycle(&mut conn, 8, 8, -libc::EAGAIN).unwrap(), Progress::Blocked);
        assert_eq!((conn.file_pos, conn.remaining), (0, 10));
    }

    #[test]
    fn failures_are_reported() {
        let (mut conn, _client) = connection_with_file("acct-err", &[0u8; 10]);
        assert!(account_cycle(&mut conn, 8, -libc::EBADF, -libc::ECANCELED).is_err());
        assert!(account_cycle(&mut conn, 8, 8, -libc::EPIPE).is_err());
    }
}
