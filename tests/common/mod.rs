#![allow(dead_code)]

use aws::library::server::{Reactor, Server};
use std::{
    fs,
    io::{Read, Write},
    net::{SocketAddr, TcpStream},
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    thread,
};

static ROOTS: AtomicUsize = AtomicUsize::new(0);

/// Fresh document root with empty `static/` and `dynamic/` folders.
pub fn document_root(tag: &str) -> PathBuf {
    let id = ROOTS.fetch_add(1, Ordering::SeqCst);
    let root = std::env::temp_dir().join(format!("aws-it-{tag}-{}-{id}", std::process::id()));
    let _ = fs::remove_dir_all(&root);
    fs::create_dir_all(root.join("static")).unwrap();
    fs::create_dir_all(root.join("dynamic")).unwrap();
    root
}

pub fn write_file(root: &Path, relative: &str, content: &[u8]) {
    fs::write(root.join(relative), content).unwrap();
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn serve(reactor: Reactor) {
    reactor.run()
}

/// Starts a server on an ephemeral port in a background thread.
/// `None` when the kernel refuses io_uring (e.g. a seccomp-filtered container).
pub fn start_server(root: &Path) -> Option<SocketAddr> {
    let reactor = match Server::new("127.0.0.1:0").set_document_root(root).build().bind() {
        Ok(reactor) => reactor,
        Err(err) => {
            eprintln!("server cannot start here, skipping: {err}");
            return None;
        }
    };
    let addr = reactor.local_addr().unwrap();
    thread::Builder::new()
        .name("aws-reactor".to_owned())
        .spawn(move || serve(reactor))
        .unwrap();
    Some(addr)
}

pub fn send_request(addr: SocketAddr, path: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).unwrap();
    write!(stream, "GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n").unwrap();
    stream
}

pub fn read_response(mut stream: TcpStream) -> Vec<u8> {
    let mut response = Vec::new();
    stream.read_to_end(&mut response).unwrap();
    response
}

pub fn fetch(addr: SocketAddr, path: &str) -> Vec<u8> {
    read_response(send_request(addr, path))
}

/// Splits a raw response into its header block (terminator included) and body.
pub fn split_response(response: &[u8]) -> (String, Vec<u8>) {
    let end = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has no header terminator")
        + 4;
    (
        String::from_utf8(response[..end].to_vec()).unwrap(),
        response[end..].to_vec(),
    )
}
