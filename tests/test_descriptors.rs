mod common;

use common::*;
use std::{
    fs,
    io::Write,
    net::TcpStream,
    thread,
    time::{Duration, Instant},
};

fn open_descriptors() -> usize {
    fs::read_dir("/proc/self/fd").unwrap().count()
}

fn wait_for_descriptors(expected: usize) -> usize {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let now = open_descriptors();
        if now == expected || Instant::now() > deadline {
            return now;
        }
        thread::sleep(Duration::from_millis(20));
    }
}

// Single test in this binary: descriptor counts are process wide.
#[test]
fn every_terminal_state_releases_its_descriptors() {
    let root = document_root("fds");
    for i in 0..10 {
        write_file(&root, &format!("static/s{i}.txt"), &pattern(5_000 + i, 4));
        write_file(&root, &format!("dynamic/d{i}.dat"), &pattern(40_000 + i, 5));
    }
    let Some(addr) = start_server(&root) else { return };
    // Let the reactor settle into its wait.
    drop(fetch(addr, "/static/s0.txt"));
    let baseline = wait_for_descriptors(open_descriptors());

    let mut streams: Vec<TcpStream> = Vec::new();
    for i in 0..10 {
        streams.push(send_request(addr, &format!("/static/s{i}.txt")));
        streams.push(send_request(addr, &format!("/dynamic/d{i}.dat")));
        streams.push(send_request(addr, &format!("/static/missing{i}.txt")));
    }
    for _ in 0..5 {
        // Peers that leave without a request.
        drop(TcpStream::connect(addr).unwrap());
    }
    let mut garbage = TcpStream::connect(addr).unwrap();
    garbage.write_all(b"\r\n\r\n").unwrap();
    streams.push(garbage);

    for stream in streams {
        assert!(!read_response(stream).is_empty());
    }
    assert_eq!(wait_for_descriptors(baseline), baseline);

    // A second wave reuses the same descriptor numbers.
    for _ in 0..3 {
        for i in 0..10 {
            drop(fetch(addr, &format!("/dynamic/d{i}.dat")));
        }
    }
    assert_eq!(wait_for_descriptors(baseline), baseline);
}
