pub mod kernel_cmds;

use crate::library::{
    server_internals::{OP_READ, OP_SEND, UserData},
    uring::kernel_cmds::{read_at_linked, send},
    utils::kernel::fatal,
};
use io_uring::{IoUring, cqueue, squeue};
use std::{io, os::fd::RawFd};
use tracing::{info, trace};

pub const DEFAULT_AIO_DEPTH: u32 = 128;

/// Raw completion results of one read/send pair, as the kernel reported
/// them: a byte count, or a negated errno.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleResult {
    pub read: i32,
    pub sent: i32,
}

/// Kernel-side asynchronous I/O context: one io_uring shared by every
/// dynamic transfer of the process.
pub struct AioContext {
    ring: IoUring<squeue::Entry, cqueue::Entry>,
    depth: u32,
}

impl AioContext {
    pub fn new(depth: u32) -> io::Result<AioContext> {
        // No SINGLE_ISSUER: the ring may be built on one thread and driven from another.
        let ring: IoUring<squeue::Entry, cqueue::Entry> = IoUring::builder().build(depth.max(2))?;
        info!("Async I/O context ready. Depth: {}", ring.params().sq_entries());
        Ok(AioContext { ring, depth })
    }

    /// Submits `read(file, buffer[..len], offset)` linked to
    /// `send(socket, buffer[..len])` and waits for both completions.
    ///
    /// The wait is bounded: both operations were just handed to the kernel and
    /// the socket send never parks (`MSG_DONTWAIT`).
    pub fn read_then_send(
        &mut self,
        owner: UserData,
        file_fd: RawFd,
        socket_fd: RawFd,
        buffer: &mut [u8],
        offset: u64,
    ) -> io::Result<CycleResult> {
        let len: u32 = u32::try_from(buffer.len()).unwrap_or(u32::MAX);
        let read_tag: u64 = UserData { uniq_id: OP_READ, ..owner }.pack_user_data();
        let send_tag: u64 = UserData { uniq_id: OP_SEND, ..owner }.pack_user_data();
        let entries: [squeue::Entry; 2] = unsafe {
            [
                read_at_linked(read_tag, file_fd, buffer.as_mut_ptr(), len, offset),
                send(send_tag, socket_fd, buffer.as_ptr(), len),
            ]
        };
        {
            let mut sq = self.ring.submission();
            // The buffer outlives the call: we do not return before both CQEs arrive.
            if unsafe { sq.push_multiple(&entries) }.is_err() {
                fatal(
                    "async I/O queue overflow",
                    format_args!("no room for 2 entries in a ring of {}", self.depth),
                );
            }
        }
        self.wait_for(2)?;

        let mut result: CycleResult = CycleResult {
            read: -libc::ECANCELED,
            sent: -libc::ECANCELED,
        };
        let mut seen: usize = 0;
        while seen < 2 {
            let next: Option<cqueue::Entry> = self.ring.completion().next();
            let cqe: cqueue::Entry = match next {
                Some(cqe) => cqe,
                None => {
                    self.wait_for(1)?;
                    continue;
                }
            };
            let tag: UserData = UserData::unpack_user_data(cqe.user_data());
            trace!("Async completion {tag:?} -> {}", cqe.result());
            if tag.client_id != owner.client_id || tag.generation != owner.generation {
                // Only one pair is ever in flight, so this cannot belong to anyone.
                trace!("Dropping foreign completion {tag:?}");
                continue;
            }
            match tag.uniq_id {
                OP_READ => result.read = cqe.result(),
                OP_SEND => result.sent = cqe.result(),
                _ => continue,
            }
            seen += 1;
        }
        Ok(result)
    }

    fn wait_for(&mut self, want: usize) -> io::Result<()> {
        // Giving up here would free a buffer the kernel may still be writing into.
        loop {
            match self.ring.submit_and_wait(want) {
                Ok(_) => return Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => fatal("async I/O completion wait failed", err),
            }
        }
    }
}
