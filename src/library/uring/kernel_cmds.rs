use io_uring::{opcode, squeue, squeue::Flags, types};
use std::os::fd::RawFd;
use tracing::trace;

/// Positional file read into `buffer`. Linked, so the entry pushed right after
/// it only runs once the read has filled all `len` bytes.
#[inline(always)]
pub unsafe fn read_at_linked(
    user_data: u64,
    file_fd: RawFd,
    buffer: *mut u8,
    len: u32,
    offset: u64,
) -> squeue::Entry {
    trace!("Kernel Call: Read");
    trace!("    Read {len} bytes at offset {offset}");
    opcode::Read::new(types::Fd(file_fd), buffer, len)
        .offset(offset)
        .build()
        .user_data(user_data)
        .flags(Flags::IO_LINK)
}

#[inline(always)]
pub unsafe fn send(user_data: u64, client_fd: RawFd, data: *const u8, len: u32) -> squeue::Entry {
    trace!("Kernel Call: Send");
    trace!("    Write {len} bytes");
    opcode::Send::new(types::Fd(client_fd), data, len)
        .flags(libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL)
        .build()
        .user_data(user_data)
}
