use crate::library::{network::epoll::Epoll, uring::AioContext};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::{
    io,
    net::{SocketAddr, TcpListener},
};

pub const DEFAULT_LISTEN_BACKLOG: i32 = 128;

/// Token of the listening socket. No connection packs to it: `uniq_id` 0xFFFF is never used.
pub const LISTENER_TOKEN: u64 = u64::MAX;
pub const OP_READINESS: u16 = 0x0;
pub const OP_READ: u16 = 0xA1;
pub const OP_SEND: u16 = 0xA2;

/// Identity of one operation of one connection, packed into the 64 bits the
/// kernel hands back (epoll `data.u64`, io_uring `user_data`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserData {
    /// Socket descriptor, also the slot in the connection table.
    pub client_id: u32,
    /// Bumped on every accept so a recycled descriptor never matches a stale event.
    pub generation: u16,
    pub uniq_id: u16,
}

impl UserData {
    #[inline(always)]
    pub const fn pack_user_data(&self) -> u64 {
        ((self.uniq_id as u64) << 48) | ((self.generation as u64) << 32) | (self.client_id as u64)
    }
    #[inline(always)]
    pub const fn unpack_user_data(user_data: u64) -> Self {
        Self {
            client_id: (user_data & 0xFFFF_FFFF) as u32,
            generation: ((user_data >> 32) & 0xFFFF) as u16,
            uniq_id: ((user_data >> 48) & 0xFFFF) as u16,
        }
    }
}

pub trait ServerInternal {
    fn build_listener(&self, addr: SocketAddr, backlog: i32) -> io::Result<TcpListener> {
        let domain: Domain = Domain::for_address(addr);
        let listener: Socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        listener.set_reuse_address(true)?;
        listener.bind(&SockAddr::from(addr))?;
        listener.listen(backlog)?;
        // Accept only runs on readiness, but a racing peer reset must not park us.
        listener.set_nonblocking(true)?;
        Ok(listener.into())
    }

    fn build_multiplexer(&self) -> io::Result<Epoll> {
        Epoll::new()
    }

    fn build_aio(&self, depth: u32) -> io::Result<AioContext> {
        AioContext::new(depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_data_packs_and_unpacks() {
        let data = UserData { client_id: 0xDEAD_BEEF, generation: 0x1234, uniq_id: OP_SEND };
        assert_eq!(UserData::unpack_user_data(data.pack_user_data()), data);
    }

    #[test]
    fn connection_tokens_never_hit_the_listener() {
        let data = UserData { client_id: u32::MAX, generation: u16::MAX, uniq_id: OP_READINESS };
        assert_ne!(data.pack_user_data(), LISTENER_TOKEN);
    }
}
