pub mod epoll;
pub mod socket_helpers;
