pub mod connection;
pub mod handler;
pub mod network;
pub mod resource;
pub mod response;
pub mod server;
pub mod server_internals;
pub mod transfer;
pub mod uring;
pub mod utils;
