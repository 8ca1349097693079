pub mod library;

pub use library::{
    server::{Reactor, Server, Settings, run},
    uring::AioContext,
};
