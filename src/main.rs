use mimalloc::MiMalloc;
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use aws::library::{
    server::{self, DEFAULT_ADDR, Server},
    utils::kernel::fatal,
};
use std::env::args;
use tracing::Level;
use tracing_subscriber::fmt;

fn bootstrap_logs(level: Level) {
    fmt()
        .with_max_level(level)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(false)
        .compact()
        .with_ansi(true)
        .init();
}

/// Value following `flag`, if the flag was given.
fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|arg| arg == flag)
        .and_then(|index| args.get(index + 1))
        .cloned()
}

fn main() {
    let args: Vec<String> = args().collect();
    let level: Level = if args.iter().any(|arg| arg == "--trace") {
        Level::TRACE
    } else if args.iter().any(|arg| arg == "--verbose") {
        Level::DEBUG
    } else {
        Level::INFO
    };
    bootstrap_logs(level);

    let addr: String = flag_value(&args, "--addr").unwrap_or_else(|| DEFAULT_ADDR.to_owned());
    let mut builder: Server = Server::new(&addr);
    if let Some(root) = flag_value(&args, "--root") {
        builder.set_document_root(root);
    }
    if let Some(folder) = flag_value(&args, "--static") {
        builder.set_static_folder(&folder);
    }
    if let Some(folder) = flag_value(&args, "--dynamic") {
        builder.set_dynamic_folder(&folder);
    }
    if let Some(depth) = flag_value(&args, "--aio-depth") {
        match depth.parse::<u32>() {
            Ok(depth) => {
                builder.set_aio_depth(depth);
            }
            Err(err) => fatal("--aio-depth expects a number", err),
        }
    }
    if let Some(backlog) = flag_value(&args, "--backlog") {
        match backlog.parse::<i32>() {
            Ok(backlog) => {
                builder.set_backlog(backlog);
            }
            Err(err) => fatal("--backlog expects a number", err),
        }
    }

    if let Err(err) = server::run(builder.build()) {
        fatal("server startup failed", err);
    }
}
