// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// The store server binary: parses `--socket`/`--memory-capacity`, sets up
// logging, and runs the event loop until killed.

use std::path::PathBuf;

use clap::Parser;

use plasma_store::store::{self, Config};

const DEFAULT_MEMORY_CAPACITY: i64 = 1 << 30; // 1 GiB

#[derive(Parser, Debug)]
#[command(name = "plasma-store-server", about = "Shared-memory object store")]
struct Args {
    /// Path of the UNIX-domain socket to listen on.
    #[arg(long)]
    socket: PathBuf,

    /// Total bytes the store is allowed to hand out across all segments.
    #[arg(long, default_value_t = DEFAULT_MEMORY_CAPACITY)]
    memory_capacity: i64,

    /// Log level: error, warn, info, debug, trace.
    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

fn setup_logging(level: log::LevelFilter) {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime_now(),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
        .expect("logger already initialized");
}

fn humantime_now() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}", now.as_secs(), now.subsec_millis())
}

fn main() {
    let args = Args::parse();
    setup_logging(args.log_level);

    log::info!(
        "starting plasma-store-server: socket={} memory_capacity={}",
        args.socket.display(),
        args.memory_capacity
    );

    let config = Config {
        socket_path: args.socket,
        memory_capacity: args.memory_capacity,
    };

    if let Err(e) = store::run(config) {
        log::error!("event loop exited with error: {e}");
        std::process::exit(1);
    }
}
