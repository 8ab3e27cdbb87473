// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// Subscribes to a running plasma-store-server and prints every seal/evict/
// delete notification it pushes.
//
// Usage: plasma-demo-subscribe <socket-path>

use std::env;

use plasma_store::PlasmaClient;

fn main() {
    let socket = env::args().nth(1).expect("usage: demo_subscribe <socket>");

    let mut client = PlasmaClient::connect(&socket).expect("connect");
    client.subscribe().expect("subscribe");
    println!("subscribed, waiting for notifications...");

    loop {
        match client.recv_push() {
            Ok(info) => println!(
                "object {} data_size={} metadata_size={} ref_count={}",
                info.id, info.data_size, info.metadata_size, info.ref_count
            ),
            Err(e) => {
                eprintln!("connection closed: {e}");
                break;
            }
        }
    }
}
