// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// Connects to a running plasma-store-server, creates and seals one
// object, then reads it back via `get`.
//
// Usage: plasma-demo-put-get <socket-path>

use std::env;
use std::time::Duration;

use plasma_store::object_id::ID_SIZE;
use plasma_store::{Digest, ObjectId, PlasmaClient};

fn main() {
    let socket = env::args().nth(1).expect("usage: demo_put_get <socket>");

    let mut client = PlasmaClient::connect(&socket).expect("connect");
    println!("connected, memory capacity = {}", client.memory_capacity());

    let id = ObjectId::new([7u8; ID_SIZE]);
    let payload = b"hello from plasma-demo-put-get";

    client
        .create(id, payload.len() as i64, 0)
        .expect("create");
    {
        let (data, _metadata) = client.mutable_buffer(&id).expect("mutable buffer");
        data.copy_from_slice(payload);
    }
    client.seal(id, Digest::new([1u8; ID_SIZE])).expect("seal");
    println!("sealed object {id}");

    let views = client
        .get(&[id], Some(Duration::from_secs(1)))
        .expect("get");
    match &views[0] {
        Some(buf) => println!("read back: {}", String::from_utf8_lossy(buf.data)),
        None => println!("object not ready within timeout"),
    }

    client.release(id).expect("release");
    client.delete(&[id]).expect("delete");
}
