// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// End-to-end client/server scenarios, driven over a real UNIX-domain
// socket against a `store::server::run` instance spawned in a background
// thread per test.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use plasma_store::object_id::ID_SIZE;
use plasma_store::store::{self, Config};
use plasma_store::{Digest, ObjectId, PlasmaClient};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Keeps the scratch directory alive for the socket's whole lifetime;
/// dropped (and cleaned up) at the end of the owning test.
struct RunningStore {
    socket_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

impl AsRef<std::path::Path> for RunningStore {
    fn as_ref(&self) -> &std::path::Path {
        &self.socket_path
    }
}

fn spawn_store(memory_capacity: i64) -> RunningStore {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = tempfile::tempdir().expect("tempdir");
    let socket_path = dir.path().join(format!("plasma-store-test-{n}.sock"));
    let config = Config {
        socket_path: socket_path.clone(),
        memory_capacity,
    };
    thread::spawn(move || {
        store::server::run(config).expect("server run");
    });
    // Give the listener a moment to bind before the first connect.
    for _ in 0..200 {
        if socket_path.exists() {
            break;
        }
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(20));
    RunningStore {
        socket_path,
        _dir: dir,
    }
}

fn id(byte: u8) -> ObjectId {
    ObjectId::new([byte; ID_SIZE])
}

fn digest(byte: u8) -> Digest {
    Digest::new([byte; ID_SIZE])
}

// Scenario 1: round trip — create, seal, read from another client, delete.
#[test]
fn round_trip() {
    let socket = spawn_store(1024 * 1024);
    let mut a = PlasmaClient::connect(&socket).expect("connect a");
    let mut b = PlasmaClient::connect(&socket).expect("connect b");

    let oid = id(0x01);
    a.create(oid, 16, 4).expect("create");
    {
        let (data, metadata) = a.mutable_buffer(&oid).expect("mutable buffer");
        for (i, b) in data.iter_mut().enumerate() {
            *b = i as u8;
        }
        metadata.copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    }
    a.seal(oid, digest(0xAA)).expect("seal");

    assert!(b.contains(oid).expect("contains"));
    let views = b.get(&[oid], Some(Duration::from_millis(100))).expect("get");
    let view = views[0].as_ref().expect("object present");
    assert_eq!(view.data, &(0u8..16).collect::<Vec<u8>>()[..]);
    assert_eq!(view.metadata, &[0xDE, 0xAD, 0xBE, 0xEF]);
    b.release(oid).expect("release");

    let results = a.delete(&[oid]).expect("delete");
    assert!(results[0].is_ok());
    assert!(!b.contains(oid).expect("contains after delete"));
}

// Scenario 2: out-of-memory admission triggers LRU eviction of
// unpinned sealed objects.
#[test]
fn out_of_memory_triggers_eviction() {
    let socket = spawn_store(1024);
    let mut client = PlasmaClient::connect(&socket).expect("connect");

    let mut ids = Vec::new();
    for n in 0..3u8 {
        let oid = id(0x10 + n);
        client.create(oid, 300, 0).expect("create");
        {
            let (data, _) = client.mutable_buffer(&oid).expect("mutable buffer");
            data.fill(n);
        }
        // Sealing already drops the creator's implicit reference, so the
        // object is evictable the moment it's sealed — no Release needed.
        client.seal(oid, digest(n)).expect("seal");
        ids.push(oid);
    }

    let newest = id(0x20);
    client.create(newest, 900, 0).expect("create after eviction");
    {
        let (data, _) = client.mutable_buffer(&newest).expect("mutable buffer");
        data.fill(0xFF);
    }
    client.seal(newest, digest(0xFF)).expect("seal newest");

    assert!(!client.contains(ids[0]).expect("oldest evicted"));
    assert!(!client.contains(ids[1]).expect("second-oldest evicted"));
    assert!(client.contains(newest).expect("newest object survives"));
}

// Scenario 3: a Get issued before the object exists resolves once the
// creator seals it, rather than failing immediately.
#[test]
fn blocking_get_resolves_on_seal() {
    let socket = spawn_store(1024 * 1024);
    let oid = id(0x02);

    let creator_socket = socket.socket_path.clone();
    let creator = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let mut client = PlasmaClient::connect(&creator_socket).expect("connect creator");
        client.create(oid, 8, 0).expect("create");
        {
            let (data, _) = client.mutable_buffer(&oid).expect("mutable buffer");
            data.fill(0x42);
        }
        client.seal(oid, digest(0x11)).expect("seal");
    });

    let mut reader = PlasmaClient::connect(&socket).expect("connect reader");
    let views = reader
        .get(&[oid], Some(Duration::from_millis(500)))
        .expect("get");
    assert!(views[0].is_some(), "get should resolve once sealed");

    creator.join().expect("creator thread");
}

// Scenario 4: a Get with a short timeout on an id nobody ever creates
// returns a sentinel once the deadline fires.
#[test]
fn get_timeout_returns_sentinel() {
    let socket = spawn_store(1024 * 1024);
    let mut client = PlasmaClient::connect(&socket).expect("connect");

    let oid = id(0x03);
    let start = std::time::Instant::now();
    let views = client
        .get(&[oid], Some(Duration::from_millis(50)))
        .expect("get");
    assert!(views[0].is_none());
    assert!(start.elapsed() >= Duration::from_millis(45));
}

// Scenario 5: Abort releases a Created object's backing range and makes
// the id invisible to other clients.
#[test]
fn abort_frees_the_object() {
    let socket = spawn_store(1024 * 1024);
    let mut a = PlasmaClient::connect(&socket).expect("connect a");
    let mut b = PlasmaClient::connect(&socket).expect("connect b");

    let oid = id(0x04);
    a.create(oid, 8, 0).expect("create");
    a.abort(oid).expect("abort");

    assert!(!b.contains(oid).expect("contains after abort"));

    // The id is reusable by a subsequent Create.
    a.create(oid, 8, 0).expect("recreate after abort");
    a.seal(oid, digest(0x22)).expect("seal after recreate");
    assert!(b.contains(oid).expect("contains after recreate"));
}

// Scenario 6: subscribers receive a push on seal and another on delete.
#[test]
fn subscription_receives_seal_and_delete_pushes() {
    let socket = spawn_store(1024 * 1024);
    let mut subscriber = PlasmaClient::connect(&socket).expect("connect subscriber");
    subscriber.subscribe().expect("subscribe");

    let mut creator = PlasmaClient::connect(&socket).expect("connect creator");
    let oid = id(0x05);
    creator.create(oid, 4, 0).expect("create");
    creator.seal(oid, digest(0x33)).expect("seal");

    let seal_push = subscriber.recv_push().expect("seal push");
    assert_eq!(seal_push.id, oid);
    assert_eq!(seal_push.digest, digest(0x33));

    // Sealing already dropped the creator's implicit reference, so the
    // object is unpinned and deletable without an explicit Release.
    creator.delete(&[oid]).expect("delete");

    let delete_push = subscriber.recv_push().expect("delete push");
    assert_eq!(delete_push.id, oid);
}

// Boundary: Create with zero-length data and metadata is legal and
// immediately sealable.
#[test]
fn zero_length_object_is_sealable() {
    let socket = spawn_store(1024 * 1024);
    let mut client = PlasmaClient::connect(&socket).expect("connect");

    let oid = id(0x06);
    client.create(oid, 0, 0).expect("create zero-length");
    client.seal(oid, digest(0x44)).expect("seal zero-length");
    assert!(client.contains(oid).expect("contains"));
}

// Boundary: Delete([X, Y]) where X exists and Y does not reports
// per-id errors in request order.
#[test]
fn delete_reports_per_id_errors_in_order() {
    let socket = spawn_store(1024 * 1024);
    let mut client = PlasmaClient::connect(&socket).expect("connect");

    let existing = id(0x07);
    let missing = id(0x08);
    client.create(existing, 4, 0).expect("create");
    client.seal(existing, digest(0x55)).expect("seal");

    let results = client.delete(&[existing, missing]).expect("delete");
    assert!(results[0].is_ok());
    assert!(results[1].is_err());
}
