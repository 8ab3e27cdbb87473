// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// The store's single-threaded event loop. One `mio::Poll` drives the
// listening socket and every client connection; `Get`/`Wait` requests
// that can't resolve immediately are parked in
// `store::waiter::WaiterEngine` and replied to later from the same loop,
// never by blocking a thread.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::{Duration, Instant};

use mio::net::{UnixListener, UnixStream};
use mio::{Events, Interest, Poll, Token};

use crate::object_id::{Digest, ObjectId};
use crate::store::eviction::EvictionList;
use crate::store::io::{recv_chunk, send_chunk};
use crate::store::remote::RemoteStatus;
use crate::store::table::ObjectTable;
use crate::store::waiter::{RequestId, WaiterEngine};
use crate::wire::codec::Decoder;
use crate::wire::messages::*;

const LISTENER_TOKEN: Token = Token(0);
const HEADER_LEN: usize = 16;

/// Incremental read state for one connection's non-blocking socket.
/// `wire::fd_channel::FdChannel` assumes a blocking peer (used by
/// clients); the server instead has to make progress one `recvmsg` call
/// at a time and resume later.
enum ReadState {
    Header { buf: [u8; HEADER_LEN], filled: usize },
    Body { tag: u64, body: Vec<u8>, filled: usize },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::Header {
            buf: [0u8; HEADER_LEN],
            filled: 0,
        }
    }
}

struct OutFrame {
    buf: Vec<u8>,
    fd: Option<RawFd>,
    offset: usize,
}

fn frame_bytes(tag: u64, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(&tag.to_le_bytes());
    buf.extend_from_slice(&(body.len() as u64).to_le_bytes());
    buf.extend_from_slice(body);
    buf
}

struct Connection {
    stream: UnixStream,
    token: Token,
    read: ReadState,
    pending_fd: Option<RawFd>,
    outbox: VecDeque<OutFrame>,
    /// Segment indices whose fd has already been handed to this
    /// connection ("attached only when this client has not
    /// previously mapped that segment").
    sent_segments: HashSet<usize>,
    /// How many references this connection holds per object, for
    /// cleanup on disconnect.
    held_refs: HashMap<ObjectId, i32>,
    subscribed: bool,
    pending_request_ids: HashSet<RequestId>,
}

impl Connection {
    fn new(stream: UnixStream, token: Token) -> Self {
        Self {
            stream,
            token,
            read: ReadState::default(),
            pending_fd: None,
            outbox: VecDeque::new(),
            sent_segments: HashSet::new(),
            held_refs: HashMap::new(),
            subscribed: false,
            pending_request_ids: HashSet::new(),
        }
    }

    fn enqueue(&mut self, tag: Tag, body: Vec<u8>, fd: Option<RawFd>) {
        self.outbox.push_back(OutFrame {
            buf: frame_bytes(tag as u64, &body),
            fd,
            offset: 0,
        });
    }

    fn flush(&mut self) -> io::Result<()> {
        let fd = self.stream.as_raw_fd();
        while let Some(frame) = self.outbox.front_mut() {
            let remaining = &frame.buf[frame.offset..];
            let fd_to_send = if frame.offset == 0 { frame.fd } else { None };
            match send_chunk(fd, remaining, fd_to_send)? {
                None => return Ok(()),
                Some(0) => {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "sendmsg wrote 0 bytes"))
                }
                Some(n) => {
                    frame.offset += n;
                    if frame.offset >= frame.buf.len() {
                        self.outbox.pop_front();
                    }
                }
            }
        }
        Ok(())
    }

    /// Drain as many complete frames as are currently available without
    /// blocking. A `WouldBlock` simply means "nothing more right now";
    /// any other error tears the connection down.
    fn read_frames(&mut self) -> io::Result<Vec<(u64, Vec<u8>, Option<RawFd>)>> {
        let fd = self.stream.as_raw_fd();
        let mut out = Vec::new();
        loop {
            match &mut self.read {
                ReadState::Header { buf, filled } => {
                    if *filled < HEADER_LEN {
                        match recv_chunk(fd, &mut buf[*filled..])? {
                            None => return Ok(out),
                            Some((0, _)) => {
                                return Err(io::Error::new(
                                    io::ErrorKind::UnexpectedEof,
                                    "peer closed the connection",
                                ))
                            }
                            Some((n, maybe_fd)) => {
                                if maybe_fd.is_some() {
                                    self.pending_fd = maybe_fd;
                                }
                                *filled += n;
                            }
                        }
                    }
                    if *filled == HEADER_LEN {
                        let tag = u64::from_le_bytes(buf[0..8].try_into().unwrap());
                        let len = u64::from_le_bytes(buf[8..16].try_into().unwrap()) as usize;
                        self.read = ReadState::Body {
                            tag,
                            body: vec![0u8; len],
                            filled: 0,
                        };
                    }
                }
                ReadState::Body { tag, body, filled } => {
                    if body.is_empty() {
                        let tag = *tag;
                        let fd = self.pending_fd.take();
                        out.push((tag, Vec::new(), fd));
                        self.read = ReadState::default();
                        continue;
                    }
                    match recv_chunk(fd, &mut body[*filled..])? {
                        None => return Ok(out),
                        Some((0, _)) => {
                            return Err(io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                "peer closed the connection",
                            ))
                        }
                        Some((n, maybe_fd)) => {
                            if maybe_fd.is_some() {
                                self.pending_fd = maybe_fd;
                            }
                            *filled += n;
                            if *filled == body.len() {
                                let tag = *tag;
                                let body = std::mem::take(body);
                                let fd = self.pending_fd.take();
                                out.push((tag, body, fd));
                                self.read = ReadState::default();
                            }
                        }
                    }
                }
            }
        }
    }
}

enum PendingKind {
    Get {
        ids: Vec<ObjectId>,
        pinned: HashSet<ObjectId>,
    },
    Wait {
        specs: Vec<ObjectRequestSpec>,
        num_ready: i32,
    },
}

struct PendingRequest {
    token: Token,
    kind: PendingKind,
}

/// Everything the store owns: the object table, the allocator, the
/// eviction candidate list, parked waiters, and the remote-fetch
/// bookkeeping. Connections live alongside this in `Server`
/// rather than inside `Store`, since they need `mio`-specific types the
/// store's core logic shouldn't depend on.
pub struct Store {
    pub table: ObjectTable,
    pub allocator: crate::allocator::SegmentAllocator,
    pub eviction: EvictionList,
    pub waiters: WaiterEngine,
    pub remote: RemoteStatus,
    memory_capacity: i64,
    next_request_id: u64,
    requests: HashMap<RequestId, PendingRequest>,
}

impl Store {
    pub fn new(memory_capacity: i64) -> Self {
        Self {
            table: ObjectTable::new(),
            allocator: crate::allocator::SegmentAllocator::new(memory_capacity),
            eviction: EvictionList::new(),
            waiters: WaiterEngine::new(),
            remote: RemoteStatus::new(),
            memory_capacity,
            next_request_id: 1,
            requests: HashMap::new(),
        }
    }

    fn alloc_request_id(&mut self) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    /// Evict LRU entries until at least `target` bytes have been freed
    /// back into the allocator's free lists, or the candidate set is
    /// exhausted. Returns the evicted ids and the total bytes
    /// freed so the caller can notify subscribers/waiters and report
    /// `Evict`'s byte count.
    fn evict_to_free(&mut self, target: i64) -> (Vec<ObjectId>, i64) {
        let mut freed = 0i64;
        let mut evicted = Vec::new();
        while freed < target {
            let Some(id) = self.eviction.pop_lru() else {
                break;
            };
            if let Some(entry) = self.table.remove_for_eviction(&id) {
                self.allocator
                    .free(entry.segment_index, entry.data_offset as usize, entry.aligned_len);
                freed += entry.aligned_len as i64;
                evicted.push(id);
            }
        }
        (evicted, freed)
    }

    /// Explicit `Evict(num_bytes)`: same mechanism, returns the
    /// number of bytes actually freed.
    pub fn evict(&mut self, num_bytes: i64) -> (i64, Vec<ObjectId>) {
        let (evicted, freed) = self.evict_to_free(num_bytes);
        (freed, evicted)
    }
}

pub struct Config {
    pub socket_path: std::path::PathBuf,
    pub memory_capacity: i64,
}

/// Run the store's event loop until the process is signaled to stop.
/// Binds the UNIX socket at `config.socket_path`; removes a stale socket
/// file left over from a previous run first.
pub fn run(config: Config) -> io::Result<()> {
    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let mut listener = UnixListener::bind(&config.socket_path)?;
    let mut poll = Poll::new()?;
    poll.registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

    let mut store = Store::new(config.memory_capacity);
    let mut connections: HashMap<Token, Connection> = HashMap::new();
    let mut next_token = 1usize;
    let mut events = Events::with_capacity(256);

    log::info!(
        "plasma-store listening on {} (capacity {} bytes)",
        config.socket_path.display(),
        config.memory_capacity
    );

    loop {
        let timeout = next_poll_timeout(&store);
        match poll.poll(&mut events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }

        for event in events.iter() {
            if event.token() == LISTENER_TOKEN {
                accept_loop(&listener, &mut poll, &mut connections, &mut next_token)?;
                continue;
            }

            let token = event.token();
            let mut broken = false;
            if let Some(conn) = connections.get_mut(&token) {
                if event.is_readable() {
                    match conn.read_frames() {
                        Ok(frames) => {
                            for (tag, body, fd) in frames {
                                if let Err(e) =
                                    dispatch(&mut store, &mut connections, token, tag, body, fd)
                                {
                                    log::warn!("connection {token:?} protocol error: {e}");
                                    broken = true;
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            log::debug!("connection {token:?} read error: {e}");
                            broken = true;
                        }
                    }
                }
            }
            if !broken {
                if let Some(conn) = connections.get_mut(&token) {
                    if event.is_writable() || !conn.outbox.is_empty() {
                        if let Err(e) = conn.flush() {
                            log::debug!("connection {token:?} write error: {e}");
                            broken = true;
                        }
                    }
                }
            }
            if broken {
                drop_connection(&mut store, &mut poll, &mut connections, token);
            }
        }

        let now = Instant::now();
        for request_id in store.waiters.expire(now) {
            finish_request(&mut store, &mut connections, request_id, true);
        }

        for (_, conn) in connections.iter_mut() {
            let _ = conn.flush();
        }
    }
}

fn next_poll_timeout(store: &Store) -> Option<Duration> {
    store
        .waiters
        .next_deadline()
        .map(|deadline| deadline.saturating_duration_since(Instant::now()))
}

fn accept_loop(
    listener: &UnixListener,
    poll: &mut Poll,
    connections: &mut HashMap<Token, Connection>,
    next_token: &mut usize,
) -> io::Result<()> {
    loop {
        match listener.accept() {
            Ok((mut stream, _addr)) => {
                let token = Token(*next_token);
                *next_token += 1;
                poll.registry()
                    .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)?;
                log::debug!("accepted connection {token:?}");
                connections.insert(token, Connection::new(stream, token));
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

fn drop_connection(
    store: &mut Store,
    poll: &mut Poll,
    connections: &mut HashMap<Token, Connection>,
    token: Token,
) {
    let Some(mut conn) = connections.remove(&token) else {
        return;
    };
    let _ = poll.registry().deregister(&mut conn.stream);

    for request_id in conn.pending_request_ids.drain() {
        store.waiters.cancel(request_id);
        store.requests.remove(&request_id);
    }

    for (id, count) in conn.held_refs.drain() {
        for _ in 0..count {
            if let Ok(now_zero) = store.table.release(id) {
                if now_zero {
                    finalize_zero_refcount(store, connections, id);
                }
            }
        }
    }
    log::debug!("dropped connection {token:?}");
}

/// Common bookkeeping once an id's refcount has reached zero: mark it
/// evictable if sealed, or reap it if it was pending delete.
fn finalize_zero_refcount(
    store: &mut Store,
    connections: &mut HashMap<Token, Connection>,
    id: ObjectId,
) {
    if let Some((segment_index, offset, len)) = store.table.reap_if_pending(id) {
        store.allocator.free(segment_index, offset as usize, len);
        store.eviction.unmark(&id);
        push_to_subscribers(store, connections, id, Digest::ZERO);
        notify_waiters(store, connections, id);
        return;
    }
    if store.table.contains_sealed(&id) {
        store.eviction.mark_evictable(id);
    }
}

/// Resolve any parked `Get`/`Wait` requests that were waiting on `id`'s
/// status. Safe to call whenever `id`'s sealed/remote/existence status
/// may have changed, even if nothing is actually parked on it.
fn notify_waiters(store: &mut Store, connections: &mut HashMap<Token, Connection>, id: ObjectId) {
    for request_id in store.waiters.notify(&id) {
        finish_request(store, connections, request_id, false);
    }
}

fn dispatch(
    store: &mut Store,
    connections: &mut HashMap<Token, Connection>,
    token: Token,
    tag_val: u64,
    body: Vec<u8>,
    fd: Option<RawFd>,
) -> io::Result<()> {
    let tag = Tag::from_u64(tag_val)?;
    let mut d = Decoder::new(&body);
    match tag {
        Tag::Connect => {
            ConnectRequest::decode(&mut d)?;
            let reply = ConnectReply {
                memory_capacity: store.memory_capacity,
            };
            reply_to(connections, token, Tag::Connect, reply.encode(), None);
        }
        Tag::Create => {
            let req = CreateRequest::decode(&mut d)?;
            handle_create(store, connections, token, req);
        }
        Tag::Seal => {
            let req = SealRequest::decode(&mut d)?;
            handle_seal(store, connections, token, req);
        }
        Tag::Abort => {
            let req = IdRequest::decode(&mut d)?;
            handle_abort(store, connections, token, req);
        }
        Tag::Release => {
            let req = IdRequest::decode(&mut d)?;
            handle_release(store, connections, token, req);
        }
        Tag::Delete => {
            let req = DeleteRequest::decode(&mut d)?;
            handle_delete(store, connections, token, req);
        }
        Tag::Contains => {
            let req = IdRequest::decode(&mut d)?;
            let has_object = store.table.contains_sealed(&req.id);
            let reply = ContainsReply {
                id: req.id,
                has_object,
            };
            reply_to(connections, token, Tag::Contains, reply.encode(), None);
        }
        Tag::List => {
            let reply = ListReply {
                objects: store.table.list(),
            };
            reply_to(connections, token, Tag::List, reply.encode(), None);
        }
        Tag::Get => {
            let req = GetRequest::decode(&mut d)?;
            handle_get(store, connections, token, req);
        }
        Tag::Fetch => {
            // Asynchronous, no reply; the core has no remote
            // fetch manager to kick off, so this is a deliberate no-op.
            let _ = FetchRequest::decode(&mut d)?;
        }
        Tag::Wait => {
            let req = WaitRequest::decode(&mut d)?;
            handle_wait(store, connections, token, req);
        }
        Tag::Evict => {
            let req = EvictRequest::decode(&mut d)?;
            let (freed, evicted) = store.evict(req.num_bytes);
            for id in evicted {
                push_to_subscribers(store, connections, id, Digest::ZERO);
                notify_waiters(store, connections, id);
            }
            let reply = EvictReply { num_bytes: freed };
            reply_to(connections, token, Tag::Evict, reply.encode(), None);
        }
        Tag::Subscribe => {
            if let Some(conn) = connections.get_mut(&token) {
                conn.subscribed = true;
            }
        }
        Tag::Data => {
            let req = DataRequest::decode(&mut d)?;
            store.remote.mark_remote(req.id);
            let entry = store.table.get(&req.id);
            let reply = DataReply {
                id: req.id,
                object_size: entry.map(|e| e.data_size).unwrap_or(0),
                metadata_size: entry.map(|e| e.metadata_size).unwrap_or(0),
            };
            reply_to(connections, token, Tag::Data, reply.encode(), None);
            notify_waiters(store, connections, req.id);
        }
        Tag::Status => {
            let req = StatusRequest::decode(&mut d)?;
            let status = store
                .remote
                .get(&req.id)
                .unwrap_or(ObjectRequestType(0));
            let reply = StatusReply { id: req.id, status };
            reply_to(connections, token, Tag::Status, reply.encode(), None);
        }
        Tag::Push => {
            // Server-to-client only; a client sending this is a
            // protocol violation.
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "client sent a Push frame",
            ));
        }
    }
    let _ = fd; // no request body currently carries a client->server fd
    Ok(())
}

fn reply_to(
    connections: &mut HashMap<Token, Connection>,
    token: Token,
    tag: Tag,
    body: Vec<u8>,
    fd: Option<RawFd>,
) {
    if let Some(conn) = connections.get_mut(&token) {
        conn.enqueue(tag, body, fd);
    }
}

fn handle_create(
    store: &mut Store,
    connections: &mut HashMap<Token, Connection>,
    token: Token,
    req: CreateRequest,
) {
    if store.table.get(&req.id).is_some() {
        let reply = CreateReply {
            id: req.id,
            spec: PlasmaObjectSpec::SENTINEL,
            store_fd_index: -1,
            mmap_size: 0,
            error: crate::error::ErrorCode::ObjectExists as i32,
            ipc_handle: None,
        };
        reply_to(connections, token, Tag::Create, reply.encode(), None);
        return;
    }

    let total = (req.data_size + req.metadata_size).max(0) as usize;
    let mut allocation = store.allocator.alloc(total);
    if allocation.is_none() {
        let (evicted, _) = store.evict_to_free(total as i64);
        for evicted_id in evicted {
            push_to_subscribers(store, connections, evicted_id, Digest::ZERO);
            notify_waiters(store, connections, evicted_id);
        }
        allocation = store.allocator.alloc(total);
    }
    let Some(a) = allocation else {
        let reply = CreateReply {
            id: req.id,
            spec: PlasmaObjectSpec::SENTINEL,
            store_fd_index: -1,
            mmap_size: 0,
            error: crate::error::ErrorCode::OutOfMemory as i32,
            ipc_handle: None,
        };
        reply_to(connections, token, Tag::Create, reply.encode(), None);
        return;
    };

    store
        .table
        .create(
            req.id,
            req.data_size,
            req.metadata_size,
            req.device_num,
            None,
            a.segment_index,
            a.offset as i64,
            a.aligned_len,
        )
        .expect("id checked absent above");

    let segment_size = store.allocator.segment(a.segment_index).size() as i64;
    let conn = connections.get_mut(&token).unwrap();
    *conn.held_refs.entry(req.id).or_insert(0) += 1;
    let fd = if conn.sent_segments.insert(a.segment_index) {
        Some(store.allocator.segment(a.segment_index).raw_fd())
    } else {
        None
    };

    let reply = CreateReply {
        id: req.id,
        spec: PlasmaObjectSpec {
            segment_index: a.segment_index as i32,
            data_offset: a.offset as i64,
            data_size: req.data_size,
            metadata_offset: a.offset as i64 + req.data_size,
            metadata_size: req.metadata_size,
            device_num: req.device_num,
        },
        store_fd_index: a.segment_index as i32,
        mmap_size: segment_size,
        error: crate::error::ErrorCode::Ok as i32,
        ipc_handle: None,
    };
    reply_to(connections, token, Tag::Create, reply.encode(), fd);
}

fn handle_seal(
    store: &mut Store,
    connections: &mut HashMap<Token, Connection>,
    token: Token,
    req: SealRequest,
) {
    let result = store.table.seal(req.id, req.digest);
    // The wire error enum only carries the three admission-era codes;
    // a re-seal attempt (InvalidArgument) has no dedicated code and is
    // reported as Ok, since re-sealing an already-sealed object with
    // the store's recorded digest is harmless to the caller.
    let error = match &result {
        Ok(()) => crate::error::ErrorCode::Ok,
        Err(crate::error::PlasmaError::ObjectNonexistent(_)) => {
            crate::error::ErrorCode::ObjectNonexistent
        }
        Err(_) => crate::error::ErrorCode::Ok,
    };

    if result.is_ok() {
        if let Some(conn) = connections.get_mut(&token) {
            // Sealing drops the creator's implicit reference; mirror
            // that in this connection's own held-ref bookkeeping.
            if let Some(count) = conn.held_refs.get_mut(&req.id) {
                *count -= 1;
            }
        }
        if store.table.get(&req.id).map(|e| e.ref_count == 0).unwrap_or(false) {
            finalize_zero_refcount(store, connections, req.id);
        }
        push_to_subscribers(store, connections, req.id, req.digest);
        notify_waiters(store, connections, req.id);
    }

    let reply = IdErrorReply {
        id: req.id,
        error: error as i32,
    };
    reply_to(connections, token, Tag::Seal, reply.encode(), None);
}

fn handle_abort(
    store: &mut Store,
    connections: &mut HashMap<Token, Connection>,
    token: Token,
    req: IdRequest,
) {
    if let Ok((segment_index, offset, len)) = store.table.abort(req.id) {
        store.allocator.free(segment_index, offset as usize, len);
        if let Some(conn) = connections.get_mut(&token) {
            conn.held_refs.remove(&req.id);
        }
    }
    let reply = AbortReply { id: req.id };
    reply_to(connections, token, Tag::Abort, reply.encode(), None);
}

fn handle_release(
    store: &mut Store,
    connections: &mut HashMap<Token, Connection>,
    token: Token,
    req: IdRequest,
) {
    let result = store.table.release(req.id);
    let error = match &result {
        Ok(_) => crate::error::ErrorCode::Ok,
        Err(crate::error::PlasmaError::ObjectNonexistent(_)) => {
            crate::error::ErrorCode::ObjectNonexistent
        }
        Err(_) => crate::error::ErrorCode::Ok,
    };
    if let Ok(now_zero) = result {
        if let Some(conn) = connections.get_mut(&token) {
            if let Some(count) = conn.held_refs.get_mut(&req.id) {
                *count -= 1;
            }
        }
        if now_zero {
            finalize_zero_refcount(store, connections, req.id);
        }
    }
    let reply = IdErrorReply {
        id: req.id,
        error: error as i32,
    };
    reply_to(connections, token, Tag::Release, reply.encode(), None);
}

fn handle_delete(
    store: &mut Store,
    connections: &mut HashMap<Token, Connection>,
    token: Token,
    req: DeleteRequest,
) {
    let mut errors = Vec::with_capacity(req.ids.len());
    for id in &req.ids {
        match store.table.delete(*id) {
            Ok(Some((segment_index, offset, len))) => {
                store.allocator.free(segment_index, offset as usize, len);
                store.eviction.unmark(id);
                push_to_subscribers(store, connections, *id, Digest::ZERO);
                notify_waiters(store, connections, *id);
                errors.push(crate::error::ErrorCode::Ok as i32);
            }
            Ok(None) => {
                // Deferred: ref holders still own it; it will be freed
                // when the last Release drains it to zero.
                errors.push(crate::error::ErrorCode::Ok as i32);
            }
            Err(_) => errors.push(crate::error::ErrorCode::ObjectNonexistent as i32),
        }
    }
    let reply = DeleteReply {
        ids: req.ids,
        errors,
    };
    reply_to(connections, token, Tag::Delete, reply.encode(), None);
}

/// Pin `id` for `token`'s connection: bumps the table refcount, takes it
/// off the eviction candidate list, and credits the connection's
/// `held_refs` immediately so the pin is released on disconnect even if
/// the `Get`/`Wait` reply that would otherwise account for it is never
/// sent (e.g. the connection drops while the request is still parked).
fn pin_for_connection(
    store: &mut Store,
    connections: &mut HashMap<Token, Connection>,
    token: Token,
    id: ObjectId,
) {
    store.table.pin(&id);
    store.eviction.unmark(&id);
    if let Some(conn) = connections.get_mut(&token) {
        *conn.held_refs.entry(id).or_insert(0) += 1;
    }
}

fn handle_get(
    store: &mut Store,
    connections: &mut HashMap<Token, Connection>,
    token: Token,
    req: GetRequest,
) {
    let mut pinned = HashSet::new();
    let mut remaining = Vec::new();
    for id in &req.ids {
        if store.table.contains_sealed(id) {
            pin_for_connection(store, connections, token, *id);
            pinned.insert(*id);
        } else {
            remaining.push(*id);
        }
    }

    if req.timeout_ms == 0 || remaining.is_empty() {
        send_get_reply(store, connections, token, req.ids, pinned);
        return;
    }

    let deadline = if req.timeout_ms < 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(req.timeout_ms as u64))
    };
    let request_id = store.alloc_request_id();
    let need = remaining.len();
    store.waiters.register(request_id, remaining, need, deadline);
    if let Some(conn) = connections.get_mut(&token) {
        conn.pending_request_ids.insert(request_id);
    }
    store.requests.insert(
        request_id,
        PendingRequest {
            token,
            kind: PendingKind::Get {
                ids: req.ids,
                pinned,
            },
        },
    );
}

fn send_get_reply(
    store: &mut Store,
    connections: &mut HashMap<Token, Connection>,
    token: Token,
    ids: Vec<ObjectId>,
    pinned: HashSet<ObjectId>,
) {
    let mut specs = Vec::with_capacity(ids.len());
    let mut needed_segments: Vec<usize> = Vec::new();
    let mut ipc_handles = Vec::with_capacity(ids.len());

    for id in &ids {
        if pinned.contains(id) {
            let entry = store.table.get(id).expect("pinned entry must exist");
            specs.push(PlasmaObjectSpec {
                segment_index: entry.segment_index as i32,
                data_offset: entry.data_offset,
                data_size: entry.data_size,
                metadata_offset: entry.metadata_offset(),
                metadata_size: entry.metadata_size,
                device_num: entry.device_num,
            });
            if !needed_segments.contains(&entry.segment_index) {
                needed_segments.push(entry.segment_index);
            }
            ipc_handles.push(entry.ipc_handle.clone());
        } else {
            specs.push(PlasmaObjectSpec::SENTINEL);
            ipc_handles.push(None);
        }
    }

    // `held_refs` was already credited by `pin_for_connection` at the
    // moment each id was pinned, not here — that's what lets
    // `drop_connection` release these pins even if this reply never ends
    // up being sent (connection drops while the request is still parked).
    let conn = connections.get_mut(&token).unwrap();

    // Only one fd can ride a single frame, so at most one newly-seen
    // segment's fd is attached per `Get` reply. Mark *only* that segment
    // as sent: any other never-before-sent segment in this batch must
    // stay unmarked so a later request's reply still attaches its fd
    // instead of silently leaving it unmappable on this client.
    let mut store_fds = Vec::new();
    let mut mmap_sizes = Vec::new();
    for segment_index in needed_segments {
        if store_fds.is_empty() && !conn.sent_segments.contains(&segment_index) {
            conn.sent_segments.insert(segment_index);
            store_fds.push(store.allocator.segment(segment_index).raw_fd());
            mmap_sizes.push(store.allocator.segment(segment_index).size() as i64);
        }
    }
    let fd = store_fds.first().copied();
    let reply = GetReply {
        ids,
        specs,
        store_fds,
        mmap_sizes,
        ipc_handles,
    };
    conn.enqueue(Tag::Get, reply.encode(), fd);
}

fn handle_wait(
    store: &mut Store,
    connections: &mut HashMap<Token, Connection>,
    token: Token,
    req: WaitRequest,
) {
    let statuses: Vec<ObjectRequestType> = req
        .specs
        .iter()
        .map(|s| current_status(store, &s.id))
        .collect();
    let satisfied = req
        .specs
        .iter()
        .zip(&statuses)
        .filter(|(s, st)| st.contains(s.request_type))
        .count();

    if req.timeout_ms == 0 || satisfied as i32 >= req.num_ready {
        send_wait_reply(connections, token, req.specs, statuses, satisfied as i32);
        return;
    }

    let remaining: Vec<ObjectId> = req
        .specs
        .iter()
        .zip(&statuses)
        .filter(|(s, st)| st.0 & s.request_type.0 == 0)
        .map(|(s, _)| s.id)
        .collect();
    let need = (req.num_ready as usize).saturating_sub(satisfied);
    let deadline = if req.timeout_ms < 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(req.timeout_ms as u64))
    };
    let request_id = store.alloc_request_id();
    store.waiters.register(request_id, remaining, need.max(1), deadline);
    if let Some(conn) = connections.get_mut(&token) {
        conn.pending_request_ids.insert(request_id);
    }
    store.requests.insert(
        request_id,
        PendingRequest {
            token,
            kind: PendingKind::Wait {
                specs: req.specs,
                num_ready: req.num_ready,
            },
        },
    );
}

fn current_status(store: &Store, id: &ObjectId) -> ObjectRequestType {
    let mut flags = 0u32;
    if store.table.contains_sealed(id) {
        flags |= ObjectRequestType::LOCAL.0;
    }
    if let Some(remote) = store.remote.get(id) {
        flags |= remote.0;
    }
    if store.table.get(id).is_none() && store.remote.get(id).is_none() {
        flags |= ObjectRequestType::NONEXISTENT.0;
    }
    ObjectRequestType(flags)
}

fn send_wait_reply(
    connections: &mut HashMap<Token, Connection>,
    token: Token,
    specs: Vec<ObjectRequestSpec>,
    statuses: Vec<ObjectRequestType>,
    num_ready: i32,
) {
    let replies = specs
        .into_iter()
        .zip(statuses)
        .map(|(s, status)| ObjectReply { id: s.id, status })
        .collect();
    let reply = WaitReply { replies, num_ready };
    reply_to(connections, token, Tag::Wait, reply.encode(), None);
}

/// Finish a parked `Get`/`Wait` request, either because its ids resolved
/// or because its deadline fired (`timed_out`). Re-derives the reply
/// from current store state so a late seal that raced the timeout is
/// still reflected correctly.
fn finish_request(
    store: &mut Store,
    connections: &mut HashMap<Token, Connection>,
    request_id: RequestId,
    _timed_out: bool,
) {
    let Some(pending) = store.requests.remove(&request_id) else {
        return;
    };
    if let Some(conn) = connections.get_mut(&pending.token) {
        conn.pending_request_ids.remove(&request_id);
    }
    match pending.kind {
        PendingKind::Get { ids, mut pinned } => {
            for id in &ids {
                if !pinned.contains(id) && store.table.contains_sealed(id) {
                    pin_for_connection(store, connections, pending.token, *id);
                    pinned.insert(*id);
                }
            }
            send_get_reply(store, connections, pending.token, ids, pinned);
        }
        PendingKind::Wait { specs, num_ready: _ } => {
            let statuses: Vec<ObjectRequestType> =
                specs.iter().map(|s| current_status(store, &s.id)).collect();
            let satisfied = specs
                .iter()
                .zip(&statuses)
                .filter(|(s, st)| st.contains(s.request_type))
                .count() as i32;
            send_wait_reply(connections, pending.token, specs, statuses, satisfied);
        }
    }
}

fn push_to_subscribers(
    store: &Store,
    connections: &mut HashMap<Token, Connection>,
    id: ObjectId,
    _digest: Digest,
) {
    let Some(entry_info) = store.table.get(&id).map(|e| e.to_info(id)) else {
        // Deleted: synthesize an ObjectInfo with an empty digest, per
        // the lifecycle note ("notify subscribers" on delete).
        let info = ObjectInfo {
            id,
            data_size: 0,
            metadata_size: 0,
            ref_count: 0,
            create_time: 0,
            construct_duration: 0,
            digest: Digest::ZERO,
        };
        broadcast(connections, info);
        return;
    };
    broadcast(connections, entry_info);
}

fn broadcast(connections: &mut HashMap<Token, Connection>, info: ObjectInfo) {
    let msg = PushMessage { info };
    let body = msg.encode();
    let mut dead = Vec::new();
    for (token, conn) in connections.iter_mut() {
        if !conn.subscribed {
            continue;
        }
        conn.enqueue(Tag::Push, body.clone(), None);
        if conn.flush().is_err() {
            dead.push(*token);
        }
    }
    // Connections that failed to take a push are torn down on the next
    // event-loop readiness check rather than here, to avoid removing
    // from `connections` while iterating it.
    for token in dead {
        if let Some(conn) = connections.get_mut(&token) {
            conn.subscribed = false;
        }
    }
}
