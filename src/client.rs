// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// The client side of the protocol: a blocking connection over a
// UNIX-domain socket, a cache of mapped segments keyed by the index the
// store assigned them, and the request/reply round trips for every
// operation in the protocol table. One `PlasmaClient` owns one socket;
// callers that need concurrent access open one client per thread.

use std::collections::HashMap;
use std::io;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use crate::error::{ErrorCode, PlasmaError, PlasmaResult};
use crate::object_id::{Digest, ObjectId};
use crate::segment::Segment;
use crate::wire::fd_channel::FdChannel;
use crate::wire::messages::*;

/// A mapped view onto an object's payload and metadata, borrowed from the
/// client's cached `Segment` for as long as the caller holds a reference
/// (released explicitly via `PlasmaClient::release`).
pub struct ObjectBuffer<'a> {
    pub data: &'a [u8],
    pub metadata: &'a [u8],
}

/// What the client remembers locally about an object it has created, is
/// reading, or has been told about via `List`/`Get`. The store
/// remains authoritative; this is purely a client-side cache to avoid
/// redundant round trips and to know which segment an id's bytes live in.
#[derive(Debug, Clone, Copy)]
struct ClientView {
    spec: PlasmaObjectSpec,
    sealed: bool,
}

/// A blocking Plasma client. Wraps one `UnixStream`, a per-id view
/// cache, and a cache of `Segment` mappings keyed by `segment_index` so a
/// segment is mapped at most once per client for its whole lifetime.
pub struct PlasmaClient {
    channel: FdChannel,
    memory_capacity: i64,
    views: HashMap<ObjectId, ClientView>,
    segments: HashMap<i32, Segment>,
}

impl PlasmaClient {
    /// Connect to a running store at `socket_path` and perform the initial
    /// `Connect` handshake to learn its memory capacity.
    pub fn connect<P: AsRef<Path>>(socket_path: P) -> PlasmaResult<Self> {
        let stream = UnixStream::connect(socket_path)?;
        let mut channel = FdChannel::new(stream);
        channel.send(Tag::Connect as u64, &ConnectRequest.encode(), None)?;
        let frame = channel.recv()?;
        let mut d = crate::wire::codec::Decoder::new(&frame.body);
        let reply = ConnectReply::decode(&mut d)?;
        Ok(PlasmaClient {
            channel,
            memory_capacity: reply.memory_capacity,
            views: HashMap::new(),
            segments: HashMap::new(),
        })
    }

    pub fn memory_capacity(&self) -> i64 {
        self.memory_capacity
    }

    /// `Create(id, data_size, metadata_size)`. The returned buffer
    /// is writable until `seal` is called; the creator holds the sole
    /// implicit reference until then.
    pub fn create(
        &mut self,
        id: ObjectId,
        data_size: i64,
        metadata_size: i64,
    ) -> PlasmaResult<()> {
        let req = CreateRequest {
            id,
            data_size,
            metadata_size,
            device_num: 0,
        };
        self.channel
            .send(Tag::Create as u64, &req.encode(), None)?;
        let frame = self.channel.recv()?;
        let mut d = crate::wire::codec::Decoder::new(&frame.body);
        let reply = CreateReply::decode(&mut d)?;
        ErrorCode::from_i32(reply.error)?.into_result(id)?;

        if let Some(fd) = frame.fd {
            let segment = Segment::from_fd(fd, reply.mmap_size as usize)?;
            self.segments.insert(reply.spec.segment_index, segment);
        }
        self.views.insert(
            id,
            ClientView {
                spec: reply.spec,
                sealed: false,
            },
        );
        Ok(())
    }

    /// Mutable access to a just-created, not-yet-sealed object's data and
    /// metadata ranges, for the caller to fill in before `seal`.
    pub fn mutable_buffer(&self, id: &ObjectId) -> PlasmaResult<(&mut [u8], &mut [u8])> {
        let view = self.view_for(id)?;
        let segment = self.segment_for(&view)?;
        let data = segment.slice_mut(view.spec.data_offset as usize, view.spec.data_size as usize);
        let metadata = segment.slice_mut(
            view.spec.metadata_offset as usize,
            view.spec.metadata_size as usize,
        );
        Ok((data, metadata))
    }

    /// `Seal(id, digest)`: freezes the object read-only and drops
    /// the creator's implicit reference.
    pub fn seal(&mut self, id: ObjectId, digest: Digest) -> PlasmaResult<()> {
        let req = SealRequest { id, digest };
        self.channel.send(Tag::Seal as u64, &req.encode(), None)?;
        let frame = self.channel.recv()?;
        let mut d = crate::wire::codec::Decoder::new(&frame.body);
        let reply = IdErrorReply::decode(&mut d)?;
        ErrorCode::from_i32(reply.error)?.into_result(id)?;
        if let Some(view) = self.views.get_mut(&id) {
            view.sealed = true;
        }
        Ok(())
    }

    /// `Abort(id)`: releases a `Created` object back to the store
    /// without sealing it. Only legal while the creator holds the sole
    /// reference.
    pub fn abort(&mut self, id: ObjectId) -> PlasmaResult<()> {
        let req = IdRequest { id };
        self.channel.send(Tag::Abort as u64, &req.encode(), None)?;
        let frame = self.channel.recv()?;
        let mut d = crate::wire::codec::Decoder::new(&frame.body);
        AbortReply::decode(&mut d)?;
        self.views.remove(&id);
        Ok(())
    }

    /// `Get(ids, timeout_ms)`: blocks (up to `timeout`, or forever
    /// if `None`) until every id is sealed or the deadline passes, then
    /// returns a view per id (`None` where the store still has nothing for
    /// that id when the call returns).
    pub fn get(
        &mut self,
        ids: &[ObjectId],
        timeout: Option<Duration>,
    ) -> PlasmaResult<Vec<Option<ObjectBuffer<'_>>>> {
        let req = GetRequest {
            ids: ids.to_vec(),
            timeout_ms: timeout.map_or(-1, |d| d.as_millis() as i64),
        };
        self.channel.send(Tag::Get as u64, &req.encode(), None)?;
        let frame = self.channel.recv()?;
        let mut d = crate::wire::codec::Decoder::new(&frame.body);
        let reply = GetReply::decode(&mut d)?;

        if let Some(fd) = frame.fd {
            // At most one new segment fd rides per frame, sized by
            // the first entry of `mmap_sizes`; the store attaches it for
            // whichever spec is the first one naming a segment this
            // client hasn't mapped yet.
            let size = reply.mmap_sizes.first().copied().unwrap_or(0) as usize;
            for spec in &reply.specs {
                if spec.segment_index >= 0 && !self.segments.contains_key(&spec.segment_index) {
                    let segment = Segment::from_fd(fd, size)?;
                    self.segments.insert(spec.segment_index, segment);
                    break;
                }
            }
        }

        for (id, spec) in reply.ids.iter().zip(reply.specs.iter()) {
            if spec.segment_index >= 0 {
                self.views.insert(
                    *id,
                    ClientView {
                        spec: *spec,
                        sealed: true,
                    },
                );
            }
        }

        let mut out = Vec::with_capacity(reply.ids.len());
        for spec in &reply.specs {
            if spec.segment_index < 0 {
                out.push(None);
                continue;
            }
            match self.segments.get(&spec.segment_index) {
                Some(segment) => out.push(Some(ObjectBuffer {
                    data: segment.slice(spec.data_offset as usize, spec.data_size as usize),
                    metadata: segment
                        .slice(spec.metadata_offset as usize, spec.metadata_size as usize),
                })),
                None => out.push(None),
            }
        }
        Ok(out)
    }

    /// `Release(id)`: drop the reference handed out by a previous
    /// `get`/`wait` resolution.
    pub fn release(&mut self, id: ObjectId) -> PlasmaResult<()> {
        let req = IdRequest { id };
        self.channel
            .send(Tag::Release as u64, &req.encode(), None)?;
        let frame = self.channel.recv()?;
        let mut d = crate::wire::codec::Decoder::new(&frame.body);
        let reply = IdErrorReply::decode(&mut d)?;
        ErrorCode::from_i32(reply.error)?.into_result(id)
    }

    /// `Delete(ids)`: immediate if unpinned, deferred otherwise.
    pub fn delete(&mut self, ids: &[ObjectId]) -> PlasmaResult<Vec<PlasmaResult<()>>> {
        let req = DeleteRequest { ids: ids.to_vec() };
        self.channel
            .send(Tag::Delete as u64, &req.encode(), None)?;
        let frame = self.channel.recv()?;
        let mut d = crate::wire::codec::Decoder::new(&frame.body);
        let reply = DeleteReply::decode(&mut d)?;
        let mut out = Vec::with_capacity(reply.ids.len());
        for (id, code) in reply.ids.iter().zip(reply.errors.iter()) {
            self.views.remove(id);
            out.push(ErrorCode::from_i32(*code)?.into_result(*id));
        }
        Ok(out)
    }

    /// `Contains(id)`.
    pub fn contains(&mut self, id: ObjectId) -> PlasmaResult<bool> {
        let req = IdRequest { id };
        self.channel
            .send(Tag::Contains as u64, &req.encode(), None)?;
        let frame = self.channel.recv()?;
        let mut d = crate::wire::codec::Decoder::new(&frame.body);
        let reply = ContainsReply::decode(&mut d)?;
        Ok(reply.has_object)
    }

    /// `List()`: every object the store currently knows about.
    pub fn list(&mut self) -> PlasmaResult<Vec<ObjectInfo>> {
        self.channel.send(Tag::List as u64, &[], None)?;
        let frame = self.channel.recv()?;
        let mut d = crate::wire::codec::Decoder::new(&frame.body);
        let reply = ListReply::decode(&mut d)?;
        Ok(reply.objects)
    }

    /// `Wait(specs, num_ready, timeout_ms)`: blocks until `num_ready`
    /// of the given id/condition pairs are satisfied or the deadline
    /// passes.
    pub fn wait(
        &mut self,
        specs: Vec<ObjectRequestSpec>,
        num_ready: i32,
        timeout: Option<Duration>,
    ) -> PlasmaResult<WaitReply> {
        let req = WaitRequest {
            specs,
            num_ready,
            timeout_ms: timeout.map_or(-1, |d| d.as_millis() as i64),
        };
        self.channel.send(Tag::Wait as u64, &req.encode(), None)?;
        let frame = self.channel.recv()?;
        let mut d = crate::wire::codec::Decoder::new(&frame.body);
        Ok(WaitReply::decode(&mut d)?)
    }

    /// `Evict(num_bytes)`: asks the store to free at least
    /// `num_bytes` from its LRU list of sealed, unpinned objects; returns
    /// how many bytes were actually freed.
    pub fn evict(&mut self, num_bytes: i64) -> PlasmaResult<i64> {
        let req = EvictRequest { num_bytes };
        self.channel
            .send(Tag::Evict as u64, &req.encode(), None)?;
        let frame = self.channel.recv()?;
        let mut d = crate::wire::codec::Decoder::new(&frame.body);
        let reply = EvictReply::decode(&mut d)?;
        Ok(reply.num_bytes)
    }

    /// `Subscribe()`: after this call, every subsequent `recv` on
    /// this connection may also surface a `Push` notification; callers
    /// that subscribe should drive their own read loop via
    /// `recv_push`/`channel_mut` rather than issuing further requests on
    /// the same socket.
    pub fn subscribe(&mut self) -> PlasmaResult<()> {
        self.channel
            .send(Tag::Subscribe as u64, &SubscribeRequest.encode(), None)?;
        Ok(())
    }

    /// Block for the next `Push` notification on a subscribed connection.
    pub fn recv_push(&mut self) -> PlasmaResult<ObjectInfo> {
        let frame = self.channel.recv()?;
        if frame.tag != Tag::Push as u64 {
            return Err(PlasmaError::InvalidArgument(format!(
                "expected Push, got tag {}",
                frame.tag
            )));
        }
        let mut d = crate::wire::codec::Decoder::new(&frame.body);
        Ok(PushMessage::decode(&mut d)?.info)
    }

    fn view_for(&self, id: &ObjectId) -> PlasmaResult<ClientView> {
        self.views
            .get(id)
            .copied()
            .ok_or(PlasmaError::ObjectNonexistent(*id))
    }

    fn segment_for(&self, view: &ClientView) -> io::Result<&Segment> {
        self.segments.get(&view.spec.segment_index).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("segment {} not mapped", view.spec.segment_index),
            )
        })
    }
}
