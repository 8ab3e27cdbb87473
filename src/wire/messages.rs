// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// Request/reply bodies for every tag in the protocol table. Each
// type owns a `encode`/`decode` pair built on the primitives in `codec`.
// Decoders only consume the fields they know about: any bytes left in the
// body past that point are unknown trailing fields and are dropped,
// which is what makes the codec forward-compatible.

use std::io;

use crate::object_id::{Digest, ObjectId};
use crate::wire::codec::{Decoder, Encoder};

/// Wire tag. A closed, versioned enumeration; values must never be
/// reused across incompatible layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Tag {
    Connect = 1,
    Create = 2,
    Seal = 3,
    Abort = 4,
    Release = 5,
    Delete = 6,
    Contains = 7,
    List = 8,
    Get = 9,
    Fetch = 10,
    Wait = 11,
    Evict = 12,
    Subscribe = 13,
    Data = 14,
    Status = 15,
    /// Server-to-client push: an `ObjectInfo` delivered on a subscription
    /// channel. Not part of the request/reply table but shares the
    /// same framing.
    Push = 16,
}

impl Tag {
    pub fn from_u64(v: u64) -> io::Result<Self> {
        Ok(match v {
            1 => Tag::Connect,
            2 => Tag::Create,
            3 => Tag::Seal,
            4 => Tag::Abort,
            5 => Tag::Release,
            6 => Tag::Delete,
            7 => Tag::Contains,
            8 => Tag::List,
            9 => Tag::Get,
            10 => Tag::Fetch,
            11 => Tag::Wait,
            12 => Tag::Evict,
            13 => Tag::Subscribe,
            14 => Tag::Data,
            15 => Tag::Status,
            16 => Tag::Push,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown tag {other}"),
                ))
            }
        })
    }
}

/// `{segment_index, data_offset, data_size, metadata_offset, metadata_size,
/// device_num}`. `segment_index == -1, data_size == 0` is the
/// sentinel for a missing/unresolved object in a `Get` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlasmaObjectSpec {
    pub segment_index: i32,
    pub data_offset: i64,
    pub data_size: i64,
    pub metadata_offset: i64,
    pub metadata_size: i64,
    pub device_num: i32,
}

impl PlasmaObjectSpec {
    pub const SENTINEL: PlasmaObjectSpec = PlasmaObjectSpec {
        segment_index: -1,
        data_offset: 0,
        data_size: 0,
        metadata_offset: 0,
        metadata_size: 0,
        device_num: 0,
    };

    pub fn encode(&self, e: &mut Encoder) {
        e.put_i32(self.segment_index);
        e.put_i64(self.data_offset);
        e.put_i64(self.data_size);
        e.put_i64(self.metadata_offset);
        e.put_i64(self.metadata_size);
        e.put_i32(self.device_num);
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(PlasmaObjectSpec {
            segment_index: d.get_i32()?,
            data_offset: d.get_i64()?,
            data_size: d.get_i64()?,
            metadata_offset: d.get_i64()?,
            metadata_size: d.get_i64()?,
            device_num: d.get_i32()?,
        })
    }
}

/// `{id, data_size, metadata_size, ref_count, create_time, construct_duration,
/// digest}`; an all-zero digest means the object is still `Created`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub id: ObjectId,
    pub data_size: i64,
    pub metadata_size: i64,
    pub ref_count: i32,
    pub create_time: i64,
    pub construct_duration: i64,
    pub digest: Digest,
}

impl ObjectInfo {
    pub fn encode(&self, e: &mut Encoder) {
        e.put_id(&self.id);
        e.put_i64(self.data_size);
        e.put_i64(self.metadata_size);
        e.put_i32(self.ref_count);
        e.put_i64(self.create_time);
        e.put_i64(self.construct_duration);
        e.put_digest(&self.digest);
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(ObjectInfo {
            id: d.get_id()?,
            data_size: d.get_i64()?,
            metadata_size: d.get_i64()?,
            ref_count: d.get_i32()?,
            create_time: d.get_i64()?,
            construct_duration: d.get_i64()?,
            digest: d.get_digest()?,
        })
    }
}

fn put_opt_bytes(e: &mut Encoder, v: &Option<Vec<u8>>) {
    match v {
        Some(bytes) => {
            e.put_bool(true);
            e.put_bytes(bytes);
        }
        None => e.put_bool(false),
    }
}

fn get_opt_bytes(d: &mut Decoder) -> io::Result<Option<Vec<u8>>> {
    if d.get_bool()? {
        Ok(Some(d.get_bytes()?))
    } else {
        Ok(None)
    }
}

pub struct ConnectRequest;

impl ConnectRequest {
    pub fn encode(&self) -> Vec<u8> {
        Encoder::new().into_bytes()
    }

    pub fn decode(_d: &mut Decoder) -> io::Result<Self> {
        Ok(ConnectRequest)
    }
}

pub struct ConnectReply {
    pub memory_capacity: i64,
}

impl ConnectReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_i64(self.memory_capacity);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(ConnectReply {
            memory_capacity: d.get_i64()?,
        })
    }
}

pub struct CreateRequest {
    pub id: ObjectId,
    pub data_size: i64,
    pub metadata_size: i64,
    pub device_num: i32,
}

impl CreateRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_id(&self.id);
        e.put_i64(self.data_size);
        e.put_i64(self.metadata_size);
        e.put_i32(self.device_num);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(CreateRequest {
            id: d.get_id()?,
            data_size: d.get_i64()?,
            metadata_size: d.get_i64()?,
            device_num: d.get_i32()?,
        })
    }
}

pub struct CreateReply {
    pub id: ObjectId,
    pub spec: PlasmaObjectSpec,
    pub store_fd_index: i32,
    pub mmap_size: i64,
    pub error: i32,
    pub ipc_handle: Option<Vec<u8>>,
}

impl CreateReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_id(&self.id);
        self.spec.encode(&mut e);
        e.put_i32(self.store_fd_index);
        e.put_i64(self.mmap_size);
        e.put_i32(self.error);
        put_opt_bytes(&mut e, &self.ipc_handle);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(CreateReply {
            id: d.get_id()?,
            spec: PlasmaObjectSpec::decode(d)?,
            store_fd_index: d.get_i32()?,
            mmap_size: d.get_i64()?,
            error: d.get_i32()?,
            ipc_handle: get_opt_bytes(d)?,
        })
    }
}

pub struct SealRequest {
    pub id: ObjectId,
    pub digest: Digest,
}

impl SealRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_id(&self.id);
        e.put_digest(&self.digest);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(SealRequest {
            id: d.get_id()?,
            digest: d.get_digest()?,
        })
    }
}

pub struct IdErrorReply {
    pub id: ObjectId,
    pub error: i32,
}

impl IdErrorReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_id(&self.id);
        e.put_i32(self.error);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(IdErrorReply {
            id: d.get_id()?,
            error: d.get_i32()?,
        })
    }
}

pub struct IdRequest {
    pub id: ObjectId,
}

impl IdRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_id(&self.id);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(IdRequest { id: d.get_id()? })
    }
}

pub struct AbortReply {
    pub id: ObjectId,
}

impl AbortReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_id(&self.id);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(AbortReply { id: d.get_id()? })
    }
}

pub struct DeleteRequest {
    pub ids: Vec<ObjectId>,
}

impl DeleteRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_vec(&self.ids, |e, id| e.put_id(id));
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(DeleteRequest {
            ids: d.get_vec(|d| d.get_id())?,
        })
    }
}

pub struct DeleteReply {
    pub ids: Vec<ObjectId>,
    pub errors: Vec<i32>,
}

impl DeleteReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_vec(&self.ids, |e, id| e.put_id(id));
        e.put_vec(&self.errors, |e, v| e.put_i32(*v));
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(DeleteReply {
            ids: d.get_vec(|d| d.get_id())?,
            errors: d.get_vec(|d| d.get_i32())?,
        })
    }
}

pub struct ContainsReply {
    pub id: ObjectId,
    pub has_object: bool,
}

impl ContainsReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_id(&self.id);
        e.put_bool(self.has_object);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(ContainsReply {
            id: d.get_id()?,
            has_object: d.get_bool()?,
        })
    }
}

pub struct ListReply {
    pub objects: Vec<ObjectInfo>,
}

impl ListReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_vec(&self.objects, |e, o| o.encode(e));
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(ListReply {
            objects: d.get_vec(ObjectInfo::decode)?,
        })
    }
}

pub struct GetRequest {
    pub ids: Vec<ObjectId>,
    pub timeout_ms: i64,
}

impl GetRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_vec(&self.ids, |e, id| e.put_id(id));
        e.put_i64(self.timeout_ms);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(GetRequest {
            ids: d.get_vec(|d| d.get_id())?,
            timeout_ms: d.get_i64()?,
        })
    }
}

pub struct GetReply {
    pub ids: Vec<ObjectId>,
    pub specs: Vec<PlasmaObjectSpec>,
    pub store_fds: Vec<i32>,
    pub mmap_sizes: Vec<i64>,
    pub ipc_handles: Vec<Option<Vec<u8>>>,
}

impl GetReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_vec(&self.ids, |e, id| e.put_id(id));
        e.put_vec(&self.specs, |e, s| s.encode(e));
        e.put_vec(&self.store_fds, |e, v| e.put_i32(*v));
        e.put_vec(&self.mmap_sizes, |e, v| e.put_i64(*v));
        e.put_vec(&self.ipc_handles, |e, v| put_opt_bytes(e, v));
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(GetReply {
            ids: d.get_vec(|d| d.get_id())?,
            specs: d.get_vec(PlasmaObjectSpec::decode)?,
            store_fds: d.get_vec(|d| d.get_i32())?,
            mmap_sizes: d.get_vec(|d| d.get_i64())?,
            ipc_handles: d.get_vec(get_opt_bytes)?,
        })
    }
}

pub struct FetchRequest {
    pub ids: Vec<ObjectId>,
}

impl FetchRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_vec(&self.ids, |e, id| e.put_id(id));
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(FetchRequest {
            ids: d.get_vec(|d| d.get_id())?,
        })
    }
}

/// Condition an id must reach to satisfy a `Wait`. `Local`
/// corresponds to `state == Sealed` in this store; `Remote` and
/// `Nonexistent` are reported by the external fetch manager and are opaque
/// here — the core only tracks whether they were asserted via `Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRequestType(pub u32);

impl ObjectRequestType {
    pub const LOCAL: ObjectRequestType = ObjectRequestType(1);
    pub const REMOTE: ObjectRequestType = ObjectRequestType(2);
    pub const NONEXISTENT: ObjectRequestType = ObjectRequestType(4);

    pub fn contains(self, flag: ObjectRequestType) -> bool {
        self.0 & flag.0 != 0
    }

    pub fn union(self, other: ObjectRequestType) -> ObjectRequestType {
        ObjectRequestType(self.0 | other.0)
    }
}

pub struct ObjectRequestSpec {
    pub id: ObjectId,
    pub request_type: ObjectRequestType,
}

impl ObjectRequestSpec {
    pub fn encode(&self, e: &mut Encoder) {
        e.put_id(&self.id);
        e.put_u32(self.request_type.0);
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(ObjectRequestSpec {
            id: d.get_id()?,
            request_type: ObjectRequestType(d.get_u32()?),
        })
    }
}

pub struct ObjectReply {
    pub id: ObjectId,
    pub status: ObjectRequestType,
}

impl ObjectReply {
    pub fn encode(&self, e: &mut Encoder) {
        e.put_id(&self.id);
        e.put_u32(self.status.0);
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(ObjectReply {
            id: d.get_id()?,
            status: ObjectRequestType(d.get_u32()?),
        })
    }
}

pub struct WaitRequest {
    pub specs: Vec<ObjectRequestSpec>,
    pub num_ready: i32,
    pub timeout_ms: i64,
}

impl WaitRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_vec(&self.specs, |e, s| s.encode(e));
        e.put_i32(self.num_ready);
        e.put_i64(self.timeout_ms);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(WaitRequest {
            specs: d.get_vec(ObjectRequestSpec::decode)?,
            num_ready: d.get_i32()?,
            timeout_ms: d.get_i64()?,
        })
    }
}

pub struct WaitReply {
    pub replies: Vec<ObjectReply>,
    pub num_ready: i32,
}

impl WaitReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_vec(&self.replies, |e, r| r.encode(e));
        e.put_i32(self.num_ready);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(WaitReply {
            replies: d.get_vec(ObjectReply::decode)?,
            num_ready: d.get_i32()?,
        })
    }
}

pub struct EvictRequest {
    pub num_bytes: i64,
}

impl EvictRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_i64(self.num_bytes);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(EvictRequest {
            num_bytes: d.get_i64()?,
        })
    }
}

pub struct EvictReply {
    pub num_bytes: i64,
}

impl EvictReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_i64(self.num_bytes);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(EvictReply {
            num_bytes: d.get_i64()?,
        })
    }
}

pub struct SubscribeRequest;

impl SubscribeRequest {
    pub fn encode(&self) -> Vec<u8> {
        Encoder::new().into_bytes()
    }

    pub fn decode(_d: &mut Decoder) -> io::Result<Self> {
        Ok(SubscribeRequest)
    }
}

/// `Data(id, address, port)` — informs the core that a remote fetch manager
/// is willing to source `id` from `address:port`; opaque to the core beyond
/// recording the sizes it's told about.
pub struct DataRequest {
    pub id: ObjectId,
    pub address: String,
    pub port: i32,
}

impl DataRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_id(&self.id);
        e.put_str(&self.address);
        e.put_i32(self.port);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(DataRequest {
            id: d.get_id()?,
            address: d.get_str()?,
            port: d.get_i32()?,
        })
    }
}

pub struct DataReply {
    pub id: ObjectId,
    pub object_size: i64,
    pub metadata_size: i64,
}

impl DataReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_id(&self.id);
        e.put_i64(self.object_size);
        e.put_i64(self.metadata_size);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(DataReply {
            id: d.get_id()?,
            object_size: d.get_i64()?,
            metadata_size: d.get_i64()?,
        })
    }
}

/// `Status(id)` — asks the external fetch manager (opaque here) whether an
/// id is known remotely; the reply's status feeds `ObjectRequestType`.
pub struct StatusRequest {
    pub id: ObjectId,
}

impl StatusRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_id(&self.id);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(StatusRequest { id: d.get_id()? })
    }
}

pub struct StatusReply {
    pub id: ObjectId,
    pub status: ObjectRequestType,
}

impl StatusReply {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        e.put_id(&self.id);
        e.put_u32(self.status.0);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(StatusReply {
            id: d.get_id()?,
            status: ObjectRequestType(d.get_u32()?),
        })
    }
}

/// A `Push` body — an `ObjectInfo` sent on a subscription channel.
pub struct PushMessage {
    pub info: ObjectInfo,
}

impl PushMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut e = Encoder::new();
        self.info.encode(&mut e);
        e.into_bytes()
    }

    pub fn decode(d: &mut Decoder) -> io::Result<Self> {
        Ok(PushMessage {
            info: ObjectInfo::decode(d)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> ObjectId {
        ObjectId::new([byte; crate::object_id::ID_SIZE])
    }

    #[test]
    fn create_reply_round_trips() {
        let msg = CreateReply {
            id: id(1),
            spec: PlasmaObjectSpec {
                segment_index: 2,
                data_offset: 64,
                data_size: 16,
                metadata_offset: 80,
                metadata_size: 4,
                device_num: 0,
            },
            store_fd_index: 2,
            mmap_size: 4096,
            error: 0,
            ipc_handle: None,
        };
        let bytes = msg.encode();
        let mut d = Decoder::new(&bytes);
        let back = CreateReply::decode(&mut d).unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.spec, msg.spec);
        assert_eq!(back.store_fd_index, msg.store_fd_index);
        assert_eq!(back.mmap_size, msg.mmap_size);
        assert_eq!(back.ipc_handle, None);
    }

    #[test]
    fn get_reply_round_trips_with_sentinel() {
        let msg = GetReply {
            ids: vec![id(1), id(2)],
            specs: vec![
                PlasmaObjectSpec {
                    segment_index: 0,
                    data_offset: 0,
                    data_size: 16,
                    metadata_offset: 16,
                    metadata_size: 4,
                    device_num: 0,
                },
                PlasmaObjectSpec::SENTINEL,
            ],
            store_fds: vec![0],
            mmap_sizes: vec![4096],
            ipc_handles: vec![None, None],
        };
        let bytes = msg.encode();
        let mut d = Decoder::new(&bytes);
        let back = GetReply::decode(&mut d).unwrap();
        assert_eq!(back.ids, msg.ids);
        assert_eq!(back.specs, msg.specs);
        assert_eq!(back.specs[1], PlasmaObjectSpec::SENTINEL);
    }

    #[test]
    fn forward_compatible_trailing_fields_are_ignored() {
        let mut e = Encoder::new();
        e.put_id(&id(9));
        e.put_bool(true);
        e.put_i64(12345); // a field from a hypothetical future version
        let bytes = e.into_bytes();

        let mut d = Decoder::new(&bytes);
        let decoded = ContainsReply::decode(&mut d).unwrap();
        assert_eq!(decoded.id, id(9));
        assert!(decoded.has_object);
        // 8 unread trailing bytes remain; a forward-compatible reader never
        // needs to look at them.
        assert_eq!(d.remaining(), 8);
    }

    #[test]
    fn delete_reply_preserves_order() {
        let msg = DeleteReply {
            ids: vec![id(1), id(2)],
            errors: vec![0, 2],
        };
        let bytes = msg.encode();
        let mut d = Decoder::new(&bytes);
        let back = DeleteReply::decode(&mut d).unwrap();
        assert_eq!(back.ids, msg.ids);
        assert_eq!(back.errors, msg.errors);
    }
}
