// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// The store-side authoritative object table: one `ObjectEntry` per
// live object, keyed by `ObjectIdentifier`, with the
// `Created -> Sealed -> Deleted` lifecycle and per-entry refcounting.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{PlasmaError, PlasmaResult};
use crate::object_id::{Digest, ObjectId};
use crate::wire::messages::ObjectInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    Created,
    Sealed,
}

/// One entry per live object. `segment_index`/`data_offset` are the
/// allocator's view of where the payload lives; `metadata_offset` is
/// always `data_offset + data_size` since data and metadata are
/// contiguous.
#[derive(Debug, Clone)]
pub struct ObjectEntry {
    pub state: ObjectState,
    pub data_size: i64,
    pub metadata_size: i64,
    pub segment_index: usize,
    pub data_offset: i64,
    /// The aligned length reserved by the allocator; needed to free the
    /// exact range back on delete/abort.
    pub aligned_len: usize,
    pub ref_count: i32,
    pub digest: Digest,
    pub create_time: i64,
    pub construct_duration: i64,
    pub device_num: i32,
    pub ipc_handle: Option<Vec<u8>>,
    /// Set by `Delete` when the object is still pinned: the entry
    /// is removed as soon as `ref_count` reaches zero.
    pub pending_delete: bool,
}

impl ObjectEntry {
    pub fn metadata_offset(&self) -> i64 {
        self.data_offset + self.data_size
    }

    pub fn to_info(&self, id: ObjectId) -> ObjectInfo {
        ObjectInfo {
            id,
            data_size: self.data_size,
            metadata_size: self.metadata_size,
            ref_count: self.ref_count,
            create_time: self.create_time,
            construct_duration: self.construct_duration,
            digest: if self.state == ObjectState::Sealed {
                self.digest
            } else {
                Digest::ZERO
            },
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Outcome of a successful `Create`, handed back to the caller so it can
/// reply with a `PlasmaObjectSpec` and decide whether a new segment fd
/// needs to be attached.
pub struct CreateOutcome {
    pub segment_index: usize,
    pub data_offset: i64,
    pub aligned_len: usize,
}

pub struct ObjectTable {
    entries: HashMap<ObjectId, ObjectEntry>,
}

impl ObjectTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, id: &ObjectId) -> Option<&ObjectEntry> {
        self.entries.get(id)
    }

    pub fn contains_sealed(&self, id: &ObjectId) -> bool {
        matches!(self.entries.get(id), Some(e) if e.state == ObjectState::Sealed)
    }

    pub fn list(&self) -> Vec<ObjectInfo> {
        self.entries.iter().map(|(id, e)| e.to_info(*id)).collect()
    }

    /// Insert a freshly allocated `Created` entry. Fails with
    /// `ObjectExists` if `id` is already present; the allocation itself
    /// has already happened by the time this is called, so admission
    /// failure (`OutOfMemory`) is handled by the caller before reaching
    /// here.
    pub fn create(
        &mut self,
        id: ObjectId,
        data_size: i64,
        metadata_size: i64,
        device_num: i32,
        ipc_handle: Option<Vec<u8>>,
        segment_index: usize,
        data_offset: i64,
        aligned_len: usize,
    ) -> PlasmaResult<()> {
        if self.entries.contains_key(&id) {
            return Err(PlasmaError::ObjectExists(id));
        }
        self.entries.insert(
            id,
            ObjectEntry {
                state: ObjectState::Created,
                data_size,
                metadata_size,
                segment_index,
                data_offset,
                aligned_len,
                ref_count: 1,
                digest: Digest::ZERO,
                create_time: now_millis(),
                construct_duration: 0,
                device_num,
                ipc_handle,
                pending_delete: false,
            },
        );
        Ok(())
    }

    /// `Seal(id, digest)`. Rejects sealing an unknown id or an
    /// already-sealed one (re-seal is always forbidden).
    /// Decrements the creator's implicit reference by one on success.
    pub fn seal(&mut self, id: ObjectId, digest: Digest) -> PlasmaResult<()> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(PlasmaError::ObjectNonexistent(id))?;
        if entry.state == ObjectState::Sealed {
            return Err(PlasmaError::InvalidArgument(format!(
                "object {id} is already sealed"
            )));
        }
        entry.state = ObjectState::Sealed;
        entry.digest = digest;
        entry.construct_duration = (now_millis() - entry.create_time).max(0);
        entry.ref_count -= 1;
        Ok(())
    }

    /// `Abort(id)`: only legal while `Created` and the creator
    /// holds the sole reference. Returns the freed range so the caller
    /// can release it back to the allocator.
    pub fn abort(&mut self, id: ObjectId) -> PlasmaResult<(usize, i64, usize)> {
        let entry = self
            .entries
            .get(&id)
            .ok_or(PlasmaError::ObjectNonexistent(id))?;
        if entry.state != ObjectState::Created {
            return Err(PlasmaError::InvalidArgument(format!(
                "object {id} is not in Created state"
            )));
        }
        if entry.ref_count != 1 {
            return Err(PlasmaError::InvalidArgument(format!(
                "object {id} has outstanding references"
            )));
        }
        let removed = self.entries.remove(&id).unwrap();
        Ok((
            removed.segment_index,
            removed.data_offset,
            removed.aligned_len,
        ))
    }

    /// Increment an entry's refcount (used by `Get`/`Wait` resolution
    /// when handing out a reference).
    pub fn pin(&mut self, id: &ObjectId) {
        if let Some(e) = self.entries.get_mut(id) {
            e.ref_count += 1;
        }
    }

    /// `Release(id)`: decrement refcount. Returns `true` if the object is
    /// now at refcount zero (and thus evictable if sealed, or should be
    /// removed if `pending_delete`).
    pub fn release(&mut self, id: ObjectId) -> PlasmaResult<bool> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(PlasmaError::ObjectNonexistent(id))?;
        if entry.ref_count <= 0 {
            return Err(PlasmaError::InvalidArgument(format!(
                "object {id} has no outstanding references to release"
            )));
        }
        entry.ref_count -= 1;
        Ok(entry.ref_count == 0)
    }

    /// Mark (or immediately perform) a `Delete(id)`. Returns
    /// `Some((segment_index, offset, aligned_len))` if the entry was
    /// removed immediately (refcount was already zero), or `None` if it
    /// was only marked pending and will be removed by a later `release`.
    pub fn delete(&mut self, id: ObjectId) -> PlasmaResult<Option<(usize, i64, usize)>> {
        let entry = self
            .entries
            .get_mut(&id)
            .ok_or(PlasmaError::ObjectNonexistent(id))?;
        if entry.ref_count > 0 {
            entry.pending_delete = true;
            return Ok(None);
        }
        let removed = self.entries.remove(&id).unwrap();
        Ok(Some((
            removed.segment_index,
            removed.data_offset,
            removed.aligned_len,
        )))
    }

    /// Called after a `release` drops an entry's refcount to zero: if it
    /// was marked `pending_delete`, remove it now and return the freed
    /// range.
    pub fn reap_if_pending(&mut self, id: ObjectId) -> Option<(usize, i64, usize)> {
        let pending = matches!(self.entries.get(&id), Some(e) if e.ref_count == 0 && e.pending_delete);
        if !pending {
            return None;
        }
        let removed = self.entries.remove(&id)?;
        Some((
            removed.segment_index,
            removed.data_offset,
            removed.aligned_len,
        ))
    }

    /// Force-remove an entry (used by the eviction engine). Caller is
    /// responsible for having verified it is sealed and unpinned.
    pub fn remove_for_eviction(&mut self, id: &ObjectId) -> Option<ObjectEntry> {
        self.entries.remove(id)
    }
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> ObjectId {
        ObjectId::new([b; crate::object_id::ID_SIZE])
    }

    #[test]
    fn create_then_seal_then_contains() {
        let mut t = ObjectTable::new();
        t.create(id(1), 16, 4, 0, None, 0, 0, 64).unwrap();
        assert!(!t.contains_sealed(&id(1)));
        t.seal(id(1), Digest::new([0xAA; 20])).unwrap();
        assert!(t.contains_sealed(&id(1)));
        assert_eq!(t.get(&id(1)).unwrap().ref_count, 0);
    }

    #[test]
    fn create_duplicate_rejected() {
        let mut t = ObjectTable::new();
        t.create(id(1), 16, 4, 0, None, 0, 0, 64).unwrap();
        assert!(matches!(
            t.create(id(1), 16, 4, 0, None, 0, 64, 64),
            Err(PlasmaError::ObjectExists(_))
        ));
    }

    #[test]
    fn reseal_is_rejected() {
        let mut t = ObjectTable::new();
        t.create(id(1), 16, 4, 0, None, 0, 0, 64).unwrap();
        t.seal(id(1), Digest::new([0xAA; 20])).unwrap();
        assert!(matches!(
            t.seal(id(1), Digest::new([0xBB; 20])),
            Err(PlasmaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn abort_requires_sole_reference() {
        let mut t = ObjectTable::new();
        t.create(id(1), 16, 4, 0, None, 0, 0, 64).unwrap();
        t.pin(&id(1));
        assert!(matches!(
            t.abort(id(1)),
            Err(PlasmaError::InvalidArgument(_))
        ));
        t.release(id(1)).unwrap();
        t.abort(id(1)).unwrap();
        assert!(t.get(&id(1)).is_none());
    }

    #[test]
    fn delete_defers_while_pinned() {
        let mut t = ObjectTable::new();
        t.create(id(1), 16, 4, 0, None, 0, 0, 64).unwrap();
        t.seal(id(1), Digest::new([0xAA; 20])).unwrap();
        t.pin(&id(1));
        let outcome = t.delete(id(1)).unwrap();
        assert!(outcome.is_none());
        assert!(t.get(&id(1)).unwrap().pending_delete);
        assert!(t.release(id(1)).unwrap());
        assert!(t.reap_if_pending(id(1)).is_some());
        assert!(t.get(&id(1)).is_none());
    }

    #[test]
    fn delete_missing_id_is_nonexistent() {
        let mut t = ObjectTable::new();
        assert!(matches!(
            t.delete(id(9)),
            Err(PlasmaError::ObjectNonexistent(_))
        ));
    }
}
