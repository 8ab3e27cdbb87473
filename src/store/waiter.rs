// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// Wait/notify engine: parked `Get`/`Wait` requests keyed by the
// object ids they still need, resolved on seal/delete, and a deadline
// min-heap for timeouts. This module only tracks *which* parked request
// becomes ready; the request's payload (which connection to reply to,
// what kind of reply to build) lives in `store::server`, keyed by the
// same `RequestId`.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::time::Instant;

use crate::object_id::ObjectId;

pub type RequestId = u64;

struct ParkedRequest {
    ids_pending: HashSet<ObjectId>,
    /// How many more distinct ids from `ids_pending` must notify before
    /// this request is ready. `Get` sets this to `ids.len()` (every id
    /// must resolve); `Wait` sets it to `num_ready` minus however many
    /// specs were already satisfied at registration time, since it only
    /// needs a threshold count, not all of them.
    need: usize,
    deadline: Option<Instant>,
}

/// Per-object waiter lists plus a deadline heap. A request is
/// "ready" once every id it's waiting on has resolved, or the deadline
/// fires first.
#[derive(Default)]
pub struct WaiterEngine {
    requests: HashMap<RequestId, ParkedRequest>,
    by_object: HashMap<ObjectId, HashSet<RequestId>>,
    timers: BinaryHeap<Reverse<(Instant, RequestId)>>,
}

impl WaiterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a request on the given set of still-unresolved ids, ready
    /// once `need` distinct ids among them have notified. `ids` is
    /// already filtered down to the ones that aren't satisfied yet (the
    /// caller resolves already-sealed ids, or already-satisfied `Wait`
    /// specs, before calling this). `deadline` of `None` means "wait
    /// forever". `need == ids.len()` gives `Get`'s AND semantics;
    /// `need < ids.len()` gives `Wait`'s "any `need` of these" semantics.
    pub fn register(
        &mut self,
        request_id: RequestId,
        ids: Vec<ObjectId>,
        need: usize,
        deadline: Option<Instant>,
    ) {
        for id in &ids {
            self.by_object.entry(*id).or_default().insert(request_id);
        }
        if let Some(d) = deadline {
            self.timers.push(Reverse((d, request_id)));
        }
        self.requests.insert(
            request_id,
            ParkedRequest {
                ids_pending: ids.into_iter().collect(),
                need,
                deadline,
            },
        );
    }

    /// Called when `id` transitions to a state that can satisfy waiters
    /// on it (sealed, or deleted while still `Created`/missing — the
    /// caller decides which ids to notify for). Returns every request id
    /// that is now fully resolved (ready for its reply to be sent) and
    /// removes them from internal bookkeeping.
    pub fn notify(&mut self, id: &ObjectId) -> Vec<RequestId> {
        let Some(waiters) = self.by_object.remove(id) else {
            return Vec::new();
        };
        let mut ready = Vec::new();
        for req_id in waiters {
            if let Some(req) = self.requests.get_mut(&req_id) {
                if req.ids_pending.remove(id) {
                    req.need = req.need.saturating_sub(1);
                }
                if req.need == 0 {
                    self.requests.remove(&req_id);
                    ready.push(req_id);
                }
            }
        }
        ready
    }

    /// Drop all bookkeeping for `request_id` (used on timeout or
    /// connection loss). Idempotent.
    pub fn cancel(&mut self, request_id: RequestId) {
        if let Some(req) = self.requests.remove(&request_id) {
            for id in req.ids_pending {
                if let Some(set) = self.by_object.get_mut(&id) {
                    set.remove(&request_id);
                    if set.is_empty() {
                        self.by_object.remove(&id);
                    }
                }
            }
        }
    }

    /// Pop every request whose deadline has passed as of `now`. Requests
    /// already resolved (and thus absent from `self.requests`) are
    /// silently skipped — their timer entry is stale.
    pub fn expire(&mut self, now: Instant) -> Vec<RequestId> {
        let mut expired = Vec::new();
        while let Some(Reverse((deadline, _))) = self.timers.peek() {
            if *deadline > now {
                break;
            }
            let Reverse((_, request_id)) = self.timers.pop().unwrap();
            if self.requests.contains_key(&request_id) {
                self.cancel(request_id);
                expired.push(request_id);
            }
        }
        expired
    }

    /// The earliest pending deadline, if any — used to bound the event
    /// loop's poll timeout.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|Reverse((d, _))| *d)
    }

    pub fn is_pending(&self, request_id: RequestId) -> bool {
        self.requests.contains_key(&request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id(b: u8) -> ObjectId {
        ObjectId::new([b; crate::object_id::ID_SIZE])
    }

    #[test]
    fn resolves_when_all_ids_notified() {
        let mut w = WaiterEngine::new();
        w.register(1, vec![id(1), id(2)], 2, None);
        assert!(w.notify(&id(1)).is_empty());
        assert_eq!(w.notify(&id(2)), vec![1]);
    }

    #[test]
    fn resolves_after_threshold_without_every_id() {
        // Wait-style: 1 of 2 specs is enough.
        let mut w = WaiterEngine::new();
        w.register(1, vec![id(1), id(2)], 1, None);
        assert_eq!(w.notify(&id(1)), vec![1]);
        // Second id notifying afterwards is a no-op; the request is gone.
        assert!(w.notify(&id(2)).is_empty());
    }

    #[test]
    fn cancel_removes_from_reverse_index() {
        let mut w = WaiterEngine::new();
        w.register(1, vec![id(1), id(2)], 2, None);
        w.cancel(1);
        assert!(w.notify(&id(1)).is_empty());
        assert!(w.notify(&id(2)).is_empty());
    }

    #[test]
    fn expire_only_pops_passed_deadlines() {
        let mut w = WaiterEngine::new();
        let now = Instant::now();
        w.register(1, vec![id(1)], 1, Some(now));
        w.register(2, vec![id(2)], 1, Some(now + Duration::from_secs(60)));
        let expired = w.expire(now);
        assert_eq!(expired, vec![1]);
        assert!(w.is_pending(2));
    }

    #[test]
    fn resolved_request_ignored_on_later_expire() {
        let mut w = WaiterEngine::new();
        let now = Instant::now();
        w.register(1, vec![id(1)], 1, Some(now));
        assert_eq!(w.notify(&id(1)), vec![1]);
        assert!(w.expire(now).is_empty());
    }
}
