// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 plasma-store contributors
//
// A shared-memory object store: clients create, seal, and map immutable
// objects backed by memfd segments; the store arbitrates admission,
// eviction, and wait/notify over a UNIX-domain socket protocol.

pub mod allocator;
pub mod client;
pub mod error;
pub mod object_id;
pub mod segment;
pub mod store;
pub mod wire;

pub use client::PlasmaClient;
pub use error::{PlasmaError, PlasmaResult};
pub use object_id::{Digest, ObjectId};
pub use store::{Config, Store};
