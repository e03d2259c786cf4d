// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of OpenEthereum.

// OpenEthereum is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// OpenEthereum is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with OpenEthereum.  If not, see <http://www.gnu.org/licenses/>.

//! Append-only index mapping fixed-width keys to dense ordinals.
//!
//! Every key gets the next free ordinal on first sight and keeps it
//! forever; the ordinal then identifies the key in the downstream
//! state stores. The index carries a verifiable state hash — a
//! SHA-256 chain over the key sequence in insertion order — so that
//! nodes which ingested the same keys agree byte-for-byte on their
//! state, regardless of which backend they run:
//!
//! - [`MemoryIndex`] — plain hash map, volatile;
//! - [`LinearIndex`] — in-memory linear-hashing table;
//! - [`PagedIndex`] — linear hashing over an on-disk paged bucket
//!   file with an LRU page pool;
//! - [`KvIndex`] — rows in an external [`kvdb::KeyValueDB`] under a
//!   per-index table-space prefix.
//!
//! [`CachedIndex`] adds a read-through LRU in front of any of them,
//! and [`IndexArray`] fans operations out to several backends to
//! check they agree. State replication between nodes goes through
//! the chunked, per-part-provable [`snapshot`] protocol.

mod array;
mod block_list;
mod cached;
mod error;
mod hash_chain;
mod kv;
mod linear;
mod linear_map;
mod memory;
mod paged;
pub mod snapshot;
mod traits;

pub use crate::{
    array::IndexArray,
    block_list::BlockList,
    cached::CachedIndex,
    error::{Error, Result},
    hash_chain::HashChain,
    kv::{KvIndex, WritePolicy},
    linear::LinearIndex,
    linear_map::LinearHashMap,
    memory::MemoryIndex,
    paged::{PagedIndex, PagedIndexConfig, PAGE_SIZE},
    snapshot::{IndexSnapshot, SnapshotSource},
    traits::{Key, KeyIndex, Ordinal, ORDINAL_SIZE},
};
