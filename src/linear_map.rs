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

//! Dynamic hash table using linear hashing.
//!
//! The table grows by one bucket at a time: whenever an insertion
//! leaves its destination bucket with more entries than a single block
//! carries, the bucket at `split_next` is split one level deeper and
//! its entries redistributed. No stop-the-world rehash ever happens.

use log::trace;

use crate::{block_list::BlockList, traits::Key};

/// Two-level bucket addressing. Buckets below `split_next` have been
/// split one extra level, so they address with one more bit.
pub(crate) fn address(hash: u64, bits: u32, split_next: usize) -> usize {
    let bucket = (hash % (1u64 << bits)) as usize;
    if bucket < split_next {
        (hash % (1u64 << (bits + 1))) as usize
    } else {
        bucket
    }
}

/// Linear-hashing map over `BlockList` buckets.
pub struct LinearHashMap<K, V> {
    buckets: Vec<BlockList<K, V>>,
    bits: u32,
    split_next: usize,
    records: usize,
    block_capacity: usize,
}

impl<K: Key, V: Copy> LinearHashMap<K, V> {
    /// New map with `n_init` buckets (a power of two) of blocks
    /// holding `block_capacity` entries each.
    pub fn new(n_init: usize, block_capacity: usize) -> Self {
        assert!(
            n_init.is_power_of_two(),
            "initial bucket count must be a power of two"
        );
        LinearHashMap {
            buckets: (0..n_init).map(|_| BlockList::new(block_capacity)).collect(),
            bits: n_init.trailing_zeros(),
            split_next: 0,
            records: 0,
            block_capacity,
        }
    }

    fn bucket_of(&self, key: &K) -> usize {
        address(key.bucket_hash(), self.bits, self.split_next)
    }

    /// Value stored under `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        self.buckets[self.bucket_of(key)].get(key)
    }

    /// Insert `key ↦ value`, replacing any previous value.
    pub fn put(&mut self, key: K, value: V) {
        let bucket = self.bucket_of(&key);
        let len_before = self.buckets[bucket].len();
        self.buckets[bucket].put(key, value);
        if self.buckets[bucket].len() > len_before {
            self.records += 1;
            if self.buckets[bucket].len() > self.block_capacity {
                self.split();
            }
        }
    }

    /// Insert `key ↦ value` unless present; returns the stored value
    /// and whether the key was new.
    pub fn get_or_add(&mut self, key: K, value: V) -> (V, bool) {
        let bucket = self.bucket_of(&key);
        let (stored, added) = self.buckets[bucket].get_or_add(key, value);
        if added {
            self.records += 1;
            if self.buckets[bucket].len() > self.block_capacity {
                self.split();
            }
        }
        (stored, added)
    }

    /// Remove `key` and return its value.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let bucket = self.bucket_of(key);
        let removed = self.buckets[bucket].remove(key);
        if removed.is_some() {
            self.records -= 1;
        }
        removed
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.records
    }

    /// Whether the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Visit every entry, bucket by bucket.
    pub fn for_each<F: FnMut(&K, V)>(&self, mut f: F) {
        for bucket in &self.buckets {
            bucket.for_each(&mut f);
        }
    }

    /// Number of buckets currently addressed.
    pub fn buckets(&self) -> usize {
        self.buckets.len()
    }

    /// The next bucket to be split.
    pub fn split_next(&self) -> usize {
        self.split_next
    }

    /// Current address width in bits.
    pub fn bits(&self) -> u32 {
        self.bits
    }

    fn split(&mut self) {
        let source = self.split_next;
        let new_index = self.buckets.len();
        let entries = self.buckets[source].entries();

        self.buckets.push(BlockList::new(self.block_capacity));
        self.buckets[source].clear();

        let next_bits = self.bits + 1;
        for (key, value) in entries {
            let bucket = address(key.bucket_hash(), next_bits, 0);
            debug_assert!(bucket == source || bucket == new_index);
            self.buckets[bucket].put(key, value);
        }

        self.split_next += 1;
        if self.split_next == 1 << self.bits {
            self.bits += 1;
            self.split_next = 0;
        }
        trace!(
            target: "index",
            "split bucket {source} into {new_index}; {} buckets, {} bits, next split {}",
            self.buckets.len(), self.bits, self.split_next,
        );
    }
}
