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

//! Ordered list of sorted fixed-capacity blocks.
//!
//! The bucket payload of the linear-hashing map. Keys are unique
//! across the whole list; every block except the tail is full, so a
//! removal backfills the freed slot from the tail.

/// Entry container of up to `capacity` sorted entries per block.
pub struct BlockList<K, V> {
    blocks: Vec<Vec<(K, V)>>,
    capacity: usize,
    len: usize,
}

impl<K: Ord + Clone, V: Copy> BlockList<K, V> {
    /// New list with the given per-block capacity.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "block capacity must be positive");
        BlockList {
            blocks: Vec::new(),
            capacity,
            len: 0,
        }
    }

    fn position(&self, key: &K) -> Option<(usize, usize)> {
        for (block_index, block) in self.blocks.iter().enumerate() {
            if let Ok(entry_index) = block.binary_search_by(|probe| probe.0.cmp(key)) {
                return Some((block_index, entry_index));
            }
        }
        None
    }

    /// Value stored under `key`, if any.
    pub fn get(&self, key: &K) -> Option<V> {
        self.position(key)
            .map(|(block, entry)| self.blocks[block][entry].1)
    }

    /// Insert `key ↦ value`, replacing any previous value.
    pub fn put(&mut self, key: K, value: V) {
        match self.position(&key) {
            Some((block, entry)) => self.blocks[block][entry].1 = value,
            None => self.push_new(key, value),
        }
    }

    /// Insert `key ↦ value` unless the key is present; returns the
    /// stored value and whether the key was new.
    pub fn get_or_add(&mut self, key: K, value: V) -> (V, bool) {
        match self.position(&key) {
            Some((block, entry)) => (self.blocks[block][entry].1, false),
            None => {
                self.push_new(key, value);
                (value, true)
            }
        }
    }

    fn push_new(&mut self, key: K, value: V) {
        if self.blocks.last().is_none_or(|tail| tail.len() == self.capacity) {
            self.blocks.push(Vec::with_capacity(self.capacity));
        }
        let tail = self
            .blocks
            .last_mut()
            .expect("a tail block was just ensured; qed");
        let position = match tail.binary_search_by(|probe| probe.0.cmp(&key)) {
            Ok(position) | Err(position) => position,
        };
        tail.insert(position, (key, value));
        self.len += 1;
    }

    /// Remove `key` and return its value. A removal from a non-tail
    /// block pulls one entry out of the tail into the freed block, so
    /// every block but the tail stays full.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let (block_index, entry_index) = self.position(key)?;
        let (_, value) = self.blocks[block_index].remove(entry_index);
        self.len -= 1;

        let tail_index = self.blocks.len() - 1;
        if block_index != tail_index {
            let (moved_key, moved_value) = self.blocks[tail_index]
                .pop()
                .expect("a hit before the tail implies a non-empty tail; qed");
            let block = &mut self.blocks[block_index];
            let position = match block.binary_search_by(|probe| probe.0.cmp(&moved_key)) {
                Ok(position) | Err(position) => position,
            };
            block.insert(position, (moved_key, moved_value));
        }
        if self.blocks.last().is_some_and(|tail| tail.is_empty()) {
            self.blocks.pop();
        }
        Some(value)
    }

    /// Number of entries across all blocks.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the list holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of chained blocks.
    pub fn blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Visit every entry, block by block.
    pub fn for_each<F: FnMut(&K, V)>(&self, mut f: F) {
        for block in &self.blocks {
            for (key, value) in block {
                f(key, *value);
            }
        }
    }

    /// All entries, block by block.
    pub fn entries(&self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.len);
        self.for_each(|key, value| out.push((key.clone(), value)));
        out
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.len = 0;
    }
}
