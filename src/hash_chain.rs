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

//! Chained hash over the key insertion sequence.
//!
//! The accumulator folds one serialized key at a time:
//! `h ← SHA256(h ‖ key)`. Newly added keys are buffered and folded in
//! on `commit`, so batching insertions costs nothing extra.

use ethereum_types::H256;
use sha2::{Digest, Sha256};

use crate::traits::Key;

/// One fold step of the chain.
pub(crate) fn fold(hash: &H256, key_bytes: &[u8]) -> H256 {
    let mut hasher = Sha256::new();
    hasher.update(hash.as_bytes());
    hasher.update(key_bytes);
    H256(hasher.finalize().into())
}

/// Accumulator over the insertion order, with a buffer of keys not yet
/// folded in.
pub struct HashChain<K> {
    hash: H256,
    pending: Vec<K>,
}

impl<K: Key> HashChain<K> {
    /// A fresh chain with a zero accumulator.
    pub fn new() -> Self {
        Self::with_hash(H256::zero())
    }

    /// Resume from a previously committed accumulator.
    pub fn with_hash(hash: H256) -> Self {
        HashChain {
            hash,
            pending: Vec::new(),
        }
    }

    /// Buffer a newly inserted key.
    pub fn add(&mut self, key: &K) {
        self.pending.push(key.clone());
    }

    /// Fold all pending keys into the accumulator and return it.
    /// The buffer and the accumulator change together; a partial fold
    /// is never observable.
    pub fn commit(&mut self) -> H256 {
        if !self.pending.is_empty() {
            self.hash = self.peek();
            self.pending.clear();
        }
        self.hash
    }

    /// The accumulator as it would be after `commit`, without
    /// committing. Used where the new hash must be persisted before
    /// the in-memory state may change.
    pub fn peek(&self) -> H256 {
        let mut hash = self.hash;
        for key in &self.pending {
            hash = fold(&hash, key.as_bytes());
        }
        hash
    }

    /// The committed accumulator. Pending keys are not reflected.
    pub fn hash(&self) -> H256 {
        self.hash
    }

    /// Whether keys are buffered but not yet folded in.
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Reset to a zero accumulator and an empty buffer.
    pub fn clear(&mut self) {
        self.hash = H256::zero();
        self.pending.clear();
    }
}

impl<K: Key> Default for HashChain<K> {
    fn default() -> Self {
        Self::new()
    }
}
