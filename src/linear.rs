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

//! In-memory `KeyIndex` over the linear-hashing map.
//!
//! Same contract as `MemoryIndex`, but the key lookup structure is the
//! growable bucket table that the paged backend mirrors on disk.

use ethereum_types::H256;

use crate::{
    error::{Error, Result},
    hash_chain::HashChain,
    linear_map::LinearHashMap,
    snapshot::IndexSnapshot,
    traits::{Key, KeyIndex, Ordinal},
};

const DEFAULT_BUCKETS: usize = 16;
const DEFAULT_BLOCK_CAPACITY: usize = 64;

/// Index backed by a [`LinearHashMap`].
pub struct LinearIndex<K> {
    map: LinearHashMap<K, Ordinal>,
    keys: Vec<K>,
    chain: HashChain<K>,
    closed: bool,
}

impl<K: Key> LinearIndex<K> {
    /// New empty index with default table parameters.
    pub fn new() -> Self {
        Self::with_parameters(DEFAULT_BUCKETS, DEFAULT_BLOCK_CAPACITY)
    }

    /// New empty index over `n_init` buckets (a power of two) of
    /// `block_capacity`-entry blocks.
    pub fn with_parameters(n_init: usize, block_capacity: usize) -> Self {
        LinearIndex {
            map: LinearHashMap::new(n_init, block_capacity),
            keys: Vec::new(),
            chain: HashChain::new(),
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl<K: Key> Default for LinearIndex<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key> KeyIndex<K> for LinearIndex<K> {
    fn get_or_add(&mut self, key: &K) -> Result<(Ordinal, bool)> {
        self.ensure_open()?;
        let next = self.keys.len() as Ordinal;
        let (ordinal, added) = self.map.get_or_add(key.clone(), next);
        if added {
            self.keys.push(key.clone());
            self.chain.add(key);
        }
        Ok((ordinal, added))
    }

    fn get(&self, key: &K) -> Result<Ordinal> {
        self.ensure_open()?;
        self.map.get(key).ok_or(Error::NotFound)
    }

    fn contains(&self, key: &K) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.map.get(key).is_some())
    }

    fn len(&self) -> Result<Ordinal> {
        self.ensure_open()?;
        Ok(self.keys.len() as Ordinal)
    }

    fn state_hash(&mut self) -> Result<H256> {
        self.ensure_open()?;
        Ok(self.chain.commit())
    }

    fn flush(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.chain.commit();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.closed = true;
        Ok(())
    }

    fn create_snapshot(&mut self) -> Result<IndexSnapshot<K>> {
        self.ensure_open()?;
        self.chain.commit();
        Ok(IndexSnapshot::from_keys(self.keys.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryIndex;
    use ethereum_types::H160;

    #[test]
    fn agrees_with_the_memory_index() {
        let mut linear = LinearIndex::with_parameters(2, 4);
        let mut memory = MemoryIndex::new();

        for i in 0..500u64 {
            // Duplicates interleaved with fresh keys.
            let key = H160::from_low_u64_be(i % 350);
            assert_eq!(
                linear.get_or_add(&key).unwrap(),
                memory.get_or_add(&key).unwrap()
            );
        }

        assert_eq!(linear.len().unwrap(), memory.len().unwrap());
        assert_eq!(linear.state_hash().unwrap(), memory.state_hash().unwrap());
        for i in 0..350u64 {
            let key = H160::from_low_u64_be(i);
            assert_eq!(linear.get(&key).unwrap(), memory.get(&key).unwrap());
        }
    }

    #[test]
    fn survives_many_splits() {
        let mut index = LinearIndex::with_parameters(2, 3);
        for i in 0..1000u64 {
            let (ordinal, added) = index.get_or_add(&H160::from_low_u64_be(i)).unwrap();
            assert_eq!(ordinal, i as u32);
            assert!(added);
        }
        for i in 0..1000u64 {
            assert_eq!(index.get(&H160::from_low_u64_be(i)).unwrap(), i as u32);
        }
    }

    #[test]
    fn closes_once() {
        let mut index = LinearIndex::<H160>::new();
        index.close().unwrap();
        assert!(matches!(index.close(), Err(Error::Closed)));
        assert!(matches!(
            index.get_or_add(&H160::zero()),
            Err(Error::Closed)
        ));
    }
}
