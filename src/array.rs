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

//! Cross-implementation equivalence harness.
//!
//! Runs every operation against all wrapped indexes and insists on
//! identical results; any disagreement surfaces as a `Divergence`
//! error naming the member. A diagnostic tool, not a hot-path
//! wrapper. Snapshots are deliberately unsupported.

use ethereum_types::H256;
use log::warn;

use crate::{
    error::{Error, Result},
    snapshot::IndexSnapshot,
    traits::{Key, KeyIndex, Ordinal},
};

/// Fan-out over several `KeyIndex` implementations.
pub struct IndexArray<K> {
    members: Vec<Box<dyn KeyIndex<K>>>,
}

impl<K: Key> IndexArray<K> {
    /// Wrap the given indexes. At least one member is required.
    pub fn new(members: Vec<Box<dyn KeyIndex<K>>>) -> Self {
        assert!(!members.is_empty(), "an index array needs members");
        IndexArray { members }
    }

    fn agreed<T, F>(&self, mut op: F) -> Result<T>
    where
        T: PartialEq,
        F: FnMut(&dyn KeyIndex<K>) -> Result<T>,
    {
        let mut first = None;
        for (position, member) in self.members.iter().enumerate() {
            let result = Self::settle(op(member.as_ref()))?;
            match first {
                None => first = Some(result),
                Some(ref expected) => {
                    if *expected != result {
                        warn!(target: "index", "index {position} diverged from index 0");
                        return Err(Error::Divergence(position));
                    }
                }
            }
        }
        match first.expect("the members list is never empty; qed") {
            Ok(value) => Ok(value),
            Err(()) => Err(Error::NotFound),
        }
    }

    fn agreed_mut<T, F>(&mut self, mut op: F) -> Result<T>
    where
        T: PartialEq,
        F: FnMut(&mut dyn KeyIndex<K>) -> Result<T>,
    {
        let mut first = None;
        for (position, member) in self.members.iter_mut().enumerate() {
            let result = Self::settle(op(member.as_mut()))?;
            match first {
                None => first = Some(result),
                Some(ref expected) => {
                    if *expected != result {
                        warn!(target: "index", "index {position} diverged from index 0");
                        return Err(Error::Divergence(position));
                    }
                }
            }
        }
        match first.expect("the members list is never empty; qed") {
            Ok(value) => Ok(value),
            Err(()) => Err(Error::NotFound),
        }
    }

    /// Normalise a member result for comparison: `NotFound` is an
    /// answer to compare, every other error aborts the fan-out.
    fn settle<T>(result: Result<T>) -> Result<::std::result::Result<T, ()>> {
        match result {
            Ok(value) => Ok(Ok(value)),
            Err(Error::NotFound) => Ok(Err(())),
            Err(err) => Err(err),
        }
    }
}

impl<K: Key> KeyIndex<K> for IndexArray<K> {
    fn get_or_add(&mut self, key: &K) -> Result<(Ordinal, bool)> {
        self.agreed_mut(|member| member.get_or_add(key))
    }

    fn get(&self, key: &K) -> Result<Ordinal> {
        self.agreed(|member| member.get(key))
    }

    fn contains(&self, key: &K) -> Result<bool> {
        self.agreed(|member| member.contains(key))
    }

    fn len(&self) -> Result<Ordinal> {
        self.agreed(|member| member.len())
    }

    fn state_hash(&mut self) -> Result<H256> {
        self.agreed_mut(|member| member.state_hash())
    }

    fn flush(&mut self) -> Result<()> {
        let mut last_error = None;
        for member in &mut self.members {
            if let Err(err) = member.flush() {
                last_error = Some(err);
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        let mut last_error = None;
        for member in &mut self.members {
            if let Err(err) = member.close() {
                last_error = Some(err);
            }
        }
        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn create_snapshot(&mut self) -> Result<IndexSnapshot<K>> {
        Err(Error::SnapshotUnsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{linear::LinearIndex, memory::MemoryIndex};
    use ethereum_types::H160;

    fn key(i: u64) -> H160 {
        H160::from_low_u64_be(i)
    }

    fn array() -> IndexArray<H160> {
        IndexArray::new(vec![
            Box::new(MemoryIndex::new()),
            Box::new(LinearIndex::with_parameters(2, 4)),
        ])
    }

    #[test]
    fn agreeing_members_behave_like_one_index() {
        let mut array = array();
        for i in 0..100 {
            assert_eq!(array.get_or_add(&key(i)).unwrap(), (i as u32, true));
        }
        assert_eq!(array.len().unwrap(), 100);
        assert_eq!(array.get(&key(42)).unwrap(), 42);
        assert!(array.contains(&key(99)).unwrap());
        assert!(matches!(array.get(&key(1000)), Err(Error::NotFound)));

        let hash = array.state_hash().unwrap();
        array.flush().unwrap();
        assert_eq!(array.state_hash().unwrap(), hash);
    }

    #[test]
    fn divergence_is_detected() {
        let mut skewed = MemoryIndex::new();
        skewed.get_or_add(&key(7)).unwrap();

        let mut array = IndexArray::new(vec![
            Box::new(MemoryIndex::new()) as Box<dyn KeyIndex<H160>>,
            Box::new(skewed),
        ]);

        // Ordinal 0 vs 1 for a fresh key on the skewed member.
        assert!(matches!(
            array.get_or_add(&key(0)),
            Err(Error::Divergence(1))
        ));
    }

    #[test]
    fn lookup_divergence_names_the_member() {
        let mut skewed = MemoryIndex::new();
        skewed.get_or_add(&key(5)).unwrap();

        let array = IndexArray::new(vec![
            Box::new(MemoryIndex::new()) as Box<dyn KeyIndex<H160>>,
            Box::new(skewed),
        ]);

        assert!(matches!(array.get(&key(5)), Err(Error::Divergence(1))));
        assert!(matches!(array.contains(&key(5)), Err(Error::Divergence(1))));
        assert!(matches!(array.len(), Err(Error::Divergence(1))));
    }

    #[test]
    fn snapshots_are_unsupported() {
        let mut array = array();
        array.get_or_add(&key(1)).unwrap();
        assert!(matches!(
            array.create_snapshot(),
            Err(Error::SnapshotUnsupported)
        ));
    }

    #[test]
    fn close_reaches_every_member() {
        let mut array = array();
        array.get_or_add(&key(1)).unwrap();
        array.close().unwrap();
        // All members are closed, so the second close reports it.
        assert!(matches!(array.close(), Err(Error::Closed)));
        assert!(matches!(array.get(&key(1)), Err(Error::Closed)));
    }
}
