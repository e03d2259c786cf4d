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

//! Snapshot creation, verification and restoration.
//!
//! A snapshot carries the full key sequence in insertion order,
//! chunked into parts of at most `MAX_PART_BYTES` of serialized keys.
//! Every part is provable on its own: its proof holds the chained
//! hash before the first and after the last covered insertion, and
//! adjacent proofs must chain up to the root `(0³², H_S)`. The
//! protocol talks only in keys and chained hashes, so any backend can
//! restore a snapshot produced by any other.

use byteorder::{ByteOrder, LittleEndian};
use ethereum_types::H256;
use log::trace;

use crate::{
    error::{Error, Result},
    hash_chain::fold,
    traits::{Key, KeyIndex},
};

/// Upper bound of serialized key bytes per part.
pub const MAX_PART_BYTES: usize = 4096;

/// Serialized size of snapshot metadata.
pub const META_SIZE: usize = 40;

/// Serialized size of a part proof.
pub const PROOF_SIZE: usize = 64;

/// Number of keys carried by one full part.
pub fn keys_per_part<K: Key>() -> usize {
    MAX_PART_BYTES / K::SIZE
}

/// Before/after hash pair covering a contiguous run of insertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proof {
    /// Chained hash before the first covered insertion.
    pub before: H256,
    /// Chained hash after the last covered insertion.
    pub after: H256,
}

impl Proof {
    /// Wire encoding: `before ‖ after`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PROOF_SIZE);
        out.extend_from_slice(self.before.as_bytes());
        out.extend_from_slice(self.after.as_bytes());
        out
    }

    /// Decode a 64-byte proof.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PROOF_SIZE {
            return Err(Error::Corruption(format!(
                "snapshot proof is {} bytes, expected {PROOF_SIZE}",
                bytes.len()
            )));
        }
        Ok(Proof {
            before: H256::from_slice(&bytes[..32]),
            after: H256::from_slice(&bytes[32..]),
        })
    }
}

/// Root hash and key count of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotMeta {
    /// Chained hash after the last insertion.
    pub after: H256,
    /// Number of keys covered.
    pub num_keys: u64,
}

impl SnapshotMeta {
    /// Wire encoding: `after ‖ num_keys`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; META_SIZE];
        out[..32].copy_from_slice(self.after.as_bytes());
        LittleEndian::write_u64(&mut out[32..], self.num_keys);
        out
    }

    /// Decode 40 bytes of metadata.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != META_SIZE {
            return Err(Error::Corruption(format!(
                "snapshot metadata is {} bytes, expected {META_SIZE}",
                bytes.len()
            )));
        }
        Ok(SnapshotMeta {
            after: H256::from_slice(&bytes[..32]),
            num_keys: LittleEndian::read_u64(&bytes[32..]),
        })
    }

    /// Number of parts a snapshot of this size is chunked into.
    pub fn num_parts<K: Key>(&self) -> usize {
        (self.num_keys as usize).div_ceil(keys_per_part::<K>())
    }
}

/// Byte-level access to snapshot data, the surface shipped between
/// nodes. Implemented by [`IndexSnapshot`] on the producing side; a
/// receiving node may implement it over any transport.
pub trait SnapshotSource {
    /// 40 bytes of metadata.
    fn metadata(&self) -> Result<Vec<u8>>;

    /// 64 bytes of proof for one part.
    fn proof(&self, part: usize) -> Result<Vec<u8>>;

    /// Serialized keys of one part.
    fn part(&self, part: usize) -> Result<Vec<u8>>;
}

/// A frozen view over an index: the key sequence at creation time and
/// the chained hash at every part boundary. Mutations of the source
/// index after creation are not reflected.
pub struct IndexSnapshot<K> {
    keys: Vec<K>,
    boundaries: Vec<H256>,
}

impl<K: Key> IndexSnapshot<K> {
    /// Freeze the given insertion-ordered key sequence, folding the
    /// chain once to record every part-boundary hash.
    pub fn from_keys(keys: Vec<K>) -> Self {
        let per_part = keys_per_part::<K>();
        let mut boundaries = Vec::with_capacity(keys.len() / per_part + 2);
        let mut hash = H256::zero();
        boundaries.push(hash);
        for (i, key) in keys.iter().enumerate() {
            hash = fold(&hash, key.as_bytes());
            if (i + 1) % per_part == 0 {
                boundaries.push(hash);
            }
        }
        if keys.len() % per_part != 0 {
            boundaries.push(hash);
        }
        trace!(
            target: "snapshot",
            "froze snapshot of {} keys in {} parts",
            keys.len(),
            boundaries.len() - 1,
        );
        IndexSnapshot { keys, boundaries }
    }

    /// Number of parts.
    pub fn num_parts(&self) -> usize {
        self.boundaries.len() - 1
    }

    /// Number of keys covered.
    pub fn num_keys(&self) -> u64 {
        self.keys.len() as u64
    }

    /// Chained hash after the last insertion.
    pub fn root_hash(&self) -> H256 {
        *self
            .boundaries
            .last()
            .expect("boundaries always holds the initial zero hash; qed")
    }

    /// The `(0³², H_S)` pair covering the whole snapshot.
    pub fn root_proof(&self) -> Proof {
        Proof {
            before: H256::zero(),
            after: self.root_hash(),
        }
    }

    /// Structured metadata.
    pub fn meta(&self) -> SnapshotMeta {
        SnapshotMeta {
            after: self.root_hash(),
            num_keys: self.num_keys(),
        }
    }

    fn check_part(&self, part: usize) -> Result<()> {
        if part >= self.num_parts() {
            return Err(Error::Corruption(format!(
                "snapshot part {part} out of range ({} parts)",
                self.num_parts()
            )));
        }
        Ok(())
    }

    /// Proof of one part.
    pub fn part_proof(&self, part: usize) -> Result<Proof> {
        self.check_part(part)?;
        Ok(Proof {
            before: self.boundaries[part],
            after: self.boundaries[part + 1],
        })
    }

    /// The keys covered by one part.
    pub fn part_keys(&self, part: usize) -> Result<&[K]> {
        self.check_part(part)?;
        let per_part = keys_per_part::<K>();
        let from = part * per_part;
        let to = ((part + 1) * per_part).min(self.keys.len());
        Ok(&self.keys[from..to])
    }
}

impl<K: Key> SnapshotSource for IndexSnapshot<K> {
    fn metadata(&self) -> Result<Vec<u8>> {
        Ok(self.meta().encode())
    }

    fn proof(&self, part: usize) -> Result<Vec<u8>> {
        Ok(self.part_proof(part)?.encode())
    }

    fn part(&self, part: usize) -> Result<Vec<u8>> {
        let keys = self.part_keys(part)?;
        let mut out = Vec::with_capacity(keys.len() * K::SIZE);
        for key in keys {
            out.extend_from_slice(key.as_bytes());
        }
        Ok(out)
    }
}

/// Feed every key of a snapshot into `index` in insertion order, then
/// require the restored state hash to match the snapshot root.
pub fn restore<K, I, S>(index: &mut I, source: &S) -> Result<()>
where
    K: Key,
    I: KeyIndex<K> + ?Sized,
    S: SnapshotSource + ?Sized,
{
    let meta = SnapshotMeta::decode(&source.metadata()?)?;
    let num_parts = meta.num_parts::<K>();

    let mut restored = 0u64;
    for part in 0..num_parts {
        let bytes = source.part(part)?;
        if bytes.len() % K::SIZE != 0 {
            return Err(Error::Corruption(format!(
                "part {part} is {} bytes, not a multiple of the key size",
                bytes.len()
            )));
        }
        for chunk in bytes.chunks(K::SIZE) {
            index.get_or_add(&K::from_slice(chunk))?;
            restored += 1;
        }
        trace!(target: "snapshot", "restored part {part}/{num_parts}");
    }

    if restored != meta.num_keys {
        return Err(Error::Corruption(format!(
            "snapshot carried {restored} keys, metadata declares {}",
            meta.num_keys
        )));
    }
    if index.state_hash()? != meta.after {
        return Err(Error::ProofMismatch(
            "restored state hash does not match the snapshot root",
        ));
    }
    Ok(())
}

/// Stateless check of a single part against its proof: refold the keys
/// from `proof.before` and require the declared `proof.after`.
pub fn verify_part<K: Key>(proof_bytes: &[u8], part_bytes: &[u8]) -> Result<()> {
    let proof = Proof::decode(proof_bytes)?;
    if part_bytes.len() % K::SIZE != 0 {
        return Err(Error::Corruption(format!(
            "part is {} bytes, not a multiple of the key size",
            part_bytes.len()
        )));
    }
    let mut hash = proof.before;
    for chunk in part_bytes.chunks(K::SIZE) {
        hash = fold(&hash, chunk);
    }
    if hash != proof.after {
        return Err(Error::ProofMismatch("recomputed part hash differs"));
    }
    Ok(())
}

/// Full check of a snapshot: every part verifies against its proof,
/// and the proofs chain from the zero hash to the declared root.
pub fn verify<K: Key, S: SnapshotSource + ?Sized>(source: &S) -> Result<()> {
    let meta = SnapshotMeta::decode(&source.metadata()?)?;
    let num_parts = meta.num_parts::<K>();

    let mut previous = H256::zero();
    for part in 0..num_parts {
        let proof_bytes = source.proof(part)?;
        let proof = Proof::decode(&proof_bytes)?;
        if proof.before != previous {
            return Err(Error::ProofMismatch("part proofs do not chain"));
        }
        verify_part::<K>(&proof_bytes, &source.part(part)?)?;
        previous = proof.after;
    }
    if previous != meta.after {
        return Err(Error::ProofMismatch(
            "last part proof does not reach the declared root",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryIndex;
    use ethereum_types::H160;

    fn keys(count: usize) -> Vec<H160> {
        (0..count as u64).map(H160::from_low_u64_be).collect()
    }

    #[test]
    fn empty_snapshot() {
        let snapshot = IndexSnapshot::<H160>::from_keys(Vec::new());
        assert_eq!(snapshot.num_parts(), 0);
        assert_eq!(snapshot.root_hash(), H256::zero());
        assert_eq!(
            snapshot.root_proof(),
            Proof {
                before: H256::zero(),
                after: H256::zero()
            }
        );
        assert!(verify::<H160, _>(&snapshot).is_ok());
    }

    #[test]
    fn part_sizing() {
        let per_part = keys_per_part::<H160>();
        assert_eq!(per_part, 204);

        let snapshot = IndexSnapshot::from_keys(keys(per_part));
        assert_eq!(snapshot.num_parts(), 1);

        let snapshot = IndexSnapshot::from_keys(keys(per_part + 1));
        assert_eq!(snapshot.num_parts(), 2);
        assert_eq!(snapshot.part(0).unwrap().len(), per_part * <H160 as Key>::SIZE);
        assert_eq!(snapshot.part(1).unwrap().len(), <H160 as Key>::SIZE);
    }

    #[test]
    fn proofs_chain_to_the_root() {
        let snapshot = IndexSnapshot::from_keys(keys(1000));
        let meta = SnapshotMeta::decode(&snapshot.metadata().unwrap()).unwrap();

        let mut previous = H256::zero();
        for part in 0..snapshot.num_parts() {
            let proof = snapshot.part_proof(part).unwrap();
            assert_eq!(proof.before, previous);
            previous = proof.after;
        }
        assert_eq!(previous, meta.after);
        assert!(verify::<H160, _>(&snapshot).is_ok());
    }

    #[test]
    fn each_part_verifies_alone() {
        let snapshot = IndexSnapshot::from_keys(keys(500));
        for part in 0..snapshot.num_parts() {
            verify_part::<H160>(
                &snapshot.proof(part).unwrap(),
                &snapshot.part(part).unwrap(),
            )
            .unwrap();
        }
    }

    #[test]
    fn tampered_part_fails() {
        let snapshot = IndexSnapshot::from_keys(keys(300));
        let mut part = snapshot.part(0).unwrap();
        part[0] ^= 0xff;
        assert!(matches!(
            verify_part::<H160>(&snapshot.proof(0).unwrap(), &part),
            Err(Error::ProofMismatch(_))
        ));
    }

    #[test]
    fn malformed_sizes_are_corruption() {
        assert!(matches!(
            SnapshotMeta::decode(&[0u8; 39]),
            Err(Error::Corruption(_))
        ));
        assert!(matches!(
            Proof::decode(&[0u8; 63]),
            Err(Error::Corruption(_))
        ));
        let snapshot = IndexSnapshot::from_keys(keys(10));
        assert!(matches!(
            verify_part::<H160>(&snapshot.proof(0).unwrap(), &[0u8; 21]),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn restore_rebuilds_the_sequence() {
        let source_keys = keys(450);
        let snapshot = IndexSnapshot::from_keys(source_keys.clone());

        let mut index = MemoryIndex::new();
        restore(&mut index, &snapshot).unwrap();

        assert_eq!(index.len().unwrap(), 450);
        for (i, key) in source_keys.iter().enumerate() {
            assert_eq!(index.get(key).unwrap(), i as u32);
        }
        assert_eq!(index.state_hash().unwrap(), snapshot.root_hash());
    }

    #[test]
    fn restore_of_empty_snapshot_leaves_index_empty() {
        let snapshot = IndexSnapshot::<H160>::from_keys(Vec::new());
        let mut index = MemoryIndex::<H160>::new();
        restore(&mut index, &snapshot).unwrap();
        assert!(index.is_empty().unwrap());
        assert_eq!(index.state_hash().unwrap(), H256::zero());
    }

    #[test]
    fn restore_into_diverged_index_is_a_proof_mismatch() {
        let snapshot = IndexSnapshot::from_keys(keys(5));
        let mut index = MemoryIndex::new();
        index.get_or_add(&H160::from_low_u64_be(999)).unwrap();
        assert!(matches!(
            restore(&mut index, &snapshot),
            Err(Error::ProofMismatch(_))
        ));
    }

    /// Source whose parts chain correctly in isolation but skip a key,
    /// so only the root check can reject it.
    struct LyingSource {
        inner: IndexSnapshot<H160>,
        declared: SnapshotMeta,
    }

    impl SnapshotSource for LyingSource {
        fn metadata(&self) -> Result<Vec<u8>> {
            Ok(self.declared.encode())
        }

        fn proof(&self, part: usize) -> Result<Vec<u8>> {
            self.inner.proof(part)
        }

        fn part(&self, part: usize) -> Result<Vec<u8>> {
            self.inner.part(part)
        }
    }

    #[test]
    fn verify_rejects_a_broken_chain_root() {
        let inner = IndexSnapshot::from_keys(keys(50));
        let mut declared = inner.meta();
        declared.after = H256::from_low_u64_be(1);
        let source = LyingSource { inner, declared };
        assert!(matches!(
            verify::<H160, _>(&source),
            Err(Error::ProofMismatch(_))
        ));
    }
}
