//! spent-note tracking
//!
//! spending a note reveals its nullifier. the pool keeps every revealed
//! nullifier forever, so a second spend of the same note collides.

use std::collections::HashSet;

use codec::{Decode, Encode};

use crate::error::{Error, Result};
use crate::keys::SpendSignature;
use crate::note::NoteCommitment;
use crate::NULLIFIER_DOMAIN;

/// position in the commitment tree
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode)]
pub struct Position(pub u64);

impl Position {
    pub fn new(pos: u64) -> Self {
        Self(pos)
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl core::fmt::Display for Position {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// public tag revealed when a note is spent
///
/// `H(commitment, position, spend signature)`: the signature needs the owner's
/// secret, and the position pins one tag per committed note.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct Nullifier(pub [u8; 32]);

impl Nullifier {
    pub fn derive(
        commitment: &NoteCommitment,
        position: Position,
        signature: &SpendSignature,
    ) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(NULLIFIER_DOMAIN);
        hasher.update(&commitment.0);
        hasher.update(&position.to_bytes());
        hasher.update(&signature.0);
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Nullifier {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl core::fmt::Display for Nullifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// every nullifier the pool has accepted
#[derive(Clone, Debug, Default)]
pub struct NullifierSet {
    nullifiers: HashSet<Nullifier>,
}

impl NullifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, nullifier: &Nullifier) -> bool {
        self.nullifiers.contains(nullifier)
    }

    /// mark a single note as spent
    pub fn reveal(&mut self, nullifier: Nullifier) -> Result<()> {
        if !self.nullifiers.insert(nullifier) {
            return Err(Error::AlreadySpent(nullifier));
        }
        Ok(())
    }

    /// reject if any nullifier is already spent or repeats within the batch
    pub fn check_unspent(&self, nullifiers: &[Nullifier]) -> Result<()> {
        for (i, nf) in nullifiers.iter().enumerate() {
            if self.contains(nf) || nullifiers[..i].contains(nf) {
                return Err(Error::AlreadySpent(*nf));
            }
        }
        Ok(())
    }

    /// reveal a batch, all or nothing
    pub fn reveal_all(&mut self, nullifiers: &[Nullifier]) -> Result<()> {
        self.check_unspent(nullifiers)?;
        self.nullifiers.extend(nullifiers.iter().copied());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nullifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nullifiers.is_empty()
    }
}
