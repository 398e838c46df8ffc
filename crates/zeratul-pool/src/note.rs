//! shielded notes (utxos)
//!
//! a note is an amount owned by a public key, blinded with 32 random bytes.
//! only its commitment goes on chain; the plaintext travels encrypted to the
//! owner inside the transaction's external data.

use codec::{Decode, Encode};
use rand::{CryptoRng, RngCore};

use crate::error::{Error, Result};
use crate::keys::{Keypair, ShieldedAddress};
use crate::nullifier::{Nullifier, Position};
use crate::value::Amount;
use crate::NOTE_DOMAIN;

/// plaintext size: amount (16) + blinding (32)
const NOTE_PLAINTEXT_LEN: usize = 48;

/// random blinding factor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct Blinding(pub [u8; 32]);

impl Blinding {
    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// a shielded note
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Note {
    pub amount: Amount,
    pub owner: ShieldedAddress,
    pub blinding: Blinding,
    /// leaf index, known once the commitment landed in the tree
    pub index: Option<Position>,
}

impl Note {
    /// new uncommitted note with a fresh blinding
    pub fn new<R: RngCore>(amount: Amount, owner: ShieldedAddress, rng: &mut R) -> Self {
        Self {
            amount,
            owner,
            blinding: Blinding::random(rng),
            index: None,
        }
    }

    /// zero-amount padding note owned by a throwaway keypair
    pub fn dummy<R: RngCore + CryptoRng>(rng: &mut R) -> (Self, Keypair) {
        let keypair = Keypair::random(rng);
        let note = Self::new(Amount::ZERO, keypair.address(), rng);
        (note, keypair)
    }

    /// same note, placed at `index`
    pub fn at(mut self, index: Position) -> Self {
        self.index = Some(index);
        self
    }

    /// compute note commitment (published on-chain)
    pub fn commitment(&self) -> NoteCommitment {
        NoteCommitment::compute(self.amount, &self.owner.public_key.0, &self.blinding)
    }

    /// position used for nullifier derivation
    ///
    /// zero-amount notes are never checked against the tree and use position 0
    pub fn spend_position(&self) -> Result<Position> {
        match self.index {
            Some(index) => Ok(index),
            None if self.amount.is_zero() => Ok(Position(0)),
            None => Err(Error::UnpositionedNote),
        }
    }

    /// derive this note's nullifier, only possible for the owner
    pub fn nullifier(&self, keypair: &Keypair) -> Result<Nullifier> {
        if keypair.public_key() != self.owner.public_key {
            return Err(Error::NotNoteOwner);
        }
        let position = self.spend_position()?;
        let commitment = self.commitment();
        let signature = keypair.sign(&commitment, position);
        Ok(Nullifier::derive(&commitment, position, &signature))
    }

    /// encrypt amount and blinding to the owner
    pub fn encrypt<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<EncryptedNote> {
        let mut plaintext = [0u8; NOTE_PLAINTEXT_LEN];
        plaintext[..16].copy_from_slice(&self.amount.to_bytes());
        plaintext[16..].copy_from_slice(&self.blinding.0);
        self.owner.seal(&plaintext, rng)
    }

    /// try to recover a note emitted at `index`
    ///
    /// `None` means the output is not addressed to `keypair`. callers scanning
    /// a transaction must try every output, emission order is shuffled.
    pub fn decrypt(
        keypair: &Keypair,
        encrypted: &EncryptedNote,
        commitment: &NoteCommitment,
        index: Position,
    ) -> Option<Self> {
        let plaintext = keypair.open(encrypted)?;
        if plaintext.len() != NOTE_PLAINTEXT_LEN {
            return None;
        }
        let amount = Amount::from_bytes(plaintext[..16].try_into().ok()?);
        let blinding = Blinding(plaintext[16..].try_into().ok()?);

        let note = Self {
            amount,
            owner: keypair.address(),
            blinding,
            index: Some(index),
        };
        // a sender could encrypt a plaintext that does not open the commitment
        (note.commitment() == *commitment).then_some(note)
    }
}

/// commitment to a note (what goes in the tree)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct NoteCommitment(pub [u8; 32]);

impl NoteCommitment {
    pub fn compute(amount: Amount, public_key: &[u8; 32], blinding: &Blinding) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(NOTE_DOMAIN);
        hasher.update(&amount.to_bytes());
        hasher.update(public_key);
        hasher.update(&blinding.0);
        Self(*hasher.finalize().as_bytes())
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for NoteCommitment {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl core::fmt::Display for NoteCommitment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// note ciphertext: x25519 ephemeral key, chacha20-poly1305 nonce and ciphertext
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct EncryptedNote {
    pub ephemeral_key: [u8; 32],
    pub nonce: [u8; 12],
    pub ciphertext: Vec<u8>,
}
