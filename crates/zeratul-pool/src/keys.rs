//! keypairs and shielded addresses
//!
//! a keypair is a single 32-byte secret. everything else is derived from it
//! with blake3:
//! - public key (committed into notes, proves ownership)
//! - x25519 encryption key (notes are encrypted to it)
//! - spend signatures (feed the nullifier, only the owner can compute them)
//!
//! the shareable receive address is the public key plus the encryption key.

use core::fmt;
use core::str::FromStr;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use codec::{Decode, Encode};
use rand::{CryptoRng, RngCore};
use x25519_dalek::{EphemeralSecret, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::note::{EncryptedNote, NoteCommitment};
use crate::nullifier::Position;

const PUBLIC_KEY_DOMAIN: &[u8] = b"zeratul.pool.public-key.v1";
const ENCRYPTION_KEY_DOMAIN: &[u8] = b"zeratul.pool.encryption-key.v1";
const SIGNATURE_DOMAIN: &[u8] = b"zeratul.pool.spend-sig.v1";
const NOTE_ENCRYPTION_DOMAIN: &[u8] = b"zeratul.pool.note-encryption.v1";
const PHRASE_DOMAIN: &[u8] = b"zeratul.pool.phrase.v1";

/// ownership key committed into every note
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }
}

/// x25519 public key notes are encrypted to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct EncryptionKey(pub [u8; 32]);

/// signature over (commitment, position), only the secret holder can produce it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpendSignature(pub [u8; 32]);

/// shareable receive address
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Encode, Decode)]
pub struct ShieldedAddress {
    pub public_key: PublicKey,
    pub encryption_key: EncryptionKey,
}

impl ShieldedAddress {
    /// encrypt `plaintext` so only the holder of this address can read it
    pub fn seal<R: RngCore + CryptoRng>(
        &self,
        plaintext: &[u8],
        rng: &mut R,
    ) -> Result<EncryptedNote> {
        let ephemeral_secret = EphemeralSecret::random_from_rng(&mut *rng);
        let ephemeral_key = x25519_dalek::PublicKey::from(&ephemeral_secret);

        let recipient = x25519_dalek::PublicKey::from(self.encryption_key.0);
        let shared = ephemeral_secret.diffie_hellman(&recipient);
        let key = derive_note_key(shared.as_bytes(), ephemeral_key.as_bytes());

        let mut nonce = [0u8; 12];
        rng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new_from_slice(&key).map_err(|_| Error::Encryption)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::Encryption)?;

        Ok(EncryptedNote {
            ephemeral_key: *ephemeral_key.as_bytes(),
            nonce,
            ciphertext,
        })
    }
}

impl fmt::Display for ShieldedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{}{}",
            hex::encode(self.public_key.0),
            hex::encode(self.encryption_key.0)
        )
    }
}

impl FromStr for ShieldedAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.len() != 128 {
            return Err(Error::InvalidAddress(format!(
                "expected 128 hex digits, got {}",
                digits.len()
            )));
        }
        let bytes = hex::decode(digits).map_err(|e| Error::InvalidAddress(e.to_string()))?;

        let mut public_key = [0u8; 32];
        let mut encryption_key = [0u8; 32];
        public_key.copy_from_slice(&bytes[..32]);
        encryption_key.copy_from_slice(&bytes[32..]);

        Ok(Self {
            public_key: PublicKey(public_key),
            encryption_key: EncryptionKey(encryption_key),
        })
    }
}

/// note ownership keypair
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Keypair {
    secret: [u8; 32],
    #[zeroize(skip)]
    address: ShieldedAddress,
}

impl Keypair {
    /// fresh random keypair
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut secret = [0u8; 32];
        rng.fill_bytes(&mut secret);
        Self::from_secret(secret)
    }

    /// deterministic keypair from a phrase
    pub fn from_phrase(phrase: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(PHRASE_DOMAIN);
        hasher.update(phrase.as_bytes());
        Self::from_secret(*hasher.finalize().as_bytes())
    }

    pub fn from_secret(secret: [u8; 32]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(PUBLIC_KEY_DOMAIN);
        hasher.update(&secret);
        let public_key = PublicKey(*hasher.finalize().as_bytes());

        let encryption_secret = encryption_secret(&secret);
        let encryption_key =
            EncryptionKey(*x25519_dalek::PublicKey::from(&encryption_secret).as_bytes());

        Self {
            secret,
            address: ShieldedAddress {
                public_key,
                encryption_key,
            },
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.address.public_key
    }

    /// shareable receive address
    pub fn address(&self) -> ShieldedAddress {
        self.address
    }

    /// spend signature for a committed note
    pub fn sign(&self, commitment: &NoteCommitment, position: Position) -> SpendSignature {
        let mut hasher = blake3::Hasher::new();
        hasher.update(SIGNATURE_DOMAIN);
        hasher.update(&self.secret);
        hasher.update(&commitment.0);
        hasher.update(&position.to_bytes());
        SpendSignature(*hasher.finalize().as_bytes())
    }

    /// try to decrypt a payload sealed to our address
    ///
    /// returns `None` when the payload was sealed to someone else
    pub fn open(&self, encrypted: &EncryptedNote) -> Option<Vec<u8>> {
        let secret = encryption_secret(&self.secret);
        let ephemeral_key = x25519_dalek::PublicKey::from(encrypted.ephemeral_key);
        let shared = secret.diffie_hellman(&ephemeral_key);
        let key = derive_note_key(shared.as_bytes(), &encrypted.ephemeral_key);

        let cipher = ChaCha20Poly1305::new_from_slice(&key).ok()?;
        cipher
            .decrypt(
                Nonce::from_slice(&encrypted.nonce),
                encrypted.ciphertext.as_slice(),
            )
            .ok()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address.to_string())
            .finish_non_exhaustive()
    }
}

fn encryption_secret(secret: &[u8; 32]) -> StaticSecret {
    let mut hasher = blake3::Hasher::new();
    hasher.update(ENCRYPTION_KEY_DOMAIN);
    hasher.update(secret);
    StaticSecret::from(*hasher.finalize().as_bytes())
}

/// symmetric key from shared secret and ephemeral pubkey
fn derive_note_key(shared_secret: &[u8], ephemeral_key: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(NOTE_ENCRYPTION_DOMAIN);
    hasher.update(shared_secret);
    hasher.update(ephemeral_key);
    *hasher.finalize().as_bytes()
}
