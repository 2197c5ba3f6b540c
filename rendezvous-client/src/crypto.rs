//! Cryptographic primitives for rendezvous clients.
//!
//! This module provides:
//! - A per-client P-256 keypair, public half exported as base64 SEC1
//! - ECDH agreement producing a 32-byte [`SharedKey`]
//! - AES-256-CBC with PKCS#7 padding over `base64(IV || ciphertext)`
//!
//! # Security Notes
//!
//! - The raw ECDH x-coordinate is used directly as the AES key (no KDF).
//! - CBC carries no integrity tag. A relay or peer that flips ciphertext
//!   bits is only detected if the padding breaks.
//! - Peer public keys are not authenticated; a malicious relay can
//!   substitute its own.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use thiserror::Error;
use zeroize::Zeroizing;

/// AES-256 key size (256 bits = 32 bytes).
pub const KEY_SIZE: usize = 32;

/// CBC initialization vector size (one AES block).
pub const IV_SIZE: usize = 16;

/// AES block size.
pub const BLOCK_SIZE: usize = 16;

/// Uncompressed SEC1 P-256 public key size.
pub const PUBLIC_KEY_SIZE: usize = 65;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Peer public key is not valid base64 or not a P-256 point.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Ciphertext payload is not valid base64.
    #[error("invalid base64 payload: {0}")]
    InvalidEncoding(String),

    /// Payload too short to hold an IV and one block.
    #[error("ciphertext too short: {len} bytes")]
    TooShort {
        /// Decoded payload length.
        len: usize,
    },

    /// Ciphertext length is not a multiple of the block size.
    #[error("ciphertext length {len} is not a multiple of the block size")]
    NotBlockAligned {
        /// Ciphertext length (after the IV).
        len: usize,
    },

    /// Padding check failed (wrong key or corrupted ciphertext).
    #[error("decryption failed: bad padding")]
    BadPadding,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// OS random number generator failed.
    #[error("random number generation failed: {0}")]
    Rng(String),
}

/// A client's long-lived P-256 keypair.
///
/// Generated once per client lifetime; the secret never leaves this struct.
pub struct KeyPair {
    secret: SecretKey,
    public_b64: String,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public_b64 = BASE64.encode(secret.public_key().to_encoded_point(false).as_bytes());
        Self { secret, public_b64 }
    }

    /// Public key as uncompressed SEC1 bytes (65 bytes, leading `0x04`).
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// Public key as it travels in `key-exchange-request` events.
    pub fn public_key_base64(&self) -> &str {
        &self.public_b64
    }

    /// Derive the key shared with the holder of `peer_public_b64`.
    ///
    /// Both sides derive the same key (ECDH is symmetric).
    pub fn derive_shared(&self, peer_public_b64: &str) -> Result<SharedKey, CryptoError> {
        let bytes = BASE64
            .decode(peer_public_b64.trim())
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        let peer = PublicKey::from_sec1_bytes(&bytes)
            .map_err(|_| CryptoError::InvalidPublicKey("not a P-256 point".into()))?;

        let shared = p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());
        SharedKey::from_slice(shared.raw_secret_bytes().as_slice())
    }
}

// Don't leak secret in debug output
impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_b64)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Symmetric key shared with one peer. Zeroized on drop.
#[derive(Clone)]
pub struct SharedKey(Zeroizing<[u8; KEY_SIZE]>);

impl SharedKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Copy key bytes from a slice of exactly [`KEY_SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Encrypt with a fresh random IV.
    ///
    /// Returns `base64(IV || ciphertext)`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let mut iv = [0u8; IV_SIZE];
        getrandom::getrandom(&mut iv).map_err(|e| CryptoError::Rng(e.to_string()))?;
        self.encrypt_with_iv(plaintext, &iv)
    }

    fn encrypt_with_iv(
        &self,
        plaintext: &[u8],
        iv: &[u8; IV_SIZE],
    ) -> Result<String, CryptoError> {
        let cipher = Aes256CbcEnc::new_from_slices(self.0.as_slice(), iv).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: self.0.len(),
            }
        })?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut payload = Vec::with_capacity(IV_SIZE + ciphertext.len());
        payload.extend_from_slice(iv);
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(payload))
    }

    /// Decrypt `base64(IV || ciphertext)`.
    pub fn decrypt(&self, encoded: &str) -> Result<Vec<u8>, CryptoError> {
        let payload = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;

        if payload.len() < IV_SIZE + BLOCK_SIZE {
            return Err(CryptoError::TooShort {
                len: payload.len(),
            });
        }
        let (iv, ciphertext) = payload.split_at(IV_SIZE);
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::NotBlockAligned {
                len: ciphertext.len(),
            });
        }

        let cipher = Aes256CbcDec::new_from_slices(self.0.as_slice(), iv).map_err(|_| {
            CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: self.0.len(),
            }
        })?;
        cipher
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CryptoError::BadPadding)
    }
}

// Don't leak keys in debug output
impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedKey([REDACTED])")
    }
}
