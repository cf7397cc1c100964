// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Primitive backend interface.
//!
//! The message layer never implements cryptography. It validates keys against the
//! algorithm registry, builds the byte strings to protect, and hands them to a
//! [`PrimitiveBackend`].
//!
//! Contract:
//! - Keys passed in have already been checked with [`crate::algorithms::validate`].
//! - `verify` returns `Ok(false)` for a well-formed but wrong signature; `Err` is for
//!   keys or algorithms the backend cannot handle.
//! - `open` and `unwrap` return `Err(PrimitiveError::Failed)` on authentication failure.

use crate::algorithms::AlgorithmDescriptor;
use crate::key::{CoseKey, Curve};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveError {
    #[error("unsupported by this backend: {0}")]
    Unsupported(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("operation failed: {0}")]
    Failed(String),
}

/// Input keying material for a key derivation.
pub enum KeyAgreementInput<'a> {
    /// Perform ECDH between `private_key` and `public_key` and use the shared secret.
    Ecdh {
        private_key: &'a CoseKey,
        public_key: &'a CoseKey,
    },
    /// Use these bytes as the HKDF input keying material.
    Shared(&'a [u8]),
}

/// Parameters for [`PrimitiveBackend::derive`].
pub struct DeriveParams<'a> {
    /// The key-management algorithm whose hash selects the HKDF variant.
    pub algorithm: &'a AlgorithmDescriptor,
    pub input: KeyAgreementInput<'a>,
    pub salt: Option<&'a [u8]>,
    /// Encoded COSE_KDF_Context, used as HKDF info.
    pub context: &'a [u8],
    pub output_len: usize,
}

/// Cryptographic primitives required by the message layer.
pub trait PrimitiveBackend: Send + Sync {
    /// Backend display name for diagnostics.
    fn name(&self) -> &'static str;

    fn sign(&self, alg: &AlgorithmDescriptor, key: &CoseKey, data: &[u8]) -> Result<Vec<u8>, PrimitiveError>;

    fn verify(
        &self,
        alg: &AlgorithmDescriptor,
        key: &CoseKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, PrimitiveError>;

    /// AEAD encrypt; returns ciphertext with the tag appended.
    fn seal(
        &self,
        alg: &AlgorithmDescriptor,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, PrimitiveError>;

    fn open(
        &self,
        alg: &AlgorithmDescriptor,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, PrimitiveError>;

    /// Compute a (possibly truncated) MAC tag.
    fn mac(&self, alg: &AlgorithmDescriptor, key: &[u8], data: &[u8]) -> Result<Vec<u8>, PrimitiveError>;

    /// Recompute and compare in constant time.
    fn verify_mac(
        &self,
        alg: &AlgorithmDescriptor,
        key: &[u8],
        data: &[u8],
        tag: &[u8],
    ) -> Result<bool, PrimitiveError> {
        let expected = self.mac(alg, key, data)?;
        Ok(constant_time_eq(&expected, tag))
    }

    fn derive(&self, params: &DeriveParams<'_>) -> Result<Vec<u8>, PrimitiveError>;

    /// AES key wrap (RFC 3394) of `key` under `kek`.
    fn wrap(&self, alg: &AlgorithmDescriptor, kek: &[u8], key: &[u8]) -> Result<Vec<u8>, PrimitiveError>;

    fn unwrap(&self, alg: &AlgorithmDescriptor, kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, PrimitiveError>;

    fn random(&self, len: usize) -> Result<Vec<u8>, PrimitiveError>;

    /// Fresh key pair on `curve` (private part included).
    fn generate_ephemeral(&self, curve: Curve) -> Result<CoseKey, PrimitiveError>;
}

/// Length-aware constant-time byte comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
