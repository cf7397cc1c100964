// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`PrimitiveBackend`] built on the RustCrypto crates.
//!
//! Supported:
//! - ECDSA over P-256/P-384/P-521 and EdDSA over Ed25519
//! - AES-GCM (128/192/256) and the eight AES-CCM variants
//! - HMAC-SHA-256/384/512 with tag truncation
//! - HKDF-SHA-256/512 over supplied bytes or an ECDH shared secret
//! - AES key wrap (RFC 3394)
//!
//! Randomness comes from the operating system (`OsRng`).

mod aead;
mod ec;
mod kdf;

use rand_core::{OsRng, RngCore};
use tracing::trace;

use cosemsg_abstractions::{AlgorithmDescriptor, CoseKey, Curve, DeriveParams, PrimitiveBackend, PrimitiveError};

#[derive(Debug, Default, Clone, Copy)]
pub struct RustCryptoBackend;

impl RustCryptoBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PrimitiveBackend for RustCryptoBackend {
    fn name(&self) -> &'static str {
        "rustcrypto"
    }

    fn sign(&self, alg: &AlgorithmDescriptor, key: &CoseKey, data: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
        trace!(alg = alg.name, len = data.len(), "sign");
        ec::sign(alg, key, data)
    }

    fn verify(
        &self,
        alg: &AlgorithmDescriptor,
        key: &CoseKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, PrimitiveError> {
        trace!(alg = alg.name, len = data.len(), "verify");
        ec::verify(alg, key, data, signature)
    }

    fn seal(
        &self,
        alg: &AlgorithmDescriptor,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, PrimitiveError> {
        trace!(alg = alg.name, len = plaintext.len(), "seal");
        aead::seal(alg, key, nonce, aad, plaintext)
    }

    fn open(
        &self,
        alg: &AlgorithmDescriptor,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, PrimitiveError> {
        trace!(alg = alg.name, len = ciphertext.len(), "open");
        aead::open(alg, key, nonce, aad, ciphertext)
    }

    fn mac(&self, alg: &AlgorithmDescriptor, key: &[u8], data: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
        trace!(alg = alg.name, len = data.len(), "mac");
        kdf::mac(alg, key, data)
    }

    fn derive(&self, params: &DeriveParams<'_>) -> Result<Vec<u8>, PrimitiveError> {
        trace!(alg = params.algorithm.name, output_len = params.output_len, "derive");
        kdf::derive(params)
    }

    fn wrap(&self, alg: &AlgorithmDescriptor, kek: &[u8], key: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
        trace!(alg = alg.name, "wrap");
        aead::wrap(alg, kek, key)
    }

    fn unwrap(&self, alg: &AlgorithmDescriptor, kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
        trace!(alg = alg.name, "unwrap");
        aead::unwrap(alg, kek, wrapped)
    }

    fn random(&self, len: usize) -> Result<Vec<u8>, PrimitiveError> {
        let mut out = vec![0u8; len];
        OsRng
            .try_fill_bytes(&mut out)
            .map_err(|e| PrimitiveError::Failed(format!("system randomness unavailable: {e}")))?;
        Ok(out)
    }

    fn generate_ephemeral(&self, curve: Curve) -> Result<CoseKey, PrimitiveError> {
        trace!(?curve, "generating ephemeral key");
        ec::generate(curve)
    }
}
