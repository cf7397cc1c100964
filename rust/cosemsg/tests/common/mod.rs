// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared helpers for `cosemsg` integration tests.
//!
//! Every test runs against the RustCrypto backend. [`CountingBackend`] wraps it so
//! tests can assert that validation failures happen before any primitive is invoked.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use cosemsg::{
    AlgorithmDescriptor, AlgorithmId, CoseKey, Curve, DeriveParams, PrimitiveBackend, PrimitiveError,
};
use cosemsg_rustcrypto::RustCryptoBackend;
use p256::elliptic_curve::sec1::ToEncodedPoint as _;

/// Private scalar used by the fixed ES256 scenarios.
pub(crate) const ES256_D: &str = "57c92077664146e876760c9520d054aa93c3afb04e306705db6090308507b4d3";

pub(crate) fn h(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap()
}

pub(crate) fn backend() -> RustCryptoBackend {
    RustCryptoBackend::new()
}

/// P-256 key pair for a fixed private scalar.
pub(crate) fn p256_key(d_hex: &str) -> CoseKey {
    let d = h(d_hex);
    let secret = p256::SecretKey::from_slice(&d).unwrap();
    let point = secret.public_key().to_encoded_point(false);
    CoseKey::ec2(
        Curve::P256,
        point.x().unwrap().to_vec(),
        point.y().unwrap().to_vec(),
        Some(d),
    )
}

/// The fixed ES256 signing key.
pub(crate) fn es256_key() -> CoseKey {
    p256_key(ES256_D).with_alg(AlgorithmId::ES256)
}

/// Fresh key pair on `curve`.
pub(crate) fn generated(curve: Curve) -> CoseKey {
    backend().generate_ephemeral(curve).unwrap()
}

pub(crate) fn symmetric(len: usize, fill: u8, kid: &[u8]) -> CoseKey {
    CoseKey::symmetric(vec![fill; len]).with_kid(kid.to_vec())
}

/// Delegates to [`RustCryptoBackend`] and counts every primitive call.
#[derive(Default)]
pub(crate) struct CountingBackend {
    inner: RustCryptoBackend,
    calls: AtomicUsize,
}

impl CountingBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl PrimitiveBackend for CountingBackend {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn sign(&self, alg: &AlgorithmDescriptor, key: &CoseKey, data: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
        self.tick();
        self.inner.sign(alg, key, data)
    }

    fn verify(
        &self,
        alg: &AlgorithmDescriptor,
        key: &CoseKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<bool, PrimitiveError> {
        self.tick();
        self.inner.verify(alg, key, data, signature)
    }

    fn seal(
        &self,
        alg: &AlgorithmDescriptor,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, PrimitiveError> {
        self.tick();
        self.inner.seal(alg, key, nonce, aad, plaintext)
    }

    fn open(
        &self,
        alg: &AlgorithmDescriptor,
        key: &[u8],
        nonce: &[u8],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, PrimitiveError> {
        self.tick();
        self.inner.open(alg, key, nonce, aad, ciphertext)
    }

    fn mac(&self, alg: &AlgorithmDescriptor, key: &[u8], data: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
        self.tick();
        self.inner.mac(alg, key, data)
    }

    fn derive(&self, params: &DeriveParams<'_>) -> Result<Vec<u8>, PrimitiveError> {
        self.tick();
        self.inner.derive(params)
    }

    fn wrap(&self, alg: &AlgorithmDescriptor, kek: &[u8], key: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
        self.tick();
        self.inner.wrap(alg, kek, key)
    }

    fn unwrap(&self, alg: &AlgorithmDescriptor, kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
        self.tick();
        self.inner.unwrap(alg, kek, wrapped)
    }

    fn random(&self, len: usize) -> Result<Vec<u8>, PrimitiveError> {
        self.tick();
        self.inner.random(len)
    }

    fn generate_ephemeral(&self, curve: Curve) -> Result<CoseKey, PrimitiveError> {
        self.tick();
        self.inner.generate_ephemeral(curve)
    }
}
