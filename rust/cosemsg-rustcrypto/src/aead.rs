// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! AES-GCM, AES-CCM and AES key wrap.

use aes_gcm::aead::generic_array::typenum::Unsigned;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, Nonce, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use ccm::consts::{U12, U13, U16, U7, U8};
use ccm::Ccm;

use cosemsg_abstractions::{AlgorithmDescriptor, AlgorithmId, PrimitiveError};

type Aes192Gcm = AesGcm<aes::Aes192, U12>;

type AesCcm16_64_128 = Ccm<aes::Aes128, U8, U13>;
type AesCcm16_64_256 = Ccm<aes::Aes256, U8, U13>;
type AesCcm64_64_128 = Ccm<aes::Aes128, U8, U7>;
type AesCcm64_64_256 = Ccm<aes::Aes256, U8, U7>;
type AesCcm16_128_128 = Ccm<aes::Aes128, U16, U13>;
type AesCcm16_128_256 = Ccm<aes::Aes256, U16, U13>;
type AesCcm64_128_128 = Ccm<aes::Aes128, U16, U7>;
type AesCcm64_128_256 = Ccm<aes::Aes256, U16, U7>;

fn cipher<C: KeyInit + AeadCore>(key: &[u8], nonce: &[u8]) -> Result<(C, Nonce<C>), PrimitiveError> {
    let cipher = C::new_from_slice(key)
        .map_err(|_| PrimitiveError::InvalidKey(format!("content key of {} bytes has the wrong length", key.len())))?;
    if nonce.len() != C::NonceSize::USIZE {
        return Err(PrimitiveError::InvalidKey(format!(
            "nonce must be {} bytes, got {}",
            C::NonceSize::USIZE,
            nonce.len()
        )));
    }
    Ok((cipher, Nonce::<C>::clone_from_slice(nonce)))
}

fn seal_with<C: KeyInit + Aead>(key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    let (cipher, nonce) = cipher::<C>(key, nonce)?;
    cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|_| PrimitiveError::Failed("encryption failed".to_string()))
}

fn open_with<C: KeyInit + Aead>(key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    let (cipher, nonce) = cipher::<C>(key, nonce)?;
    cipher
        .decrypt(&nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| PrimitiveError::Failed("decryption failed".to_string()))
}

macro_rules! dispatch_aead {
    ($alg:expr, $op:ident, $($args:expr),+) => {
        match $alg.id {
            AlgorithmId::A128GCM => $op::<Aes128Gcm>($($args),+),
            AlgorithmId::A192GCM => $op::<Aes192Gcm>($($args),+),
            AlgorithmId::A256GCM => $op::<Aes256Gcm>($($args),+),
            AlgorithmId::AES_CCM_16_64_128 => $op::<AesCcm16_64_128>($($args),+),
            AlgorithmId::AES_CCM_16_64_256 => $op::<AesCcm16_64_256>($($args),+),
            AlgorithmId::AES_CCM_64_64_128 => $op::<AesCcm64_64_128>($($args),+),
            AlgorithmId::AES_CCM_64_64_256 => $op::<AesCcm64_64_256>($($args),+),
            AlgorithmId::AES_CCM_16_128_128 => $op::<AesCcm16_128_128>($($args),+),
            AlgorithmId::AES_CCM_16_128_256 => $op::<AesCcm16_128_256>($($args),+),
            AlgorithmId::AES_CCM_64_128_128 => $op::<AesCcm64_128_128>($($args),+),
            AlgorithmId::AES_CCM_64_128_256 => $op::<AesCcm64_128_256>($($args),+),
            _ => Err(PrimitiveError::Unsupported(format!("{} is not an AEAD algorithm", $alg.name))),
        }
    };
}

pub(crate) fn seal(alg: &AlgorithmDescriptor, key: &[u8], nonce: &[u8], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    dispatch_aead!(alg, seal_with, key, nonce, aad, plaintext)
}

pub(crate) fn open(alg: &AlgorithmDescriptor, key: &[u8], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    dispatch_aead!(alg, open_with, key, nonce, aad, ciphertext)
}

fn kek<const N: usize>(kek: &[u8]) -> Result<[u8; N], PrimitiveError> {
    <[u8; N]>::try_from(kek)
        .map_err(|_| PrimitiveError::InvalidKey(format!("key-encryption key must be {N} bytes, got {}", kek.len())))
}

fn wrap_algorithm(alg: &AlgorithmDescriptor) -> AlgorithmId {
    alg.wrap.unwrap_or(alg.id)
}

/// RFC 3394 wrap. ECDH+KW descriptors are mapped to their underlying AES-KW variant.
pub(crate) fn wrap(alg: &AlgorithmDescriptor, kek_bytes: &[u8], key: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    let failed = |e: aes_kw::Error| PrimitiveError::Failed(format!("key wrap failed: {e}"));
    match wrap_algorithm(alg) {
        AlgorithmId::A128KW => aes_kw::KekAes128::from(kek::<16>(kek_bytes)?).wrap_vec(key).map_err(failed),
        AlgorithmId::A192KW => aes_kw::KekAes192::from(kek::<24>(kek_bytes)?).wrap_vec(key).map_err(failed),
        AlgorithmId::A256KW => aes_kw::KekAes256::from(kek::<32>(kek_bytes)?).wrap_vec(key).map_err(failed),
        _ => Err(PrimitiveError::Unsupported(format!("{} is not a key-wrap algorithm", alg.name))),
    }
}

pub(crate) fn unwrap(alg: &AlgorithmDescriptor, kek_bytes: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, PrimitiveError> {
    // Integrity check failures and malformed lengths both surface as Failed.
    let failed = |e: aes_kw::Error| PrimitiveError::Failed(format!("key unwrap failed: {e}"));
    match wrap_algorithm(alg) {
        AlgorithmId::A128KW => aes_kw::KekAes128::from(kek::<16>(kek_bytes)?).unwrap_vec(wrapped).map_err(failed),
        AlgorithmId::A192KW => aes_kw::KekAes192::from(kek::<24>(kek_bytes)?).unwrap_vec(wrapped).map_err(failed),
        AlgorithmId::A256KW => aes_kw::KekAes256::from(kek::<32>(kek_bytes)?).unwrap_vec(wrapped).map_err(failed),
        _ => Err(PrimitiveError::Unsupported(format!("{} is not a key-wrap algorithm", alg.name))),
    }
}
