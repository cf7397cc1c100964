// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! AEAD, HMAC, HKDF and key wrap against published vectors.

mod common;

use common::*;
use cosemsg_abstractions::{AlgorithmId, DeriveParams, KeyAgreementInput, PrimitiveBackend, PrimitiveError};
use cosemsg_rustcrypto::RustCryptoBackend;

/// RFC 3394 section 4.1: 128-bit key data wrapped with a 128-bit KEK.
#[test]
fn aes_key_wrap_matches_rfc3394() {
    let backend = RustCryptoBackend::new();
    let kek = h("000102030405060708090A0B0C0D0E0F");
    let key = h("00112233445566778899AABBCCDDEEFF");
    let expected = h("1FA68B0A8112B447AEF34BD8FB5A7B829D3E862371D2CFE5");

    let wrapped = backend.wrap(desc(AlgorithmId::A128KW), &kek, &key).unwrap();
    assert_eq!(wrapped, expected);
    assert_eq!(backend.unwrap(desc(AlgorithmId::A128KW), &kek, &wrapped).unwrap(), key);
}

#[test]
fn key_unwrap_with_wrong_kek_fails() {
    let backend = RustCryptoBackend::new();
    let wrapped = h("1FA68B0A8112B447AEF34BD8FB5A7B829D3E862371D2CFE5");
    let err = backend.unwrap(desc(AlgorithmId::A128KW), &[0u8; 16], &wrapped).unwrap_err();
    assert!(matches!(err, PrimitiveError::Failed(_)), "{err:?}");
}

/// ECDH+KW descriptors wrap with their underlying AES-KW variant.
#[test]
fn ecdh_key_wrap_descriptor_uses_inner_wrap() {
    let backend = RustCryptoBackend::new();
    let kek = [9u8; 32];
    let cek = [1u8; 16];
    let a = backend.wrap(desc(AlgorithmId::ECDH_ES_A256KW), &kek, &cek).unwrap();
    let b = backend.wrap(desc(AlgorithmId::A256KW), &kek, &cek).unwrap();
    assert_eq!(a, b);
}

/// RFC 5869 appendix A.1.
#[test]
fn hkdf_sha256_matches_rfc5869() {
    let backend = RustCryptoBackend::new();
    let ikm = [0x0bu8; 22];
    let salt = h("000102030405060708090a0b0c");
    let info = h("f0f1f2f3f4f5f6f7f8f9");

    let okm = backend
        .derive(&DeriveParams {
            algorithm: desc(AlgorithmId::DIRECT_HKDF_SHA_256),
            input: KeyAgreementInput::Shared(&ikm),
            salt: Some(&salt),
            context: &info,
            output_len: 42,
        })
        .unwrap();

    assert_eq!(
        okm,
        h("3cb25f25faacd57a90434f64d0362f2a2d2d0a90cf1a5a4c5db02d56ecc4c5bf34007208d5b887185865")
    );
}

/// RFC 4231 test case 2, full and truncated.
#[test]
fn hmac_sha256_matches_rfc4231_and_truncates() {
    let backend = RustCryptoBackend::new();
    let data = b"what do ya want for nothing?";

    let full = backend.mac(desc(AlgorithmId::HMAC_256_256), b"Jefe", data).unwrap();
    assert_eq!(full, h("5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"));

    let short = backend.mac(desc(AlgorithmId::HMAC_256_64), b"Jefe", data).unwrap();
    assert_eq!(short, h("5bdcc146bf60754e"));

    assert!(backend.verify_mac(desc(AlgorithmId::HMAC_256_64), b"Jefe", data, &short).unwrap());
    assert!(!backend.verify_mac(desc(AlgorithmId::HMAC_256_64), b"Jefe", data, &full).unwrap());
}

#[test]
fn gcm_round_trip_and_tamper_detection() {
    let backend = RustCryptoBackend::new();
    let alg = desc(AlgorithmId::A128GCM);
    let key = [0x42u8; 16];
    let nonce = [0x24u8; 12];

    let sealed = backend.seal(alg, &key, &nonce, b"aad", b"plaintext").unwrap();
    assert_eq!(sealed.len(), b"plaintext".len() + 16);
    assert_eq!(backend.open(alg, &key, &nonce, b"aad", &sealed).unwrap(), b"plaintext");

    let err = backend.open(alg, &key, &nonce, b"other aad", &sealed).unwrap_err();
    assert!(matches!(err, PrimitiveError::Failed(_)), "{err:?}");
}

#[test]
fn a192gcm_is_supported() {
    let backend = RustCryptoBackend::new();
    let alg = desc(AlgorithmId::A192GCM);
    let sealed = backend.seal(alg, &[1u8; 24], &[2u8; 12], b"", b"x").unwrap();
    assert_eq!(backend.open(alg, &[1u8; 24], &[2u8; 12], b"", &sealed).unwrap(), b"x");
}

#[test]
fn ccm_tag_and_nonce_lengths_follow_the_variant() {
    let backend = RustCryptoBackend::new();

    let short = desc(AlgorithmId::AES_CCM_16_64_128);
    let sealed = backend.seal(short, &[3u8; 16], &[4u8; 13], b"", b"hello").unwrap();
    assert_eq!(sealed.len(), 5 + 8);

    let long = desc(AlgorithmId::AES_CCM_64_128_256);
    let sealed = backend.seal(long, &[3u8; 32], &[4u8; 7], b"", b"hello").unwrap();
    assert_eq!(sealed.len(), 5 + 16);
    assert_eq!(backend.open(long, &[3u8; 32], &[4u8; 7], b"", &sealed).unwrap(), b"hello");
}

#[test]
fn wrong_nonce_length_is_rejected_without_panicking() {
    let backend = RustCryptoBackend::new();
    let err = backend
        .seal(desc(AlgorithmId::A128GCM), &[0u8; 16], &[0u8; 13], b"", b"x")
        .unwrap_err();
    assert!(matches!(err, PrimitiveError::InvalidKey(_)), "{err:?}");
}

#[test]
fn non_aead_algorithm_is_unsupported_for_seal() {
    let backend = RustCryptoBackend::new();
    let err = backend.seal(desc(AlgorithmId::A128KW), &[0u8; 16], &[0u8; 12], b"", b"x").unwrap_err();
    assert!(matches!(err, PrimitiveError::Unsupported(_)), "{err:?}");
}

#[test]
fn random_returns_requested_length() {
    let backend = RustCryptoBackend::new();
    let a = backend.random(32).unwrap();
    let b = backend.random(32).unwrap();
    assert_eq!(a.len(), 32);
    assert_ne!(a, b);
}
