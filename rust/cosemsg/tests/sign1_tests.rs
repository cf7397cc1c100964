// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! COSE_Sign1 creation and verification.

mod common;

use common::*;
use cosemsg::{
    verify_sign1, AlgorithmId, CoseError, CoseSign1, Curve, DecodeOptions, HeaderKey, HeaderMap, HeaderPolicy,
};

fn sign_example() -> Vec<u8> {
    CoseSign1::builder()
        .sign(&backend(), &es256_key(), b"example")
        .unwrap()
        .to_cbor()
        .unwrap()
}

/// ES256 with RFC 6979 nonces over "example": `{1: -7}` protected, empty unprotected.
const ES256_EXAMPLE: &str = "d28443a10126a0476578616d706c655840b0dba2ff5b1648f3ca1eafaae5b5d459c40101054bb5c8f0a3d0e97d3006ef9450f2a6122f805741c1a03a6c7d7f1d4115df3492bc88cbd5e7bb280b05968262";

#[test]
fn es256_encoding_matches_reference_vector() {
    assert_eq!(sign_example(), h(ES256_EXAMPLE));
}

#[test]
fn es256_reference_vector_verifies() {
    let vector = h(ES256_EXAMPLE);

    let payload = verify_sign1(&vector, &backend(), &es256_key().public_key(), &DecodeOptions::default()).unwrap();
    assert_eq!(payload, b"example");

    let other = generated(Curve::P256).public_key();
    let err = verify_sign1(&vector, &backend(), &other, &DecodeOptions::default()).unwrap_err();
    assert_eq!(err, CoseError::AuthenticationFailure);
}

#[test]
fn es256_signature_verifies_with_public_key() {
    let encoded = sign_example();
    let public = es256_key().public_key();

    let payload = verify_sign1(&encoded, &backend(), &public, &DecodeOptions::default()).unwrap();
    assert_eq!(payload, b"example");
}

#[test]
fn tampered_signature_fails_authentication() {
    let mut encoded = sign_example();
    let last = encoded.len() - 1;
    encoded[last] ^= 0x01;

    let err = verify_sign1(&encoded, &backend(), &es256_key(), &DecodeOptions::default()).unwrap_err();
    assert_eq!(err, CoseError::AuthenticationFailure);
}

#[test]
fn tampered_payload_fails_authentication() {
    let mut encoded = sign_example();
    // First byte of "example".
    encoded[8] ^= 0x20;

    let err = verify_sign1(&encoded, &backend(), &es256_key(), &DecodeOptions::default()).unwrap_err();
    assert_eq!(err, CoseError::AuthenticationFailure);
}

/// A content type changed inside the protected bucket no longer matches the signature.
#[test]
fn tampered_protected_value_fails_authentication() {
    let mut encoded = CoseSign1::builder()
        .protected(
            HeaderMap::new()
                .with_algorithm(AlgorithmId::ES256)
                .with_content_type("text/plain"),
        )
        .sign(&backend(), &es256_key(), b"example")
        .unwrap()
        .to_cbor()
        .unwrap();
    let public = es256_key().public_key();
    verify_sign1(&encoded, &backend(), &public, &DecodeOptions::default()).unwrap();

    let at = encoded.windows(10).position(|w| w == b"text/plain").unwrap();
    // "text/plain" becomes "uext/plain".
    encoded[at] ^= 0x01;

    let err = verify_sign1(&encoded, &backend(), &public, &DecodeOptions::default()).unwrap_err();
    assert_eq!(err, CoseError::AuthenticationFailure);
}

/// No single-bit change to the `a1 01 26` protected bytes yields a verifiable message.
#[test]
fn every_protected_bit_flip_is_rejected() {
    let vector = h(ES256_EXAMPLE);
    let public = es256_key().public_key();
    assert_eq!(&vector[3..6], h("a10126").as_slice());

    for index in 3..6 {
        for bit in 0..8 {
            let mut tampered = vector.clone();
            tampered[index] ^= 1 << bit;
            let result = verify_sign1(&tampered, &backend(), &public, &DecodeOptions::default());
            assert!(result.is_err(), "byte {index} bit {bit} verified");
        }
    }
}

#[test]
fn other_key_fails_authentication() {
    let other = generated(Curve::P256).public_key();
    let err = verify_sign1(&sign_example(), &backend(), &other, &DecodeOptions::default()).unwrap_err();
    assert_eq!(err, CoseError::AuthenticationFailure);
}

/// Key validation happens before the backend is reached.
#[test]
fn p384_key_with_es256_is_incompatible_without_backend_calls() {
    let counting = CountingBackend::new();
    let p384 = generated(Curve::P384);

    let err = CoseSign1::builder()
        .protected(HeaderMap::new().with_algorithm(AlgorithmId::ES256))
        .sign(&counting, &p384, b"example")
        .unwrap_err();
    assert!(matches!(err, CoseError::IncompatibleKey(_)), "{err:?}");

    let err = verify_sign1(&sign_example(), &counting, &p384.public_key(), &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, CoseError::IncompatibleKey(_)), "{err:?}");

    assert_eq!(counting.calls(), 0);
}

#[test]
fn es384_and_es512_round_trip() {
    for (alg, curve) in [(AlgorithmId::ES384, Curve::P384), (AlgorithmId::ES512, Curve::P521)] {
        let key = generated(curve);
        let message = CoseSign1::builder()
            .protected(HeaderMap::new().with_algorithm(alg))
            .sign(&backend(), &key, b"payload")
            .unwrap();
        message.verify(&backend(), &key.public_key(), &DecodeOptions::default()).unwrap();
    }
}

#[test]
fn detached_payload_requires_external_content() {
    let message = CoseSign1::builder()
        .detached(true)
        .sign(&backend(), &es256_key(), b"detached")
        .unwrap();
    assert!(message.payload.is_none());

    let encoded = message.to_cbor().unwrap();
    let public = es256_key().public_key();

    let err = verify_sign1(&encoded, &backend(), &public, &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, CoseError::MalformedEncoding(_)), "{err:?}");

    let options = DecodeOptions::default().with_detached_content(b"detached".to_vec());
    assert_eq!(verify_sign1(&encoded, &backend(), &public, &options).unwrap(), b"detached");

    let options = DecodeOptions::default().with_detached_content(b"other".to_vec());
    let err = verify_sign1(&encoded, &backend(), &public, &options).unwrap_err();
    assert_eq!(err, CoseError::AuthenticationFailure);
}

#[test]
fn external_aad_is_bound_into_the_signature() {
    let encoded = CoseSign1::builder()
        .external_aad(b"context".to_vec())
        .sign(&backend(), &es256_key(), b"payload")
        .unwrap()
        .to_cbor()
        .unwrap();
    let public = es256_key().public_key();

    let err = verify_sign1(&encoded, &backend(), &public, &DecodeOptions::default()).unwrap_err();
    assert_eq!(err, CoseError::AuthenticationFailure);

    let options = DecodeOptions::default().with_external_aad(b"context".to_vec());
    verify_sign1(&encoded, &backend(), &public, &options).unwrap();
}

#[test]
fn strict_policy_rejects_unprotected_alg() {
    let encoded = CoseSign1::builder()
        .unprotected(HeaderMap::new().with_algorithm(AlgorithmId::ES256))
        .sign(&backend(), &es256_key(), b"payload")
        .unwrap()
        .to_cbor()
        .unwrap();
    let public = es256_key().public_key();

    verify_sign1(&encoded, &backend(), &public, &DecodeOptions::default()).unwrap();

    let strict = DecodeOptions::default().with_header_policy(HeaderPolicy::strict());
    let err = verify_sign1(&encoded, &backend(), &public, &strict).unwrap_err();
    assert!(matches!(err, CoseError::HeaderPolicyViolation(_)), "{err:?}");
}

#[test]
fn unknown_critical_parameter_is_rejected() {
    let protected = HeaderMap::new()
        .with_algorithm(AlgorithmId::ES256)
        .with(-70000i64, 1i64)
        .with_critical(vec![HeaderKey::Int(-70000)]);

    let err = CoseSign1::builder()
        .protected(protected)
        .sign(&backend(), &es256_key(), b"payload")
        .unwrap_err();
    assert!(matches!(err, CoseError::HeaderPolicyViolation(_)), "{err:?}");
}

#[test]
fn unregistered_algorithm_is_unknown() {
    let err = CoseSign1::builder()
        .protected(HeaderMap::new().with_algorithm(AlgorithmId(-65535)))
        .sign(&backend(), &es256_key(), b"payload")
        .unwrap_err();
    assert!(matches!(err, CoseError::UnknownAlgorithm(_)), "{err:?}");
}

#[test]
fn content_encryption_algorithm_is_not_a_signature_algorithm() {
    let err = CoseSign1::builder()
        .protected(HeaderMap::new().with_algorithm(AlgorithmId::A128GCM))
        .sign(&backend(), &p256_key(ES256_D), b"payload")
        .unwrap_err();
    assert!(matches!(err, CoseError::UnknownAlgorithm(_)), "{err:?}");
}

#[test]
fn eddsa_round_trip() {
    let d = h("9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60");
    let x = h("d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a");
    let key = cosemsg::CoseKey::okp(Curve::Ed25519, x, Some(d)).with_alg(AlgorithmId::EDDSA);

    let message = CoseSign1::builder().sign(&backend(), &key, b"ed25519").unwrap();
    assert_eq!(message.signature.len(), 64);
    message
        .verify(&backend(), &key.public_key(), &DecodeOptions::default())
        .unwrap();
}
