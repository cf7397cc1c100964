// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Signatures, ECDH and key generation.

mod common;

use common::*;
use cosemsg_abstractions::{AlgorithmId, CoseKey, Curve, DeriveParams, KeyAgreementInput, PrimitiveBackend, PrimitiveError};
use cosemsg_rustcrypto::RustCryptoBackend;

#[test]
fn ecdsa_signatures_verify_on_every_nist_curve() {
    let backend = RustCryptoBackend::new();
    for (alg, curve, sig_len) in [
        (AlgorithmId::ES256, Curve::P256, 64),
        (AlgorithmId::ES384, Curve::P384, 96),
        (AlgorithmId::ES512, Curve::P521, 132),
    ] {
        let key = backend.generate_ephemeral(curve).unwrap();
        let signature = backend.sign(desc(alg), &key, b"to be signed").unwrap();
        assert_eq!(signature.len(), sig_len, "{alg}");

        let public = key.public_key();
        assert!(backend.verify(desc(alg), &public, b"to be signed", &signature).unwrap());
        assert!(!backend.verify(desc(alg), &public, b"something else", &signature).unwrap());
    }
}

/// Deterministic ECDSA: the same key and data always give the same signature.
#[test]
fn ecdsa_signing_is_deterministic() {
    let backend = RustCryptoBackend::new();
    let key = backend.generate_ephemeral(Curve::P256).unwrap();
    let a = backend.sign(desc(AlgorithmId::ES256), &key, b"data").unwrap();
    let b = backend.sign(desc(AlgorithmId::ES256), &key, b"data").unwrap();
    assert_eq!(a, b);
}

#[test]
fn malformed_signature_is_a_negative_result() {
    let backend = RustCryptoBackend::new();
    let key = backend.generate_ephemeral(Curve::P256).unwrap().public_key();
    assert!(!backend.verify(desc(AlgorithmId::ES256), &key, b"data", &[0u8; 10]).unwrap());
}

/// RFC 8032 section 7.1, test 1.
#[test]
fn ed25519_matches_rfc8032() {
    let backend = RustCryptoBackend::new();
    let d = h("9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60");
    let x = h("d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a");
    let key = CoseKey::okp(Curve::Ed25519, x, Some(d));

    let signature = backend.sign(desc(AlgorithmId::EDDSA), &key, b"").unwrap();
    assert_eq!(
        signature,
        h("e5564300c360ac729086e2cc806e828a84877f1eb8e5d974d873e065224901555fb8821590a33bacc61e39701cf9b46bd25bf5f0595bbe24655141438e7a100b")
    );
    assert!(backend.verify(desc(AlgorithmId::EDDSA), &key.public_key(), b"", &signature).unwrap());
}

#[test]
fn signing_with_mismatched_curve_is_unsupported() {
    let backend = RustCryptoBackend::new();
    let key = backend.generate_ephemeral(Curve::P384).unwrap();
    let err = backend.sign(desc(AlgorithmId::ES256), &key, b"data").unwrap_err();
    assert!(matches!(err, PrimitiveError::Unsupported(_)), "{err:?}");
}

/// Both sides of an ECDH exchange derive the same key.
#[test]
fn ecdh_derivation_agrees_in_both_directions() {
    let backend = RustCryptoBackend::new();
    let alice = backend.generate_ephemeral(Curve::P256).unwrap();
    let bob = backend.generate_ephemeral(Curve::P256).unwrap();
    let alg = desc(AlgorithmId::ECDH_ES_HKDF_256);

    let derive = |private_key: &CoseKey, public_key: &CoseKey| {
        backend
            .derive(&DeriveParams {
                algorithm: alg,
                input: KeyAgreementInput::Ecdh { private_key, public_key },
                salt: None,
                context: b"context",
                output_len: 16,
            })
            .unwrap()
    };

    let ab = derive(&alice, &bob.public_key());
    let ba = derive(&bob, &alice.public_key());
    assert_eq!(ab.len(), 16);
    assert_eq!(ab, ba);
}

#[test]
fn ecdh_across_curves_is_rejected() {
    let backend = RustCryptoBackend::new();
    let p256 = backend.generate_ephemeral(Curve::P256).unwrap();
    let p384 = backend.generate_ephemeral(Curve::P384).unwrap();

    let err = backend
        .derive(&DeriveParams {
            algorithm: desc(AlgorithmId::ECDH_ES_HKDF_256),
            input: KeyAgreementInput::Ecdh {
                private_key: &p256,
                public_key: &p384.public_key(),
            },
            salt: None,
            context: b"",
            output_len: 16,
        })
        .unwrap_err();
    assert!(matches!(err, PrimitiveError::InvalidKey(_)), "{err:?}");
}

#[test]
fn generated_keys_have_curve_sized_coordinates() {
    let backend = RustCryptoBackend::new();
    let key = backend.generate_ephemeral(Curve::P521).unwrap();
    assert_eq!(key.x.as_ref().map(Vec::len), Some(66));
    assert_eq!(key.y.as_ref().map(Vec::len), Some(66));
    assert_eq!(key.d.as_ref().map(Vec::len), Some(66));

    let err = backend.generate_ephemeral(Curve::X25519).unwrap_err();
    assert!(matches!(err, PrimitiveError::Unsupported(_)), "{err:?}");
}
