// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! COSE_Sign with several independent signers.

mod common;

use common::*;
use cosemsg::{
    AlgorithmId, CoseError, CoseMessage, CoseSign, Curve, DecodeOptions, HeaderMap, HeaderParam, MessageKind,
    SignerSpec,
};

fn two_signers() -> (CoseSign, cosemsg::CoseKey, cosemsg::CoseKey) {
    let first = es256_key().with_kid(b"first".to_vec());
    let second = generated(Curve::P384).with_alg(AlgorithmId::ES384).with_kid(b"second".to_vec());

    let message = CoseSign::builder()
        .protected(HeaderMap::new().with_content_type("text/plain"))
        .signer(SignerSpec::new(first.clone()))
        .signer(SignerSpec::new(second.clone()))
        .sign(&backend(), b"shared payload")
        .unwrap();
    (message, first.public_key(), second.public_key())
}

#[test]
fn every_signer_verifies_with_its_own_key() {
    let (message, first, second) = two_signers();
    let decoded = CoseSign::from_cbor(&message.to_cbor().unwrap(), &DecodeOptions::default()).unwrap();

    assert_eq!(decoded.signatures.len(), 2);
    decoded
        .verify_all(&backend(), &[first, second], &DecodeOptions::default())
        .unwrap();
}

#[test]
fn signer_kid_and_alg_are_placed_per_signer() {
    let (message, _, _) = two_signers();
    let signer = &message.signatures[1];

    assert_eq!(signer.headers.unprotected.key_id(), Some(&b"second"[..]));
    assert_eq!(
        signer.headers.protected.map().algorithm().unwrap(),
        Some(AlgorithmId::ES384)
    );
}

/// Corrupting one signature leaves the others valid.
#[test]
fn signers_are_independent() {
    let (mut message, first, second) = two_signers();
    message.signatures[1].signature[0] ^= 0xFF;
    let options = DecodeOptions::default();

    message.verify_signer(0, &backend(), &first, &options).unwrap();
    let err = message.verify_signer(1, &backend(), &second, &options).unwrap_err();
    assert_eq!(err, CoseError::AuthenticationFailure);

    let err = message.verify_all(&backend(), &[first, second], &options).unwrap_err();
    assert_eq!(err, CoseError::AuthenticationFailure);
}

#[test]
fn swapped_keys_do_not_verify() {
    let (message, _, second) = two_signers();
    let err = message
        .verify_signer(0, &backend(), &second, &DecodeOptions::default())
        .unwrap_err();
    assert!(matches!(err, CoseError::IncompatibleKey(_)), "{err:?}");

    let other = generated(Curve::P256);
    let err = message
        .verify_signer(0, &backend(), &other, &DecodeOptions::default())
        .unwrap_err();
    assert_eq!(err, CoseError::AuthenticationFailure);
}

#[test]
fn key_count_must_match_signer_count() {
    let (message, first, _) = two_signers();
    let err = message
        .verify_all(&backend(), &[first], &DecodeOptions::default())
        .unwrap_err();
    assert!(matches!(err, CoseError::IncompatibleKey(_)), "{err:?}");
}

#[test]
fn per_signer_external_aad() {
    let key = es256_key();
    let message = CoseSign::builder()
        .signer(SignerSpec::new(key.clone()).with_external_aad(b"signer aad".to_vec()))
        .sign(&backend(), b"payload")
        .unwrap();

    let err = message
        .verify_signer(0, &backend(), &key, &DecodeOptions::default())
        .unwrap_err();
    assert_eq!(err, CoseError::AuthenticationFailure);

    let options = DecodeOptions::default().with_external_aad(b"signer aad".to_vec());
    message.verify_signer(0, &backend(), &key, &options).unwrap();
}

#[test]
fn body_protected_header_is_covered_by_every_signature() {
    let (mut message, first, _) = two_signers();
    let tampered = cosemsg::HeaderPair::new(
        HeaderMap::new().with_content_type("application/json"),
        HeaderMap::new(),
    )
    .unwrap();
    message.headers = tampered;

    let err = message
        .verify_signer(0, &backend(), &first, &DecodeOptions::default())
        .unwrap_err();
    assert_eq!(err, CoseError::AuthenticationFailure);
}

#[test]
fn signing_without_signers_is_rejected() {
    let err = CoseSign::builder().sign(&backend(), b"payload").unwrap_err();
    assert_eq!(err, CoseError::MissingSigner);
}

#[test]
fn decoding_empty_signer_array_is_missing_signer() {
    // 98([h'', {}, nil, []])
    let err = CoseMessage::from_cbor(&h("d8628440a0f680"), &DecodeOptions::default()).unwrap_err();
    assert_eq!(err, CoseError::MissingSigner);
}

#[test]
fn decoded_message_reports_its_kind() {
    let (message, _, _) = two_signers();
    let decoded = cosemsg::decode(&message.to_cbor().unwrap(), &DecodeOptions::default()).unwrap();
    assert_eq!(decoded.kind(), MessageKind::Sign);
    assert!(matches!(decoded, CoseMessage::Sign(ref m) if m.headers.protected.map().contains_param(HeaderParam::ContentType)));
}
