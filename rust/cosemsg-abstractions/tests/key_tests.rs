// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! COSE_Key map conversion and key hygiene.

mod common;

use common::*;
use cosemsg_abstractions::{
    AlgorithmId, CoseError, CoseKey, Curve, HeaderKey, HeaderMap, HeaderValue, KeyOperation, KeyType,
};

#[test]
fn ec2_key_converts_to_and_from_cose_key_map() {
    let key = ec2_key(Curve::P256, false)
        .with_kid(b"11".to_vec())
        .with_alg(AlgorithmId::ECDH_ES_HKDF_256);

    let value = key.to_header_value();
    let map = value.as_map().unwrap();
    assert_eq!(map.get(&HeaderKey::Int(1)), Some(&HeaderValue::Int(2)));
    assert_eq!(map.get(&HeaderKey::Int(-1)), Some(&HeaderValue::Int(1)));

    assert_eq!(CoseKey::from_header_value(&value).unwrap(), key);
}

/// The map survives a CBOR round trip inside a header bucket.
#[test]
fn cose_key_decodes_from_wire_header() {
    let key = ec2_key(Curve::P384, false);
    let headers = HeaderMap::new().with(-1i64, key.to_header_value());
    let decoded = HeaderMap::decode(&headers.encode().unwrap()).unwrap();

    let parsed = CoseKey::from_header_value(decoded.get(&HeaderKey::Int(-1)).unwrap()).unwrap();
    assert_eq!(parsed.crv, Some(Curve::P384));
    assert_eq!(parsed.x, key.x);
}

#[test]
fn missing_kty_is_malformed() {
    let value = HeaderMap::new().with(-1i64, 1i64).entries().clone();
    let err = CoseKey::from_header_value(&HeaderValue::Map(value)).unwrap_err();
    assert!(matches!(err, CoseError::MalformedHeader(_)), "{err:?}");
}

#[test]
fn symmetric_key_without_k_is_malformed() {
    let value = HeaderMap::new().with(1i64, 4i64).entries().clone();
    let err = CoseKey::from_header_value(&HeaderValue::Map(value)).unwrap_err();
    assert!(matches!(err, CoseError::MalformedHeader(_)), "{err:?}");
}

#[test]
fn debug_output_redacts_private_material() {
    let key = CoseKey::symmetric(vec![0xAB; 16]);
    let printed = format!("{key:?}");
    assert!(printed.contains("<redacted>"));
    assert!(!printed.contains("171"));
}

#[test]
fn public_key_strips_private_part_and_restrictions() {
    let key = ec2_key(Curve::P256, true).with_key_ops([KeyOperation::DeriveKey]);
    let public = key.public_key();

    assert_eq!(public.kty, KeyType::Ec2);
    assert!(public.d.is_none());
    assert!(public.key_ops.is_empty());
    assert!(!public.has_private());
    assert_eq!(public.x, key.x);
}

#[test]
fn error_codes_are_stable() {
    assert_eq!(CoseError::AuthenticationFailure.code(), "AUTHENTICATION_FAILURE");
    assert_eq!(CoseError::RecipientNotResolvable.code(), "RECIPIENT_NOT_RESOLVABLE");

    let err = CoseError::TagMismatch {
        expected: "COSE_Sign1".to_string(),
        found: None,
    };
    assert_eq!(err.to_string(), "tag mismatch: expected COSE_Sign1, found no tag");
}
