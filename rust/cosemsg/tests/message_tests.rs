// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tag handling, generic dispatch and strict envelope decoding.

mod common;

use common::*;
use cosemsg::{
    decode, encode, AlgorithmId, CoseError, CoseKey, CoseMac0, CoseMessage, CoseSign1, DecodeOptions, HeaderMap,
    MessageKind, TagPolicy,
};

fn mac0() -> CoseMac0 {
    CoseMac0::builder()
        .protected(HeaderMap::new().with_algorithm(AlgorithmId::HMAC_256_256))
        .create(&backend(), &CoseKey::symmetric(vec![0x01; 32]), b"payload")
        .unwrap()
}

#[test]
fn decode_dispatches_on_tag() {
    let message = CoseMessage::Mac0(mac0());
    let encoded = encode(&message).unwrap();

    let decoded = decode(&encoded, &DecodeOptions::default()).unwrap();
    assert_eq!(decoded.kind(), MessageKind::Mac0);
    assert_eq!(decoded, message);
    assert_eq!(encode(&decoded).unwrap(), encoded);
}

#[test]
fn kinds_map_to_registered_tags() {
    for kind in MessageKind::ALL {
        assert_eq!(MessageKind::from_tag(kind.tag()), Some(kind));
    }
    assert_eq!(MessageKind::Sign1.tag(), 18);
    assert_eq!(MessageKind::Encrypt.tag(), 96);
    assert_eq!(MessageKind::from_tag(99), None);
    assert_eq!(MessageKind::Encrypt0.to_string(), "COSE_Encrypt0");
}

#[test]
fn required_tag_policy_rejects_untagged_input() {
    let untagged = CoseMessage::Mac0(mac0()).to_cbor_untagged().unwrap();
    assert_eq!(untagged[0], 0x84);

    let err = decode(&untagged, &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, CoseError::TagMismatch { found: None, .. }), "{err:?}");
}

#[test]
fn optional_tag_policy_needs_a_single_expected_kind() {
    let untagged = CoseMessage::Mac0(mac0()).to_cbor_untagged().unwrap();
    let optional = DecodeOptions::default().with_tag_policy(TagPolicy::Optional);

    let err = decode(&untagged, &optional).unwrap_err();
    assert!(matches!(err, CoseError::TagMismatch { found: None, .. }), "{err:?}");

    let decoded = decode(&untagged, &optional.clone().expecting(MessageKind::Mac0)).unwrap();
    assert_eq!(decoded.kind(), MessageKind::Mac0);

    // A present tag is still honored.
    let tagged = mac0().to_cbor().unwrap();
    assert_eq!(decode(&tagged, &optional).unwrap().kind(), MessageKind::Mac0);
}

#[test]
fn untagged_policy_decodes_as_given_kind() {
    let message = mac0();
    let untagged = CoseMessage::Mac0(message.clone()).to_cbor_untagged().unwrap();
    let options = DecodeOptions::default().with_tag_policy(TagPolicy::Untagged(MessageKind::Mac0));

    let decoded = CoseMac0::from_cbor(&untagged, &options).unwrap();
    assert_eq!(decoded, message);

    let err = CoseMac0::from_cbor(&message.to_cbor().unwrap(), &options).unwrap_err();
    assert!(matches!(err, CoseError::TagMismatch { found: Some(17), .. }), "{err:?}");
}

#[test]
fn typed_decode_rejects_other_kinds() {
    let encoded = mac0().to_cbor().unwrap();
    let err = CoseSign1::from_cbor(&encoded, &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, CoseError::TagMismatch { found: Some(17), .. }), "{err:?}");

    let sign1_only = DecodeOptions::default().expecting(MessageKind::Sign1);
    let err = decode(&encoded, &sign1_only).unwrap_err();
    assert!(matches!(err, CoseError::TagMismatch { found: Some(17), .. }), "{err:?}");
}

#[test]
fn unknown_tag_is_a_tag_mismatch() {
    // 99([h'', {}, h'', h''])
    let err = decode(&h("d863844040a04040"), &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, CoseError::TagMismatch { found: Some(99), .. }), "{err:?}");
}

#[test]
fn empty_input_is_malformed() {
    let err = decode(&[], &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, CoseError::MalformedEncoding(_)), "{err:?}");
}

#[test]
fn trailing_bytes_are_rejected() {
    let mut encoded = mac0().to_cbor().unwrap();
    encoded.push(0x00);
    let err = decode(&encoded, &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, CoseError::MalformedEncoding(_)), "{err:?}");
}

#[test]
fn wrong_arity_is_malformed() {
    // 18([h'a10126', {}, h''])
    let err = decode(&h("d28343a10126a040"), &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, CoseError::MalformedEncoding(_)), "{err:?}");

    // 18({})
    let err = decode(&h("d2a0"), &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, CoseError::MalformedEncoding(_)), "{err:?}");
}

#[test]
fn indefinite_length_payload_is_malformed() {
    // 18([h'a10126', {}, (_ h'61'), h''])
    let err = decode(&h("d28443a10126a05f4161ff40"), &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, CoseError::MalformedEncoding(_)), "{err:?}");
}

#[test]
fn unprotected_header_must_be_a_map() {
    // 18([h'', [], h'', h''])
    let err = decode(&h("d28440804040"), &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, CoseError::MalformedEncoding(_)), "{err:?}");
}

#[test]
fn protected_header_must_encode_a_map() {
    // 18([h'80', {}, h'', h''])
    let err = decode(&h("d2844180a04040"), &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, CoseError::MalformedHeader(_)), "{err:?}");
}

#[test]
fn protected_header_bytes_survive_re_encoding() {
    // 17([h'a1011805', {}, h'', h'']): alg 5 with a non-preferred one-byte argument.
    let input = h("d18444a1011805a04040");
    let decoded = CoseMac0::from_cbor(&input, &DecodeOptions::default()).unwrap();

    assert_eq!(decoded.headers.protected.encoded(), h("a1011805").as_slice());
    assert_eq!(
        decoded.headers.protected.map().algorithm().unwrap(),
        Some(AlgorithmId::HMAC_256_256)
    );
    assert_eq!(decoded.to_cbor().unwrap(), input);
}

/// A deeply nested unprotected header fails cleanly instead of exhausting the stack.
#[test]
fn deeply_nested_unprotected_header_is_malformed() {
    // 18([h'', {100: [[...[0]...]]}, h'', h''])
    let mut input = h("d284");
    input.push(0x40);
    input.extend(h("a11864"));
    input.extend(std::iter::repeat(0x81).take(20_000));
    input.push(0x00);
    input.extend([0x40, 0x40]);

    let err = decode(&input, &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, CoseError::MalformedHeader(_)), "{err:?}");
}
