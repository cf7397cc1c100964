// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Byte layout of Sig_structure, Enc_structure, MAC_structure and COSE_KDF_Context.

mod common;

use common::*;
use cosemsg::{
    AlgorithmId, CoseError, HeaderMap, HeaderPair, HeaderParam, HeaderPolicy, KdfContext, PartyInfo,
    StructureBuilder, StructureContext,
};

/// ES256 over "example" with `{1: -7}` protected and no external AAD.
#[test]
fn signature1_structure_matches_reference_bytes() {
    let tbs = StructureBuilder::signature(StructureContext::Signature1, &h("a10126"), None, b"", b"example").unwrap();
    assert_eq!(
        tbs,
        h(concat!(
            "84",
            "6a", "5369676e617475726531",
            "43", "a10126",
            "40",
            "47", "6578616d706c65",
        ))
    );
}

#[test]
fn signature_structure_includes_signer_protected_bucket() {
    let tbs = StructureBuilder::signature(
        StructureContext::Signature,
        b"",
        Some(h("a10126").as_slice()),
        b"aad",
        b"p",
    )
    .unwrap();
    assert_eq!(
        tbs,
        h(concat!(
            "85",
            "69", "5369676e6174757265",
            "40",
            "43", "a10126",
            "43", "616164",
            "41", "70",
        ))
    );
}

#[test]
fn signature_structure_rejects_signer_mismatch() {
    let err = StructureBuilder::signature(StructureContext::Signature, b"", None, b"", b"").unwrap_err();
    assert!(matches!(err, CoseError::MalformedEncoding(_)), "{err:?}");

    let err = StructureBuilder::signature(StructureContext::Signature1, b"", Some(&[][..]), b"", b"").unwrap_err();
    assert!(matches!(err, CoseError::MalformedEncoding(_)), "{err:?}");
}

#[test]
fn encryption_structure_layout() {
    let aad = StructureBuilder::encryption(StructureContext::Encrypt0, &h("a10101"), b"").unwrap();
    assert_eq!(aad, h(concat!("83", "68", "456e637279707430", "43", "a10101", "40")));

    let rec = StructureBuilder::encryption(StructureContext::EncRecipient, b"", b"x").unwrap();
    assert_eq!(rec[0], 0x83);
    assert_eq!(&rec[1..15], b"\x6dEnc_Recipient");
}

#[test]
fn mac_structure_uses_mac_context_strings() {
    let mac0 = StructureBuilder::mac(StructureContext::Mac0, &h("a10105"), b"", b"example").unwrap();
    assert_eq!(&mac0[..6], h("84644d414330").as_slice());

    let mac = StructureBuilder::mac(StructureContext::Mac, b"", b"", b"").unwrap();
    assert_eq!(mac, h("84634d4143404040"));
}

#[test]
fn builders_reject_foreign_contexts() {
    let err = StructureBuilder::encryption(StructureContext::Mac, b"", b"").unwrap_err();
    assert!(matches!(err, CoseError::MalformedEncoding(_)), "{err:?}");

    let err = StructureBuilder::mac(StructureContext::Encrypt, b"", b"", b"").unwrap_err();
    assert!(matches!(err, CoseError::MalformedEncoding(_)), "{err:?}");

    let err = StructureBuilder::signature(StructureContext::Mac0, b"", None, b"", b"").unwrap_err();
    assert!(matches!(err, CoseError::MalformedEncoding(_)), "{err:?}");
}

/// Absent party fields encode as nil; the key length is in bits.
#[test]
fn kdf_context_layout() {
    let ctx = KdfContext {
        algorithm: AlgorithmId::A128GCM,
        party_u: PartyInfo::default(),
        party_v: PartyInfo::default(),
        key_data_length: 128,
        protected: Vec::new(),
    };
    assert_eq!(ctx.encode().unwrap(), h("840183f6f6f683f6f6f682188040"));
}

#[test]
fn kdf_context_reads_party_info_from_headers() {
    let headers = HeaderPair::new(
        HeaderMap::new().with_algorithm(AlgorithmId::ECDH_ES_HKDF_256),
        HeaderMap::new()
            .with(HeaderParam::PartyUNonce, vec![0xAAu8; 2])
            .with(HeaderParam::PartyVIdentity, b"bob".to_vec()),
    )
    .unwrap();
    let policy = HeaderPolicy::default();
    let effective = headers.effective(&policy).unwrap();

    let ctx = KdfContext::for_recipient(AlgorithmId::A256KW, 32, headers.protected.encoded(), &effective);
    assert_eq!(ctx.key_data_length, 256);
    assert_eq!(ctx.party_u.nonce, Some(vec![0xAA, 0xAA]));
    assert_eq!(ctx.party_v.identity, Some(b"bob".to_vec()));
    assert_eq!(ctx.party_u.identity, None);
    assert_eq!(ctx.protected, h("a1013818"));
}
