// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Shared helpers for `cosemsg-abstractions` integration tests.

#![allow(dead_code)]

use cosemsg_abstractions::{CoseKey, Curve};

/// Encode raw CBOR with a closure, for inputs the typed API would never produce.
pub(crate) fn cbor(f: impl FnOnce(&mut minicbor::Encoder<&mut Vec<u8>>)) -> Vec<u8> {
    let mut out = Vec::new();
    f(&mut minicbor::Encoder::new(&mut out));
    out
}

pub(crate) fn h(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap()
}

/// Structurally valid EC2 key with placeholder coordinates.
///
/// Registry validation never checks that the point is on the curve, so filler bytes
/// are enough to exercise length and curve rules.
pub(crate) fn ec2_key(crv: Curve, with_private: bool) -> CoseKey {
    let n = crv.coordinate_len();
    CoseKey::ec2(crv, vec![0x11; n], vec![0x22; n], with_private.then(|| vec![0x33; n]))
}
