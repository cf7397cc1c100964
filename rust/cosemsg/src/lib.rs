// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! COSE message layer: header pairs, to-be-signed/MACed/encrypted structures, the six
//! message envelopes and recursive recipient chains.
//!
//! Cryptography is delegated to a [`PrimitiveBackend`] passed into every operation that
//! needs one. Parsing never requires a backend.

// Internal implementation modules.
mod cbor;
mod primitive;

// Public API organization (lib.rs is a publisher).
mod api;
mod encrypt;
mod mac;
mod message;
mod options;
mod recipient;
mod sign;
mod structures;

pub use cosemsg_abstractions::{
    AlgorithmClass, AlgorithmDescriptor, AlgorithmId, CoseError, CoseKey, Curve, DeriveParams, HeaderKey, HeaderMap,
    HeaderPair, HeaderParam, HeaderPolicy, HeaderValue, KeyAgreementInput, KeyOperation, KeyType, PrimitiveBackend,
    PrimitiveError, Result,
};

pub use encrypt::{CoseEncrypt, CoseEncrypt0, CoseEncrypt0Builder, CoseEncryptBuilder};
pub use mac::{CoseMac, CoseMac0, CoseMac0Builder, CoseMacBuilder};
pub use message::{CoseMessage, MessageKind};
pub use options::{DecodeOptions, TagPolicy, DEFAULT_MAX_RECIPIENT_DEPTH};
pub use recipient::{RecipientNode, RecipientSpec};
pub use sign::{CoseSign, CoseSign1, CoseSign1Builder, CoseSignBuilder, CoseSignature, SignerSpec};
pub use structures::{KdfContext, PartyInfo, StructureBuilder, StructureContext};

pub use api::{decode, decrypt_encrypt, decrypt_encrypt0, encode, verify_mac, verify_mac0, verify_sign1};
