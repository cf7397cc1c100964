// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Message kinds and tag-driven decode dispatch.

use minicbor::{Decoder, Encoder};
use tracing::debug;

use cosemsg_abstractions::{CoseError, CoseKey, HeaderMap, HeaderParam, Result};

use crate::cbor::{self, VecEncoder};
use crate::encrypt::{CoseEncrypt, CoseEncrypt0};
use crate::mac::{CoseMac, CoseMac0};
use crate::options::{DecodeOptions, TagPolicy};
use crate::sign::{CoseSign, CoseSign1};

pub const COSE_SIGN_TAG: u64 = 98;
pub const COSE_SIGN1_TAG: u64 = 18;
pub const COSE_ENCRYPT_TAG: u64 = 96;
pub const COSE_ENCRYPT0_TAG: u64 = 16;
pub const COSE_MAC_TAG: u64 = 97;
pub const COSE_MAC0_TAG: u64 = 17;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Sign,
    Sign1,
    Encrypt,
    Encrypt0,
    Mac,
    Mac0,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        MessageKind::Sign,
        MessageKind::Sign1,
        MessageKind::Encrypt,
        MessageKind::Encrypt0,
        MessageKind::Mac,
        MessageKind::Mac0,
    ];

    pub const fn tag(self) -> u64 {
        match self {
            MessageKind::Sign => COSE_SIGN_TAG,
            MessageKind::Sign1 => COSE_SIGN1_TAG,
            MessageKind::Encrypt => COSE_ENCRYPT_TAG,
            MessageKind::Encrypt0 => COSE_ENCRYPT0_TAG,
            MessageKind::Mac => COSE_MAC_TAG,
            MessageKind::Mac0 => COSE_MAC0_TAG,
        }
    }

    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            COSE_SIGN_TAG => Some(MessageKind::Sign),
            COSE_SIGN1_TAG => Some(MessageKind::Sign1),
            COSE_ENCRYPT_TAG => Some(MessageKind::Encrypt),
            COSE_ENCRYPT0_TAG => Some(MessageKind::Encrypt0),
            COSE_MAC_TAG => Some(MessageKind::Mac),
            COSE_MAC0_TAG => Some(MessageKind::Mac0),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            MessageKind::Sign => "COSE_Sign",
            MessageKind::Sign1 => "COSE_Sign1",
            MessageKind::Encrypt => "COSE_Encrypt",
            MessageKind::Encrypt0 => "COSE_Encrypt0",
            MessageKind::Mac => "COSE_Mac",
            MessageKind::Mac0 => "COSE_Mac0",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Any of the six COSE messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoseMessage {
    Sign(CoseSign),
    Sign1(CoseSign1),
    Encrypt(CoseEncrypt),
    Encrypt0(CoseEncrypt0),
    Mac(CoseMac),
    Mac0(CoseMac0),
}

impl CoseMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            CoseMessage::Sign(_) => MessageKind::Sign,
            CoseMessage::Sign1(_) => MessageKind::Sign1,
            CoseMessage::Encrypt(_) => MessageKind::Encrypt,
            CoseMessage::Encrypt0(_) => MessageKind::Encrypt0,
            CoseMessage::Mac(_) => MessageKind::Mac,
            CoseMessage::Mac0(_) => MessageKind::Mac0,
        }
    }

    /// Tagged CBOR encoding.
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut enc = Encoder::new(&mut out);
        cbor::write_tag(&mut enc, self.kind().tag())?;
        self.encode_body(&mut enc)?;
        Ok(out)
    }

    /// CBOR encoding without the leading tag.
    pub fn to_cbor_untagged(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut enc = Encoder::new(&mut out);
        self.encode_body(&mut enc)?;
        Ok(out)
    }

    fn encode_body(&self, enc: &mut VecEncoder<'_>) -> Result<()> {
        match self {
            CoseMessage::Sign(m) => m.encode_body(enc),
            CoseMessage::Sign1(m) => m.encode_body(enc),
            CoseMessage::Encrypt(m) => m.encode_body(enc),
            CoseMessage::Encrypt0(m) => m.encode_body(enc),
            CoseMessage::Mac(m) => m.encode_body(enc),
            CoseMessage::Mac0(m) => m.encode_body(enc),
        }
    }

    /// Decode any accepted message kind. Dispatch is on the tag number.
    pub fn from_cbor(input: &[u8], options: &DecodeOptions) -> Result<Self> {
        if input.is_empty() {
            return Err(CoseError::MalformedEncoding("empty input".to_string()));
        }

        let mut dec = Decoder::new(input);
        let tag = cbor::read_optional_tag(&mut dec)?;
        let kind = resolve_kind(tag, options)?;
        debug!(kind = kind.name(), tagged = tag.is_some(), len = input.len(), "decoding COSE message");

        let depth = options.max_recipient_depth;
        let message = match kind {
            MessageKind::Sign => CoseMessage::Sign(CoseSign::decode_body(&mut dec)?),
            MessageKind::Sign1 => CoseMessage::Sign1(CoseSign1::decode_body(&mut dec)?),
            MessageKind::Encrypt => CoseMessage::Encrypt(CoseEncrypt::decode_body(&mut dec, depth)?),
            MessageKind::Encrypt0 => CoseMessage::Encrypt0(CoseEncrypt0::decode_body(&mut dec)?),
            MessageKind::Mac => CoseMessage::Mac(CoseMac::decode_body(&mut dec, depth)?),
            MessageKind::Mac0 => CoseMessage::Mac0(CoseMac0::decode_body(&mut dec)?),
        };

        cbor::ensure_consumed(&dec, input, kind.name())?;
        Ok(message)
    }
}

fn expected_names(options: &DecodeOptions) -> String {
    let kinds: &[MessageKind] = if options.expected.is_empty() {
        &MessageKind::ALL
    } else {
        &options.expected
    };
    kinds.iter().map(|k| format!("{k} ({})", k.tag())).collect::<Vec<_>>().join(" or ")
}

fn resolve_kind(tag: Option<u64>, options: &DecodeOptions) -> Result<MessageKind> {
    let mismatch = |found: Option<u64>| CoseError::TagMismatch {
        expected: expected_names(options),
        found,
    };

    match (tag, options.tag_policy) {
        (Some(t), TagPolicy::Required | TagPolicy::Optional) => match MessageKind::from_tag(t) {
            Some(kind) if options.accepts(kind) => Ok(kind),
            _ => Err(mismatch(Some(t))),
        },
        (None, TagPolicy::Required) => Err(mismatch(None)),
        (None, TagPolicy::Optional) => match options.expected.as_slice() {
            [kind] => Ok(*kind),
            _ => Err(mismatch(None)),
        },
        (None, TagPolicy::Untagged(kind)) if options.accepts(kind) => Ok(kind),
        (found, TagPolicy::Untagged(kind)) => Err(CoseError::TagMismatch {
            expected: format!("untagged {kind}"),
            found,
        }),
    }
}

/// Decode helper for the typed `from_cbor` constructors.
pub(crate) fn decode_as(input: &[u8], kind: MessageKind, options: &DecodeOptions) -> Result<CoseMessage> {
    let mut options = options.clone();
    options.expected = vec![kind];
    CoseMessage::from_cbor(input, &options)
}

/// Put `alg` into the protected bucket from the key when the caller left it out.
pub(crate) fn with_default_algorithm(mut protected: HeaderMap, unprotected: &HeaderMap, key: &CoseKey) -> HeaderMap {
    if let Some(alg) = key.alg {
        if !protected.contains_param(HeaderParam::Algorithm) && !unprotected.contains_param(HeaderParam::Algorithm) {
            protected.insert(HeaderParam::Algorithm, alg.value());
        }
    }
    protected
}
