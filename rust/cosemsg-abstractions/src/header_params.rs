// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Header parameter registry (IANA "COSE Header Parameters") and the header policy table.
//!
//! Registered labels are type-checked once, at decode time. Unregistered integer or
//! text labels pass through untouched.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CoseError, Result};
use crate::header_map::{HeaderKey, HeaderValue};

/// Registered header parameters understood by this crate.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HeaderParam {
    Algorithm,
    Critical,
    ContentType,
    KeyId,
    Iv,
    PartialIv,
    CounterSignature,
    // Algorithm-specific parameters used by key agreement recipients.
    EphemeralKey,
    StaticKey,
    StaticKeyId,
    Salt,
    PartyUIdentity,
    PartyUNonce,
    PartyUOther,
    PartyVIdentity,
    PartyVNonce,
    PartyVOther,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ValueKind {
    IntOrText,
    UintOrText,
    Bytes,
    Map,
    LabelArray,
    Any,
}

impl HeaderParam {
    pub const ALL: [HeaderParam; 17] = [
        HeaderParam::Algorithm,
        HeaderParam::Critical,
        HeaderParam::ContentType,
        HeaderParam::KeyId,
        HeaderParam::Iv,
        HeaderParam::PartialIv,
        HeaderParam::CounterSignature,
        HeaderParam::EphemeralKey,
        HeaderParam::StaticKey,
        HeaderParam::StaticKeyId,
        HeaderParam::Salt,
        HeaderParam::PartyUIdentity,
        HeaderParam::PartyUNonce,
        HeaderParam::PartyUOther,
        HeaderParam::PartyVIdentity,
        HeaderParam::PartyVNonce,
        HeaderParam::PartyVOther,
    ];

    pub const fn label(self) -> i64 {
        match self {
            HeaderParam::Algorithm => 1,
            HeaderParam::Critical => 2,
            HeaderParam::ContentType => 3,
            HeaderParam::KeyId => 4,
            HeaderParam::Iv => 5,
            HeaderParam::PartialIv => 6,
            HeaderParam::CounterSignature => 7,
            HeaderParam::EphemeralKey => -1,
            HeaderParam::StaticKey => -2,
            HeaderParam::StaticKeyId => -3,
            HeaderParam::Salt => -20,
            HeaderParam::PartyUIdentity => -21,
            HeaderParam::PartyUNonce => -22,
            HeaderParam::PartyUOther => -23,
            HeaderParam::PartyVIdentity => -24,
            HeaderParam::PartyVNonce => -25,
            HeaderParam::PartyVOther => -26,
        }
    }

    pub fn from_label(label: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.label() == label)
    }

    pub const fn name(self) -> &'static str {
        match self {
            HeaderParam::Algorithm => "alg",
            HeaderParam::Critical => "crit",
            HeaderParam::ContentType => "content type",
            HeaderParam::KeyId => "kid",
            HeaderParam::Iv => "IV",
            HeaderParam::PartialIv => "Partial IV",
            HeaderParam::CounterSignature => "counter signature",
            HeaderParam::EphemeralKey => "ephemeral key",
            HeaderParam::StaticKey => "static key",
            HeaderParam::StaticKeyId => "static key id",
            HeaderParam::Salt => "salt",
            HeaderParam::PartyUIdentity => "PartyU identity",
            HeaderParam::PartyUNonce => "PartyU nonce",
            HeaderParam::PartyUOther => "PartyU other",
            HeaderParam::PartyVIdentity => "PartyV identity",
            HeaderParam::PartyVNonce => "PartyV nonce",
            HeaderParam::PartyVOther => "PartyV other",
        }
    }

    fn value_kind(self) -> ValueKind {
        match self {
            HeaderParam::Algorithm => ValueKind::IntOrText,
            HeaderParam::Critical => ValueKind::LabelArray,
            HeaderParam::ContentType => ValueKind::UintOrText,
            HeaderParam::CounterSignature => ValueKind::Any,
            HeaderParam::EphemeralKey | HeaderParam::StaticKey => ValueKind::Map,
            HeaderParam::KeyId
            | HeaderParam::Iv
            | HeaderParam::PartialIv
            | HeaderParam::StaticKeyId
            | HeaderParam::Salt
            | HeaderParam::PartyUIdentity
            | HeaderParam::PartyUNonce
            | HeaderParam::PartyUOther
            | HeaderParam::PartyVIdentity
            | HeaderParam::PartyVNonce
            | HeaderParam::PartyVOther => ValueKind::Bytes,
        }
    }
}

/// Type-check a registered parameter value. Unregistered labels always pass.
pub(crate) fn check_registered_value(key: &HeaderKey, value: &HeaderValue) -> Result<()> {
    let HeaderKey::Int(label) = key else {
        return Ok(());
    };
    let Some(param) = HeaderParam::from_label(*label) else {
        return Ok(());
    };

    let ok = match param.value_kind() {
        ValueKind::IntOrText => matches!(value, HeaderValue::Int(_) | HeaderValue::Text(_)),
        ValueKind::UintOrText => matches!(value, HeaderValue::Int(i) if *i >= 0) || matches!(value, HeaderValue::Text(_)),
        ValueKind::Bytes => matches!(value, HeaderValue::Bytes(_)),
        ValueKind::Map => matches!(value, HeaderValue::Map(_)),
        ValueKind::LabelArray => match value {
            HeaderValue::Array(items) => {
                !items.is_empty()
                    && items
                        .iter()
                        .all(|i| matches!(i, HeaderValue::Int(_) | HeaderValue::Text(_)))
            }
            _ => false,
        },
        ValueKind::Any => true,
    };

    if ok {
        Ok(())
    } else {
        Err(CoseError::MalformedHeader(format!(
            "parameter {key} has an invalid value type: {value:?}"
        )))
    }
}

/// Per-parameter policy entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ParamPolicy {
    /// Only honoured when found in the protected bucket.
    pub protected_only: bool,
}

/// Configurable policy table for protected/unprotected precedence.
///
/// The default table marks only `crit` protected-only. [`HeaderPolicy::strict`] also
/// requires `alg` to be protected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPolicy {
    params: BTreeMap<HeaderKey, ParamPolicy>,
    understood: BTreeSet<HeaderKey>,
}

impl Default for HeaderPolicy {
    fn default() -> Self {
        Self {
            params: BTreeMap::new(),
            understood: BTreeSet::new(),
        }
        .with_protected_only(HeaderParam::Critical)
    }
}

impl HeaderPolicy {
    /// Default table plus a protected-only `alg`.
    pub fn strict() -> Self {
        Self::default().with_protected_only(HeaderParam::Algorithm)
    }

    /// Policy for recipient layers of Encrypt and Mac messages.
    ///
    /// Key wrap and direct recipients carry an empty protected bucket, so their `alg`
    /// is always unprotected; a protected-only `alg` applies to message bodies only.
    pub fn for_recipients(&self) -> Self {
        let mut policy = self.clone();
        policy.params.remove(&HeaderKey::from(HeaderParam::Algorithm));
        policy
    }

    pub fn with_protected_only(mut self, key: impl Into<HeaderKey>) -> Self {
        self.params.insert(key.into(), ParamPolicy { protected_only: true });
        self
    }

    /// Declare an application parameter as understood, so it may be listed in `crit`.
    pub fn with_understood(mut self, key: impl Into<HeaderKey>) -> Self {
        self.understood.insert(key.into());
        self
    }

    pub fn is_protected_only(&self, key: &HeaderKey) -> bool {
        self.params.get(key).map(|p| p.protected_only).unwrap_or(false)
    }

    pub fn understands(&self, key: &HeaderKey) -> bool {
        match key {
            HeaderKey::Int(i) if HeaderParam::from_label(*i).is_some() => true,
            _ => self.understood.contains(key),
        }
    }
}
