// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! COSE header map types.
//!
//! COSE header parameters live in two header maps:
//! - Protected headers: encoded as a CBOR bstr containing a CBOR map
//! - Unprotected headers: encoded as an inline CBOR map
//!
//! Decoding is conservative:
//! - Only supports the CBOR types COSE headers need.
//! - Rejects indefinite-length arrays/maps, duplicate keys and trailing bytes.
//! - Type-checks registered parameters in the same pass (see [`crate::header_params`]).
//!
//! Encoding is canonical: definite lengths, shortest integer forms, integer labels in
//! ascending order followed by text labels.

use std::collections::BTreeMap;

use minicbor::data::Type;
use minicbor::encode::Write;
use minicbor::{Decoder, Encoder};

use crate::algorithms::AlgorithmId;
use crate::error::{CoseError, Result};
use crate::header_params::{check_registered_value, HeaderParam, HeaderPolicy};

/// Deepest nesting of maps and arrays accepted in a header map, counting the header map itself.
pub const MAX_HEADER_NESTING: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HeaderKey {
    /// Integer label (the most common COSE header key form).
    Int(i64),
    /// Text label.
    Text(String),
}

impl From<i64> for HeaderKey {
    fn from(v: i64) -> Self {
        HeaderKey::Int(v)
    }
}

impl From<&str> for HeaderKey {
    fn from(v: &str) -> Self {
        HeaderKey::Text(v.to_string())
    }
}

impl From<String> for HeaderKey {
    fn from(v: String) -> Self {
        HeaderKey::Text(v)
    }
}

impl From<HeaderParam> for HeaderKey {
    fn from(p: HeaderParam) -> Self {
        HeaderKey::Int(p.label())
    }
}

impl std::fmt::Display for HeaderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderKey::Int(i) => match HeaderParam::from_label(*i) {
                Some(p) => write!(f, "{} ({i})", p.name()),
                None => write!(f, "{i}"),
            },
            HeaderKey::Text(s) => write!(f, "\"{s}\""),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Int(i64),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<HeaderValue>),
    Map(BTreeMap<HeaderKey, HeaderValue>),
    Bool(bool),
    Null,
}

impl HeaderValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HeaderValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            HeaderValue::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            HeaderValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<HeaderKey, HeaderValue>> {
        match self {
            HeaderValue::Map(m) => Some(m),
            _ => None,
        }
    }

    fn encode_to<W: Write>(&self, enc: &mut Encoder<W>) -> Result<()>
    where
        W::Error: std::fmt::Display,
    {
        match self {
            HeaderValue::Int(i) => {
                enc.i64(*i)?;
            }
            HeaderValue::Bytes(b) => {
                enc.bytes(b)?;
            }
            HeaderValue::Text(s) => {
                enc.str(s)?;
            }
            HeaderValue::Array(items) => {
                enc.array(items.len() as u64)?;
                for item in items {
                    item.encode_to(enc)?;
                }
            }
            HeaderValue::Map(map) => encode_entries(map, enc)?,
            HeaderValue::Bool(b) => {
                enc.bool(*b)?;
            }
            HeaderValue::Null => {
                enc.null()?;
            }
        }
        Ok(())
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        HeaderValue::Int(v)
    }
}

impl From<Vec<u8>> for HeaderValue {
    fn from(v: Vec<u8>) -> Self {
        HeaderValue::Bytes(v)
    }
}

impl From<&[u8]> for HeaderValue {
    fn from(v: &[u8]) -> Self {
        HeaderValue::Bytes(v.to_vec())
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::Text(v.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::Text(v)
    }
}

/// A decoded COSE header map with canonical serialization.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeaderMap {
    entries: BTreeMap<HeaderKey, HeaderValue>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: BTreeMap<HeaderKey, HeaderValue>) -> Self {
        Self { entries }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<HeaderKey>, value: impl Into<HeaderValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_algorithm(self, alg: AlgorithmId) -> Self {
        self.with(HeaderParam::Algorithm, alg.value())
    }

    pub fn with_key_id(self, kid: impl Into<Vec<u8>>) -> Self {
        self.with(HeaderParam::KeyId, kid.into())
    }

    pub fn with_content_type(self, content_type: impl Into<HeaderValue>) -> Self {
        self.with(HeaderParam::ContentType, content_type)
    }

    pub fn with_iv(self, iv: impl Into<Vec<u8>>) -> Self {
        self.with(HeaderParam::Iv, iv.into())
    }

    pub fn with_partial_iv(self, partial_iv: impl Into<Vec<u8>>) -> Self {
        self.with(HeaderParam::PartialIv, partial_iv.into())
    }

    /// Mark labels as critical. The labels must also be present in the same (protected) map.
    pub fn with_critical(self, labels: Vec<HeaderKey>) -> Self {
        let items = labels
            .into_iter()
            .map(|k| match k {
                HeaderKey::Int(i) => HeaderValue::Int(i),
                HeaderKey::Text(s) => HeaderValue::Text(s),
            })
            .collect();
        self.with(HeaderParam::Critical, HeaderValue::Array(items))
    }

    pub fn insert(&mut self, key: impl Into<HeaderKey>, value: impl Into<HeaderValue>) -> Option<HeaderValue> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &HeaderKey) -> Option<HeaderValue> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &HeaderKey) -> Option<&HeaderValue> {
        self.entries.get(key)
    }

    pub fn get_param(&self, param: HeaderParam) -> Option<&HeaderValue> {
        self.entries.get(&HeaderKey::Int(param.label()))
    }

    pub fn contains(&self, key: &HeaderKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn contains_param(&self, param: HeaderParam) -> bool {
        self.get_param(param).is_some()
    }

    pub fn get_i64(&self, key: i64) -> Option<i64> {
        self.entries.get(&HeaderKey::Int(key)).and_then(HeaderValue::as_i64)
    }

    pub fn get_bytes(&self, key: i64) -> Option<&[u8]> {
        self.entries.get(&HeaderKey::Int(key)).and_then(HeaderValue::as_bytes)
    }

    pub fn get_array(&self, key: i64) -> Option<&[HeaderValue]> {
        self.entries.get(&HeaderKey::Int(key)).and_then(|v| match v {
            HeaderValue::Array(a) => Some(a.as_slice()),
            _ => None,
        })
    }

    /// The `alg` parameter of this map alone (no fallback).
    pub fn algorithm(&self) -> Result<Option<AlgorithmId>> {
        algorithm_value(self.get_param(HeaderParam::Algorithm))
    }

    pub fn key_id(&self) -> Option<&[u8]> {
        self.get_bytes(HeaderParam::KeyId.label())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderKey, &HeaderValue)> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &BTreeMap<HeaderKey, HeaderValue> {
        &self.entries
    }

    /// Canonical CBOR encoding of this map.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut enc = Encoder::new(&mut out);
        self.encode_to(&mut enc)?;
        Ok(out)
    }

    pub fn encode_to<W: Write>(&self, enc: &mut Encoder<W>) -> Result<()>
    where
        W::Error: std::fmt::Display,
    {
        encode_entries(&self.entries, enc)
    }

    /// Decode a header map from the CBOR encoding of a map.
    ///
    /// This expects `bytes` to contain exactly one map and nothing else.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let map = Self::decode_from(&mut dec)?;
        if dec.position() != bytes.len() {
            return Err(CoseError::MalformedHeader("trailing bytes after header map".to_string()));
        }
        Ok(map)
    }

    /// Decode a header map directly from a CBOR decoder.
    ///
    /// This is used for unprotected headers, which appear inline in COSE messages.
    pub fn decode_from(dec: &mut Decoder<'_>) -> Result<Self> {
        let ty = dec.datatype().map_err(|e| CoseError::MalformedHeader(e.to_string()))?;
        if !matches!(ty, Type::Map | Type::MapIndef) {
            return Err(CoseError::MalformedHeader(format!("header is not a map: {ty:?}")));
        }
        let entries = decode_entries(dec, 1)?;
        for (key, value) in &entries {
            check_registered_value(key, value)?;
        }
        Ok(Self { entries })
    }
}

/// Protected header bucket: the exact authenticated bytes plus their parsed view.
///
/// The bytes are produced once by [`ProtectedHeader::seal`] or captured verbatim by
/// [`ProtectedHeader::from_encoded`]; they are what enters every structure computation
/// and are never re-serialized from the parsed map.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProtectedHeader {
    encoded: Vec<u8>,
    map: HeaderMap,
}

impl ProtectedHeader {
    /// Serialize `map` once. An empty map is sealed as a zero-length byte string.
    pub fn seal(map: HeaderMap) -> Result<Self> {
        let encoded = if map.is_empty() { Vec::new() } else { map.encode()? };
        Ok(Self { encoded, map })
    }

    /// Capture protected bytes as received. A zero-length bstr means "empty map".
    pub fn from_encoded(encoded: Vec<u8>) -> Result<Self> {
        let map = if encoded.is_empty() {
            HeaderMap::new()
        } else {
            HeaderMap::decode(&encoded)?
        };
        Ok(Self { encoded, map })
    }

    pub fn encoded(&self) -> &[u8] {
        &self.encoded
    }

    pub fn map(&self) -> &HeaderMap {
        &self.map
    }
}

/// Protected + unprotected header buckets of one COSE layer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeaderPair {
    pub protected: ProtectedHeader,
    pub unprotected: HeaderMap,
}

impl HeaderPair {
    /// Seal `protected` and pair it with `unprotected`.
    pub fn new(protected: HeaderMap, unprotected: HeaderMap) -> Result<Self> {
        Ok(Self {
            protected: ProtectedHeader::seal(protected)?,
            unprotected,
        })
    }

    /// Validate both buckets against `policy` and return the merged view.
    ///
    /// - A protected-only label present in both buckets is a policy violation.
    /// - Every label listed in `crit` must be present in the protected bucket and understood.
    pub fn effective<'a>(&'a self, policy: &'a HeaderPolicy) -> Result<EffectiveHeaders<'a>> {
        let protected = self.protected.map();

        for key in self.unprotected.entries.keys() {
            if protected.contains(key) && policy.is_protected_only(key) {
                return Err(CoseError::HeaderPolicyViolation(format!(
                    "protected-only parameter {key} appears in both protected and unprotected headers"
                )));
            }
        }

        if let Some(crit) = protected.get_param(HeaderParam::Critical) {
            let HeaderValue::Array(labels) = crit else {
                return Err(CoseError::MalformedHeader("crit must be an array".to_string()));
            };
            for label in labels {
                let key = match label {
                    HeaderValue::Int(i) => HeaderKey::Int(*i),
                    HeaderValue::Text(s) => HeaderKey::Text(s.clone()),
                    other => {
                        return Err(CoseError::MalformedHeader(format!("invalid crit label: {other:?}")))
                    }
                };
                if !protected.contains(&key) {
                    return Err(CoseError::HeaderPolicyViolation(format!(
                        "critical parameter {key} is not present in protected headers"
                    )));
                }
                if !policy.understands(&key) {
                    return Err(CoseError::HeaderPolicyViolation(format!(
                        "critical parameter {key} is not understood"
                    )));
                }
            }
        }

        Ok(EffectiveHeaders {
            protected,
            unprotected: &self.unprotected,
            policy,
        })
    }
}

/// Merged view over a validated [`HeaderPair`].
///
/// Protected values win; unprotected values are a fallback, except for parameters the
/// policy marks protected-only, which are ignored when found only unprotected.
#[derive(Debug, Clone, Copy)]
pub struct EffectiveHeaders<'a> {
    protected: &'a HeaderMap,
    unprotected: &'a HeaderMap,
    policy: &'a HeaderPolicy,
}

impl<'a> EffectiveHeaders<'a> {
    pub fn get(&self, key: &HeaderKey) -> Option<&'a HeaderValue> {
        if let Some(v) = self.protected.get(key) {
            return Some(v);
        }
        if self.policy.is_protected_only(key) {
            return None;
        }
        self.unprotected.get(key)
    }

    pub fn get_param(&self, param: HeaderParam) -> Option<&'a HeaderValue> {
        self.get(&HeaderKey::from(param))
    }

    pub fn get_bytes(&self, param: HeaderParam) -> Option<&'a [u8]> {
        self.get_param(param).and_then(HeaderValue::as_bytes)
    }

    /// Fail with `HeaderPolicyViolation` unless `key` is present in the protected bucket.
    pub fn require_protected(&self, key: &HeaderKey) -> Result<&'a HeaderValue> {
        if let Some(v) = self.protected.get(key) {
            return Ok(v);
        }
        if self.unprotected.contains(key) {
            return Err(CoseError::HeaderPolicyViolation(format!(
                "parameter {key} must be protected but was only found unprotected"
            )));
        }
        Err(CoseError::HeaderPolicyViolation(format!("required parameter {key} is absent")))
    }

    pub fn algorithm(&self) -> Result<Option<AlgorithmId>> {
        algorithm_value(self.get_param(HeaderParam::Algorithm))
    }

    /// The effective `alg`, honouring the protected-only policy.
    pub fn require_algorithm(&self) -> Result<AlgorithmId> {
        let key = HeaderKey::from(HeaderParam::Algorithm);
        if self.policy.is_protected_only(&key) {
            return algorithm_value(Some(self.require_protected(&key)?))?
                .ok_or_else(|| CoseError::HeaderPolicyViolation("alg is absent".to_string()));
        }
        self.algorithm()?
            .ok_or_else(|| CoseError::HeaderPolicyViolation(format!("required parameter {key} is absent")))
    }

    pub fn key_id(&self) -> Option<&'a [u8]> {
        self.get_bytes(HeaderParam::KeyId)
    }

    pub fn iv(&self) -> Option<&'a [u8]> {
        self.get_bytes(HeaderParam::Iv)
    }

    pub fn partial_iv(&self) -> Option<&'a [u8]> {
        self.get_bytes(HeaderParam::PartialIv)
    }
}

fn algorithm_value(value: Option<&HeaderValue>) -> Result<Option<AlgorithmId>> {
    match value {
        None => Ok(None),
        Some(HeaderValue::Int(i)) => Ok(Some(AlgorithmId(*i))),
        Some(HeaderValue::Text(s)) => Err(CoseError::UnknownAlgorithm(format!("\"{s}\""))),
        Some(other) => Err(CoseError::MalformedHeader(format!("alg has invalid type: {other:?}"))),
    }
}

fn encode_entries<W: Write>(entries: &BTreeMap<HeaderKey, HeaderValue>, enc: &mut Encoder<W>) -> Result<()>
where
    W::Error: std::fmt::Display,
{
    // BTreeMap order on HeaderKey is the canonical order: integers ascending, then text.
    enc.map(entries.len() as u64)?;
    for (key, value) in entries {
        match key {
            HeaderKey::Int(i) => enc.i64(*i)?,
            HeaderKey::Text(s) => enc.str(s)?,
        };
        value.encode_to(enc)?;
    }
    Ok(())
}

fn check_nesting(depth: usize) -> Result<()> {
    if depth > MAX_HEADER_NESTING {
        return Err(CoseError::MalformedHeader(format!(
            "header value nested deeper than {MAX_HEADER_NESTING} levels"
        )));
    }
    Ok(())
}

fn decode_entries(dec: &mut Decoder<'_>, depth: usize) -> Result<BTreeMap<HeaderKey, HeaderValue>> {
    check_nesting(depth)?;
    let len = dec
        .map()
        .map_err(|e| CoseError::MalformedHeader(format!("failed to read map: {e}")))?
        .ok_or_else(|| CoseError::MalformedHeader("indefinite-length maps are not supported".to_string()))?;

    let mut map = BTreeMap::new();
    for _ in 0..len {
        let key = decode_header_key(dec)?;
        let value = decode_header_value(dec, depth)?;
        if map.contains_key(&key) {
            return Err(CoseError::MalformedHeader(format!("duplicate header key {key}")));
        }
        map.insert(key, value);
    }
    Ok(map)
}

/// Decode a COSE header map key.
///
/// COSE keys are most often small integers, but may also be text.
fn decode_header_key(dec: &mut Decoder<'_>) -> Result<HeaderKey> {
    match dec.datatype().map_err(|e| CoseError::MalformedHeader(e.to_string()))? {
        Type::I8 | Type::I16 | Type::I32 | Type::I64 | Type::Int | Type::U8 | Type::U16 | Type::U32 | Type::U64 => {
            let i = dec
                .i64()
                .map_err(|e| CoseError::MalformedHeader(format!("failed to decode int header key: {e}")))?;
            Ok(HeaderKey::Int(i))
        }
        Type::String => {
            let s = dec
                .str()
                .map_err(|e| CoseError::MalformedHeader(format!("failed to decode text header key: {e}")))?;
            Ok(HeaderKey::Text(s.to_string()))
        }
        other => Err(CoseError::MalformedHeader(format!("unsupported header key type: {other:?}"))),
    }
}

/// Decode one value held by a map or array at nesting level `depth`.
fn decode_header_value(dec: &mut Decoder<'_>, depth: usize) -> Result<HeaderValue> {
    let malformed = |e: minicbor::decode::Error| CoseError::MalformedHeader(e.to_string());
    match dec.datatype().map_err(malformed)? {
        Type::Null => {
            dec.null().map_err(malformed)?;
            Ok(HeaderValue::Null)
        }
        Type::Bool => Ok(HeaderValue::Bool(dec.bool().map_err(malformed)?)),
        Type::Bytes => Ok(HeaderValue::Bytes(dec.bytes().map_err(malformed)?.to_vec())),
        Type::String => Ok(HeaderValue::Text(dec.str().map_err(malformed)?.to_string())),
        Type::I8 | Type::I16 | Type::I32 | Type::I64 | Type::Int | Type::U8 | Type::U16 | Type::U32 | Type::U64 => {
            Ok(HeaderValue::Int(dec.i64().map_err(malformed)?))
        }
        Type::Array => {
            check_nesting(depth + 1)?;
            let len = dec
                .array()
                .map_err(|e| CoseError::MalformedHeader(format!("failed to read array: {e}")))?
                .ok_or_else(|| CoseError::MalformedHeader("indefinite-length arrays are not supported".to_string()))?;
            let mut out = Vec::with_capacity(len.min(64) as usize);
            for _ in 0..len {
                out.push(decode_header_value(dec, depth + 1)?);
            }
            Ok(HeaderValue::Array(out))
        }
        Type::Map => Ok(HeaderValue::Map(decode_entries(dec, depth + 1)?)),
        Type::ArrayIndef | Type::MapIndef | Type::BytesIndef | Type::StringIndef => Err(
            CoseError::MalformedHeader("indefinite-length items are not supported".to_string()),
        ),
        other => Err(CoseError::MalformedHeader(format!("unsupported header value type: {other:?}"))),
    }
}
