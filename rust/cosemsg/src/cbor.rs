// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Strict CBOR helpers shared by the envelope codecs.

use minicbor::data::{Tag, Type};
use minicbor::{Decoder, Encoder};

use cosemsg_abstractions::{CoseError, HeaderMap, HeaderPair, ProtectedHeader, Result};

pub(crate) type VecEncoder<'a> = Encoder<&'a mut Vec<u8>>;

fn malformed(what: &str) -> impl Fn(minicbor::decode::Error) -> CoseError + '_ {
    move |e| CoseError::MalformedEncoding(format!("{what}: {e}"))
}

/// Read an optional leading tag.
pub(crate) fn read_optional_tag(dec: &mut Decoder<'_>) -> Result<Option<u64>> {
    if matches!(dec.datatype().map_err(malformed("empty or invalid input"))?, Type::Tag) {
        let tag = dec.tag().map_err(malformed("failed to read CBOR tag"))?;
        return Ok(Some(tag.as_u64()));
    }
    Ok(None)
}

/// Read a definite-length array header whose length must be one of `allowed`.
pub(crate) fn read_array(dec: &mut Decoder<'_>, what: &str, allowed: &[u64]) -> Result<u64> {
    let len = dec
        .array()
        .map_err(|e| CoseError::MalformedEncoding(format!("{what} is not an array: {e}")))?
        .ok_or_else(|| CoseError::MalformedEncoding(format!("{what}: indefinite-length arrays are not supported")))?;
    if !allowed.contains(&len) {
        return Err(CoseError::MalformedEncoding(format!(
            "{what} has {len} elements, expected {allowed:?}"
        )));
    }
    Ok(len)
}

pub(crate) fn read_bstr(dec: &mut Decoder<'_>, what: &str) -> Result<Vec<u8>> {
    match dec.datatype().map_err(malformed(what))? {
        Type::Bytes => Ok(dec.bytes().map_err(malformed(what))?.to_vec()),
        Type::BytesIndef => Err(CoseError::MalformedEncoding(format!(
            "{what}: indefinite-length byte strings are not supported"
        ))),
        other => Err(CoseError::MalformedEncoding(format!("{what} must be a byte string, got {other:?}"))),
    }
}

/// Payload and ciphertext slots: `bstr / nil`, where `nil` marks detached content.
pub(crate) fn read_bstr_or_nil(dec: &mut Decoder<'_>, what: &str) -> Result<Option<Vec<u8>>> {
    if matches!(dec.datatype().map_err(malformed(what))?, Type::Null) {
        dec.null().map_err(malformed(what))?;
        return Ok(None);
    }
    read_bstr(dec, what).map(Some)
}

pub(crate) fn write_bstr_or_nil(enc: &mut VecEncoder<'_>, value: Option<&[u8]>) -> Result<()> {
    match value {
        Some(b) => enc.bytes(b)?,
        None => enc.null()?,
    };
    Ok(())
}

pub(crate) fn write_tag(enc: &mut VecEncoder<'_>, tag: u64) -> Result<()> {
    enc.tag(Tag::new(tag))?;
    Ok(())
}

/// `protected: bstr .cbor header_map, unprotected: header_map`
pub(crate) fn read_header_pair(dec: &mut Decoder<'_>) -> Result<HeaderPair> {
    let protected = ProtectedHeader::from_encoded(read_bstr(dec, "protected header")?)?;

    if !matches!(dec.datatype().map_err(malformed("unprotected header"))?, Type::Map) {
        return Err(CoseError::MalformedEncoding("unprotected header is not a map".to_string()));
    }
    let unprotected = HeaderMap::decode_from(dec)?;

    Ok(HeaderPair { protected, unprotected })
}

pub(crate) fn write_header_pair(enc: &mut VecEncoder<'_>, headers: &HeaderPair) -> Result<()> {
    enc.bytes(headers.protected.encoded())?;
    headers.unprotected.encode_to(enc)
}

pub(crate) fn ensure_consumed(dec: &Decoder<'_>, input: &[u8], what: &str) -> Result<()> {
    if dec.position() != input.len() {
        return Err(CoseError::MalformedEncoding(format!("trailing bytes after {what}")));
    }
    Ok(())
}
