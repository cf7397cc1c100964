// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! COSE_Mac0 and COSE_Mac.

use minicbor::Decoder;
use tracing::debug;

use cosemsg_abstractions::{
    lookup_in, validate, AlgorithmClass, AlgorithmDescriptor, AlgorithmId, CoseError, CoseKey, HeaderMap, HeaderPair,
    HeaderParam, HeaderPolicy, KeyOperation, PrimitiveBackend, Result,
};

use crate::cbor::{self, VecEncoder};
use crate::message::{decode_as, with_default_algorithm, CoseMessage, MessageKind};
use crate::options::DecodeOptions;
use crate::primitive::{check_failure, produce_failure};
use crate::recipient::{self, RecipientNode, RecipientSpec, ResolveContext};
use crate::structures::{StructureBuilder, StructureContext};

fn mac_algorithm(headers: &HeaderPair, policy: &HeaderPolicy) -> Result<&'static AlgorithmDescriptor> {
    let alg = headers.effective(policy)?.require_algorithm()?;
    lookup_in(alg, &[AlgorithmClass::Mac])
}

fn key_bytes(key: &CoseKey) -> Result<&[u8]> {
    key.symmetric_bytes()
        .ok_or_else(|| CoseError::IncompatibleKey("MAC key has no key bytes".to_string()))
}

fn compute_tag(
    backend: &dyn PrimitiveBackend,
    context: StructureContext,
    headers: &HeaderPair,
    desc: &AlgorithmDescriptor,
    key: &CoseKey,
    external_aad: &[u8],
    payload: &[u8],
) -> Result<Vec<u8>> {
    let to_be_maced = StructureBuilder::mac(context, headers.protected.encoded(), external_aad, payload)?;
    backend.mac(desc, key_bytes(key)?, &to_be_maced).map_err(produce_failure)
}

fn check_tag(
    backend: &dyn PrimitiveBackend,
    context: StructureContext,
    headers: &HeaderPair,
    desc: &AlgorithmDescriptor,
    key: &CoseKey,
    payload: Option<&[u8]>,
    tag: &[u8],
    options: &DecodeOptions,
) -> Result<Vec<u8>> {
    let payload = payload
        .or(options.detached_content.as_deref())
        .ok_or_else(|| CoseError::MalformedEncoding("detached payload requires external payload bytes".to_string()))?;
    let to_be_maced = StructureBuilder::mac(context, headers.protected.encoded(), &options.external_aad, payload)?;
    match backend.verify_mac(desc, key_bytes(key)?, &to_be_maced, tag) {
        Ok(true) => Ok(payload.to_vec()),
        Ok(false) => Err(CoseError::AuthenticationFailure),
        Err(e) => Err(check_failure(e)),
    }
}

/// A MACed message whose key is known to the recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseMac0 {
    pub headers: HeaderPair,
    pub payload: Option<Vec<u8>>,
    pub tag: Vec<u8>,
}

impl CoseMac0 {
    pub fn builder() -> CoseMac0Builder {
        CoseMac0Builder::default()
    }

    pub fn from_cbor(input: &[u8], options: &DecodeOptions) -> Result<Self> {
        match decode_as(input, MessageKind::Mac0, options)? {
            CoseMessage::Mac0(m) => Ok(m),
            other => Err(CoseError::TagMismatch {
                expected: MessageKind::Mac0.name().to_string(),
                found: Some(other.kind().tag()),
            }),
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        CoseMessage::Mac0(self.clone()).to_cbor()
    }

    /// Check the tag and return the authenticated payload.
    pub fn verify(&self, backend: &dyn PrimitiveBackend, key: &CoseKey, options: &DecodeOptions) -> Result<Vec<u8>> {
        let desc = mac_algorithm(&self.headers, &options.header_policy)?;
        validate(desc, key, KeyOperation::MacVerify)?;
        debug!(alg = desc.name, "verifying COSE_Mac0");
        check_tag(
            backend,
            StructureContext::Mac0,
            &self.headers,
            desc,
            key,
            self.payload.as_deref(),
            &self.tag,
            options,
        )
    }

    pub(crate) fn encode_body(&self, enc: &mut VecEncoder<'_>) -> Result<()> {
        enc.array(4)?;
        cbor::write_header_pair(enc, &self.headers)?;
        cbor::write_bstr_or_nil(enc, self.payload.as_deref())?;
        enc.bytes(&self.tag)?;
        Ok(())
    }

    pub(crate) fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        cbor::read_array(dec, "COSE_Mac0", &[4])?;
        let headers = cbor::read_header_pair(dec)?;
        let payload = cbor::read_bstr_or_nil(dec, "payload")?;
        let tag = cbor::read_bstr(dec, "tag")?;
        Ok(Self { headers, payload, tag })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoseMac0Builder {
    protected: HeaderMap,
    unprotected: HeaderMap,
    external_aad: Vec<u8>,
    detached: bool,
}

impl CoseMac0Builder {
    pub fn protected(mut self, protected: HeaderMap) -> Self {
        self.protected = protected;
        self
    }

    pub fn unprotected(mut self, unprotected: HeaderMap) -> Self {
        self.unprotected = unprotected;
        self
    }

    pub fn external_aad(mut self, external_aad: impl Into<Vec<u8>>) -> Self {
        self.external_aad = external_aad.into();
        self
    }

    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    pub fn create(self, backend: &dyn PrimitiveBackend, key: &CoseKey, payload: &[u8]) -> Result<CoseMac0> {
        let protected = with_default_algorithm(self.protected, &self.unprotected, key);
        let headers = HeaderPair::new(protected, self.unprotected)?;
        let desc = mac_algorithm(&headers, &HeaderPolicy::default())?;
        validate(desc, key, KeyOperation::MacCreate)?;

        let tag = compute_tag(backend, StructureContext::Mac0, &headers, desc, key, &self.external_aad, payload)?;

        debug!(alg = desc.name, detached = self.detached, "created COSE_Mac0");
        Ok(CoseMac0 {
            headers,
            payload: (!self.detached).then(|| payload.to_vec()),
            tag,
        })
    }
}

/// A MACed message whose key travels in the recipient tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseMac {
    pub headers: HeaderPair,
    pub payload: Option<Vec<u8>>,
    pub tag: Vec<u8>,
    pub recipients: Vec<RecipientNode>,
}

impl CoseMac {
    pub fn builder() -> CoseMacBuilder {
        CoseMacBuilder::default()
    }

    pub fn from_cbor(input: &[u8], options: &DecodeOptions) -> Result<Self> {
        match decode_as(input, MessageKind::Mac, options)? {
            CoseMessage::Mac(m) => Ok(m),
            other => Err(CoseError::TagMismatch {
                expected: MessageKind::Mac.name().to_string(),
                found: Some(other.kind().tag()),
            }),
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        CoseMessage::Mac(self.clone()).to_cbor()
    }

    /// Resolve the MAC key from the recipient tree with `keys` and check the tag.
    ///
    /// Every candidate key is tried against the tag before `AuthenticationFailure` is reported.
    pub fn verify(&self, backend: &dyn PrimitiveBackend, keys: &[CoseKey], options: &DecodeOptions) -> Result<Vec<u8>> {
        let desc = mac_algorithm(&self.headers, &options.header_policy)?;
        let recipient_policy = options.header_policy.for_recipients();
        let ctx = ResolveContext {
            backend,
            keys,
            policy: &recipient_policy,
            max_depth: options.max_recipient_depth,
        };

        debug!(alg = desc.name, recipients = self.recipients.len(), "verifying COSE_Mac");
        let check = |k: &[u8]| -> Result<Vec<u8>> {
            let key = CoseKey::symmetric(k.to_vec());
            validate(desc, &key, KeyOperation::MacVerify)?;
            check_tag(
                backend,
                StructureContext::Mac,
                &self.headers,
                desc,
                &key,
                self.payload.as_deref(),
                &self.tag,
                options,
            )
        };
        recipient::resolve_layer_key(&ctx, desc, &self.recipients, 1, &check)
    }

    pub(crate) fn encode_body(&self, enc: &mut VecEncoder<'_>) -> Result<()> {
        enc.array(5)?;
        cbor::write_header_pair(enc, &self.headers)?;
        cbor::write_bstr_or_nil(enc, self.payload.as_deref())?;
        enc.bytes(&self.tag)?;
        recipient::encode_recipients(enc, &self.recipients)
    }

    pub(crate) fn decode_body(dec: &mut Decoder<'_>, max_depth: usize) -> Result<Self> {
        cbor::read_array(dec, "COSE_Mac", &[5])?;
        let headers = cbor::read_header_pair(dec)?;
        let payload = cbor::read_bstr_or_nil(dec, "payload")?;
        let tag = cbor::read_bstr(dec, "tag")?;
        let recipients = recipient::decode_recipients(dec, 1, max_depth)?;
        if recipients.is_empty() {
            return Err(CoseError::MissingRecipient);
        }
        Ok(Self {
            headers,
            payload,
            tag,
            recipients,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoseMacBuilder {
    protected: HeaderMap,
    unprotected: HeaderMap,
    external_aad: Vec<u8>,
    detached: bool,
    mac_key: Option<Vec<u8>>,
    recipients: Vec<RecipientSpec>,
}

impl CoseMacBuilder {
    /// MAC algorithm, placed in the protected bucket.
    pub fn algorithm(mut self, alg: AlgorithmId) -> Self {
        self.protected.insert(HeaderParam::Algorithm, alg.value());
        self
    }

    pub fn protected(mut self, protected: HeaderMap) -> Self {
        self.protected = protected;
        self
    }

    pub fn unprotected(mut self, unprotected: HeaderMap) -> Self {
        self.unprotected = unprotected;
        self
    }

    pub fn external_aad(mut self, external_aad: impl Into<Vec<u8>>) -> Self {
        self.external_aad = external_aad.into();
        self
    }

    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    /// Use this MAC key instead of generating one.
    pub fn mac_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.mac_key = Some(key.into());
        self
    }

    pub fn recipient(mut self, recipient: RecipientSpec) -> Self {
        self.recipients.push(recipient);
        self
    }

    pub fn create(self, backend: &dyn PrimitiveBackend, payload: &[u8]) -> Result<CoseMac> {
        let headers = HeaderPair::new(self.protected, self.unprotected)?;
        let desc = mac_algorithm(&headers, &HeaderPolicy::default())?;

        let layer = recipient::establish_layer_key(backend, desc, &self.recipients, self.mac_key.as_deref(), 1)?;
        let key = CoseKey::symmetric(layer.key.to_vec());
        validate(desc, &key, KeyOperation::MacCreate)?;

        let tag = compute_tag(backend, StructureContext::Mac, &headers, desc, &key, &self.external_aad, payload)?;

        debug!(alg = desc.name, recipients = layer.recipients.len(), "created COSE_Mac");
        Ok(CoseMac {
            headers,
            payload: (!self.detached).then(|| payload.to_vec()),
            tag,
            recipients: layer.recipients,
        })
    }
}
