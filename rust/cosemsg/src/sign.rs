// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! COSE_Sign1 and COSE_Sign.

use minicbor::Decoder;
use tracing::debug;

use cosemsg_abstractions::{
    lookup_in, validate, AlgorithmClass, AlgorithmDescriptor, CoseError, CoseKey, HeaderMap, HeaderPair,
    HeaderParam, HeaderPolicy, KeyOperation, PrimitiveBackend, Result,
};

use crate::cbor::{self, VecEncoder};
use crate::message::{decode_as, with_default_algorithm, CoseMessage, MessageKind};
use crate::options::DecodeOptions;
use crate::primitive::{check_failure, produce_failure};
use crate::structures::{StructureBuilder, StructureContext};

fn signature_algorithm(headers: &HeaderPair, policy: &HeaderPolicy) -> Result<&'static AlgorithmDescriptor> {
    let alg = headers.effective(policy)?.require_algorithm()?;
    lookup_in(alg, &[AlgorithmClass::Signature])
}

fn content<'a>(embedded: Option<&'a [u8]>, options: &'a DecodeOptions) -> Result<&'a [u8]> {
    embedded
        .or(options.detached_content.as_deref())
        .ok_or_else(|| CoseError::MalformedEncoding("detached payload requires external payload bytes".to_string()))
}

fn check_signature(
    backend: &dyn PrimitiveBackend,
    desc: &AlgorithmDescriptor,
    key: &CoseKey,
    to_be_signed: &[u8],
    signature: &[u8],
) -> Result<()> {
    match backend.verify(desc, key, to_be_signed, signature) {
        Ok(true) => Ok(()),
        Ok(false) => Err(CoseError::AuthenticationFailure),
        Err(e) => Err(check_failure(e)),
    }
}

/// A single-signer signed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseSign1 {
    pub headers: HeaderPair,
    /// `None` => detached payload.
    pub payload: Option<Vec<u8>>,
    pub signature: Vec<u8>,
}

impl CoseSign1 {
    pub fn builder() -> CoseSign1Builder {
        CoseSign1Builder::default()
    }

    pub fn from_cbor(input: &[u8], options: &DecodeOptions) -> Result<Self> {
        match decode_as(input, MessageKind::Sign1, options)? {
            CoseMessage::Sign1(m) => Ok(m),
            other => Err(CoseError::TagMismatch {
                expected: MessageKind::Sign1.name().to_string(),
                found: Some(other.kind().tag()),
            }),
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        CoseMessage::Sign1(self.clone()).to_cbor()
    }

    /// Verify the signature; fails with `AuthenticationFailure` on mismatch.
    pub fn verify(&self, backend: &dyn PrimitiveBackend, key: &CoseKey, options: &DecodeOptions) -> Result<()> {
        let desc = signature_algorithm(&self.headers, &options.header_policy)?;
        validate(desc, key, KeyOperation::Verify)?;

        let payload = content(self.payload.as_deref(), options)?;
        let tbs = StructureBuilder::signature(
            StructureContext::Signature1,
            self.headers.protected.encoded(),
            None,
            &options.external_aad,
            payload,
        )?;

        debug!(alg = desc.name, "verifying COSE_Sign1");
        check_signature(backend, desc, key, &tbs, &self.signature)
    }

    pub(crate) fn encode_body(&self, enc: &mut VecEncoder<'_>) -> Result<()> {
        enc.array(4)?;
        cbor::write_header_pair(enc, &self.headers)?;
        cbor::write_bstr_or_nil(enc, self.payload.as_deref())?;
        enc.bytes(&self.signature)?;
        Ok(())
    }

    pub(crate) fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        cbor::read_array(dec, "COSE_Sign1", &[4])?;
        let headers = cbor::read_header_pair(dec)?;
        let payload = cbor::read_bstr_or_nil(dec, "payload")?;
        let signature = cbor::read_bstr(dec, "signature")?;
        Ok(Self {
            headers,
            payload,
            signature,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoseSign1Builder {
    protected: HeaderMap,
    unprotected: HeaderMap,
    external_aad: Vec<u8>,
    detached: bool,
}

impl CoseSign1Builder {
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

    /// Leave the payload out of the message (`nil` on the wire).
    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    pub fn sign(self, backend: &dyn PrimitiveBackend, key: &CoseKey, payload: &[u8]) -> Result<CoseSign1> {
        let protected = with_default_algorithm(self.protected, &self.unprotected, key);
        let headers = HeaderPair::new(protected, self.unprotected)?;
        let desc = signature_algorithm(&headers, &HeaderPolicy::default())?;
        validate(desc, key, KeyOperation::Sign)?;

        let tbs = StructureBuilder::signature(
            StructureContext::Signature1,
            headers.protected.encoded(),
            None,
            &self.external_aad,
            payload,
        )?;
        let signature = backend.sign(desc, key, &tbs).map_err(produce_failure)?;

        debug!(alg = desc.name, detached = self.detached, "signed COSE_Sign1");
        Ok(CoseSign1 {
            headers,
            payload: (!self.detached).then(|| payload.to_vec()),
            signature,
        })
    }
}

/// `COSE_Signature`: one signer of a COSE_Sign message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseSignature {
    pub headers: HeaderPair,
    pub signature: Vec<u8>,
}

impl CoseSignature {
    fn encode(&self, enc: &mut VecEncoder<'_>) -> Result<()> {
        enc.array(3)?;
        cbor::write_header_pair(enc, &self.headers)?;
        enc.bytes(&self.signature)?;
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self> {
        cbor::read_array(dec, "COSE_Signature", &[3])?;
        let headers = cbor::read_header_pair(dec)?;
        let signature = cbor::read_bstr(dec, "signature")?;
        Ok(Self { headers, signature })
    }
}

/// One signer to add to a COSE_Sign message.
#[derive(Debug, Clone)]
pub struct SignerSpec {
    pub key: CoseKey,
    pub protected: HeaderMap,
    pub unprotected: HeaderMap,
    /// External AAD bound into this signer's signature only.
    pub external_aad: Vec<u8>,
}

impl SignerSpec {
    /// Signer whose `alg` comes from the key, with the key's kid (if any) unprotected.
    pub fn new(key: CoseKey) -> Self {
        let mut unprotected = HeaderMap::new();
        if let Some(kid) = &key.kid {
            unprotected.insert(HeaderParam::KeyId, kid.clone());
        }
        Self {
            key,
            protected: HeaderMap::new(),
            unprotected,
            external_aad: Vec::new(),
        }
    }

    pub fn with_protected(mut self, protected: HeaderMap) -> Self {
        self.protected = protected;
        self
    }

    pub fn with_unprotected(mut self, unprotected: HeaderMap) -> Self {
        self.unprotected = unprotected;
        self
    }

    pub fn with_external_aad(mut self, external_aad: impl Into<Vec<u8>>) -> Self {
        self.external_aad = external_aad.into();
        self
    }
}

/// A multi-signer signed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseSign {
    pub headers: HeaderPair,
    pub payload: Option<Vec<u8>>,
    pub signatures: Vec<CoseSignature>,
}

impl CoseSign {
    pub fn builder() -> CoseSignBuilder {
        CoseSignBuilder::default()
    }

    pub fn from_cbor(input: &[u8], options: &DecodeOptions) -> Result<Self> {
        match decode_as(input, MessageKind::Sign, options)? {
            CoseMessage::Sign(m) => Ok(m),
            other => Err(CoseError::TagMismatch {
                expected: MessageKind::Sign.name().to_string(),
                found: Some(other.kind().tag()),
            }),
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        CoseMessage::Sign(self.clone()).to_cbor()
    }

    /// Verify signer `index` against its own Sig_structure.
    ///
    /// `options.external_aad` is the AAD that signer was produced with.
    pub fn verify_signer(
        &self,
        index: usize,
        backend: &dyn PrimitiveBackend,
        key: &CoseKey,
        options: &DecodeOptions,
    ) -> Result<()> {
        if self.signatures.is_empty() {
            return Err(CoseError::MissingSigner);
        }
        let signer = self.signatures.get(index).ok_or_else(|| {
            CoseError::MalformedEncoding(format!(
                "signer index {index} out of range ({} signers)",
                self.signatures.len()
            ))
        })?;

        // Body headers are checked for policy (crit) even though alg lives per signer.
        self.headers.effective(&options.header_policy)?;
        let desc = signature_algorithm(&signer.headers, &options.header_policy)?;
        validate(desc, key, KeyOperation::Verify)?;

        let payload = content(self.payload.as_deref(), options)?;
        let tbs = StructureBuilder::signature(
            StructureContext::Signature,
            self.headers.protected.encoded(),
            Some(signer.headers.protected.encoded()),
            &options.external_aad,
            payload,
        )?;

        debug!(index, alg = desc.name, "verifying COSE_Sign signer");
        check_signature(backend, desc, key, &tbs, &signer.signature)
    }

    /// Verify every signer; `keys[i]` verifies signer `i`.
    pub fn verify_all(&self, backend: &dyn PrimitiveBackend, keys: &[CoseKey], options: &DecodeOptions) -> Result<()> {
        if self.signatures.is_empty() {
            return Err(CoseError::MissingSigner);
        }
        if keys.len() != self.signatures.len() {
            return Err(CoseError::IncompatibleKey(format!(
                "{} keys supplied for {} signers",
                keys.len(),
                self.signatures.len()
            )));
        }
        for (index, key) in keys.iter().enumerate() {
            self.verify_signer(index, backend, key, options)?;
        }
        Ok(())
    }

    pub(crate) fn encode_body(&self, enc: &mut VecEncoder<'_>) -> Result<()> {
        enc.array(4)?;
        cbor::write_header_pair(enc, &self.headers)?;
        cbor::write_bstr_or_nil(enc, self.payload.as_deref())?;
        enc.array(self.signatures.len() as u64)?;
        for signer in &self.signatures {
            signer.encode(enc)?;
        }
        Ok(())
    }

    pub(crate) fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        cbor::read_array(dec, "COSE_Sign", &[4])?;
        let headers = cbor::read_header_pair(dec)?;
        let payload = cbor::read_bstr_or_nil(dec, "payload")?;

        let len = dec
            .array()
            .map_err(|e| CoseError::MalformedEncoding(format!("signatures is not an array: {e}")))?
            .ok_or_else(|| CoseError::MalformedEncoding("indefinite-length arrays are not supported".to_string()))?;
        if len == 0 {
            return Err(CoseError::MissingSigner);
        }
        let mut signatures = Vec::with_capacity(len.min(16) as usize);
        for _ in 0..len {
            signatures.push(CoseSignature::decode(dec)?);
        }

        Ok(Self {
            headers,
            payload,
            signatures,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoseSignBuilder {
    protected: HeaderMap,
    unprotected: HeaderMap,
    detached: bool,
    signers: Vec<SignerSpec>,
}

impl CoseSignBuilder {
    pub fn protected(mut self, protected: HeaderMap) -> Self {
        self.protected = protected;
        self
    }

    pub fn unprotected(mut self, unprotected: HeaderMap) -> Self {
        self.unprotected = unprotected;
        self
    }

    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    pub fn signer(mut self, signer: SignerSpec) -> Self {
        self.signers.push(signer);
        self
    }

    pub fn sign(self, backend: &dyn PrimitiveBackend, payload: &[u8]) -> Result<CoseSign> {
        if self.signers.is_empty() {
            return Err(CoseError::MissingSigner);
        }
        let headers = HeaderPair::new(self.protected, self.unprotected)?;
        let policy = HeaderPolicy::default();
        headers.effective(&policy)?;

        let mut signatures = Vec::with_capacity(self.signers.len());
        for spec in &self.signers {
            let protected = with_default_algorithm(spec.protected.clone(), &spec.unprotected, &spec.key);
            let signer_headers = HeaderPair::new(protected, spec.unprotected.clone())?;
            let desc = signature_algorithm(&signer_headers, &policy)?;
            validate(desc, &spec.key, KeyOperation::Sign)?;

            let tbs = StructureBuilder::signature(
                StructureContext::Signature,
                headers.protected.encoded(),
                Some(signer_headers.protected.encoded()),
                &spec.external_aad,
                payload,
            )?;
            let signature = backend.sign(desc, &spec.key, &tbs).map_err(produce_failure)?;
            signatures.push(CoseSignature {
                headers: signer_headers,
                signature,
            });
        }

        debug!(signers = signatures.len(), detached = self.detached, "signed COSE_Sign");
        Ok(CoseSign {
            headers,
            payload: (!self.detached).then(|| payload.to_vec()),
            signatures,
        })
    }
}
