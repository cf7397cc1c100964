// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! COSE_Encrypt0 and COSE_Encrypt.
//!
//! The nonce comes from the `IV` header, or from a `Partial IV` XORed into the key's
//! base IV (RFC 9052 section 3.1). A message built without either gets a random IV in
//! the unprotected bucket.

use minicbor::Decoder;
use tracing::debug;

use cosemsg_abstractions::{
    lookup_in, validate, AlgorithmClass, AlgorithmDescriptor, AlgorithmId, CoseError, CoseKey, EffectiveHeaders,
    HeaderMap, HeaderPair, HeaderParam, HeaderPolicy, KeyOperation, PrimitiveBackend, Result,
};

use crate::cbor::{self, VecEncoder};
use crate::message::{decode_as, with_default_algorithm, CoseMessage, MessageKind};
use crate::options::DecodeOptions;
use crate::primitive::{check_failure, produce_failure};
use crate::recipient::{self, RecipientNode, RecipientSpec, ResolveContext};
use crate::structures::{StructureBuilder, StructureContext};

/// AEAD nonce for a layer.
fn layer_nonce(desc: &AlgorithmDescriptor, headers: &EffectiveHeaders<'_>, base_iv: Option<&[u8]>) -> Result<Vec<u8>> {
    match (headers.iv(), headers.partial_iv()) {
        (Some(_), Some(_)) => Err(CoseError::MalformedHeader(
            "IV and Partial IV must not both be present".to_string(),
        )),
        (Some(iv), None) => {
            if iv.len() != desc.nonce_len {
                return Err(CoseError::MalformedHeader(format!(
                    "{} requires a {}-byte IV, got {} bytes",
                    desc.name,
                    desc.nonce_len,
                    iv.len()
                )));
            }
            Ok(iv.to_vec())
        }
        (None, Some(partial)) => {
            let base = base_iv.ok_or_else(|| {
                CoseError::IncompatibleKey("Partial IV requires a key with a base IV".to_string())
            })?;
            if base.len() != desc.nonce_len {
                return Err(CoseError::IncompatibleKey(format!(
                    "base IV must be {} bytes for {}",
                    desc.nonce_len, desc.name
                )));
            }
            if partial.len() > base.len() {
                return Err(CoseError::MalformedHeader("Partial IV is longer than the IV".to_string()));
            }
            let mut nonce = base.to_vec();
            let offset = nonce.len() - partial.len();
            for (n, p) in nonce[offset..].iter_mut().zip(partial) {
                *n ^= p;
            }
            Ok(nonce)
        }
        (None, None) => Err(CoseError::MalformedHeader("no IV or Partial IV present".to_string())),
    }
}

/// Adds a random IV unless the caller supplied an IV or Partial IV.
fn ensure_iv(
    backend: &dyn PrimitiveBackend,
    desc: &AlgorithmDescriptor,
    protected: &HeaderMap,
    unprotected: &mut HeaderMap,
) -> Result<()> {
    let present = |p| protected.contains_param(p) || unprotected.contains_param(p);
    if !present(HeaderParam::Iv) && !present(HeaderParam::PartialIv) {
        let iv = backend.random(desc.nonce_len).map_err(produce_failure)?;
        unprotected.insert(HeaderParam::Iv, iv);
    }
    Ok(())
}

fn content_algorithm(headers: &HeaderPair, policy: &HeaderPolicy) -> Result<&'static AlgorithmDescriptor> {
    let alg = headers.effective(policy)?.require_algorithm()?;
    lookup_in(alg, &[AlgorithmClass::ContentEncryption])
}

/// Seal `plaintext` under `key` for a finished header pair.
fn seal_layer(
    backend: &dyn PrimitiveBackend,
    context: StructureContext,
    headers: &HeaderPair,
    desc: &AlgorithmDescriptor,
    key: &CoseKey,
    external_aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let policy = HeaderPolicy::default();
    let effective = headers.effective(&policy)?;
    let nonce = layer_nonce(desc, &effective, key.base_iv.as_deref())?;
    let aad = StructureBuilder::encryption(context, headers.protected.encoded(), external_aad)?;
    let k = key
        .symmetric_bytes()
        .ok_or_else(|| CoseError::IncompatibleKey("content key has no key bytes".to_string()))?;
    backend.seal(desc, k, &nonce, &aad, plaintext).map_err(produce_failure)
}

fn open_layer(
    backend: &dyn PrimitiveBackend,
    context: StructureContext,
    headers: &HeaderPair,
    desc: &AlgorithmDescriptor,
    key: &CoseKey,
    ciphertext: Option<&[u8]>,
    options: &DecodeOptions,
) -> Result<Vec<u8>> {
    let effective = headers.effective(&options.header_policy)?;
    let nonce = layer_nonce(desc, &effective, key.base_iv.as_deref())?;
    let ciphertext = ciphertext
        .or(options.detached_content.as_deref())
        .ok_or_else(|| CoseError::MalformedEncoding("detached ciphertext requires external bytes".to_string()))?;
    if ciphertext.len() < desc.tag_len {
        return Err(CoseError::AuthenticationFailure);
    }
    let aad = StructureBuilder::encryption(context, headers.protected.encoded(), &options.external_aad)?;
    let k = key
        .symmetric_bytes()
        .ok_or_else(|| CoseError::IncompatibleKey("content key has no key bytes".to_string()))?;
    backend.open(desc, k, &nonce, &aad, ciphertext).map_err(check_failure)
}

/// A single-recipient encrypted message; the key is known to the recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseEncrypt0 {
    pub headers: HeaderPair,
    /// `None` => detached ciphertext.
    pub ciphertext: Option<Vec<u8>>,
}

impl CoseEncrypt0 {
    pub fn builder() -> CoseEncrypt0Builder {
        CoseEncrypt0Builder::default()
    }

    pub fn from_cbor(input: &[u8], options: &DecodeOptions) -> Result<Self> {
        match decode_as(input, MessageKind::Encrypt0, options)? {
            CoseMessage::Encrypt0(m) => Ok(m),
            other => Err(CoseError::TagMismatch {
                expected: MessageKind::Encrypt0.name().to_string(),
                found: Some(other.kind().tag()),
            }),
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        CoseMessage::Encrypt0(self.clone()).to_cbor()
    }

    /// Decrypt and authenticate. No plaintext is returned on failure.
    pub fn decrypt(&self, backend: &dyn PrimitiveBackend, key: &CoseKey, options: &DecodeOptions) -> Result<Vec<u8>> {
        let desc = content_algorithm(&self.headers, &options.header_policy)?;
        validate(desc, key, KeyOperation::Decrypt)?;
        debug!(alg = desc.name, "decrypting COSE_Encrypt0");
        open_layer(
            backend,
            StructureContext::Encrypt0,
            &self.headers,
            desc,
            key,
            self.ciphertext.as_deref(),
            options,
        )
    }

    pub(crate) fn encode_body(&self, enc: &mut VecEncoder<'_>) -> Result<()> {
        enc.array(3)?;
        cbor::write_header_pair(enc, &self.headers)?;
        cbor::write_bstr_or_nil(enc, self.ciphertext.as_deref())
    }

    pub(crate) fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        cbor::read_array(dec, "COSE_Encrypt0", &[3])?;
        let headers = cbor::read_header_pair(dec)?;
        let ciphertext = cbor::read_bstr_or_nil(dec, "ciphertext")?;
        Ok(Self { headers, ciphertext })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoseEncrypt0Builder {
    protected: HeaderMap,
    unprotected: HeaderMap,
    external_aad: Vec<u8>,
    detached: bool,
}

impl CoseEncrypt0Builder {
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

    pub fn encrypt(self, backend: &dyn PrimitiveBackend, key: &CoseKey, plaintext: &[u8]) -> Result<CoseEncrypt0> {
        let protected = with_default_algorithm(self.protected, &self.unprotected, key);
        let mut unprotected = self.unprotected;

        let draft = HeaderPair::new(protected.clone(), unprotected.clone())?;
        let desc = content_algorithm(&draft, &HeaderPolicy::default())?;
        validate(desc, key, KeyOperation::Encrypt)?;

        ensure_iv(backend, desc, &protected, &mut unprotected)?;
        let headers = HeaderPair::new(protected, unprotected)?;
        let ciphertext = seal_layer(
            backend,
            StructureContext::Encrypt0,
            &headers,
            desc,
            key,
            &self.external_aad,
            plaintext,
        )?;

        debug!(alg = desc.name, detached = self.detached, "encrypted COSE_Encrypt0");
        Ok(CoseEncrypt0 {
            headers,
            ciphertext: (!self.detached).then_some(ciphertext),
        })
    }
}

/// A multi-recipient encrypted message; the content key travels in the recipient tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseEncrypt {
    pub headers: HeaderPair,
    pub ciphertext: Option<Vec<u8>>,
    pub recipients: Vec<RecipientNode>,
}

impl CoseEncrypt {
    pub fn builder() -> CoseEncryptBuilder {
        CoseEncryptBuilder::default()
    }

    pub fn from_cbor(input: &[u8], options: &DecodeOptions) -> Result<Self> {
        match decode_as(input, MessageKind::Encrypt, options)? {
            CoseMessage::Encrypt(m) => Ok(m),
            other => Err(CoseError::TagMismatch {
                expected: MessageKind::Encrypt.name().to_string(),
                found: Some(other.kind().tag()),
            }),
        }
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        CoseMessage::Encrypt(self.clone()).to_cbor()
    }

    /// Resolve the content key from the recipient tree with `keys` and decrypt.
    ///
    /// Every candidate content key is tried against the AEAD; `AuthenticationFailure`
    /// or `KeyManagementFailure` is reported only when none of them opens the message.
    pub fn decrypt(&self, backend: &dyn PrimitiveBackend, keys: &[CoseKey], options: &DecodeOptions) -> Result<Vec<u8>> {
        let desc = content_algorithm(&self.headers, &options.header_policy)?;
        let recipient_policy = options.header_policy.for_recipients();
        let ctx = ResolveContext {
            backend,
            keys,
            policy: &recipient_policy,
            max_depth: options.max_recipient_depth,
        };

        debug!(alg = desc.name, recipients = self.recipients.len(), "decrypting COSE_Encrypt");
        let open = |cek: &[u8]| -> Result<Vec<u8>> {
            let cek = CoseKey::symmetric(cek.to_vec());
            validate(desc, &cek, KeyOperation::Decrypt)?;
            open_layer(
                backend,
                StructureContext::Encrypt,
                &self.headers,
                desc,
                &cek,
                self.ciphertext.as_deref(),
                options,
            )
        };
        recipient::resolve_layer_key(&ctx, desc, &self.recipients, 1, &open)
    }

    pub(crate) fn encode_body(&self, enc: &mut VecEncoder<'_>) -> Result<()> {
        enc.array(4)?;
        cbor::write_header_pair(enc, &self.headers)?;
        cbor::write_bstr_or_nil(enc, self.ciphertext.as_deref())?;
        recipient::encode_recipients(enc, &self.recipients)
    }

    pub(crate) fn decode_body(dec: &mut Decoder<'_>, max_depth: usize) -> Result<Self> {
        cbor::read_array(dec, "COSE_Encrypt", &[4])?;
        let headers = cbor::read_header_pair(dec)?;
        let ciphertext = cbor::read_bstr_or_nil(dec, "ciphertext")?;
        let recipients = recipient::decode_recipients(dec, 1, max_depth)?;
        if recipients.is_empty() {
            return Err(CoseError::MissingRecipient);
        }
        Ok(Self {
            headers,
            ciphertext,
            recipients,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoseEncryptBuilder {
    protected: HeaderMap,
    unprotected: HeaderMap,
    external_aad: Vec<u8>,
    detached: bool,
    content_key: Option<Vec<u8>>,
    recipients: Vec<RecipientSpec>,
}

impl CoseEncryptBuilder {
    /// Content encryption algorithm, placed in the protected bucket.
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

    /// Use this content key instead of generating one.
    pub fn content_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.content_key = Some(key.into());
        self
    }

    pub fn recipient(mut self, recipient: RecipientSpec) -> Self {
        self.recipients.push(recipient);
        self
    }

    pub fn encrypt(self, backend: &dyn PrimitiveBackend, plaintext: &[u8]) -> Result<CoseEncrypt> {
        let mut unprotected = self.unprotected;
        let draft = HeaderPair::new(self.protected.clone(), unprotected.clone())?;
        let desc = content_algorithm(&draft, &HeaderPolicy::default())?;

        let layer = recipient::establish_layer_key(backend, desc, &self.recipients, self.content_key.as_deref(), 1)?;
        let cek = CoseKey::symmetric(layer.key.to_vec());
        validate(desc, &cek, KeyOperation::Encrypt)?;

        ensure_iv(backend, desc, &self.protected, &mut unprotected)?;
        let headers = HeaderPair::new(self.protected, unprotected)?;
        let ciphertext = seal_layer(
            backend,
            StructureContext::Encrypt,
            &headers,
            desc,
            &cek,
            &self.external_aad,
            plaintext,
        )?;

        debug!(alg = desc.name, recipients = layer.recipients.len(), "encrypted COSE_Encrypt");
        Ok(CoseEncrypt {
            headers,
            ciphertext: (!self.detached).then_some(ciphertext),
            recipients: layer.recipients,
        })
    }
}
