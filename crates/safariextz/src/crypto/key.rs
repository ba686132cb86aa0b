//! Signature length from private key parameters.
//!
//! Supports PEM and DER keys in PKCS#8 or PKCS#1 form, and SEC1 PEM for P-256. An RSA PKCS#1 v1.5
//! signature is always exactly as long as the modulus, so the length is known
//! before anything is signed. ECDSA signatures are DER encoded and their length
//! varies from one signature to the next, so P-256 keys are recognised but
//! cannot provide a fixed size.

use crate::{Error, Result};
use p256::pkcs8::DecodePrivateKey as _;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// RSA key with the modulus length in bits.
    Rsa { bits: usize },
    /// ECDSA key on the NIST P-256 curve.
    EcdsaP256,
}

/// What the packer needs to know about a private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKeyInfo {
    pub path: PathBuf,
    pub kind: KeyKind,
}

impl PrivateKeyInfo {
    /// Load and identify the key at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let kind = identify(&data).map_err(|reason| Error::Key {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            kind,
        })
    }

    /// Length in bytes of every signature this key produces, when fixed.
    pub fn fixed_signature_len(&self) -> Option<usize> {
        match self.kind {
            KeyKind::Rsa { bits } => Some(bits.div_ceil(8)),
            KeyKind::EcdsaP256 => None,
        }
    }

    /// Like [`fixed_signature_len`](Self::fixed_signature_len), but an error
    /// for keys whose signature length varies.
    pub fn signature_len(&self) -> Result<usize> {
        self.fixed_signature_len().ok_or_else(|| Error::Key {
            path: self.path.clone(),
            reason: "ECDSA signatures vary in length; use the signing probe".into(),
        })
    }
}

fn rsa_kind(key: &RsaPrivateKey) -> KeyKind {
    KeyKind::Rsa {
        bits: key.size() * 8,
    }
}

fn identify(data: &[u8]) -> std::result::Result<KeyKind, String> {
    if let Ok(text) = std::str::from_utf8(data) {
        if text.contains("-----BEGIN") {
            return identify_pem(text);
        }
    }
    identify_der(data)
}

fn identify_pem(text: &str) -> std::result::Result<KeyKind, String> {
    if text.contains("BEGIN ENCRYPTED PRIVATE KEY") {
        return Err("encrypted private keys are not supported".into());
    }
    if text.contains("BEGIN EC PRIVATE KEY") {
        return p256::SecretKey::from_sec1_pem(text)
            .map(|_| KeyKind::EcdsaP256)
            .map_err(|e| format!("not a P-256 SEC1 key: {e}"));
    }
    if text.contains("BEGIN RSA PRIVATE KEY") {
        return RsaPrivateKey::from_pkcs1_pem(text)
            .map(|k| rsa_kind(&k))
            .map_err(|e| format!("invalid PKCS#1 RSA key: {e}"));
    }
    if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(text) {
        return Ok(rsa_kind(&key));
    }
    if p256::SecretKey::from_pkcs8_pem(text).is_ok() {
        return Ok(KeyKind::EcdsaP256);
    }
    Err("not an RSA or P-256 private key".into())
}

fn identify_der(data: &[u8]) -> std::result::Result<KeyKind, String> {
    if let Ok(key) = RsaPrivateKey::from_pkcs8_der(data) {
        return Ok(rsa_kind(&key));
    }
    if let Ok(key) = RsaPrivateKey::from_pkcs1_der(data) {
        return Ok(rsa_kind(&key));
    }
    if p256::SecretKey::from_pkcs8_der(data).is_ok() {
        return Ok(KeyKind::EcdsaP256);
    }
    Err("not an RSA or P-256 private key".into())
}
