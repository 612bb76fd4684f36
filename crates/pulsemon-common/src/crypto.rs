//! Hybrid request encryption: a fresh AES-256-GCM payload key wrapped with
//! RSA-OAEP(SHA-256), serialised as a tagged JSON envelope. The agent seals
//! the already-gzipped request body; the server opens it back into the
//! gzipped JSON.

use base64::{engine::general_purpose, Engine as _};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::sha2::Sha256;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ENVELOPE_VERSION: u32 = 1;
pub const ALG_RSA_OAEP_256: &str = "RSA-OAEP-256";
pub const ENC_AES_256_GCM: &str = "AES-256-GCM";

const AES_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("read key file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse PEM key: {0}")]
    Pem(String),
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("bad envelope params")]
    BadParams,
    #[error("bad base64 field")]
    BadBase64,
    #[error("wrong AES key size")]
    WrongKeySize,
    #[error("wrong IV size")]
    WrongIv,
    #[error("empty ciphertext")]
    EmptyCiphertext,
    #[error("rsa: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("aead failure")]
    Aead,
}

/// Wire form of the hybrid envelope; all byte fields are standard base64.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub v: u32,
    pub alg: String,
    pub enc: String,
    /// RSA-OAEP(SHA-256) encryption of the 32-byte AES key.
    pub ek: String,
    /// 12-byte GCM nonce.
    pub iv: String,
    /// AES-256-GCM ciphertext with the tag appended, no AAD.
    pub ct: String,
}

/// Reads an RSA public key from a PEM file. Accepts both PKIX
/// ("PUBLIC KEY") and PKCS#1 ("RSA PUBLIC KEY") blocks.
pub fn load_public_key(path: &Path) -> Result<RsaPublicKey, CryptoError> {
    let pem = std::fs::read_to_string(path)?;
    if let Ok(key) = RsaPublicKey::from_public_key_pem(&pem) {
        return Ok(key);
    }
    RsaPublicKey::from_pkcs1_pem(&pem).map_err(|e| CryptoError::Pem(e.to_string()))
}

/// Reads an RSA private key from a PEM file. Accepts both PKCS#8
/// ("PRIVATE KEY") and PKCS#1 ("RSA PRIVATE KEY") blocks.
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey, CryptoError> {
    let pem = std::fs::read_to_string(path)?;
    if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(&pem) {
        return Ok(key);
    }
    RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|e| CryptoError::Pem(e.to_string()))
}

/// Seals `plain` into an envelope under a fresh AES key and nonce, so two
/// seals of the same payload never produce the same bytes.
pub fn seal(public_key: &RsaPublicKey, plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let rng = SystemRandom::new();
    let mut aes_key = [0u8; AES_KEY_LEN];
    rng.fill(&mut aes_key).map_err(|_| CryptoError::Aead)?;
    let mut iv = [0u8; NONCE_LEN];
    rng.fill(&mut iv).map_err(|_| CryptoError::Aead)?;

    let unbound = UnboundKey::new(&AES_256_GCM, &aes_key).map_err(|_| CryptoError::WrongKeySize)?;
    let key = LessSafeKey::new(unbound);
    let mut in_out = plain.to_vec();
    key.seal_in_place_append_tag(Nonce::assume_unique_for_key(iv), Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::Aead)?;

    let ek = public_key.encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), &aes_key)?;

    let envelope = Envelope {
        v: ENVELOPE_VERSION,
        alg: ALG_RSA_OAEP_256.to_string(),
        enc: ENC_AES_256_GCM.to_string(),
        ek: general_purpose::STANDARD.encode(ek),
        iv: general_purpose::STANDARD.encode(iv),
        ct: general_purpose::STANDARD.encode(in_out),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Opens an envelope produced by [`seal`]. Any deviation in version,
/// algorithm identifiers, field encoding or sizes is a decrypt error.
pub fn open(private_key: &RsaPrivateKey, envelope_bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let envelope: Envelope = serde_json::from_slice(envelope_bytes)?;
    if envelope.v != ENVELOPE_VERSION
        || envelope.alg != ALG_RSA_OAEP_256
        || envelope.enc != ENC_AES_256_GCM
    {
        return Err(CryptoError::BadParams);
    }

    let ek = general_purpose::STANDARD
        .decode(&envelope.ek)
        .map_err(|_| CryptoError::BadBase64)?;
    let iv = general_purpose::STANDARD
        .decode(&envelope.iv)
        .map_err(|_| CryptoError::BadBase64)?;
    let ct = general_purpose::STANDARD
        .decode(&envelope.ct)
        .map_err(|_| CryptoError::BadBase64)?;
    if iv.len() != NONCE_LEN {
        return Err(CryptoError::WrongIv);
    }
    if ct.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }

    let aes_key = private_key.decrypt(Oaep::new::<Sha256>(), &ek)?;
    if aes_key.len() != AES_KEY_LEN {
        return Err(CryptoError::WrongKeySize);
    }

    let unbound = UnboundKey::new(&AES_256_GCM, &aes_key).map_err(|_| CryptoError::WrongKeySize)?;
    let key = LessSafeKey::new(unbound);
    let nonce = Nonce::try_assume_unique_for_key(&iv).map_err(|_| CryptoError::WrongIv)?;
    let mut in_out = ct;
    let plain = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::Aead)?;
    Ok(plain.to_vec())
}
