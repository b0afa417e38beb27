/*!
Crypto things

Spotify tokens are stored encrypted (AES_256_GCM) and session tokens are
stored as an HMAC so a database dump can't be replayed against spotify
or against us.
*/
use ring::aead::BoundKey;

use crate::error::Result;

pub const KEY_LEN: usize = 32;

/// ring requires an implementor of `NonceSequence`,
/// which is a wrapping trait around `ring::aead::Nonce`.
/// We have to make a wrapper that can pass ownership
/// of the nonce exactly once.
struct OneNonceSequence {
    inner: Option<ring::aead::Nonce>,
}
impl OneNonceSequence {
    fn new(inner: ring::aead::Nonce) -> Self {
        Self { inner: Some(inner) }
    }
}

impl ring::aead::NonceSequence for OneNonceSequence {
    fn advance(&mut self) -> std::result::Result<ring::aead::Nonce, ring::error::Unspecified> {
        self.inner.take().ok_or(ring::error::Unspecified)
    }
}

/// Return a `Vec` of secure random bytes of size `n`
pub fn rand_bytes(n: usize) -> Result<Vec<u8>> {
    use ring::rand::SecureRandom;
    let mut buf = vec![0; n];
    let sysrand = ring::rand::SystemRandom::new();
    sysrand
        .fill(&mut buf)
        .map_err(|_| "Error getting random bytes")?;
    Ok(buf)
}

pub fn new_nonce() -> Result<Vec<u8>> {
    rand_bytes(12)
}

/// Encrypt `bytes` with the given `nonce` and `pass`
///
/// `bytes` are encrypted using AES_256_GCM, `nonce` is expected to be
/// 12-bytes, and `pass` 32-bytes
pub fn encrypt(bytes: &[u8], nonce: &[u8], pass: &[u8]) -> Result<Vec<u8>> {
    let alg = &ring::aead::AES_256_GCM;
    let nonce = ring::aead::Nonce::try_assume_unique_for_key(nonce)
        .map_err(|_| "Encryption nonce not unique")?;
    let nonce = OneNonceSequence::new(nonce);
    let key = ring::aead::UnboundKey::new(alg, pass).map_err(|_| "Error building sealing key")?;
    let mut key = ring::aead::SealingKey::new(key, nonce);
    let mut in_out = bytes.to_vec();
    key.seal_in_place_append_tag(ring::aead::Aad::empty(), &mut in_out)
        .map_err(|_| "Failed encrypting bytes")?;
    Ok(in_out)
}

/// Decrypt `bytes` with the given `nonce` and `pass`
pub fn decrypt<'a>(bytes: &'a mut [u8], nonce: &[u8], pass: &[u8]) -> Result<&'a [u8]> {
    let alg = &ring::aead::AES_256_GCM;
    let nonce = ring::aead::Nonce::try_assume_unique_for_key(nonce)
        .map_err(|_| "Decryption nonce not unique")?;
    let nonce = OneNonceSequence::new(nonce);
    let key = ring::aead::UnboundKey::new(alg, pass).map_err(|_| "Error build opening key")?;
    let mut key = ring::aead::OpeningKey::new(key, nonce);
    let out_slice = key
        .open_in_place(ring::aead::Aad::empty(), bytes)
        .map_err(|_| "Failed decrypting bytes")?;
    Ok(out_slice)
}

/// A hex encoded ciphertext and the hex encoded nonce it was sealed with
#[derive(Debug, Clone, PartialEq)]
pub struct Enc {
    pub value: String,
    pub nonce: String,
}

/// Holds the application secret so callers don't have to pass it around
#[derive(Clone)]
pub struct Cipher {
    key: Vec<u8>,
}

impl Cipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LEN {
            return Err(crate::error::Error::Configuration(format!(
                "encryption key must be {} bytes, got {}",
                KEY_LEN,
                key.len()
            )));
        }
        Ok(Self { key: key.to_vec() })
    }

    pub fn encrypt(&self, s: &str) -> Result<Enc> {
        let nonce = new_nonce()?;
        let b = encrypt(s.as_bytes(), &nonce, &self.key)?;
        Ok(Enc {
            value: hex::encode(&b),
            nonce: hex::encode(&nonce),
        })
    }

    pub fn decrypt(&self, enc: &Enc) -> Result<String> {
        let nonce = hex::decode(&enc.nonce).map_err(|e| se!("nonce hex decode error {}", e))?;
        let mut value = hex::decode(&enc.value).map_err(|e| se!("value hex decode error {}", e))?;
        let bytes = decrypt(value.as_mut_slice(), &nonce, &self.key)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| se!("decrypted value utf8 error {}", e))
    }

    pub fn hmac_sign(&self, s: &str) -> String {
        let s_key = ring::hmac::Key::new(ring::hmac::HMAC_SHA256, &self.key);
        let tag = ring::hmac::sign(&s_key, s.as_bytes());
        hex::encode(tag.as_ref())
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cipher { .. }")
    }
}
