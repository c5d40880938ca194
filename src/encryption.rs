//! Symmetric encryption for the local store.
//!
//! AES-256-GCM for encrypting license, revocation, and metadata files at
//! rest. The GCM authentication tag doubles as tamper detection: a modified
//! file fails to decrypt instead of yielding garbage.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};

use rand::rngs::OsRng;
use rand::TryRngCore;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;

use crate::errors::{LicenseError, LicenseResult};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// GCM nonce size in bytes (96-bit).
pub const NONCE_SIZE: usize = 12;

/// Encrypt arbitrary bytes using AES-256-GCM.
///
/// Output format:
///   [nonce (12 bytes)] || [ciphertext+tag]
pub fn encrypt_bytes(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> LicenseResult<Vec<u8>> {
    let key = Key::<Aes256Gcm>::from_slice(key);
    let cipher = Aes256Gcm::new(key);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    let mut rng = OsRng;
    // If OsRng fails here, the environment is badly broken.
    rng.try_fill_bytes(&mut nonce_bytes)
        .map_err(|e| LicenseError::Encryption(format!("nonce generation failed: {e}")))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| LicenseError::Encryption(format!("encryption failed: {e}")))?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.append(&mut ciphertext);

    Ok(output)
}

/// Decrypt bytes produced by `encrypt_bytes`.
pub fn decrypt_bytes(ciphertext: &[u8], key: &[u8; KEY_SIZE]) -> LicenseResult<Vec<u8>> {
    if ciphertext.len() <= NONCE_SIZE {
        return Err(LicenseError::Decryption("ciphertext too short".to_string()));
    }

    let (nonce_bytes, ct) = ciphertext.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let key = Key::<Aes256Gcm>::from_slice(key);
    let cipher = Aes256Gcm::new(key);

    cipher
        .decrypt(nonce, ct)
        .map_err(|e| LicenseError::Decryption(format!("decryption failed: {e}")))
}

/// Encrypt bytes and return a Base64 string suitable for a store file.
pub fn encrypt_to_base64(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> LicenseResult<String> {
    let encrypted = encrypt_bytes(plaintext, key)?;
    Ok(B64.encode(encrypted))
}

/// Decrypt a Base64 ciphertext previously produced by `encrypt_to_base64`.
pub fn decrypt_from_base64(ciphertext_b64: &str, key: &[u8; KEY_SIZE]) -> LicenseResult<Vec<u8>> {
    let decoded = B64
        .decode(ciphertext_b64.trim())
        .map_err(|e| LicenseError::Decryption(format!("base64 decode failed: {e}")))?;
    decrypt_bytes(&decoded, key)
}
