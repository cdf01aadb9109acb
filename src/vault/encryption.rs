//! AES-256-GCM encryption for credential payloads.
//!
//! Each payload is encrypted with a fresh random IV, and the authentication
//! tag is kept detached so ciphertext, IV, and tag can be stored as three
//! separate columns. The master key is 64 hex characters (32 bytes) provided
//! from an environment variable and held in memory only.

use aes_gcm::{
    aead::{AeadCore, AeadInPlace, KeyInit, OsRng},
    aes::Aes256,
    AesGcm,
};
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::generic_array::GenericArray;
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// AES-256-GCM with a 16-byte IV, matching the stored blob format.
type Cipher = AesGcm<Aes256, U16>;

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the IV in bytes
const IV_SIZE: usize = 16;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// One encrypted payload as stored at rest: all components base64-encoded
/// so they serialize safely into TEXT columns.
#[derive(Clone, Debug, PartialEq)]
pub struct EncryptedBlob {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
}

/// Validates that the master key is exactly 32 bytes when hex decoded.
///
/// A missing or malformed key is a fatal configuration error: the store
/// refuses to construct rather than degrade to plaintext.
pub fn validate_key(key_hex: &str) -> Result<Vec<u8>> {
    let key_bytes = hex::decode(key_hex.trim())
        .context("Failed to decode hex encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes ({} hex chars), got {} bytes",
            KEY_SIZE,
            KEY_SIZE * 2,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// Encrypts plaintext with a fresh random IV.
///
/// # Security
/// - IV comes from a cryptographically secure RNG and is never reused
/// - Authenticated encryption: any tampering is detected at decrypt time
pub fn encrypt(plaintext: &str, key: &[u8]) -> Result<EncryptedBlob> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
    }

    let cipher = Cipher::new_from_slice(key)
        .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    let iv = Cipher::generate_nonce(&mut OsRng);

    let mut buffer = plaintext.as_bytes().to_vec();
    let tag = cipher
        .encrypt_in_place_detached(&iv, b"", &mut buffer)
        .map_err(|e| anyhow!("Encryption failed: {}", e))?;

    Ok(EncryptedBlob {
        ciphertext: BASE64.encode(&buffer),
        iv: BASE64.encode(iv),
        tag: BASE64.encode(tag),
    })
}

/// Decrypts a stored blob, verifying the authentication tag.
///
/// Fails if the ciphertext, IV, or tag has been tampered with or mismatched;
/// never returns garbage plaintext.
pub fn decrypt(blob: &EncryptedBlob, key: &[u8]) -> Result<String> {
    if key.len() != KEY_SIZE {
        return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
    }

    let mut buffer = BASE64
        .decode(&blob.ciphertext)
        .context("Failed to decode ciphertext")?;
    let iv_bytes = BASE64.decode(&blob.iv).context("Failed to decode IV")?;
    let tag_bytes = BASE64.decode(&blob.tag).context("Failed to decode tag")?;

    if iv_bytes.len() != IV_SIZE {
        return Err(anyhow!(
            "Invalid IV size: expected {}, got {}",
            IV_SIZE,
            iv_bytes.len()
        ));
    }
    if tag_bytes.len() != TAG_SIZE {
        return Err(anyhow!(
            "Invalid tag size: expected {}, got {}",
            TAG_SIZE,
            tag_bytes.len()
        ));
    }

    let cipher = Cipher::new_from_slice(key)
        .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;

    let iv = GenericArray::from_slice(&iv_bytes);
    let tag = GenericArray::from_slice(&tag_bytes);

    cipher
        .decrypt_in_place_detached(iv, b"", &mut buffer, tag)
        .map_err(|_| anyhow!("Decryption failed: authentication tag mismatch"))?;

    String::from_utf8(buffer).context("Decrypted data is not valid UTF-8")
}
