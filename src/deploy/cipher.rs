use aes::{Aes128, Aes192, Aes256};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use rand::RngCore;

use crate::error::{DeployError, Result};

/// AES block size; also the IV length prefixed to every ciphertext.
pub const BLOCK_SIZE: usize = 16;

/// Reversible encryption for stored host secrets.
pub trait SecretCipher: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// AES in CFB mode. The key length (16, 24 or 32 bytes) selects AES-128,
/// AES-192 or AES-256. Ciphertexts are `base64url(iv || data)` with padding.
#[derive(Clone)]
pub struct AesCfbCipher {
    key: Vec<u8>,
}

impl std::fmt::Debug for AesCfbCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesCfbCipher")
            .field("key_len", &self.key.len())
            .finish()
    }
}

impl AesCfbCipher {
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self> {
        let key = key.into();
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(DeployError::Configuration(format!(
                "AES key must be 16, 24 or 32 bytes, got {}",
                key.len()
            )));
        }
        Ok(Self { key })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut buf = vec![0u8; BLOCK_SIZE + plaintext.len()];
        let (iv, data) = buf.split_at_mut(BLOCK_SIZE);
        rand::thread_rng().fill_bytes(iv);
        data.copy_from_slice(plaintext.as_bytes());

        apply_cfb(&self.key, iv, data, Direction::Encrypt)?;
        Ok(URL_SAFE.encode(&buf))
    }
}

impl SecretCipher for AesCfbCipher {
    fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let mut raw = URL_SAFE
            .decode(ciphertext.trim())
            .map_err(|e| DeployError::Decrypt(format!("invalid base64: {}", e)))?;

        if raw.len() < BLOCK_SIZE {
            return Err(DeployError::Decrypt("ciphertext too short".to_string()));
        }

        let (iv, data) = raw.split_at_mut(BLOCK_SIZE);
        apply_cfb(&self.key, iv, data, Direction::Decrypt)?;

        String::from_utf8(data.to_vec())
            .map_err(|_| DeployError::Decrypt("plaintext is not valid UTF-8".to_string()))
    }
}

/// Used when no AES key is configured: hosts without a secret still work,
/// hosts with one fail with a decrypt error.
#[derive(Debug, Clone, Copy, Default)]
pub struct MissingKeyCipher;

impl SecretCipher for MissingKeyCipher {
    fn decrypt(&self, _ciphertext: &str) -> Result<String> {
        Err(DeployError::Decrypt("no AES key configured".to_string()))
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

fn apply_cfb(key: &[u8], iv: &[u8], data: &mut [u8], direction: Direction) -> Result<()> {
    match key.len() {
        16 => run::<Aes128>(key, iv, data, direction),
        24 => run::<Aes192>(key, iv, data, direction),
        32 => run::<Aes256>(key, iv, data, direction),
        n => Err(DeployError::Decrypt(format!("unsupported key length {}", n))),
    }
}

fn run<C>(key: &[u8], iv: &[u8], data: &mut [u8], direction: Direction) -> Result<()>
where
    C: aes::cipher::BlockEncryptMut + aes::cipher::BlockCipher + aes::cipher::KeyInit,
{
    let invalid = |e: aes::cipher::InvalidLength| DeployError::Decrypt(e.to_string());
    match direction {
        Direction::Encrypt => cfb_mode::Encryptor::<C>::new_from_slices(key, iv)
            .map_err(invalid)?
            .encrypt(data),
        Direction::Decrypt => cfb_mode::Decryptor::<C>::new_from_slices(key, iv)
            .map_err(invalid)?
            .decrypt(data),
    }
    Ok(())
}
