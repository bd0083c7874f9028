//! Security token unwrap and counter-mode payload decryption.
//!
//! Each encrypted track carries an opaque base64 token. The token is unwrapped
//! with the provider master key (AES-128-CBC, IV = first 16 decoded bytes) into
//! [`DecryptionMaterial`]: a 16-byte content key and an 8-byte counter-mode
//! nonce. Payloads are then decrypted with AES-128-CTR using a 64-bit
//! big-endian block counter starting at zero.

use std::path::{Path, PathBuf};

use aes::Aes128;
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, KeyIvInit, StreamCipher};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;
use tracing::{debug, instrument};

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes128Ctr64 = ctr::Ctr64BE<Aes128>;

/// Minimum unwrapped token length: 16-byte key + 8-byte nonce.
const MATERIAL_LEN: usize = 24;

/// AES block size; token IV length and CBC alignment requirement.
const BLOCK_LEN: usize = 16;

/// Errors from token unwrap or payload decryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A base64 input failed to decode.
    #[error("invalid base64 in {field}: {source}")]
    InvalidBase64 {
        /// Which input was malformed (`master_key` or `token`).
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    /// The decoded token is too short or not block-aligned.
    #[error("security token has invalid length {len}: {reason}")]
    InvalidTokenLength {
        /// Decoded token length in bytes.
        len: usize,
        /// Alignment or minimum-size requirement that was violated.
        reason: &'static str,
    },

    /// The master key is not a valid AES-128 key.
    #[error("master key must decode to {BLOCK_LEN} bytes, got {len}")]
    InvalidMasterKey {
        /// Decoded master key length in bytes.
        len: usize,
    },

    /// Reading or writing a payload file failed.
    #[error("IO error during decryption of {path}: {source}")]
    Io {
        /// The file being decrypted or written.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The descriptor claims encryption but carries no token.
    #[error("stream is flagged encrypted but no security token was provided")]
    MissingToken,
}

/// Per-track key material derived from the security token.
///
/// Lives only in memory for the duration of one track's decrypt operations
/// and is intentionally not serializable.
#[derive(Clone)]
pub struct DecryptionMaterial {
    key: [u8; 16],
    nonce: [u8; 8],
}

impl std::fmt::Debug for DecryptionMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key bytes never reach logs.
        f.debug_struct("DecryptionMaterial").finish_non_exhaustive()
    }
}

/// Unwraps a base64 security token into content-key material.
///
/// The decoded token is `IV(16) || ciphertext`; the ciphertext decrypts under
/// the master key in CBC mode with no padding removal, and the plaintext's
/// first 24 bytes are `key(16) || nonce(8)`. Trailing plaintext bytes are
/// ignored.
///
/// # Errors
///
/// Returns [`CryptoError`] when either input is not valid base64, the master
/// key is not 16 bytes, or the token is too short / not block-aligned.
#[instrument(skip_all)]
pub fn derive_key(token: &str, master_key: &str) -> Result<DecryptionMaterial, CryptoError> {
    let master_key = BASE64
        .decode(master_key)
        .map_err(|source| CryptoError::InvalidBase64 {
            field: "master_key",
            source,
        })?;
    if master_key.len() != BLOCK_LEN {
        return Err(CryptoError::InvalidMasterKey {
            len: master_key.len(),
        });
    }

    let decoded = BASE64
        .decode(token)
        .map_err(|source| CryptoError::InvalidBase64 {
            field: "token",
            source,
        })?;
    if decoded.len() < BLOCK_LEN + MATERIAL_LEN {
        return Err(CryptoError::InvalidTokenLength {
            len: decoded.len(),
            reason: "shorter than IV plus key material",
        });
    }

    let (iv, ciphertext) = decoded.split_at(BLOCK_LEN);
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(CryptoError::InvalidTokenLength {
            len: decoded.len(),
            reason: "ciphertext is not block-aligned",
        });
    }

    let mut plaintext = ciphertext.to_vec();
    let decryptor = Aes128CbcDec::new(master_key.as_slice().into(), iv.into());
    // NoPadding: the provider pads tokens to the block boundary itself and the
    // trailing bytes past the key material are meaningless.
    let plaintext = decryptor
        .decrypt_padded_mut::<NoPadding>(&mut plaintext)
        .map_err(|_| CryptoError::InvalidTokenLength {
            len: decoded.len(),
            reason: "ciphertext is not block-aligned",
        })?;

    if plaintext.len() < MATERIAL_LEN {
        return Err(CryptoError::InvalidTokenLength {
            len: decoded.len(),
            reason: "unwrapped material shorter than 24 bytes",
        });
    }

    let mut key = [0u8; 16];
    let mut nonce = [0u8; 8];
    key.copy_from_slice(&plaintext[..16]);
    nonce.copy_from_slice(&plaintext[16..24]);

    debug!("derived decryption material from security token");
    Ok(DecryptionMaterial { key, nonce })
}

/// Decrypts one payload in place, for callers that already hold the bytes.
pub fn decrypt_bytes(data: &mut [u8], material: &DecryptionMaterial) {
    // IV = nonce || 64-bit big-endian counter starting at 0.
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(&material.nonce);

    let mut cipher = Aes128Ctr64::new(&material.key.into(), &iv.into());
    cipher.apply_keystream(data);
}

/// Decrypts a whole ciphertext file to a `.decrypted` sibling.
///
/// The ciphertext source is single-use: it is removed after the plaintext has
/// been written, so it never outlives decryption.
///
/// # Errors
///
/// Returns [`CryptoError::Io`] when the source can't be read or the sibling
/// can't be written.
#[instrument(skip(material), fields(path = %path.display()))]
pub fn decrypt_file(path: &Path, material: &DecryptionMaterial) -> Result<PathBuf, CryptoError> {
    let mut data = std::fs::read(path).map_err(|source| CryptoError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    decrypt_bytes(&mut data, material);

    let output = path.with_extension("decrypted");
    std::fs::write(&output, &data).map_err(|source| CryptoError::Io {
        path: output.clone(),
        source,
    })?;

    std::fs::remove_file(path).map_err(|source| CryptoError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    debug!(output = %output.display(), bytes = data.len(), "decrypted file");
    Ok(output)
}
