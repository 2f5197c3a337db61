//! Payload encryption and `aes128gcm` body framing (RFC 8188).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Key, Nonce};
use tavolo_types::PushError;

/// Record size advertised in the body header. Notification payloads are
/// always small enough to fit a single record, so no chunking happens.
const RECORD_SIZE: u32 = 4096;

/// Padding delimiter for the last (and only) record.
const PAD_DELIMITER: u8 = 0x02;

/// Length of the uncompressed SEC1 point carried as the key id.
const KEY_ID_LEN: u8 = 65;

/// Encrypt a payload under the derived content-encryption key.
///
/// Appends the single padding-delimiter byte (minimal padding scheme),
/// then seals with AES-128-GCM. No additional authenticated data; the
/// 16-byte GCM tag is appended to the ciphertext.
pub fn encrypt_payload(
    payload: &[u8],
    cek: &[u8; 16],
    nonce: &[u8; 12],
) -> Result<Vec<u8>, PushError> {
    let mut plaintext = Vec::with_capacity(payload.len() + 1);
    plaintext.extend_from_slice(payload);
    plaintext.push(PAD_DELIMITER);

    let cipher = Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(cek));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext.as_ref())
        .map_err(|_| PushError::Crypto("AES-GCM encryption failed".into()))
}

/// Assemble the binary request body:
///
/// `salt (16) || record size (4, big-endian) || key id length (1) ||
/// ephemeral public key (65) || ciphertext`
pub fn frame_body(salt: &[u8; 16], server_public: &[u8; 65], ciphertext: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(16 + 4 + 1 + server_public.len() + ciphertext.len());
    body.extend_from_slice(salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(KEY_ID_LEN);
    body.extend_from_slice(server_public);
    body.extend_from_slice(ciphertext);
    body
}
