//! Relay message codec.
//!
//! Settled topics carry `hex(iv || mac || ciphertext)` where the ciphertext is
//! AES-256-CBC with PKCS#7 padding and the MAC is HMAC-SHA256 over
//! `iv || ciphertext`. Encryption and authentication keys come from HKDF-SHA256
//! over the agreement secret. Bootstrap topics carry plain `hex(payload)`.

use crate::crypto::AgreementSecret;
use crate::error::CryptoError;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

pub const IV_LENGTH: usize = 16;
pub const MAC_LENGTH: usize = 32;
const KEY_INFO: &[u8] = b"wc-relay-codec-v1";

struct CodecKeys {
    material: Zeroizing<[u8; 64]>,
}

impl CodecKeys {
    fn derive(secret: &AgreementSecret) -> Self {
        let hkdf = Hkdf::<Sha256>::new(None, secret.as_bytes());
        let mut material = Zeroizing::new([0u8; 64]);
        // 64 bytes is well under the 255 * 32 byte HKDF-SHA256 limit.
        let _ = hkdf.expand(KEY_INFO, &mut material[..]);
        Self { material }
    }

    fn encryption_key(&self) -> &[u8] {
        &self.material[..32]
    }

    fn authentication_key(&self) -> &[u8] {
        &self.material[32..]
    }

    fn mac(&self, iv: &[u8], ciphertext: &[u8]) -> Result<HmacSha256, CryptoError> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(self.authentication_key())
            .map_err(|_| CryptoError::Authentication)?;
        mac.update(iv);
        mac.update(ciphertext);
        Ok(mac)
    }
}

pub fn encrypt(secret: &AgreementSecret, plaintext: &[u8]) -> Result<String, CryptoError> {
    let keys = CodecKeys::derive(secret);
    let mut iv = [0u8; IV_LENGTH];
    OsRng.fill_bytes(&mut iv);

    let cipher = Aes256CbcEnc::new_from_slices(keys.encryption_key(), &iv)
        .map_err(|err| CryptoError::Decryption(err.to_string()))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
    let tag = keys.mac(&iv, &ciphertext)?.finalize().into_bytes();

    let mut out = Vec::with_capacity(IV_LENGTH + MAC_LENGTH + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&tag);
    out.extend_from_slice(&ciphertext);
    Ok(hex::encode(out))
}

pub fn decrypt(secret: &AgreementSecret, message: &str) -> Result<Vec<u8>, CryptoError> {
    let bytes = hex::decode(message.trim())
        .map_err(|err| CryptoError::Decryption(format!("not hex: {err}")))?;
    if bytes.len() < IV_LENGTH + MAC_LENGTH + 16 {
        return Err(CryptoError::Decryption(format!("message too short: {} bytes", bytes.len())));
    }
    let (iv, rest) = bytes.split_at(IV_LENGTH);
    let (tag, ciphertext) = rest.split_at(MAC_LENGTH);

    let keys = CodecKeys::derive(secret);
    keys.mac(iv, ciphertext)?.verify_slice(tag).map_err(|_| CryptoError::Authentication)?;

    let cipher = Aes256CbcDec::new_from_slices(keys.encryption_key(), iv)
        .map_err(|err| CryptoError::Decryption(err.to_string()))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Decryption("bad padding".to_string()))
}

pub fn encode_plaintext(payload: &[u8]) -> String {
    hex::encode(payload)
}

pub fn decode_plaintext(message: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(message.trim()).map_err(|err| CryptoError::Decryption(format!("not hex: {err}")))
}
