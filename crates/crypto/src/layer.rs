//! Single-layer seal/open with XChaCha20-Poly1305
//!
//! A relay body keeps its salt in the clear. Wrapping seals everything after
//! the salt with one hop's embryo key; peeling reverses it. Stacking wraps
//! from the innermost hop outward gives the onion.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};

use hopcraft_core::EmbryoKey;

use crate::header::{body_salt, SALT_LEN};
use crate::nonce::derive_nonce;
use crate::{CryptoError, Result};

/// Leading nonce bytes consumed by XChaCha20-Poly1305
const XNONCE_LEN: usize = 24;

fn cipher_for(embryo: &EmbryoKey) -> Result<XChaCha20Poly1305> {
    XChaCha20Poly1305::new_from_slice(&embryo.key).map_err(|_| CryptoError::InvalidKey)
}

/// Seal `plaintext` for one hop
pub fn seal_layer(embryo: &EmbryoKey, salt: u32, plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = derive_nonce(salt, embryo.salt, embryo.secret);
    cipher_for(embryo)?
        .encrypt(XNonce::from_slice(&nonce[..XNONCE_LEN]), plaintext)
        .map_err(|_| CryptoError::SealFailed)
}

/// Open one hop's layer. Fails on a wrong key, wrong salt or tampered data.
pub fn open_layer(embryo: &EmbryoKey, salt: u32, ciphertext: &[u8]) -> Result<Vec<u8>> {
    let nonce = derive_nonce(salt, embryo.salt, embryo.secret);
    cipher_for(embryo)?
        .decrypt(XNonce::from_slice(&nonce[..XNONCE_LEN]), ciphertext)
        .map_err(|_| CryptoError::OpenFailed)
}

/// Add one layer to a relay body, keeping its salt in front
pub fn wrap_body(embryo: &EmbryoKey, body: &[u8]) -> Result<Vec<u8>> {
    let salt = body_salt(body)?;
    let sealed = seal_layer(embryo, salt, &body[SALT_LEN..])?;

    let mut out = Vec::with_capacity(SALT_LEN + sealed.len());
    out.extend_from_slice(&body[..SALT_LEN]);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Remove one layer from a relay body, keeping its salt in front
pub fn peel_body(embryo: &EmbryoKey, body: &[u8]) -> Result<Vec<u8>> {
    let salt = body_salt(body)?;
    let opened = open_layer(embryo, salt, &body[SALT_LEN..])?;

    let mut out = Vec::with_capacity(SALT_LEN + opened.len());
    out.extend_from_slice(&body[..SALT_LEN]);
    out.extend_from_slice(&opened);
    Ok(out)
}
