//! Sealed-box encryption for repository secrets
//!
//! GitHub only accepts Actions secrets encrypted to the repository's public
//! key with a libsodium sealed box, base64-encoded.

use base64::{Engine, engine::general_purpose::STANDARD};
use crypto_box::{PublicKey, aead::OsRng};

use cmsforge_provision_api::ProviderError;

/// Encrypt `value` for the repository key `public_key_b64`.
pub(crate) fn seal_secret(public_key_b64: &str, value: &str) -> Result<String, ProviderError> {
    let key_bytes = STANDARD.decode(public_key_b64.trim()).map_err(|e| {
        ProviderError::InvalidResponse(format!("repository public key is not base64: {e}"))
    })?;
    let key: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
        ProviderError::InvalidResponse(format!(
            "repository public key has {} bytes, expected 32",
            key_bytes.len()
        ))
    })?;

    let sealed = PublicKey::from(key)
        .seal(&mut OsRng, value.as_bytes())
        .map_err(|_| ProviderError::InvalidResponse("failed to seal secret".to_string()))?;
    Ok(STANDARD.encode(sealed))
}
