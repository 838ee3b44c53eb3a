//! Chromium cookie value decryption.
//!
//! Windows profiles seal `v10`/`v11` values with AES-256-GCM under a key that
//! `Local State` keeps wrapped by DPAPI. Linux profiles without a keyring seal
//! `v10` values with AES-128-CBC under a fixed PBKDF2-derived key.

// aes-gcm 0.10 still exposes generic-array slices
#[allow(deprecated)]
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use secrecy::{ExposeSecret, SecretString};
use std::path::Path;

type Aes128CbcDec = cbc::Decryptor<aes_gcm::aes::Aes128>;

const VERSION_PREFIXES: [&[u8]; 2] = [b"v10", b"v11"];
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const DPAPI_PREFIX: &[u8] = b"DPAPI";
/// Newer Chromium prepends SHA-256(host_key) to the plaintext
const HOST_DIGEST_LEN: usize = 32;
/// Password, salt and rounds Chromium uses on Linux when no keyring is available
const LINUX_PASSWORD: &[u8] = b"peanuts";
const LINUX_SALT: &[u8] = b"saltysalt";
const LINUX_ROUNDS: u32 = 1;
const CBC_IV: [u8; 16] = [b' '; 16];
const CBC_BLOCK: usize = 16;

/// AES key of one browser profile
#[derive(Clone)]
pub enum CookieKey {
    /// AES-256-GCM key from `Local State` or `BROWSER_COOKIE_KEY`
    Gcm([u8; 32]),
    /// AES-128-CBC key of Linux profiles
    Cbc([u8; 16]),
}

impl std::fmt::Debug for CookieKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CookieKey(..)")
    }
}

impl CookieKey {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let key: [u8; 32] = bytes.try_into().ok()?;
        Some(Self::Gcm(key))
    }

    /// Key Chromium derives on Linux when the profile has no keyring secret.
    pub fn linux_default() -> Self {
        let mut key = [0u8; 16];
        pbkdf2::pbkdf2_hmac::<sha1::Sha1>(LINUX_PASSWORD, LINUX_SALT, LINUX_ROUNDS, &mut key);
        Self::Cbc(key)
    }

    /// Fallback when neither an explicit nor a `Local State` key is available.
    pub fn platform_default() -> Option<Self> {
        cfg!(target_os = "linux").then(Self::linux_default)
    }

    /// `BROWSER_COOKIE_KEY`: base64 of the raw (already unprotected) key
    pub fn from_base64(secret: &SecretString) -> Option<Self> {
        let bytes = STANDARD.decode(secret.expose_secret().trim()).ok()?;
        let key = Self::from_slice(&bytes);
        if key.is_none() {
            log::warn!("BROWSER_COOKIE_KEY must decode to 32 bytes, got {}", bytes.len());
        }
        key
    }

    /// Reads `os_crypt.encrypted_key` from a `Local State` file and unwraps it
    /// through the OS key store.
    pub fn from_local_state(path: &Path) -> Option<Self> {
        let content = fs_err::read_to_string(path).ok()?;
        let wrapped = wrapped_key_from_local_state(&content)?;
        let key = os_unprotect(&wrapped)?;
        Self::from_slice(&key)
    }

}

/// The DPAPI-wrapped key blob without its `DPAPI` marker.
pub fn wrapped_key_from_local_state(content: &str) -> Option<Vec<u8>> {
    let json: serde_json::Value = serde_json::from_str(content).ok()?;
    let encoded = json.pointer("/os_crypt/encrypted_key")?.as_str()?;
    let blob = STANDARD.decode(encoded).ok()?;
    blob.strip_prefix(DPAPI_PREFIX).map(<[u8]>::to_vec)
}

/// Unwraps a DPAPI blob with the current user's credentials.
#[cfg(windows)]
#[allow(unsafe_code)]
fn os_unprotect(wrapped: &[u8]) -> Option<Vec<u8>> {
    use windows_sys::Win32::Foundation::LocalFree;
    use windows_sys::Win32::Security::Cryptography::{CryptUnprotectData, CRYPT_INTEGER_BLOB};

    let input = CRYPT_INTEGER_BLOB {
        cbData: u32::try_from(wrapped.len()).ok()?,
        pbData: wrapped.as_ptr().cast_mut(),
    };
    let mut output = CRYPT_INTEGER_BLOB {
        cbData: 0,
        pbData: std::ptr::null_mut(),
    };
    // SAFETY: `input` borrows `wrapped` for the duration of the call and DPAPI
    // only reads it; `output` is allocated by DPAPI and released with LocalFree.
    let ok = unsafe {
        CryptUnprotectData(
            &input,
            std::ptr::null_mut(),
            std::ptr::null(),
            std::ptr::null(),
            std::ptr::null(),
            0,
            &mut output,
        )
    };
    if ok == 0 || output.pbData.is_null() {
        log::warn!("DPAPI refused the Local State key; set BROWSER_COOKIE_KEY to read encrypted cookies");
        return None;
    }
    // SAFETY: DPAPI reported success, so `output` describes `cbData` readable bytes.
    let key = unsafe { std::slice::from_raw_parts(output.pbData, output.cbData as usize) }.to_vec();
    // SAFETY: the buffer came from DPAPI and is freed exactly once.
    unsafe { LocalFree(output.pbData.cast()) };
    Some(key)
}

#[cfg(not(windows))]
fn os_unprotect(_wrapped: &[u8]) -> Option<Vec<u8>> {
    log::debug!("Local State key is DPAPI-wrapped and DPAPI is Windows-only");
    None
}

pub fn is_encrypted(value: &[u8]) -> bool {
    VERSION_PREFIXES.iter().any(|p| value.starts_with(p))
}

/// Decrypts a `v10`/`v11` value with `key`. `None` on any failure.
pub fn decrypt_cookie_value(encrypted: &[u8], key: &CookieKey) -> Option<String> {
    if !is_encrypted(encrypted) {
        return None;
    }
    let plain = match key {
        CookieKey::Gcm(key) => decrypt_gcm(&encrypted[3..], key)?,
        CookieKey::Cbc(key) => decrypt_cbc(&encrypted[3..], key)?,
    };
    strip_host_digest(plain)
}

/// `nonce(12) | ciphertext | tag(16)`
#[allow(deprecated)]
fn decrypt_gcm(sealed: &[u8], key: &[u8; 32]) -> Option<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return None;
    }
    let (nonce, payload) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).ok()?;
    cipher.decrypt(Nonce::from_slice(nonce), payload).ok()
}

/// PKCS#7-padded blocks under a fixed all-spaces IV
fn decrypt_cbc(sealed: &[u8], key: &[u8; 16]) -> Option<Vec<u8>> {
    if sealed.is_empty() || sealed.len() % CBC_BLOCK != 0 {
        return None;
    }
    Aes128CbcDec::new_from_slices(key, &CBC_IV)
        .ok()?
        .decrypt_padded_vec_mut::<Pkcs7>(sealed)
        .ok()
}

fn strip_host_digest(plain: Vec<u8>) -> Option<String> {
    match String::from_utf8(plain) {
        Ok(s) => Some(s),
        Err(e) => {
            let bytes = e.into_bytes();
            if bytes.len() > HOST_DIGEST_LEN {
                String::from_utf8(bytes[HOST_DIGEST_LEN..].to_vec()).ok()
            } else {
                None
            }
        }
    }
}
