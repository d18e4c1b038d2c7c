use {
    chrono::Utc,
    derive_more::{From, Into},
    serde::{Deserialize, Serialize},
    std::fmt::{self, Debug},
    zeroize::{Zeroize, ZeroizeOnDrop},
};

pub mod cipher;
mod code;
pub mod db;
pub mod encoding;
pub mod error;
pub mod guard;
pub mod keyring;
pub mod media;
pub mod store;
pub mod vault;

pub use crate::{
    code::PasteCode,
    error::{Error, Result},
};

pub type DateTimeUtc = chrono::DateTime<Utc>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
pub struct KeyId(pub u32);

impl fmt::Display for KeyId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Decrypted paste content. Exists only transiently between a request and
/// the cipher; wiped from memory on drop and never persisted as-is.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PlaintextPaste {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl PlaintextPaste {
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.attachment.is_none()
    }
}

impl Debug for PlaintextPaste {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaintextPaste").finish()
    }
}

#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Debug for Attachment {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment").finish()
    }
}

/// Encrypted-at-rest paste record. `expire_date` stays outside the
/// ciphertext so the store sweep can evict without a key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedPaste {
    pub code: PasteCode,
    pub key_id: KeyId,
    pub ciphertext: Vec<u8>,
    pub expire_date: DateTimeUtc,
}

/// Per-address bookkeeping for rate limiting and bans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitorRecord {
    pub remote_addr: String,
    pub banned: bool,
    pub last_access: DateTimeUtc,
    pub expire_date: DateTimeUtc,
}
