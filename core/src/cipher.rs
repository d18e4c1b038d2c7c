use {
    crate::error::{AuthenticationFailure, Error, Result},
    chacha20poly1305::{
        ChaCha20Poly1305, Key, Nonce,
        aead::{Aead, KeyInit},
    },
    rand::{TryRngCore, rngs::OsRng},
    std::fmt::{self, Debug},
    zeroize::{Zeroize, ZeroizeOnDrop},
};

pub const KEY_LENGTH: usize = 32;
pub const NONCE_LENGTH: usize = 12;
pub const TAG_LENGTH: usize = 16;

const MIN_SEALED_LENGTH: usize = NONCE_LENGTH + TAG_LENGTH;

/// Secret key material for a [`Cipher`]. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LENGTH]);

impl SymmetricKey {
    pub fn generate() -> Result<Self> {
        let mut bytes = [0u8; KEY_LENGTH];
        OsRng.try_fill_bytes(&mut bytes).map_err(Error::Rng)?;
        Ok(Self(bytes))
    }
}

impl Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricKey").finish()
    }
}

pub struct Cipher {
    inner: ChaCha20Poly1305,
}

impl Cipher {
    #[must_use]
    #[inline]
    pub fn new(key: &SymmetricKey) -> Self {
        Self {
            inner: ChaCha20Poly1305::new(Key::from_slice(&key.0)),
        }
    }

    /// Encrypts `plaintext` under a fresh random nonce. The nonce is
    /// prepended to the returned buffer.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.try_fill_bytes(&mut nonce_bytes).map_err(Error::Rng)?;
        let ciphertext = self
            .inner
            .encrypt(&Nonce::from(nonce_bytes), plaintext)
            .map_err(|_err| Error::Sealing)?;
        let mut output = Vec::with_capacity(NONCE_LENGTH.saturating_add(ciphertext.len()));
        output.extend_from_slice(&nonce_bytes);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    /// Decrypts a buffer produced by [`seal`](Self::seal). Truncated input,
    /// a wrong key and a modified ciphertext all fail the same way.
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>, AuthenticationFailure> {
        if data.len() < MIN_SEALED_LENGTH {
            return Err(AuthenticationFailure);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LENGTH);
        self.inner
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_err| AuthenticationFailure)
    }
}

#[cfg(test)]
#[expect(
    clippy::arithmetic_side_effects,
    clippy::indexing_slicing,
    reason = "test"
)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let key = SymmetricKey::generate().unwrap();
        let cipher = Cipher::new(&key);
        let sealed = cipher.seal(b"six pages of pasta").unwrap();
        assert_eq!(
            sealed.len(),
            NONCE_LENGTH + b"six pages of pasta".len() + TAG_LENGTH
        );
        assert_eq!(cipher.open(&sealed).unwrap(), b"six pages of pasta");
    }

    #[test]
    fn fresh_nonce_for_every_seal() {
        let cipher = Cipher::new(&SymmetricKey::generate().unwrap());
        let first = cipher.seal(b"same input").unwrap();
        let second = cipher.seal(b"same input").unwrap();
        assert_ne!(first[..NONCE_LENGTH], second[..NONCE_LENGTH]);
        assert_ne!(first, second);
    }

    #[test]
    fn tampering_fails_authentication() {
        let cipher = Cipher::new(&SymmetricKey::generate().unwrap());
        let mut sealed = cipher.seal(b"attack at dawn").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(cipher.open(&sealed).unwrap_err(), AuthenticationFailure);
    }

    #[test]
    fn truncated_input_fails_authentication() {
        let cipher = Cipher::new(&SymmetricKey::generate().unwrap());
        let sealed = cipher.seal(b"attack at dawn").unwrap();
        assert_eq!(
            cipher.open(&sealed[..NONCE_LENGTH]).unwrap_err(),
            AuthenticationFailure,
        );
        assert_eq!(cipher.open(b"").unwrap_err(), AuthenticationFailure);
    }

    #[test]
    fn wrong_key_fails_like_tampering() {
        let sealed = Cipher::new(&SymmetricKey::generate().unwrap())
            .seal(b"attack at dawn")
            .unwrap();
        let other = Cipher::new(&SymmetricKey::generate().unwrap());
        assert_eq!(other.open(&sealed).unwrap_err(), AuthenticationFailure);
    }
}
