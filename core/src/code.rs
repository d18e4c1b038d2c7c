use {
    crate::error::{Error, Result},
    anyhow::{bail, ensure},
    rand::{TryRngCore, rngs::OsRng},
    serde::{Deserialize, Serialize},
    std::{fmt, str::FromStr},
};

pub const CODE_LENGTH: usize = 6;

const CODE_ALPHABET: &[u8; 57] = b"abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const ALPHABET_LEN: u8 = 57;
// Largest multiple of the alphabet size that fits in a byte; bytes at or
// above it are rejected so the pick stays uniform.
const REJECTION_LIMIT: u8 = u8::MAX - u8::MAX % ALPHABET_LEN;

/// Public lookup handle of a paste: 6 symbols over an alphabet with the
/// ambiguous characters (`0 O 1 I l`) left out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PasteCode(String);

impl PasteCode {
    pub fn generate() -> Result<Self> {
        let mut code = String::with_capacity(CODE_LENGTH);
        while code.len() < CODE_LENGTH {
            let mut buf = [0u8; 8];
            OsRng.try_fill_bytes(&mut buf).map_err(Error::Rng)?;
            for value in buf {
                if code.len() == CODE_LENGTH {
                    break;
                }
                if value >= REJECTION_LIMIT {
                    continue;
                }
                if let Some(&symbol) = CODE_ALPHABET.get(usize::from(value % ALPHABET_LEN)) {
                    code.push(char::from(symbol));
                }
            }
        }
        Ok(Self(code))
    }

    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PasteCode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PasteCode {
    type Err = anyhow::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ensure!(
            s.len() == CODE_LENGTH,
            "invalid length; got {}, expected {CODE_LENGTH}",
            s.len(),
        );
        if let Some(c) = s.chars().find(|c| !c.is_ascii_alphanumeric()) {
            bail!("must be alphanumeric but contains invalid character `{c}`");
        }
        Ok(Self(s.to_owned()))
    }
}

#[cfg(test)]
#[expect(clippy::default_numeric_fallback, reason = "test")]
mod tests {
    use {super::*, std::collections::HashSet};

    #[test]
    fn generated_codes_use_the_alphabet() {
        for _ in 0..64 {
            let code = PasteCode::generate().unwrap();
            assert_eq!(code.as_str().len(), CODE_LENGTH);
            assert!(
                code.as_str().bytes().all(|b| CODE_ALPHABET.contains(&b)),
                "unexpected symbol in {code}",
            );
        }
    }

    #[test]
    fn generated_codes_vary() {
        let codes: HashSet<_> = (0..32).map(|_| PasteCode::generate().unwrap()).collect();
        assert!(codes.len() > 1);
    }

    #[test]
    fn from_str_validation() {
        assert_eq!("abc123".parse::<PasteCode>().unwrap().as_str(), "abc123");
        "".parse::<PasteCode>().unwrap_err();
        "abc12".parse::<PasteCode>().unwrap_err();
        "abc1234".parse::<PasteCode>().unwrap_err();
        "abc.12".parse::<PasteCode>().unwrap_err();
    }
}
