use {
    rand::{TryRngCore, rngs::OsRng},
    thiserror::Error,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub type RngError = <OsRng as TryRngCore>::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("requested expiry of {requested} seconds is over the limit")]
    InvalidExpiry { requested: u32 },
    #[error("submission has no text and no attachment")]
    EmptySubmission,
    #[error("no such paste")]
    NotFound,
    #[error("secure random source failed")]
    Rng(#[source] RngError),
    #[error("sealing failed")]
    Sealing,
    #[error("failed to encode paste for sealing")]
    Encoding(#[source] bincode::error::EncodeError),
    #[error("store operation timed out")]
    StoreTimeout,
    #[error("store operation failed")]
    Store(#[source] StoreError),
    #[error("could not find an unused paste code")]
    CodeSpaceExhausted,
}

/// Opaque failure reported by a store backend.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct StoreError(Box<dyn std::error::Error + Send + Sync>);

impl StoreError {
    #[inline]
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(err.into())
    }
}

/// Returned by [`Cipher::open`](crate::cipher::Cipher::open) for any input
/// that does not authenticate: tampered, truncated, or sealed under a
/// different key. The cases are deliberately indistinguishable.
#[derive(Debug, PartialEq, Eq, Error)]
#[error("ciphertext failed authentication")]
pub struct AuthenticationFailure;
