use {
    crate::{
        SealedPaste, VisitorRecord,
        code::PasteCode,
        error::{Error, Result, StoreError},
    },
    std::{future::Future, time::Duration},
    tokio::time::timeout,
};

pub const STORE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A paste with the same code already exists; nothing was written.
    Conflict,
}

/// Persistence backend for sealed pastes and visitor bookkeeping.
pub trait Store {
    fn find_paste(
        &self,
        code: &PasteCode,
    ) -> impl Future<Output = Result<Option<SealedPaste>, StoreError>> + Send;

    /// Writes `paste` only when its code is unused.
    fn insert_paste(
        &self,
        paste: &SealedPaste,
    ) -> impl Future<Output = Result<InsertOutcome, StoreError>> + Send;

    fn find_visitor(
        &self,
        remote_addr: &str,
    ) -> impl Future<Output = Result<Option<VisitorRecord>, StoreError>> + Send;

    /// Replaces the record for `visitor.remote_addr`, inserting if absent.
    fn upsert_visitor(
        &self,
        visitor: &VisitorRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Applies [`STORE_TIMEOUT`] to a store call. A stalled backend surfaces as
/// [`Error::StoreTimeout`] instead of hanging the request.
pub async fn bounded<T>(operation: impl Future<Output = Result<T, StoreError>>) -> Result<T> {
    timeout(STORE_TIMEOUT, operation)
        .await
        .map_err(|_elapsed| Error::StoreTimeout)?
        .map_err(Error::Store)
}
