use crate::storage::StoreError;

/// Errors returned by the analyzer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A view that compares periods was called without `day` or both `from` and `to`.
    #[error("no period or day specified")]
    NoPeriodOrDay,
    #[error(transparent)]
    Store(#[from] StoreError),
}
