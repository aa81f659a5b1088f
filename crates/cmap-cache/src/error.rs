/// Internal cache failures. Never surfaced past [`CacheService`](crate::CacheService).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// A region or entry lock was poisoned by a panicking writer.
    #[error("cache region {region} lock poisoned")]
    Poisoned { region: String },
}

/// Result alias for internal cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
