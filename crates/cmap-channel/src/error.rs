use cmap_types::ChannelId;

/// Errors that can occur during channel tree operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// No channel with this id exists in the tree.
    #[error("unknown channel: {0}")]
    UnknownChannel(ChannelId),

    /// The tree contains the same channel id more than once.
    #[error("duplicate channel id: {0}")]
    DuplicateChannel(ChannelId),

    /// Channel ids must be positive.
    #[error("invalid channel id: {0}")]
    InvalidChannelId(ChannelId),

    /// The synthetic root cannot be modified.
    #[error("the root channel cannot be modified")]
    RootChannel,

    /// Backing store failure while loading or saving.
    #[error("store error: {0}")]
    Store(#[from] cmap_store::StoreError),
}

/// Convenience alias for channel results.
pub type ChannelResult<T> = Result<T, ChannelError>;
