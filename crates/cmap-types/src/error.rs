use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid content id: {0}")]
    InvalidContentId(String),

    #[error("cannot coerce {value} to {kind}")]
    Coercion { kind: String, value: String },

    #[error("unknown attribute {name} for object type {object_type}")]
    UnknownAttribute { object_type: i32, name: String },

    #[error("duplicate attribute {name} for object type {object_type}")]
    DuplicateAttribute { object_type: i32, name: String },
}
