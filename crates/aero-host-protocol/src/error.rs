use thiserror::Error;

use crate::Tag;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message has no numeric type tag")]
    MissingTag,

    #[error("unknown message tag {0}")]
    UnknownTag(u32),

    /// A known tag that is not valid in this direction.
    #[error("unexpected message {} for this endpoint", .0.name())]
    UnexpectedTag(Tag),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid value for field `{0}`")]
    InvalidField(&'static str),

    #[error("attachment for field `{0}` is missing or was already taken")]
    MissingAttachment(&'static str),
}

/// The other endpoint of a [`crate::MessagePort`] has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("message port closed")]
pub struct PortClosed;
