//! Transport-neutral WebSocket frames.

use bytes::Bytes;

/// One frame exchanged with a peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 payload.
    Text(Bytes),
    /// Opaque payload.
    Binary(Bytes),
    /// Keepalive probe.
    Ping(Bytes),
    /// Keepalive answer; renews the read deadline.
    Pong(Bytes),
    /// Orderly close.
    Close,
}

impl Frame {
    /// Build a text frame from anything string-like.
    pub fn text(payload: impl Into<String>) -> Self {
        Self::Text(Bytes::from(payload.into()))
    }

    /// Application payload carried by a data frame, if any.
    pub fn data(&self) -> Option<&Bytes> {
        match self {
            Self::Text(b) | Self::Binary(b) => Some(b),
            Self::Ping(_) | Self::Pong(_) | Self::Close => None,
        }
    }
}
