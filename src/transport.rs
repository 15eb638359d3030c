//! The request port towards the remote service.

use crate::event::Direction;
use crate::store::PaginationFrom;
use crate::sync::{EventContext, PaginationResponse};
use async_trait::async_trait;
use thiserror::Error;

/// Error code the server answers with when a `from` token is malformed or
/// no longer valid.
pub const INVALID_PARAM_ERRCODE: &str = "M_INVALID_PARAM";

/// Failures reported by a [`Transport`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server rejected the pagination token.
    #[error("pagination token rejected: {0}")]
    InvalidToken(String),

    #[error("request failed with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network failure: {0}")]
    Network(String),
}

impl TransportError {
    /// Whether this failure means there is nothing more to paginate.
    ///
    /// A rejected or expired token ends pagination in that direction; the
    /// timeline records it instead of reporting an error.
    pub fn is_pagination_exhausted(&self) -> bool {
        match self {
            TransportError::InvalidToken(_) => true,
            TransportError::Http { status, message } => {
                *status == 400 && message.contains(INVALID_PARAM_ERRCODE)
            }
            TransportError::Network(_) => false,
        }
    }
}

/// A message history request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagesRequest {
    pub room_id: String,
    pub from: PaginationFrom,
    pub direction: Direction,
    pub limit: usize,
    /// Whether the transport may retry transient failures on its own.
    ///
    /// `false` when the same pagination call has already delivered cached
    /// events: the caller owns the retry so those events are not held back.
    pub allow_retry: bool,
}

/// Remote requests a timeline issues.
///
/// Both calls are cancellable by dropping the returned future; the timeline
/// only updates cursors after a call has resolved.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `limit` events on each side of `event_id`, plus the room state
    /// at that event.
    async fn context_of_event(
        &self,
        room_id: &str,
        event_id: &str,
        limit: usize,
    ) -> Result<EventContext, TransportError>;

    async fn messages(
        &self,
        request: MessagesRequest,
    ) -> Result<PaginationResponse, TransportError>;
}
