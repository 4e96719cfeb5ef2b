use crate::queue::QueueClosed;
use cadence_types::{ConversationId, ErrorKind, TurnId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// A turn with the same id is still in flight.
    #[error("turn {0} is already in progress")]
    DuplicateTurn(TurnId),

    /// The conversation already moved past this turn when it arrived.
    #[error("turn {turn_id} is older than the latest turn of conversation {conversation_id}")]
    Stale {
        conversation_id: ConversationId,
        turn_id: TurnId,
    },

    #[error(transparent)]
    QueueClosed(#[from] QueueClosed),
}

impl PipelineError {
    /// How the connection layer reports this error. `None` means the turn
    /// is dropped without telling the client.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::DuplicateTurn(_) => Some(ErrorKind::InvalidRequest),
            Self::Stale { .. } => None,
            Self::QueueClosed(_) => None,
        }
    }
}
