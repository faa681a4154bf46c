use crate::error::ProtocolError;
use crate::sequence::SessionState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionOperation {
    Update,
    Upgrade,
    Payload,
    Notify,
    Ping,
    Delete,
}

impl SessionOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Upgrade => "upgrade",
            Self::Payload => "payload",
            Self::Notify => "notify",
            Self::Ping => "ping",
            Self::Delete => "delete",
        }
    }
}

pub fn legal_states(operation: SessionOperation) -> &'static [SessionState] {
    match operation {
        SessionOperation::Update
        | SessionOperation::Upgrade
        | SessionOperation::Payload
        | SessionOperation::Notify
        | SessionOperation::Ping => &[SessionState::Settled],
        SessionOperation::Delete => &[SessionState::PreSettled, SessionState::Settled],
    }
}

/// Guards application traffic on a session that has not been acknowledged yet.
pub fn ensure_operation_legal(
    operation: SessionOperation,
    state: SessionState,
    topic: &str,
) -> Result<(), ProtocolError> {
    if legal_states(operation).contains(&state) {
        return Ok(());
    }
    if state == SessionState::PreSettled || operation != SessionOperation::Delete {
        return Err(ProtocolError::SessionNotSettled(topic.to_string()));
    }
    Err(ProtocolError::IllegalOperation { operation: operation.as_str(), state: state.as_str() })
}
