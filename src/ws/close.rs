use std::fmt;

/// Why the relay closed a connection. Sent as the websocket close frame reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    InvalidSessionId,
    NotFound,
    Expired,
    SessionFull,
    SessionEnded,
    InternalError,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::InvalidSessionId => "invalid-session-id-format",
            CloseReason::NotFound => "not-found-or-expired",
            CloseReason::Expired => "expired",
            CloseReason::SessionFull => "session-full",
            CloseReason::SessionEnded => "session-ended",
            CloseReason::InternalError => "internal-error",
        }
    }

    /// Websocket close code. Application codes live in the 4000 range; 1011 is the standard
    /// "unexpected condition" code.
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::InvalidSessionId => 4400,
            CloseReason::NotFound => 4404,
            CloseReason::Expired => 4410,
            CloseReason::SessionFull => 4429,
            CloseReason::SessionEnded => 4000,
            CloseReason::InternalError => 1011,
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_id_and_not_found_are_distinct() {
        assert_ne!(CloseReason::InvalidSessionId.code(), CloseReason::NotFound.code());
        assert_ne!(CloseReason::InvalidSessionId.as_str(), CloseReason::NotFound.as_str());
        assert_eq!(CloseReason::SessionFull.to_string(), "session-full");
    }
}
