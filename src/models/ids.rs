use rand::RngCore;
use uuid::Uuid;

/// Generate a new session id: 128 random bits in canonical 8-4-4-4-12 grouping.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    Uuid::from_bytes(bytes).hyphenated().to_string()
}

/// Check that a session id has the canonical lowercase 8-4-4-4-12 hex form.
pub fn is_valid_session_id(id: &str) -> bool {
    const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];

    if id.len() != 36 {
        return false;
    }
    let parts: Vec<&str> = id.split('-').collect();
    if parts.len() != GROUPS.len() {
        return false;
    }
    parts.iter().zip(GROUPS).all(|(part, len)| {
        part.len() == len && part.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    })
}

/// Participant ids end up inside store keys and log lines; keep them short and plain.
pub fn is_valid_participant_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'@'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_valid_and_distinct() {
        let ids: HashSet<String> = (0..256).map(|_| generate_session_id()).collect();
        assert_eq!(ids.len(), 256);
        assert!(ids.iter().all(|id| is_valid_session_id(id)));
    }

    #[test]
    fn malformed_ids_are_rejected() {
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("abc"));
        assert!(!is_valid_session_id("0123456789abcdef0123456789abcdef"));
        assert!(!is_valid_session_id("0123456-89abc-def0-1234-56789abcdef01"));
        assert!(!is_valid_session_id("0123456789AB-cdef-0123-4567-89abcdef"));
        assert!(!is_valid_session_id("01234567-89ab-cdef-0123-456789abcdeg"));
        assert!(is_valid_session_id("01234567-89ab-cdef-0123-456789abcdef"));
    }

    #[test]
    fn participant_ids_are_plain_tokens() {
        assert!(is_valid_participant_id("alice"));
        assert!(is_valid_participant_id("user-42@notes.example"));
        assert!(!is_valid_participant_id(""));
        assert!(!is_valid_participant_id("a:b"));
        assert!(!is_valid_participant_id("white space"));
        assert!(!is_valid_participant_id(&"x".repeat(129)));
    }
}
