//! Room topic naming and subject pattern matching.
//!
//! One topic per chat room: `chat.room.{room_id}`. Patterns use
//! NATS-style wildcards:
//! - `*` matches any single segment
//! - `>` matches one or more segments (only at the end)

/// Prefix shared by every room topic.
pub const ROOM_TOPIC_PREFIX: &str = "chat.room.";

/// Pattern covering every room topic. The per-process fan-out listener
/// subscribes to this.
pub const ALL_ROOMS_PATTERN: &str = "chat.room.>";

/// Topic for one room's messages.
pub fn room_topic(room_id: i64) -> String {
    format!("{ROOM_TOPIC_PREFIX}{room_id}")
}

/// Extract the room id from a topic, if it is a room topic.
pub fn room_from_topic(topic: &str) -> Option<i64> {
    topic.strip_prefix(ROOM_TOPIC_PREFIX)?.parse().ok()
}

/// Check if a subscription pattern matches a subject.
pub fn matches_subject(pattern: &str, subject: &str) -> bool {
    let pattern_parts: Vec<&str> = pattern.split('.').collect();
    let subject_parts: Vec<&str> = subject.split('.').collect();

    let mut pi = 0;
    let mut si = 0;

    while pi < pattern_parts.len() && si < subject_parts.len() {
        let p = pattern_parts[pi];

        if p == ">" {
            // Greedy: consumes the rest of the subject, at least one segment.
            return si < subject_parts.len();
        } else if p == "*" || p == subject_parts[si] {
            pi += 1;
            si += 1;
        } else {
            return false;
        }
    }

    pi == pattern_parts.len() && si == subject_parts.len()
}

/// Validate a subscription pattern.
/// Returns an error message if invalid, `None` if valid.
pub fn validate_pattern(pattern: &str) -> Option<String> {
    if pattern.is_empty() {
        return Some("empty pattern".to_string());
    }

    let parts: Vec<&str> = pattern.split('.').collect();
    for (i, part) in parts.iter().enumerate() {
        if *part == ">" && i != parts.len() - 1 {
            return Some("> wildcard can only be at the end".to_string());
        }
        if part.is_empty() {
            return Some("empty segment in pattern".to_string());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_topic_round_trip() {
        let topic = room_topic(42);
        assert_eq!(topic, "chat.room.42");
        assert_eq!(room_from_topic(&topic), Some(42));
        assert_eq!(room_from_topic("chat.room.not-a-number"), None);
        assert_eq!(room_from_topic("other.topic"), None);
    }

    #[test]
    fn exact_match() {
        assert!(matches_subject("chat.room.1", "chat.room.1"));
        assert!(!matches_subject("chat.room.1", "chat.room.2"));
    }

    #[test]
    fn single_wildcard() {
        assert!(matches_subject("chat.room.*", "chat.room.7"));
        assert!(matches_subject("chat.*.7", "chat.room.7"));
        assert!(!matches_subject("chat.room.*", "chat.room"));
    }

    #[test]
    fn greedy_wildcard() {
        assert!(matches_subject(ALL_ROOMS_PATTERN, "chat.room.7"));
        assert!(matches_subject(">", "chat.room.7"));
        assert!(!matches_subject("chat.room.7.>", "chat.room.7"));
    }

    #[test]
    fn pattern_validation() {
        assert!(validate_pattern("chat.room.1").is_none());
        assert!(validate_pattern(ALL_ROOMS_PATTERN).is_none());
        assert!(validate_pattern(">.chat").is_some());
        assert!(validate_pattern("chat..room").is_some());
        assert!(validate_pattern("").is_some());
    }
}
