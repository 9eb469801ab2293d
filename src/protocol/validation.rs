//! Input sanitization for everything a client can name.
//!
//! All helpers are total: malformed input degrades to a safe default rather
//! than an error, matching the silent-guard handling of message frames.

/// Default display name when the requested one is empty or forbidden.
pub const DEFAULT_PLAYER_NAME: &str = "Игрок";

/// Lowercased substrings that disqualify a display name.
const FORBIDDEN_NAME_PARTS: [&str; 4] = ["админ", "admin", "moder", "host"];

const MAX_PLAYER_NAME_CHARS: usize = 24;
const MAX_TEAM_NAME_CHARS: usize = 32;
const MAX_TOPIC_CHARS: usize = 80;
const MAX_ROOM_ID_CHARS: usize = 8;
const MAX_CHAT_TEXT_CHARS: usize = 280;

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Uppercase, strip non-alphanumerics, cap at 8 characters.
pub fn sanitize_room_id(raw: &str) -> String {
    let upper = raw.to_uppercase();
    let filtered: String = upper.chars().filter(|c| c.is_alphanumeric()).collect();
    truncate_chars(&filtered, MAX_ROOM_ID_CHARS)
}

/// Trim, collapse runs of whitespace, cap at 24 chars; host-like or
/// admin-like names fall back to the default.
pub fn sanitize_player_name(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned = truncate_chars(&collapsed, MAX_PLAYER_NAME_CHARS)
        .trim()
        .to_string();
    if cleaned.is_empty() {
        return DEFAULT_PLAYER_NAME.to_string();
    }
    let lowered = cleaned.to_lowercase();
    if FORBIDDEN_NAME_PARTS.iter().any(|part| lowered.contains(part)) {
        return DEFAULT_PLAYER_NAME.to_string();
    }
    cleaned
}

/// Case/whitespace-insensitive form used for host reclaim matching.
pub fn normalize_player_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Trim and cap a team name, falling back when empty.
pub fn sanitize_team_name(raw: &str, fallback: &str) -> String {
    let trimmed = truncate_chars(raw.trim(), MAX_TEAM_NAME_CHARS);
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed
    }
}

/// Normalized form used for the used-team-names set.
pub fn normalize_team_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Client ids shorter than 8 usable characters are not trusted for identity.
pub fn normalize_client_id(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let filtered: String = lowered
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if filtered.chars().count() < 8 {
        return None;
    }
    Some(truncate_chars(&filtered, 64))
}

/// Player tokens under 12 usable characters cannot reclaim a seat.
pub fn normalize_player_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let filtered: String = trimmed
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if filtered.chars().count() < 12 {
        return None;
    }
    Some(truncate_chars(&filtered, 128))
}

/// Trim and cap a topic string.
pub fn sanitize_topic(raw: &str) -> String {
    truncate_chars(raw.trim(), MAX_TOPIC_CHARS)
}

/// Chat text is trimmed and capped; empty text is the caller's no-op signal.
pub fn sanitize_chat_text(raw: &str) -> String {
    truncate_chars(raw.trim(), MAX_CHAT_TEXT_CHARS)
}

/// Clamp the per-game question count into the supported 5..=7 range.
pub fn clamp_question_count(value: i64) -> usize {
    value.clamp(5, 7) as usize
}

/// Make `candidate` unique among `taken` by appending " 2", " 3", …
///
/// `taken` entries are compared case-insensitively.
pub fn uniquify_name<'a, I>(candidate: &str, taken: I) -> String
where
    I: Iterator<Item = &'a str> + Clone,
{
    let occupied = |name: &str| {
        taken
            .clone()
            .any(|existing| existing.to_lowercase() == name.to_lowercase())
    };
    if !occupied(candidate) {
        return candidate.to_string();
    }
    for suffix in 2..100 {
        let attempt = format!("{candidate} {suffix}");
        if !occupied(&attempt) {
            return attempt;
        }
    }
    candidate.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_id_is_uppercased_and_capped() {
        assert_eq!(sanitize_room_id("ab-cd 1234xyz"), "ABCD1234");
        assert_eq!(sanitize_room_id(""), "");
    }

    #[test]
    fn player_name_collapses_whitespace() {
        assert_eq!(sanitize_player_name("  Алиса   Б  "), "Алиса Б");
    }

    #[test]
    fn forbidden_player_names_fall_back() {
        assert_eq!(sanitize_player_name("Admin"), DEFAULT_PLAYER_NAME);
        assert_eq!(sanitize_player_name("супер-АДМИН"), DEFAULT_PLAYER_NAME);
        assert_eq!(sanitize_player_name("ghost"), DEFAULT_PLAYER_NAME);
        assert_eq!(sanitize_player_name(""), DEFAULT_PLAYER_NAME);
    }

    #[test]
    fn player_name_caps_at_24_chars() {
        let long = "x".repeat(60);
        assert_eq!(sanitize_player_name(&long).chars().count(), 24);
    }

    #[test]
    fn client_id_requires_8_chars() {
        assert_eq!(normalize_client_id("abc"), None);
        assert_eq!(
            normalize_client_id("  AbCd-1234!! "),
            Some("abcd-1234".to_string())
        );
    }

    #[test]
    fn player_token_requires_12_chars() {
        assert_eq!(normalize_player_token("short-token"), None);
        assert!(normalize_player_token("a-valid-token-123").is_some());
    }

    #[test]
    fn question_count_clamps_to_range() {
        assert_eq!(clamp_question_count(1), 5);
        assert_eq!(clamp_question_count(6), 6);
        assert_eq!(clamp_question_count(50), 7);
    }

    #[test]
    fn uniquify_appends_numeric_suffix() {
        let taken = ["Игрок", "Игрок 2"];
        let unique = uniquify_name("Игрок", taken.iter().copied());
        assert_eq!(unique, "Игрок 3");
    }

    #[test]
    fn uniquify_is_case_insensitive() {
        let taken = ["alice"];
        assert_eq!(uniquify_name("Alice", taken.iter().copied()), "Alice 2");
    }

    proptest::proptest! {
        #[test]
        fn sanitized_player_names_stay_within_limits(raw in ".{0,60}") {
            let name = sanitize_player_name(&raw);
            proptest::prop_assert!(!name.is_empty());
            proptest::prop_assert!(name.chars().count() <= 24);
            let lowered = name.to_lowercase();
            for part in FORBIDDEN_NAME_PARTS {
                proptest::prop_assert!(
                    name == DEFAULT_PLAYER_NAME || !lowered.contains(part)
                );
            }
        }

        #[test]
        fn sanitized_room_ids_are_short_uppercase_alnum(raw in ".{0,20}") {
            let id = sanitize_room_id(&raw);
            proptest::prop_assert!(id.chars().count() <= 8);
            proptest::prop_assert!(id.chars().all(char::is_alphanumeric));
            proptest::prop_assert!(!id.chars().any(|c| c.is_ascii_lowercase()));
        }

        #[test]
        fn normalized_client_ids_are_usable_or_rejected(raw in ".{0,80}") {
            if let Some(client_id) = normalize_client_id(&raw) {
                proptest::prop_assert!(client_id.chars().count() >= 8);
                proptest::prop_assert!(client_id.chars().count() <= 64);
                proptest::prop_assert!(client_id
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '-' || c == '_'));
            }
        }
    }
}
