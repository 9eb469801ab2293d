use rand::RngExt;

/// Alphabet for generated room codes, avoiding easily-confused glyphs
/// (no 0/O, no 1/I).
const CLEAN_CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of generated room codes. Client-supplied codes may be shorter.
pub const ROOM_CODE_LENGTH: usize = 8;

/// Generate a room code of the requested length from the reduced alphabet.
pub fn generate_room_code_of_length(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..CLEAN_CHARS.len());
            // SAFETY: `idx` is produced by `random_range(0..len)`, so it is
            // always within [0, len).
            #[allow(clippy::indexing_slicing)]
            let ch = CLEAN_CHARS[idx] as char;
            ch
        })
        .collect()
}

/// Generate an 8-character room code.
pub fn generate_room_code() -> String {
    generate_room_code_of_length(ROOM_CODE_LENGTH)
}

/// Generate an opaque url-safe secret (host tokens, player tokens).
pub fn generate_secret(length: usize) -> String {
    const URL_SAFE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    let mut rng = rand::rng();
    (0..length)
        .map(|_| {
            let idx = rng.random_range(0..URL_SAFE.len());
            #[allow(clippy::indexing_slicing)]
            let ch = URL_SAFE[idx] as char;
            ch
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_codes_use_clean_alphabet() {
        for _ in 0..50 {
            let code = generate_room_code();
            assert_eq!(code.len(), ROOM_CODE_LENGTH);
            for ch in code.bytes() {
                assert!(CLEAN_CHARS.contains(&ch), "unexpected char {}", ch as char);
            }
        }
    }

    #[test]
    fn room_codes_avoid_confusable_glyphs() {
        for _ in 0..50 {
            let code = generate_room_code();
            assert!(!code.contains('0'));
            assert!(!code.contains('O'));
            assert!(!code.contains('1'));
            assert!(!code.contains('I'));
        }
    }

    #[test]
    fn secrets_have_requested_length() {
        let secret = generate_secret(43);
        assert_eq!(secret.len(), 43);
    }
}
