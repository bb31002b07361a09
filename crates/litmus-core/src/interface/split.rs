pub const DEFAULT_MAX_MESSAGE_LEN: usize = 1000;

/// Splits `msg` into chunks of at most `max_length` characters. Prefers to
/// break after the last whitespace inside a window; concatenating the
/// chunks yields `msg` unchanged.
pub fn split_message(msg: &str, max_length: usize) -> Vec<String> {
    let max_length = max_length.max(1);
    let mut chunks = Vec::new();
    let mut rest = msg;

    while !rest.is_empty() {
        let window_end = rest
            .char_indices()
            .nth(max_length)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        if window_end == rest.len() {
            chunks.push(rest.to_string());
            break;
        }
        let window = &rest[..window_end];
        let cut = window
            .char_indices()
            .rev()
            .find(|(_, c)| c.is_whitespace())
            .map(|(i, c)| i + c.len_utf8())
            .filter(|&i| i > 0)
            .unwrap_or(window_end);
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(msg: &str, max: usize) {
        let chunks = split_message(msg, max);
        assert_eq!(chunks.concat(), msg);
        for c in &chunks {
            assert!(c.chars().count() <= max, "chunk too long: {}", c.chars().count());
            assert!(!c.is_empty());
        }
    }

    #[test]
    fn short_message_is_single_chunk() {
        assert_eq!(split_message("hello", 1000), vec!["hello".to_string()]);
        assert!(split_message("", 1000).is_empty());
    }

    #[test]
    fn long_messages_respect_bound() {
        let words = "lorem ipsum dolor sit amet ".repeat(200);
        check(&words, DEFAULT_MAX_MESSAGE_LEN);
        check(&"x".repeat(2500), DEFAULT_MAX_MESSAGE_LEN);
        check(&"नमस्ते दुनिया ".repeat(300), 100);
        check("a b", 1);
    }

    #[test]
    fn prefers_whitespace_boundary() {
        let chunks = split_message("aaaa bbbb cccc", 7);
        assert_eq!(chunks, vec!["aaaa ", "bbbb ", "cccc"]);
    }
}
