//! Token estimation.
//!
//! Character heuristic: ~4 characters per token, rounded up. Close enough
//! for BPE tokenizers on English text and fully deterministic.

use docforge_core::Message;

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate tokens for a message, including ~4 tokens of role/framing
/// overhead in the wire format.
pub fn estimate_message_tokens(message: &Message) -> usize {
    4 + estimate_tokens(&message.content)
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn hundred_chars() {
        assert_eq!(estimate_tokens(&"a".repeat(100)), 25);
    }

    #[test]
    fn messages_include_overhead() {
        let msgs = vec![Message::system("hello"), Message::user("world")];
        assert_eq!(estimate_message_tokens(&msgs[0]), 6);
        assert_eq!(estimate_messages_tokens(&msgs), 12);
    }
}
