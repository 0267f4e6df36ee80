//! Message-history compression: once the estimated token count of a turn's
//! accumulated messages crosses a threshold, the middle is collapsed into a
//! single summary message so the context window doesn't fill up on a long
//! tool-use loop.

use crate::llm::ChatMessage;

const CHARS_PER_TOKEN: usize = 4;
const KEEP_HEAD: usize = 4;
const KEEP_TAIL: usize = 4;

/// 1 token ≈ 4 characters.
pub fn estimate_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(|m| m.content.len() / CHARS_PER_TOKEN).sum()
}

/// Compresses `messages` if their estimated token count is at or above
/// `threshold` and there's a middle section worth collapsing. The first and
/// last four messages are kept verbatim; everything between them becomes one
/// summary-style user message.
pub fn compress_if_needed(messages: Vec<ChatMessage>, threshold: usize) -> Vec<ChatMessage> {
    if estimate_tokens(&messages) < threshold {
        return messages;
    }
    if messages.len() <= KEEP_HEAD + KEEP_TAIL {
        return messages;
    }

    let head = &messages[..KEEP_HEAD];
    let tail = &messages[messages.len() - KEEP_TAIL..];
    let middle = &messages[KEEP_HEAD..messages.len() - KEEP_TAIL];

    let mut out = Vec::with_capacity(KEEP_HEAD + 1 + KEEP_TAIL);
    out.extend_from_slice(head);
    out.push(ChatMessage::user(summarize(middle)));
    out.extend_from_slice(tail);
    out
}

fn summarize(middle: &[ChatMessage]) -> String {
    format!(
        "[{} earlier messages omitted to stay within the context window]",
        middle.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_message() -> ChatMessage {
        ChatMessage::user("x".repeat(4000))
    }

    #[test]
    fn short_history_is_untouched() {
        let messages = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let compressed = compress_if_needed(messages.clone(), 5500);
        assert_eq!(compressed.len(), messages.len());
    }

    #[test]
    fn long_history_is_compressed_to_head_plus_summary_plus_tail() {
        let mut messages = Vec::new();
        for _ in 0..20 {
            messages.push(long_message());
        }
        let compressed = compress_if_needed(messages, 5500);
        assert_eq!(compressed.len(), KEEP_HEAD + 1 + KEEP_TAIL);
        assert!(compressed[KEEP_HEAD].content.contains("earlier messages omitted"));
    }

    #[test]
    fn history_below_threshold_is_not_compressed_even_if_long() {
        let messages: Vec<ChatMessage> = (0..20).map(|_| ChatMessage::user("short")).collect();
        let compressed = compress_if_needed(messages.clone(), 5500);
        assert_eq!(compressed.len(), messages.len());
    }
}
