use crate::llm::types::ChatMessage;

pub const SYSTEM_PROMPT: &str = "You are the company's technical support chat bot.\n\
Answer ONLY from the knowledge base (FAQ) context you are given.\n\
If the context does not contain the answer, say so honestly and offer to open a support ticket.\n\
Never invent facts.\n\
Answer briefly, step by step where it helps.\n\
Output format: JSON.";

/// Assembles the chat transcript: system instructions, the session's prior
/// turns in original order (unbounded), then the context + question turn.
pub fn build_messages(history: &[ChatMessage], context: &str, question: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(SYSTEM_PROMPT));
    messages.extend(history.iter().cloned());

    let context = if context.is_empty() { "(empty)" } else { context };
    messages.push(ChatMessage::user(format!(
        "Knowledge base context (FAQ):\n{context}\n\n\
         User question: {question}\n\n\
         Return strictly a JSON object with keys: \
         answer (string), action (\"OK\"|\"TICKET\"), confidence (0..1), sources (array of strings)."
    )));

    messages
}
