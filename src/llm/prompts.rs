//! Prompt templates for the answer path. Both carry an explicit length cap
//! so the generated reply fits the platform's message limit.

/// Maximum reply length in characters. The platform caps messages at 4096;
/// headroom is left for the footer (model name, timing, emoji).
pub const MAX_RESPONSE_CHARS: usize = 3500;

/// Answer prompt without retrieved context.
pub fn answer_prompt(question: &str) -> String {
    format!(
        "Answer the following question. IMPORTANT: your answer must be at most \
         {MAX_RESPONSE_CHARS} characters. This is a hard limit for messenger compatibility.\n\n\
         Question: {question}"
    )
}

/// Answer prompt with the rendered chat-history context as a prefix.
pub fn answer_prompt_with_context(context: &str, question: &str) -> String {
    format!(
        "You are a helpful assistant with access to the chat history.\n\n\
         {context}\n\
         USER QUESTION:\n{question}\n\n\
         Answer the question using the chat history where it is relevant. If the history \
         is incomplete or outdated, supplement it with your own knowledge.\n\n\
         IMPORTANT: your answer must be at most {MAX_RESPONSE_CHARS} characters. This is a \
         hard limit for messenger compatibility."
    )
}
