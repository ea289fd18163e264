// src/rewrite/prompt.rs
use crate::ingest::types::SourceItem;

pub const MAX_OUTPUT_TOKENS: u32 = 800;
pub const TEMPERATURE: f32 = 0.7;

/// Instructions sent with every network rewrite. Trailers (signature, source
/// line, hashtags) are appended by the sanitizer, so the model is told not to add any.
const SYSTEM_PROMPT: &str = "\
You rewrite crypto and Web3 news posts for a Telegram channel about the TON ecosystem.

Voice: strict, professional, analytical. Occasional conversational phrasing is fine; slang is not.

Structure:
- Start with a short bold heading wrapped in **double asterisks**.
- At most 3 paragraphs of at most 3 sentences each; 1-2 paragraphs when the source is short.
- Keep only the key facts and preserve the meaning of the source.
- Write in the same language as the source post.

Never:
- add a signature, channel handle, source line, links or hashtags;
- end with a question to the audience;
- add a P.S. or any postscript;
- use emoji.

Output only the rewritten post.";

/// One request to a chat-style backend.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn for_item(item: &SourceItem) -> Self {
        let mut user = String::with_capacity(item.text.len() + 64);
        if !item.origin.title.is_empty() {
            user.push_str("Source: ");
            user.push_str(&item.origin.title);
            user.push_str("\n\n");
        }
        user.push_str("Rewrite this post:\n\n");
        user.push_str(&item.text);

        Self {
            system: SYSTEM_PROMPT.to_string(),
            user,
            max_tokens: MAX_OUTPUT_TOKENS,
            temperature: TEMPERATURE,
        }
    }
}
