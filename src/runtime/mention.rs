//! Mention detection for group messages.
//!
//! Pure predicate over message content + the bot's identities; never I/Os.
//! Accounts can surface in mention lists under their primary JID or its
//! hidden-user (LID server) alias, so both forms join the token set.

use crate::types::{Jid, DEFAULT_USER_SERVER};
use crate::wa::MessageContent;

/// Search tokens for a set of target JIDs: bare user, full string, non-AD
/// form, and the LID-server user/full forms for targets on the default user
/// server.
pub fn mention_tokens(targets: &[Jid]) -> Vec<String> {
    fn push(tokens: &mut Vec<String>, token: String) {
        if !token.is_empty() && !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    let mut tokens: Vec<String> = Vec::new();
    for jid in targets.iter().filter(|j| !j.user.is_empty()) {
        push(&mut tokens, jid.user.clone());
        push(&mut tokens, jid.to_string());
        push(&mut tokens, jid.to_non_ad().to_string());
        if jid.server == DEFAULT_USER_SERVER {
            if let Some(lid) = jid.lid_alias() {
                push(&mut tokens, lid.user.clone());
                push(&mut tokens, lid.to_string());
            }
        }
    }
    tokens
}

/// Whether the message addresses any of the target JIDs, either through an
/// explicit mention list on one of its parts or as an `@token` in the text.
pub fn is_mentioned(content: &MessageContent, text: &str, targets: &[Jid]) -> bool {
    let tokens = mention_tokens(targets);
    if tokens.is_empty() {
        return false;
    }
    for context in content.context_infos() {
        for mentioned in &context.mentioned_jids {
            if tokens.iter().any(|token| token == mentioned) {
                return true;
            }
        }
    }
    let lowered = text.to_lowercase();
    tokens
        .iter()
        .any(|token| lowered.contains(&format!("@{}", token.to_lowercase())))
}
