//! Message validation, sanitization, and mention parsing.
//!
//! Mention grammar per GLOSSARY: `<@uuid>` and `<@!uuid>` (user), `<@&uuid>`
//! (role), and the bare literals `@everyone`/`@here`. A `<#id>` channel-mention
//! token is parsed too, as a supplementary convenience beyond the core grammar.

use uuid::Uuid;

use crate::error::{GatewayError, GatewayResult};
use crate::models::{MessageMentions, MAX_MESSAGE_LEN};

pub fn validate_message(content: &str) -> GatewayResult<()> {
    let len = content.chars().count();
    if len == 0 {
        return Err(GatewayError::Validation("message cannot be empty".into()));
    }
    if content.trim().is_empty() {
        return Err(GatewayError::Validation("message cannot be whitespace-only".into()));
    }
    if len > MAX_MESSAGE_LEN {
        return Err(GatewayError::Validation(format!(
            "message exceeds maximum length of {MAX_MESSAGE_LEN} characters"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MentionType {
    User(Uuid),
    Role(Uuid),
    Channel(Uuid),
    Everyone,
    Here,
}

/// Scan `content` for mention tokens and fold them into a deduplicated set.
pub fn parse_mentions(content: &str) -> MessageMentions {
    let mut users = Vec::new();
    let mut roles = Vec::new();
    let mut everyone = false;

    for token in scan_tokens(content) {
        match token {
            MentionType::User(id) => {
                if !users.contains(&id) {
                    users.push(id);
                }
            }
            MentionType::Role(id) => {
                if !roles.contains(&id) {
                    roles.push(id);
                }
            }
            MentionType::Everyone | MentionType::Here => everyone = true,
            MentionType::Channel(_) => {}
        }
    }

    MessageMentions { users, roles, everyone }
}

/// Lower-level scan exposing every token, including channel mentions, for
/// callers that need the raw sequence rather than the deduplicated summary.
pub fn scan_tokens(content: &str) -> Vec<MentionType> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = content.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '<' {
            if let Some(end) = chars[i..].iter().position(|c| *c == '>').map(|p| i + p) {
                let inner: String = chars[i + 1..end].iter().collect();
                if let Some(rest) = inner.strip_prefix("@&") {
                    if let Ok(id) = Uuid::parse_str(rest) {
                        tokens.push(MentionType::Role(id));
                        i = end + 1;
                        continue;
                    }
                } else if let Some(rest) = inner.strip_prefix("@!") {
                    if let Ok(id) = Uuid::parse_str(rest) {
                        tokens.push(MentionType::User(id));
                        i = end + 1;
                        continue;
                    }
                } else if let Some(rest) = inner.strip_prefix('@') {
                    if let Ok(id) = Uuid::parse_str(rest) {
                        tokens.push(MentionType::User(id));
                        i = end + 1;
                        continue;
                    }
                } else if let Some(rest) = inner.strip_prefix('#') {
                    if let Ok(id) = Uuid::parse_str(rest) {
                        tokens.push(MentionType::Channel(id));
                        i = end + 1;
                        continue;
                    }
                }
            }
        } else if chars[i] == '@' {
            if chars[i..].iter().collect::<String>().starts_with("@everyone") {
                tokens.push(MentionType::Everyone);
                i += "@everyone".len();
                continue;
            }
            if chars[i..].iter().collect::<String>().starts_with("@here") {
                tokens.push(MentionType::Here);
                i += "@here".len();
                continue;
            }
        }
        i += 1;
    }

    tokens
}

/// Strip control characters (preserving newline/tab) and trim surrounding whitespace.
pub fn sanitize_content(content: &str) -> String {
    content
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}
