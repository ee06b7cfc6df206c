//! Topic grammar
//!
//! Wire topics look like `channels/<channel_id>/messages[/<subtopic>][?query]`
//! for every protocol. `parse_topic` turns one into a channel ID and a
//! normalized, dot-separated subtopic. The bus addresses messages by subject
//! `<prefix>.<channel>[.<subtopic>]`, where subscriptions may use `*` (one
//! token) and `>` (the remaining tokens).
//!
//! A `Topic` holds the subscriber IDs registered for one subject pattern.
//! Callers must synchronize access (the broker keeps topics behind its lock).

use std::collections::HashSet;
use std::sync::LazyLock;

use percent_encoding::percent_decode_str;
use regex::Regex;

use crate::utils::{Error, Result};

pub type SubscriberId = String;

const SEPARATOR: char = '.';
const WILDCARD_ONE: &str = "*";
const WILDCARD_TAIL: &str = ">";

static CHANNEL_TOPIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/?channels/([A-Za-z0-9_-]+)/messages(/[^?]*)?(\?.*)?$")
        .expect("channel topic pattern compiles")
});

/// Extracts `(channel, subtopic)` from a wire topic.
pub fn parse_topic(topic: &str) -> Result<(String, String)> {
    let parts = CHANNEL_TOPIC
        .captures(topic)
        .ok_or(Error::MalformedTopic)?;
    let channel = parts
        .get(1)
        .map(|m| m.as_str().to_string())
        .ok_or(Error::MalformedTopic)?;
    let subtopic = parse_subtopic(parts.get(2).map_or("", |m| m.as_str()))?;
    Ok((channel, subtopic))
}

/// Normalizes the raw `/a/b%2Fc` suffix of a topic into `a.b.c`.
pub fn parse_subtopic(raw: &str) -> Result<String> {
    if raw.is_empty() {
        return Ok(String::new());
    }

    let unescaped = query_unescape(raw)?.replace('/', ".");
    let segments: Vec<&str> = unescaped
        .split(SEPARATOR)
        .filter(|s| !s.is_empty())
        .collect();

    for (i, segment) in segments.iter().enumerate() {
        let has_wildcard = segment.contains(WILDCARD_ONE) || segment.contains(WILDCARD_TAIL);
        if !has_wildcard {
            continue;
        }
        if segment.len() > 1 || i + 1 != segments.len() {
            return Err(Error::MalformedSubtopic);
        }
    }

    Ok(segments.join("."))
}

/// Composes the bus subject for a channel and optional subtopic.
pub fn subject(prefix: &str, channel: &str, subtopic: &str) -> String {
    let mut subject = if prefix.is_empty() {
        channel.to_string()
    } else {
        format!("{prefix}.{channel}")
    };
    if !subtopic.is_empty() {
        subject.push(SEPARATOR);
        subject.push_str(subtopic);
    }
    subject
}

/// Checks a concrete subject against a subscription pattern.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split(SEPARATOR);
    let mut subject_tokens = subject.split(SEPARATOR);

    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(WILDCARD_TAIL), Some(_)) => return pattern_tokens.next().is_none(),
            (Some(WILDCARD_ONE), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// `url.QueryUnescape` semantics: `+` is a space and every `%` must start a
/// two-digit hex escape.
fn query_unescape(raw: &str) -> Result<String> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let valid = i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !valid {
                return Err(Error::MalformedSubtopic);
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|_| Error::MalformedSubtopic)
}

#[derive(Debug, Default)]
pub struct Topic {
    pub pattern: String,
    pub subscribers: HashSet<SubscriberId>,
}

impl Topic {
    /// Create a new topic for the given subject pattern.
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            subscribers: HashSet::new(),
        }
    }

    /// Add a subscriber to the topic. Duplicate adds are ignored.
    pub fn subscribe(&mut self, id: SubscriberId) {
        self.subscribers.insert(id);
    }

    /// Remove a subscriber from the topic.
    pub fn unsubscribe(&mut self, id: &SubscriberId) {
        self.subscribers.remove(id);
    }

    pub fn matches(&self, subject: &str) -> bool {
        subject_matches(&self.pattern, subject)
    }
}
