// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Credential redaction for anything that leaves the process (records, logs,
//! HTTP error bodies).

use regex::Regex;
use std::sync::LazyLock;

static URL_USERINFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<scheme>[A-Za-z][A-Za-z0-9+.\-]*://)[^@/\s]+@").expect("userinfo pattern is valid")
});

static SECRET_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?P<key>password|passwd|pwd|secret|token|api_key)\s*=\s*[^\s&;,]+")
        .expect("secret pair pattern is valid")
});

const MAX_MESSAGE_LEN: usize = 1024;

/// Replace the userinfo part of a single URL.
pub fn redact_url(url: &str) -> String {
    URL_USERINFO.replace_all(url, "${scheme}***@").into_owned()
}

/// Redact connection credentials and `key=value` secrets from free text and
/// bound its length.
pub fn sanitize_message(message: &str) -> String {
    let redacted = URL_USERINFO.replace_all(message, "${scheme}***@");
    let redacted = SECRET_PAIR.replace_all(&redacted, "${key}=***");
    if redacted.len() <= MAX_MESSAGE_LEN {
        return redacted.into_owned();
    }
    let mut end = MAX_MESSAGE_LEN;
    while !redacted.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &redacted[..end])
}
