//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Subject addressing and wildcard matching."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use crate::{Result, SdkError};

/// Token appended to a module subject for broadcast responses.
pub const RESPONSE_TOKEN: &str = "response";

/// Addresses owned by one initialized module: `<namespace>.<suffix>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subjects {
    base: String,
}

impl Subjects {
    pub fn new(namespace: &str, suffix: &str) -> Result<Self> {
        let base = format!("{}.{}", namespace, suffix);
        validate_subject(&base)?;
        if suffix.is_empty() {
            return Err(invalid(&base, "module suffix must not be empty"));
        }
        Ok(Self { base })
    }

    /// The module's own subject, e.g. `onql.billing`.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Broadcast subject used by `Sdk::respond`, e.g. `onql.billing.response`.
    pub fn response(&self) -> String {
        format!("{}.{}", self.base, RESPONSE_TOKEN)
    }
}

fn invalid(subject: &str, reason: &'static str) -> SdkError {
    SdkError::InvalidSubject {
        subject: subject.to_owned(),
        reason,
    }
}

fn validate_tokens(subject: &str) -> Result<()> {
    if subject.is_empty() {
        return Err(invalid(subject, "subject must not be empty"));
    }
    if subject.chars().any(char::is_whitespace) {
        return Err(invalid(subject, "subject must not contain whitespace"));
    }
    if subject.split('.').any(str::is_empty) {
        return Err(invalid(subject, "subject must not contain empty tokens"));
    }
    Ok(())
}

/// Validate a concrete subject that messages can be published to.
pub fn validate_subject(subject: &str) -> Result<()> {
    validate_tokens(subject)?;
    if subject.split('.').any(|token| token == "*" || token == ">") {
        return Err(invalid(subject, "wildcards are only valid in subscriptions"));
    }
    Ok(())
}

/// Validate a subscription pattern. `*` matches one token, `>` matches the
/// remaining tokens and may only appear last.
pub fn validate_pattern(pattern: &str) -> Result<()> {
    validate_tokens(pattern)?;
    let tokens: Vec<&str> = pattern.split('.').collect();
    if tokens[..tokens.len() - 1].contains(&">") {
        return Err(invalid(pattern, "'>' must be the last token"));
    }
    Ok(())
}

/// Whether `subject` is matched by the subscription `pattern`.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern_tokens = pattern.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (pattern_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
