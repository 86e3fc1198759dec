//! Literal token substitution
//!
//! Tokens such as `__VERSION__` are replaced verbatim with configured values.
//! All tokens are replaced in one pass, so a substituted value is never
//! scanned again. Tokens that have no entry are left in the text.

use regex::Regex;

use crate::error::{DistError, Result};

/// Ordered token -> value mapping
#[derive(Debug, Clone, Default)]
pub struct VariableSet {
    prefix: String,
    entries: Vec<(String, String)>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend `prefix` to every token when matching (e.g. `@@`)
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            entries: Vec::new(),
        }
    }

    /// Insert or replace a token
    pub fn insert(&mut self, token: impl Into<String>, value: impl Into<String>) {
        let token = token.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(t, _)| *t == token) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((token, value)),
        }
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn matcher(&self) -> Result<Option<Regex>> {
        let mut tokens: Vec<&str> = self
            .entries
            .iter()
            .map(|(t, _)| t.as_str())
            .filter(|t| !t.is_empty())
            .collect();
        if tokens.is_empty() {
            return Ok(None);
        }

        // Longest first so that a token never shadows a longer one it prefixes
        tokens.sort_by_key(|t| std::cmp::Reverse(t.len()));
        let alternation = tokens
            .iter()
            .map(|t| regex::escape(&format!("{}{}", self.prefix, t)))
            .collect::<Vec<_>>()
            .join("|");

        Regex::new(&alternation)
            .map(Some)
            .map_err(|source| DistError::InvalidPattern {
                pattern: format!("{} variable tokens", tokens.len()),
                source,
            })
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VariableSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = VariableSet::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

/// Replace every configured token in `text`
///
/// Fails only when the token matcher cannot be built, e.g. when the token
/// set exceeds the regex size limit.
pub fn substitute(text: &str, variables: &VariableSet) -> Result<String> {
    let Some(matcher) = variables.matcher()? else {
        return Ok(text.to_string());
    };

    let prefix_len = variables.prefix.len();
    Ok(matcher
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let token = &caps[0][prefix_len..];
            variables.get(token).unwrap_or(&caps[0]).to_string()
        })
        .into_owned())
}
