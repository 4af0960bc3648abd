//! Wildcard patterns for index queries
//!
//! `?` matches exactly one character and `*` any run of characters
//! (including none). A backslash makes the next character literal.

use crate::error::{GraphError, GraphResult};
use regex::Regex;

#[derive(Debug, Clone)]
pub struct WildcardPattern {
    source: String,
    /// Literal text before the first wildcard, used to narrow term scans
    prefix: String,
    /// `None` when the pattern has no wildcard at all
    matcher: Option<Regex>,
}

impl WildcardPattern {
    pub fn compile(pattern: &str) -> GraphResult<Self> {
        let mut prefix = String::new();
        let mut regex = String::from("(?s)^");
        let mut literal = String::new();
        let mut has_wildcard = false;
        let mut chars = pattern.chars();

        while let Some(c) = chars.next() {
            match c {
                '*' | '?' => {
                    regex.push_str(&regex::escape(&literal));
                    if !has_wildcard {
                        prefix.push_str(&literal);
                    }
                    literal.clear();
                    regex.push_str(if c == '*' { ".*" } else { "." });
                    has_wildcard = true;
                }
                '\\' => literal.push(chars.next().unwrap_or('\\')),
                other => literal.push(other),
            }
        }
        regex.push_str(&regex::escape(&literal));
        regex.push('$');

        if !has_wildcard {
            return Ok(WildcardPattern {
                source: pattern.to_string(),
                prefix: literal,
                matcher: None,
            });
        }

        let matcher = Regex::new(&regex)
            .map_err(|e| GraphError::QuerySyntax(format!("invalid index pattern '{}': {}", pattern, e)))?;
        Ok(WildcardPattern {
            source: pattern.to_string(),
            prefix,
            matcher: Some(matcher),
        })
    }

    pub fn matches(&self, term: &str) -> bool {
        match &self.matcher {
            Some(regex) => regex.is_match(term),
            None => term == self.prefix,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Split a `key:pattern` query string at its first unescaped colon
pub fn split_query(query: &str) -> GraphResult<(&str, &str)> {
    let mut escaped = false;
    for (idx, c) in query.char_indices() {
        match c {
            '\\' if !escaped => escaped = true,
            ':' if !escaped => {
                let key = query[..idx].trim();
                if key.is_empty() {
                    break;
                }
                return Ok((key, query[idx + 1..].trim()));
            }
            _ => escaped = false,
        }
    }
    Err(GraphError::QuerySyntax(format!(
        "index query '{}' must have the form key:pattern",
        query
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_pattern() {
        let pattern = WildcardPattern::compile("S*n").unwrap();
        assert_eq!(pattern.prefix(), "S");
        for species in ["Silurian", "Slitheen", "Sontaran", "Skarasen"] {
            assert!(pattern.matches(species), "{} should match", species);
        }
        assert!(!pattern.matches("Dalek"));
        assert!(!pattern.matches("Sontarans"));
    }

    #[test]
    fn test_question_mark_pattern() {
        let pattern = WildcardPattern::compile("D?lek").unwrap();
        assert!(pattern.matches("Dalek"));
        assert!(!pattern.matches("Dlek"));
        assert!(!pattern.matches("Daalek"));
    }

    #[test]
    fn test_exact_and_escaped() {
        let exact = WildcardPattern::compile("Doctor").unwrap();
        assert_eq!(exact.prefix(), "Doctor");
        assert!(exact.matches("Doctor"));
        assert!(!exact.matches("Doctors"));

        let escaped = WildcardPattern::compile(r"Who\?*").unwrap();
        assert_eq!(escaped.prefix(), "Who?");
        assert!(escaped.matches("Who? Doctor Who"));
        assert!(!escaped.matches("Whom"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let pattern = WildcardPattern::compile("a.b*").unwrap();
        assert!(pattern.matches("a.bc"));
        assert!(!pattern.matches("axbc"));
    }

    #[test]
    fn test_match_all() {
        let pattern = WildcardPattern::compile("*").unwrap();
        assert_eq!(pattern.prefix(), "");
        assert!(pattern.matches("179"));
        assert!(pattern.matches(""));
    }

    #[test]
    fn test_split_query() {
        assert_eq!(split_query("episode:*").unwrap(), ("episode", "*"));
        assert_eq!(split_query("species: S*n").unwrap(), ("species", "S*n"));
        assert!(split_query("no-colon").is_err());
        assert!(split_query(":x").is_err());
    }
}
