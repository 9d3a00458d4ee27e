//! Compiled form of a search query, evaluated against buffer snapshots.

use grep_matcher::Matcher;
use grep_regex::{RegexMatcher, RegexMatcherBuilder};
use thiserror::Error;

use crate::buffer::LogEntry;

use super::parse::{KeywordOp, SearchQuery};

#[derive(Debug, Error)]
pub enum PredicateError {
    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(String),
}

pub struct SearchPredicate {
    keywords: Vec<String>,
    operator: KeywordOp,
    matcher: Option<RegexMatcher>,
    time_from: Option<i64>,
    time_to: Option<i64>,
}

impl SearchPredicate {
    /// Compile the regex (if any) up front so a malformed pattern is
    /// reported before any scan starts.
    pub fn compile(query: &SearchQuery) -> Result<Self, PredicateError> {
        let matcher = match &query.regex {
            Some(pattern) => Some(
                RegexMatcherBuilder::new()
                    .multi_line(false)
                    .build(pattern)
                    .map_err(|e| PredicateError::InvalidRegex(e.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            keywords: query.keywords.clone(),
            operator: query.operator,
            matcher,
            time_from: query.time_from,
            time_to: query.time_to,
        })
    }

    /// True when no filter category is present. Such a predicate matches
    /// nothing.
    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
            && self.matcher.is_none()
            && self.time_from.is_none()
            && self.time_to.is_none()
    }

    /// All supplied categories must match; within the keyword category the
    /// configured operator applies. Regex matches anywhere in the text
    /// (unanchored search); time bounds are inclusive.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if let Some(from) = self.time_from {
            if entry.received_at < from {
                return false;
            }
        }
        if let Some(to) = self.time_to {
            if entry.received_at > to {
                return false;
            }
        }

        if let Some(matcher) = &self.matcher {
            if !matcher.is_match(entry.text.as_bytes()).unwrap_or(false) {
                return false;
            }
        }

        if !self.keywords.is_empty() {
            let hit = match self.operator {
                KeywordOp::And => self.keywords.iter().all(|k| entry.text.contains(k.as_str())),
                KeywordOp::Or => self.keywords.iter().any(|k| entry.text.contains(k.as_str())),
            };
            if !hit {
                return false;
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(text: &str, received_at: i64) -> LogEntry {
        LogEntry {
            seq: 0,
            received_at,
            text: text.to_string(),
        }
    }

    fn compile(query: SearchQuery) -> SearchPredicate {
        SearchPredicate::compile(&query).expect("predicate should compile")
    }

    #[test]
    fn test_single_keyword() {
        let predicate = compile(SearchQuery {
            keywords: vec!["timeout".to_string()],
            ..SearchQuery::default()
        });
        assert!(predicate.matches(&entry("request failed: timeout", 0)));
        assert!(!predicate.matches(&entry("request ok", 0)));
    }

    #[test]
    fn test_keywords_and_requires_all() {
        let predicate = compile(SearchQuery {
            keywords: vec!["Failed".to_string(), "timeout".to_string()],
            operator: KeywordOp::And,
            ..SearchQuery::default()
        });
        assert!(predicate.matches(&entry("Failed after timeout", 0)));
        assert!(!predicate.matches(&entry("Failed after retry", 0)));
        assert!(!predicate.matches(&entry("timeout reached", 0)));
    }

    #[test]
    fn test_keywords_or_requires_any() {
        let predicate = compile(SearchQuery {
            keywords: vec!["Failed".to_string(), "timeout".to_string()],
            operator: KeywordOp::Or,
            ..SearchQuery::default()
        });
        assert!(predicate.matches(&entry("Failed after retry", 0)));
        assert!(predicate.matches(&entry("timeout reached", 0)));
        assert!(!predicate.matches(&entry("all good", 0)));
    }

    #[test]
    fn test_keywords_are_case_sensitive_substrings() {
        let predicate = compile(SearchQuery {
            keywords: vec!["Error".to_string()],
            ..SearchQuery::default()
        });
        assert!(predicate.matches(&entry("Error: disk full", 0)));
        assert!(!predicate.matches(&entry("error: disk full", 0)));
    }

    #[test]
    fn test_regex_unanchored_search() {
        let predicate = compile(SearchQuery {
            regex: Some("user_id=[0-9]+".to_string()),
            ..SearchQuery::default()
        });
        assert!(predicate.matches(&entry("rejected request for user_id=123, reason: quota", 0)));
        assert!(!predicate.matches(&entry("rejected request for user_id=abc", 0)));
    }

    #[test]
    fn test_invalid_regex_rejected_at_compile() {
        let result = SearchPredicate::compile(&SearchQuery {
            regex: Some("[invalid".to_string()),
            ..SearchQuery::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_time_range_inclusive() {
        let predicate = compile(SearchQuery {
            time_from: Some(100),
            time_to: Some(200),
            ..SearchQuery::default()
        });
        assert!(predicate.matches(&entry("x", 100)));
        assert!(predicate.matches(&entry("x", 150)));
        assert!(predicate.matches(&entry("x", 200)));
        assert!(!predicate.matches(&entry("x", 99)));
        assert!(!predicate.matches(&entry("x", 201)));
    }

    #[test]
    fn test_absent_bound_unconstrained() {
        let predicate = compile(SearchQuery {
            time_to: Some(200),
            ..SearchQuery::default()
        });
        assert!(predicate.matches(&entry("x", i64::MIN)));
        assert!(!predicate.matches(&entry("x", 201)));
    }

    #[test]
    fn test_categories_combine_with_and() {
        let predicate = compile(SearchQuery {
            keywords: vec!["timeout".to_string()],
            regex: Some("ERROR".to_string()),
            time_from: Some(100),
            ..SearchQuery::default()
        });
        assert!(predicate.matches(&entry("ERROR: timeout", 150)));
        assert!(!predicate.matches(&entry("WARN: timeout", 150))); // regex misses
        assert!(!predicate.matches(&entry("ERROR: reset", 150))); // keyword misses
        assert!(!predicate.matches(&entry("ERROR: timeout", 50))); // time misses
    }

    #[test]
    fn test_empty_predicate_detected() {
        let predicate = compile(SearchQuery::default());
        assert!(predicate.is_empty());
        let with_filter = compile(SearchQuery {
            time_from: Some(0),
            ..SearchQuery::default()
        });
        assert!(!with_filter.is_empty());
    }
}
