//! Request-line grammar:
//!
//! ```text
//! QUERY [keywords=k1,k2,...] [operator=AND|OR] [regex=<pattern>]
//!       [time_from=<epoch>] [time_to=<epoch>]
//! STATS
//! COUNT
//! HELP
//! ```
//!
//! The verb is case-sensitive. `QUERY` parameters are `key=value` tokens;
//! keys are matched case-insensitively and unknown keys are ignored. The
//! `regex` value is split at the first `=` only, so the pattern itself may
//! contain `=`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryParseError {
    #[error("Unknown command. Use HELP for usage.")]
    UnknownCommand,

    #[error("Invalid operator: {0} (expected AND or OR)")]
    InvalidOperator(String),

    #[error("Invalid {key} value: {value} (expected Unix seconds)")]
    InvalidTimestamp { key: &'static str, value: String },

    #[error("Empty request")]
    Empty,
}

/// How multiple keywords combine. Categories (keywords, regex, time range)
/// always combine with AND; this operator applies within the keyword set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeywordOp {
    #[default]
    And,
    Or,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub keywords: Vec<String>,
    pub operator: KeywordOp,
    pub regex: Option<String>,
    pub time_from: Option<i64>,
    pub time_to: Option<i64>,
}

impl SearchQuery {
    /// A query with no filter category matches nothing; there is no
    /// "match everything" default.
    pub fn has_filters(&self) -> bool {
        !self.keywords.is_empty()
            || self.regex.is_some()
            || self.time_from.is_some()
            || self.time_to.is_some()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum QueryCommand {
    Search(SearchQuery),
    Stats,
    Count,
    Help,
}

pub fn parse_command(line: &str) -> Result<QueryCommand, QueryParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(QueryParseError::Empty);
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    match verb {
        "QUERY" => Ok(QueryCommand::Search(parse_search_params(rest)?)),
        // The operational verbs take no arguments.
        "STATS" if rest.is_empty() => Ok(QueryCommand::Stats),
        "COUNT" if rest.is_empty() => Ok(QueryCommand::Count),
        "HELP" if rest.is_empty() => Ok(QueryCommand::Help),
        _ => Err(QueryParseError::UnknownCommand),
    }
}

fn parse_search_params(params: &str) -> Result<SearchQuery, QueryParseError> {
    let mut query = SearchQuery::default();

    for token in params.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue; // bare token, not a parameter
        };

        if key.eq_ignore_ascii_case("keywords") || key.eq_ignore_ascii_case("keyword") {
            query.keywords = value
                .split(',')
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
        } else if key.eq_ignore_ascii_case("operator") {
            query.operator = if value.eq_ignore_ascii_case("AND") {
                KeywordOp::And
            } else if value.eq_ignore_ascii_case("OR") {
                KeywordOp::Or
            } else {
                return Err(QueryParseError::InvalidOperator(value.to_string()));
            };
        } else if key.eq_ignore_ascii_case("regex") {
            // split_once above already stopped at the first '=', so the
            // remainder of the token is the whole pattern.
            query.regex = Some(value.to_string());
        } else if key.eq_ignore_ascii_case("time_from") {
            query.time_from = Some(parse_timestamp("time_from", value)?);
        } else if key.eq_ignore_ascii_case("time_to") {
            query.time_to = Some(parse_timestamp("time_to", value)?);
        }
        // Unknown keys are ignored.
    }

    Ok(query)
}

fn parse_timestamp(key: &'static str, value: &str) -> Result<i64, QueryParseError> {
    value
        .parse()
        .map_err(|_| QueryParseError::InvalidTimestamp {
            key,
            value: value.to_string(),
        })
}
