//! Query normalization.
//!
//! Trims and validates the raw query, resolves the requested time window to
//! `[since, until]`, and decides between substring and full-text search
//! strategies. The FTS query text this module produces is always a plain,
//! operator-free token join — user input never reaches the storage layer as
//! raw FTS5 syntax.

use chrono::{DateTime, Duration, Utc};

use crate::domain::models::{NormalizedQuery, QueryMode, SearchWindow};
use crate::error::{CoreError, Result};

/// Below this length, substring (`LIKE`) search is used instead of FTS —
/// FTS5 tokenizers generally can't usefully rank 1-2 character queries.
const SUBSTRING_MAX_LEN: usize = 2;

pub fn normalize(raw_query: &str, window: &SearchWindow) -> Result<NormalizedQuery> {
    let trimmed = raw_query.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidQuery("query must not be empty".into()));
    }

    let (since, until) = resolve_window(window)?;

    let mode = if trimmed.chars().count() <= SUBSTRING_MAX_LEN {
        QueryMode::Substring
    } else {
        QueryMode::Fts
    };

    let q = match mode {
        QueryMode::Substring => trimmed.to_string(),
        QueryMode::Fts => to_plain_fts_query(trimmed),
    };

    Ok(NormalizedQuery {
        q,
        since,
        until,
        mode,
    })
}

fn resolve_window(window: &SearchWindow) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
    match window {
        SearchWindow::Unbounded => Ok((None, None)),
        SearchWindow::Range { since, until } => {
            if since > until {
                return Err(CoreError::InvalidQuery(
                    "window start date must not be after end date".into(),
                ));
            }
            Ok((Some(*since), Some(*until)))
        }
        SearchWindow::Preset(token) => {
            let days = parse_preset_days(token).ok_or_else(|| {
                CoreError::InvalidQuery(format!("unrecognized window preset: {token}"))
            })?;
            Ok((Some(Utc::now() - Duration::days(days)), None))
        }
    }
}

fn parse_preset_days(token: &str) -> Option<i64> {
    let token = token.trim();
    let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let n: i64 = digits.parse().ok()?;
    let unit = &token[digits.len()..];
    match unit {
        "d" => Some(n),
        "w" => Some(n * 7),
        "m" => Some(n * 30),
        _ => None,
    }
}

/// Tokenizes on whitespace/punctuation, strips every FTS5-significant
/// character from each token, and rejoins with implicit AND (plain
/// whitespace-separated terms). This guarantees the emitted string can never
/// be interpreted as an FTS5 operator expression.
fn to_plain_fts_query(input: &str) -> String {
    input
        .split(|c: char| c.is_whitespace())
        .map(strip_fts_operators)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_fts_operators(token: &str) -> String {
    token
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | '&' | '|' | '!' | '(' | ')' | '*' | ':' | '^'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_is_rejected() {
        let err = normalize("   ", &SearchWindow::Unbounded).unwrap_err();
        assert!(matches!(err, CoreError::InvalidQuery(_)));
    }

    #[test]
    fn short_query_uses_substring_mode() {
        let nq = normalize("ai", &SearchWindow::Unbounded).unwrap();
        assert_eq!(nq.mode, QueryMode::Substring);
        assert_eq!(nq.q, "ai");
    }

    #[test]
    fn longer_query_uses_fts_mode() {
        let nq = normalize("bitcoin", &SearchWindow::Unbounded).unwrap();
        assert_eq!(nq.mode, QueryMode::Fts);
        assert_eq!(nq.q, "bitcoin");
    }

    #[test]
    fn fts_query_strips_operator_characters() {
        let nq = normalize("\"bitcoin\" OR (evil)", &SearchWindow::Unbounded).unwrap();
        assert_eq!(nq.mode, QueryMode::Fts);
        assert!(!nq.q.contains('"'));
        assert!(!nq.q.contains('('));
        assert!(!nq.q.contains(')'));
    }

    #[test]
    fn preset_window_resolves_to_n_days_ago() {
        let nq = normalize("bitcoin", &SearchWindow::Preset("7d".into())).unwrap();
        assert!(nq.since.is_some());
        assert!(nq.until.is_none());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let now = Utc::now();
        let window = SearchWindow::Range {
            since: now,
            until: now - Duration::days(1),
        };
        let err = normalize("bitcoin", &window).unwrap_err();
        assert!(matches!(err, CoreError::InvalidQuery(_)));
    }
}
