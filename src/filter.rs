//! Structured search filters.
//!
//! Filters are composed from typed nodes and rendered to the RFC 4515 string
//! form only at the transport boundary, escaping every assertion value.

use std::fmt;

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Equal { attr: String, value: String },
    Present { attr: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equal {
            attr: attr.into(),
            value: value.into(),
        }
    }

    pub fn present(attr: impl Into<String>) -> Self {
        Filter::Present { attr: attr.into() }
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Match any entry: `(objectClass=*)`.
    pub fn any() -> Self {
        Filter::present("objectClass")
    }

    /// `(|(attr=v1)(attr=v2)...)` over the given values.
    pub fn any_of<I, S>(attr: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::Or(values.into_iter().map(|v| Filter::eq(attr, v)).collect())
    }

    /// Evaluate the filter against an entry.
    ///
    /// `lookup` returns the raw values held for an attribute name (the caller
    /// is responsible for case-insensitive attribute name resolution).
    /// Assertion values compare ASCII case-insensitively, as the string
    /// matching rules used by POSIX and AD schemas do.
    pub fn matches<F>(&self, lookup: &F) -> bool
    where
        F: Fn(&str) -> Vec<Vec<u8>>,
    {
        match self {
            Filter::Equal { attr, value } => lookup(attr)
                .iter()
                .any(|v| v.eq_ignore_ascii_case(value.as_bytes())),
            Filter::Present { attr } => !lookup(attr).is_empty(),
            Filter::And(filters) => filters.iter().all(|f| f.matches(lookup)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(lookup)),
            Filter::Not(filter) => !filter.matches(lookup),
        }
    }
}

/// Escape an assertion value (RFC 4515 section 3).
pub fn escape_filter_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => result.push_str("\\5c"),
            '*' => result.push_str("\\2a"),
            '(' => result.push_str("\\28"),
            ')' => result.push_str("\\29"),
            '\0' => result.push_str("\\00"),
            _ => result.push(ch),
        }
    }
    result
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Equal { attr, value } => write!(f, "({}={})", attr, escape_filter_value(value)),
            Filter::Present { attr } => write!(f, "({}=*)", attr),
            Filter::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                f.write_str(")")
            }
            Filter::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{}", filter)?;
                }
                f.write_str(")")
            }
            Filter::Not(filter) => write!(f, "(!{})", filter),
        }
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(pairs: Vec<(&str, Vec<&str>)>) -> HashMap<String, Vec<Vec<u8>>> {
        pairs
            .into_iter()
            .map(|(k, vs)| {
                (
                    k.to_lowercase(),
                    vs.iter().map(|v| v.as_bytes().to_vec()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_escape_filter_value() {
        assert_eq!(escape_filter_value("John Doe"), "John Doe");
        assert_eq!(escape_filter_value("John*"), "John\\2a");
        assert_eq!(escape_filter_value("(admin)"), "\\28admin\\29");
        assert_eq!(escape_filter_value("a\\b"), "a\\5cb");
        assert_eq!(escape_filter_value("a\0b"), "a\\00b");
    }

    #[test]
    fn test_render() {
        let filter = Filter::and(vec![
            Filter::eq("objectClass", "posixGroup"),
            Filter::not(Filter::eq("cn", "eng (old)")),
            Filter::any_of("memberUid", ["alice", "bob"]),
            Filter::present("gidNumber"),
        ]);
        assert_eq!(
            filter.to_string(),
            "(&(objectClass=posixGroup)(!(cn=eng \\28old\\29))(|(memberUid=alice)(memberUid=bob))(gidNumber=*))"
        );
    }

    #[test]
    fn test_matches() {
        let e = entry(vec![
            ("objectclass", vec!["top", "posixGroup"]),
            ("cn", vec!["Eng"]),
            ("memberuid", vec!["alice", "bob"]),
        ]);
        let lookup = |attr: &str| e.get(&attr.to_lowercase()).cloned().unwrap_or_default();

        assert!(Filter::eq("cn", "eng").matches(&lookup));
        assert!(Filter::eq("memberUid", "bob").matches(&lookup));
        assert!(!Filter::eq("memberUid", "carol").matches(&lookup));
        assert!(Filter::present("memberUid").matches(&lookup));
        assert!(!Filter::present("gidNumber").matches(&lookup));
        assert!(Filter::and(vec![]).matches(&lookup));
        assert!(!Filter::or(vec![]).matches(&lookup));
        assert!(Filter::not(Filter::eq("cn", "ops")).matches(&lookup));
        // Wildcards are values, never patterns.
        assert!(!Filter::eq("cn", "*").matches(&lookup));
    }
}
