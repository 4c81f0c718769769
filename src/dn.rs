//! Distinguished names.
//!
//! A [`Dn`] is kept as a list of parsed RDNs holding unescaped values, so code
//! never builds paths by string concatenation. Rendering applies the RFC 4514
//! escaping rules to every value.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::error::{AppError, AppResult};

/// One `attr=value` component of a DN.
#[derive(Debug, Clone)]
pub struct Rdn {
    pub attr: String,
    pub value: String,
}

impl Rdn {
    pub fn new(attr: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attr: attr.into(),
            value: value.into(),
        }
    }

    fn normalized(&self) -> (String, String) {
        (self.attr.to_lowercase(), self.value.to_lowercase())
    }
}

impl PartialEq for Rdn {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for Rdn {}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.attr, escape_dn_value(&self.value))
    }
}

/// Escape an attribute value for use inside a DN (RFC 4514 section 2.4).
pub fn escape_dn_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len() * 2);
    let last = value.chars().count().saturating_sub(1);

    for (i, ch) in value.chars().enumerate() {
        match ch {
            '"' | '+' | ',' | ';' | '<' | '>' | '\\' | '=' => {
                result.push('\\');
                result.push(ch);
            }
            '\0' => result.push_str("\\00"),
            '#' if i == 0 => result.push_str("\\#"),
            ' ' if i == 0 || i == last => result.push_str("\\ "),
            _ => result.push(ch),
        }
    }

    result
}

/// Position of an entry in the directory tree, leaf RDN first.
#[derive(Debug, Clone, Default)]
pub struct Dn {
    rdns: Vec<Rdn>,
}

impl Dn {
    /// The empty DN (root DSE).
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_rdns(rdns: Vec<Rdn>) -> Self {
        Self { rdns }
    }

    /// Parse a string DN, undoing RFC 4514 escapes.
    pub fn parse(input: &str) -> AppResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(Self::root());
        }

        let mut rdns = Vec::new();
        for component in split_unescaped(input, ',')? {
            rdns.push(parse_rdn(&component, input)?);
        }
        Ok(Self { rdns })
    }

    pub fn rdns(&self) -> &[Rdn] {
        &self.rdns
    }

    pub fn is_root(&self) -> bool {
        self.rdns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rdns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rdns.is_empty()
    }

    /// The leaf RDN.
    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdns.first()
    }

    /// Value of the leaf RDN.
    pub fn rdn_value(&self) -> Option<&str> {
        self.rdn().map(|r| r.value.as_str())
    }

    pub fn parent(&self) -> Option<Dn> {
        if self.rdns.is_empty() {
            return None;
        }
        Some(Self {
            rdns: self.rdns[1..].to_vec(),
        })
    }

    /// A new DN one level below this one.
    pub fn child(&self, attr: impl Into<String>, value: impl Into<String>) -> Dn {
        let mut rdns = Vec::with_capacity(self.rdns.len() + 1);
        rdns.push(Rdn::new(attr, value));
        rdns.extend(self.rdns.iter().cloned());
        Self { rdns }
    }

    /// Same parent, different leaf value.
    pub fn with_rdn_value(&self, value: impl Into<String>) -> Dn {
        let mut dn = self.clone();
        if let Some(first) = dn.rdns.first_mut() {
            first.value = value.into();
        }
        dn
    }

    /// Same leaf RDN, different parent.
    pub fn with_parent(&self, parent: &Dn) -> Dn {
        match self.rdn() {
            Some(rdn) => parent.child(rdn.attr.clone(), rdn.value.clone()),
            None => parent.clone(),
        }
    }

    /// True when `self` is `base` or sits anywhere below it.
    pub fn is_within(&self, base: &Dn) -> bool {
        if base.rdns.len() > self.rdns.len() {
            return false;
        }
        let offset = self.rdns.len() - base.rdns.len();
        self.rdns[offset..] == base.rdns[..]
    }

    /// True when `self` sits strictly below `base`.
    pub fn is_descendant_of(&self, base: &Dn) -> bool {
        self.rdns.len() > base.rdns.len() && self.is_within(base)
    }

    /// Number of levels between `base` and `self`, if `self` is within `base`.
    pub fn depth_below(&self, base: &Dn) -> Option<usize> {
        if self.is_within(base) {
            Some(self.rdns.len() - base.rdns.len())
        } else {
            None
        }
    }

    /// Re-root `self` from `old_base` onto `new_base`.
    pub fn rebase(&self, old_base: &Dn, new_base: &Dn) -> Option<Dn> {
        let depth = self.depth_below(old_base)?;
        let mut rdns = self.rdns[..depth].to_vec();
        rdns.extend(new_base.rdns.iter().cloned());
        Some(Self { rdns })
    }

    fn normalized(&self) -> Vec<(String, String)> {
        self.rdns.iter().map(Rdn::normalized).collect()
    }
}

fn split_unescaped(input: &str, separator: char) -> AppResult<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            current.push(ch);
            match chars.next() {
                Some(next) => current.push(next),
                None => {
                    return Err(AppError::Validation(format!(
                        "Invalid DN '{}': dangling escape",
                        input
                    )))
                }
            }
        } else if ch == separator {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(ch);
        }
    }
    parts.push(current);
    Ok(parts)
}

fn parse_rdn(component: &str, full: &str) -> AppResult<Rdn> {
    let invalid = |why: &str| AppError::Validation(format!("Invalid DN '{}': {}", full, why));

    let component = component.trim_start();
    let eq = component.find('=').ok_or_else(|| invalid("missing '='"))?;
    let attr = component[..eq].trim();
    if attr.is_empty() {
        return Err(invalid("empty attribute type"));
    }

    let raw = component[eq + 1..].trim_start();
    let mut bytes: Vec<u8> = Vec::with_capacity(raw.len());
    // Unescaped trailing spaces are not part of the value.
    let mut significant = 0;
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                let first = chars.next().ok_or_else(|| invalid("dangling escape"))?;
                if first.is_ascii_hexdigit() && chars.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                    let second = chars.next().unwrap_or('0');
                    let hex = format!("{}{}", first, second);
                    let byte = u8::from_str_radix(&hex, 16).map_err(|_| invalid("bad hex escape"))?;
                    bytes.push(byte);
                } else {
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(first.encode_utf8(&mut buf).as_bytes());
                }
                significant = bytes.len();
            }
            '+' => return Err(invalid("multi-valued RDNs are not supported")),
            _ => {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                if ch != ' ' {
                    significant = bytes.len();
                }
            }
        }
    }

    bytes.truncate(significant);
    let value = String::from_utf8(bytes).map_err(|_| invalid("value is not UTF-8"))?;
    Ok(Rdn::new(attr, value))
}

impl PartialEq for Dn {
    fn eq(&self, other: &Self) -> bool {
        self.rdns == other.rdns
    }
}

impl Eq for Dn {}

impl Hash for Dn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, rdn) in self.rdns.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", rdn)?;
        }
        Ok(())
    }
}

impl FromStr for Dn {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Dn::parse(s)
    }
}

impl Serialize for Dn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_dn_value_special_chars() {
        assert_eq!(escape_dn_value("John Doe"), "John Doe");
        assert_eq!(escape_dn_value("Doe, John"), "Doe\\, John");
        assert_eq!(escape_dn_value("a+b"), "a\\+b");
        assert_eq!(escape_dn_value("a\"b"), "a\\\"b");
        assert_eq!(escape_dn_value("a\\b"), "a\\\\b");
        assert_eq!(escape_dn_value("<a>"), "\\<a\\>");
        assert_eq!(escape_dn_value("a;b=c"), "a\\;b\\=c");
        assert_eq!(escape_dn_value("a\0b"), "a\\00b");
    }

    #[test]
    fn test_escape_dn_value_positional_chars() {
        assert_eq!(escape_dn_value("#admin"), "\\#admin");
        assert_eq!(escape_dn_value("ad#min"), "ad#min");
        assert_eq!(escape_dn_value(" admin "), "\\ admin\\ ");
        assert_eq!(escape_dn_value("émile "), "émile\\ ");
    }

    #[test]
    fn test_parse_and_render() {
        let dn = Dn::parse("uid=alice, ou=eng,ou=People,dc=example,dc=com").unwrap();
        assert_eq!(dn.len(), 5);
        assert_eq!(dn.rdn_value(), Some("alice"));
        assert_eq!(dn.to_string(), "uid=alice,ou=eng,ou=People,dc=example,dc=com");
    }

    #[test]
    fn test_parse_escaped_values() {
        let dn = Dn::parse("cn=Doe\\, John,ou=Users,dc=corp").unwrap();
        assert_eq!(dn.rdn_value(), Some("Doe, John"));

        let dn = Dn::parse("cn=\\23hash\\20,dc=corp").unwrap();
        assert_eq!(dn.rdn_value(), Some("#hash "));

        let dn = Dn::parse("cn=caf\\C3\\A9,dc=corp").unwrap();
        assert_eq!(dn.rdn_value(), Some("café"));
    }

    #[test]
    fn test_round_trip_through_escaping() {
        let base = Dn::parse("ou=Group,dc=example,dc=com").unwrap();
        let dn = base.child("cn", " odd, name=\"x\" ");
        let reparsed = Dn::parse(&dn.to_string()).unwrap();
        assert_eq!(reparsed.rdn_value(), Some(" odd, name=\"x\" "));
        assert_eq!(reparsed, dn);
    }

    #[test]
    fn test_invalid_dns() {
        assert!(Dn::parse("novalue").is_err());
        assert!(Dn::parse("cn=a\\").is_err());
        assert!(Dn::parse("cn=a+sn=b,dc=x").is_err());
        assert!(Dn::parse("=a,dc=x").is_err());
    }

    #[test]
    fn test_case_insensitive_equality() {
        let a = Dn::parse("CN=Eng,OU=Group,DC=Example").unwrap();
        let b = Dn::parse("cn=eng,ou=group,dc=example").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hierarchy_helpers() {
        let base = Dn::parse("ou=People,dc=example").unwrap();
        let container = base.child("ou", "eng");
        let user = container.child("uid", "alice");

        assert!(user.is_descendant_of(&base));
        assert!(!base.is_descendant_of(&base));
        assert!(base.is_within(&base));
        assert_eq!(user.depth_below(&base), Some(2));
        assert_eq!(user.parent().unwrap(), container);

        let moved = user.with_parent(&base.child("ou", "engineering"));
        assert_eq!(moved.to_string(), "uid=alice,ou=engineering,ou=People,dc=example");

        let rebased = user.rebase(&container, &base.child("ou", "ops")).unwrap();
        assert_eq!(rebased.to_string(), "uid=alice,ou=ops,ou=People,dc=example");
    }
}
