//! Label and field selectors.
//!
//! Label syntax: `k=v`, `k==v`, `k!=v`, `k in (a,b)`, `k notin (a,b)`, `k`, `!k`,
//! joined by commas (conjunction). Field syntax: `k=v`, `k==v`, `k!=v`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::{Fields, StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelRequirement {
    Equals(String, String),
    NotEquals(String, String),
    In(String, BTreeSet<String>),
    NotIn(String, BTreeSet<String>),
    Exists(String),
    NotExists(String),
}

impl LabelRequirement {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::Equals(k, v) => labels.get(k) == Some(v),
            Self::NotEquals(k, v) => labels.get(k) != Some(v),
            Self::In(k, set) => labels.get(k).map(|v| set.contains(v)).unwrap_or(false),
            Self::NotIn(k, set) => labels.get(k).map(|v| !set.contains(v)).unwrap_or(true),
            Self::Exists(k) => labels.contains_key(k),
            Self::NotExists(k) => !labels.contains_key(k),
        }
    }
}

impl fmt::Display for LabelRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>().join(",");
        match self {
            Self::Equals(k, v) => write!(f, "{}={}", k, v),
            Self::NotEquals(k, v) => write!(f, "{}!={}", k, v),
            Self::In(k, set) => write!(f, "{} in ({})", k, join(set)),
            Self::NotIn(k, set) => write!(f, "{} notin ({})", k, join(set)),
            Self::Exists(k) => write!(f, "{}", k),
            Self::NotExists(k) => write!(f, "!{}", k),
        }
    }
}

/// Conjunction of label requirements. Empty selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<LabelRequirement>,
}

impl LabelSelector {
    pub fn everything() -> Self { Self::default() }

    pub fn is_empty(&self) -> bool { self.requirements.is_empty() }

    pub fn requirements(&self) -> &[LabelRequirement] { &self.requirements }

    pub fn with(mut self, req: LabelRequirement) -> Self {
        self.requirements.push(req);
        self
    }

    pub fn parse(input: &str) -> StoreResult<Self> {
        let mut requirements = Vec::new();
        for term in split_top_level(input)? {
            requirements.push(parse_label_term(term)?);
        }
        Ok(Self { requirements })
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRequirement {
    Equals(String, String),
    NotEquals(String, String),
}

impl FieldRequirement {
    /// Absent fields compare as the empty string.
    pub fn matches(&self, fields: &Fields) -> bool {
        match self {
            Self::Equals(k, v) => fields.get(k).map(String::as_str).unwrap_or("") == v,
            Self::NotEquals(k, v) => fields.get(k).map(String::as_str).unwrap_or("") != v,
        }
    }
}

/// Conjunction of field requirements. Empty selects everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelector {
    requirements: Vec<FieldRequirement>,
}

impl FieldSelector {
    pub fn everything() -> Self { Self::default() }

    pub fn is_empty(&self) -> bool { self.requirements.is_empty() }

    pub fn one_term_equal(field: &str, value: &str) -> Self {
        Self { requirements: vec![FieldRequirement::Equals(field.to_string(), value.to_string())] }
    }

    pub fn parse(input: &str) -> StoreResult<Self> {
        let mut requirements = Vec::new();
        for term in split_top_level(input)? {
            let req = if let Some((k, v)) = term.split_once("!=") {
                FieldRequirement::NotEquals(field_key(k)?, v.trim().to_string())
            } else if let Some((k, v)) = term.split_once("==") {
                FieldRequirement::Equals(field_key(k)?, v.trim().to_string())
            } else if let Some((k, v)) = term.split_once('=') {
                FieldRequirement::Equals(field_key(k)?, v.trim().to_string())
            } else {
                return Err(StoreError::InvalidSelector(format!("invalid field selector term {:?}: expected key=value or key!=value", term)));
            };
            requirements.push(req);
        }
        Ok(Self { requirements })
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.requirements.iter().all(|r| r.matches(fields))
    }

    /// Value pinned by an equality requirement on `field`, if any.
    pub fn requires_exact_match(&self, field: &str) -> Option<&str> {
        self.requirements.iter().find_map(|r| match r {
            FieldRequirement::Equals(k, v) if k == field => Some(v.as_str()),
            _ => None,
        })
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .requirements
            .iter()
            .map(|r| match r {
                FieldRequirement::Equals(k, v) => format!("{}={}", k, v),
                FieldRequirement::NotEquals(k, v) => format!("{}!={}", k, v),
            })
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

// Split on commas that are not inside parentheses; drop empty input entirely.
fn split_top_level(input: &str) -> StoreResult<Vec<&str>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 { return Err(StoreError::InvalidSelector(format!("unbalanced ')' in {:?}", input))); }
            }
            ',' if depth == 0 => {
                out.push(input[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(StoreError::InvalidSelector(format!("unbalanced '(' in {:?}", input)));
    }
    out.push(input[start..].trim());
    if out.iter().any(|t| t.is_empty()) {
        return Err(StoreError::InvalidSelector(format!("empty term in {:?}", input)));
    }
    Ok(out)
}

fn valid_key(k: &str) -> bool {
    !k.is_empty() && !k.chars().any(|c| c.is_whitespace() || matches!(c, '=' | '!' | '(' | ')' | ','))
}

fn label_key(k: &str) -> StoreResult<String> {
    let k = k.trim();
    if valid_key(k) { Ok(k.to_string()) } else { Err(StoreError::InvalidSelector(format!("invalid label key {:?}", k))) }
}

fn field_key(k: &str) -> StoreResult<String> {
    let k = k.trim();
    if valid_key(k) { Ok(k.to_string()) } else { Err(StoreError::InvalidSelector(format!("invalid field key {:?}", k))) }
}

fn parse_set(term: &str, open: usize) -> StoreResult<BTreeSet<String>> {
    let body = term[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| StoreError::InvalidSelector(format!("missing ')' in {:?}", term)))?;
    let set: BTreeSet<String> = body.split(',').map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).collect();
    if set.is_empty() {
        return Err(StoreError::InvalidSelector(format!("empty value set in {:?}", term)));
    }
    Ok(set)
}

fn parse_label_term(term: &str) -> StoreResult<LabelRequirement> {
    if let Some(open) = term.find('(') {
        let head: Vec<&str> = term[..open].split_whitespace().collect();
        return match head.as_slice() {
            [key, "in"] => Ok(LabelRequirement::In(label_key(key)?, parse_set(term, open)?)),
            [key, "notin"] => Ok(LabelRequirement::NotIn(label_key(key)?, parse_set(term, open)?)),
            _ => Err(StoreError::InvalidSelector(format!("invalid set requirement {:?}", term))),
        };
    }
    if let Some(rest) = term.strip_prefix('!') {
        if !rest.contains('=') {
            return Ok(LabelRequirement::NotExists(label_key(rest)?));
        }
    }
    if let Some((k, v)) = term.split_once("!=") {
        return Ok(LabelRequirement::NotEquals(label_key(k)?, v.trim().to_string()));
    }
    if let Some((k, v)) = term.split_once("==") {
        return Ok(LabelRequirement::Equals(label_key(k)?, v.trim().to_string()));
    }
    if let Some((k, v)) = term.split_once('=') {
        return Ok(LabelRequirement::Equals(label_key(k)?, v.trim().to_string()));
    }
    Ok(LabelRequirement::Exists(label_key(term)?))
}
