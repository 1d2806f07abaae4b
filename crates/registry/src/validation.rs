//! Name and value checks shared by the kind strategies.

use kstor_core::keys::validate_path_segment;
use kstor_core::FieldError;
use once_cell::sync::Lazy;
use regex::Regex;

pub const DNS1123_SUBDOMAIN_MAX: usize = 253;
pub const QUALIFIED_NAME_MAX: usize = 63;

static DNS1123_SUBDOMAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap());

static QUALIFIED_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").unwrap());

/// Problems with `value` as a DNS-1123 subdomain; empty when valid.
pub fn is_dns1123_subdomain(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    if value.len() > DNS1123_SUBDOMAIN_MAX {
        errs.push(format!("must be no more than {} characters", DNS1123_SUBDOMAIN_MAX));
    }
    if !DNS1123_SUBDOMAIN.is_match(value) {
        errs.push(
            "a DNS-1123 subdomain must consist of lower case alphanumeric characters, '-' or '.', \
             and must start and end with an alphanumeric character"
                .to_string(),
        );
    }
    errs
}

/// Problems with `value` as `[prefix/]name` where the prefix is a DNS-1123 subdomain.
pub fn is_qualified_name(value: &str) -> Vec<String> {
    let mut errs = Vec::new();
    let (prefix, name) = match value.split_once('/') {
        Some((p, n)) => (Some(p), n),
        None => (None, value),
    };
    if let Some(p) = prefix {
        if p.is_empty() {
            errs.push("prefix part must be non-empty".to_string());
        } else {
            errs.extend(is_dns1123_subdomain(p).into_iter().map(|e| format!("prefix part {}", e)));
        }
    }
    if name.is_empty() {
        errs.push("name part must be non-empty".to_string());
    } else {
        if name.len() > QUALIFIED_NAME_MAX {
            errs.push(format!("name part must be no more than {} characters", QUALIFIED_NAME_MAX));
        }
        if !QUALIFIED_NAME.is_match(name) {
            errs.push(
                "name part must consist of alphanumeric characters, '-', '_' or '.', \
                 and must start and end with an alphanumeric character"
                    .to_string(),
            );
        }
    }
    errs
}

/// Object metadata checks for cluster-scoped kinds. `name_check` returns problems with the name.
pub fn validate_cluster_meta(
    name: Option<&str>,
    namespace: Option<&str>,
    name_check: impl Fn(&str) -> Vec<String>,
) -> Vec<FieldError> {
    let mut errs = Vec::new();
    match name.filter(|n| !n.is_empty()) {
        None => errs.push(FieldError::required("metadata.name")),
        Some(n) => errs.extend(name_check(n).into_iter().map(|msg| FieldError::invalid("metadata.name", n, msg))),
    }
    if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
        errs.push(FieldError::invalid("metadata.namespace", ns, "not allowed on this type"));
    }
    errs
}

/// Names usable as a single storage path segment.
pub fn path_segment_name(name: &str) -> Vec<String> {
    match validate_path_segment(name) {
        Ok(()) => Vec::new(),
        Err(msg) => vec![msg.to_string()],
    }
}
