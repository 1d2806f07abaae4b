use std::collections::BTreeMap;

use kstor_core::{FieldSelector, Fields, LabelSelector, ListOptions, StoreResult};

/// Label and field selectors evaluated together. Empty selectors match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionPredicate {
    pub label: LabelSelector,
    pub field: FieldSelector,
}

impl SelectionPredicate {
    pub fn everything() -> Self { Self::default() }

    pub fn from_options(opts: &ListOptions) -> StoreResult<Self> {
        let label = match opts.label_selector.as_deref() {
            Some(s) => LabelSelector::parse(s)?,
            None => LabelSelector::everything(),
        };
        let field = match opts.field_selector.as_deref() {
            Some(s) => FieldSelector::parse(s)?,
            None => FieldSelector::everything(),
        };
        Ok(Self { label, field })
    }

    pub fn is_everything(&self) -> bool { self.label.is_empty() && self.field.is_empty() }

    pub fn matches(&self, labels: &BTreeMap<String, String>, fields: &Fields) -> bool {
        self.label.matches(labels) && self.field.matches(fields)
    }

    /// Name pinned by a `metadata.name=` term, if any.
    pub fn matches_single_name(&self) -> Option<&str> { self.field.requires_exact_match("metadata.name") }
}
