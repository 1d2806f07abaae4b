use serde::{Deserialize, Serialize};

/// Options for list, watch and delete-collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    /// Page size; `None` returns everything.
    pub limit: Option<usize>,
    pub continue_token: Option<String>,
    /// Watch start: events strictly after this version. `None` starts from now.
    pub resource_version: Option<u64>,
}

impl ListOptions {
    pub fn labels(mut self, selector: &str) -> Self {
        self.label_selector = Some(selector.to_string());
        self
    }

    pub fn fields(mut self, selector: &str) -> Self {
        self.field_selector = Some(selector.to_string());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn continue_from(mut self, token: impl Into<String>) -> Self {
        self.continue_token = Some(token.into());
        self
    }

    pub fn since(mut self, version: u64) -> Self {
        self.resource_version = Some(version);
        self
    }
}

/// Conditions that must hold on the stored object for a delete to proceed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preconditions {
    pub uid: Option<String>,
    pub resource_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    pub preconditions: Option<Preconditions>,
}

/// Point-in-time list result.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectList<T> {
    pub items: Vec<T>,
    pub resource_version: u64,
    pub continue_token: Option<String>,
}
