//! kstor core types: storage keys, selectors, selectable fields, cache sizing and errors.

#![forbid(unsafe_code)]

pub mod cachesize;
pub mod config;
mod error;
mod fields;
pub mod keys;
mod object;
mod options;
pub mod selector;

pub use cachesize::CacheSizes;
pub use error::{FieldError, StoreError, StoreResult};
pub use fields::{get_field_value, merge_labels, object_meta_fields, Fields, LABEL_FIELD_PREFIX};
pub use keys::{KeyScheme, RequestScope};
pub use object::{Object, QualifiedResource};
pub use options::{DeleteOptions, ListOptions, ObjectList, Preconditions};
pub use selector::{FieldSelector, LabelSelector};

pub mod prelude {
    pub use super::{
        DeleteOptions, FieldError, Fields, KeyScheme, ListOptions, Object, ObjectList, QualifiedResource, RequestScope,
        StoreError, StoreResult,
    };
}
