//! kstor registry: per-kind registrations (strategy, key prefix, cache sizing) that turn
//! the generic store into ready-to-serve ClusterRoleBinding and StorageClass stores.

#![forbid(unsafe_code)]

pub mod clusterrolebinding;
mod options;
pub mod storageclass;
pub mod validation;

pub use options::RestOptions;
