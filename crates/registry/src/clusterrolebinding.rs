//! ClusterRoleBinding registration.
//!
//! Cluster-scoped, prefix taken from [`RestOptions::resource_prefix`], watch cache sized by
//! the `clusterrolebindings` entry, deletes answer with a status rather than the object.

use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, Subject};
use kstor_core::cachesize::CLUSTER_ROLE_BINDINGS;
use kstor_core::{object_meta_fields, FieldError, Fields, QualifiedResource};
use kstor_store::{storage_with_cacher, Store, StoreOptions, Strategy};
use kube::ResourceExt;
use tracing::debug;

use crate::validation::{path_segment_name, validate_cluster_meta};
use crate::RestOptions;

pub const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

const SUBJECT_KINDS: [&str; 3] = ["ServiceAccount", "User", "Group"];

pub type ClusterRoleBindingStore = Store<ClusterRoleBindingStrategy>;

#[derive(Debug, Default, Clone, Copy)]
pub struct ClusterRoleBindingStrategy;

impl ClusterRoleBindingStrategy {
    fn validate(&self, crb: &ClusterRoleBinding) -> Vec<FieldError> {
        let mut errs =
            validate_cluster_meta(crb.metadata.name.as_deref(), crb.metadata.namespace.as_deref(), path_segment_name);

        let rr = &crb.role_ref;
        if rr.api_group != RBAC_GROUP {
            errs.push(FieldError::not_supported("roleRef.apiGroup", &rr.api_group, &[RBAC_GROUP]));
        }
        if rr.kind != "ClusterRole" {
            errs.push(FieldError::not_supported("roleRef.kind", &rr.kind, &["ClusterRole"]));
        }
        if rr.name.is_empty() {
            errs.push(FieldError::required("roleRef.name"));
        } else {
            errs.extend(path_segment_name(&rr.name).into_iter().map(|m| FieldError::invalid("roleRef.name", &rr.name, m)));
        }

        for (i, subject) in crb.subjects.iter().flatten().enumerate() {
            errs.extend(validate_subject(&format!("subjects[{}]", i), subject));
        }
        errs
    }
}

fn validate_subject(path: &str, s: &Subject) -> Vec<FieldError> {
    let mut errs = Vec::new();
    if s.name.is_empty() {
        errs.push(FieldError::required(format!("{}.name", path)));
    }
    let group = s.api_group.as_deref().unwrap_or_default();
    match s.kind.as_str() {
        "ServiceAccount" => {
            if !group.is_empty() {
                errs.push(FieldError::not_supported(format!("{}.apiGroup", path), group, &[""]));
            }
            if s.namespace.as_deref().map(str::is_empty).unwrap_or(true) {
                errs.push(FieldError::required(format!("{}.namespace", path)));
            }
        }
        "User" | "Group" => {
            if group != RBAC_GROUP {
                errs.push(FieldError::not_supported(format!("{}.apiGroup", path), group, &[RBAC_GROUP]));
            }
        }
        other => errs.push(FieldError::not_supported(format!("{}.kind", path), other, &SUBJECT_KINDS)),
    }
    errs
}

impl Strategy for ClusterRoleBindingStrategy {
    type Object = ClusterRoleBinding;

    fn namespace_scoped(&self) -> bool { false }

    fn kind_fields(&self, crb: &ClusterRoleBinding) -> Fields {
        let mut fields = object_meta_fields(&crb.metadata, false);
        fields.insert("roleRef.kind".to_string(), crb.role_ref.kind.clone());
        fields.insert("roleRef.name".to_string(), crb.role_ref.name.clone());
        fields
    }

    fn validate_create(&self, crb: &ClusterRoleBinding) -> Vec<FieldError> { self.validate(crb) }

    fn validate_update(&self, crb: &ClusterRoleBinding, old: &ClusterRoleBinding) -> Vec<FieldError> {
        let mut errs = self.validate(crb);
        if crb.role_ref != old.role_ref {
            debug!(name = %crb.name_any(), "clusterrolebinding: roleRef change rejected");
            errs.push(FieldError::invalid("roleRef", &crb.role_ref.name, "cannot change roleRef"));
        }
        errs
    }
}

/// Build the ClusterRoleBinding store. The watch cache runs on the current tokio runtime;
/// called outside one, watches go straight to the engine.
pub fn new_rest(opts: &RestOptions) -> ClusterRoleBindingStore {
    let prefix = format!("/{}", opts.resource_prefix.trim_matches('/'));
    let storage = storage_with_cacher(
        opts.storage.clone(),
        opts.cache_sizes.size_for(CLUSTER_ROLE_BINDINGS),
        &prefix,
        CLUSTER_ROLE_BINDINGS,
    );
    let store_opts = StoreOptions::new(QualifiedResource::of::<ClusterRoleBinding>(), &prefix)
        .delete_collection_workers(opts.delete_collection_workers)
        .return_deleted_object(false)
        .watch_queue_cap(opts.watch_queue_cap);
    Store::new(ClusterRoleBindingStrategy, storage, store_opts)
}
