//! StorageClass registration: fixed `/storageclasses` prefix, deletes return the object.

use k8s_openapi::api::storage::v1::StorageClass;
use kstor_core::cachesize::STORAGE_CLASSES;
use kstor_core::{object_meta_fields, FieldError, Fields, QualifiedResource};
use kstor_store::{storage_with_cacher, Store, StoreOptions, Strategy};
use kube::ResourceExt;
use tracing::debug;

use crate::validation::{is_dns1123_subdomain, is_qualified_name, validate_cluster_meta};
use crate::RestOptions;

pub const PREFIX: &str = "/storageclasses";
pub const DEFAULT_CACHE_SIZE: i64 = 100;
pub const MAX_PARAMETERS_BYTES: usize = 256 * 1024;

pub const RECLAIM_POLICIES: [&str; 2] = ["Delete", "Retain"];
pub const BINDING_MODES: [&str; 2] = ["Immediate", "WaitForFirstConsumer"];

pub type StorageClassStore = Store<StorageClassStrategy>;

#[derive(Debug, Default, Clone, Copy)]
pub struct StorageClassStrategy;

impl StorageClassStrategy {
    fn validate(&self, sc: &StorageClass) -> Vec<FieldError> {
        let mut errs =
            validate_cluster_meta(sc.metadata.name.as_deref(), sc.metadata.namespace.as_deref(), is_dns1123_subdomain);

        if sc.provisioner.is_empty() {
            errs.push(FieldError::required("provisioner"));
        } else {
            errs.extend(is_qualified_name(&sc.provisioner).into_iter().map(|m| FieldError::invalid("provisioner", &sc.provisioner, m)));
        }

        if let Some(policy) = sc.reclaim_policy.as_deref() {
            if !RECLAIM_POLICIES.contains(&policy) {
                errs.push(FieldError::not_supported("reclaimPolicy", policy, &RECLAIM_POLICIES));
            }
        }
        if let Some(mode) = sc.volume_binding_mode.as_deref() {
            if !BINDING_MODES.contains(&mode) {
                errs.push(FieldError::not_supported("volumeBindingMode", mode, &BINDING_MODES));
            }
        }

        let mut total = 0usize;
        for (k, v) in sc.parameters.iter().flatten() {
            if k.is_empty() {
                errs.push(FieldError::invalid("parameters", k, "parameter keys may not be empty"));
            }
            total += k.len() + v.len();
        }
        if total > MAX_PARAMETERS_BYTES {
            errs.push(FieldError::new("parameters", format!("Too long: must have at most {} bytes", MAX_PARAMETERS_BYTES)));
        }
        errs
    }
}

impl Strategy for StorageClassStrategy {
    type Object = StorageClass;

    fn namespace_scoped(&self) -> bool { false }

    fn kind_fields(&self, sc: &StorageClass) -> Fields {
        let mut fields = object_meta_fields(&sc.metadata, false);
        fields.insert("provisioner".to_string(), sc.provisioner.clone());
        fields
    }

    fn prepare_for_create(&self, sc: &mut StorageClass) {
        sc.reclaim_policy.get_or_insert_with(|| "Delete".to_string());
        sc.volume_binding_mode.get_or_insert_with(|| "Immediate".to_string());
    }

    fn prepare_for_update(&self, sc: &mut StorageClass, old: &StorageClass) {
        if sc.reclaim_policy.is_none() {
            sc.reclaim_policy = old.reclaim_policy.clone();
        }
        if sc.volume_binding_mode.is_none() {
            sc.volume_binding_mode = old.volume_binding_mode.clone();
        }
    }

    fn validate_create(&self, sc: &StorageClass) -> Vec<FieldError> { self.validate(sc) }

    fn validate_update(&self, sc: &StorageClass, old: &StorageClass) -> Vec<FieldError> {
        let mut errs = self.validate(sc);
        if sc.provisioner != old.provisioner {
            errs.push(FieldError::forbidden("provisioner", "updates to provisioner are forbidden."));
        }
        if sc.parameters != old.parameters {
            errs.push(FieldError::forbidden("parameters", "updates to parameters are forbidden."));
        }
        if sc.reclaim_policy != old.reclaim_policy {
            errs.push(FieldError::forbidden("reclaimPolicy", "updates to reclaimPolicy are forbidden."));
        }
        if sc.volume_binding_mode != old.volume_binding_mode {
            errs.push(FieldError::forbidden("volumeBindingMode", "updates to volumeBindingMode are forbidden."));
        }
        if !errs.is_empty() {
            debug!(name = %sc.name_any(), errors = errs.len(), "storageclass: update rejected");
        }
        errs
    }
}

/// Build the StorageClass store. The watch cache runs on the current tokio runtime;
/// called outside one, watches go straight to the engine.
pub fn new_rest(opts: &RestOptions) -> StorageClassStore {
    let cache_size = opts.cache_sizes.override_for(STORAGE_CLASSES).unwrap_or(DEFAULT_CACHE_SIZE);
    let storage = storage_with_cacher(opts.storage.clone(), cache_size, PREFIX, STORAGE_CLASSES);
    let store_opts = StoreOptions::new(QualifiedResource::of::<StorageClass>(), PREFIX)
        .delete_collection_workers(opts.delete_collection_workers)
        .return_deleted_object(true)
        .watch_queue_cap(opts.watch_queue_cap);
    Store::new(StorageClassStrategy, storage, store_opts)
}
