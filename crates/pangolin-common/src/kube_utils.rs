//! Small Kubernetes helpers shared by the controllers

use std::collections::BTreeMap;

use kube::{Resource, ResourceExt};
use serde_json::{json, Value};

use crate::{MANAGED_BY_LABEL, MANAGED_BY_VALUE};

/// Label carrying the name of the object a generated child belongs to
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// Label carrying the generated component's name
pub const NAME_LABEL: &str = "app.kubernetes.io/name";

/// `namespace/name` of an object, used in log fields and error messages
pub fn object_ref<K: Resource>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.namespace().unwrap_or_default(),
        obj.name_any()
    )
}

/// Whether the object carries a deletion timestamp
pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

/// Whether the object carries the given finalizer
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Merge patch body replacing the finalizer list, guarded by resourceVersion
pub fn finalizers_patch(finalizers: &[String], resource_version: Option<&str>) -> Value {
    let mut metadata = json!({ "finalizers": finalizers });
    if let Some(rv) = resource_version {
        metadata["resourceVersion"] = json!(rv);
    }
    json!({ "metadata": metadata })
}

/// Finalizer list with `finalizer` appended (no duplicates)
pub fn with_finalizer<K: Resource>(obj: &K, finalizer: &str) -> Vec<String> {
    let mut finalizers = obj.finalizers().to_vec();
    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());
    }
    finalizers
}

/// Finalizer list with `finalizer` removed
pub fn without_finalizer<K: Resource>(obj: &K, finalizer: &str) -> Vec<String> {
    obj.finalizers()
        .iter()
        .filter(|f| f.as_str() != finalizer)
        .cloned()
        .collect()
}

/// Standard labels for an object generated on behalf of `owner`
pub fn managed_labels(component: &str, owner: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), component.to_string()),
        (INSTANCE_LABEL.to_string(), owner.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
    ])
}
