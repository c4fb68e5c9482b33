use super::has_labels;
use k8s_openapi::api::core::v1::ConfigMap;

pub(crate) fn unchanged(existing: &ConfigMap, desired: &ConfigMap) -> bool {
    existing.data == desired.data
        && existing.metadata.owner_references == desired.metadata.owner_references
        && has_labels(
            existing.metadata.labels.as_ref(),
            desired.metadata.labels.as_ref(),
        )
}
