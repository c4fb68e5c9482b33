use super::has_labels;
use k8s_openapi::api::core::v1::Secret;

/// A stored Secret is current when it holds exactly the desired payload and ownership.
pub(crate) fn unchanged(existing: &Secret, desired: &Secret) -> bool {
    existing.data == desired.data
        && existing.type_ == desired.type_
        && existing.metadata.owner_references == desired.metadata.owner_references
        && has_labels(
            existing.metadata.labels.as_ref(),
            desired.metadata.labels.as_ref(),
        )
}
