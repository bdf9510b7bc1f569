use json_patch::{AddOperation, PatchOperation};
use k8s_openapi::api::core::v1::{Container, PodSpec};
use serde_json::json;

pub const TZ_ENV: &str = "TZ";

pub const POD_SPEC_ROOT: &str = "/spec";
pub const CRONJOB_POD_SPEC_ROOT: &str = "/spec/jobTemplate/spec/template/spec";

/// Adds `TZ` to every container in `spec` that does not set it yet.
///
/// `root` is the JSON pointer of `spec` inside the admitted object.
pub fn env_operations(spec: &PodSpec, root: &str, timezone: &str) -> Vec<PatchOperation> {
    let mut operations = containers_operations(
        spec.init_containers.iter().flatten(),
        &format!("{}/initContainers", root),
        timezone,
    );
    operations.extend(containers_operations(
        spec.containers.iter(),
        &format!("{}/containers", root),
        timezone,
    ));

    operations
}

fn containers_operations<'a>(
    containers: impl Iterator<Item = &'a Container>,
    base: &str,
    timezone: &str,
) -> Vec<PatchOperation> {
    containers
        .enumerate()
        .filter_map(|(index, container)| container_operation(container, base, index, timezone))
        .collect()
}

fn container_operation(
    container: &Container,
    base: &str,
    index: usize,
    timezone: &str,
) -> Option<PatchOperation> {
    match &container.env {
        Some(env) if env.iter().any(|var| var.name == TZ_ENV) => None,
        Some(env) if !env.is_empty() => Some(PatchOperation::Add(AddOperation {
            path: format!("{}/{}/env/-", base, index),
            value: json!({ "name": TZ_ENV, "value": timezone }),
        })),
        _ => Some(PatchOperation::Add(AddOperation {
            path: format!("{}/{}/env", base, index),
            value: json!([{ "name": TZ_ENV, "value": timezone }]),
        })),
    }
}
