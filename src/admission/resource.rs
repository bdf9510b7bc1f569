use kube::core::GroupVersionResource;
use std::fmt;

/// Resources the webhook is registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Pod,
    CronJob,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 2] = [ResourceKind::Pod, ResourceKind::CronJob];

    pub fn group(self) -> &'static str {
        match self {
            ResourceKind::Pod => "",
            ResourceKind::CronJob => "batch",
        }
    }

    pub fn version(self) -> &'static str {
        "v1"
    }

    pub fn resource(self) -> &'static str {
        match self {
            ResourceKind::Pod => "pods",
            ResourceKind::CronJob => "cronjobs",
        }
    }

    pub fn from_resource(gvr: &GroupVersionResource) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            kind.group() == gvr.group
                && kind.version() == gvr.version
                && kind.resource() == gvr.resource
        })
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group().is_empty() {
            write!(f, "{}/{}", self.version(), self.resource())
        } else {
            write!(f, "{}/{}/{}", self.group(), self.version(), self.resource())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gvr(group: &str, version: &str, resource: &str) -> GroupVersionResource {
        serde_json::from_value(serde_json::json!({
            "group": group,
            "version": version,
            "resource": resource,
        }))
        .unwrap()
    }

    #[test]
    fn known_triples_resolve() {
        assert_eq!(
            ResourceKind::from_resource(&gvr("", "v1", "pods")),
            Some(ResourceKind::Pod)
        );
        assert_eq!(
            ResourceKind::from_resource(&gvr("batch", "v1", "cronjobs")),
            Some(ResourceKind::CronJob)
        );
    }

    #[test]
    fn near_misses_are_rejected() {
        assert_eq!(ResourceKind::from_resource(&gvr("batch", "v1beta1", "cronjobs")), None);
        assert_eq!(ResourceKind::from_resource(&gvr("batch", "v1", "pods")), None);
        assert_eq!(ResourceKind::from_resource(&gvr("apps", "v1", "deployments")), None);
    }

    #[test]
    fn display_omits_core_group() {
        assert_eq!(ResourceKind::Pod.to_string(), "v1/pods");
        assert_eq!(ResourceKind::CronJob.to_string(), "batch/v1/cronjobs");
    }
}
