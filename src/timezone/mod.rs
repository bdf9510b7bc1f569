use crate::admission::{HandlerError, RequestsHandler, ResourceKind, ReviewRequest, Verdict};
use json_patch::{Patch, PatchOperation};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::Api;
use kube::core::admission::Operation;
use kube::Client;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

mod patch;

use patch::{env_operations, CRONJOB_POD_SPEC_ROOT, POD_SPEC_ROOT};

/// Set to `"false"` on an object or its namespace to skip injection.
pub const INJECT_ANNOTATION: &str = "tzwebhook.io/inject";
/// Overrides the configured timezone for an object or a whole namespace.
pub const TIMEZONE_ANNOTATION: &str = "tzwebhook.io/timezone";

type Annotations = BTreeMap<String, String>;

/// Injects a `TZ` environment variable into Pods and CronJob templates.
pub struct TimezoneInjector {
    timezone: String,
    inject: bool,
    client: Option<Client>,
}

impl TimezoneInjector {
    pub fn new(timezone: impl Into<String>, inject: bool) -> Self {
        TimezoneInjector {
            timezone: timezone.into(),
            inject,
            client: None,
        }
    }

    fn mutate_pod(&self, request: &ReviewRequest) -> Result<Verdict, HandlerError> {
        let pod: Pod = parse(request)?;

        let timezone = match self.timezone_for(&pod.metadata.annotations, request)? {
            Some(timezone) => timezone,
            None => return Ok(Verdict::allow()),
        };

        Ok(match &pod.spec {
            Some(spec) => verdict(env_operations(spec, POD_SPEC_ROOT, &timezone)),
            None => Verdict::allow(),
        })
    }

    fn mutate_cronjob(&self, request: &ReviewRequest) -> Result<Verdict, HandlerError> {
        let cronjob: CronJob = parse(request)?;

        let timezone = match self.timezone_for(&cronjob.metadata.annotations, request)? {
            Some(timezone) => timezone,
            None => return Ok(Verdict::allow()),
        };

        let spec = cronjob
            .spec
            .as_ref()
            .and_then(|spec| spec.job_template.spec.as_ref())
            .and_then(|job| job.template.spec.as_ref());

        Ok(match spec {
            Some(spec) => verdict(env_operations(spec, CRONJOB_POD_SPEC_ROOT, &timezone)),
            None => Verdict::allow(),
        })
    }

    /// The timezone to inject, or `None` when injection is switched off.
    ///
    /// The namespace is only fetched when the object's own annotations leave
    /// the decision open.
    fn timezone_for(
        &self,
        annotations: &Option<Annotations>,
        request: &ReviewRequest,
    ) -> Result<Option<String>, HandlerError> {
        let empty = Annotations::new();
        let object = annotations.as_ref().unwrap_or(&empty);

        let object_inject = object.get(INJECT_ANNOTATION).map(|value| enabled(value));
        match (object_inject, object.get(TIMEZONE_ANNOTATION)) {
            (Some(false), _) => {
                debug!("Injection disabled by annotation for {}", request.uid);
                return Ok(None);
            }
            (Some(true), Some(timezone)) => return Ok(Some(timezone.clone())),
            _ => {}
        }

        let namespace = self.namespace_annotations(request.namespace.as_deref())?;

        let inject = object_inject
            .or_else(|| namespace.get(INJECT_ANNOTATION).map(|value| enabled(value)))
            .unwrap_or(self.inject);
        if !inject {
            debug!("Injection disabled for {}", request.uid);
            return Ok(None);
        }

        Ok(Some(
            object
                .get(TIMEZONE_ANNOTATION)
                .or_else(|| namespace.get(TIMEZONE_ANNOTATION))
                .cloned()
                .unwrap_or_else(|| self.timezone.clone()),
        ))
    }

    fn namespace_annotations(&self, namespace: Option<&str>) -> Result<Annotations, HandlerError> {
        let (client, namespace) = match (&self.client, namespace) {
            (Some(client), Some(namespace)) => (client, namespace),
            _ => return Ok(Annotations::new()),
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => return Ok(Annotations::new()),
        };

        let api: Api<Namespace> = Api::all(client.clone());
        let namespace = runtime.block_on(api.get_opt(namespace))?;

        Ok(namespace
            .and_then(|namespace| namespace.metadata.annotations)
            .unwrap_or_default())
    }
}

impl RequestsHandler for TimezoneInjector {
    fn initialize_clientset(&mut self, client: Client) {
        self.client = Some(client);
    }

    fn admit(&self, request: &ReviewRequest) -> Result<Verdict, HandlerError> {
        match (request.kind, &request.operation) {
            (ResourceKind::Pod, Operation::Create) => self.mutate_pod(request),
            (ResourceKind::CronJob, Operation::Create | Operation::Update) => {
                self.mutate_cronjob(request)
            }
            _ => Ok(Verdict::allow()),
        }
    }
}

fn enabled(value: &str) -> bool {
    !value.eq_ignore_ascii_case("false")
}

fn parse<K: DeserializeOwned>(request: &ReviewRequest) -> Result<K, HandlerError> {
    let object = request
        .object
        .as_deref()
        .ok_or(HandlerError::MissingObject)?;

    serde_json::from_slice(object).map_err(|source| HandlerError::InvalidObject {
        kind: request.kind,
        source,
    })
}

fn verdict(operations: Vec<PatchOperation>) -> Verdict {
    if operations.is_empty() {
        Verdict::allow()
    } else {
        Verdict::patch(Patch(operations))
    }
}
