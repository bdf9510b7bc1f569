use http::StatusCode;
use kube::core::admission::{
    AdmissionRequest, AdmissionResponse, AdmissionReview, META_API_VERSION_V1,
    META_API_VERSION_V1BETA1, META_KIND,
};
use kube::core::DynamicObject;
use std::sync::Arc;
use thiserror::Error;

pub mod handler;
pub mod resource;

pub use handler::{HandlerError, RequestsHandler, ReviewRequest, Verdict};
pub use resource::ResourceKind;

pub type Review = AdmissionReview<DynamicObject>;

/// Turns AdmissionReview bodies into verdicts.
///
/// Every outcome, including decode failures and handler panics, is answered
/// with an AdmissionReview envelope. Only undecodable bodies get a non-200
/// status.
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn RequestsHandler>,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn RequestsHandler>) -> Self {
        Dispatcher { handler }
    }

    pub async fn dispatch(&self, body: &[u8]) -> (StatusCode, Review) {
        match decode(body) {
            Ok(request) => (StatusCode::OK, self.review(request).await.into_review()),
            Err(e) => Self::reject(e, salvage_uid(body)),
        }
    }

    /// Answers a request that could not be decoded.
    pub fn reject(error: DecodeError, uid: Option<String>) -> (StatusCode, Review) {
        warn!("Rejecting admission review: {}", error);

        let mut response = AdmissionResponse::invalid(error);
        if let Some(uid) = uid {
            response.uid = uid;
        }

        (StatusCode::BAD_REQUEST, response.into_review())
    }

    async fn review(&self, request: AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        let kind = match ResourceKind::from_resource(&request.resource) {
            Some(kind) => kind,
            None => {
                let gvr = &request.resource;
                let reason = format!(
                    "unsupported resource group={:?} version={:?} resource={:?}",
                    gvr.group, gvr.version, gvr.resource
                );
                warn!("Denying {}: {}", request.uid, reason);
                return AdmissionResponse::from(&request).deny(reason);
            }
        };

        let object = match request.object.as_ref().map(serde_json::to_vec).transpose() {
            Ok(object) => object,
            Err(e) => {
                error!("Failed to re-encode {} object of {}: {}", kind, request.uid, e);
                return AdmissionResponse::from(&request)
                    .deny(format!("failed to encode {} object", kind));
            }
        };

        let review_request = ReviewRequest {
            uid: request.uid.clone(),
            kind,
            operation: request.operation.clone(),
            name: request.name.clone(),
            namespace: request.namespace.clone(),
            dry_run: request.dry_run,
            object,
        };

        debug!(
            "Reviewing {:?} of {} {}/{} ({}, dry run: {})",
            review_request.operation,
            kind,
            review_request.namespace.as_deref().unwrap_or(""),
            review_request.name,
            review_request.uid,
            review_request.dry_run
        );

        let handler = self.handler.clone();
        let verdict = match tokio::task::spawn_blocking(move || handler.admit(&review_request))
            .await
        {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                warn!("Admission handler failed for {}: {}", request.uid, e);
                Verdict::deny(format!("{} admission failed: {}", kind, e))
            }
            Err(e) if e.is_panic() => {
                error!("Admission handler panicked for {}", request.uid);
                Verdict::deny(format!(
                    "{} admission failed: internal error in mutation policy",
                    kind
                ))
            }
            Err(e) => {
                error!("Admission handler did not complete for {}: {}", request.uid, e);
                Verdict::deny(format!("{} admission failed: handler was cancelled", kind))
            }
        };

        encode(&request, verdict)
    }
}

fn decode(body: &[u8]) -> Result<AdmissionRequest<DynamicObject>, DecodeError> {
    let review: Review = serde_json::from_slice(body)?;

    let api_version = review.types.api_version.as_str();
    if review.types.kind != META_KIND
        || (api_version != META_API_VERSION_V1 && api_version != META_API_VERSION_V1BETA1)
    {
        return Err(DecodeError::UnexpectedType {
            api_version: review.types.api_version,
            kind: review.types.kind,
        });
    }

    review.try_into().map_err(|_| DecodeError::MissingRequest)
}

fn salvage_uid(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value
        .pointer("/request/uid")?
        .as_str()
        .map(ToString::to_string)
}

fn encode(request: &AdmissionRequest<DynamicObject>, verdict: Verdict) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);

    if !verdict.allowed {
        let reason = verdict
            .reason
            .unwrap_or_else(|| "denied by admission policy".to_string());
        info!("Denied {}: {}", request.uid, reason);
        return response.deny(reason);
    }

    match verdict.patch {
        Some(patch) if !patch.0.is_empty() => {
            debug!("Patching {} with {} operations", request.uid, patch.0.len());
            response.with_patch(patch).unwrap_or_else(|e| {
                error!("Failed to encode patch for {}: {}", request.uid, e);
                AdmissionResponse::from(request).deny("failed to encode admission patch")
            })
        }
        _ => response,
    }
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed AdmissionReview: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("malformed AdmissionReview: unexpected type {api_version} {kind}")]
    UnexpectedType { api_version: String, kind: String },
    #[error("malformed AdmissionReview: no request present")]
    MissingRequest,
    #[error("malformed AdmissionReview: unreadable body: {0}")]
    Body(#[source] hyper::Error),
}
