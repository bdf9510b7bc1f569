use super::resource::ResourceKind;
use json_patch::Patch;
use kube::core::admission::Operation;
use thiserror::Error;

/// The mutation policy behind the dispatcher.
///
/// `admit` is synchronous and runs on the blocking pool, so implementations
/// may wait on the API server.
pub trait RequestsHandler: Send + Sync + 'static {
    /// Hands over the clientset once, before the listener is bound.
    fn initialize_clientset(&mut self, client: kube::Client);

    fn admit(&self, request: &ReviewRequest) -> Result<Verdict, HandlerError>;
}

/// What a handler gets to see of an admission request.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub uid: String,
    pub kind: ResourceKind,
    pub operation: Operation,
    pub name: String,
    pub namespace: Option<String>,
    pub dry_run: bool,
    /// The admitted object as JSON, absent for DELETE and CONNECT.
    pub object: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub allowed: bool,
    pub patch: Option<Patch>,
    pub reason: Option<String>,
}

impl Verdict {
    pub fn allow() -> Self {
        Verdict {
            allowed: true,
            patch: None,
            reason: None,
        }
    }

    pub fn patch(patch: Patch) -> Self {
        Verdict {
            allowed: true,
            patch: Some(patch),
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Verdict {
            allowed: false,
            patch: None,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("The request carries no object.")]
    MissingObject,
    #[error("The object is not a valid {kind}: {source}")]
    InvalidObject {
        kind: ResourceKind,
        source: serde_json::Error,
    },
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}
