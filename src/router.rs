use crate::admission::{DecodeError, Dispatcher, Review};
use crate::config::HEALTH_PATH;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use hyper::Body;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Maps request paths to the health check and the admission webhook.
pub struct Router {
    webhook_path: String,
    dispatcher: Dispatcher,
}

impl Router {
    pub fn new(webhook_path: impl Into<String>, dispatcher: Dispatcher) -> Self {
        Router {
            webhook_path: webhook_path.into(),
            dispatcher,
        }
    }

    pub async fn route(&self, req: Request<Body>) -> Response<Body> {
        let path = req.uri().path();

        if path == HEALTH_PATH {
            health()
        } else if path == self.webhook_path {
            self.admit(req).await
        } else {
            debug!("No route for {} {}", req.method(), path);
            status(StatusCode::NOT_FOUND)
        }
    }

    async fn admit(&self, req: Request<Body>) -> Response<Body> {
        let (code, review) = match hyper::body::to_bytes(req.into_body()).await {
            Ok(body) => self.dispatcher.dispatch(&body).await,
            Err(e) => Dispatcher::reject(DecodeError::Body(e), None),
        };

        json(code, &review)
    }
}

/// Liveness only: answers as long as the process serves HTTP.
fn health() -> Response<Body> {
    status(StatusCode::OK)
}

fn status(code: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = code;
    response
}

fn json(code: StatusCode, review: &Review) -> Response<Body> {
    match serde_json::to_vec(review) {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = code;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
            response
        }
        Err(e) => {
            error!("Failed to serialize admission response: {}", e);
            status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
