use crate::admission::{Dispatcher, RequestsHandler};
use crate::clientset::{self, ClientsetError};
use crate::config::{ConfigError, ServerConfig};
use crate::router::Router;
use crate::tls::{self, CertificateProvider, TlsConfigError};
use hyper::{server::conn::Http, service::service_fn};
use std::convert::Infallible;
use std::{io, net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

pub fn display_version() -> String {
    format!("{} version {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

pub struct Server {
    config: ServerConfig,
    handler: Box<dyn RequestsHandler>,
}

impl Server {
    pub fn new(config: ServerConfig, handler: Box<dyn RequestsHandler>) -> Self {
        Server { config, handler }
    }

    /// Connects to Kubernetes, then serves the webhook until the process ends.
    ///
    /// Only returns on startup failures; nothing is bound unless the clientset
    /// and the certificate pair are usable.
    pub async fn start(mut self) -> Result<(), StartupError> {
        info!("{}", display_version());

        if self.config.verbose {
            debug!("server={:?}", self.config);
        }

        let client = clientset::connect(self.config.kubeconfig.as_deref()).await?;
        self.handler.initialize_clientset(client);

        info!("Listening on {}", self.config.address);

        let dispatcher = Dispatcher::new(Arc::from(self.handler));
        let router = Arc::new(Router::new(self.config.webhook_path, dispatcher));
        let acceptor = tls::create_acceptor(CertificateProvider::new(
            self.config.tls_cert_file,
            self.config.tls_key_file,
        ))?;

        let address = self.config.address;
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| StartupError::Bind { address, source })?;

        serve(listener, acceptor, router).await;

        Ok(())
    }
}

/// Accepts connections forever, one task per connection.
pub async fn serve(listener: TcpListener, acceptor: TlsAcceptor, router: Arc<Router>) {
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let router = router.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(acceptor, socket, addr, router).await {
                info!("Failed to handle connection from {}: {}", addr, e);
            }
        });
    }
}

async fn handle_connection(
    acceptor: TlsAcceptor,
    socket: TcpStream,
    addr: SocketAddr,
    router: Arc<Router>,
) -> Result<(), ConnectionError> {
    let socket = acceptor
        .accept(socket)
        .await
        .map_err(ConnectionError::Handshake)?;

    debug!("Connection accepted from {}.", addr);

    Http::new()
        .serve_connection(
            socket,
            service_fn(move |req| {
                let router = router.clone();
                async move { Ok::<_, Infallible>(router.route(req).await) }
            }),
        )
        .await?;

    Ok(())
}

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to setup connection with kubernetes api: {0}")]
    Clientset(#[from] ClientsetError),
    #[error(transparent)]
    Tls(#[from] TlsConfigError),
    #[error("Failed to bind {address}: {source}")]
    Bind { address: SocketAddr, source: io::Error },
}

#[derive(Error, Debug)]
enum ConnectionError {
    #[error("TLS handshake failed: {0}")]
    Handshake(io::Error),
    #[error(transparent)]
    Http(#[from] hyper::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{HandlerError, ReviewRequest, Verdict};
    use crate::testutil::{client_config, cronjob_review, SelfSigned};
    use http::{Request, StatusCode};
    use hyper::Body;
    use std::path::PathBuf;
    use tokio_rustls::rustls::ServerName;
    use tokio_rustls::TlsConnector;

    struct AllowAll;

    impl RequestsHandler for AllowAll {
        fn initialize_clientset(&mut self, _client: kube::Client) {}

        fn admit(&self, _request: &ReviewRequest) -> Result<Verdict, HandlerError> {
            Ok(Verdict::allow())
        }
    }

    fn config(dir: &std::path::Path) -> ServerConfig {
        ServerConfig {
            tls_cert_file: dir.join("tls.crt"),
            tls_key_file: dir.join("tls.key"),
            address: "127.0.0.1:0".parse().unwrap(),
            webhook_path: "/".to_string(),
            verbose: true,
            kubeconfig: Some(PathBuf::from("/nonexistent/kubeconfig")),
            timezone: "UTC".to_string(),
            inject: true,
        }
    }

    async fn spawn_server(cert: &SelfSigned, dir: &std::path::Path) -> SocketAddr {
        cert.write_to(dir);
        let acceptor = tls::create_acceptor(CertificateProvider::new(
            dir.join("tls.crt"),
            dir.join("tls.key"),
        ))
        .unwrap();
        let router = Arc::new(Router::new("/", Dispatcher::new(Arc::new(AllowAll))));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(serve(listener, acceptor, router));

        addr
    }

    async fn send(
        addr: SocketAddr,
        cert: &SelfSigned,
        request: Request<Body>,
    ) -> hyper::Response<Body> {
        let socket = TcpStream::connect(addr).await.unwrap();
        let connector = TlsConnector::from(Arc::new(client_config(&[cert], None)));
        let stream = connector
            .connect(ServerName::try_from("localhost").unwrap(), socket)
            .await
            .unwrap();

        let (mut sender, connection) = hyper::client::conn::handshake(stream).await.unwrap();
        tokio::spawn(connection);

        sender.send_request(request).await.unwrap()
    }

    #[tokio::test]
    async fn clientset_failure_aborts_startup() {
        let dir = tempfile::tempdir().unwrap();
        let server = Server::new(config(dir.path()), Box::new(AllowAll));

        let result = server.start().await;

        assert!(matches!(result, Err(StartupError::Clientset(_))));
    }

    #[tokio::test]
    async fn health_over_tls() {
        let dir = tempfile::tempdir().unwrap();
        let cert = SelfSigned::generate();
        let addr = spawn_server(&cert, dir.path()).await;

        let request = Request::get("/health").body(Body::empty()).unwrap();
        let response = send(addr, &cert, request).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn admission_over_tls_echoes_uid() {
        let dir = tempfile::tempdir().unwrap();
        let cert = SelfSigned::generate();
        let addr = spawn_server(&cert, dir.path()).await;

        let request = Request::post("/")
            .header("content-type", "application/json")
            .body(Body::from(cronjob_review("tls-uid").to_string()))
            .unwrap();
        let response = send(addr, &cert, request).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let review: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(review["response"]["uid"], "tls-uid");
    }

    #[tokio::test]
    async fn failed_handshake_does_not_stop_serving() {
        let dir = tempfile::tempdir().unwrap();
        let cert = SelfSigned::generate();
        let addr = spawn_server(&cert, dir.path()).await;

        // A plain-text client fails the handshake.
        {
            use tokio::io::AsyncWriteExt;
            let mut socket = TcpStream::connect(addr).await.unwrap();
            socket
                .write_all(b"GET /health HTTP/1.1\r\n\r\n")
                .await
                .unwrap();
        }

        let request = Request::get("/health").body(Body::empty()).unwrap();
        let response = send(addr, &cert, request).await;

        assert_eq!(response.status(), StatusCode::OK);
    }
}
