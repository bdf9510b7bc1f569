use kube::config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::{Client, Config};
use std::path::Path;
use thiserror::Error;

/// Builds the Kubernetes client shared by all admission requests.
///
/// Without an explicit kubeconfig the usual inference applies: the in-cluster
/// service account first, then `KUBECONFIG` and `~/.kube/config`.
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client, ClientsetError> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
        }
        None => Config::infer().await?,
    };

    debug!("Using Kubernetes API at {}", config.cluster_url);

    Ok(Client::try_from(config)?)
}

#[derive(Error, Debug)]
pub enum ClientsetError {
    #[error("Invalid kubeconfig: {0}")]
    Kubeconfig(#[from] KubeconfigError),
    #[error("Could not infer a Kubernetes configuration: {0}")]
    Infer(#[from] InferConfigError),
    #[error("Could not create the Kubernetes client: {0}")]
    Client(#[from] kube::Error),
}
