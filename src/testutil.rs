use serde_json::{json, Value};
use std::path::Path;
use tokio_rustls::rustls::{
    Certificate, ClientConfig, RootCertStore, SupportedCipherSuite, ALL_CIPHER_SUITES,
};

pub struct SelfSigned {
    pub cert_pem: String,
    pub key_pem: String,
    pub cert_der: Vec<u8>,
}

impl SelfSigned {
    pub fn generate() -> Self {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert_pem = cert.serialize_pem().unwrap();
        let key_pem = cert.serialize_private_key_pem();
        let cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .unwrap()
            .remove(0);

        SelfSigned {
            cert_pem,
            key_pem,
            cert_der,
        }
    }

    pub fn write_to(&self, dir: &Path) {
        std::fs::write(dir.join("tls.crt"), &self.cert_pem).unwrap();
        std::fs::write(dir.join("tls.key"), &self.key_pem).unwrap();
    }
}

pub fn client_config(
    trusted: &[&SelfSigned],
    only_suite: Option<SupportedCipherSuite>,
) -> ClientConfig {
    let mut roots = RootCertStore::empty();
    for cert in trusted {
        roots.add(&Certificate(cert.cert_der.clone())).unwrap();
    }

    let suites = match only_suite {
        Some(suite) => vec![suite],
        None => ALL_CIPHER_SUITES.to_vec(),
    };

    ClientConfig::builder()
        .with_cipher_suites(&suites)
        .with_safe_default_kx_groups()
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

pub fn review(uid: &str, resource: (&str, &str, &str), kind: &str, object: Value) -> Value {
    let (group, version, resource) = resource;
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": uid,
            "kind": { "group": group, "version": version, "kind": kind },
            "resource": { "group": group, "version": version, "resource": resource },
            "name": "sample",
            "namespace": "default",
            "operation": "CREATE",
            "userInfo": { "username": "system:serviceaccount:kube-system:replicaset-controller" },
            "object": object,
            "oldObject": null,
            "dryRun": false,
        }
    })
}

pub fn pod(annotations: Value) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": "sample", "namespace": "default", "annotations": annotations },
        "spec": {
            "initContainers": [
                { "name": "init", "image": "busybox" }
            ],
            "containers": [
                { "name": "app", "image": "nginx", "env": [ { "name": "MODE", "value": "prod" } ] },
                { "name": "sidecar", "image": "envoy", "env": [ { "name": "TZ", "value": "Asia/Tokyo" } ] }
            ]
        }
    })
}

pub fn cronjob(annotations: Value) -> Value {
    json!({
        "apiVersion": "batch/v1",
        "kind": "CronJob",
        "metadata": { "name": "sample", "namespace": "default", "annotations": annotations },
        "spec": {
            "schedule": "0 3 * * *",
            "jobTemplate": {
                "spec": {
                    "template": {
                        "spec": {
                            "restartPolicy": "OnFailure",
                            "containers": [ { "name": "job", "image": "alpine" } ]
                        }
                    }
                }
            }
        }
    })
}

pub fn pod_review(uid: &str) -> Value {
    review(uid, ("", "v1", "pods"), "Pod", pod(json!({})))
}

pub fn cronjob_review(uid: &str) -> Value {
    review(uid, ("batch", "v1", "cronjobs"), "CronJob", cronjob(json!({})))
}
