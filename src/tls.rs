use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio_rustls::rustls::server::{ClientHello, ResolvesServerCert};
use tokio_rustls::rustls::sign::{self, CertifiedKey, SigningKey};
use tokio_rustls::rustls::{
    self, Certificate, PrivateKey, ServerConfig, SignatureScheme, SupportedCipherSuite,
    ALL_CIPHER_SUITES,
};
use tokio_rustls::TlsAcceptor;

/// A cipher suite by IANA name and code point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedSuite {
    pub name: &'static str,
    pub code: u16,
}

const fn suite(name: &'static str, code: u16) -> AllowedSuite {
    AllowedSuite { name, code }
}

/// Cipher suites the listener may negotiate, in preference order.
///
/// The list spans three protocol generations and is kept as operators and
/// cluster scanners expect it, legacy CBC entries included. Suites the TLS
/// provider does not implement are simply never offered.
pub const ALLOWED_CIPHER_SUITES: [AllowedSuite; 12] = [
    // TLSv1.0 & TLSv1.1
    suite("TLS_RSA_WITH_AES_128_CBC_SHA", 0x002f),
    suite("TLS_RSA_WITH_AES_256_CBC_SHA", 0x0035),
    suite("TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA", 0xc013),
    suite("TLS_ECDHE_RSA_WITH_AES_256_CBC_SHA", 0xc014),
    // TLSv1.2
    suite("TLS_RSA_WITH_AES_128_GCM_SHA256", 0x009c),
    suite("TLS_RSA_WITH_AES_256_GCM_SHA384", 0x009d),
    suite("TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256", 0xc02f),
    suite("TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384", 0xc030),
    suite("TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256", 0xcca8),
    // TLSv1.3
    suite("TLS_AES_128_GCM_SHA256", 0x1301),
    suite("TLS_AES_256_GCM_SHA384", 0x1302),
    suite("TLS_CHACHA20_POLY1305_SHA256", 0x1303),
];

fn provided(allowed: &AllowedSuite) -> Option<SupportedCipherSuite> {
    ALL_CIPHER_SUITES
        .iter()
        .find(|supported| supported.suite().get_u16() == allowed.code)
        .copied()
}

/// Suites from [`ALLOWED_CIPHER_SUITES`] that the provider implements.
pub fn negotiable_cipher_suites() -> Vec<SupportedCipherSuite> {
    ALLOWED_CIPHER_SUITES.iter().filter_map(provided).collect()
}

/// Allowed suites the provider cannot offer.
pub fn unavailable_cipher_suites() -> Vec<&'static str> {
    ALLOWED_CIPHER_SUITES
        .iter()
        .filter(|allowed| provided(allowed).is_none())
        .map(|allowed| allowed.name)
        .collect()
}

/// Builds the acceptor used for every inbound connection.
///
/// The certificate pair is loaded once up front so a broken mount fails
/// startup instead of every handshake. After that the provider re-reads the
/// files on each handshake.
pub fn create_acceptor(provider: CertificateProvider) -> Result<TlsAcceptor, TlsConfigError> {
    provider.load()?;

    let unavailable = unavailable_cipher_suites();
    if !unavailable.is_empty() {
        warn!(
            "Cipher suites not implemented by the TLS provider and never negotiated: {}",
            unavailable.join(", ")
        );
    }

    let mut config = ServerConfig::builder()
        .with_cipher_suites(&negotiable_cipher_suites())
        .with_safe_default_kx_groups()
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(provider));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Serves the certificate pair found at the configured paths.
///
/// Nothing is cached: Kubernetes rotates webhook certificates by updating the
/// mounted secret, and the next handshake picks the new files up.
#[derive(Debug, Clone)]
pub struct CertificateProvider {
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl CertificateProvider {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        CertificateProvider {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    /// Reads the pair and checks that the key belongs to the leaf certificate.
    pub fn load(&self) -> Result<CertifiedKey, CertificateError> {
        let certs = read_certificates(&self.cert_path)?;
        let key = read_private_key(&self.key_path)?;
        let signing_key = sign::any_supported_type(&key).map_err(|_| self.unsupported_key())?;

        self.check_pair(&certs[0], signing_key.as_ref())?;

        Ok(CertifiedKey::new(certs, signing_key))
    }

    /// Signs a fixed message with the key and verifies it against the leaf.
    fn check_pair(
        &self,
        leaf: &Certificate,
        key: &dyn SigningKey,
    ) -> Result<(), CertificateError> {
        let leaf = webpki::EndEntityCert::try_from(leaf.0.as_slice()).map_err(|reason| {
            CertificateError::InvalidCertificate {
                path: self.cert_path.clone(),
                reason,
            }
        })?;

        let signer = key
            .choose_scheme(&PAIR_CHECK_SCHEMES)
            .ok_or_else(|| self.unsupported_key())?;
        let algorithm =
            verification_algorithm(signer.scheme()).ok_or_else(|| self.unsupported_key())?;

        let mismatch = || CertificateError::KeyMismatch {
            cert_path: self.cert_path.clone(),
            key_path: self.key_path.clone(),
        };
        let signature = signer.sign(PAIR_CHECK_MESSAGE).map_err(|_| mismatch())?;
        leaf.verify_signature(algorithm, PAIR_CHECK_MESSAGE, &signature)
            .map_err(|_| mismatch())
    }

    fn unsupported_key(&self) -> CertificateError {
        CertificateError::UnsupportedKey {
            path: self.key_path.clone(),
        }
    }
}

const PAIR_CHECK_MESSAGE: &[u8] = b"tzwebhook certificate pair check";

const PAIR_CHECK_SCHEMES: [SignatureScheme; 4] = [
    SignatureScheme::ECDSA_NISTP256_SHA256,
    SignatureScheme::ECDSA_NISTP384_SHA384,
    SignatureScheme::ED25519,
    SignatureScheme::RSA_PKCS1_SHA256,
];

fn verification_algorithm(
    scheme: SignatureScheme,
) -> Option<&'static webpki::SignatureAlgorithm> {
    match scheme {
        SignatureScheme::ECDSA_NISTP256_SHA256 => Some(&webpki::ECDSA_P256_SHA256),
        SignatureScheme::ECDSA_NISTP384_SHA384 => Some(&webpki::ECDSA_P384_SHA384),
        SignatureScheme::ED25519 => Some(&webpki::ED25519),
        SignatureScheme::RSA_PKCS1_SHA256 => Some(&webpki::RSA_PKCS1_2048_8192_SHA256),
        _ => None,
    }
}

impl ResolvesServerCert for CertificateProvider {
    fn resolve(&self, _client_hello: ClientHello) -> Option<Arc<CertifiedKey>> {
        match self.load() {
            Ok(key) => Some(Arc::new(key)),
            Err(e) => {
                error!("Rejecting TLS handshake: {}", e);
                None
            }
        }
    }
}

fn open(path: &Path) -> Result<BufReader<File>, CertificateError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| CertificateError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn read_certificates(path: &Path) -> Result<Vec<Certificate>, CertificateError> {
    let certs = rustls_pemfile::certs(&mut open(path)?).map_err(|source| {
        CertificateError::Read {
            path: path.to_path_buf(),
            source,
        }
    })?;

    if certs.is_empty() {
        return Err(CertificateError::NoCertificates {
            path: path.to_path_buf(),
        });
    }

    Ok(certs.into_iter().map(Certificate).collect())
}

fn read_private_key(path: &Path) -> Result<PrivateKey, CertificateError> {
    let mut reader = open(path)?;

    loop {
        let item = rustls_pemfile::read_one(&mut reader).map_err(|source| {
            CertificateError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        match item {
            Some(rustls_pemfile::Item::PKCS8Key(key))
            | Some(rustls_pemfile::Item::RSAKey(key))
            | Some(rustls_pemfile::Item::ECKey(key)) => return Ok(PrivateKey(key)),
            Some(_) => continue,
            None => {
                return Err(CertificateError::NoPrivateKey {
                    path: path.to_path_buf(),
                })
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum CertificateError {
    #[error("Failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("No PEM certificate found in {path}.")]
    NoCertificates { path: PathBuf },
    #[error("No PEM private key found in {path}.")]
    NoPrivateKey { path: PathBuf },
    #[error("The private key in {path} is not of a supported type.")]
    UnsupportedKey { path: PathBuf },
    #[error("The certificate in {path} is not valid X.509: {reason:?}")]
    InvalidCertificate { path: PathBuf, reason: webpki::Error },
    #[error("The private key in {key_path} does not match the certificate in {cert_path}.")]
    KeyMismatch { cert_path: PathBuf, key_path: PathBuf },
}

#[derive(Error, Debug)]
pub enum TlsConfigError {
    #[error("Initial certificate load failed: {0}")]
    Certificate(#[from] CertificateError),
    #[error("Invalid TLS configuration: {0}")]
    Rustls(#[from] rustls::Error),
}
