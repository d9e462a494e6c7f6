//! # Credential Provider
//!
//! Loads the client certificate chain, its private key and the trusted CA
//! into one rustls client configuration shared by the actor API client and
//! the AMQP connector. TLS 1.3 only, ring crypto provider.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, InconsistentKeys, RootCertStore};
use rustls_pki_types::pem::{self, PemObject};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{debug, info};

use crate::domain::CredentialError;

/// Client identity plus trust anchors, ready for TLS handshakes.
#[derive(Clone)]
pub struct TransportSecurityContext {
    client_config: Arc<ClientConfig>,
    common_name: Option<String>,
    chain_len: usize,
}

impl TransportSecurityContext {
    /// Shared rustls client configuration.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.client_config)
    }

    /// Subject common name of the leaf certificate, if present.
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Number of certificates presented during the handshake.
    pub fn chain_len(&self) -> usize {
        self.chain_len
    }
}

impl fmt::Debug for TransportSecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSecurityContext")
            .field("common_name", &self.common_name)
            .field("chain_len", &self.chain_len)
            .finish_non_exhaustive()
    }
}

/// Build the security context from a chain-and-key PEM and a CA PEM.
///
/// The chain file holds the leaf certificate first, any intermediates, and
/// the private key (PKCS#8, PKCS#1 or SEC1). Every certificate in the CA
/// file becomes a trust anchor.
///
/// A truncated file (a section without its END line, or one cut short and
/// followed by the next BEGIN) is `MalformedPem`, as is a chain certificate
/// whose DER does not parse.
pub fn load_credentials(
    chain_and_key_path: &Path,
    ca_path: &Path,
) -> Result<TransportSecurityContext, CredentialError> {
    let chain_pem = read(chain_and_key_path, "certificate chain and key")?;
    let ca_pem = read(ca_path, "CA certificate")?;

    check_sections(chain_and_key_path, &chain_pem)?;
    check_sections(ca_path, &ca_pem)?;

    let chain = parse_certificates(chain_and_key_path, &chain_pem)?;
    if chain.is_empty() {
        return Err(CredentialError::NoCertificate(chain_and_key_path.to_path_buf()));
    }
    check_chain_der(chain_and_key_path, &chain)?;
    let key = parse_private_key(chain_and_key_path, &chain_pem)?;
    let roots = parse_roots(ca_path, &ca_pem)?;

    let common_name = leaf_common_name(&chain[0]);
    let chain_len = chain.len();

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    check_key_matches(&provider, &chain, &key)?;
    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| CredentialError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(classify_tls_error)?;

    info!(
        common_name = common_name.as_deref().unwrap_or("<none>"),
        chain_len,
        "[security] Loaded client credentials from {}",
        chain_and_key_path.display()
    );

    Ok(TransportSecurityContext {
        client_config: Arc::new(config),
        common_name,
        chain_len,
    })
}

fn read(path: &Path, what: &'static str) -> Result<Vec<u8>, CredentialError> {
    std::fs::read(path).map_err(|e| CredentialError::Read {
        what,
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn malformed(path: &Path, reason: impl Into<String>) -> CredentialError {
    CredentialError::MalformedPem {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn describe(error: pem::Error) -> String {
    match error {
        pem::Error::MissingSectionEnd { end_marker } => {
            format!("missing '{}'", String::from_utf8_lossy(&end_marker))
        }
        pem::Error::IllegalSectionStart { line } => {
            format!("illegal section start '{}'", String::from_utf8_lossy(&line))
        }
        other => other.to_string(),
    }
}

/// Reject unbalanced BEGIN/END framing.
fn check_sections(path: &Path, pem_bytes: &[u8]) -> Result<(), CredentialError> {
    let text = String::from_utf8_lossy(pem_bytes);
    let mut open: Option<(&str, usize)> = None;

    for (index, line) in text.lines().enumerate() {
        let line = line.trim_end();
        let line_no = index + 1;
        if let Some(label) = marker(line, "-----BEGIN ") {
            if let Some((current, started)) = open {
                return Err(malformed(
                    path,
                    format!(
                        "line {}: '{}' section started at line {} has no END line before BEGIN {}",
                        line_no, current, started, label
                    ),
                ));
            }
            open = Some((label, line_no));
        } else if let Some(label) = marker(line, "-----END ") {
            match open.take() {
                Some((current, _)) if current == label => {}
                Some((current, started)) => {
                    return Err(malformed(
                        path,
                        format!(
                            "line {}: END {} does not close '{}' started at line {}",
                            line_no, label, current, started
                        ),
                    ))
                }
                None => {
                    return Err(malformed(
                        path,
                        format!("line {}: END {} without BEGIN", line_no, label),
                    ))
                }
            }
        }
    }

    match open {
        Some((label, started)) => Err(malformed(
            path,
            format!("'{}' section started at line {} is truncated", label, started),
        )),
        None => Ok(()),
    }
}

fn marker<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix)?.strip_suffix("-----")
}

fn check_chain_der(path: &Path, chain: &[CertificateDer<'_>]) -> Result<(), CredentialError> {
    for (index, cert) in chain.iter().enumerate() {
        if let Err(e) = x509_parser::parse_x509_certificate(cert.as_ref()) {
            return Err(malformed(
                path,
                format!("certificate #{} is not valid DER: {}", index + 1, e),
            ));
        }
    }
    Ok(())
}

fn parse_certificates(
    path: &Path,
    pem_bytes: &[u8],
) -> Result<Vec<CertificateDer<'static>>, CredentialError> {
    CertificateDer::pem_slice_iter(pem_bytes)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| malformed(path, describe(e)))
}

fn parse_private_key(
    path: &Path,
    pem_bytes: &[u8],
) -> Result<PrivateKeyDer<'static>, CredentialError> {
    PrivateKeyDer::from_pem_slice(pem_bytes).map_err(|e| match e {
        pem::Error::NoItemsFound => CredentialError::NoPrivateKey(path.to_path_buf()),
        other => malformed(path, describe(other)),
    })
}

fn parse_roots(path: &Path, pem_bytes: &[u8]) -> Result<RootCertStore, CredentialError> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(path, pem_bytes)? {
        if let Err(e) = roots.add(cert) {
            debug!("[security] Skipping unusable CA certificate in {}: {}", path.display(), e);
        }
    }
    if roots.is_empty() {
        return Err(CredentialError::NoCaCertificate(PathBuf::from(path)));
    }
    Ok(roots)
}

fn check_key_matches(
    provider: &CryptoProvider,
    chain: &[CertificateDer<'static>],
    key: &PrivateKeyDer<'static>,
) -> Result<(), CredentialError> {
    let signing_key = provider
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(classify_tls_error)?;
    match CertifiedKey::new(chain.to_vec(), signing_key).keys_match() {
        Ok(()) | Err(rustls::Error::InconsistentKeys(InconsistentKeys::Unknown)) => Ok(()),
        Err(e) => Err(classify_tls_error(e)),
    }
}

fn classify_tls_error(error: rustls::Error) -> CredentialError {
    match error {
        rustls::Error::InconsistentKeys(_) => CredentialError::KeyMismatch(error.to_string()),
        other => CredentialError::Tls(other.to_string()),
    }
}

/// Common name of a DER certificate's subject.
pub fn leaf_common_name(cert: &CertificateDer<'_>) -> Option<String> {
    let (_, parsed) = x509_parser::parse_x509_certificate(cert.as_ref()).ok()?;
    let cn = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    cn
}
