//! Throwaway CA, client and server certificates for adapter tests.

use std::io::Write;

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use tempfile::NamedTempFile;

#[cfg(feature = "http")]
use super::security::{load_credentials, TransportSecurityContext};

pub(crate) struct Pki {
    pub ca_pem: String,
    pub client_cert_pem: String,
    pub client_key_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
}

/// CA plus a client certificate for `common_name` and a server
/// certificate for `localhost` / `127.0.0.1`, both signed by the CA.
pub(crate) fn generate_pki(common_name: &str) -> Pki {
    let ca_key = KeyPair::generate().unwrap();
    let mut ca_params = CertificateParams::new(Vec::<String>::new()).unwrap();
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "Test Actor CA");
    let ca_cert = ca_params.self_signed(&ca_key).unwrap();

    let client_key = KeyPair::generate().unwrap();
    let mut client_params = CertificateParams::new(vec![common_name.to_string()]).unwrap();
    client_params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    let client_cert = client_params
        .signed_by(&client_key, &ca_cert, &ca_key)
        .unwrap();

    let server_key = KeyPair::generate().unwrap();
    let mut server_params =
        CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()]).unwrap();
    server_params
        .distinguished_name
        .push(DnType::CommonName, "Test Actor API");
    let server_cert = server_params
        .signed_by(&server_key, &ca_cert, &ca_key)
        .unwrap();

    Pki {
        ca_pem: ca_cert.pem(),
        client_cert_pem: client_cert.pem(),
        client_key_pem: client_key.serialize_pem(),
        server_cert_pem: server_cert.pem(),
        server_key_pem: server_key.serialize_pem(),
    }
}

pub(crate) fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

impl Pki {
    /// Client context loaded from files, the way the runtime does it.
    #[cfg(feature = "http")]
    pub fn client_context(&self) -> TransportSecurityContext {
        let chain = write_temp(&format!("{}{}", self.client_cert_pem, self.client_key_pem));
        let ca = write_temp(&self.ca_pem);
        load_credentials(chain.path(), ca.path()).unwrap()
    }

    /// TLS 1.3 server config that demands a client certificate from this CA.
    #[cfg(feature = "http")]
    pub fn server_config(&self) -> std::sync::Arc<rustls::ServerConfig> {
        use std::sync::Arc;

        use rustls::server::WebPkiClientVerifier;
        use rustls::{RootCertStore, ServerConfig};
        use rustls_pki_types::pem::PemObject;
        use rustls_pki_types::{CertificateDer, PrivateKeyDer};

        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let mut roots = RootCertStore::empty();
        for cert in CertificateDer::pem_slice_iter(self.ca_pem.as_bytes()) {
            roots.add(cert.unwrap()).unwrap();
        }
        let verifier =
            WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
                .build()
                .unwrap();

        let chain = CertificateDer::pem_slice_iter(self.server_cert_pem.as_bytes())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let key = PrivateKeyDer::from_pem_slice(self.server_key_pem.as_bytes()).unwrap();

        let config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13])
            .unwrap()
            .with_client_cert_verifier(verifier)
            .with_single_cert(chain, key)
            .unwrap();
        Arc::new(config)
    }
}
