//! TLS server configuration for STARTTLS and implicit TLS.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use rcgen::generate_simple_self_signed;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::version::{TLS12, TLS13};
use rustls::{ServerConfig as RustlsServerConfig, SupportedProtocolVersion};
use serde::{Deserialize, Serialize};

/// TLS protocol versions that may be offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsProtocol {
    #[serde(rename = "TLSv1.2")]
    Tls12,
    #[serde(rename = "TLSv1.3")]
    Tls13,
}

impl TlsProtocol {
    fn version(self) -> &'static SupportedProtocolVersion {
        match self {
            TlsProtocol::Tls12 => &TLS12,
            TlsProtocol::Tls13 => &TLS13,
        }
    }
}

impl FromStr for TlsProtocol {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tls12" | "tlsv1.2" | "tls1.2" => Ok(TlsProtocol::Tls12),
            "tls13" | "tlsv1.3" | "tls1.3" => Ok(TlsProtocol::Tls13),
            other => Err(anyhow!("unsupported TLS protocol '{}'", other)),
        }
    }
}

/// Certificate chain and private key for the server.
pub struct TlsIdentity {
    pub certificates: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
}

impl TlsIdentity {
    /// Loads a PEM certificate chain and private key.
    pub fn from_pem_files(certificate_path: &Path, key_path: &Path) -> Result<Self> {
        let mut cert_reader = BufReader::new(File::open(certificate_path).with_context(|| {
            format!("Failed to open certificate file {}", certificate_path.display())
        })?);
        let certificates = rustls_pemfile::certs(&mut cert_reader)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to parse certificates in {}", certificate_path.display()))?;
        if certificates.is_empty() {
            return Err(anyhow!("No certificates found in {}", certificate_path.display()));
        }

        let mut key_reader = BufReader::new(
            File::open(key_path)
                .with_context(|| format!("Failed to open key file {}", key_path.display()))?,
        );
        let private_key = rustls_pemfile::private_key(&mut key_reader)
            .with_context(|| format!("Failed to parse private key in {}", key_path.display()))?
            .ok_or_else(|| anyhow!("No private key found in {}", key_path.display()))?;

        info!(
            "Loaded TLS certificate chain ({} certs) from {}",
            certificates.len(),
            certificate_path.display()
        );
        Ok(Self {
            certificates,
            private_key,
        })
    }

    /// Generates a self-signed certificate for `domain`.
    pub fn self_signed(domain: &str) -> Result<Self> {
        let subject_alt_names = vec![domain.to_string(), "localhost".to_string()];

        let certified_key = generate_simple_self_signed(subject_alt_names)
            .context("Failed to generate self-signed certificate using rcgen")?;

        let cert_der = certified_key.cert.der().to_vec();
        let key_der = certified_key.signing_key.serialize_der();

        info!("Generated self-signed TLS certificate for {}", domain);
        Ok(Self {
            certificates: vec![CertificateDer::from(cert_der)],
            private_key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)),
        })
    }
}

/// Builds a rustls server configuration.
///
/// An empty `protocols` list offers every supported version. A non-empty
/// `cipher_suites` list restricts the provider's suites to those names
/// (e.g. `TLS13_AES_256_GCM_SHA384`), matched case-insensitively.
pub fn build_server_config(
    identity: TlsIdentity,
    protocols: &[TlsProtocol],
    cipher_suites: &[String],
) -> Result<Arc<RustlsServerConfig>> {
    let mut provider = rustls::crypto::aws_lc_rs::default_provider();
    if !cipher_suites.is_empty() {
        provider.cipher_suites.retain(|suite| {
            let name = format!("{:?}", suite.suite());
            cipher_suites.iter().any(|wanted| wanted.eq_ignore_ascii_case(&name))
        });
        if provider.cipher_suites.is_empty() {
            return Err(anyhow!(
                "None of the configured cipher suites are supported: {}",
                cipher_suites.join(", ")
            ));
        }
        debug!("Restricted TLS cipher suites to {:?}", cipher_suites);
    }

    let versions: Vec<&'static SupportedProtocolVersion> = if protocols.is_empty() {
        vec![&TLS12, &TLS13]
    } else {
        protocols.iter().map(|p| p.version()).collect()
    };

    let config = RustlsServerConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&versions)
        .map_err(|e| anyhow!("Failed to select TLS protocol versions: {}", e))?
        .with_no_client_auth()
        .with_single_cert(identity.certificates, identity.private_key)
        .map_err(|e| anyhow!("Failed to create rustls config: {}", e))?;

    Ok(Arc::new(config))
}
