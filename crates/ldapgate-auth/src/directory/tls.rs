//! Client TLS configuration for directory connections

use super::DirectoryError;
use ldapgate_core::TlsSettings;
use rustls::pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;
use tracing::{debug, warn};

/// Build the rustls client configuration for `settings`.
///
/// Returns `None` when the connection library defaults apply: TLS off, no
/// custom roots, or verification disabled. A custom configuration would
/// take precedence over the library's skip-verify switch, so none is built
/// in that case.
pub fn client_config(settings: &TlsSettings) -> Result<Option<Arc<ClientConfig>>, DirectoryError> {
    if !settings.enabled {
        return Ok(None);
    }
    let Some(pem) = settings.root_ca.as_deref() else {
        return Ok(None);
    };
    if settings.insecure_skip_verify {
        warn!("root_ca is ignored because certificate verification is disabled");
        return Ok(None);
    }

    let certs = load_root_certs(pem)?;
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(DirectoryError::Tls(
            "root_ca does not contain a usable certificate".into(),
        ));
    }
    if ignored > 0 {
        warn!("Ignored {} unparsable root_ca certificate(s)", ignored);
    }
    debug!("Trusting {} root_ca certificate(s)", added);

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| DirectoryError::Tls(format!("TLS config error: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(Some(Arc::new(config)))
}

fn load_root_certs(pem: &str) -> Result<Vec<CertificateDer<'static>>, DirectoryError> {
    let mut reader = pem.as_bytes();
    rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| DirectoryError::Tls(format!("Failed to parse root_ca: {}", e)))
}
