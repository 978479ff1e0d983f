//! Transport security for both drivers.
//!
//! `ssl_mode` uses PostgreSQL's `sslmode` vocabulary. PostgreSQL gets a
//! rustls connector from [`postgres_tls`]; MariaDB gets `mysql_async` options
//! from [`mariadb_ssl_opts`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, warn};

use crate::error::{QualityError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Plain TCP.
    #[default]
    Disable,
    /// Encrypted, server certificate not checked.
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn parse(s: &str) -> Result<Self> {
        s.parse()
    }

    pub fn is_encrypted(&self) -> bool {
        *self != SslMode::Disable
    }

    fn checks_certificate(&self) -> bool {
        matches!(self, SslMode::VerifyCa | SslMode::VerifyFull)
    }
}

impl FromStr for SslMode {
    type Err = QualityError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "disable" => Ok(SslMode::Disable),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(QualityError::Config(format!(
                "ssl_mode '{}' is not one of disable, require, verify-ca, verify-full",
                other
            ))),
        }
    }
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SslMode::Disable => "disable",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        })
    }
}

/// `mysql_async` TLS options for a MariaDB pool, `None` for plain TCP.
///
/// `verify-ca` skips the hostname check, which `mysql_async` supports directly.
pub fn mariadb_ssl_opts(mode: SslMode) -> Option<mysql_async::SslOpts> {
    let opts = mysql_async::SslOpts::default();
    match mode {
        SslMode::Disable => None,
        SslMode::Require => Some(opts.with_danger_accept_invalid_certs(true)),
        SslMode::VerifyCa => Some(opts.with_danger_skip_domain_validation(true)),
        SslMode::VerifyFull => Some(opts),
    }
}

/// rustls connector for a PostgreSQL pool, `None` for plain TCP.
pub fn postgres_tls(mode: SslMode) -> Result<Option<MakeRustlsConnect>> {
    if !mode.is_encrypted() {
        return Ok(None);
    }
    Ok(Some(MakeRustlsConnect::new(client_config(mode))))
}

fn client_config(mode: SslMode) -> ClientConfig {
    if !mode.checks_certificate() {
        warn!("ssl_mode={} does not verify the PostgreSQL server certificate", mode);
        return ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth();
    }

    // rustls has no CA-only mode; verify-ca also checks the hostname.
    debug!("ssl_mode={}: verifying against the webpki root store", mode);
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

/// Verifier behind `ssl_mode=require`.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes() {
        assert_eq!(SslMode::parse("").unwrap(), SslMode::Disable);
        assert_eq!(SslMode::parse(" Require ").unwrap(), SslMode::Require);
        assert_eq!("verify-ca".parse::<SslMode>().unwrap(), SslMode::VerifyCa);
        assert_eq!(SslMode::parse("VERIFY-FULL").unwrap(), SslMode::VerifyFull);

        let err = SslMode::parse("prefer").unwrap_err();
        assert!(matches!(err, QualityError::Config(ref m) if m.contains("prefer")));
    }

    #[test]
    fn test_display_round_trips() {
        for mode in [SslMode::Disable, SslMode::Require, SslMode::VerifyCa, SslMode::VerifyFull] {
            assert_eq!(SslMode::parse(&mode.to_string()).unwrap(), mode);
        }
    }

    #[test]
    fn test_plain_tcp_has_no_tls() {
        assert!(postgres_tls(SslMode::Disable).unwrap().is_none());
        assert!(mariadb_ssl_opts(SslMode::Disable).is_none());
        assert!(mariadb_ssl_opts(SslMode::VerifyFull).is_some());
    }

    #[test]
    fn test_encrypted_modes_build_connector() {
        assert!(postgres_tls(SslMode::Require).unwrap().is_some());
        assert!(postgres_tls(SslMode::VerifyFull).unwrap().is_some());
    }
}
