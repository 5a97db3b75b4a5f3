//! TLS certificate loading and development certificate generation.

use herald_core::{HeraldError, HeraldResult};
use std::path::{Path, PathBuf};

/// Load TLS certificate and key from PEM files, returning a rustls ServerConfig.
pub fn load_tls_config(cert_path: &Path, key_path: &Path) -> HeraldResult<rustls::ServerConfig> {
    let cert_pem = std::fs::read(cert_path)
        .map_err(|e| HeraldError::Tls(format!("cannot read cert {}: {e}", cert_path.display())))?;
    let key_pem = std::fs::read(key_path)
        .map_err(|e| HeraldError::Tls(format!("cannot read key {}: {e}", key_path.display())))?;

    let certs: Vec<rustls::pki_types::CertificateDer<'static>> =
        rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| HeraldError::Tls(format!("invalid certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(HeraldError::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| HeraldError::Tls(format!("invalid key PEM: {e}")))?
        .ok_or_else(|| HeraldError::Tls("no private key found in PEM".into()))?;

    let mut tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| HeraldError::Tls(e.to_string()))?;

    // WebSocket upgrades run over HTTP/1.1
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(tls_config)
}

/// Generate a self-signed certificate for development use into `dir`.
pub fn generate_self_signed_cert(dir: &Path) -> HeraldResult<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;

    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");

    let tls_err = |e: rcgen::Error| HeraldError::Tls(format!("certificate generation failed: {e}"));

    let mut params = rcgen::CertificateParams::new(vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ])
    .map_err(tls_err)?;
    params.distinguished_name = rcgen::DistinguishedName::new();
    params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "herald-server dev cert");

    let key_pair = rcgen::KeyPair::generate().map_err(tls_err)?;
    let cert = params.self_signed(&key_pair).map_err(tls_err)?;

    std::fs::write(&cert_path, cert.pem())?;
    std::fs::write(&key_path, key_pair.serialize_pem())?;

    Ok((cert_path, key_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_cert_loads() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, key) = generate_self_signed_cert(dir.path()).unwrap();
        let config = load_tls_config(&cert, &key).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn missing_files_are_tls_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_tls_config(&dir.path().join("c.pem"), &dir.path().join("k.pem")).unwrap_err();
        assert!(matches!(err, HeraldError::Tls(_)));
    }

    #[test]
    fn key_without_pem_block_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (cert, _) = generate_self_signed_cert(dir.path()).unwrap();
        let bogus = dir.path().join("bogus.pem");
        std::fs::write(&bogus, "not a key").unwrap();
        assert!(load_tls_config(&cert, &bogus).is_err());
    }
}
