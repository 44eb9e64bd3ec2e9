//! TLS certificate loading for `serve_tls`.

use std::io;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

/// Load a rustls server configuration from PEM certificate and key files.
///
/// Missing files are reported with the offending path before rustls gets a
/// chance to produce a less specific parse error.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> io::Result<RustlsConfig> {
    require_file("certificate", cert_path)?;
    require_file("private key", key_path)?;

    RustlsConfig::from_pem_file(cert_path, key_path).await
}

fn require_file(what: &str, path: &Path) -> io::Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{what} file not found: {}", path.display()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_certificate_is_not_found() {
        let err = load_tls_config(
            Path::new("/nonexistent/cert.pem"),
            Path::new("/nonexistent/key.pem"),
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(err.to_string().contains("certificate"));
    }

    #[tokio::test]
    async fn fixture_pair_loads() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        load_tls_config(&dir.join("cert.pem"), &dir.join("key.pem"))
            .await
            .expect("fixture certificate should load");
    }
}
