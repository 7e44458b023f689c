//! Self-signed certificate generation for loopback test servers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::Result;

static CERT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A freshly generated self-signed certificate for `localhost` and
/// `127.0.0.1`, written to PEM files in a private temp directory.
///
/// The certificate doubles as the trust anchor for clients; point the
/// client's CA file at [`cert_path`](Self::cert_path). Files are
/// removed when the value is dropped.
pub struct TestCert {
    dir: PathBuf,
    cert_path: PathBuf,
    key_path: PathBuf,
}

impl TestCert {
    /// Generate a certificate valid for `localhost` and `127.0.0.1`.
    pub fn generate() -> Result<TestCert> {
        let certified_key = rcgen::generate_simple_self_signed(vec![
            "localhost".to_string(),
            "127.0.0.1".to_string(),
        ])?;

        let unique = format!(
            "mqtt-quic-test-{}-{}",
            std::process::id(),
            CERT_COUNTER.fetch_add(1, Ordering::SeqCst)
        );
        let dir = std::env::temp_dir().join(unique);
        std::fs::create_dir_all(&dir)?;

        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, certified_key.cert.pem())?;
        std::fs::write(&key_path, certified_key.signing_key.serialize_pem())?;

        Ok(TestCert {
            dir,
            cert_path,
            key_path,
        })
    }

    /// PEM file holding the certificate (also the client trust anchor).
    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// PEM file holding the private key.
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
}

impl Drop for TestCert {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_pem_files() {
        let cert = TestCert::generate().expect("cert generation");
        let pem = std::fs::read_to_string(cert.cert_path()).unwrap();
        assert!(pem.contains("BEGIN CERTIFICATE"));
        let key = std::fs::read_to_string(cert.key_path()).unwrap();
        assert!(key.contains("PRIVATE KEY"));
    }

    #[test]
    fn files_are_removed_on_drop() {
        let cert = TestCert::generate().expect("cert generation");
        let path = cert.cert_path().to_path_buf();
        drop(cert);
        assert!(!path.exists());
    }
}
