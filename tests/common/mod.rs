//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::unistd::{Group, Uid, User};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use tempfile::{NamedTempFile, TempDir};

use net_server::config::ServerConfig;
use net_server::net::TlsMaterial;

/// Self-signed certificate for "localhost", kept on disk while alive.
pub struct TestCert {
    pub cert_file: NamedTempFile,
    pub key_file: NamedTempFile,
    pub der: CertificateDer<'static>,
}

impl TestCert {
    pub fn generate() -> Self {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();
        let mut cert_file = NamedTempFile::new().unwrap();
        let mut key_file = NamedTempFile::new().unwrap();
        cert_file.write_all(certified.cert.pem().as_bytes()).unwrap();
        key_file
            .write_all(certified.key_pair.serialize_pem().as_bytes())
            .unwrap();
        cert_file.flush().unwrap();
        key_file.flush().unwrap();

        Self {
            cert_file,
            key_file,
            der: certified.cert.der().clone(),
        }
    }

    pub fn material(&self) -> TlsMaterial {
        TlsMaterial::from_pem_files(self.cert_file.path(), self.key_file.path()).unwrap()
    }

    /// Client-side TLS over `tcp`, trusting only this certificate.
    pub fn client(&self, tcp: TcpStream) -> StreamOwned<ClientConnection, TcpStream> {
        let mut roots = RootCertStore::empty();
        roots.add(self.der.clone()).unwrap();
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let name = ServerName::try_from("localhost").unwrap();
        let conn = ClientConnection::new(Arc::new(config), name).unwrap();
        StreamOwned::new(conn, tcp)
    }
}

/// Read one CRLF-terminated line byte by byte, so nothing past it is consumed.
pub fn read_line<R: Read>(reader: &mut R) -> Option<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return if line.is_empty() { None } else { Some(lossy(&line)) },
            Ok(_) if byte[0] == b'\n' => return Some(lossy(&line)),
            Ok(_) => line.push(byte[0]),
            Err(e) => panic!("read failed: {e}"),
        }
    }
}

fn lossy(line: &[u8]) -> String {
    String::from_utf8_lossy(line).trim_end_matches('\r').to_string()
}

/// The unprivileged identity connection processes use when tests run as root.
pub fn unprivileged_identity() -> Option<(String, String)> {
    let user = User::from_name("nobody").ok()??;
    let group = Group::from_gid(user.gid).ok()??;
    Some((user.name, group.name))
}

pub fn is_root() -> bool {
    Uid::current().is_root()
}

/// Server config for tests: loopback listeners, no TLS, pid file in a temp dir.
pub fn server_config(listen: &[&str]) -> (ServerConfig, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = ServerConfig {
        server_name: "test.example.com".into(),
        listen: listen.iter().map(|s| s.to_string()).collect(),
        pid_file: dir.path().join("pid"),
        idle_timeout_secs: 10,
        listen_backlog: 16,
        ..ServerConfig::default()
    };
    config.tls.enabled = false;

    if is_root() {
        let (user, group) = unprivileged_identity().expect("root tests need a 'nobody' user");
        config.user = Some(user);
        config.group = Some(group);
        config.working_directory = PathBuf::from("/");
    }
    (config, dir)
}

/// A loopback port that was free a moment ago.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Poll `check` until it returns true or `timeout` passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    check()
}
