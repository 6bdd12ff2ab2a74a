//! Full `Server::start` lifecycle: pid file, identity check, shutdown.

mod common;

use std::io::BufRead;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use net_server::security::privilege::PrivilegeError;
use net_server::{Connection, ConnectionInfo, HandlerError, Server, ServerError};

fn greeter(conn: &mut Connection, info: &ConnectionInfo) -> Result<(), HandlerError> {
    conn.send(&format!("220 {}", info.server_name))?;
    Ok(())
}

fn greeting(port: u16) -> Option<String> {
    let stream = TcpStream::connect(("127.0.0.1", port)).ok()?;
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok()?;
    let mut line = String::new();
    std::io::BufReader::new(stream).read_line(&mut line).ok()?;
    Some(line.trim_end().to_string())
}

#[test]
fn test_pid_file_lives_exactly_as_long_as_the_server() {
    let port = common::free_port();
    let spec = format!("127.0.0.1:{}", port);
    let (config, dir) = common::server_config(&[spec.as_str()]);
    let pid_path = config.pid_file.clone();

    let server = Server::new(config, greeter);
    let shutdown = server.shutdown_handle();
    let handle = thread::spawn(move || server.start());

    assert!(common::wait_until(Duration::from_secs(5), || greeting(port).is_some()));
    assert_eq!(greeting(port).as_deref(), Some("220 test.example.com"));
    let recorded = std::fs::read_to_string(&pid_path).unwrap();
    assert_eq!(recorded.trim(), std::process::id().to_string());

    shutdown.trigger();
    let result = handle.join().unwrap();
    assert!(result.is_ok());
    assert!(!pid_path.exists());
    drop(dir);
}

#[test]
fn test_unwritable_pid_file_is_not_fatal() {
    let port = common::free_port();
    let spec = format!("127.0.0.1:{}", port);
    let (mut config, _dir) = common::server_config(&[spec.as_str()]);
    config.pid_file = "/nonexistent-directory/for-sure/pid".into();

    let server = Server::new(config, greeter);
    let shutdown = server.shutdown_handle();
    let handle = thread::spawn(move || server.start());

    assert!(common::wait_until(Duration::from_secs(5), || greeting(port).is_some()));
    shutdown.trigger();
    assert!(handle.join().unwrap().is_ok());
}

#[test]
fn test_missing_tls_material_stops_startup() {
    let (mut config, _dir) = common::server_config(&["127.0.0.1:0"]);
    config.tls.enabled = true;
    config.tls.private_key_path = "/nonexistent/server.key".into();
    config.tls.certificate_path = Some("/nonexistent/server.crt".into());
    let pid_path = config.pid_file.clone();

    let result = Server::new(config, greeter).start();
    assert!(matches!(result, Err(ServerError::TlsMaterial(_))));
    assert!(!pid_path.exists());
}

#[test]
fn test_superuser_without_identity_never_listens() {
    if !common::is_root() {
        eprintln!("skipping: needs to run as root");
        return;
    }
    let port = common::free_port();
    let spec = format!("127.0.0.1:{}", port);
    let (mut config, _dir) = common::server_config(&[spec.as_str()]);
    config.user = None;
    config.group = None;
    let pid_path = config.pid_file.clone();

    let result = Server::new(config, greeter).start();
    assert!(matches!(
        result,
        Err(ServerError::Privilege(PrivilegeError::SuperuserWithoutRunAs))
    ));
    assert!(!pid_path.exists());
    assert!(TcpStream::connect(("127.0.0.1", port)).is_err());
}
