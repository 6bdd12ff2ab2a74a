//! Identity of connection processes. Only meaningful when run as root.

mod common;

use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use std::time::Duration;

use nix::unistd::{Gid, Uid, User};

use net_server::{Connection, ConnectionInfo, HandlerError, Server};

fn report_identity(conn: &mut Connection, _info: &ConnectionInfo) -> Result<(), HandlerError> {
    conn.send(&format!(
        "{} {} {} {}",
        Uid::current(),
        Uid::effective(),
        Gid::current(),
        Gid::effective()
    ))?;
    Ok(())
}

fn first_line(port: u16) -> Option<String> {
    let stream = TcpStream::connect(("127.0.0.1", port)).ok()?;
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok()?;
    let mut line = String::new();
    let read = BufReader::new(stream).read_line(&mut line).ok()?;
    (read > 0).then(|| line.trim_end().to_string())
}

fn serve(server: Server, port: u16, check: impl FnOnce()) {
    let shutdown = server.shutdown_handle();
    let handle = std::thread::spawn(move || server.start());
    assert!(common::wait_until(Duration::from_secs(5), || {
        TcpStream::connect(("127.0.0.1", port)).is_ok()
    }));
    check();
    shutdown.trigger();
    assert!(handle.join().unwrap().is_ok());
}

#[test]
fn test_connection_process_runs_as_configured_identity() {
    if !common::is_root() {
        eprintln!("skipping: needs to run as root");
        return;
    }
    let port = common::free_port();
    let spec = format!("127.0.0.1:{}", port);
    let (config, _dir) = common::server_config(&[spec.as_str()]);
    let user = User::from_name(config.user.as_deref().unwrap()).unwrap().unwrap();
    let group = nix::unistd::Group::from_name(config.group.as_deref().unwrap())
        .unwrap()
        .unwrap();

    serve(Server::new(config, report_identity), port, || {
        let expected = format!("{} {} {} {}", user.uid, user.uid, group.gid, group.gid);
        assert_eq!(first_line(port), Some(expected));
    });
    // The listening process keeps its own identity.
    assert!(Uid::current().is_root());
}

#[test]
fn test_unknown_identity_refuses_the_connection() {
    if !common::is_root() {
        eprintln!("skipping: needs to run as root");
        return;
    }
    let port = common::free_port();
    let spec = format!("127.0.0.1:{}", port);
    let (mut config, _dir) = common::server_config(&[spec.as_str()]);
    config.user = Some("no-such-user-for-net-server".into());

    serve(Server::new(config, report_identity), port, || {
        assert_eq!(first_line(port), None);
    });
}
