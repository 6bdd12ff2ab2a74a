//! Real signals delivered to a running server. Kept in its own test binary:
//! a SIGTERM reaches every server in the process.

mod common;

use std::io::BufRead;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use net_server::{Connection, ConnectionInfo, HandlerError, Server};

fn greeter(conn: &mut Connection, _info: &ConnectionInfo) -> Result<(), HandlerError> {
    conn.send("220 ready")?;
    Ok(())
}

fn greeting(port: u16) -> Option<String> {
    let stream = TcpStream::connect(("127.0.0.1", port)).ok()?;
    stream.set_read_timeout(Some(Duration::from_secs(5))).ok()?;
    let mut line = String::new();
    let read = std::io::BufReader::new(stream).read_line(&mut line).ok()?;
    (read > 0).then(|| line.trim_end().to_string())
}

#[test]
fn test_child_exit_storm_then_sigterm_stops_the_server() {
    let port = common::free_port();
    let spec = format!("127.0.0.1:{}", port);
    let (config, _dir) = common::server_config(&[spec.as_str()]);
    let pid_path = config.pid_file.clone();

    let handle = thread::spawn(move || Server::new(config, greeter).start());

    // A greeting means a connection was accepted, which only happens after
    // the signal handlers are in place.
    assert!(common::wait_until(Duration::from_secs(5), || greeting(port).is_some()));
    assert!(pid_path.exists());

    for _ in 0..20 {
        kill(Pid::this(), Signal::SIGCHLD).unwrap();
    }
    thread::sleep(Duration::from_millis(100));
    assert_eq!(greeting(port).as_deref(), Some("220 ready"));
    assert!(!handle.is_finished());

    kill(Pid::this(), Signal::SIGTERM).unwrap();
    assert!(
        common::wait_until(Duration::from_secs(5), || handle.is_finished()),
        "server did not stop after SIGTERM"
    );
    assert!(handle.join().unwrap().is_ok());
    assert!(!pid_path.exists());
    assert!(TcpStream::connect(("127.0.0.1", port)).is_err());
}
