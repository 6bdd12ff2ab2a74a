//! Line echo with a connection summary banner.

use crate::handler::{HandlerError, ProtocolHandler};
use crate::net::connection::{Connection, ConnectionInfo};

/// Echoes every line back; a line starting with `q` ends the connection.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl ProtocolHandler for EchoHandler {
    fn receive(&self, conn: &mut Connection, info: &ConnectionInfo) -> Result<(), HandlerError> {
        conn.send(&format!("local_port      => {:?}", info.listen_spec))?;
        conn.send(&format!("local_hostname  => {:?}", info.local_hostname))?;
        conn.send(&format!("remote_port     => {:?}", info.remote_port.to_string()))?;
        conn.send(&format!("remote_hostname => {:?}", info.remote_hostname))?;
        conn.send(&format!("remote_ip       => {:?}", info.remote_ip.to_string()))?;
        conn.send(" ")?;
        conn.send("Type 'q' to quit this connection only.")?;
        conn.send(" ")?;

        while let Some(line) = conn.recv()? {
            conn.send(&line)?;
            if line.starts_with('q') {
                return Err(HandlerError::Quit);
            }
        }
        Ok(())
    }
}
