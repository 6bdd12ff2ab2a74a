//! A toy SMTP receiver demonstrating the STARTTLS upgrade.
//!
//! Not a mail server: it accepts and discards whatever it is sent.

use crate::handler::{HandlerError, ProtocolHandler};
use crate::net::connection::{Connection, ConnectionInfo};

#[derive(Debug, Default, Clone, Copy)]
pub struct SmtpHandler;

impl ProtocolHandler for SmtpHandler {
    fn receive(&self, conn: &mut Connection, info: &ConnectionInfo) -> Result<(), HandlerError> {
        let host = &info.server_name;
        conn.send(&format!("220 {} ESMTP", host))?;

        while let Some(line) = conn.recv()? {
            let verb = line
                .split_whitespace()
                .next()
                .unwrap_or_default()
                .to_ascii_uppercase();

            match verb.as_str() {
                "QUIT" => {
                    conn.send(&format!("221 2.0.0 OK {} closing connection", host))?;
                    return Ok(());
                }
                "EHLO" => {
                    conn.send(&format!("250-{} Hello", host))?;
                    if conn.tls_available() && !conn.is_encrypted() {
                        conn.send("250-STARTTLS")?;
                    }
                    conn.send("250 HELP")?;
                }
                "HELO" => conn.send(&format!("250 {}", host))?,
                "STARTTLS" if conn.tls_available() && !conn.is_encrypted() => {
                    conn.send("220 2.0.0 TLS go ahead")?;
                    conn.start_handshake()?;
                }
                "STARTTLS" => conn.send("454 4.7.0 TLS not available")?,
                "MAIL" | "RCPT" | "RSET" | "NOOP" => conn.send("250 OK")?,
                "DATA" => {
                    conn.send("354 Enter message, ending with \".\" on a line by itself")?;
                    loop {
                        match conn.recv()? {
                            Some(body) if body == "." => break,
                            Some(_) => {}
                            None => return Ok(()),
                        }
                    }
                    conn.send(&format!("250 OK id={}", info.id))?;
                }
                _ => conn.send("500 5.5.1 Command unrecognized")?,
            }
        }
        Ok(())
    }
}
