//! Command listener: one blocking UDP receive loop per drone.

use log::{debug, warn};
use std::borrow::Cow;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::interpreter::Interpreter;
use crate::state::{lock, SharedState};

/// Larger than any command line a client sends.
const MAX_DATAGRAM: usize = 2048;

pub struct CommandListener {
    name: String,
    socket: UdpSocket,
    state: SharedState,
    interpreter: Interpreter,
    stop: Arc<AtomicBool>,
}

impl CommandListener {
    pub fn new(
        name: String,
        socket: UdpSocket,
        state: SharedState,
        interpreter: Interpreter,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name,
            socket,
            state,
            interpreter,
            stop,
        }
    }

    /// Serve commands until the stop flag is raised.
    ///
    /// No read timeout: shutdown wakes the socket with an empty datagram.
    pub fn run(self) {
        let mut buf = [0u8; MAX_DATAGRAM];

        loop {
            let received = self.socket.recv_from(&mut buf);
            if self.stop.load(Ordering::Acquire) {
                break;
            }
            match received {
                Ok((n, from)) => {
                    if let Some(reply) = self.handle(&buf[..n], from) {
                        self.send_reply(&reply, from);
                    }
                }
                // ICMP port-unreachable from an earlier reply surfaces here on some platforms.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    warn!("[{}] receive failed: {e}", self.name);
                    // avoid spinning on a persistent error
                    thread::sleep(Duration::from_millis(5));
                }
            }
        }
        debug!("[{}] command listener stopped", self.name);
    }

    /// Decode and interpret one datagram. `None` means drop without a reply.
    pub fn handle(&self, payload: &[u8], from: SocketAddr) -> Option<String> {
        if payload.is_empty() {
            return None;
        }
        let line = match std::str::from_utf8(payload) {
            Ok(line) => line,
            Err(e) => {
                warn!(
                    "[{}] dropping {} byte non-UTF-8 datagram from {from}: {e}",
                    self.name,
                    payload.len()
                );
                return None;
            }
        };

        let reply = {
            let mut state = lock(&self.state);
            self.interpreter.interpret_from(&mut state, line, from)
        };
        debug!("[{}] {from} `{}` -> `{reply}`", self.name, loggable(line));
        Some(reply)
    }

    fn send_reply(&self, reply: &str, to: SocketAddr) {
        if let Err(e) = self.socket.send_to(reply.as_bytes(), to) {
            warn!("[{}] reply to {to} failed: {e}", self.name);
        }
    }
}

/// The line as it may appear in logs: `wifi` passwords are masked.
fn loggable(line: &str) -> Cow<'_, str> {
    let line = line.trim();
    let mut tokens = line.split_whitespace();
    match (tokens.next(), tokens.next()) {
        (Some("wifi"), Some(ssid)) => Cow::Owned(format!("wifi {ssid} ***")),
        _ => Cow::Borrowed(line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::state::{test_identity, DroneState};
    use std::sync::Mutex;

    fn listener() -> CommandListener {
        let config = SimConfig::default();
        CommandListener::new(
            "drone-0".into(),
            UdpSocket::bind("127.0.0.1:0").unwrap(),
            Arc::new(Mutex::new(DroneState::new(test_identity(), &config))),
            Interpreter::new(&config),
            Arc::new(AtomicBool::new(false)),
        )
    }

    fn client() -> SocketAddr {
        "127.0.0.1:45454".parse().unwrap()
    }

    #[test]
    fn malformed_datagrams_are_dropped() {
        let l = listener();
        assert_eq!(l.handle(&[0xff, 0xfe, 0x00], client()), None);
        assert_eq!(l.handle(&[], client()), None);
        assert_eq!(lock(&l.state).peer(), None);
    }

    #[test]
    fn logged_lines_mask_wifi_passwords() {
        assert_eq!(loggable(" wifi lab hunter2\r\n"), "wifi lab ***");
        assert_eq!(loggable("up 50\n"), "up 50");
        assert_eq!(loggable("wifi"), "wifi");
    }

    #[test]
    fn commands_are_answered_and_record_the_peer() {
        let l = listener();
        assert_eq!(l.handle(b"command", client()).as_deref(), Some("ok"));
        assert_eq!(l.handle(b"takeoff\r\n", client()).as_deref(), Some("ok"));
        assert_eq!(lock(&l.state).peer(), Some(client()));
        assert!(lock(&l.state).flying());
    }
}
