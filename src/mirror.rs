//! Snapshot mirror: periodically sends every drone's snapshot as a JSON
//! datagram to one observer address.

use log::{debug, info, warn};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::state::{lock, SharedState};

pub struct SnapshotMirror {
    target: SocketAddr,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SnapshotMirror {
    pub fn start(
        states: Vec<SharedState>,
        target: SocketAddr,
        interval: Duration,
    ) -> io::Result<Self> {
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };
        let sock = UdpSocket::bind(bind)?;
        sock.connect(target)?;

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("snapshot-mirror".into())
            .spawn(move || run(sock, states, interval, flag))?;

        info!("mirroring snapshots to {target} every {} ms", interval.as_millis());
        Ok(Self {
            target,
            stop,
            handle: Some(handle),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("snapshot mirror thread panicked");
            }
        }
    }
}

impl Drop for SnapshotMirror {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(sock: UdpSocket, states: Vec<SharedState>, interval: Duration, stop: Arc<AtomicBool>) {
    let mut sent: u64 = 0;
    while !stop.load(Ordering::Acquire) {
        for state in &states {
            let snapshot = lock(state).snapshot();
            let payload = match serde_json::to_vec(&snapshot) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("[{}] snapshot encode failed: {e}", snapshot.name);
                    continue;
                }
            };
            match sock.send(&payload) {
                Ok(_) => sent += 1,
                // nobody listening yet
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {}
                Err(e) => warn!("snapshot send failed: {e}"),
            }
        }
        thread::sleep(interval);
    }
    debug!("snapshot mirror stopped after {sent} datagrams");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;
    use crate::state::{test_identity, DroneState};
    use std::sync::Mutex;

    #[test]
    fn mirrors_json_snapshots() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let state: SharedState = Arc::new(Mutex::new(DroneState::new(
            test_identity(),
            &SimConfig::default(),
        )));

        let mut mirror = SnapshotMirror::start(
            vec![state],
            receiver.local_addr().unwrap(),
            Duration::from_millis(20),
        )
        .unwrap();

        let mut buf = [0u8; 1024];
        let n = receiver.recv(&mut buf).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&buf[..n]).unwrap();
        assert_eq!(json["name"], "drone-0");
        assert_eq!(json["status"], "OK");
        assert_eq!(json["battery"], 100.0);
        assert_eq!(json["flying"], false);

        mirror.shutdown();
        mirror.shutdown();
    }
}
