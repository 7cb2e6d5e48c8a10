//! Telemetry broadcaster: fire-and-forget state frames to the telemetry peer.

use log::{debug, trace, warn};
use rand::Rng;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use crate::config::SimConfig;
use crate::telemetry::TelemetryFrame;

/// Where on the peer host telemetry is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TelemetryTarget {
    /// The exact address the last valid command came from.
    #[default]
    Sender,
    /// The sender's IP, on a fixed port (hardware clients listen on 8890).
    FixedPort(u16),
}

impl TelemetryTarget {
    pub fn destination(&self, peer: SocketAddr) -> SocketAddr {
        match *self {
            TelemetryTarget::Sender => peer,
            TelemetryTarget::FixedPort(port) => SocketAddr::new(peer.ip(), port),
        }
    }
}

pub struct TelemetryBroadcaster {
    socket: UdpSocket,
    target: TelemetryTarget,
    interval: Duration,
    baro_noise: f64,
    next_due: Instant,
    sent: u64,
}

impl TelemetryBroadcaster {
    pub fn new(socket: UdpSocket, target: TelemetryTarget, config: &SimConfig) -> Self {
        Self {
            socket,
            target,
            interval: config.broadcast_interval(),
            baro_noise: config.baro_noise.max(0.0),
            next_due: Instant::now(),
            sent: 0,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    /// Frames sent so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Send one frame to `peer` and schedule the next slot.
    ///
    /// Send failures (stale peer, unreachable host) are logged and dropped.
    pub fn broadcast(&mut self, now: Instant, mut frame: TelemetryFrame, peer: SocketAddr) {
        self.next_due += self.interval;
        if self.next_due <= now {
            // Fell behind (slow tick or paused process): resync instead of bursting.
            self.next_due = now + self.interval;
        }

        if self.baro_noise > 0.0 {
            let noise = self.baro_noise;
            frame.jitter_baro(rand::thread_rng().gen_range(-noise..=noise));
        }

        let destination = self.target.destination(peer);
        match self.socket.send_to(frame.to_wire().as_bytes(), destination) {
            Ok(_) => {
                self.sent += 1;
                trace!("telemetry -> {destination}");
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                debug!("telemetry peer {destination} refused: {e}");
            }
            Err(e) => warn!("telemetry send to {destination} failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{test_identity, DroneState};

    fn broadcaster(target: TelemetryTarget) -> TelemetryBroadcaster {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        TelemetryBroadcaster::new(socket, target, &SimConfig::default())
    }

    #[test]
    fn fixed_port_keeps_peer_ip() {
        let peer: SocketAddr = "10.0.0.7:51234".parse().unwrap();
        assert_eq!(TelemetryTarget::Sender.destination(peer), peer);
        assert_eq!(
            TelemetryTarget::FixedPort(8890).destination(peer),
            "10.0.0.7:8890".parse().unwrap()
        );
    }

    #[test]
    fn sends_frame_and_schedules_next() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut b = broadcaster(TelemetryTarget::Sender);
        let now = Instant::now();
        assert!(b.is_due(now));

        let state = DroneState::new(test_identity(), &SimConfig::default());
        b.broadcast(now, TelemetryFrame::from_state(&state), receiver.local_addr().unwrap());
        assert!(!b.is_due(now));
        assert!(b.is_due(now + Duration::from_millis(100)));
        assert_eq!(b.sent(), 1);

        let mut buf = [0u8; 512];
        let (n, from) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(from, b.local_addr().unwrap());
        let frame: TelemetryFrame = std::str::from_utf8(&buf[..n]).unwrap().parse().unwrap();
        assert_eq!(frame.bat, 100);
    }

    #[test]
    fn resyncs_after_falling_behind() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut b = broadcaster(TelemetryTarget::Sender);
        let state = DroneState::new(test_identity(), &SimConfig::default());
        let late = Instant::now() + Duration::from_secs(5);
        b.broadcast(late, TelemetryFrame::from_state(&state), receiver.local_addr().unwrap());
        assert!(!b.is_due(late));
        assert!(!b.is_due(late + Duration::from_millis(50)));
    }
}
