//! Beacon service
//!
//! Announces this node's presence on a fixed period and turns the
//! announcements of others into [`PeerTable`] entries. A failed broadcast is
//! logged and counted; the next tick simply tries again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use gridmesh_core::{Frame, MeshTransport, NodeId, encode_frame};
use gridmesh_routing::PeerTable;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info, info_span, trace, warn};

/// Beacon counters
#[derive(Debug, Default)]
struct BeaconCounters {
    sent: AtomicU64,
    failed: AtomicU64,
    received: AtomicU64,
    self_beacons: AtomicU64,
    invalid: AtomicU64,
}

/// Beacon statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconStats {
    /// Beacons broadcast successfully
    pub sent: u64,
    /// Broadcasts that failed
    pub failed: u64,
    /// Beacons received from other nodes
    pub received: u64,
    /// Our own beacons heard back and discarded
    pub self_beacons: u64,
    /// Beacons carrying a malformed identity
    pub invalid: u64,
}

/// Periodic liveness announcements and their reception
pub struct BeaconService {
    /// Our identity
    local: NodeId,
    /// Where beacons go out
    transport: Arc<dyn MeshTransport>,
    /// Where received beacons land
    peers: Arc<PeerTable>,
    counters: BeaconCounters,
}

impl BeaconService {
    /// Create a beacon service
    pub fn new(local: NodeId, transport: Arc<dyn MeshTransport>, peers: Arc<PeerTable>) -> Self {
        Self {
            local,
            transport,
            peers,
            counters: BeaconCounters::default(),
        }
    }

    /// Broadcast one beacon
    pub async fn broadcast_tick(&self) {
        let frame = match encode_frame(&Frame::beacon(self.local.clone())) {
            Ok(frame) => frame,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to encode beacon");
                return;
            }
        };

        match self.transport.broadcast(frame).await {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                trace!("Beacon sent");
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Beacon broadcast failed, retrying next tick");
            }
        }
    }

    /// Record a beacon heard from `sender`
    ///
    /// Returns `true` if the sender was not a known peer. Our own beacons are
    /// discarded: a node is never its own peer. So are beacons whose sender
    /// is not a well-formed identity.
    pub fn on_beacon_received(&self, sender: NodeId, now: Instant) -> bool {
        if !sender.is_valid() {
            self.counters.invalid.fetch_add(1, Ordering::Relaxed);
            warn!(sender = ?sender.as_str(), "Ignoring beacon with malformed identity");
            return false;
        }
        if sender == self.local {
            self.counters.self_beacons.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let discovered = self.peers.upsert(sender.clone(), now);
        if discovered {
            info!(peer = %sender, peers = self.peers.size(), "Peer discovered");
        } else {
            trace!(peer = %sender, "Peer refreshed");
        }
        discovered
    }

    /// Current statistics
    pub fn stats(&self) -> BeaconStats {
        BeaconStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            received: self.counters.received.load(Ordering::Relaxed),
            self_beacons: self.counters.self_beacons.load(Ordering::Relaxed),
            invalid: self.counters.invalid.load(Ordering::Relaxed),
        }
    }

    /// Spawn the periodic beacon task
    ///
    /// The first beacon goes out immediately.
    pub fn spawn(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!(interval_secs = interval.as_secs(), "Beacon task started");

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Beacon task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.broadcast_tick().await;
                    }
                }
            }
        }
        .instrument(info_span!("beacon")))
    }
}
