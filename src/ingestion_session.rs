use std::net::IpAddr;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::device_identity::DeviceIdentity;
use crate::discovery_listener::{bind_meter_socket, ListenError, TELEGRAM_BUF_SIZE};
use crate::packet_decoder::decode_telegram;
use crate::METER_PORT;

/// Latest-known-value map for one meter, merged from all telegrams seen so
/// far. Partial telegrams only carry a subset of fields, so keys accumulate
/// and are only ever overwritten, never removed.
pub type TelemetrySnapshot = Map<String, Value>;

/// Callback invoked synchronously after each merged telegram. Expected to
/// store or forward the snapshot, not to block.
pub type Subscriber = Box<dyn FnMut(&TelemetrySnapshot) + Send>;

/// Long-lived UDP listener bound to one known meter address.
///
/// Owns the socket, the snapshot and the identity exclusively; all
/// datagrams are processed sequentially on one task, so merges always see a
/// consistent prior state.
pub struct IngestionSession {
    socket: UdpSocket,
    target: IpAddr,
    identity: DeviceIdentity,
    snapshot: TelemetrySnapshot,
    subscriber: Subscriber,
    identity_tx: watch::Sender<DeviceIdentity>,
}

/// Handle to a running [`IngestionSession`], held by the host.
pub struct SessionHandle {
    shutdown: Arc<Notify>,
    join: Option<JoinHandle<()>>,
    identity_rx: watch::Receiver<DeviceIdentity>,
}

impl IngestionSession {
    /// Starts a session on the well-known meter port.
    ///
    /// See [`IngestionSession::start_on`].
    pub async fn start(
        target: IpAddr,
        seed_serial: Option<String>,
        subscriber: Subscriber,
    ) -> Result<SessionHandle, ListenError> {
        Self::start_on(METER_PORT, target, seed_serial, subscriber).await
    }

    /// Binds the meter port and spawns the listening task.
    ///
    /// Fails with [`ListenError::PortBusy`] when something else already
    /// holds the port; the host should treat that as "not ready, retry
    /// setup". `seed_serial` pre-seeds the identity from the persisted
    /// configuration record so the unique ID is stable from the first
    /// packet on.
    pub async fn start_on(
        port: u16,
        target: IpAddr,
        seed_serial: Option<String>,
        subscriber: Subscriber,
    ) -> Result<SessionHandle, ListenError> {
        let socket = bind_meter_socket(port).await?;
        debug!("Ingestion session started on port {port} for meter {target}");

        let identity = DeviceIdentity::new(target, seed_serial);
        let (identity_tx, identity_rx) = watch::channel(identity.clone());
        let shutdown = Arc::new(Notify::new());

        let session = Self {
            socket,
            target,
            identity,
            snapshot: TelemetrySnapshot::new(),
            subscriber,
            identity_tx,
        };

        let join = tokio::spawn(session.run(Arc::clone(&shutdown)));

        Ok(SessionHandle {
            shutdown,
            join: Some(join),
            identity_rx,
        })
    }

    /// Main receive loop. Runs until the handle asks for shutdown; silence
    /// from the meter is not an error, so there is no timeout here.
    async fn run(mut self, shutdown: Arc<Notify>) {
        let mut buf = vec![0u8; TELEGRAM_BUF_SIZE];

        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, addr)) => self.handle_datagram(&buf[..len], addr.ip()),
                    // Receive faults on an unconnected UDP socket are
                    // transient (e.g. ICMP errors surfacing as ECONNRESET);
                    // the session only ends on an explicit stop.
                    Err(e) => {
                        error!("UDP receive error for {}: {e}", self.target);
                    }
                },
            }
        }

        debug!("Ingestion session for {} stopped", self.target);
        // Dropping self closes the socket and releases the port.
    }

    /// Processes one accepted datagram: decode, identity update, merge,
    /// publish.
    fn handle_datagram(&mut self, payload: &[u8], source: IpAddr) {
        if source != self.target {
            return;
        }
        let Some(fields) = decode_telegram(payload, source) else {
            return;
        };

        if self.identity.apply_telegram(&fields) {
            // send_replace never fails, even with no live receivers.
            self.identity_tx.send_replace(self.identity.clone());
        }

        for (key, value) in fields {
            self.snapshot.insert(key, value);
        }

        (self.subscriber)(&self.snapshot);
    }
}

impl SessionHandle {
    /// Latest identity as accumulated from telegrams. The host reads this
    /// back into its configuration record when the serial becomes known.
    pub fn identity(&self) -> DeviceIdentity {
        self.identity_rx.borrow().clone()
    }

    /// Watch channel following identity changes, for hosts that want to
    /// react when the serial or firmware version shows up.
    pub fn identity_updates(&self) -> watch::Receiver<DeviceIdentity> {
        self.identity_rx.clone()
    }

    /// Stops the session and releases the port. Idempotent: calling it on
    /// an already-stopped session does nothing.
    pub async fn stop(&mut self) {
        if let Some(join) = self.join.take() {
            self.shutdown.notify_one();
            if join.await.is_err() {
                error!("Ingestion session task panicked during shutdown");
            }
        }
    }

    /// Whether the session task has been stopped via [`SessionHandle::stop`].
    pub fn is_stopped(&self) -> bool {
        self.join.is_none()
    }
}
