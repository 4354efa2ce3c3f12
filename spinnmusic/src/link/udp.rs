//! Live-spikes connection over UDP.
//!
//! One socket serves both directions. A receive thread polls it and hands
//! every decoded frame to the listener registered for the frame's label;
//! [`SpikeConnection`] calls send on a duplicate handle from the caller's
//! thread.
//!
//! The remote endpoint is either configured up front or learned from the
//! sender of the first START frame.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mio::{Events, Interest, Poll, Token};
use parking_lot::Mutex;

use super::protocol::{LiveFrame, MAX_FRAME_SIZE, decode_frame, encode_frame};
use super::{LinkError, LiveSpikesListener, SpikeConnection};
use crate::net::{Endpoint, UdpSocket};
use crate::queue::UnitId;
use crate::trace::{debug, error, info, trace, warn};

const RX: Token = Token(0);

/// How long the receive thread blocks before rechecking for shutdown.
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Socket settings.
#[derive(Debug, Clone, Default)]
pub struct UdpLinkConfig {
    /// Local address to receive notifications on.
    pub bind: Endpoint,
    /// Where to send spikes; learned from the first START when `None`.
    pub remote: Option<Endpoint>,
    /// Kernel receive buffer size, if the default should be overridden.
    pub recv_buffer_size: Option<usize>,
}

type Listeners = HashMap<String, Arc<dyn LiveSpikesListener>>;

struct Shared {
    socket: UdpSocket,
    remote: Mutex<Option<Endpoint>>,
    listeners: Mutex<Listeners>,
    sequence: AtomicU32,
    shutdown: AtomicBool,
}

impl Shared {
    fn send(&self, frame: &LiveFrame) -> Result<(), LinkError> {
        let remote = (*self.remote.lock()).ok_or(LinkError::NoRemote)?;
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut buf = Vec::with_capacity(64);
        encode_frame(frame, sequence, &mut buf)?;
        if self.socket.try_send_to(&buf, remote)?.is_none() {
            warn!(remote = %remote, label = frame.label(), "send buffer full, frame dropped");
        }
        Ok(())
    }

    fn listener(&self, label: &str) -> Option<Arc<dyn LiveSpikesListener>> {
        let listener = self.listeners.lock().get(label).cloned();
        if listener.is_none() {
            debug!(label, "no listener registered for label");
        }
        listener
    }
}

impl SpikeConnection for Shared {
    fn send_spike(&self, label: &str, id: UnitId) -> Result<(), LinkError> {
        self.send(&LiveFrame::Inject {
            label: label.to_owned(),
            ids: vec![id],
        })
    }

    fn continue_run(&self, label: &str) -> Result<(), LinkError> {
        self.send(&LiveFrame::Continue {
            label: label.to_owned(),
        })
    }
}

/// Receive-thread state.
struct RxThread {
    shared: Arc<Shared>,
    socket: UdpSocket,
    poll: Poll,
    recv_buf: Vec<u8>,
    expected_seq: Option<u32>,
}

impl RxThread {
    fn run(&mut self) {
        let mut events = Events::with_capacity(16);
        while !self.shared.shutdown.load(Ordering::Acquire) {
            if let Err(e) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if e.kind() == std::io::ErrorKind::Interrupted {
                    continue;
                }
                error!(error = %e, "poll failed, receive thread exiting");
                return;
            }
            if events.is_empty() {
                continue;
            }
            self.drain();
        }
    }

    /// Reads until the socket would block (mio readiness is edge-triggered).
    fn drain(&mut self) {
        loop {
            match self.socket.try_recv_from(&mut self.recv_buf) {
                Ok(Some((len, from))) => self.handle_datagram(len, from),
                Ok(None) => return,
                Err(_e) => {
                    warn!(error = %_e, "receive failed");
                    return;
                }
            }
        }
    }

    fn handle_datagram(&mut self, len: usize, from: Endpoint) {
        let (frame, sequence) = match decode_frame(&self.recv_buf[..len]) {
            Ok(decoded) => decoded,
            Err(_e) => {
                warn!(from = %from, error = %_e, "malformed frame");
                return;
            }
        };
        if let Some(expected) = self.expected_seq
            && expected != sequence
        {
            debug!(from = %from, expected, got = sequence, "sequence gap");
        }
        self.expected_seq = Some(sequence.wrapping_add(1));

        match frame {
            LiveFrame::Start { label } => {
                {
                    let mut remote = self.shared.remote.lock();
                    if remote.is_none() {
                        info!(remote = %from, "remote endpoint learned");
                        *remote = Some(from);
                    }
                }
                info!(label, "START received");
                if let Some(listener) = self.shared.listener(&label) {
                    let connection: Arc<dyn SpikeConnection> = Arc::clone(&self.shared) as _;
                    listener.spikes_start(&label, connection);
                }
            }
            LiveFrame::Stop { label } => {
                info!(label, "STOP received");
                if let Some(listener) = self.shared.listener(&label) {
                    listener.spikes_stop(&label);
                }
                debug!(label, "STOP acknowledged");
            }
            LiveFrame::Spikes {
                label,
                time_ms,
                ids,
            } => {
                trace!(label, time_ms, count = ids.len(), "SPIKES received");
                if let Some(listener) = self.shared.listener(&label) {
                    listener.receive_spikes(&label, time_ms, &ids);
                }
            }
            _other @ (LiveFrame::Continue { .. } | LiveFrame::Inject { .. }) => {
                debug!(from = %from, label = _other.label(), "ignoring device-bound frame");
            }
        }
    }
}

/// A live-spikes connection with its receive thread.
///
/// Dropping the connection stops the receive thread.
pub struct UdpLiveConnection {
    shared: Arc<Shared>,
    local: Endpoint,
    rx_handle: Option<JoinHandle<()>>,
}

impl UdpLiveConnection {
    /// Binds the socket and starts the receive thread.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Io`] if the socket cannot be bound or registered
    /// and [`LinkError::Spawn`] if the thread cannot be started.
    pub fn spawn(config: UdpLinkConfig) -> Result<Self, LinkError> {
        let mut rx_socket = UdpSocket::bind(config.bind).map_err(|e| {
            error!(bind = %config.bind, error = %e, "failed to bind UDP socket");
            LinkError::Io(e)
        })?;
        if let Some(size) = config.recv_buffer_size {
            rx_socket.set_recv_buffer_size(size)?;
        }
        let local = rx_socket.local_addr()?;
        let tx_socket = rx_socket.try_clone()?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut rx_socket, RX, Interest::READABLE)?;

        let shared = Arc::new(Shared {
            socket: tx_socket,
            remote: Mutex::new(config.remote),
            listeners: Mutex::new(HashMap::new()),
            sequence: AtomicU32::new(0),
            shutdown: AtomicBool::new(false),
        });

        let mut rx = RxThread {
            shared: Arc::clone(&shared),
            socket: rx_socket,
            poll,
            recv_buf: vec![0u8; MAX_FRAME_SIZE],
            expected_seq: None,
        };
        let rx_handle = thread::Builder::new()
            .name("spinnmusic-rx".into())
            .spawn(move || {
                debug!("receive thread started");
                rx.run();
                debug!("receive thread exiting");
            })
            .map_err(|e| LinkError::Spawn(e.to_string()))?;

        info!(local = %local, remote = ?config.remote, "live-spikes link up");
        Ok(Self {
            shared,
            local,
            rx_handle: Some(rx_handle),
        })
    }

    /// The bound local address.
    #[must_use]
    pub fn local_addr(&self) -> Endpoint {
        self.local
    }

    /// The current remote endpoint, if known.
    #[must_use]
    pub fn remote(&self) -> Option<Endpoint> {
        *self.shared.remote.lock()
    }

    /// Routes notifications for `label` to `listener`, replacing any previous one.
    pub fn register(&self, label: impl Into<String>, listener: Arc<dyn LiveSpikesListener>) {
        let label = label.into();
        debug!(label, "listener registered");
        self.shared.listeners.lock().insert(label, listener);
    }

    /// The sending half, as handed to listeners on START.
    #[must_use]
    pub fn connection(&self) -> Arc<dyn SpikeConnection> {
        Arc::clone(&self.shared) as _
    }

    /// Stops the receive thread and waits for it.
    pub fn close(mut self) {
        self.stop_rx();
    }

    fn stop_rx(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.rx_handle.take() {
            let _ = handle.join();
        }
        // Listeners hold connections that point back at `shared`.
        self.shared.listeners.lock().clear();
    }
}

impl Drop for UdpLiveConnection {
    fn drop(&mut self) {
        self.stop_rx();
    }
}

impl std::fmt::Debug for UdpLiveConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpLiveConnection")
            .field("local", &self.local)
            .field("remote", &self.remote())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Start(String),
        Stop(String),
        Spikes(String, i32, Vec<u32>),
    }

    struct Forward(Mutex<mpsc::Sender<Seen>>);

    impl LiveSpikesListener for Forward {
        fn spikes_start(&self, label: &str, connection: Arc<dyn SpikeConnection>) {
            connection.send_spike(label, UnitId::new(11)).unwrap();
            let _ = self.0.lock().send(Seen::Start(label.to_owned()));
        }

        fn spikes_stop(&self, label: &str) {
            let _ = self.0.lock().send(Seen::Stop(label.to_owned()));
        }

        fn receive_spikes(&self, label: &str, time_ms: i32, ids: &[UnitId]) {
            let ids = ids.iter().map(|id| id.get()).collect();
            let _ = self.0.lock().send(Seen::Spikes(label.to_owned(), time_ms, ids));
        }
    }

    fn send(socket: &UdpSocket, to: Endpoint, frame: &LiveFrame) {
        let mut buf = Vec::new();
        encode_frame(frame, 0, &mut buf).unwrap();
        socket.try_send_to(&buf, to).unwrap().unwrap();
    }

    fn recv(socket: &UdpSocket) -> LiveFrame {
        let mut buf = vec![0u8; MAX_FRAME_SIZE];
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if let Some((n, _)) = socket.try_recv_from(&mut buf).unwrap() {
                return decode_frame(&buf[..n]).unwrap().0;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("no frame received");
    }

    #[test]
    fn dispatches_by_label_and_learns_remote() {
        let link = UdpLiveConnection::spawn(UdpLinkConfig {
            bind: Endpoint::localhost(0),
            ..UdpLinkConfig::default()
        })
        .unwrap();
        let (tx, rx) = mpsc::channel();
        link.register("pop", Arc::new(Forward(Mutex::new(tx))));
        assert!(matches!(
            link.connection().send_spike("pop", UnitId::new(1)),
            Err(LinkError::NoRemote)
        ));

        let device = UdpSocket::bind(Endpoint::localhost(0)).unwrap();
        let to = link.local_addr();
        send(&device, to, &LiveFrame::Start { label: "other".into() });
        send(&device, to, &LiveFrame::Start { label: "pop".into() });
        send(
            &device,
            to,
            &LiveFrame::Spikes {
                label: "pop".into(),
                time_ms: 1000,
                ids: vec![UnitId::new(4), UnitId::new(5)],
            },
        );
        send(&device, to, &LiveFrame::Stop { label: "pop".into() });

        let timeout = Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), Seen::Start("pop".into()));
        assert_eq!(
            rx.recv_timeout(timeout).unwrap(),
            Seen::Spikes("pop".into(), 1000, vec![4, 5])
        );
        assert_eq!(rx.recv_timeout(timeout).unwrap(), Seen::Stop("pop".into()));
        assert_eq!(link.remote(), Some(device.local_addr().unwrap()));

        assert_eq!(
            recv(&device),
            LiveFrame::Inject {
                label: "pop".into(),
                ids: vec![UnitId::new(11)],
            }
        );
        link.connection().continue_run("pop").unwrap();
        assert_eq!(recv(&device), LiveFrame::Continue { label: "pop".into() });
        link.close();
    }

    #[test]
    fn close_releases_listeners_and_socket() {
        let link = UdpLiveConnection::spawn(UdpLinkConfig {
            bind: Endpoint::localhost(0),
            ..UdpLinkConfig::default()
        })
        .unwrap();
        let (tx, _rx) = mpsc::channel();
        let listener = Arc::new(Forward(Mutex::new(tx)));
        link.register("pop", Arc::clone(&listener) as Arc<dyn LiveSpikesListener>);
        let shared = Arc::downgrade(&link.shared);
        assert_eq!(Arc::strong_count(&listener), 2);

        link.close();
        assert_eq!(Arc::strong_count(&listener), 1);
        assert!(shared.upgrade().is_none());
    }
}
