//! Per-connection I/O bridge.
//!
//! A [`Connection`] registers a [`Peer`] with its hub and then runs two
//! loops over the transport:
//!
//! - the **inbound** loop reads frames under a read-liveness deadline that
//!   only pongs renew, and hands each data frame to the hub's processor
//! - the **outbound** loop drains the peer's queue one text frame at a time,
//!   pings on a fixed period, and sends a close frame once the hub closes
//!   the queue
//!
//! Either loop ending stops the other. Teardown unregisters from the hub and,
//! if the hub reports it became empty, runs the owner's on-empty callback.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use lobby_core::ConnectionId;
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, instrument, warn};

use crate::frame::Frame;
use crate::hub::{HubHandle, Peer};
use crate::metrics::{CONNECTION_DURATION_SECONDS, CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL};

/// Callback run when a connection's teardown leaves its hub empty.
pub type OnEmpty = Arc<dyn Fn() + Send + Sync>;

/// Queue, size and liveness limits for one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Capacity of the outbound queue.
    pub queue_capacity: usize,
    /// Largest inbound data frame accepted, in bytes.
    pub max_message_size: usize,
    /// Deadline for writing one frame.
    pub write_timeout: Duration,
    /// Read-liveness window, renewed by each pong.
    pub pong_timeout: Duration,
    /// Ping period; must be shorter than `pong_timeout`.
    pub ping_period: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        let pong_timeout = Duration::from_secs(120);
        Self {
            queue_capacity: 256,
            max_message_size: 512,
            write_timeout: Duration::from_secs(10),
            pong_timeout,
            ping_period: pong_timeout * 9 / 10,
        }
    }
}

/// Why a connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disconnect {
    /// The peer closed the stream or sent a close frame.
    PeerClosed,
    /// Reading from the transport failed.
    ReadError,
    /// No pong arrived within the read-liveness window.
    ReadTimeout,
    /// The peer sent a data frame over the size limit.
    Oversize,
    /// Writing to the transport failed.
    WriteError,
    /// A write did not complete within the write deadline.
    WriteTimeout,
    /// The hub closed the outbound queue (unregistered, evicted, replaced,
    /// or shut down).
    QueueClosed,
    /// The hub was already gone when the connection tried to register.
    HubClosed,
    /// The other loop ended first.
    Stopped,
}

impl Disconnect {
    /// Label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::ReadError => "read_error",
            Self::ReadTimeout => "read_timeout",
            Self::Oversize => "oversize",
            Self::WriteError => "write_error",
            Self::WriteTimeout => "write_timeout",
            Self::QueueClosed => "queue_closed",
            Self::HubClosed => "hub_closed",
            Self::Stopped => "stopped",
        }
    }
}

/// One transport bound to a hub.
pub struct Connection<Si, St> {
    id: ConnectionId,
    hub: HubHandle,
    sink: Si,
    stream: St,
    on_empty: Option<OnEmpty>,
    registered: Option<(u64, mpsc::Receiver<Bytes>)>,
    options: ConnectionOptions,
}

impl<Si, St, E> Connection<Si, St>
where
    Si: Sink<Frame> + Unpin + Send + 'static,
    Si::Error: Display + Send,
    St: Stream<Item = Result<Frame, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    /// Bind a transport to `hub` under `id`.
    pub fn new(hub: HubHandle, id: ConnectionId, sink: Si, stream: St, options: ConnectionOptions) -> Self {
        Self {
            id,
            hub,
            sink,
            stream,
            on_empty: None,
            registered: None,
            options,
        }
    }

    /// Adopt a peer the caller already registered with the hub, given its
    /// key and queue, instead of registering on [`run`](Self::run).
    #[must_use]
    pub fn registered(mut self, key: u64, queue: mpsc::Receiver<Bytes>) -> Self {
        self.registered = Some((key, queue));
        self
    }

    /// Run `f` if this connection's teardown leaves the hub empty.
    #[must_use]
    pub fn on_empty(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_empty = Some(Arc::new(f));
        self
    }

    /// Use a shared on-empty callback.
    #[must_use]
    pub fn on_empty_shared(mut self, f: OnEmpty) -> Self {
        self.on_empty = Some(f);
        self
    }

    /// Run [`run`](Self::run) on a new task.
    pub fn spawn(self) -> JoinHandle<Disconnect> {
        tokio::spawn(self.run())
    }

    /// Register, pump both directions until either ends, then tear down.
    #[instrument(skip_all, fields(conn_id = %self.id, hub_id = %self.hub.id()))]
    pub async fn run(self) -> Disconnect {
        let Self {
            id,
            hub,
            mut sink,
            mut stream,
            on_empty,
            registered,
            options,
        } = self;

        let (key, queue) = match registered {
            Some(joined) => joined,
            None => {
                let (peer, queue) = Peer::channel(id.clone(), options.queue_capacity);
                let key = peer.key();
                if let Err(err) = hub.register(peer) {
                    warn!(error = %err, "cannot register connection");
                    let _ = timeout(options.write_timeout, sink.send(Frame::Close)).await;
                    return Disconnect::HubClosed;
                }
                (key, queue)
            }
        };

        let started = std::time::Instant::now();
        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).increment(1.0);
        info!("connection opened");

        let stop = CancellationToken::new();
        let writer = tokio::spawn(
            write_loop(sink, queue, options.clone(), stop.clone()).instrument(tracing::Span::current()),
        );
        let read_reason = read_loop(&mut stream, &id, &hub, &options, &stop).await;

        let emptied = hub.unregister(&id, key).await;
        stop.cancel();
        let write_reason = writer.await.unwrap_or(Disconnect::WriteError);
        drop(stream);

        let reason = if read_reason == Disconnect::Stopped {
            write_reason
        } else {
            read_reason
        };

        gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
        counter!(DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        histogram!(CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        info!(reason = reason.as_str(), "connection closed");

        if let (true, Some(callback)) = (emptied, on_empty) {
            debug!("hub is empty");
            callback();
        }
        reason
    }
}

async fn read_loop<St, E>(
    stream: &mut St,
    id: &ConnectionId,
    hub: &HubHandle,
    options: &ConnectionOptions,
    stop: &CancellationToken,
) -> Disconnect
where
    St: Stream<Item = Result<Frame, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + options.pong_timeout;
    loop {
        let next = tokio::select! {
            () = stop.cancelled() => return Disconnect::Stopped,
            next = timeout_at(deadline, stream.next()) => next,
        };
        let frame = match next {
            Err(_) => {
                debug!(timeout = ?options.pong_timeout, "no pong within read window");
                return Disconnect::ReadTimeout;
            }
            Ok(None) => return Disconnect::PeerClosed,
            Ok(Some(Err(err))) => {
                debug!(error = %err, "read failed");
                return Disconnect::ReadError;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Text(payload) | Frame::Binary(payload) => {
                if payload.len() > options.max_message_size {
                    warn!(len = payload.len(), limit = options.max_message_size, "inbound message too large");
                    return Disconnect::Oversize;
                }
                hub.processor().handle_message(id, &payload, hub);
            }
            Frame::Pong(_) => deadline = Instant::now() + options.pong_timeout,
            Frame::Ping(_) => {}
            Frame::Close => return Disconnect::PeerClosed,
        }
    }
}

async fn write_loop<Si>(
    mut sink: Si,
    mut queue: mpsc::Receiver<Bytes>,
    options: ConnectionOptions,
    stop: CancellationToken,
) -> Disconnect
where
    Si: Sink<Frame> + Unpin,
    Si::Error: Display,
{
    let mut ping = interval_at(Instant::now() + options.ping_period, options.ping_period);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            next = queue.recv() => match next {
                Some(payload) => {
                    if let Err(reason) = write(&mut sink, Frame::Text(payload), options.write_timeout).await {
                        break reason;
                    }
                }
                None => {
                    let _ = write(&mut sink, Frame::Close, options.write_timeout).await;
                    break Disconnect::QueueClosed;
                }
            },
            _ = ping.tick() => {
                if let Err(reason) = write(&mut sink, Frame::Ping(Bytes::new()), options.write_timeout).await {
                    break reason;
                }
            }
            () = stop.cancelled() => {
                let _ = write(&mut sink, Frame::Close, options.write_timeout).await;
                break Disconnect::Stopped;
            }
        }
    };
    stop.cancel();
    reason
}

async fn write<Si>(sink: &mut Si, frame: Frame, limit: Duration) -> Result<(), Disconnect>
where
    Si: Sink<Frame> + Unpin,
    Si::Error: Display,
{
    match timeout(limit, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            debug!(error = %err, "write failed");
            Err(Disconnect::WriteError)
        }
        Err(_) => {
            debug!(timeout = ?limit, "write timed out");
            Err(Disconnect::WriteTimeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::ConnectionHub;
    use crate::processor::MessageProcessor;
    use futures::channel::mpsc as fmpsc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo;

    impl MessageProcessor for Echo {
        fn handle_message(&self, _sender: &ConnectionId, payload: &[u8], hub: &HubHandle) {
            let _ = hub.broadcast(payload.to_vec());
        }

        fn update(&self, peer: &Peer) {
            let _ = peer.send(Bytes::from(format!("snapshot:{}", peer.id())));
        }
    }

    type Inbound = Result<Frame, std::io::Error>;

    struct Client {
        to_conn: fmpsc::UnboundedSender<Inbound>,
        from_conn: fmpsc::UnboundedReceiver<Frame>,
        task: JoinHandle<Disconnect>,
        emptied: Arc<AtomicUsize>,
    }

    impl Client {
        fn send_text(&self, text: &str) {
            self.to_conn.unbounded_send(Ok(Frame::text(text))).unwrap();
        }

        async fn next(&mut self) -> Frame {
            self.from_conn.next().await.unwrap()
        }

        async fn next_data(&mut self) -> Bytes {
            loop {
                match self.next().await {
                    Frame::Text(b) => return b,
                    Frame::Ping(_) => {}
                    other => panic!("unexpected frame {other:?}"),
                }
            }
        }
    }

    fn options() -> ConnectionOptions {
        ConnectionOptions {
            queue_capacity: 16,
            max_message_size: 32,
            write_timeout: Duration::from_millis(50),
            pong_timeout: Duration::from_millis(100),
            ping_period: Duration::from_millis(90),
        }
    }

    fn connect(hub: &HubHandle, id: &str, options: ConnectionOptions) -> Client {
        let (out_tx, out_rx) = fmpsc::unbounded::<Frame>();
        let (in_tx, in_rx) = fmpsc::unbounded::<Inbound>();
        let emptied = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&emptied);
        let task = Connection::new(hub.clone(), ConnectionId::from(id), out_tx, in_rx, options)
            .on_empty(move || {
                let _ = counter.fetch_add(1, Ordering::SeqCst);
            })
            .spawn();
        Client {
            to_conn: in_tx,
            from_conn: out_rx,
            task,
            emptied,
        }
    }

    #[test]
    fn default_ping_is_nine_tenths_of_pong() {
        let opts = ConnectionOptions::default();
        assert_eq!(opts.ping_period, Duration::from_secs(108));
        assert_eq!(opts.max_message_size, 512);
        assert_eq!(opts.queue_capacity, 256);
    }

    #[tokio::test(start_paused = true)]
    async fn message_round_trip_and_close() {
        let (hub, _hub_task) = ConnectionHub::spawn(Echo);
        let mut a = connect(&hub, "a", options());
        let mut b = connect(&hub, "b", options());

        assert_eq!(a.next_data().await, "snapshot:a");
        assert_eq!(b.next_data().await, "snapshot:b");

        a.send_text("hi");
        assert_eq!(a.next_data().await, "hi");
        assert_eq!(b.next_data().await, "hi");

        drop(a.to_conn);
        assert_eq!(a.task.await.unwrap(), Disconnect::PeerClosed);
        assert_eq!(a.from_conn.next().await, Some(Frame::Close));
        assert_eq!(a.emptied.load(Ordering::SeqCst), 0);

        b.to_conn.unbounded_send(Ok(Frame::Close)).unwrap();
        assert_eq!(b.task.await.unwrap(), Disconnect::PeerClosed);
        assert_eq!(b.emptied.load(Ordering::SeqCst), 1);
        assert_eq!(hub.member_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn oversize_message_is_fatal() {
        let (hub, _hub_task) = ConnectionHub::spawn(Echo);
        let mut a = connect(&hub, "a", options());
        assert_eq!(a.next_data().await, "snapshot:a");

        a.send_text(&"x".repeat(33));
        assert_eq!(a.task.await.unwrap(), Disconnect::Oversize);
        assert_eq!(a.emptied.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_times_out() {
        let (hub, _hub_task) = ConnectionHub::spawn(Echo);
        let mut a = connect(&hub, "a", options());
        assert_eq!(a.next_data().await, "snapshot:a");
        assert_eq!(a.next().await, Frame::Ping(Bytes::new()));

        assert_eq!(a.task.await.unwrap(), Disconnect::ReadTimeout);
        assert_eq!(a.from_conn.next().await, Some(Frame::Close));
        assert_eq!(a.emptied.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_keep_connection_alive() {
        let (hub, _hub_task) = ConnectionHub::spawn(Echo);
        let Client {
            to_conn,
            mut from_conn,
            task,
            ..
        } = connect(&hub, "a", options());

        let responder_tx = to_conn.clone();
        let responder = tokio::spawn(async move {
            let mut pings = 0;
            while let Some(frame) = from_conn.next().await {
                if let Frame::Ping(_) = frame {
                    pings += 1;
                    let _ = responder_tx.unbounded_send(Ok(Frame::Pong(Bytes::new())));
                }
            }
            pings
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!task.is_finished());

        to_conn.unbounded_send(Ok(Frame::Close)).unwrap();
        assert_eq!(task.await.unwrap(), Disconnect::PeerClosed);
        let pings = responder.await.unwrap();
        assert!(pings >= 10, "only {pings} pings");
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_connection_gets_queue_closed() {
        let (hub, _hub_task) = ConnectionHub::spawn(Echo);
        let mut first = connect(&hub, "u1", options());
        assert_eq!(first.next_data().await, "snapshot:u1");
        let mut second = connect(&hub, "u1", options());
        assert_eq!(second.next_data().await, "snapshot:u1");

        assert_eq!(first.next().await, Frame::Close);
        assert_eq!(first.task.await.unwrap(), Disconnect::QueueClosed);
        assert_eq!(first.emptied.load(Ordering::SeqCst), 0);

        second.send_text("ok");
        assert_eq!(second.next_data().await, "ok");
        assert_eq!(hub.member_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn broken_sink_tears_down() {
        let (hub, _hub_task) = ConnectionHub::spawn(Echo);
        let a = connect(&hub, "a", options());
        drop(a.from_conn);

        assert_eq!(a.task.await.unwrap(), Disconnect::WriteError);
        assert_eq!(a.emptied.load(Ordering::SeqCst), 1);
        assert_eq!(hub.member_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out() {
        let (hub, _hub_task) = ConnectionHub::spawn(Echo);
        // zero buffer: one in-flight frame, then `send` waits for the reader
        let (out_tx, _out_rx) = fmpsc::channel::<Frame>(0);
        let (_in_tx, in_rx) = fmpsc::unbounded::<Inbound>();
        let options = ConnectionOptions {
            ping_period: Duration::from_millis(30),
            pong_timeout: Duration::from_secs(1),
            ..options()
        };
        let task = Connection::new(hub.clone(), ConnectionId::from("a"), out_tx, in_rx, options).spawn();

        assert_eq!(task.await.unwrap(), Disconnect::WriteTimeout);
        assert_eq!(hub.member_count(), 0);
    }

    #[tokio::test]
    async fn closed_hub_refuses_connection() {
        let (hub, hub_task) = ConnectionHub::spawn(Echo);
        hub.shutdown();
        hub_task.await.unwrap();

        let mut a = connect(&hub, "a", options());
        assert_eq!(a.task.await.unwrap(), Disconnect::HubClosed);
        assert_eq!(a.from_conn.next().await, Some(Frame::Close));
        assert_eq!(a.emptied.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn adopts_pre_registered_peer() {
        let (hub, _hub_task) = ConnectionHub::spawn(Echo);
        let (peer, queue) = Peer::channel(ConnectionId::from("a"), 16);
        let key = peer.key();
        hub.register(peer).unwrap();
        assert_eq!(hub.member_count(), 1);

        let (out_tx, mut out_rx) = fmpsc::unbounded::<Frame>();
        let (in_tx, in_rx) = fmpsc::unbounded::<Inbound>();
        let task = Connection::new(hub.clone(), ConnectionId::from("a"), out_tx, in_rx, options())
            .registered(key, queue)
            .spawn();

        assert_eq!(out_rx.next().await, Some(Frame::text("snapshot:a")));
        in_tx.unbounded_send(Ok(Frame::text("hi"))).unwrap();
        assert_eq!(out_rx.next().await, Some(Frame::text("hi")));

        in_tx.unbounded_send(Ok(Frame::Close)).unwrap();
        assert_eq!(task.await.unwrap(), Disconnect::PeerClosed);
        assert_eq!(hub.member_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_live_connections() {
        let (hub, _hub_task) = ConnectionHub::spawn(Echo);
        let mut a = connect(&hub, "a", options());
        assert_eq!(a.next_data().await, "snapshot:a");
        hub.shutdown();

        assert_eq!(a.next().await, Frame::Close);
        assert_eq!(a.task.await.unwrap(), Disconnect::QueueClosed);
    }

    #[test]
    fn disconnect_labels_are_snake_case() {
        for reason in [
            Disconnect::PeerClosed,
            Disconnect::ReadError,
            Disconnect::ReadTimeout,
            Disconnect::Oversize,
            Disconnect::WriteError,
            Disconnect::WriteTimeout,
            Disconnect::QueueClosed,
            Disconnect::HubClosed,
            Disconnect::Stopped,
        ] {
            assert!(reason.as_str().chars().all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
