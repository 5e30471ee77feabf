//! Carrying bus traffic and state snapshots across a port.
//!
//! # Lifecycle
//!
//! ```text
//!   new() ──▶ Connecting ──open()──▶ Open ──close() / far end gone──▶ Closed
//!                 │                                                    ▲
//!                 └────────────────────close()─────────────────────────┘
//! ```
//!
//! `Closed` is terminal. Reconnecting means building a new transport over
//! a new port; nothing carries over, partial reassemblies included.
//!
//! # Tasks
//!
//! [`PortTransport::open`] spawns two tasks:
//!
//! - the **reader** owns the [`Reassembler`] and is the only code that
//!   touches it. It decodes frames, dispatches completed messages and
//!   sweeps expired reassemblies on a timer.
//! - the **forwarder** drains events mirrored by
//!   [`PortTransport::forward_event`] and writes them out in publish order.
//!
//! Inbound action calls run on their own task so a slow handler never
//! stalls the reader.
//!
//! # Closing
//!
//! Closing aborts every partial reassembly. A pending call whose result
//! was partially received fails with
//! [`TransportError::ReassemblyAborted`]; every other pending call, and
//! any send still writing frames, fails with [`TransportError::PortClosed`].
//! The disconnect hook then runs once.

use crate::chunk::ChunkCodec;
use crate::config::TransportConfig;
use crate::envelope::{CallBody, CallOutcome, EnvelopeKind, EventBody, RemoteFailure};
use crate::error::{AbortReason, TransportError};
use crate::port::{Port, PortSink, PortSource};
use crate::reassembly::{Completed, Reassembler, ReassemblyLimits};
use crate::wire;
use bytes::Bytes;
use parking_lot::Mutex;
use relay_bus::{Access, BusError, Capability, HandlerError, MessageBus, Subscription};
use relay_types::{ActionType, EventType, MessageId};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Connection state of a [`PortTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Connecting,
    Open,
    Closed,
}

/// Which side ended the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// [`PortTransport::close`] or drop on this side.
    Local,
    /// The far end went away.
    Remote,
}

/// A state snapshot received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub message_id: MessageId,
    pub data: Bytes,
}

type PendingCall = oneshot::Sender<Result<Value, TransportError>>;
type DisconnectHook = Box<dyn FnOnce(DisconnectReason) + Send>;
type OutboundEvent = (EventType, Value);

/// Halves waiting for [`PortTransport::open`].
struct Idle {
    source: Box<dyn PortSource>,
    outbound_events: mpsc::UnboundedReceiver<OutboundEvent>,
}

/// One end of a background↔UI connection.
///
/// # Example
///
/// ```
/// use relay_bus::{Capability, MessageBus};
/// use relay_port::{MemoryPort, PortTransport, TransportConfig};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TransportConfig::default();
/// let (bg_port, ui_port) = MemoryPort::pair(config.max_message_size, 16);
///
/// let background = MessageBus::new();
/// background.register_action_handler("Network:chainId".parse()?, |_| async { Ok(json!("0x1")) })?;
///
/// let ui_may = Capability::new("Ui", ["Network:chainId"], Vec::<&str>::new())?;
/// let (bg, _) = PortTransport::new(bg_port, background, ui_may, config.clone())?;
/// let (ui, _) = PortTransport::new(ui_port, MessageBus::new(), Capability::new("Background", Vec::<&str>::new(), Vec::<&str>::new())?, config)?;
/// bg.open()?;
/// ui.open()?;
///
/// let chain = ui.call(&"Network:chainId".parse()?, json!(null)).await?;
/// assert_eq!(chain, json!("0x1"));
/// # Ok(())
/// # }
/// ```
pub struct PortTransport {
    shared: Arc<Shared>,
    idle: Mutex<Option<Idle>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl PortTransport {
    /// Wraps `port` in `Connecting` state.
    ///
    /// `remote` scopes what the peer may do to `bus`: which actions it may
    /// call and which events it may deliver. Snapshots from the peer
    /// arrive on the returned receiver.
    ///
    /// # Errors
    ///
    /// [`TransportError::Config`] when `config` fails validation.
    pub fn new(
        port: impl Port,
        bus: MessageBus,
        remote: Capability,
        config: TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<Snapshot>), TransportError> {
        config.validate()?;
        let codec = ChunkCodec::new(config.max_frame_payload())?;
        let (sink, source) = port.into_split();
        let (snapshot_tx, snapshot_rx) = mpsc::channel(config.snapshot_buffer);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let (done, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            config,
            codec,
            bus,
            remote,
            sink,
            state: Mutex::new(PortState::Connecting),
            write_lock: tokio::sync::Mutex::new(()),
            pending: Mutex::new(HashMap::new()),
            snapshots: snapshot_tx,
            outbound_events: event_tx,
            forwarded: Mutex::new(Vec::new()),
            on_disconnect: Mutex::new(None),
            closed,
            finished: AtomicBool::new(false),
            done,
        });
        debug!(peer = %shared.remote.name(), "Port connecting");

        let transport = Self {
            shared,
            idle: Mutex::new(Some(Idle {
                source,
                outbound_events: event_rx,
            })),
            reader: Mutex::new(None),
        };
        Ok((transport, snapshot_rx))
    }

    #[must_use]
    pub fn state(&self) -> PortState {
        *self.shared.state.lock()
    }

    /// What the peer is allowed to do on the local bus.
    #[must_use]
    pub fn remote(&self) -> &Capability {
        &self.shared.remote
    }

    /// Starts the reader and forwarder tasks. Must run inside a Tokio
    /// runtime. Opening an open transport is a no-op.
    ///
    /// # Errors
    ///
    /// [`TransportError::PortClosed`] once the transport has closed.
    pub fn open(&self) -> Result<(), TransportError> {
        let mut state = self.shared.state.lock();
        match *state {
            PortState::Open => return Ok(()),
            PortState::Closed => return Err(TransportError::PortClosed),
            PortState::Connecting => {}
        }
        let Some(idle) = self.idle.lock().take() else {
            return Err(TransportError::PortClosed);
        };
        *state = PortState::Open;
        drop(state);

        info!(peer = %self.shared.remote.name(), "Port open");
        let reader = tokio::spawn(Arc::clone(&self.shared).read_loop(idle.source));
        tokio::spawn(Arc::clone(&self.shared).forward_loop(idle.outbound_events));
        *self.reader.lock() = Some(reader);
        Ok(())
    }

    /// Calls `action` on the peer's bus and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`TransportError::NotOpen`] / [`TransportError::PortClosed`] by state
    /// - [`TransportError::Remote`] when the peer's bus refused or the
    ///   handler failed; `code` carries the peer's error code
    /// - [`TransportError::ReassemblyAborted`] when the port closed while
    ///   the result was arriving
    /// - [`TransportError::Timeout`] after `call_timeout_ms`
    pub async fn call(&self, action: &ActionType, args: Value) -> Result<Value, TransportError> {
        let message_id = MessageId::new();
        let body = serde_json::to_vec(&CallBody {
            action: action.to_string(),
            args,
        })?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(message_id, tx);
        if let Err(err) = self
            .shared
            .send(EnvelopeKind::ActionCall, message_id, Bytes::from(body))
            .await
        {
            self.shared.pending.lock().remove(&message_id);
            return Err(err);
        }

        match tokio::time::timeout(self.shared.config.call_timeout(), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::PortClosed),
            Err(_) => {
                self.shared.pending.lock().remove(&message_id);
                warn!(
                    peer = %self.shared.remote.name(),
                    %message_id,
                    %action,
                    "Remote call timed out"
                );
                Err(TransportError::Timeout {
                    message_id,
                    after_ms: self.shared.config.call_timeout_ms,
                })
            }
        }
    }

    /// Publishes `event` on the peer's bus.
    ///
    /// # Errors
    ///
    /// As for any send: state, encoding or port errors.
    pub async fn send_event(&self, event: &EventType, payload: Value) -> Result<(), TransportError> {
        self.shared.send_event(event, payload).await
    }

    /// Sends an opaque state snapshot, chunked as needed.
    ///
    /// # Errors
    ///
    /// As for any send: state or port errors.
    pub async fn send_snapshot(&self, data: Bytes) -> Result<MessageId, TransportError> {
        let message_id = MessageId::new();
        let size = data.len();
        self.shared
            .send(EnvelopeKind::StateSnapshot, message_id, data)
            .await?;
        info!(peer = %self.shared.remote.name(), %message_id, bytes = size, "Snapshot sent");
        Ok(message_id)
    }

    /// Mirrors every local publish of `event` to the peer.
    ///
    /// Only an open transport forwards, so nothing queues up behind a port
    /// that never opens. The subscription is dropped when the port closes;
    /// unsubscribing it from the bus stops forwarding earlier.
    ///
    /// # Errors
    ///
    /// [`TransportError::NotOpen`] before [`open`](Self::open),
    /// [`TransportError::PortClosed`] once the transport has closed.
    pub fn forward_event(&self, event: EventType) -> Result<Subscription, TransportError> {
        self.shared.ensure_open()?;

        let outbound = self.shared.outbound_events.clone();
        let forwarded = event.clone();
        let subscription = self.shared.bus.subscribe(event, move |payload: &Value| {
            outbound
                .send((forwarded.clone(), payload.clone()))
                .map_err(|_| HandlerError::from(TransportError::PortClosed))
        });
        self.shared.forwarded.lock().push(subscription.clone());

        if self.shared.finished.load(Ordering::Acquire) {
            self.shared.bus.unsubscribe(&subscription);
            return Err(TransportError::PortClosed);
        }
        debug!(peer = %self.shared.remote.name(), event = %subscription.event(), "Forwarding event");
        Ok(subscription)
    }

    /// Registers the hook run once when the port closes, replacing any
    /// earlier one. A hook registered after closing never runs.
    pub fn on_disconnect<F>(&self, hook: F)
    where
        F: FnOnce(DisconnectReason) + Send + 'static,
    {
        *self.shared.on_disconnect.lock() = Some(Box::new(hook));
    }

    /// Closes the port and waits until everything in flight has been
    /// failed and the disconnect hook has run. Safe to call concurrently.
    pub async fn close(&self) {
        *self.shared.state.lock() = PortState::Closed;
        self.shared.closed.send_replace(true);

        if self.idle.lock().take().is_some() {
            self.shared.finish(None, DisconnectReason::Local);
            return;
        }

        // Only one closer joins the reader; the rest wait for it to finish.
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            if let Err(err) = reader.await {
                warn!(peer = %self.shared.remote.name(), error = %err, "Port reader failed");
                self.shared.finish(None, DisconnectReason::Local);
                return;
            }
        }
        self.shared.finished().await;
    }
}

impl Drop for PortTransport {
    fn drop(&mut self) {
        self.shared.closed.send_replace(true);
        if self.idle.get_mut().take().is_some() {
            self.shared.finish(None, DisconnectReason::Local);
        }
    }
}

impl fmt::Debug for PortTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortTransport")
            .field("peer", self.shared.remote.name())
            .field("state", &self.state())
            .field("pending_calls", &self.shared.pending.lock().len())
            .finish_non_exhaustive()
    }
}

struct Shared {
    config: TransportConfig,
    codec: ChunkCodec,
    bus: MessageBus,
    remote: Capability,
    sink: Arc<dyn PortSink>,
    state: Mutex<PortState>,
    /// Held for the whole of one message so its frames go out contiguously.
    write_lock: tokio::sync::Mutex<()>,
    pending: Mutex<HashMap<MessageId, PendingCall>>,
    snapshots: mpsc::Sender<Snapshot>,
    outbound_events: mpsc::UnboundedSender<OutboundEvent>,
    forwarded: Mutex<Vec<Subscription>>,
    on_disconnect: Mutex<Option<DisconnectHook>>,
    closed: watch::Sender<bool>,
    finished: AtomicBool,
    /// Flipped once [`Shared::finish`] has completed.
    done: watch::Sender<bool>,
}

impl Shared {
    fn ensure_open(&self) -> Result<(), TransportError> {
        match *self.state.lock() {
            PortState::Open => Ok(()),
            PortState::Connecting => Err(TransportError::NotOpen),
            PortState::Closed => Err(TransportError::PortClosed),
        }
    }

    /// Resolves once the transport is closing.
    async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let already = *rx.borrow_and_update();
        if !already {
            let _ = rx.changed().await;
        }
    }

    /// Resolves once [`finish`](Self::finish) has run to completion.
    async fn finished(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    async fn send(
        &self,
        kind: EnvelopeKind,
        message_id: MessageId,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let frames = self.codec.encode(message_id, payload)?;

        let _writer = self.write_lock.lock().await;
        for frame in &frames {
            self.ensure_open()?;
            self.sink.post(wire::encode(kind, frame)?).await?;
            if !frame.is_last() {
                tokio::task::yield_now().await;
            }
        }
        if frames.len() > 1 {
            debug!(
                peer = %self.remote.name(),
                %message_id,
                ?kind,
                frames = frames.len(),
                "Sent chunked message"
            );
        }
        Ok(())
    }

    async fn send_event(&self, event: &EventType, payload: Value) -> Result<(), TransportError> {
        let body = serde_json::to_vec(&EventBody {
            event: event.to_string(),
            payload,
        })?;
        self.send(EnvelopeKind::Event, MessageId::new(), Bytes::from(body))
            .await
    }

    async fn read_loop(self: Arc<Self>, mut source: Box<dyn PortSource>) {
        let mut reassembler = Reassembler::new(ReassemblyLimits::from(&self.config));
        let mut purge = tokio::time::interval(self.config.purge_interval());
        purge.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reason = loop {
            tokio::select! {
                () = self.closed() => break DisconnectReason::Local,
                unit = source.recv() => match unit {
                    Some(unit) => self.on_unit(&mut reassembler, unit).await,
                    None => break DisconnectReason::Remote,
                },
                _ = purge.tick() => {
                    for aborted in reassembler.purge_expired(Instant::now()) {
                        self.fail_pending(aborted.message_id, aborted.to_error());
                    }
                }
            }
        };
        self.finish(Some(&mut reassembler), reason);
    }

    async fn forward_loop(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<OutboundEvent>) {
        loop {
            tokio::select! {
                () = self.closed() => break,
                next = events.recv() => {
                    let Some((event, payload)) = next else { break };
                    if let Err(err) = self.send_event(&event, payload).await {
                        debug!(peer = %self.remote.name(), %event, error = %err, "Event not forwarded");
                    }
                }
            }
        }
    }

    async fn on_unit(self: &Arc<Self>, reassembler: &mut Reassembler, unit: Bytes) {
        let (kind, frame) = match wire::decode(unit) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(peer = %self.remote.name(), error = %err, "Dropping undecodable unit");
                return;
            }
        };
        let message_id = frame.message_id;

        match reassembler.accept(kind, frame, Instant::now()) {
            Ok(Some(done)) => self.dispatch(done).await,
            Ok(None) => {}
            Err(err @ TransportError::ReassemblyAborted { .. }) => self.fail_pending(message_id, err),
            Err(err) => {
                warn!(peer = %self.remote.name(), %message_id, error = %err, "Dropping inbound frame");
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, done: Completed) {
        let Completed {
            message_id,
            kind,
            payload,
        } = done;
        match kind {
            EnvelopeKind::ActionCall => {
                tokio::spawn(Arc::clone(self).answer_call(message_id, payload));
            }
            EnvelopeKind::ActionResult => self.resolve_call(message_id, &payload),
            EnvelopeKind::Event => self.deliver_event(message_id, &payload),
            EnvelopeKind::StateSnapshot => {
                self.deliver_snapshot(Snapshot {
                    message_id,
                    data: payload,
                })
                .await;
            }
        }
    }

    async fn answer_call(self: Arc<Self>, message_id: MessageId, payload: Bytes) {
        let outcome = match serde_json::from_slice::<CallBody>(&payload) {
            Ok(call) => CallOutcome::from(self.invoke_local(call).await),
            Err(err) => CallOutcome::Error(RemoteFailure::from_error(&TransportError::from(err))),
        };
        let body = match serde_json::to_vec(&outcome) {
            Ok(body) => body,
            Err(err) => {
                warn!(peer = %self.remote.name(), %message_id, error = %err, "Could not encode call result");
                return;
            }
        };
        if let Err(err) = self
            .send(EnvelopeKind::ActionResult, message_id, Bytes::from(body))
            .await
        {
            debug!(peer = %self.remote.name(), %message_id, error = %err, "Could not answer remote call");
        }
    }

    async fn invoke_local(&self, call: CallBody) -> Result<Value, BusError> {
        let action: ActionType = call.action.parse()?;
        if let Err(err) = self.remote.check_action(Access::Call, &action) {
            warn!(
                target: "relay::security",
                peer = %self.remote.name(),
                access = %Access::Call,
                denied = %action,
                "Capability violation"
            );
            return Err(err);
        }
        self.bus.call(&action, call.args).await
    }

    fn resolve_call(&self, message_id: MessageId, payload: &[u8]) {
        let result = serde_json::from_slice::<CallOutcome>(payload)
            .map_err(TransportError::from)
            .and_then(CallOutcome::into_result);
        let waiter = self.pending.lock().remove(&message_id);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(result);
            }
            None => debug!(peer = %self.remote.name(), %message_id, "Result for unknown or expired call"),
        }
    }

    fn deliver_event(&self, message_id: MessageId, payload: &[u8]) {
        let body: EventBody = match serde_json::from_slice(payload) {
            Ok(body) => body,
            Err(err) => {
                warn!(peer = %self.remote.name(), %message_id, error = %err, "Dropping undecodable event");
                return;
            }
        };
        let event: EventType = match body.event.parse() {
            Ok(event) => event,
            Err(err) => {
                warn!(peer = %self.remote.name(), %message_id, error = %err, "Dropping event with invalid type");
                return;
            }
        };
        if !self.remote.may_deliver(&event) {
            warn!(
                target: "relay::security",
                peer = %self.remote.name(),
                access = %Access::Publish,
                denied = %event,
                "Capability violation"
            );
            return;
        }
        if let Err(err) = self.bus.publish(&event, body.payload) {
            warn!(peer = %self.remote.name(), %event, error = %err, "Subscribers failed on remote event");
        }
    }

    async fn deliver_snapshot(&self, snapshot: Snapshot) {
        let message_id = snapshot.message_id;
        let size = snapshot.data.len();
        tokio::select! {
            sent = self.snapshots.send(snapshot) => match sent {
                Ok(()) => debug!(peer = %self.remote.name(), %message_id, bytes = size, "Snapshot received"),
                Err(_) => debug!(peer = %self.remote.name(), %message_id, "Snapshot dropped: no receiver"),
            },
            () = self.closed() => {}
        }
    }

    fn fail_pending(&self, message_id: MessageId, err: TransportError) {
        let waiter = self.pending.lock().remove(&message_id);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(Err(err));
            }
            None => debug!(peer = %self.remote.name(), %message_id, error = %err, "Discarded message had no waiter"),
        }
    }

    /// Moves to `Closed` and fails everything still in flight. Runs once.
    ///
    /// Once the port is open only the reader calls this, so partial
    /// reassemblies are always reported as aborted.
    fn finish(&self, reassembler: Option<&mut Reassembler>, reason: DisconnectReason) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.lock() = PortState::Closed;
        self.closed.send_replace(true);

        let aborted = reassembler
            .map(|r| r.abort_all(AbortReason::Disconnected))
            .unwrap_or_default();
        let mut pending = std::mem::take(&mut *self.pending.lock());
        for entry in &aborted {
            if let Some(waiter) = pending.remove(&entry.message_id) {
                let _ = waiter.send(Err(entry.to_error()));
            }
        }
        let failed_calls = pending.len();
        for (_, waiter) in pending {
            let _ = waiter.send(Err(TransportError::PortClosed));
        }

        let forwarded = std::mem::take(&mut *self.forwarded.lock());
        for subscription in &forwarded {
            self.bus.unsubscribe(subscription);
        }

        info!(
            peer = %self.remote.name(),
            ?reason,
            aborted = aborted.len(),
            failed_calls,
            "Port closed"
        );
        let hook = self.on_disconnect.lock().take();
        if let Some(hook) = hook {
            hook(reason);
        }
        self.done.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MemoryPort;
    use std::sync::atomic::AtomicUsize;

    fn transport() -> (PortTransport, MemoryPort) {
        let config = TransportConfig::default();
        let (local, far) = MemoryPort::pair(config.max_message_size, 8);
        let remote = Capability::isolated("Ui".parse().unwrap());
        let (transport, _) = PortTransport::new(local, MessageBus::new(), remote, config).unwrap();
        (transport, far)
    }

    #[tokio::test]
    async fn sends_fail_until_open() {
        let (transport, _far) = transport();

        assert_eq!(transport.state(), PortState::Connecting);
        let err = transport.send_snapshot(Bytes::from_static(b"{}")).await.unwrap_err();
        assert!(matches!(err, TransportError::NotOpen));
    }

    #[tokio::test]
    async fn open_is_idempotent() {
        let (transport, _far) = transport();

        transport.open().unwrap();
        transport.open().unwrap();

        assert_eq!(transport.state(), PortState::Open);
    }

    #[tokio::test]
    async fn close_before_open_runs_hook_once() {
        let (transport, _far) = transport();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        transport.on_disconnect(move |reason| {
            assert_eq!(reason, DisconnectReason::Local);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        transport.close().await;
        transport.close().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(transport.state(), PortState::Closed);
        assert!(matches!(transport.open(), Err(TransportError::PortClosed)));
    }

    #[tokio::test]
    async fn forwarding_needs_an_open_port() {
        let (transport, _far) = transport();
        let event: EventType = "Ui:ready".parse().unwrap();

        let err = transport.forward_event(event.clone()).unwrap_err();
        assert!(matches!(err, TransportError::NotOpen));
        assert_eq!(transport.shared.bus.subscriber_count(&event), 0);

        transport.open().unwrap();
        transport.forward_event(event.clone()).unwrap();
        assert_eq!(transport.shared.bus.subscriber_count(&event), 1);
    }

    #[tokio::test]
    async fn closed_transport_rejects_sends_and_forwarding() {
        let (transport, _far) = transport();
        transport.open().unwrap();
        transport.close().await;

        let err = transport.send_snapshot(Bytes::new()).await.unwrap_err();
        assert!(matches!(err, TransportError::PortClosed));
        assert!(matches!(
            transport.forward_event("Ui:ready".parse().unwrap()),
            Err(TransportError::PortClosed)
        ));
    }

    #[tokio::test]
    async fn snapshot_goes_out_as_one_wire_unit() {
        let (transport, mut far) = transport();
        transport.open().unwrap();

        let id = transport.send_snapshot(Bytes::from_static(b"state")).await.unwrap();

        let unit = far.recv().await.unwrap();
        let (kind, frame) = wire::decode(unit).unwrap();
        assert_eq!(kind, EnvelopeKind::StateSnapshot);
        assert_eq!(frame.message_id, id);
        assert_eq!(frame.payload, Bytes::from_static(b"state"));
    }
}
