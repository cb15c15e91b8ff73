//! Client session state machine.
//!
//! A [`ClientSession`] owns one [`Transport`] and multiplexes every caller
//! operation over it:
//!
//! - Outbound frames go through a single FIFO send loop, so only one frame
//!   is ever being written.
//! - A receive loop reads frames while something is waiting for one (a
//!   pending `receive` or an outstanding receipt), and routes MESSAGE and
//!   RECEIPT frames to their waiters.
//! - A RECEIPT completes every pending receipt request issued up to and
//!   including the one it names.
//! - Any transport failure or protocol violation terminates the session once,
//!   failing every pending operation and closing the transport.
//!
//! The session handle is cheap to clone; all clones drive the same session.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use crate::body::{BodyEnd, FrameBody};
use crate::connect::read_server_error;
use crate::error::{Result, StompError};
use crate::frame::{
    ABORT, ACK, AckMode, BEGIN, COMMIT, DISCONNECT, ERROR, Frame, MESSAGE, NACK,
    ProtocolVersion, RECEIPT, SUBSCRIBE, UNSUBSCRIBE,
};
use crate::header::Headers;
use crate::subscription::{Resource, Subscription, Transaction};
use crate::transport::{ReceiptTimeout, Transport};

const SESSION_DISCONNECTED: &str = "session disconnected";

type Completion = oneshot::Sender<Result<()>>;
type MessageCallback = oneshot::Sender<Result<Frame>>;
type ErrorListener = Arc<dyn Fn(&StompError) + Send + Sync>;

/// A connected STOMP session.
///
/// Create one with [`connect`](crate::connect::connect), or with
/// [`ClientSession::new`] over a transport whose session is already
/// established.
///
/// Every operation taking a [`ReceiptTimeout`] can ask for a RECEIPT:
/// `ReceiptTimeout::Default` leaves the decision to the transport, which
/// usually requests receipts for DISCONNECT and UNSUBSCRIBE only.
///
/// Operations must be awaited inside a tokio runtime; the send and receive
/// loops run as spawned tasks.
#[derive(Clone)]
pub struct ClientSession {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    version: ProtocolVersion,
    state: Mutex<State>,
}

struct State {
    disconnected: bool,
    terminated: bool,
    disconnect_error: Option<StompError>,
    send_queue: VecDeque<SendRequest>,
    send_loop_running: bool,
    receive_demand: usize,
    receive_loop_running: bool,
    subscriptions: HashSet<String>,
    message_requests: HashMap<String, MessageCallback>,
    /// At most one MESSAGE that arrived before anyone asked for it, with its
    /// subscription id.
    unhandled_message: Option<(String, Frame)>,
    receipt_requests: HashMap<String, ReceiptRequest>,
    next_resource_id: u64,
    next_receipt_seq: u64,
    error_listener: Option<ErrorListener>,
}

struct SendRequest {
    frame: Frame,
    timeout: ReceiptTimeout,
    completion: Completion,
}

/// Command and headers of a frame already handed to the transport.
struct SentFrame {
    command: String,
    headers: Headers,
}

impl SentFrame {
    fn of(frame: &Frame) -> Self {
        Self {
            command: frame.command.clone(),
            headers: frame.headers.clone(),
        }
    }
}

struct ReceiptRequest {
    seq: u64,
    sent: SentFrame,
    completion: Completion,
    timer: Option<JoinHandle<()>>,
}

impl ReceiptRequest {
    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Everything still waiting on a session that is being torn down.
#[derive(Default)]
struct Pending {
    sends: Vec<SendRequest>,
    receipts: Vec<ReceiptRequest>,
    receives: Vec<MessageCallback>,
    unhandled: Option<Frame>,
}

impl Pending {
    fn close(self, err: &StompError) {
        for request in self.sends {
            let _ = request.completion.send(Err(err.clone()));
        }
        for mut request in self.receipts {
            request.stop_timer();
            let _ = request.completion.send(Err(err.clone()));
        }
        for callback in self.receives {
            let _ = callback.send(Err(err.clone()));
        }
        // dropping an unread message hands its body back to the receive loop
        drop(self.unhandled);
    }
}

enum Dispatch {
    Rejected,
    Unreceipted(Completion),
    Receipted(String),
}

impl State {
    fn new() -> Self {
        Self {
            disconnected: false,
            terminated: false,
            disconnect_error: None,
            send_queue: VecDeque::new(),
            send_loop_running: false,
            receive_demand: 0,
            receive_loop_running: false,
            subscriptions: HashSet::new(),
            message_requests: HashMap::new(),
            unhandled_message: None,
            receipt_requests: HashMap::new(),
            next_resource_id: 1,
            next_receipt_seq: 1,
            error_listener: None,
        }
    }

    fn generate_resource_id(&mut self) -> String {
        let id = self.next_resource_id;
        self.next_resource_id += 1;
        id.to_string()
    }

    /// Count one more frame the receive loop must read. Returns true when
    /// the loop has to be started.
    fn add_receive_demand(&mut self) -> bool {
        self.receive_demand += 1;
        if self.receive_loop_running {
            return false;
        }
        self.receive_loop_running = true;
        true
    }

    fn release_receive_demand(&mut self) {
        self.receive_demand = self.receive_demand.saturating_sub(1);
    }

    fn cancel_message_request(&mut self, subscription: &str, reason: &str) {
        if let Some(callback) = self.message_requests.remove(subscription) {
            let _ = callback.send(Err(StompError::cancelled(reason)));
            self.release_receive_demand();
        }
    }

    fn take_unhandled_for(&mut self, subscription: &str) -> Option<Frame> {
        match &self.unhandled_message {
            Some((id, _)) if id == subscription => self.unhandled_message.take().map(|(_, frame)| frame),
            _ => None,
        }
    }

    fn take_pending(&mut self) -> Pending {
        self.subscriptions.clear();
        self.receive_demand = 0;

        let mut receipts: Vec<ReceiptRequest> =
            self.receipt_requests.drain().map(|(_, request)| request).collect();
        receipts.sort_by_key(|request| request.seq);

        Pending {
            sends: self.send_queue.drain(..).collect(),
            receipts,
            receives: self
                .message_requests
                .drain()
                .map(|(_, callback)| callback)
                .collect(),
            unhandled: self.unhandled_message.take().map(|(_, frame)| frame),
        }
    }
}

impl ClientSession {
    /// Wrap a transport whose handshake is complete.
    ///
    /// Parameters
    /// - `transport`: the connected transport. The session becomes its only
    ///   user.
    /// - `version`: the protocol version agreed with the server.
    pub fn new(transport: Arc<dyn Transport>, version: ProtocolVersion) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                version,
                state: Mutex::new(State::new()),
            }),
        }
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.inner.version
    }

    /// True once a DISCONNECT has started or the session has terminated.
    pub fn is_disconnected(&self) -> bool {
        self.inner.state.lock().disconnected
    }

    /// The failure that terminated the session, if it ended on a failure.
    pub fn disconnect_error(&self) -> Option<StompError> {
        self.inner.state.lock().disconnect_error.clone()
    }

    /// Called with the error whenever the session fails on its own (read or
    /// write failure, ERROR frame, protocol violation).
    pub fn set_error_listener<F>(&self, listener: F)
    where
        F: Fn(&StompError) + Send + Sync + 'static,
    {
        self.inner.state.lock().error_listener = Some(Arc::new(listener));
    }

    /// An identifier not yet used by this session.
    pub fn generate_resource_id(&self) -> String {
        self.inner.state.lock().generate_resource_id()
    }

    /// Send a frame.
    ///
    /// Required headers are checked first: SEND needs `destination`,
    /// SUBSCRIBE `destination` and `id`, UNSUBSCRIBE/ACK/NACK `id`, and
    /// BEGIN/COMMIT `transaction`. A missing header fails immediately
    /// without queueing anything. A DISCONNECT must request a receipt.
    ///
    /// Resolves once the frame is written, or once its RECEIPT arrives when
    /// a receipt is requested.
    pub async fn send(&self, frame: Frame, timeout: ReceiptTimeout) -> Result<()> {
        frame.validate_required_headers()?;

        if frame.command == DISCONNECT && timeout == ReceiptTimeout::NotRequested {
            return Err(StompError::operation(
                "sending a disconnect request must include a receipt timeout",
            ));
        }

        let (completion, done) = oneshot::channel();
        let request = SendRequest {
            frame,
            timeout,
            completion,
        };

        let start = {
            let mut state = self.inner.state.lock();
            if state.send_loop_running {
                state.send_queue.push_back(request);
                None
            } else {
                state.send_loop_running = true;
                Some(request)
            }
        };

        if let Some(request) = start {
            tokio::spawn(self.inner.clone().run_send_loop(request));
        }

        done.await
            .unwrap_or_else(|_| Err(StompError::session_closed(SESSION_DISCONNECTED)))
    }

    /// Start a transaction.
    pub async fn begin(&self, timeout: ReceiptTimeout) -> Result<Transaction> {
        let id = self.generate_resource_id();
        let headers = Headers::new().with("transaction", id.clone());
        self.send(Frame::with_parts(BEGIN, headers.clone(), FrameBody::empty()), timeout)
            .await?;
        Ok(Transaction::new(id, headers))
    }

    /// Commit a transaction.
    pub async fn commit(&self, transaction: &Transaction, timeout: ReceiptTimeout) -> Result<()> {
        self.send(Frame::new(COMMIT).header("transaction", transaction.id()), timeout)
            .await
    }

    /// Roll back a transaction.
    pub async fn abort(&self, transaction: &Transaction, timeout: ReceiptTimeout) -> Result<()> {
        self.send(Frame::new(ABORT).header("transaction", transaction.id()), timeout)
            .await
    }

    /// Subscribe to `destination`. The `ack` header is only sent for the
    /// client acknowledgement modes.
    pub async fn subscribe(
        &self,
        destination: &str,
        ack: AckMode,
        timeout: ReceiptTimeout,
    ) -> Result<Subscription> {
        self.subscribe_with_headers(destination, ack, Headers::new(), timeout)
            .await
    }

    /// [`subscribe`](Self::subscribe) with additional SUBSCRIBE headers,
    /// e.g. a selector or prefetch count.
    pub async fn subscribe_with_headers(
        &self,
        destination: &str,
        ack: AckMode,
        extra: Headers,
        timeout: ReceiptTimeout,
    ) -> Result<Subscription> {
        let id = self.generate_resource_id();

        let mut headers = Headers::new()
            .with("id", id.clone())
            .with("destination", destination);
        if ack != AckMode::Auto {
            headers.append("ack", ack.as_str());
        }
        let headers = Headers::concat(&[&headers, &extra]);

        self.send(Frame::with_parts(SUBSCRIBE, headers.clone(), FrameBody::empty()), timeout)
            .await?;
        Ok(Subscription::new(id, headers))
    }

    /// Close a subscription. A pending receive on it is cancelled once the
    /// UNSUBSCRIBE completes.
    pub async fn unsubscribe(&self, subscription: &Subscription, timeout: ReceiptTimeout) -> Result<()> {
        self.send(Frame::new(UNSUBSCRIBE).header("id", subscription.id()), timeout)
            .await
    }

    /// Wait for the next MESSAGE on `subscription`.
    ///
    /// Only one receive per subscription may be pending; a new call cancels
    /// the previous one. The message body must be read (or the frame
    /// dropped) before the session reads further frames.
    pub async fn receive(&self, subscription: &Subscription) -> Result<Frame> {
        let id = subscription.id();
        let (callback, delivered) = oneshot::channel();

        let start = {
            let mut state = self.inner.state.lock();

            if let Some(message) = state.take_unhandled_for(id) {
                return Ok(message);
            }

            if state.terminated {
                return Err(StompError::session_closed(SESSION_DISCONNECTED));
            }

            state.cancel_message_request(id, "receive superseded");
            state.message_requests.insert(id.to_string(), callback);
            state.add_receive_demand()
        };

        if start {
            self.inner.spawn_receive_loop();
        }

        delivered
            .await
            .unwrap_or_else(|_| Err(StompError::session_closed(SESSION_DISCONNECTED)))
    }

    /// Cancel a pending receive on `subscription`, if any.
    pub fn cancel_receive(&self, subscription: &Subscription) {
        self.inner
            .state
            .lock()
            .cancel_message_request(subscription.id(), "receive cancelled");
    }

    /// Acknowledge a message by its ack id (the MESSAGE `ack` header on 1.2,
    /// `message-id` otherwise).
    pub async fn ack(
        &self,
        message_id: &str,
        transaction: Option<&Transaction>,
        timeout: ReceiptTimeout,
    ) -> Result<()> {
        self.send(acknowledgement(ACK, message_id, transaction), timeout)
            .await
    }

    /// Reject a message by its ack id.
    pub async fn nack(
        &self,
        message_id: &str,
        transaction: Option<&Transaction>,
        timeout: ReceiptTimeout,
    ) -> Result<()> {
        self.send(acknowledgement(NACK, message_id, transaction), timeout)
            .await
    }

    /// The id to pass to [`ack`](Self::ack) or [`nack`](Self::nack) for a
    /// received message.
    pub fn ack_id<'a>(&self, message: &'a Frame) -> Option<&'a str> {
        match self.inner.version {
            ProtocolVersion::V1_2 => message
                .get_header("ack")
                .or_else(|| message.get_header("message-id")),
            _ => message.get_header("message-id"),
        }
    }

    /// Gracefully end the session.
    ///
    /// No further sends start once the DISCONNECT is queued. When its
    /// RECEIPT arrives every other pending receipt is completed, the
    /// remaining operations are cancelled and the transport is closed. If
    /// the receipt times out the session is shut down.
    pub async fn disconnect(&self, timeout: ReceiptTimeout) -> Result<()> {
        self.send(Frame::new(DISCONNECT), timeout).await
    }

    /// Abruptly end the session without telling the server. Every pending
    /// operation resolves as cancelled and the transport is closed.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ClientSession")
            .field("version", &self.inner.version)
            .field("disconnected", &state.disconnected)
            .field("subscriptions", &state.subscriptions.len())
            .field("pending_receipts", &state.receipt_requests.len())
            .finish()
    }
}

fn acknowledgement(command: &str, message_id: &str, transaction: Option<&Transaction>) -> Frame {
    let mut frame = Frame::new(command).header("id", message_id);
    if let Some(transaction) = transaction {
        frame = frame.header("transaction", transaction.id());
    }
    frame
}

impl Inner {
    async fn run_send_loop(self: Arc<Self>, mut request: SendRequest) {
        loop {
            self.process_send(request).await;

            let next = {
                let mut state = self.state.lock();
                match state.send_queue.pop_front() {
                    Some(next) => next,
                    None => {
                        state.send_loop_running = false;
                        return;
                    }
                }
            };
            request = next;
        }
    }

    async fn process_send(self: &Arc<Self>, request: SendRequest) {
        let SendRequest {
            mut frame,
            timeout,
            completion,
        } = request;

        let timeout = match timeout {
            ReceiptTimeout::Default => self.transport.receipt_timeout(&frame),
            timeout => timeout,
        };

        let dispatch = self.dispatch(&mut frame, timeout, completion);
        if let Dispatch::Rejected = dispatch {
            return;
        }

        let sent = SentFrame::of(&frame);

        match self.transport.write_frame(frame, self.version).await {
            Ok(()) => {
                if let Dispatch::Unreceipted(completion) = dispatch {
                    self.observe_send_completion(&sent).await;
                    let _ = completion.send(Ok(()));
                }
            }
            Err(err) => {
                let completion = match dispatch {
                    Dispatch::Unreceipted(completion) => Some(completion),
                    Dispatch::Receipted(id) => {
                        let request = {
                            let mut state = self.state.lock();
                            let request = state.receipt_requests.remove(&id);
                            if request.is_some() {
                                state.release_receive_demand();
                            }
                            request
                        };
                        request.map(|mut request| {
                            request.stop_timer();
                            request.completion
                        })
                    }
                    Dispatch::Rejected => None,
                };
                if let Some(completion) = completion {
                    let _ = completion.send(Err(err.clone()));
                }
                self.fail(err).await;
            }
        }
    }

    /// Register the frame's receipt and disconnect bookkeeping just before
    /// it is written.
    fn dispatch(self: &Arc<Self>, frame: &mut Frame, timeout: ReceiptTimeout, completion: Completion) -> Dispatch {
        let mut state = self.state.lock();

        if state.disconnected {
            drop(state);
            let _ = completion.send(Err(StompError::transport(SESSION_DISCONNECTED)));
            return Dispatch::Rejected;
        }

        let mut start_receive_loop = false;

        let dispatch = if timeout.is_requested() {
            let id = state.generate_resource_id();
            let receipt = Headers::new().with("receipt", id.clone());
            frame.headers = Headers::merge(&[&frame.headers, &receipt]);

            let seq = state.next_receipt_seq;
            state.next_receipt_seq += 1;

            let timer = match timeout {
                ReceiptTimeout::After(after) => Some(self.spawn_receipt_timer(id.clone(), after)),
                _ => None,
            };

            state.receipt_requests.insert(
                id.clone(),
                ReceiptRequest {
                    seq,
                    sent: SentFrame::of(frame),
                    completion,
                    timer,
                },
            );
            start_receive_loop = state.add_receive_demand();

            Dispatch::Receipted(id)
        } else {
            Dispatch::Unreceipted(completion)
        };

        match frame.command.as_str() {
            DISCONNECT => state.disconnected = true,
            UNSUBSCRIBE => {
                // nobody can ask for a message buffered on a closing subscription
                if let Some(id) = frame.headers.get("id") {
                    drop(state.take_unhandled_for(id));
                }
            }
            _ => {}
        }

        drop(state);

        if start_receive_loop {
            self.spawn_receive_loop();
        }

        dispatch
    }

    fn spawn_receipt_timer(self: &Arc<Self>, id: String, after: Duration) -> JoinHandle<()> {
        let session: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            time::sleep(after).await;
            if let Some(session) = session.upgrade() {
                session.receipt_timed_out(&id).await;
            }
        })
    }

    async fn receipt_timed_out(self: &Arc<Self>, id: &str) {
        let request = {
            let mut state = self.state.lock();
            let request = state.receipt_requests.remove(id);
            if request.is_some() {
                state.release_receive_demand();
            }
            request
        };
        let Some(request) = request else {
            return;
        };

        warn!(receipt = id, command = %request.sent.command, "receipt timeout");

        let disconnecting = request.sent.command == DISCONNECT;
        let _ = request
            .completion
            .send(Err(StompError::timeout("receipt timeout")));

        if disconnecting {
            self.shutdown().await;
        }
    }

    /// Side effects of a frame the server is known to have processed.
    async fn observe_send_completion(self: &Arc<Self>, sent: &SentFrame) {
        match sent.command.as_str() {
            DISCONNECT => {
                let receipts = {
                    let mut state = self.state.lock();
                    let mut receipts: Vec<ReceiptRequest> =
                        state.receipt_requests.drain().map(|(_, request)| request).collect();
                    receipts.sort_by_key(|request| request.seq);
                    receipts
                };

                for mut request in receipts {
                    request.stop_timer();
                    let _ = request.completion.send(Ok(()));
                }

                self.terminate_with(None, StompError::cancelled("session closed"))
                    .await;
            }
            SUBSCRIBE => {
                if let Some(id) = sent.headers.get("id") {
                    self.state.lock().subscriptions.insert(id.to_string());
                }
            }
            UNSUBSCRIBE => {
                if let Some(id) = sent.headers.get("id") {
                    let mut state = self.state.lock();
                    state.subscriptions.remove(id);
                    state.cancel_message_request(id, "subscription closed");
                }
            }
            _ => {}
        }
    }

    fn spawn_receive_loop(self: &Arc<Self>) {
        tokio::spawn(self.clone().run_receive_loop());
    }

    async fn run_receive_loop(self: Arc<Self>) {
        loop {
            {
                let mut state = self.state.lock();
                if state.receive_demand == 0 || state.terminated {
                    state.receive_loop_running = false;
                    return;
                }
            }
            self.receive_frame().await;
        }
    }

    async fn receive_frame(self: &Arc<Self>) {
        let frame = match self.transport.read_frame(self.version).await {
            Ok(frame) => frame,
            Err(err) => return self.fail(err).await,
        };

        let command = frame.command.clone();
        match command.as_str() {
            MESSAGE => self.on_message(frame).await,
            RECEIPT => self.on_receipt(frame).await,
            ERROR => {
                let err = read_server_error(frame).await;
                self.fail(err).await;
            }
            command => {
                warn!(command, "ignoring unexpected frame");
                if let Err(err) = frame.body.drain().await {
                    self.fail(err).await;
                }
            }
        }
    }

    async fn on_message(self: &Arc<Self>, frame: Frame) {
        let (command, headers, body) = frame.into_parts();

        let Some(subscription) = headers.get("subscription").map(str::to_string) else {
            return self
                .fail(StompError::protocol(
                    "server sent MESSAGE frame without including a subscription header",
                ))
                .await;
        };

        let (body, body_end) = body.observe_end();
        let message = Frame::with_parts(command, headers, body);

        let (requested, unhandled) = {
            let mut state = self.state.lock();

            let (requested, undelivered) = match state.message_requests.remove(&subscription) {
                Some(callback) => (true, callback.send(Ok(message)).err().and_then(|unsent| unsent.ok())),
                None => (false, Some(message)),
            };

            let unhandled = match undelivered {
                None => None,
                Some(message) if state.subscriptions.contains(&subscription) => {
                    state.unhandled_message = Some((subscription, message));
                    None
                }
                Some(message) => Some(message),
            };
            (requested, unhandled)
        };

        if unhandled.is_some() {
            drop(unhandled);
            return self.fail(StompError::protocol("unhandled message")).await;
        }

        // the next frame cannot be parsed until this body is consumed
        match body_end.await {
            Ok(BodyEnd::Abandoned(rest)) => {
                if let Err(err) = rest.drain().await {
                    return self.fail(err).await;
                }
            }
            Ok(BodyEnd::Failed(err)) => return self.fail(err).await,
            Ok(BodyEnd::Finished) | Err(_) => {}
        }

        if requested {
            self.state.lock().release_receive_demand();
        }
    }

    async fn on_receipt(self: &Arc<Self>, frame: Frame) {
        let (_, headers, body) = frame.into_parts();

        if let Err(err) = body.read_empty().await {
            return self.fail(err).await;
        }

        let Some(id) = headers.get("receipt-id") else {
            return self
                .fail(StompError::protocol(
                    "server sent RECEIPT frame without a receipt-id header",
                ))
                .await;
        };

        self.process_receipt(id).await;
    }

    /// Complete the receipt request `id` and every request issued before it.
    async fn process_receipt(self: &Arc<Self>, id: &str) {
        let completed = {
            let mut state = self.state.lock();
            let Some(latest) = state.receipt_requests.get(id).map(|request| request.seq) else {
                debug!(receipt = id, "ignoring unknown receipt");
                return;
            };

            let ids: Vec<String> = state
                .receipt_requests
                .iter()
                .filter(|(_, request)| request.seq <= latest)
                .map(|(id, _)| id.clone())
                .collect();

            let mut completed: Vec<ReceiptRequest> = ids
                .iter()
                .filter_map(|id| state.receipt_requests.remove(id))
                .collect();
            completed.sort_by_key(|request| request.seq);
            for _ in &completed {
                state.release_receive_demand();
            }
            completed
        };

        for mut request in completed {
            request.stop_timer();
            self.observe_send_completion(&request.sent).await;
            let _ = request.completion.send(Ok(()));
        }
    }

    /// Report a failure and terminate. Failures after termination are only
    /// echoes of the closed transport and are dropped.
    async fn fail(self: &Arc<Self>, err: StompError) {
        let listener = {
            let state = self.state.lock();
            if state.terminated {
                return;
            }
            state.error_listener.clone()
        };

        warn!(kind = %err.kind(), %err, "session failed");

        if let Some(listener) = listener {
            listener(&err);
        }

        self.terminate(Some(err)).await;
    }

    async fn shutdown(self: &Arc<Self>) {
        self.terminate_with(None, StompError::cancelled("shutdown called"))
            .await;
    }

    async fn terminate(self: &Arc<Self>, cause: Option<StompError>) {
        self.terminate_with(cause, StompError::session_closed(SESSION_DISCONNECTED))
            .await;
    }

    /// End the session, failing everything still pending with `outcome`.
    /// Runs once; the state flips and the pending set is taken under one
    /// lock so no operation can start in between.
    async fn terminate_with(self: &Arc<Self>, cause: Option<StompError>, outcome: StompError) {
        let pending = {
            let mut state = self.state.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
            state.disconnected = true;
            if let Some(cause) = cause {
                state.disconnect_error.get_or_insert(cause);
            }
            state.take_pending()
        };

        pending.close(&outcome);

        debug!("session terminated");
        self.transport.close().await;
    }
}
