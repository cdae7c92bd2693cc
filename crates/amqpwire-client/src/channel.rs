use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use amqpwire_frame::method::{
    BasicAck, BasicCancel, BasicConsume, BasicGet, BasicNack, BasicPublish, BasicQos,
    BasicRecover, BasicReject, ChannelFlow, ConfirmSelect, ExchangeBind, ExchangeDeclare,
    ExchangeDelete, MethodId, QueueBind, QueueDeclare, QueueDeclareOk, QueueDelete, QueuePurge,
    QueueUnbind, BASIC_GET_OK,
};
use amqpwire_frame::{body_frames, ContentHeader, Frame, Method};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::cancel::CancelToken;
use crate::connection::Inner;
use crate::delivery::{
    Confirmation, Consumer, Delivery, GetMessage, PublishConfirm, Publishing, Return,
};
use crate::error::{AmqpError, Error, Result, REPLY_SUCCESS, UNEXPECTED_FRAME};
use crate::sync::Latch;
use crate::tracker::{Assembler, Confirms, Content, ContentMethod};

static CONSUMER_TAGS: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Opening,
    Open,
    /// `channel.close` sent, waiting for `close-ok`.
    Closing,
    Closed,
}

enum Reply {
    Method(Method),
    Get(GetMessage),
}

struct PendingCall {
    expected: &'static [MethodId],
    reply: Sender<Result<Reply>>,
}

struct Core {
    state: State,
    pending: Option<PendingCall>,
    assembler: Assembler,
    consumers: HashMap<String, Sender<Delivery>>,
    returns: Vec<Sender<Return>>,
    cancels: Vec<Sender<String>>,
    flows: Vec<Sender<bool>>,
    closes: Vec<Sender<Error>>,
}

/// Channel state shared between handles and the connection's reader thread.
pub(crate) struct ChannelInner {
    id: u16,
    conn: Weak<Inner>,
    frame_max: usize,
    close_timeout: Duration,
    core: Mutex<Core>,
    /// Locked inside the connection writer lock when publishing.
    confirms: Mutex<Confirms>,
    /// Holds one token; whoever has it may have a synchronous call outstanding.
    permit_tx: Sender<()>,
    permit_rx: Receiver<()>,
    flow_active: AtomicBool,
    terminal: Latch<Error>,
}

/// One logical session multiplexed over a [`Connection`](crate::Connection).
///
/// Handles are cheap to clone and share the same channel. Synchronous calls
/// are serialized: while one is waiting for its reply, other callers on the
/// same channel wait their turn.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
    cancel: Option<CancelToken>,
}

impl Channel {
    pub(crate) fn from_inner(inner: Arc<ChannelInner>, cancel: Option<CancelToken>) -> Self {
        Self { inner, cancel }
    }

    pub(crate) fn inner(&self) -> &ChannelInner {
        &self.inner
    }

    pub(crate) fn open(&self) -> Result<()> {
        self.call(Method::ChannelOpen).map(|_| ())
    }

    pub fn id(&self) -> u16 {
        self.inner.id
    }

    /// A handle on the same channel whose blocking calls give up with
    /// [`Error::Cancelled`] once `token` fires.
    pub fn with_cancel(&self, token: CancelToken) -> Channel {
        Channel {
            inner: Arc::clone(&self.inner),
            cancel: Some(token),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.terminal.is_set()
    }

    /// Whether the server currently allows content to flow (`channel.flow`).
    pub fn is_flow_active(&self) -> bool {
        self.inner.flow_active.load(Ordering::Acquire)
    }

    /// Send `channel.close` and wait for `close-ok`.
    ///
    /// Repeated and concurrent calls return the same result. If the channel
    /// was already closed by the server, its error is returned. When no
    /// `close-ok` arrives within the connection's close timeout the channel
    /// fails with [`Error::CloseTimeout`] and its id stays reserved until the
    /// server answers. On a cancellable handle the wait ends early with
    /// [`Error::Cancelled`]; the close itself still goes ahead.
    pub fn close(&self) -> Result<()> {
        let inner = &self.inner;
        inner.begin_close();

        if !inner.terminal.is_set() {
            let never = crossbeam_channel::never();
            let cancel = self.cancel.as_ref().map_or(&never, CancelToken::receiver);
            let timed_out = select! {
                recv(inner.terminal.signal()) -> _ => false,
                recv(cancel) -> _ => return Err(Error::Cancelled),
                default(inner.close_timeout) => true,
            };
            if timed_out {
                warn!(channel = inner.id, timeout = ?inner.close_timeout, "channel close-ok not received");
                inner.terminate(Error::CloseTimeout(inner.close_timeout));
            }
        }
        let err = inner.closed_error();
        if err.is_graceful() {
            Ok(())
        } else {
            Err(err)
        }
    }

    pub fn exchange_declare(&self, args: ExchangeDeclare) -> Result<()> {
        self.call_ok(Method::ExchangeDeclare(args))
    }

    pub fn exchange_delete(&self, args: ExchangeDelete) -> Result<()> {
        self.call_ok(Method::ExchangeDelete(args))
    }

    /// Exchange-to-exchange binding (RabbitMQ extension).
    pub fn exchange_bind(&self, args: ExchangeBind) -> Result<()> {
        self.call_ok(Method::ExchangeBind(args))
    }

    pub fn exchange_unbind(&self, args: ExchangeBind) -> Result<()> {
        self.call_ok(Method::ExchangeUnbind(args))
    }

    /// Declare a queue. With `no_wait` the returned counts are zero and the
    /// name is the one requested.
    pub fn queue_declare(&self, args: QueueDeclare) -> Result<QueueDeclareOk> {
        let requested = args.queue.clone();
        match self.call(Method::QueueDeclare(args))? {
            Some(Reply::Method(Method::QueueDeclareOk(ok))) => Ok(ok),
            Some(other) => Err(self.unexpected_reply(&other)),
            None => Ok(QueueDeclareOk {
                queue: requested,
                message_count: 0,
                consumer_count: 0,
            }),
        }
    }

    pub fn queue_bind(&self, args: QueueBind) -> Result<()> {
        self.call_ok(Method::QueueBind(args))
    }

    pub fn queue_unbind(&self, args: QueueUnbind) -> Result<()> {
        self.call_ok(Method::QueueUnbind(args))
    }

    /// Returns the number of messages purged.
    pub fn queue_purge(&self, args: QueuePurge) -> Result<u32> {
        match self.call(Method::QueuePurge(args))? {
            Some(Reply::Method(Method::QueuePurgeOk(ok))) => Ok(ok.message_count),
            Some(other) => Err(self.unexpected_reply(&other)),
            None => Ok(0),
        }
    }

    /// Returns the number of messages deleted with the queue.
    pub fn queue_delete(&self, args: QueueDelete) -> Result<u32> {
        match self.call(Method::QueueDelete(args))? {
            Some(Reply::Method(Method::QueueDeleteOk(ok))) => Ok(ok.message_count),
            Some(other) => Err(self.unexpected_reply(&other)),
            None => Ok(0),
        }
    }

    /// Forward a prefetch limit to the broker, which enforces it.
    pub fn qos(&self, prefetch_count: u16, prefetch_size: u32, global: bool) -> Result<()> {
        self.call_ok(Method::BasicQos(BasicQos {
            prefetch_size,
            prefetch_count,
            global,
        }))
    }

    /// Start a consumer. An empty tag is replaced with a generated one.
    ///
    /// The delivery route exists before `basic.consume` is sent, so deliveries
    /// racing ahead of `consume-ok` are not lost.
    pub fn consume(&self, mut args: BasicConsume) -> Result<Consumer> {
        if args.consumer_tag.is_empty() {
            args.consumer_tag = format!(
                "ctag-{}-{}",
                std::process::id(),
                CONSUMER_TAGS.fetch_add(1, Ordering::Relaxed)
            );
        }
        let tag = args.consumer_tag.clone();
        let (tx, rx) = unbounded();
        {
            let mut core = self.inner.core.lock();
            if core.state != State::Open || self.inner.terminal.is_set() {
                return Err(self.inner.closed_error());
            }
            if core.consumers.contains_key(&tag) {
                return Err(Error::InvalidArgument(format!(
                    "consumer tag {tag} already in use on channel {}",
                    self.inner.id
                )));
            }
            core.consumers.insert(tag.clone(), tx);
        }

        match self.call(Method::BasicConsume(args)) {
            Ok(_) => {
                debug!(channel = self.inner.id, consumer_tag = %tag, "consumer registered");
                Ok(Consumer {
                    tag,
                    deliveries: rx,
                })
            }
            Err(err) => {
                self.inner.core.lock().consumers.remove(&tag);
                Err(err)
            }
        }
    }

    /// Stop a consumer; its delivery stream ends once the broker confirms.
    pub fn cancel(&self, consumer_tag: &str, no_wait: bool) -> Result<()> {
        self.call(Method::BasicCancel(BasicCancel {
            consumer_tag: consumer_tag.to_string(),
            no_wait,
        }))?;
        if no_wait {
            self.inner.core.lock().consumers.remove(consumer_tag);
        }
        Ok(())
    }

    pub fn publish(&self, args: BasicPublish, message: Publishing) -> Result<()> {
        self.publish_with_confirm(args, message).map(|_| ())
    }

    /// Publish, returning the pending confirmation when the channel is in
    /// confirm mode.
    ///
    /// The method, header and body frames are written as one atomic sequence
    /// and the publish sequence number is taken under the same lock, so
    /// concurrent publishers get strictly increasing numbers in wire order.
    pub fn publish_with_confirm(
        &self,
        args: BasicPublish,
        message: Publishing,
    ) -> Result<Option<PublishConfirm>> {
        let conn = self.inner.connection()?;
        self.inner.ensure_open()?;

        let id = self.inner.id;
        let size = message.body.len() as u64;
        let mut frames = Vec::with_capacity(3);
        frames.push(Frame::method(id, Method::BasicPublish(args)));
        frames.push(Frame::Header {
            channel: id,
            header: ContentHeader::basic(size, message.properties),
        });
        frames.extend(body_frames(id, &message.body, self.inner.frame_max));

        let confirms = &self.inner.confirms;
        let sequenced = conn.send_sequenced(
            &frames,
            || {
                let mut confirms = confirms.lock();
                confirms.is_enabled().then(|| confirms.publish())
            },
            |sequenced| {
                if let Some((tag, _)) = sequenced {
                    confirms.lock().unpublish(*tag);
                }
            },
        )?;
        Ok(sequenced.map(|(tag, rx)| PublishConfirm::new(tag, rx, self.cancel.clone())))
    }

    /// `basic.get`; `None` when the queue is empty.
    pub fn get(&self, queue: &str, no_ack: bool) -> Result<Option<GetMessage>> {
        let reply = self.call(Method::BasicGet(BasicGet {
            queue: queue.to_string(),
            no_ack,
        }))?;
        match reply {
            Some(Reply::Get(message)) => Ok(Some(message)),
            Some(Reply::Method(Method::BasicGetEmpty)) => Ok(None),
            Some(other) => Err(self.unexpected_reply(&other)),
            None => Ok(None),
        }
    }

    pub fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<()> {
        self.send_async(Method::BasicAck(BasicAck {
            delivery_tag,
            multiple,
        }))
    }

    pub fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool) -> Result<()> {
        self.send_async(Method::BasicNack(BasicNack {
            delivery_tag,
            multiple,
            requeue,
        }))
    }

    pub fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.send_async(Method::BasicReject(BasicReject {
            delivery_tag,
            requeue,
        }))
    }

    /// Ask the broker to redeliver unacknowledged messages.
    pub fn recover(&self, requeue: bool) -> Result<()> {
        self.call_ok(Method::BasicRecover(BasicRecover { requeue }))
    }

    /// Put the channel in confirm mode. Publish sequence numbers start at 1.
    pub fn confirm_select(&self, no_wait: bool) -> Result<()> {
        self.call_ok(Method::ConfirmSelect(ConfirmSelect { no_wait }))?;
        self.inner.confirms.lock().enable();
        Ok(())
    }

    pub fn tx_select(&self) -> Result<()> {
        self.call_ok(Method::TxSelect)
    }

    pub fn tx_commit(&self) -> Result<()> {
        self.call_ok(Method::TxCommit)
    }

    pub fn tx_rollback(&self) -> Result<()> {
        self.call_ok(Method::TxRollback)
    }

    /// Ask the broker to pause (`false`) or resume (`true`) deliveries.
    /// Returns the state the broker confirmed.
    pub fn flow(&self, active: bool) -> Result<bool> {
        match self.call(Method::ChannelFlow(ChannelFlow { active }))? {
            Some(Reply::Method(Method::ChannelFlowOk(ok))) => Ok(ok.active),
            Some(other) => Err(self.unexpected_reply(&other)),
            None => Ok(active),
        }
    }

    /// The sequence number the next publish will get in confirm mode.
    pub fn next_publish_seq_no(&self) -> u64 {
        self.inner.confirms.lock().next_seq_no()
    }

    /// Confirmations in publish-sequence order.
    pub fn notify_publish(&self) -> Receiver<Confirmation> {
        let (tx, rx) = unbounded();
        // register under the core lock so termination cannot slip in between
        let core = self.inner.core.lock();
        if !self.inner.terminal.is_set() {
            self.inner.confirms.lock().listen(tx);
        }
        drop(core);
        rx
    }

    /// Mandatory publishes the broker could not route.
    pub fn notify_return(&self) -> Receiver<Return> {
        self.register(|core| &mut core.returns)
    }

    /// Tags of consumers cancelled by the broker.
    pub fn notify_cancel(&self) -> Receiver<String> {
        self.register(|core| &mut core.cancels)
    }

    /// Server-initiated `channel.flow` changes.
    pub fn notify_flow(&self) -> Receiver<bool> {
        self.register(|core| &mut core.flows)
    }

    /// Yields the terminal error once if the channel fails; ends without an
    /// element on a graceful close.
    pub fn notify_close(&self) -> Receiver<Error> {
        let (tx, rx) = unbounded();
        let mut core = self.inner.core.lock();
        match self.inner.terminal.get() {
            Some(err) => {
                if !err.is_graceful() {
                    let _ = tx.send(err);
                }
            }
            None => core.closes.push(tx),
        }
        rx
    }

    fn register<T>(&self, pick: impl FnOnce(&mut Core) -> &mut Vec<Sender<T>>) -> Receiver<T> {
        let (tx, rx) = unbounded();
        let mut core = self.inner.core.lock();
        if !self.inner.terminal.is_set() {
            pick(&mut core).push(tx);
        }
        rx
    }

    fn call_ok(&self, method: Method) -> Result<()> {
        self.call(method).map(|_| ())
    }

    /// Send a method that the broker never answers.
    fn send_async(&self, method: Method) -> Result<()> {
        let conn = self.inner.connection()?;
        self.inner.ensure_open()?;
        conn.send(&[Frame::method(self.inner.id, method)])
    }

    /// Send `method` and wait for one of its expected replies.
    ///
    /// Returns `None` for requests that expect no reply (`no_wait`).
    fn call(&self, method: Method) -> Result<Option<Reply>> {
        let inner = &self.inner;
        let conn = inner.connection()?;
        let expected = method.expected_replies();
        let frame = Frame::method(inner.id, method);
        if expected.is_empty() {
            inner.ensure_open()?;
            conn.send(std::slice::from_ref(&frame))?;
            return Ok(None);
        }

        self.acquire_permit()?;
        let (tx, rx) = bounded(1);
        {
            let mut core = inner.core.lock();
            let callable = matches!(core.state, State::Opening | State::Open);
            if !callable || inner.terminal.is_set() {
                drop(core);
                inner.release_permit();
                return Err(inner.closed_error());
            }
            core.pending = Some(PendingCall {
                expected,
                reply: tx,
            });
        }

        if let Err(err) = conn.send(std::slice::from_ref(&frame)) {
            inner.core.lock().pending = None;
            inner.release_permit();
            return Err(err);
        }
        drop(conn);

        let reply = match &self.cancel {
            Some(token) => select! {
                recv(rx) -> reply => reply,
                recv(token.receiver()) -> _ => return Err(Error::Cancelled),
            },
            None => rx.recv(),
        };
        match reply {
            Ok(reply) => reply.map(Some),
            Err(_) => Err(inner.closed_error()),
        }
    }

    fn acquire_permit(&self) -> Result<()> {
        let inner = &self.inner;
        let never = crossbeam_channel::never();
        let cancel = self.cancel.as_ref().map_or(&never, CancelToken::receiver);
        select! {
            recv(inner.permit_rx) -> _ => Ok(()),
            recv(inner.terminal.signal()) -> _ => Err(inner.closed_error()),
            recv(cancel) -> _ => Err(Error::Cancelled),
        }
    }

    fn unexpected_reply(&self, reply: &Reply) -> Error {
        let described = match reply {
            Reply::Method(method) => format!("method {}", method.id()),
            Reply::Get(_) => "basic.get-ok".to_string(),
        };
        Error::UnexpectedFrame(format!(
            "unexpected reply {described} on channel {}",
            self.inner.id
        ))
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("state", &self.inner.core.lock().state)
            .field("cancellable", &self.cancel.is_some())
            .finish()
    }
}

impl ChannelInner {
    pub(crate) fn new(id: u16, conn: Weak<Inner>, frame_max: usize, close_timeout: Duration) -> Self {
        let (permit_tx, permit_rx) = bounded(1);
        let _ = permit_tx.send(());
        Self {
            id,
            conn,
            frame_max,
            close_timeout,
            core: Mutex::new(Core {
                state: State::Opening,
                pending: None,
                assembler: Assembler::new(),
                consumers: HashMap::new(),
                returns: Vec::new(),
                cancels: Vec::new(),
                flows: Vec::new(),
                closes: Vec::new(),
            }),
            confirms: Mutex::new(Confirms::new()),
            permit_tx,
            permit_rx,
            flow_active: AtomicBool::new(true),
            terminal: Latch::new(),
        }
    }

    pub(crate) fn id(&self) -> u16 {
        self.id
    }

    /// `channel.close` went out and the id is held until `close-ok` arrives.
    pub(crate) fn awaiting_close_ok(&self) -> bool {
        self.core.lock().state == State::Closing
    }

    /// Move to `Closing` and send `channel.close` without waiting. Returns
    /// false if the channel was already closing or closed.
    pub(crate) fn begin_close(&self) -> bool {
        let started = {
            let mut core = self.core.lock();
            match core.state {
                State::Opening | State::Open if !self.terminal.is_set() => {
                    core.state = State::Closing;
                    core.assembler.reset();
                    if let Some(pending) = core.pending.take() {
                        let _ = pending.reply.send(Err(Error::ChannelClosed {
                            channel: self.id,
                            reason: None,
                        }));
                    }
                    true
                }
                _ => false,
            }
        };
        if started {
            self.release_permit();
            debug!(channel = self.id, "closing channel");
            let close = AmqpError::local(REPLY_SUCCESS, "Goodbye").to_close();
            if let Ok(conn) = self.connection() {
                // a failed write fails the connection, which terminates this channel
                let _ = conn.send(&[Frame::method(self.id, Method::ChannelClose(close))]);
            }
        }
        started
    }

    fn connection(&self) -> Result<Arc<Inner>> {
        self.conn.upgrade().ok_or(Error::ConnectionClosed(None))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.core.lock().state != State::Open || self.terminal.is_set() {
            return Err(self.closed_error());
        }
        Ok(())
    }

    fn closed_error(&self) -> Error {
        self.terminal.get().unwrap_or(Error::ChannelClosed {
            channel: self.id,
            reason: None,
        })
    }

    fn release_permit(&self) {
        let _ = self.permit_tx.try_send(());
    }

    /// Entry point for the connection's reader thread.
    ///
    /// `close()` may run on another thread at any point here, so each handler
    /// re-checks the state under the lock it acts under.
    pub(crate) fn handle_frame(&self, conn: &Inner, frame: Frame) {
        if self.is_closing() {
            match frame {
                Frame::Method {
                    method: method @ (Method::ChannelClose(_) | Method::ChannelCloseOk),
                    ..
                } => self.on_method(conn, method),
                frame => trace!(
                    channel = self.id,
                    frame_type = frame.frame_type(),
                    "discarding frame on closing channel"
                ),
            }
            return;
        }

        match frame {
            Frame::Method { method, .. } => self.on_method(conn, method),
            Frame::Header { header, .. } => {
                let step = self.core.lock().assembler.header(header);
                self.on_content(conn, step);
            }
            Frame::Body { payload, .. } => {
                let step = self.core.lock().assembler.body(payload);
                self.on_content(conn, step);
            }
            Frame::Heartbeat => {}
        }
    }

    fn on_method(&self, conn: &Inner, method: Method) {
        match method {
            Method::ChannelClose(close) => {
                let reason = AmqpError::from_server(&close);
                warn!(channel = self.id, %reason, "server closed channel");
                let _ = conn.send(&[Frame::method(self.id, Method::ChannelCloseOk)]);
                // our own close crossed the server's; its close-ok releases the id
                let crossed = {
                    let mut core = self.core.lock();
                    let crossed = core.state == State::Closing;
                    if !crossed {
                        core.state = State::Closed;
                    }
                    crossed
                };
                if !crossed {
                    conn.release_channel(self.id);
                }
                self.terminate(Error::ChannelClosed {
                    channel: self.id,
                    reason: Some(reason),
                });
            }
            Method::ChannelCloseOk => {
                let awaited = {
                    let mut core = self.core.lock();
                    let awaited = core.state == State::Closing;
                    if awaited {
                        core.state = State::Closed;
                    }
                    awaited
                };
                if awaited {
                    // the id is free before close() returns
                    conn.release_channel(self.id);
                    self.terminate(Error::ChannelClosed {
                        channel: self.id,
                        reason: None,
                    });
                    debug!(channel = self.id, "channel closed");
                }
            }
            _ if self.core.lock().assembler.is_active() => {
                self.fail_local(conn, "method frame while content is incomplete");
            }
            Method::ChannelFlow(flow) => {
                self.flow_active.store(flow.active, Ordering::Release);
                debug!(channel = self.id, active = flow.active, "server flow");
                self.core
                    .lock()
                    .flows
                    .retain(|listener| listener.send(flow.active).is_ok());
                let _ = conn.send(&[Frame::method(self.id, Method::ChannelFlowOk(flow))]);
            }
            Method::BasicDeliver(deliver) => self.start_content(conn, ContentMethod::Deliver(deliver)),
            Method::BasicReturn(ret) => self.start_content(conn, ContentMethod::Return(ret)),
            Method::BasicGetOk(get_ok) => {
                let expecting = self
                    .core
                    .lock()
                    .pending
                    .as_ref()
                    .is_some_and(|pending| pending.expected.contains(&BASIC_GET_OK));
                if expecting {
                    self.start_content(conn, ContentMethod::GetOk(get_ok));
                } else {
                    self.fail_local(conn, "basic.get-ok without a pending basic.get");
                }
            }
            Method::BasicAck(ack) => {
                self.confirms
                    .lock()
                    .resolve(ack.delivery_tag, ack.multiple, true);
            }
            Method::BasicNack(nack) => {
                self.confirms
                    .lock()
                    .resolve(nack.delivery_tag, nack.multiple, false);
            }
            Method::BasicCancel(cancel) => {
                debug!(channel = self.id, consumer_tag = %cancel.consumer_tag, "server cancelled consumer");
                let mut core = self.core.lock();
                core.consumers.remove(&cancel.consumer_tag);
                let tag = cancel.consumer_tag;
                core.cancels.retain(|listener| listener.send(tag.clone()).is_ok());
            }
            reply => self.on_reply(conn, Reply::Method(reply)),
        }
    }

    fn start_content(&self, conn: &Inner, method: ContentMethod) {
        let started = self.core.lock().assembler.start(method);
        if let Err(err) = started {
            self.fail_with(conn, err);
        }
    }

    fn on_content(&self, conn: &Inner, step: std::result::Result<Option<Content>, AmqpError>) {
        match step {
            Ok(None) => {}
            Ok(Some(Content::Deliver(delivery))) => {
                let core = self.core.lock();
                match core.consumers.get(&delivery.consumer_tag) {
                    Some(route) => {
                        let _ = route.send(delivery);
                    }
                    None => warn!(
                        channel = self.id,
                        consumer_tag = %delivery.consumer_tag,
                        "dropping delivery for unknown consumer"
                    ),
                }
            }
            Ok(Some(Content::Return(ret))) => {
                let mut core = self.core.lock();
                if core.returns.is_empty() {
                    warn!(channel = self.id, reply_code = ret.reply_code, "unhandled basic.return");
                }
                core.returns.retain(|listener| listener.send(ret.clone()).is_ok());
            }
            Ok(Some(Content::GetOk(message))) => self.on_reply(conn, Reply::Get(message)),
            Err(err) => self.fail_with(conn, err),
        }
    }

    /// Hand a reply to the outstanding call, or fail the channel if none expects it.
    fn on_reply(&self, conn: &Inner, reply: Reply) {
        let id = match &reply {
            Reply::Method(method) => method.id(),
            Reply::Get(_) => BASIC_GET_OK,
        };
        let pending = {
            let mut core = self.core.lock();
            let matches = core
                .pending
                .as_ref()
                .is_some_and(|pending| pending.expected.contains(&id));
            if !matches {
                if matches!(core.state, State::Closing | State::Closed) {
                    // close() took the call while this reply was in flight
                    trace!(channel = self.id, method = %id, "discarding reply on closing channel");
                    return;
                }
                None
            } else {
                match &reply {
                    Reply::Method(Method::ChannelOpenOk) => {
                        core.state = State::Open;
                        debug!(channel = self.id, "channel open");
                    }
                    Reply::Method(Method::BasicCancelOk(ok)) => {
                        core.consumers.remove(&ok.consumer_tag);
                    }
                    _ => {}
                }
                core.pending.take()
            }
        };

        match pending {
            Some(pending) => {
                // the caller may have been cancelled; the reply is then discarded
                let _ = pending.reply.send(Ok(reply));
                self.release_permit();
            }
            None => self.fail_local(conn, &format!("unexpected method {id}")),
        }
    }

    fn fail_local(&self, conn: &Inner, text: &str) {
        self.fail_with(conn, AmqpError::local(UNEXPECTED_FRAME, text));
    }

    /// Close the channel for a client-detected protocol violation. The id stays
    /// reserved until the server's `close-ok`.
    fn fail_with(&self, conn: &Inner, reason: AmqpError) {
        {
            let mut core = self.core.lock();
            if matches!(core.state, State::Closing | State::Closed) {
                trace!(channel = self.id, %reason, "channel already closing");
                return;
            }
            core.state = State::Closing;
            core.assembler.reset();
        }
        warn!(channel = self.id, %reason, "closing channel after protocol error");
        let _ = conn.send(&[Frame::method(
            self.id,
            Method::ChannelClose(reason.to_close()),
        )]);
        self.terminate(Error::ChannelClosed {
            channel: self.id,
            reason: Some(reason),
        });
    }

    fn is_closing(&self) -> bool {
        matches!(self.core.lock().state, State::Closing | State::Closed)
    }

    /// Reach the terminal state exactly once: fail the outstanding call, end
    /// every stream and resolve outstanding confirms negatively.
    pub(crate) fn terminate(&self, err: Error) {
        if !self.terminal.set(err.clone()) {
            return;
        }
        let (pending, closes) = {
            let mut core = self.core.lock();
            if matches!(core.state, State::Opening | State::Open) {
                core.state = State::Closed;
            }
            core.assembler.reset();
            core.consumers.clear();
            core.returns.clear();
            core.cancels.clear();
            core.flows.clear();
            (core.pending.take(), std::mem::take(&mut core.closes))
        };
        if let Some(pending) = pending {
            let _ = pending.reply.send(Err(err.clone()));
        }
        self.release_permit();
        self.confirms.lock().fail_all();
        if !err.is_graceful() {
            for listener in closes {
                let _ = listener.send(err.clone());
            }
        }
        debug!(channel = self.id, %err, "channel terminated");
    }
}
