use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use wire_library::channel::{channel_create, ChannelRx, ChannelTx, ReceiveError};

use super::connection::{ConnectionShared, ConnectionState};
use super::content::{Content, ContentAssembler, Delivery, PendingContent};
use super::defines::AMQP_REPLY_SUCCESS;
use super::diagnostics::Diagnostics;
use super::error::{AmqpError, AmqpResult};
use super::frame::{AmqpFrame, AmqpFramePayload, AmqpMethod, AmqpTable};
use super::{AmqpConsumeFlags, AmqpExchangeFlags, AmqpPublishFlags, AmqpQueueFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    ChannelOpenOk,
    ChannelCloseOk,
    ExchangeDeclareOk,
    QueueDeclareOk,
    QueueBindOk,
    BasicConsumeOk,
    BasicCancelOk,
    BasicGet,
}

impl ReplyKind {
    fn of(method: &AmqpMethod) -> Option<ReplyKind> {
        match method {
            AmqpMethod::ChannelOpenOk() => Some(ReplyKind::ChannelOpenOk),
            AmqpMethod::ChannelCloseOk() => Some(ReplyKind::ChannelCloseOk),
            AmqpMethod::ExchangeDeclareOk() => Some(ReplyKind::ExchangeDeclareOk),
            AmqpMethod::QueueDeclareOk(..) => Some(ReplyKind::QueueDeclareOk),
            AmqpMethod::QueueBindOk() => Some(ReplyKind::QueueBindOk),
            AmqpMethod::BasicConsumeOk(_) => Some(ReplyKind::BasicConsumeOk),
            AmqpMethod::BasicCancelOk(_) => Some(ReplyKind::BasicCancelOk),
            AmqpMethod::BasicGetOk(..) | AmqpMethod::BasicGetEmpty() => Some(ReplyKind::BasicGet),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ReplyKind::ChannelOpenOk => "channel.open-ok",
            ReplyKind::ChannelCloseOk => "channel.close-ok",
            ReplyKind::ExchangeDeclareOk => "exchange.declare-ok",
            ReplyKind::QueueDeclareOk => "queue.declare-ok",
            ReplyKind::QueueBindOk => "queue.bind-ok",
            ReplyKind::BasicConsumeOk => "basic.consume-ok",
            ReplyKind::BasicCancelOk => "basic.cancel-ok",
            ReplyKind::BasicGet => "basic.get-ok",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Opening,
    Ready,
    AwaitingReply(ReplyKind),
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Processed,
    TimedOut,
    SessionDead,
}

impl WaitStatus {
    pub fn code(self) -> i32 {
        match self {
            WaitStatus::Processed => 0,
            WaitStatus::TimedOut => 1,
            WaitStatus::SessionDead => -1,
        }
    }
}

struct SessionInner {
    state: SessionState,
    caller: bool,
    stale: VecDeque<ReplyKind>,
    assembler: ContentAssembler,
    pending_get: Option<AmqpMethod>,
    arrived: VecDeque<Content>,
    returned: VecDeque<Content>,
    dropped: u64,
    consumer_tags: Vec<String>,
    queue: String,
    exchange: String,
    message_count: u32,
    consumer_count: u32,
    active: bool,
    last_error: Option<AmqpError>,
    destroyed: bool,
    events: u64,
}

impl SessionInner {
    fn enqueue(&mut self, content: Content, capacity: usize) -> bool {
        let queue = match content.delivery() {
            Delivery::Return { .. } => &mut self.returned,
            _ => &mut self.arrived,
        };

        if capacity != 0 && queue.len() >= capacity {
            self.dropped += 1;
            return false;
        }

        queue.push_back(content);
        true
    }

    fn expected(&self) -> Option<ReplyKind> {
        match self.state {
            SessionState::AwaitingReply(kind) => Some(kind),
            SessionState::Closing => Some(ReplyKind::ChannelCloseOk),
            _ => None,
        }
    }
}

pub(crate) struct SessionShared {
    channel: u16,
    capacity: usize,
    diagnostics: Arc<Diagnostics>,
    inner: Mutex<SessionInner>,
    activity: Condvar,
    replies_rx: ChannelRx<AmqpResult<AmqpMethod>>,
    replies_tx: ChannelTx<AmqpResult<AmqpMethod>>,
}

impl SessionShared {
    pub fn new(channel: u16, capacity: usize, diagnostics: Arc<Diagnostics>) -> Self {
        let (replies_rx, replies_tx) = channel_create();

        Self {
            channel,
            capacity,
            diagnostics,
            inner: Mutex::new(SessionInner {
                state: SessionState::Opening,
                caller: false,
                stale: VecDeque::new(),
                assembler: ContentAssembler::default(),
                pending_get: None,
                arrived: VecDeque::new(),
                returned: VecDeque::new(),
                dropped: 0,
                consumer_tags: Vec::new(),
                queue: String::new(),
                exchange: String::new(),
                message_count: 0,
                consumer_count: 0,
                active: true,
                last_error: None,
                destroyed: false,
                events: 0,
            }),
            activity: Condvar::new(),
            replies_rx,
            replies_tx,
        }
    }

    pub fn channel(&self) -> u16 {
        self.channel
    }

    fn set_state(&self, inner: &mut SessionInner, state: SessionState) {
        if inner.state != state {
            diag!(self.diagnostics, Trace, "channel {} {:?} -> {:?}", self.channel, inner.state, state);
            inner.state = state;
        }
    }

    fn dead_error(&self, inner: &SessionInner) -> AmqpError {
        if inner.destroyed {
            return AmqpError::SessionDestroyed;
        }

        match &inner.last_error {
            Some(error @ AmqpError::ConnectionDead(_)) => error.clone(),
            Some(error) => AmqpError::SessionDead(error.to_string()),
            None => AmqpError::SessionDead(format!("channel {} is {:?}", self.channel, inner.state)),
        }
    }

    fn check_alive(&self, inner: &SessionInner) -> AmqpResult<()> {
        let usable = !inner.destroyed
            && inner.last_error.is_none()
            && !matches!(inner.state, SessionState::Closing | SessionState::Closed);

        if !usable {
            return Err(self.dead_error(inner));
        }

        Ok(())
    }

    fn begin_call(&self, kind: ReplyKind) -> AmqpResult<()> {
        let mut inner = self.inner.lock();
        self.check_alive(&inner)?;

        if inner.caller {
            return Err(AmqpError::Contract(format!("channel {} already has a request outstanding", self.channel)));
        }

        let next = match (inner.state, kind) {
            (SessionState::Opening, ReplyKind::ChannelOpenOk) => SessionState::AwaitingReply(kind),
            (SessionState::Ready, ReplyKind::ChannelCloseOk) => SessionState::Closing,
            (SessionState::Ready, kind) => SessionState::AwaitingReply(kind),
            (SessionState::AwaitingReply(pending), _) => {
                return Err(AmqpError::Contract(format!("channel {} is already waiting for {}", self.channel, pending.name())));
            },
            (state, _) => {
                return Err(AmqpError::Contract(format!("channel {} cannot send a request while {:?}", self.channel, state)));
            },
        };

        inner.caller = true;
        self.set_state(&mut inner, next);
        Ok(())
    }

    fn end_call(&self) {
        self.inner.lock().caller = false;
        self.activity.notify_all();
    }

    // a reply still on its way is remembered as stale and dropped when it shows up
    fn abandon_call(&self, inner: &mut SessionInner, kind: ReplyKind, stale: bool) {
        if inner.state == SessionState::AwaitingReply(kind) {
            self.set_state(inner, SessionState::Ready);
        }

        // get-ok already arrived, its message still lands in the arrived queue
        let answered = kind == ReplyKind::BasicGet && inner.pending_get.take().is_some();

        if stale && !answered {
            inner.stale.push_back(kind);
        }
    }

    fn wait_idle(&self, deadline: Instant) -> bool {
        let mut inner = self.inner.lock();

        while inner.caller {
            diag!(self.diagnostics, Debug, "channel {} waiting for the request in flight, state {:?}", self.channel, inner.state);
            if self.activity.wait_until(&mut inner, deadline).timed_out() {
                return !inner.caller;
            }
        }

        true
    }

    fn complete_call(&self, inner: &mut SessionInner, kind: ReplyKind, reply: AmqpResult<AmqpMethod>) {
        let next = match kind {
            ReplyKind::ChannelCloseOk => SessionState::Closed,
            _ => SessionState::Ready,
        };

        self.set_state(inner, next);
        self.replies_tx.send(reply);
    }

    pub fn call(&self, connection: &ConnectionShared, method: AmqpMethod, kind: ReplyKind) -> AmqpResult<AmqpMethod> {
        connection.is_connection_valid()?;
        self.begin_call(kind)?;

        let reply = self.round_trip(connection, method, kind);
        self.end_call();

        reply
    }

    fn round_trip(&self, connection: &ConnectionShared, method: AmqpMethod, kind: ReplyKind) -> AmqpResult<AmqpMethod> {
        if let Err(error) = connection.send_method(self.channel, method) {
            self.abandon_call(&mut self.inner.lock(), kind, false);
            return Err(error);
        }

        match self.replies_rx.receive_timeout(connection.timeout) {
            Ok(reply) => reply,
            Err(ReceiveError::Timeout) => {
                let mut inner = self.inner.lock();

                // replies are posted under the same lock, so this check is final
                if let Some(reply) = self.replies_rx.try_receive() {
                    return reply;
                }

                self.abandon_call(&mut inner, kind, true);
                diag!(self.diagnostics, Warn, "channel {} gave up waiting for {} after {:?}", self.channel, kind.name(), connection.timeout);
                Err(AmqpError::Timeout(kind.name()))
            },
            Err(ReceiveError::Closed) => Err(self.dead_error(&self.inner.lock())),
        }
    }

    /// Errors are fatal for the whole connection. A broker `channel.close` is answered by the
    /// dispatcher before it gets here.
    pub fn handle_frame(&self, frame: AmqpFrame) -> AmqpResult<Option<AmqpMethod>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut reply = None;
        inner.events += 1;

        let result = match frame.payload {
            AmqpFramePayload::Method(AmqpMethod::ChannelClose(code, text, class_id, method_id)) => {
                let error = AmqpError::ChannelClosedByServer(code, text, class_id, method_id);
                if code == AMQP_REPLY_SUCCESS {
                    diag!(self.diagnostics, Info, "channel {} closed by broker", self.channel);
                } else {
                    diag!(self.diagnostics, Warn, "channel {} closed by broker - {}", self.channel, error);
                }

                if inner.expected().is_some() {
                    self.replies_tx.send(Err(error.clone()));
                }

                inner.last_error = Some(error);
                self.set_state(inner, SessionState::Closed);
                self.replies_tx.close();
                Ok(())
            },
            AmqpFramePayload::Method(AmqpMethod::ChannelFlow(active)) => {
                diag!(self.diagnostics, Info, "channel {} flow {}", self.channel, if active { "resumed" } else { "paused" });
                inner.active = active;
                reply = Some(AmqpMethod::ChannelFlowOk(active));
                Ok(())
            },
            AmqpFramePayload::Method(AmqpMethod::BasicDeliver(consumer_tag, delivery_tag, redelivered, exchange, routing_key)) => {
                let delivery = Delivery::Deliver { consumer_tag, delivery_tag, redelivered };
                inner.assembler.start(PendingContent { delivery, exchange, routing_key })
            },
            AmqpFramePayload::Method(AmqpMethod::BasicReturn(reply_code, reply_text, exchange, routing_key)) => {
                let delivery = Delivery::Return { reply_code, reply_text };
                inner.assembler.start(PendingContent { delivery, exchange, routing_key })
            },
            AmqpFramePayload::Method(method) => self.resolve_reply(inner, method),
            AmqpFramePayload::Header(class_id, size, properties) => {
                inner.assembler.header(class_id, size, properties).map(|content| {
                    if let Some(content) = content {
                        self.route_content(inner, content);
                    }
                })
            },
            AmqpFramePayload::Content(data) => {
                inner.assembler.body(&data).map(|content| {
                    if let Some(content) = content {
                        self.route_content(inner, content);
                    }
                })
            },
            AmqpFramePayload::Heartbeat() => Ok(()),
        };

        drop(guard);
        self.activity.notify_all();

        result.map(|_| reply)
    }

    fn resolve_reply(&self, inner: &mut SessionInner, method: AmqpMethod) -> AmqpResult<()> {
        let kind = match ReplyKind::of(&method) {
            Some(kind) => kind,
            None => {
                diag!(self.diagnostics, Warn, "channel {} ignoring unexpected {}", self.channel, method.name());
                return Ok(());
            },
        };

        if inner.stale.front() == Some(&kind) {
            inner.stale.pop_front();
            diag!(self.diagnostics, Debug, "channel {} discarding late {}", self.channel, method.name());

            // the message of a late get-ok has already left the broker, keep it
            if let Some(pending) = get_ok_content(&method) {
                inner.assembler.start(pending)?;
            }

            return Ok(());
        }

        if inner.expected() != Some(kind) {
            diag!(self.diagnostics, Warn, "channel {} ignoring {} nobody waits for", self.channel, method.name());
            return Ok(());
        }

        match get_ok_content(&method) {
            Some(pending) => {
                inner.assembler.start(pending)?;
                inner.pending_get = Some(method);
            },
            None => self.complete_call(inner, kind, Ok(method)),
        }

        Ok(())
    }

    fn route_content(&self, inner: &mut SessionInner, content: Content) {
        let is_get = matches!(content.delivery(), Delivery::Get { .. });

        if !inner.enqueue(content, self.capacity) {
            diag!(self.diagnostics, Warn, "channel {} queue full ({} messages), dropping incoming message", self.channel, self.capacity);
        }

        if is_get && inner.state == SessionState::AwaitingReply(ReplyKind::BasicGet) {
            if let Some(reply) = inner.pending_get.take() {
                self.complete_call(inner, ReplyKind::BasicGet, Ok(reply));
            }
        }
    }

    pub fn mark_dead(&self, error: AmqpError) {
        let mut inner = self.inner.lock();
        if inner.last_error.is_none() {
            diag!(self.diagnostics, Debug, "channel {} dead - {}", self.channel, error);
            inner.last_error = Some(error);
        }

        self.set_state(&mut inner, SessionState::Closed);
        inner.events += 1;
        drop(inner);

        self.replies_tx.close();
        self.activity.notify_all();
    }

    fn mark_destroyed(&self) {
        let mut inner = self.inner.lock();
        inner.destroyed = true;
        if inner.last_error.is_none() {
            inner.last_error = Some(AmqpError::SessionDestroyed);
        }

        self.set_state(&mut inner, SessionState::Closed);
        inner.events += 1;
        drop(inner);

        self.replies_tx.close();
        self.activity.notify_all();
    }
}

fn get_ok_content(method: &AmqpMethod) -> Option<PendingContent> {
    match method {
        AmqpMethod::BasicGetOk(delivery_tag, redelivered, exchange, routing_key, message_count) => Some(PendingContent {
            delivery: Delivery::Get { delivery_tag: *delivery_tag, redelivered: *redelivered, message_count: *message_count },
            exchange: exchange.clone(),
            routing_key: routing_key.clone(),
        }),
        _ => None,
    }
}

pub struct Session {
    connection: Arc<ConnectionShared>,
    shared: Arc<SessionShared>,
}

impl Session {
    pub(crate) fn new(connection: Arc<ConnectionShared>, shared: Arc<SessionShared>) -> Self {
        Self { connection, shared }
    }

    pub(crate) fn open(&self) -> AmqpResult<()> {
        match self.call(AmqpMethod::ChannelOpen(), ReplyKind::ChannelOpenOk) {
            Ok(_) => {
                diag!(self.shared.diagnostics, Info, "channel {} open", self.shared.channel);
                Ok(())
            },
            Err(error) => {
                diag!(self.shared.diagnostics, Warn, "channel {} failed to open - {}", self.shared.channel, error);
                self.shared.mark_destroyed();
                self.connection.remove_session(&self.shared);
                Err(error)
            },
        }
    }

    fn call(&self, method: AmqpMethod, kind: ReplyKind) -> AmqpResult<AmqpMethod> {
        self.shared.call(&self.connection, method, kind)
    }

    fn current_queue(&self, queue: Option<&str>) -> String {
        match queue {
            Some(queue) => queue.to_string(),
            None => self.shared.inner.lock().queue.clone(),
        }
    }

    pub fn declare_exchange(&self, name: &str, exchange_type: &str, flags: AmqpExchangeFlags) -> AmqpResult<()> {
        let method = AmqpMethod::ExchangeDeclare(name.to_string(), exchange_type.to_string(), flags.into(), AmqpTable::new());

        match self.call(method, ReplyKind::ExchangeDeclareOk) {
            Ok(_) => {
                self.shared.inner.lock().exchange = name.to_string();
                Ok(())
            },
            Err(error) => {
                if flags.is_passive() && error.is_not_found() {
                    diag!(self.shared.diagnostics, Info, "exchange {} does not exist", name);
                }
                Err(error)
            },
        }
    }

    /// Declares `name`, or a broker-named queue when `None`. Returns the queue's name.
    pub fn declare_queue(&self, name: Option<&str>, flags: AmqpQueueFlags) -> AmqpResult<String> {
        let method = AmqpMethod::QueueDeclare(name.unwrap_or_default().to_string(), flags.into(), AmqpTable::new());

        match self.call(method, ReplyKind::QueueDeclareOk)? {
            AmqpMethod::QueueDeclareOk(queue, message_count, consumer_count) => {
                let mut inner = self.shared.inner.lock();
                inner.queue = queue.clone();
                inner.message_count = message_count;
                inner.consumer_count = consumer_count;

                Ok(queue)
            },
            other => Err(AmqpError::UnexpectedFrame("queue.declare-ok", other.name().to_string())),
        }
    }

    pub fn bind_queue(&self, queue: Option<&str>, exchange: &str, routing_key: &str) -> AmqpResult<()> {
        let queue = self.current_queue(queue);
        let method = AmqpMethod::QueueBind(queue.clone(), exchange.to_string(), routing_key.to_string(), 0, AmqpTable::new());

        self.call(method, ReplyKind::QueueBindOk)?;

        let mut inner = self.shared.inner.lock();
        inner.queue = queue;
        inner.exchange = exchange.to_string();
        Ok(())
    }

    pub fn consume(&self, queue: Option<&str>, consumer_tag: Option<&str>, flags: AmqpConsumeFlags) -> AmqpResult<String> {
        let queue = self.current_queue(queue);
        let method = AmqpMethod::BasicConsume(queue, consumer_tag.unwrap_or_default().to_string(), flags.into(), AmqpTable::new());

        match self.call(method, ReplyKind::BasicConsumeOk)? {
            AmqpMethod::BasicConsumeOk(tag) => {
                diag!(self.shared.diagnostics, Info, "channel {} consuming as {}", self.shared.channel, tag);
                self.shared.inner.lock().consumer_tags.push(tag.clone());
                Ok(tag)
            },
            other => Err(AmqpError::UnexpectedFrame("basic.consume-ok", other.name().to_string())),
        }
    }

    /// Cancels a consumer. `None` is only accepted while exactly one consumer is active.
    pub fn basic_cancel(&self, consumer_tag: Option<&str>) -> AmqpResult<String> {
        let tag = match consumer_tag {
            Some(tag) => tag.to_string(),
            None => {
                let inner = self.shared.inner.lock();
                match inner.consumer_tags.as_slice() {
                    [tag] => tag.clone(),
                    [] => return Err(AmqpError::Contract("no consumer to cancel".to_string())),
                    tags => return Err(AmqpError::Contract(format!("{} consumers active, name the one to cancel", tags.len()))),
                }
            },
        };

        match self.call(AmqpMethod::BasicCancel(tag, 0), ReplyKind::BasicCancelOk)? {
            AmqpMethod::BasicCancelOk(tag) => {
                self.shared.inner.lock().consumer_tags.retain(|current| *current != tag);
                Ok(tag)
            },
            other => Err(AmqpError::UnexpectedFrame("basic.cancel-ok", other.name().to_string())),
        }
    }

    pub fn publish_body(&self, body: &[u8], exchange: &str, routing_key: &str, flags: AmqpPublishFlags, reply_to: Option<&str>) -> AmqpResult<()> {
        let mut content = Content::with_body(body);
        content.set_reply_to(reply_to)?;

        self.publish_content(&mut content, exchange, routing_key, flags)
    }

    // allowed while a request is outstanding, publish has no reply
    pub fn publish_content(&self, content: &mut Content, exchange: &str, routing_key: &str, flags: AmqpPublishFlags) -> AmqpResult<()> {
        self.connection.is_connection_valid()?;
        {
            let inner = self.shared.inner.lock();
            self.shared.check_alive(&inner)?;
            if !inner.active {
                diag!(self.shared.diagnostics, Warn, "channel {} publishing while the broker paused the flow", self.shared.channel);
            }
        }

        let method = AmqpMethod::BasicPublish(exchange.to_string(), routing_key.to_string(), flags.into());
        self.connection.send_content(self.shared.channel, method, content.properties(), content.body())?;
        content.set_route(exchange, routing_key);

        Ok(())
    }

    /// Fetches one message with `basic.get`. Returns false when the queue was empty; a message
    /// goes to the arrived queue.
    pub fn basic_get(&self, queue: Option<&str>) -> AmqpResult<bool> {
        let queue = self.current_queue(queue);

        match self.call(AmqpMethod::BasicGet(queue, true), ReplyKind::BasicGet)? {
            AmqpMethod::BasicGetOk(.., message_count) => {
                self.shared.inner.lock().message_count = message_count;
                Ok(true)
            },
            AmqpMethod::BasicGetEmpty() => Ok(false),
            other => Err(AmqpError::UnexpectedFrame("basic.get-ok", other.name().to_string())),
        }
    }

    pub fn pop_arrived(&self) -> Option<Content> {
        self.shared.inner.lock().arrived.pop_front()
    }

    pub fn arrived_count(&self) -> usize {
        self.shared.inner.lock().arrived.len()
    }

    pub fn pop_returned(&self) -> Option<Content> {
        self.shared.inner.lock().returned.pop_front()
    }

    pub fn returned_count(&self) -> usize {
        self.shared.inner.lock().returned.len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.shared.inner.lock().dropped
    }

    /// Blocks until the dispatch thread handled a frame for this session, a message is
    /// waiting, or `timeout_ms` elapses. Zero waits without a deadline.
    pub fn wait(&self, timeout_ms: i64) -> AmqpResult<WaitStatus> {
        if timeout_ms < 0 {
            return Err(AmqpError::Contract(format!("wait timeout must not be negative, got {}", timeout_ms)));
        }

        let deadline = match timeout_ms {
            0 => None,
            timeout_ms => Some(Instant::now() + Duration::from_millis(timeout_ms as u64)),
        };

        let mut inner = self.shared.inner.lock();
        let seen = inner.events;

        loop {
            if inner.destroyed {
                return Err(AmqpError::SessionDestroyed);
            }

            if !inner.arrived.is_empty() || !inner.returned.is_empty() {
                return Ok(WaitStatus::Processed);
            }

            if inner.state == SessionState::Closed {
                return Ok(WaitStatus::SessionDead);
            }

            if inner.events != seen {
                return Ok(WaitStatus::Processed);
            }

            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Ok(WaitStatus::TimedOut);
                    }
                    self.shared.activity.wait_until(&mut inner, deadline);
                },
                None => self.shared.activity.wait(&mut inner),
            }
        }
    }

    /// Consumes from `queue` and hands every message to `handler` until it returns false,
    /// nothing arrives within `timeout_ms`, or the session dies. The consumer is cancelled
    /// afterwards. Returns how many messages were handled.
    pub fn consume_with<F>(&self, queue: Option<&str>, consumer_tag: Option<&str>, flags: AmqpConsumeFlags, timeout_ms: i64, mut handler: F) -> AmqpResult<usize>
    where
        F: FnMut(Content) -> bool,
    {
        let tag = self.consume(queue, consumer_tag, flags)?;
        let mut handled = 0;

        let outcome = 'consume: loop {
            while let Some(mut content) = self.pop_arrived() {
                content.unlink();
                handled += 1;

                if !handler(content) {
                    break 'consume Ok(());
                }
            }

            match self.wait(timeout_ms) {
                Ok(WaitStatus::Processed) => continue,
                Ok(WaitStatus::TimedOut) => break Ok(()),
                Ok(WaitStatus::SessionDead) => break Err(self.shared.dead_error(&self.shared.inner.lock())),
                Err(error) => break Err(error),
            }
        };

        if self.alive() {
            let cancelled = self.basic_cancel(Some(&tag));
            if outcome.is_ok() {
                cancelled?;
            }
        }

        outcome.map(|_| handled)
    }

    pub fn destroy(&self) {
        if self.shared.inner.lock().destroyed {
            return;
        }

        if self.alive() && self.connection.state() == ConnectionState::Open {
            // the broker still owns the channel number until it confirms the close
            if !self.shared.wait_idle(Instant::now() + self.connection.timeout * 2) {
                diag!(self.shared.diagnostics, Error, "channel {} stuck in a request, keeping it reserved", self.shared.channel);
                self.shared.mark_destroyed();
                return;
            }

            let close = AmqpMethod::ChannelClose(AMQP_REPLY_SUCCESS, "Channel close".to_string(), 0, 0);

            match self.call(close, ReplyKind::ChannelCloseOk) {
                Ok(_) => diag!(self.shared.diagnostics, Info, "channel {} closed", self.shared.channel),
                Err(error) => diag!(self.shared.diagnostics, Warn, "channel {} did not close cleanly - {}", self.shared.channel, error),
            }
        }

        self.shared.mark_destroyed();
        self.connection.remove_session(&self.shared);
    }

    pub fn channel(&self) -> u16 {
        self.shared.channel
    }

    pub fn alive(&self) -> bool {
        self.shared.check_alive(&self.shared.inner.lock()).is_ok()
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.inner.lock().destroyed
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().state
    }

    pub fn last_error(&self) -> Option<AmqpError> {
        self.shared.inner.lock().last_error.clone()
    }

    pub fn reply_code(&self) -> u16 {
        self.last_error().map_or(0, |error| error.reply_code())
    }

    pub fn reply_text(&self) -> String {
        self.last_error().map_or_else(String::new, |error| error.reply_text().to_string())
    }

    pub fn error_text(&self) -> String {
        self.last_error().map_or_else(String::new, |error| error.to_string())
    }

    pub fn queue(&self) -> String {
        self.shared.inner.lock().queue.clone()
    }

    pub fn exchange(&self) -> String {
        self.shared.inner.lock().exchange.clone()
    }

    pub fn message_count(&self) -> u32 {
        self.shared.inner.lock().message_count
    }

    pub fn consumer_count(&self) -> u32 {
        self.shared.inner.lock().consumer_count
    }

    pub fn consumer_tag(&self) -> Option<String> {
        self.shared.inner.lock().consumer_tags.last().cloned()
    }

    pub fn active(&self) -> bool {
        self.shared.inner.lock().active
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.is_destroyed() {
            diag!(self.shared.diagnostics, Debug, "channel {} dropped while open, destroying", self.shared.channel);
            self.destroy();
        }
    }
}
