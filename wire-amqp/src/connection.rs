use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use wire_library::signal::Signal;
use wire_library::slot_table::SlotTable;
use wire_library::socket::{self, SocketOptions};

use super::config::ConnectionConfig;
use super::defines::*;
use super::diagnostics::Diagnostics;
use super::dispatch;
use super::error::{AmqpError, AmqpResult};
use super::frame::{AmqpBasicProperties, AmqpData, AmqpFrame, AmqpFrameError, AmqpFramePayload, AmqpMethod, AmqpTable};
use super::frame_reader::FrameDecoder;
use super::frame_writer::FrameWriter;
use super::session::{Session, SessionShared};
use super::transport::{is_timeout, Transport, TransportReader, TransportWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Open,
    Closing,
    Closed,
}

/// Limits agreed during `connection.tune`. Zero means unlimited for `channel_max` and
/// `frame_max`, and disabled for `heartbeat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuning {
    pub channel_max: u16,
    pub frame_max: u32,
    pub heartbeat: u16,
}

impl Tuning {
    pub fn negotiate(proposed: Tuning, requested: Tuning) -> Tuning {
        Tuning {
            channel_max: lowest_limit(proposed.channel_max as u32, requested.channel_max as u32) as u16,
            frame_max: lowest_limit(proposed.frame_max, requested.frame_max),
            heartbeat: proposed.heartbeat.max(requested.heartbeat),
        }
    }

    fn session_limit(&self) -> usize {
        match self.channel_max {
            0 => u16::MAX as usize,
            value => value as usize,
        }
    }
}

// 0 stands for "no limit" on either side
fn lowest_limit(proposed: u32, requested: u32) -> u32 {
    match (proposed, requested) {
        (0, requested) => requested,
        (proposed, 0) => proposed,
        (proposed, requested) => proposed.min(requested),
    }
}

pub(crate) struct AmqpConnectionReader {
    transport: Box<dyn TransportReader>,
    decoder: FrameDecoder,
    read_buffer: Vec<u8>,
}

impl AmqpConnectionReader {
    fn new(transport: Box<dyn TransportReader>) -> Self {
        Self { transport, decoder: FrameDecoder::new(), read_buffer: vec![0; AMQP_FRAME_MIN_SIZE as usize] }
    }

    fn set_limits(&mut self, tuning: &Tuning) {
        self.decoder.set_limits(tuning.session_limit() as u16, tuning.frame_max);

        let wanted = match tuning.frame_max {
            0 => AMQP_DEFAULT_READ_SIZE,
            frame_max => (frame_max as usize).min(AMQP_DEFAULT_READ_SIZE),
        };
        if wanted > self.read_buffer.len() {
            self.read_buffer.resize(wanted, 0);
        }
    }

    fn fill_buffer(&mut self, timeout: Duration) -> AmqpResult<bool> {
        match self.transport.read(&mut self.read_buffer, timeout) {
            Ok(0) => Err(AmqpError::Transport("connection closed by peer".to_string())),
            Ok(count) => {
                self.decoder.feed(&self.read_buffer[..count]);
                Ok(true)
            },
            Err(error) if is_timeout(&error) => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    pub fn read_frame(&mut self, deadline: Instant) -> AmqpResult<Option<AmqpFrame>> {
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return Ok(Some(frame));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            self.fill_buffer(deadline - now)?;
        }
    }
}

const AMQP_DEFAULT_READ_SIZE: usize = 128 * 1024;

pub(crate) struct AmqpConnectionWriter {
    transport: Box<dyn TransportWriter>,
    buffer: Vec<u8>,
}

impl AmqpConnectionWriter {
    fn new(transport: Box<dyn TransportWriter>) -> Self {
        Self { transport, buffer: Vec::with_capacity(AMQP_FRAME_MIN_SIZE as usize) }
    }

    fn enqueue_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn enqueue_frame(&mut self, frame: &AmqpFrame) -> Result<(), AmqpFrameError> {
        FrameWriter::append_frame(&mut self.buffer, frame)
    }

    fn enqueue_content(&mut self, channel: u16, properties: &AmqpBasicProperties, body: &[u8], frame_max: u32) -> Result<(), AmqpFrameError> {
        FrameWriter::append_content(&mut self.buffer, channel, properties, body, frame_max)
    }

    fn discard(&mut self) {
        self.buffer.clear();
    }

    fn flush_all(&mut self) -> AmqpResult<()> {
        let result = self.transport.write_all(&self.buffer);
        self.buffer.clear();

        Ok(result?)
    }

    fn shutdown(&mut self) {
        self.buffer.clear();
        self.transport.shutdown();
    }
}

pub(crate) struct ConnectionShared {
    writer: Mutex<Option<AmqpConnectionWriter>>,
    sessions: Mutex<SlotTable<Arc<SessionShared>>>,
    state: Mutex<ConnectionState>,
    last_error: Mutex<Option<AmqpError>>,
    last_sent: Mutex<Instant>,
    closed: Signal,
    pub tuning: Tuning,
    pub diagnostics: Arc<Diagnostics>,
    pub timeout: Duration,
    pub queue_capacity: usize,
}

impl ConnectionShared {
    fn new(writer: AmqpConnectionWriter, tuning: Tuning, diagnostics: Arc<Diagnostics>, timeout: Duration, queue_capacity: usize) -> Self {
        Self {
            writer: Mutex::new(Some(writer)),
            sessions: Mutex::new(SlotTable::new(tuning.session_limit())),
            state: Mutex::new(ConnectionState::Open),
            last_error: Mutex::new(None),
            last_sent: Mutex::new(Instant::now()),
            closed: Signal::new(),
            tuning,
            diagnostics,
            timeout,
            queue_capacity,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        if *current != state {
            diag!(self.diagnostics, Trace, "connection {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    pub fn last_error(&self) -> Option<AmqpError> {
        self.last_error.lock().clone()
    }

    pub fn is_connection_valid(&self) -> AmqpResult<()> {
        match self.state() {
            ConnectionState::Open => Ok(()),
            _ => Err(self.dead_error()),
        }
    }

    fn dead_error(&self) -> AmqpError {
        match self.last_error() {
            Some(error) => AmqpError::ConnectionDead(error.to_string()),
            None => AmqpError::ConnectionDead("connection is closing".to_string()),
        }
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        match self.tuning.heartbeat {
            0 => None,
            seconds => Some(Duration::from_secs(seconds as u64)),
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_sent.lock().elapsed()
    }

    pub fn send_method(&self, channel: u16, method: AmqpMethod) -> AmqpResult<()> {
        let frame = AmqpFrame::method(channel, method);
        diag!(self.diagnostics, Debug, "send {}", frame);

        self.write(|writer| writer.enqueue_frame(&frame))
    }

    // method, header and body frames go out under one lock so nothing interleaves
    pub fn send_content(&self, channel: u16, method: AmqpMethod, properties: &AmqpBasicProperties, body: &[u8]) -> AmqpResult<()> {
        let frame = AmqpFrame::method(channel, method);
        diag!(self.diagnostics, Debug, "send {} with {} byte body", frame, body.len());

        let frame_max = self.tuning.frame_max;
        self.write(|writer| {
            writer.enqueue_frame(&frame)?;
            writer.enqueue_content(channel, properties, body, frame_max)
        })
    }

    /// Returns `Ok(false)` without sending when another thread holds the writer, that write
    /// already counts as traffic.
    pub fn send_heartbeat(&self) -> AmqpResult<bool> {
        let writer = match self.writer.try_lock() {
            Some(writer) => writer,
            None => {
                diag!(self.diagnostics, Trace, "writer busy, skipping heartbeat");
                return Ok(false);
            },
        };

        diag!(self.diagnostics, Debug, "send heartbeat");
        self.write_locked(writer, |writer| writer.enqueue_frame(&AmqpFrame::heartbeat()))?;
        Ok(true)
    }

    fn write<F>(&self, encode: F) -> AmqpResult<()>
    where
        F: FnOnce(&mut AmqpConnectionWriter) -> Result<(), AmqpFrameError>,
    {
        self.write_locked(self.writer.lock(), encode)
    }

    fn write_locked<F>(&self, mut writer: MutexGuard<'_, Option<AmqpConnectionWriter>>, encode: F) -> AmqpResult<()>
    where
        F: FnOnce(&mut AmqpConnectionWriter) -> Result<(), AmqpFrameError>,
    {
        let result = {
            let writer = match writer.as_mut() {
                Some(writer) => writer,
                None => return Err(self.dead_error()),
            };

            if let Err(error) = encode(writer) {
                writer.discard();
                return Err(AmqpError::Contract(format!("frame cannot be encoded - {}", error)));
            }

            writer.flush_all()
        };
        drop(writer);

        match result {
            Ok(()) => {
                *self.last_sent.lock() = Instant::now();
                Ok(())
            },
            Err(error) => {
                diag!(self.diagnostics, Error, "connection write failed - {}", error);
                self.mark_dead(error.clone());
                Err(error)
            },
        }
    }

    /// Moves the connection to `Closed` once: records `error`, releases the transport and
    /// fails every session. Later calls are ignored.
    pub fn mark_dead(&self, error: AmqpError) {
        {
            let mut last_error = self.last_error.lock();
            if last_error.is_some() {
                return;
            }

            *last_error = Some(error.clone());
        }

        self.set_state(ConnectionState::Closed);

        if let Some(mut writer) = self.writer.lock().take() {
            writer.shutdown();
        }

        let sessions = self.sessions.lock().drain();
        let reason = AmqpError::ConnectionDead(error.to_string());
        for (_, session) in sessions {
            session.mark_dead(reason.clone());
        }

        self.closed.signal();
    }

    pub fn find_session(&self, channel: u16) -> Option<Arc<SessionShared>> {
        self.sessions.lock().clone_slot(channel as usize)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn remove_session(&self, session: &Arc<SessionShared>) {
        let mut sessions = self.sessions.lock();
        let slot = session.channel() as usize;

        if sessions.get(slot).map_or(false, |current| Arc::ptr_eq(current, session)) {
            sessions.remove(slot);
        }
    }

    fn open_session(self: &Arc<Self>) -> AmqpResult<Session> {
        self.is_connection_valid()?;

        let mut created = None;
        self.sessions.lock().insert_with(|slot| {
            let session = Arc::new(SessionShared::new(slot as u16, self.queue_capacity, self.diagnostics.clone()));
            created = Some(session.clone());
            session
        });

        let shared = created.ok_or_else(|| AmqpError::Contract(format!("no free channel, channel-max is {}", self.tuning.channel_max)))?;
        let session = Session::new(self.clone(), shared);
        session.open()?;

        Ok(session)
    }

    pub fn close_confirmed(&self) -> bool {
        if self.state() != ConnectionState::Closing {
            return false;
        }

        self.mark_dead(AmqpError::ConnectionDestroyed);
        true
    }
}

struct HandshakeOutcome {
    version: (u8, u8),
    server_properties: AmqpTable,
    tuning: Tuning,
    known_hosts: String,
}

pub struct Connection {
    shared: Arc<ConnectionShared>,
    dispatcher: Option<JoinHandle<()>>,
    destroyed: bool,
    host: String,
    virtual_host: String,
    version: (u8, u8),
    server_properties: AmqpTable,
    known_hosts: String,
}

impl Connection {
    pub fn open(config: &ConnectionConfig) -> AmqpResult<Connection> {
        let stream = socket::connect(&config.host, config.port, config.timeout())?;
        socket::set_option(&stream, SocketOptions::NoDelay(true))?;
        socket::set_option(&stream, SocketOptions::KeepAlive(true))?;
        // a stalled broker must not pin the writer lock forever
        socket::set_option(&stream, SocketOptions::WriteTimeout(config.timeout()))?;

        Connection::open_with_transport(config, Box::new(stream))
    }

    pub fn open_with_transport(config: &ConnectionConfig, transport: Box<dyn Transport>) -> AmqpResult<Connection> {
        crate::initialise();

        let diagnostics = Arc::new(Diagnostics::new(config.trace, config.silent));
        let (reader, writer) = transport.split()?;
        let mut reader = AmqpConnectionReader::new(reader);
        let mut writer = AmqpConnectionWriter::new(writer);

        diag!(diagnostics, Trace, "connection {:?}", ConnectionState::Handshaking);
        let outcome = match handshake(&mut reader, &mut writer, config, &diagnostics) {
            Ok(outcome) => outcome,
            Err(error) => {
                diag!(diagnostics, Warn, "handshake with {} failed - {}", config.host, error);
                writer.shutdown();
                return Err(error);
            },
        };

        let shared = Arc::new(ConnectionShared::new(writer, outcome.tuning, diagnostics, config.timeout(), config.queue_capacity));

        diag!(shared.diagnostics, Trace, "connection {:?} -> {:?}", ConnectionState::Handshaking, ConnectionState::Open);
        diag!(
            shared.diagnostics, Info,
            "connected to {}:{} vhost {} - channel-max {}, frame-max {}, heartbeat {}",
            config.host, config.port, config.virtual_host,
            outcome.tuning.channel_max, outcome.tuning.frame_max, outcome.tuning.heartbeat
        );

        let dispatcher = {
            let shared = shared.clone();
            thread::Builder::new()
                .name(format!("amqp-dispatch-{}", config.host))
                .spawn(move || dispatch::run(shared, reader))
        };

        let dispatcher = match dispatcher {
            Ok(handle) => handle,
            Err(error) => {
                let error = AmqpError::from(error);
                shared.mark_dead(error.clone());
                return Err(error);
            },
        };

        Ok(Connection {
            shared,
            dispatcher: Some(dispatcher),
            destroyed: false,
            host: config.host.clone(),
            virtual_host: config.virtual_host.clone(),
            version: outcome.version,
            server_properties: outcome.server_properties,
            known_hosts: outcome.known_hosts,
        })
    }

    pub fn with<T, F>(config: &ConnectionConfig, body: F) -> AmqpResult<T>
    where
        F: FnOnce(&Connection) -> AmqpResult<T>,
    {
        let mut connection = Connection::open(config)?;
        let result = body(&connection);
        connection.destroy();

        result
    }

    pub fn with_session<T, F>(&self, body: F) -> AmqpResult<T>
    where
        F: FnOnce(&Session) -> AmqpResult<T>,
    {
        let session = self.new_session()?;
        let result = body(&session);
        session.destroy();

        result
    }

    pub fn new_session(&self) -> AmqpResult<Session> {
        if self.destroyed {
            return Err(AmqpError::ConnectionDestroyed);
        }

        self.shared.open_session()
    }

    /// Sessions still open become dead. Calling it again does nothing.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }

        self.destroyed = true;

        if self.shared.state() == ConnectionState::Open {
            let open_sessions = self.shared.session_count();
            if open_sessions > 0 {
                diag!(self.shared.diagnostics, Warn, "destroying connection to {} with {} open sessions", self.host, open_sessions);
            }

            self.shared.set_state(ConnectionState::Closing);
            let close = AmqpMethod::ConnectionClose(AMQP_REPLY_SUCCESS, "Connection close".to_string(), 0, 0);

            match self.shared.send_method(0, close) {
                Ok(()) => {
                    if !self.shared.closed.wait_timeout(self.shared.timeout) {
                        diag!(self.shared.diagnostics, Warn, "no connection.close-ok from {} within {:?}", self.host, self.shared.timeout);
                    }
                },
                Err(error) => diag!(self.shared.diagnostics, Warn, "cannot send connection.close - {}", error),
            }
        }

        self.shared.mark_dead(AmqpError::ConnectionDestroyed);

        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                diag!(self.shared.diagnostics, Error, "dispatch thread for {} panicked", self.host);
            }
        }

        diag!(self.shared.diagnostics, Info, "connection to {} destroyed", self.host);
    }

    pub fn alive(&self) -> bool {
        !self.destroyed && self.shared.state() == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn virtual_host(&self) -> &str {
        &self.virtual_host
    }

    pub fn channel_max(&self) -> u16 {
        self.shared.tuning.channel_max
    }

    pub fn frame_max(&self) -> u32 {
        self.shared.tuning.frame_max
    }

    pub fn heartbeat(&self) -> u16 {
        self.shared.tuning.heartbeat
    }

    pub fn version_major(&self) -> u8 {
        self.version.0
    }

    pub fn version_minor(&self) -> u8 {
        self.version.1
    }

    pub fn known_hosts(&self) -> &str {
        &self.known_hosts
    }

    pub fn server_properties(&self) -> &AmqpTable {
        &self.server_properties
    }

    pub fn silent(&self) -> bool {
        self.shared.diagnostics.is_silent()
    }

    pub fn set_silent(&self, value: bool) {
        self.shared.diagnostics.set_silent(value);
    }

    pub fn trace(&self) -> u8 {
        self.shared.diagnostics.trace()
    }

    pub fn last_error(&self) -> Option<AmqpError> {
        self.shared.last_error()
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

    pub fn class_id(&self) -> u16 {
        self.last_error().map_or(0, |error| error.class_method_id().0)
    }

    pub fn method_id(&self) -> u16 {
        self.last_error().map_or(0, |error| error.class_method_id().1)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.destroyed {
            diag!(self.shared.diagnostics, Warn, "connection to {} dropped without destroy", self.host);
            self.destroy();
        }
    }
}

fn handshake(reader: &mut AmqpConnectionReader, writer: &mut AmqpConnectionWriter, config: &ConnectionConfig, diagnostics: &Diagnostics) -> AmqpResult<HandshakeOutcome> {
    let deadline = Instant::now() + config.timeout();

    writer.enqueue_bytes(PROTOCOL_HEADER);
    writer.flush_all()?;

    let (version, server_properties, mechanisms, locales) = match expect_method(reader, writer, deadline, "connection.start", diagnostics)? {
        AmqpMethod::ConnectionStart(major, minor, properties, mechanisms, locales) => ((major, minor), properties, mechanisms, locales),
        other => return Err(AmqpError::UnexpectedFrame("connection.start", other.name().to_string())),
    };

    if !mechanisms.split_whitespace().any(|mechanism| mechanism == "PLAIN") {
        return Err(AmqpError::HandshakeRefused(format!("broker does not offer PLAIN authentication, only {}", mechanisms)));
    }

    let locale = locales
        .split_whitespace()
        .find(|locale| *locale == "en_US")
        .or_else(|| locales.split_whitespace().next())
        .unwrap_or("en_US")
        .to_string();

    let mut client_properties = crate::initialise().clone();
    client_properties.insert("instance".to_string(), AmqpData::LongString(config.client_name.clone()));

    let response = format!("\x00{}\x00{}", config.username, config.password);
    send_method(writer, AmqpMethod::ConnectionStartOk(client_properties, "PLAIN".to_string(), response, locale), diagnostics)?;

    // brokers drop the socket instead of answering when the credentials are refused
    let proposed = match expect_method(reader, writer, deadline, "connection.tune", diagnostics) {
        Ok(AmqpMethod::ConnectionTune(channel_max, frame_max, heartbeat)) => Tuning { channel_max, frame_max, heartbeat },
        Ok(other) => return Err(AmqpError::UnexpectedFrame("connection.tune", other.name().to_string())),
        Err(AmqpError::Transport(reason)) => return Err(AmqpError::HandshakeRefused(format!("broker dropped the connection after start-ok ({}), access refused", reason))),
        Err(error) => return Err(error),
    };

    let requested = Tuning { channel_max: config.channel_max, frame_max: config.frame_max, heartbeat: config.heartbeat };
    let tuning = Tuning::negotiate(proposed, requested);
    reader.set_limits(&tuning);

    send_method(writer, AmqpMethod::ConnectionTuneOk(tuning.channel_max, tuning.frame_max, tuning.heartbeat), diagnostics)?;
    send_method(writer, AmqpMethod::ConnectionOpen(config.virtual_host.clone()), diagnostics)?;

    let known_hosts = match expect_method(reader, writer, deadline, "connection.open-ok", diagnostics)? {
        AmqpMethod::ConnectionOpenOk(known_hosts) => known_hosts,
        other => return Err(AmqpError::UnexpectedFrame("connection.open-ok", other.name().to_string())),
    };

    Ok(HandshakeOutcome { version, server_properties, tuning, known_hosts })
}

fn send_method(writer: &mut AmqpConnectionWriter, method: AmqpMethod, diagnostics: &Diagnostics) -> AmqpResult<()> {
    let frame = AmqpFrame::method(0, method);
    diag!(diagnostics, Debug, "send {}", frame);

    writer.enqueue_frame(&frame)?;
    writer.flush_all()
}

fn expect_method(reader: &mut AmqpConnectionReader, writer: &mut AmqpConnectionWriter, deadline: Instant, expected: &'static str, diagnostics: &Diagnostics) -> AmqpResult<AmqpMethod> {
    loop {
        let frame = match reader.read_frame(deadline) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(AmqpError::Timeout(expected)),
            Err(AmqpError::Framing(AmqpFrameError::ProtocolHeader(header))) => {
                return Err(AmqpError::HandshakeRefused(format!("broker rejected the protocol version, it offers {:?}", header)));
            },
            Err(error) => return Err(error),
        };

        diag!(diagnostics, Debug, "recv {}", frame);

        let channel = frame.channel;
        match frame.payload {
            AmqpFramePayload::Heartbeat() => continue,
            AmqpFramePayload::Method(AmqpMethod::ConnectionClose(code, text, class_id, method_id)) if channel == 0 => {
                let _ = send_method(writer, AmqpMethod::ConnectionCloseOk(), diagnostics);
                return Err(AmqpError::ConnectionClosedByServer(code, text, class_id, method_id));
            },
            AmqpFramePayload::Method(method) if channel == 0 => return Ok(method),
            payload => return Err(AmqpError::UnexpectedFrame(expected, AmqpFrame { channel, payload }.to_string())),
        }
    }
}
