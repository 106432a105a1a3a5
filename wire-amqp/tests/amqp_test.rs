use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use wire_amqp::defines::PROTOCOL_HEADER;
use wire_amqp::frame::{AmqpFrame, AmqpFramePayload, AmqpMethod};
use wire_amqp::frame_reader::FrameDecoder;
use wire_amqp::frame_writer::FrameWriter;
use wire_amqp::*;
use wire_library::pipe::{pipe_pair, PipeReader, PipeStream, PipeWriter};

const BROKER_FRAME_MAX: u32 = 131072;

/// Scripted broker on the far end of an in-memory pipe.
struct Broker {
    reader: PipeReader,
    writer: PipeWriter,
    decoder: FrameDecoder,
}

impl Broker {
    fn new(stream: PipeStream) -> Self {
        let (reader, writer) = stream.split();
        Self { reader, writer, decoder: FrameDecoder::new() }
    }

    fn read_protocol_header(&mut self) -> Vec<u8> {
        let mut header = Vec::new();

        while header.len() < PROTOCOL_HEADER.len() {
            let mut chunk = vec![0u8; PROTOCOL_HEADER.len() - header.len()];
            let count = self.reader.read(&mut chunk, Some(Duration::from_secs(10))).unwrap();
            assert!(count > 0, "client hung up before the protocol header");
            header.extend_from_slice(&chunk[..count]);
        }

        header
    }

    fn recv(&mut self) -> Option<AmqpFrame> {
        loop {
            if let Some(frame) = self.decoder.decode().unwrap() {
                return Some(frame);
            }

            let mut chunk = [0u8; 4096];
            match self.reader.read(&mut chunk, Some(Duration::from_secs(10))) {
                Ok(0) => return None,
                Ok(count) => self.decoder.feed(&chunk[..count]),
                Err(error) => panic!("broker read failed - {}", error),
            }
        }
    }

    fn expect(&mut self) -> (u16, AmqpMethod) {
        loop {
            match self.recv().expect("client hung up") {
                AmqpFrame { channel, payload: AmqpFramePayload::Method(method) } => return (channel, method),
                AmqpFrame { payload: AmqpFramePayload::Heartbeat(), .. } => continue,
                other => panic!("expected a method, got {}", other),
            }
        }
    }

    fn recv_content(&mut self) -> (AmqpBasicProperties, Vec<u8>) {
        let (size, properties) = match self.recv().expect("client hung up") {
            AmqpFrame { payload: AmqpFramePayload::Header(_, size, properties), .. } => (size as usize, properties),
            other => panic!("expected a content header, got {}", other),
        };

        let mut body = Vec::new();
        while body.len() < size {
            match self.recv().expect("client hung up") {
                AmqpFrame { payload: AmqpFramePayload::Content(data), .. } => body.extend_from_slice(&data),
                other => panic!("expected a content body, got {}", other),
            }
        }

        (properties, body)
    }

    fn send(&mut self, channel: u16, method: AmqpMethod) {
        let bytes = FrameWriter::write_frame(&AmqpFrame::method(channel, method)).unwrap();
        let _ = self.writer.write(&bytes);
    }

    fn send_content(&mut self, channel: u16, method: AmqpMethod, properties: &AmqpBasicProperties, body: &[u8]) {
        let mut bytes = FrameWriter::write_frame(&AmqpFrame::method(channel, method)).unwrap();
        FrameWriter::append_content(&mut bytes, channel, properties, body, BROKER_FRAME_MAX).unwrap();
        let _ = self.writer.write(&bytes);
    }

    fn start(&mut self) -> AmqpMethod {
        assert_eq!(self.read_protocol_header(), PROTOCOL_HEADER);

        let mut properties = AmqpTable::new();
        properties.insert("product".to_string(), AmqpData::LongString("scripted".to_string()));
        self.send(0, AmqpMethod::ConnectionStart(0, 9, properties, "AMQPLAIN PLAIN".to_string(), "en_US".to_string()));

        self.expect().1
    }

    fn handshake(&mut self, channel_max: u16, frame_max: u32, heartbeat: u16) -> (AmqpMethod, AmqpMethod) {
        let start_ok = self.start();

        self.send(0, AmqpMethod::ConnectionTune(channel_max, frame_max, heartbeat));
        let (_, tune_ok) = self.expect();

        if let AmqpMethod::ConnectionTuneOk(channel_max, frame_max, _) = tune_ok {
            self.decoder.set_limits(channel_max, frame_max);
        }

        assert_eq!(self.expect(), (0, AmqpMethod::ConnectionOpen("/".to_string())));
        self.send(0, AmqpMethod::ConnectionOpenOk("rabbit@scripted".to_string()));

        (start_ok, tune_ok)
    }

    fn open(&mut self) {
        self.handshake(2047, BROKER_FRAME_MAX, 0);
    }

    fn open_channel(&mut self) -> u16 {
        let (channel, method) = self.expect();
        assert_eq!(method, AmqpMethod::ChannelOpen());

        self.send(channel, AmqpMethod::ChannelOpenOk());
        channel
    }

    fn close_channel(&mut self, channel: u16) {
        let (closing, method) = self.expect();
        assert_eq!(closing, channel);
        assert!(matches!(method, AmqpMethod::ChannelClose(200, ..)), "expected channel.close, got {}", method.name());

        self.send(channel, AmqpMethod::ChannelCloseOk());
    }

    fn close_connection(&mut self) {
        let (_, method) = self.expect();
        assert!(matches!(method, AmqpMethod::ConnectionClose(200, ..)), "expected connection.close, got {}", method.name());

        self.send(0, AmqpMethod::ConnectionCloseOk());
    }
}

fn config() -> ConnectionConfig {
    ConnectionConfig::new().timeout_ms(2000).trace(3)
}

fn connect<F>(config: &ConnectionConfig, script: F) -> (AmqpResult<Connection>, JoinHandle<()>)
where
    F: FnOnce(Broker) + Send + 'static,
{
    let _ = env_logger::builder().is_test(true).try_init();

    let (client, server) = pipe_pair();
    let broker = thread::spawn(move || script(Broker::new(server)));

    (Connection::open_with_transport(config, Box::new(client)), broker)
}

fn wait_until<F: Fn() -> bool>(session: &Session, condition: F) {
    let deadline = Instant::now() + Duration::from_secs(5);

    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        assert_ne!(session.wait(100).unwrap(), WaitStatus::SessionDead);
    }
}

#[test]
fn handshake_negotiates_limits() {
    let (connection, broker) = connect(&config(), |mut broker| {
        let (start_ok, tune_ok) = broker.handshake(2047, 65536, 0);

        match start_ok {
            AmqpMethod::ConnectionStartOk(properties, mechanism, response, locale) => {
                assert!(properties.contains_key("product"));
                assert!(properties.contains_key("instance"));
                assert_eq!(mechanism, "PLAIN");
                assert_eq!(response, "\0guest\0guest");
                assert_eq!(locale, "en_US");
            },
            other => panic!("expected start-ok, got {}", other.name()),
        }

        assert_eq!(tune_ok, AmqpMethod::ConnectionTuneOk(2047, 65536, 0));
        broker.close_connection();
    });

    let mut connection = connection.unwrap();
    assert!(connection.alive());
    assert_eq!(connection.state(), ConnectionState::Open);
    assert_eq!(connection.channel_max(), 2047);
    assert_eq!(connection.frame_max(), 65536);
    assert_eq!(connection.heartbeat(), 0);
    assert_eq!((connection.version_major(), connection.version_minor()), (0, 9));
    assert_eq!(connection.known_hosts(), "rabbit@scripted");
    assert_eq!(connection.server_properties().get("product"), Some(&AmqpData::LongString("scripted".to_string())));

    connection.destroy();
    assert!(!connection.alive());
    assert_eq!(connection.reply_code(), 0);

    connection.destroy();
    assert_eq!(connection.new_session().err(), Some(AmqpError::ConnectionDestroyed));

    broker.join().unwrap();
}

#[test]
fn login_refused_during_handshake() {
    let (connection, broker) = connect(&config(), |mut broker| {
        broker.start();
        broker.send(0, AmqpMethod::ConnectionClose(403, "ACCESS_REFUSED - Login was refused".to_string(), 10, 11));
        assert_eq!(broker.expect(), (0, AmqpMethod::ConnectionCloseOk()));
    });

    let error = connection.err().unwrap();
    assert_eq!(error.reply_code(), 403);
    assert_eq!(error.reply_text(), "ACCESS_REFUSED - Login was refused");
    assert_eq!(error.class_method_id(), (10, 11));

    broker.join().unwrap();
}

#[test]
fn dropped_after_start_ok_is_refusal() {
    let (connection, broker) = connect(&config(), |mut broker| {
        broker.start();
    });

    assert!(matches!(connection.err(), Some(AmqpError::HandshakeRefused(_))));
    broker.join().unwrap();
}

#[test]
fn protocol_version_mismatch() {
    let (connection, broker) = connect(&config(), |mut broker| {
        broker.read_protocol_header();
        let _ = broker.writer.write(b"AMQP\x00\x00\x08\x00");
    });

    assert!(matches!(connection.err(), Some(AmqpError::HandshakeRefused(_))));
    broker.join().unwrap();
}

#[test]
fn anonymous_queue_and_passive_redeclare() {
    let (connection, broker) = connect(&config(), |mut broker| {
        broker.open();
        let channel = broker.open_channel();
        assert_eq!(channel, 1);

        match broker.expect() {
            (1, AmqpMethod::QueueDeclare(name, flags, _)) => {
                assert_eq!(name, "");
                assert_eq!(flags, 0b1100);
            },
            (_, other) => panic!("expected queue.declare, got {}", other.name()),
        }
        broker.send(1, AmqpMethod::QueueDeclareOk("amq.gen-1".to_string(), 0, 0));

        match broker.expect() {
            (1, AmqpMethod::QueueDeclare(name, flags, _)) => {
                assert_eq!(name, "amq.gen-1");
                assert_eq!(flags & 1, 1);
            },
            (_, other) => panic!("expected queue.declare, got {}", other.name()),
        }
        broker.send(1, AmqpMethod::QueueDeclareOk("amq.gen-1".to_string(), 3, 1));

        broker.close_channel(1);
        broker.close_connection();
    });

    let mut connection = connection.unwrap();
    let session = connection.new_session().unwrap();
    assert_eq!(session.channel(), 1);
    assert_eq!(session.state(), SessionState::Ready);

    let name = session.declare_queue(None, AmqpQueueFlags::new().exclusive(true).auto_delete(true)).unwrap();
    assert_eq!(name, "amq.gen-1");
    assert_eq!(session.queue(), "amq.gen-1");

    session.declare_queue(Some(&name), AmqpQueueFlags::new().passive(true)).unwrap();
    assert_eq!(session.message_count(), 3);
    assert_eq!(session.consumer_count(), 1);

    session.destroy();
    assert!(!session.alive());
    session.destroy();

    connection.destroy();
    broker.join().unwrap();
}

#[test]
fn consume_delivers_binary_body() {
    let (connection, broker) = connect(&config(), |mut broker| {
        broker.open();
        let channel = broker.open_channel();

        match broker.expect() {
            (_, AmqpMethod::BasicConsume(queue, tag, flags, _)) => {
                assert_eq!(queue, "jobs");
                assert_eq!(tag, "");
                assert_eq!(flags, 0b11);
            },
            (_, other) => panic!("expected basic.consume, got {}", other.name()),
        }
        broker.send(channel, AmqpMethod::BasicConsumeOk("ctag-1".to_string()));

        let properties = AmqpBasicProperties { content_type: Some("application/octet-stream".to_string()), ..Default::default() };
        let deliver = AmqpMethod::BasicDeliver("ctag-1".to_string(), 1, false, "ex".to_string(), "key".to_string());
        broker.send_content(channel, deliver, &properties, b"\x00bin\x00ary\x00");

        assert_eq!(broker.expect(), (channel, AmqpMethod::BasicCancel("ctag-1".to_string(), 0)));
        broker.send(channel, AmqpMethod::BasicCancelOk("ctag-1".to_string()));

        broker.close_channel(channel);
        broker.close_connection();
    });

    let mut connection = connection.unwrap();
    let session = connection.new_session().unwrap();

    let tag = session.consume(Some("jobs"), None, AmqpConsumeFlags::default()).unwrap();
    assert_eq!(tag, "ctag-1");
    assert_eq!(session.consumer_tag(), Some("ctag-1".to_string()));

    wait_until(&session, || session.arrived_count() == 1);
    let mut content = session.pop_arrived().unwrap();
    assert_eq!(session.arrived_count(), 0);

    assert_eq!(content.body(), b"\x00bin\x00ary\x00");
    assert_eq!(content.body_size(), 9);
    assert_eq!(content.content_type(), Some("application/octet-stream"));
    assert_eq!(content.exchange(), "ex");
    assert_eq!(content.routing_key(), "key");
    assert_eq!(content.delivery(), &Delivery::Deliver { consumer_tag: "ctag-1".to_string(), delivery_tag: 1, redelivered: false });

    assert!(content.is_linked());
    assert!(content.set_body(b"changed").is_err());
    content.unlink();
    content.set_body(b"changed").unwrap();

    assert_eq!(session.basic_cancel(None).unwrap(), "ctag-1");
    assert_eq!(session.consumer_tag(), None);

    session.destroy();
    connection.destroy();
    broker.join().unwrap();
}

#[test]
fn consume_with_stops_when_handler_declines() {
    let (connection, broker) = connect(&config(), |mut broker| {
        broker.open();
        let channel = broker.open_channel();

        match broker.expect() {
            (_, AmqpMethod::BasicConsume(_, tag, _, _)) => assert_eq!(tag, "worker"),
            (_, other) => panic!("expected basic.consume, got {}", other.name()),
        }
        broker.send(channel, AmqpMethod::BasicConsumeOk("worker".to_string()));

        for tag in 1..=3u64 {
            let deliver = AmqpMethod::BasicDeliver("worker".to_string(), tag, false, "".to_string(), "jobs".to_string());
            broker.send_content(channel, deliver, &AmqpBasicProperties::default(), format!("job-{}", tag).as_bytes());
        }

        assert_eq!(broker.expect(), (channel, AmqpMethod::BasicCancel("worker".to_string(), 0)));
        broker.send(channel, AmqpMethod::BasicCancelOk("worker".to_string()));

        broker.close_channel(channel);
        broker.close_connection();
    });

    let mut connection = connection.unwrap();
    let mut bodies = Vec::new();

    let handled = connection
        .with_session(|session| {
            session.consume_with(Some("jobs"), Some("worker"), AmqpConsumeFlags::default(), 2000, |content| {
                assert!(!content.is_linked());
                bodies.push(content.into_body());
                bodies.len() < 3
            })
        })
        .unwrap();

    assert_eq!(handled, 3);
    assert_eq!(bodies, vec![b"job-1".to_vec(), b"job-2".to_vec(), b"job-3".to_vec()]);

    connection.destroy();
    broker.join().unwrap();
}

#[test]
fn mandatory_publish_comes_back() {
    let (connection, broker) = connect(&config(), |mut broker| {
        broker.open();
        let channel = broker.open_channel();

        match broker.expect() {
            (_, AmqpMethod::BasicPublish(exchange, routing_key, flags)) => {
                assert_eq!(exchange, "ex");
                assert_eq!(routing_key, "nowhere");
                assert_eq!(flags, 0b01);
            },
            (_, other) => panic!("expected basic.publish, got {}", other.name()),
        }

        let (properties, body) = broker.recv_content();
        assert_eq!(properties.reply_to.as_deref(), Some("replies"));
        assert_eq!(body, b"hello");

        let returned = AmqpMethod::BasicReturn(312, "NO_ROUTE".to_string(), "ex".to_string(), "nowhere".to_string());
        broker.send_content(channel, returned, &properties, &body);

        broker.close_channel(channel);
        broker.close_connection();
    });

    let mut connection = connection.unwrap();
    let session = connection.new_session().unwrap();

    session.publish_body(b"hello", "ex", "nowhere", AmqpPublishFlags::new().mandatory(true), Some("replies")).unwrap();

    wait_until(&session, || session.returned_count() == 1);
    assert_eq!(session.arrived_count(), 0);

    let content = session.pop_returned().unwrap();
    assert_eq!(session.returned_count(), 0);
    assert_eq!(content.body(), b"hello");
    assert_eq!(content.reply_to(), Some("replies"));
    assert_eq!(content.delivery(), &Delivery::Return { reply_code: 312, reply_text: "NO_ROUTE".to_string() });

    session.destroy();
    connection.destroy();
    broker.join().unwrap();
}

#[test]
fn large_body_is_split_by_frame_max() {
    let body: Vec<u8> = (0..10_000u32).map(|value| (value % 251) as u8).collect();
    let expected = body.clone();

    let (connection, broker) = connect(&config(), move |mut broker| {
        broker.handshake(0, 4096, 0);
        let channel = broker.open_channel();

        assert!(matches!(broker.expect(), (_, AmqpMethod::BasicPublish(..))));
        let (properties, received) = broker.recv_content();
        assert_eq!(properties.delivery_mode, Some(2));
        assert_eq!(received, expected);

        broker.close_channel(channel);
        broker.close_connection();
    });

    let mut connection = connection.unwrap();
    assert_eq!(connection.frame_max(), 4096);
    assert_eq!(connection.channel_max(), u16::MAX);

    let session = connection.new_session().unwrap();
    let mut content = Content::with_body(&body);
    content.set_delivery_mode(Some(2)).unwrap();

    session.publish_content(&mut content, "ex", "bulk", AmqpPublishFlags::new()).unwrap();
    assert_eq!(content.exchange(), "ex");
    assert_eq!(content.routing_key(), "bulk");

    session.destroy();
    connection.destroy();
    broker.join().unwrap();
}

#[test]
fn basic_get_reports_empty_queue() {
    let (connection, broker) = connect(&config(), |mut broker| {
        broker.open();
        let channel = broker.open_channel();

        assert_eq!(broker.expect(), (channel, AmqpMethod::BasicGet("jobs".to_string(), true)));
        broker.send(channel, AmqpMethod::BasicGetEmpty());

        assert_eq!(broker.expect(), (channel, AmqpMethod::BasicGet("jobs".to_string(), true)));
        let get_ok = AmqpMethod::BasicGetOk(5, false, "".to_string(), "jobs".to_string(), 0);
        broker.send_content(channel, get_ok, &AmqpBasicProperties::default(), b"x");

        broker.close_channel(channel);
        broker.close_connection();
    });

    let mut connection = connection.unwrap();
    let session = connection.new_session().unwrap();

    assert!(!session.basic_get(Some("jobs")).unwrap());
    assert_eq!(session.arrived_count(), 0);

    assert!(session.basic_get(Some("jobs")).unwrap());
    let content = session.pop_arrived().unwrap();
    assert_eq!(content.body(), b"x");
    assert_eq!(content.delivery(), &Delivery::Get { delivery_tag: 5, redelivered: false, message_count: 0 });

    session.destroy();
    connection.destroy();
    broker.join().unwrap();
}

#[test]
fn second_request_is_refused_while_one_is_outstanding() {
    let (received_tx, received_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let (connection, broker) = connect(&config(), move |mut broker| {
        broker.open();
        let channel = broker.open_channel();

        assert!(matches!(broker.expect(), (_, AmqpMethod::QueueDeclare(..))));
        received_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        broker.send(channel, AmqpMethod::QueueDeclareOk("slow".to_string(), 0, 0));

        broker.close_channel(channel);
        broker.close_connection();
    });

    let mut connection = connection.unwrap();
    let session = connection.new_session().unwrap();

    thread::scope(|scope| {
        let declare = scope.spawn(|| session.declare_queue(Some("slow"), AmqpQueueFlags::new()));

        received_rx.recv().unwrap();
        let error = session.bind_queue(Some("slow"), "ex", "key").unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Contract);

        release_tx.send(()).unwrap();
        assert_eq!(declare.join().unwrap().unwrap(), "slow");
    });

    session.destroy();
    connection.destroy();
    broker.join().unwrap();
}

#[test]
fn destroy_waits_for_the_request_in_flight() {
    let (received_tx, received_rx) = mpsc::channel();

    let (connection, broker) = connect(&config(), move |mut broker| {
        broker.open();
        let channel = broker.open_channel();

        assert!(matches!(broker.expect(), (_, AmqpMethod::QueueDeclare(..))));
        received_tx.send(()).unwrap();

        // the channel stays open on our side until the declare is answered
        thread::sleep(Duration::from_millis(200));
        assert_eq!(broker.reader.available(), 0);
        broker.send(channel, AmqpMethod::QueueDeclareOk("work".to_string(), 0, 0));

        broker.close_channel(channel);
        assert_eq!(broker.open_channel(), channel);
        broker.close_channel(channel);
        broker.close_connection();
    });

    let mut connection = connection.unwrap();
    let session = connection.new_session().unwrap();

    thread::scope(|scope| {
        let declare = scope.spawn(|| session.declare_queue(Some("work"), AmqpQueueFlags::new()));

        received_rx.recv().unwrap();
        session.destroy();
        assert!(session.is_destroyed());

        assert_eq!(declare.join().unwrap().unwrap(), "work");
    });

    let replacement = connection.new_session().unwrap();
    assert_eq!(replacement.channel(), session.channel());

    replacement.destroy();
    connection.destroy();
    broker.join().unwrap();
}

#[test]
fn late_reply_after_timeout_is_discarded() {
    let config = config().timeout_ms(300);

    let (connection, broker) = connect(&config, |mut broker| {
        broker.open();
        let channel = broker.open_channel();

        assert!(matches!(broker.expect(), (_, AmqpMethod::QueueDeclare(..))));

        // answer the declare only after the client moved on
        assert!(matches!(broker.expect(), (_, AmqpMethod::QueueBind(..))));
        broker.send(channel, AmqpMethod::QueueDeclareOk("slow".to_string(), 0, 0));
        broker.send(channel, AmqpMethod::QueueBindOk());

        broker.close_channel(channel);
        broker.close_connection();
    });

    let mut connection = connection.unwrap();
    let session = connection.new_session().unwrap();

    let started = Instant::now();
    let error = session.declare_queue(Some("slow"), AmqpQueueFlags::new()).unwrap_err();
    assert!(error.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(session.state(), SessionState::Ready);
    assert!(session.alive());

    session.bind_queue(Some("slow"), "ex", "key").unwrap();
    assert_eq!(session.queue(), "slow");
    assert_eq!(session.exchange(), "ex");

    session.destroy();
    connection.destroy();
    broker.join().unwrap();
}

#[test]
fn wait_honours_timeout() {
    let (connection, broker) = connect(&config(), |mut broker| {
        broker.open();
        let channel = broker.open_channel();
        broker.close_channel(channel);
        broker.close_connection();
    });

    let mut connection = connection.unwrap();
    let session = connection.new_session().unwrap();

    let started = Instant::now();
    assert_eq!(session.wait(150).unwrap(), WaitStatus::TimedOut);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(150));
    assert!(elapsed < Duration::from_secs(2));

    assert_eq!(session.wait(-1).unwrap_err().kind(), ErrorKind::Contract);

    session.destroy();
    assert_eq!(session.wait(10).unwrap_err(), AmqpError::SessionDestroyed);

    connection.destroy();
    broker.join().unwrap();
}

#[test]
fn missing_exchange_closes_only_the_session() {
    let (connection, broker) = connect(&config(), |mut broker| {
        broker.open();
        let channel = broker.open_channel();

        match broker.expect() {
            (_, AmqpMethod::ExchangeDeclare(name, _, flags, _)) => {
                assert_eq!(name, "missing");
                assert_eq!(flags & 1, 1);
            },
            (_, other) => panic!("expected exchange.declare, got {}", other.name()),
        }

        broker.send(channel, AmqpMethod::ChannelClose(404, "NOT_FOUND - no exchange 'missing' in vhost '/'".to_string(), 40, 10));
        assert_eq!(broker.expect(), (channel, AmqpMethod::ChannelCloseOk()));

        // the freed channel number is handed out again
        assert_eq!(broker.open_channel(), channel);
        broker.close_channel(channel);
        broker.close_connection();
    });

    let mut connection = connection.unwrap();
    let session = connection.new_session().unwrap();

    let error = session.declare_exchange("missing", "direct", AmqpExchangeFlags::new().passive(true)).unwrap_err();
    assert!(error.is_not_found());
    assert_eq!(error.class_method_id(), (40, 10));

    assert!(!session.alive());
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.reply_code(), 404);
    assert!(session.reply_text().starts_with("NOT_FOUND"));

    let error = session.declare_queue(None, AmqpQueueFlags::new()).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::SessionDead);
    assert!(connection.alive());

    let replacement = connection.new_session().unwrap();
    assert_eq!(replacement.channel(), session.channel());

    session.destroy();
    replacement.destroy();
    connection.destroy();
    broker.join().unwrap();
}

#[test]
fn broker_close_kills_sessions() {
    let (connection, broker) = connect(&config(), |mut broker| {
        broker.open();
        broker.open_channel();

        broker.send(0, AmqpMethod::ConnectionClose(320, "CONNECTION_FORCED - broker forced connection closure".to_string(), 0, 0));
        assert_eq!(broker.expect(), (0, AmqpMethod::ConnectionCloseOk()));
    });

    let mut connection = connection.unwrap();
    let session = connection.new_session().unwrap();

    assert_eq!(session.wait(5000).unwrap(), WaitStatus::SessionDead);
    assert!(!session.alive());
    assert_eq!(session.declare_queue(None, AmqpQueueFlags::new()).unwrap_err().kind(), ErrorKind::ConnectionDead);

    assert!(!connection.alive());
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(connection.reply_code(), 320);
    assert!(connection.reply_text().starts_with("CONNECTION_FORCED"));
    assert_eq!(connection.new_session().err().map(|error| error.kind()), Some(ErrorKind::ConnectionDead));

    session.destroy();
    connection.destroy();
    broker.join().unwrap();
}

#[test]
fn destroying_the_connection_fails_open_sessions() {
    let (connection, broker) = connect(&config(), |mut broker| {
        broker.open();
        broker.open_channel();

        // no channel.close ahead of the connection close, and nothing after it
        broker.close_connection();
        assert!(broker.recv().is_none());
    });

    let mut connection = connection.unwrap();
    let session = connection.new_session().unwrap();
    assert!(session.alive());

    connection.destroy();

    assert!(!session.alive());
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.declare_queue(None, AmqpQueueFlags::new()).unwrap_err().kind(), ErrorKind::ConnectionDead);
    assert_eq!(session.publish_body(b"late", "ex", "key", AmqpPublishFlags::new(), None).unwrap_err().kind(), ErrorKind::ConnectionDead);
    assert_eq!(session.wait(1000).unwrap(), WaitStatus::SessionDead);

    session.destroy();
    assert!(session.is_destroyed());
    assert_eq!(session.wait(10).unwrap_err(), AmqpError::SessionDestroyed);

    broker.join().unwrap();
}

#[test]
fn flow_control_is_acknowledged() {
    let (connection, broker) = connect(&config(), |mut broker| {
        broker.open();
        let channel = broker.open_channel();

        broker.send(channel, AmqpMethod::ChannelFlow(false));
        assert_eq!(broker.expect(), (channel, AmqpMethod::ChannelFlowOk(false)));

        broker.close_channel(channel);
        broker.close_connection();
    });

    let mut connection = connection.unwrap();
    let session = connection.new_session().unwrap();

    wait_until(&session, || !session.active());

    session.destroy();
    connection.destroy();
    broker.join().unwrap();
}

#[test]
fn silent_broker_is_detected_by_heartbeats() {
    let config = config().heartbeat(1);

    let (connection, broker) = connect(&config, |mut broker| {
        let (_, tune_ok) = broker.handshake(0, BROKER_FRAME_MAX, 0);
        assert_eq!(tune_ok, AmqpMethod::ConnectionTuneOk(u16::MAX, BROKER_FRAME_MAX, 1));

        let frame = broker.recv().expect("client hung up before sending a heartbeat");
        assert_eq!(frame.payload, AmqpFramePayload::Heartbeat());

        while broker.recv().is_some() {}
    });

    let mut connection = connection.unwrap();
    assert_eq!(connection.heartbeat(), 1);

    let deadline = Instant::now() + Duration::from_secs(6);
    while connection.alive() {
        assert!(Instant::now() < deadline, "connection outlived its heartbeats");
        thread::sleep(Duration::from_millis(50));
    }

    assert!(connection.error_text().contains("missed heartbeats"));

    connection.destroy();
    broker.join().unwrap();
}
