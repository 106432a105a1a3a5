use std::collections::HashMap;
use std::fmt;
use std::string::FromUtf8Error;

use thiserror::Error;

use super::defines::*;

pub type AmqpTable = HashMap<String, AmqpData>;

#[derive(Debug, Clone, PartialEq)]
pub struct AmqpFrame {
    pub channel: u16,
    pub payload: AmqpFramePayload,
}

impl AmqpFrame {
    pub fn method(channel: u16, method: AmqpMethod) -> Self {
        Self { channel, payload: AmqpFramePayload::Method(method) }
    }

    pub fn heartbeat() -> Self {
        Self { channel: 0, payload: AmqpFramePayload::Heartbeat() }
    }
}

impl fmt::Display for AmqpFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.payload {
            AmqpFramePayload::Method(method) => write!(f, "channel {} {}", self.channel, method.name()),
            AmqpFramePayload::Header(_, size, _) => write!(f, "channel {} content header ({} bytes)", self.channel, size),
            AmqpFramePayload::Content(data) => write!(f, "channel {} content body ({} bytes)", self.channel, data.len()),
            AmqpFramePayload::Heartbeat() => write!(f, "heartbeat"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AmqpFramePayload {
    Method(AmqpMethod),
    Header(u16, u64, AmqpBasicProperties),                                          // class-id, body-size, properties
    Content(Vec<u8>),
    Heartbeat(),
}

impl AmqpFramePayload {
    pub fn frame_type(&self) -> u8 {
        match self {
            AmqpFramePayload::Method(_)         => AMQP_FRAME_TYPE_METHOD,
            AmqpFramePayload::Header(_, _, _)   => AMQP_FRAME_TYPE_HEADER,
            AmqpFramePayload::Content(_)        => AMQP_FRAME_TYPE_CONTENT,
            AmqpFramePayload::Heartbeat()       => AMQP_FRAME_TYPE_HEARTBEAT,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AmqpBasicProperties {
    pub content_type: Option<String>,                   // bit 15
    pub content_encoding: Option<String>,               // bit 14
    pub headers: Option<AmqpTable>,                     // bit 13
    pub delivery_mode: Option<u8>,                      // bit 12
    pub priority: Option<u8>,                           // bit 11
    pub correlation_id: Option<String>,                 // bit 10
    pub reply_to: Option<String>,                       // bit 9
    pub expiration: Option<String>,                     // bit 8
    pub message_id: Option<String>,                     // bit 7
    pub timestamp: Option<u64>,                         // bit 6
    pub message_type: Option<String>,                   // bit 5
    pub user_id: Option<String>,                        // bit 4
    pub app_id: Option<String>,                         // bit 3
    pub cluster_id: Option<String>,                     // bit 2
}

#[derive(Debug, Clone, PartialEq)]
pub enum AmqpMethod {
    ConnectionStart(u8, u8, AmqpTable, String, String),                             // version-major, version-minor, server-properties, mechanisms, locales
    ConnectionStartOk(AmqpTable, String, String, String),                           // client-properties, mechanism, response, locale
    ConnectionTune(u16, u32, u16),                                                  // channel-max, frame-max, heartbeat
    ConnectionTuneOk(u16, u32, u16),                                                // channel-max, frame-max, heartbeat
    ConnectionOpen(String),                                                         // virtual host
    ConnectionOpenOk(String),                                                       // known hosts
    ConnectionClose(u16, String, u16, u16),                                         // reply-code, reply-text, class-id, method-id
    ConnectionCloseOk(),
    ChannelOpen(),
    ChannelOpenOk(),
    ChannelFlow(bool),                                                              // active
    ChannelFlowOk(bool),                                                            // active
    ChannelClose(u16, String, u16, u16),                                            // reply-code, reply-text, class-id, method-id
    ChannelCloseOk(),
    ExchangeDeclare(String, String, u8, AmqpTable),                                 // name, type, flags, arguments
    ExchangeDeclareOk(),
    QueueDeclare(String, u8, AmqpTable),                                            // name, flags, arguments
    QueueDeclareOk(String, u32, u32),                                               // name, messages, consumers
    QueueBind(String, String, String, u8, AmqpTable),                               // name, exchange, routing-key, flags, arguments
    QueueBindOk(),
    BasicConsume(String, String, u8, AmqpTable),                                    // queue, tag, flags, arguments
    BasicConsumeOk(String),                                                         // tag
    BasicCancel(String, u8),                                                        // tag, no-wait
    BasicCancelOk(String),                                                          // tag
    BasicPublish(String, String, u8),                                               // exchange, routing-key, flags
    BasicReturn(u16, String, String, String),                                       // reply-code, reply-text, exchange, routing-key
    BasicDeliver(String, u64, bool, String, String),                                // consumer-tag, delivery-tag, redelivered, exchange, routing-key
    BasicGet(String, bool),                                                         // queue, no-ack
    BasicGetOk(u64, bool, String, String, u32),                                     // delivery-tag, redelivered, exchange, routing-key, messages
    BasicGetEmpty(),
}

impl AmqpMethod {
    pub fn class_method_id(&self) -> (u16, u16) {
        match self {
            AmqpMethod::ConnectionStart(..)     => (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_START),
            AmqpMethod::ConnectionStartOk(..)   => (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_START_OK),
            AmqpMethod::ConnectionTune(..)      => (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_TUNE),
            AmqpMethod::ConnectionTuneOk(..)    => (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_TUNE_OK),
            AmqpMethod::ConnectionOpen(..)      => (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_OPEN),
            AmqpMethod::ConnectionOpenOk(..)    => (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_OPEN_OK),
            AmqpMethod::ConnectionClose(..)     => (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_CLOSE),
            AmqpMethod::ConnectionCloseOk()     => (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_CLOSE_OK),
            AmqpMethod::ChannelOpen()           => (AMQP_CLASS_CHANNEL, AMQP_METHOD_CHANNEL_OPEN),
            AmqpMethod::ChannelOpenOk()         => (AMQP_CLASS_CHANNEL, AMQP_METHOD_CHANNEL_OPEN_OK),
            AmqpMethod::ChannelFlow(..)         => (AMQP_CLASS_CHANNEL, AMQP_METHOD_CHANNEL_FLOW),
            AmqpMethod::ChannelFlowOk(..)       => (AMQP_CLASS_CHANNEL, AMQP_METHOD_CHANNEL_FLOW_OK),
            AmqpMethod::ChannelClose(..)        => (AMQP_CLASS_CHANNEL, AMQP_METHOD_CHANNEL_CLOSE),
            AmqpMethod::ChannelCloseOk()        => (AMQP_CLASS_CHANNEL, AMQP_METHOD_CHANNEL_CLOSE_OK),
            AmqpMethod::ExchangeDeclare(..)     => (AMQP_CLASS_EXCHANGE, AMQP_METHOD_EXCHANGE_DECLARE),
            AmqpMethod::ExchangeDeclareOk()     => (AMQP_CLASS_EXCHANGE, AMQP_METHOD_EXCHANGE_DECLARE_OK),
            AmqpMethod::QueueDeclare(..)        => (AMQP_CLASS_QUEUE, AMQP_METHOD_QUEUE_DECLARE),
            AmqpMethod::QueueDeclareOk(..)      => (AMQP_CLASS_QUEUE, AMQP_METHOD_QUEUE_DECLARE_OK),
            AmqpMethod::QueueBind(..)           => (AMQP_CLASS_QUEUE, AMQP_METHOD_QUEUE_BIND),
            AmqpMethod::QueueBindOk()           => (AMQP_CLASS_QUEUE, AMQP_METHOD_QUEUE_BIND_OK),
            AmqpMethod::BasicConsume(..)        => (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_CONSUME),
            AmqpMethod::BasicConsumeOk(..)      => (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_CONSUME_OK),
            AmqpMethod::BasicCancel(..)         => (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_CANCEL),
            AmqpMethod::BasicCancelOk(..)       => (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_CANCEL_OK),
            AmqpMethod::BasicPublish(..)        => (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_PUBLISH),
            AmqpMethod::BasicReturn(..)         => (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_RETURN),
            AmqpMethod::BasicDeliver(..)        => (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_DELIVER),
            AmqpMethod::BasicGet(..)            => (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_GET),
            AmqpMethod::BasicGetOk(..)          => (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_GET_OK),
            AmqpMethod::BasicGetEmpty()         => (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_GET_EMPTY),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AmqpMethod::ConnectionStart(..)     => "connection.start",
            AmqpMethod::ConnectionStartOk(..)   => "connection.start-ok",
            AmqpMethod::ConnectionTune(..)      => "connection.tune",
            AmqpMethod::ConnectionTuneOk(..)    => "connection.tune-ok",
            AmqpMethod::ConnectionOpen(..)      => "connection.open",
            AmqpMethod::ConnectionOpenOk(..)    => "connection.open-ok",
            AmqpMethod::ConnectionClose(..)     => "connection.close",
            AmqpMethod::ConnectionCloseOk()     => "connection.close-ok",
            AmqpMethod::ChannelOpen()           => "channel.open",
            AmqpMethod::ChannelOpenOk()         => "channel.open-ok",
            AmqpMethod::ChannelFlow(..)         => "channel.flow",
            AmqpMethod::ChannelFlowOk(..)       => "channel.flow-ok",
            AmqpMethod::ChannelClose(..)        => "channel.close",
            AmqpMethod::ChannelCloseOk()        => "channel.close-ok",
            AmqpMethod::ExchangeDeclare(..)     => "exchange.declare",
            AmqpMethod::ExchangeDeclareOk()     => "exchange.declare-ok",
            AmqpMethod::QueueDeclare(..)        => "queue.declare",
            AmqpMethod::QueueDeclareOk(..)      => "queue.declare-ok",
            AmqpMethod::QueueBind(..)           => "queue.bind",
            AmqpMethod::QueueBindOk()           => "queue.bind-ok",
            AmqpMethod::BasicConsume(..)        => "basic.consume",
            AmqpMethod::BasicConsumeOk(..)      => "basic.consume-ok",
            AmqpMethod::BasicCancel(..)         => "basic.cancel",
            AmqpMethod::BasicCancelOk(..)       => "basic.cancel-ok",
            AmqpMethod::BasicPublish(..)        => "basic.publish",
            AmqpMethod::BasicReturn(..)         => "basic.return",
            AmqpMethod::BasicDeliver(..)        => "basic.deliver",
            AmqpMethod::BasicGet(..)            => "basic.get",
            AmqpMethod::BasicGetOk(..)          => "basic.get-ok",
            AmqpMethod::BasicGetEmpty()         => "basic.get-empty",
        }
    }

    /// Methods followed on the wire by a content header and body frames.
    pub fn carries_content(&self) -> bool {
        matches!(self, AmqpMethod::BasicDeliver(..) | AmqpMethod::BasicReturn(..) | AmqpMethod::BasicGetOk(..) | AmqpMethod::BasicPublish(..))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AmqpData {
    None,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Float(f32),
    Double(f64),
    Decimal(u8, u32),
    ShortString(String),
    LongString(String),
    ByteArray(Vec<u8>),
    FieldArray(Vec<AmqpData>),
    Timestamp(u64),
    FieldTable(AmqpTable),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpFrameError {
    #[error("Buffer too short")]
    BufferTooShort,
    #[error("Invalid frame type - {0}")]
    InvalidFrameType(u8),
    #[error("Invalid class/method - {0}/{1}")]
    InvalidClassMethod(u16, u16),
    #[error("Invalid string utf-8 format")]
    InvalidStringFormat(#[from] FromUtf8Error),
    #[error("Invalid field type - {0}")]
    InvalidFieldType(u8),
    #[error("Invalid frame end")]
    FrameEndInvalid,
    #[error("Channel {0} exceeds channel-max {1}")]
    ChannelOutOfRange(u16, u16),
    #[error("Frame size {0} exceeds frame-max {1}")]
    FrameTooLarge(u32, u32),
    #[error("Short string of {0} bytes exceeds 255")]
    ShortStringTooLong(usize),
    #[error("Unexpected protocol header - {0:?}")]
    ProtocolHeader(Vec<u8>),
}
