pub const PROTOCOL_HEADER: &[u8] = b"AMQP\x00\x00\x09\x01";

pub const AMQP_FRAME_TYPE_METHOD: u8 = 1;
pub const AMQP_FRAME_TYPE_HEADER: u8 = 2;
pub const AMQP_FRAME_TYPE_CONTENT: u8 = 3;
pub const AMQP_FRAME_TYPE_HEARTBEAT: u8 = 8;

pub const AMQP_FRAME_END: u8 = b'\xCE';

// type (1) + channel (2) + size (4) + frame end (1)
pub const AMQP_FRAME_OVERHEAD: u32 = 8;
pub const AMQP_FRAME_MIN_SIZE: u32 = 4096;

pub const AMQP_CLASS_CONNECTION: u16 = 10;
pub const AMQP_CLASS_CHANNEL: u16 = 20;
pub const AMQP_CLASS_EXCHANGE: u16 = 40;
pub const AMQP_CLASS_QUEUE: u16 = 50;
pub const AMQP_CLASS_BASIC: u16 = 60;

pub const AMQP_METHOD_CONNECTION_START: u16 = 10;
pub const AMQP_METHOD_CONNECTION_START_OK: u16 = 11;
pub const AMQP_METHOD_CONNECTION_TUNE: u16 = 30;
pub const AMQP_METHOD_CONNECTION_TUNE_OK: u16 = 31;
pub const AMQP_METHOD_CONNECTION_OPEN: u16 = 40;
pub const AMQP_METHOD_CONNECTION_OPEN_OK: u16 = 41;
pub const AMQP_METHOD_CONNECTION_CLOSE: u16 = 50;
pub const AMQP_METHOD_CONNECTION_CLOSE_OK: u16 = 51;

pub const AMQP_METHOD_CHANNEL_OPEN: u16 = 10;
pub const AMQP_METHOD_CHANNEL_OPEN_OK: u16 = 11;
pub const AMQP_METHOD_CHANNEL_FLOW: u16 = 20;
pub const AMQP_METHOD_CHANNEL_FLOW_OK: u16 = 21;
pub const AMQP_METHOD_CHANNEL_CLOSE: u16 = 40;
pub const AMQP_METHOD_CHANNEL_CLOSE_OK: u16 = 41;

pub const AMQP_METHOD_EXCHANGE_DECLARE: u16 = 10;
pub const AMQP_METHOD_EXCHANGE_DECLARE_OK: u16 = 11;

pub const AMQP_METHOD_QUEUE_DECLARE: u16 = 10;
pub const AMQP_METHOD_QUEUE_DECLARE_OK: u16 = 11;
pub const AMQP_METHOD_QUEUE_BIND: u16 = 20;
pub const AMQP_METHOD_QUEUE_BIND_OK: u16 = 21;

pub const AMQP_METHOD_BASIC_CONSUME: u16 = 20;
pub const AMQP_METHOD_BASIC_CONSUME_OK: u16 = 21;
pub const AMQP_METHOD_BASIC_CANCEL: u16 = 30;
pub const AMQP_METHOD_BASIC_CANCEL_OK: u16 = 31;
pub const AMQP_METHOD_BASIC_PUBLISH: u16 = 40;
pub const AMQP_METHOD_BASIC_RETURN: u16 = 50;
pub const AMQP_METHOD_BASIC_DELIVER: u16 = 60;
pub const AMQP_METHOD_BASIC_GET: u16 = 70;
pub const AMQP_METHOD_BASIC_GET_OK: u16 = 71;
pub const AMQP_METHOD_BASIC_GET_EMPTY: u16 = 72;

pub const AMQP_BASIC_PROPERTY_CONTENT_TYPE_BIT: u16 = 15;
pub const AMQP_BASIC_PROPERTY_CONTENT_ENCODING_BIT: u16 = 14;
pub const AMQP_BASIC_PROPERTY_HEADERS_BIT: u16 = 13;
pub const AMQP_BASIC_PROPERTY_DELIVERY_MODE_BIT: u16 = 12;
pub const AMQP_BASIC_PROPERTY_PRIORITY_BIT: u16 = 11;
pub const AMQP_BASIC_PROPERTY_CORRELATION_ID_BIT: u16 = 10;
pub const AMQP_BASIC_PROPERTY_REPLY_TO_BIT: u16 = 9;
pub const AMQP_BASIC_PROPERTY_EXPIRATION_BIT: u16 = 8;
pub const AMQP_BASIC_PROPERTY_MESSAGE_ID_BIT: u16 = 7;
pub const AMQP_BASIC_PROPERTY_TIMESTAMP_BIT: u16 = 6;
pub const AMQP_BASIC_PROPERTY_TYPE_BIT: u16 = 5;
pub const AMQP_BASIC_PROPERTY_USER_ID_BIT: u16 = 4;
pub const AMQP_BASIC_PROPERTY_APP_ID_BIT: u16 = 3;
pub const AMQP_BASIC_PROPERTY_CLUSTER_ID_BIT: u16 = 2;

pub const AMQP_REPLY_SUCCESS: u16 = 200;
pub const AMQP_REPLY_NOT_FOUND: u16 = 404;
pub const AMQP_REPLY_FRAME_ERROR: u16 = 501;
pub const AMQP_REPLY_UNEXPECTED_FRAME: u16 = 505;
