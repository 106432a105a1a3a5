use super::frame::{AmqpFrameError, AmqpFrame, AmqpFramePayload, AmqpMethod, AmqpData, AmqpBasicProperties, AmqpTable};
use super::defines::*;

/// Parses the payload of a single frame.
pub struct AmqpFrameReader<'buffer> {
    data: &'buffer [u8],
}

impl<'buffer> AmqpFrameReader<'buffer> {
    pub fn new(data: &'buffer[u8]) -> AmqpFrameReader<'buffer> {
        Self { data }
    }

    pub fn read_frame(&mut self, frame_type: u8, channel: u16) -> Result<AmqpFrame, AmqpFrameError> {
        match frame_type {
            AMQP_FRAME_TYPE_METHOD => Ok(AmqpFrame { channel, payload: AmqpFramePayload::Method(self.read_method_frame()?) }),
            AMQP_FRAME_TYPE_HEADER => Ok(AmqpFrame { channel, payload: self.read_header_frame()? }),
            AMQP_FRAME_TYPE_CONTENT => Ok(AmqpFrame { channel, payload: self.read_content_frame()? }),
            AMQP_FRAME_TYPE_HEARTBEAT => Ok(AmqpFrame { channel, payload: AmqpFramePayload::Heartbeat() }),
            _ => Err(AmqpFrameError::InvalidFrameType(frame_type)),
        }
    }

    fn read_content_frame(&mut self) -> Result<AmqpFramePayload, AmqpFrameError> {
        Ok(AmqpFramePayload::Content(self.read_remaining_bytes()))
    }

    fn read_header_frame(&mut self) -> Result<AmqpFramePayload, AmqpFrameError> {
        let class_id = self.read_u16()?;
        let _ = self.read_u16()?;   // weight, unused
        let size = self.read_u64()?;
        let properties_mask = self.read_u16()?;
        let mut properties = AmqpBasicProperties::default();
        let has = |bit: u16| (properties_mask & (1 << bit)) != 0;

        if has(AMQP_BASIC_PROPERTY_CONTENT_TYPE_BIT) {
            properties.content_type = Some(self.read_short_string()?);
        }

        if has(AMQP_BASIC_PROPERTY_CONTENT_ENCODING_BIT) {
            properties.content_encoding = Some(self.read_short_string()?);
        }

        if has(AMQP_BASIC_PROPERTY_HEADERS_BIT) {
            properties.headers = Some(self.read_table()?);
        }

        if has(AMQP_BASIC_PROPERTY_DELIVERY_MODE_BIT) {
            properties.delivery_mode = Some(self.read_u8()?);
        }

        if has(AMQP_BASIC_PROPERTY_PRIORITY_BIT) {
            properties.priority = Some(self.read_u8()?);
        }

        if has(AMQP_BASIC_PROPERTY_CORRELATION_ID_BIT) {
            properties.correlation_id = Some(self.read_short_string()?);
        }

        if has(AMQP_BASIC_PROPERTY_REPLY_TO_BIT) {
            properties.reply_to = Some(self.read_short_string()?);
        }

        if has(AMQP_BASIC_PROPERTY_EXPIRATION_BIT) {
            properties.expiration = Some(self.read_short_string()?);
        }

        if has(AMQP_BASIC_PROPERTY_MESSAGE_ID_BIT) {
            properties.message_id = Some(self.read_short_string()?);
        }

        if has(AMQP_BASIC_PROPERTY_TIMESTAMP_BIT) {
            properties.timestamp = Some(self.read_u64()?);
        }

        if has(AMQP_BASIC_PROPERTY_TYPE_BIT) {
            properties.message_type = Some(self.read_short_string()?);
        }

        if has(AMQP_BASIC_PROPERTY_USER_ID_BIT) {
            properties.user_id = Some(self.read_short_string()?);
        }

        if has(AMQP_BASIC_PROPERTY_APP_ID_BIT) {
            properties.app_id = Some(self.read_short_string()?);
        }

        if has(AMQP_BASIC_PROPERTY_CLUSTER_ID_BIT) {
            properties.cluster_id = Some(self.read_short_string()?);
        }

        Ok(AmqpFramePayload::Header(class_id, size, properties))
    }

    fn read_method_frame(&mut self) -> Result<AmqpMethod, AmqpFrameError> {
        let class_id = self.read_u16()?;
        let method_id = self.read_u16()?;

        match (class_id, method_id) {
            (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_START) => {
                let major = self.read_u8()?;
                let minor = self.read_u8()?;

                let properties = self.read_table()?;
                let mechanisms = self.read_long_string()?;
                let locales = self.read_long_string()?;
                Ok(AmqpMethod::ConnectionStart(major, minor, properties, mechanisms, locales))
            },
            (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_START_OK) => {
                let properties = self.read_table()?;
                let mechanism = self.read_short_string()?;
                let response = self.read_long_string()?;
                let locale = self.read_short_string()?;
                Ok(AmqpMethod::ConnectionStartOk(properties, mechanism, response, locale))
            },
            (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_TUNE) => {
                let channel_max = self.read_u16()?;
                let frame_max = self.read_u32()?;
                let heartbeat = self.read_u16()?;
                Ok(AmqpMethod::ConnectionTune(channel_max, frame_max, heartbeat))
            },
            (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_TUNE_OK) => {
                let channel_max = self.read_u16()?;
                let frame_max = self.read_u32()?;
                let heartbeat = self.read_u16()?;
                Ok(AmqpMethod::ConnectionTuneOk(channel_max, frame_max, heartbeat))
            },
            (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_OPEN) => {
                let vhost = self.read_short_string()?;
                let _ = self.read_short_string()?;  // capabilities, deprecated
                let _ = self.read_u8()?;            // insist, deprecated
                Ok(AmqpMethod::ConnectionOpen(vhost))
            },
            (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_OPEN_OK) => {
                // older brokers may omit known-hosts entirely
                let known_hosts = match self.bytes_available() {
                    0 => String::new(),
                    _ => self.read_short_string()?,
                };
                Ok(AmqpMethod::ConnectionOpenOk(known_hosts))
            },
            (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_CLOSE) => {
                let reply_code = self.read_u16()?;
                let reply_text = self.read_short_string()?;
                let class_id = self.read_u16()?;
                let method_id = self.read_u16()?;

                Ok(AmqpMethod::ConnectionClose(reply_code, reply_text, class_id, method_id))
            },
            (AMQP_CLASS_CONNECTION, AMQP_METHOD_CONNECTION_CLOSE_OK) => {
                Ok(AmqpMethod::ConnectionCloseOk())
            },
            (AMQP_CLASS_CHANNEL, AMQP_METHOD_CHANNEL_OPEN) => {
                let _ = self.read_short_string()?;   // deprecated arg
                Ok(AmqpMethod::ChannelOpen())
            },
            (AMQP_CLASS_CHANNEL, AMQP_METHOD_CHANNEL_OPEN_OK) => {
                if self.bytes_available() > 0 {
                    let _ = self.read_long_bytes()?;   // deprecated arg
                }
                Ok(AmqpMethod::ChannelOpenOk())
            },
            (AMQP_CLASS_CHANNEL, AMQP_METHOD_CHANNEL_CLOSE) => {
                let reply_code = self.read_u16()?;
                let reply_text = self.read_short_string()?;
                let class_id = self.read_u16()?;
                let method_id = self.read_u16()?;

                Ok(AmqpMethod::ChannelClose(reply_code, reply_text, class_id, method_id))
            },
            (AMQP_CLASS_CHANNEL, AMQP_METHOD_CHANNEL_CLOSE_OK) => {
                Ok(AmqpMethod::ChannelCloseOk())
            },
            (AMQP_CLASS_CHANNEL, AMQP_METHOD_CHANNEL_FLOW) => {
                let active = self.read_u8()?;
                Ok(AmqpMethod::ChannelFlow(active > 0))
            },
            (AMQP_CLASS_CHANNEL, AMQP_METHOD_CHANNEL_FLOW_OK) => {
                let active = self.read_u8()?;
                Ok(AmqpMethod::ChannelFlowOk(active > 0))
            },
            (AMQP_CLASS_EXCHANGE, AMQP_METHOD_EXCHANGE_DECLARE) => {
                let _ = self.read_u16()?;   // ticket
                let name = self.read_short_string()?;
                let exchange_type = self.read_short_string()?;
                let flags = self.read_u8()?;
                let arguments = self.read_table()?;
                Ok(AmqpMethod::ExchangeDeclare(name, exchange_type, flags, arguments))
            },
            (AMQP_CLASS_EXCHANGE, AMQP_METHOD_EXCHANGE_DECLARE_OK) => {
                Ok(AmqpMethod::ExchangeDeclareOk())
            },
            (AMQP_CLASS_QUEUE, AMQP_METHOD_QUEUE_DECLARE) => {
                let _ = self.read_u16()?;   // ticket
                let name = self.read_short_string()?;
                let flags = self.read_u8()?;
                let arguments = self.read_table()?;
                Ok(AmqpMethod::QueueDeclare(name, flags, arguments))
            },
            (AMQP_CLASS_QUEUE, AMQP_METHOD_QUEUE_DECLARE_OK) => {
                let name = self.read_short_string()?;
                let message_count = self.read_u32()?;
                let consumer_count = self.read_u32()?;
                Ok(AmqpMethod::QueueDeclareOk(name, message_count, consumer_count))
            },
            (AMQP_CLASS_QUEUE, AMQP_METHOD_QUEUE_BIND) => {
                let _ = self.read_u16()?;   // ticket
                let name = self.read_short_string()?;
                let exchange = self.read_short_string()?;
                let routing_key = self.read_short_string()?;
                let flags = self.read_u8()?;
                let arguments = self.read_table()?;
                Ok(AmqpMethod::QueueBind(name, exchange, routing_key, flags, arguments))
            },
            (AMQP_CLASS_QUEUE, AMQP_METHOD_QUEUE_BIND_OK) => {
                Ok(AmqpMethod::QueueBindOk())
            },
            (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_CONSUME) => {
                let _ = self.read_u16()?;   // ticket
                let queue = self.read_short_string()?;
                let tag = self.read_short_string()?;
                let flags = self.read_u8()?;
                let arguments = self.read_table()?;
                Ok(AmqpMethod::BasicConsume(queue, tag, flags, arguments))
            },
            (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_CONSUME_OK) => {
                let tag = self.read_short_string()?;
                Ok(AmqpMethod::BasicConsumeOk(tag))
            },
            (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_CANCEL) => {
                let tag = self.read_short_string()?;
                let flags = self.read_u8()?;
                Ok(AmqpMethod::BasicCancel(tag, flags))
            },
            (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_CANCEL_OK) => {
                let tag = self.read_short_string()?;
                Ok(AmqpMethod::BasicCancelOk(tag))
            },
            (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_PUBLISH) => {
                let _ = self.read_u16()?;   // ticket
                let exchange = self.read_short_string()?;
                let routing_key = self.read_short_string()?;
                let flags = self.read_u8()?;
                Ok(AmqpMethod::BasicPublish(exchange, routing_key, flags))
            },
            (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_RETURN) => {
                let code = self.read_u16()?;
                let reply_text = self.read_short_string()?;
                let exchange = self.read_short_string()?;
                let routing_key = self.read_short_string()?;
                Ok(AmqpMethod::BasicReturn(code, reply_text, exchange, routing_key))
            },
            (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_DELIVER) => {
                let consumer_tag = self.read_short_string()?;
                let delivery_tag = self.read_u64()?;
                let redelivered = self.read_u8()?;
                let exchange = self.read_short_string()?;
                let routing_key = self.read_short_string()?;
                Ok(AmqpMethod::BasicDeliver(consumer_tag, delivery_tag, redelivered != 0, exchange, routing_key))
            },
            (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_GET) => {
                let _ = self.read_u16()?;   // ticket
                let queue = self.read_short_string()?;
                let no_ack = self.read_u8()?;
                Ok(AmqpMethod::BasicGet(queue, no_ack != 0))
            },
            (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_GET_OK) => {
                let delivery_tag = self.read_u64()?;
                let redelivered = self.read_u8()?;
                let exchange = self.read_short_string()?;
                let routing_key = self.read_short_string()?;
                let messages = self.read_u32()?;
                Ok(AmqpMethod::BasicGetOk(delivery_tag, redelivered != 0, exchange, routing_key, messages))
            },
            (AMQP_CLASS_BASIC, AMQP_METHOD_BASIC_GET_EMPTY) => {
                if self.bytes_available() > 0 {
                    let _ = self.read_short_string()?;   // cluster-id, deprecated
                }
                Ok(AmqpMethod::BasicGetEmpty())
            },
            (_, _) => Err(AmqpFrameError::InvalidClassMethod(class_id, method_id))
        }
    }

    fn take(&mut self, count: usize) -> Result<&'buffer [u8], AmqpFrameError> {
        if self.data.len() < count {
            return Err(AmqpFrameError::BufferTooShort);
        }

        let (head, tail) = self.data.split_at(count);
        self.data = tail;
        Ok(head)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], AmqpFrameError> {
        let mut buffer = [0u8; N];
        buffer.copy_from_slice(self.take(N)?);
        Ok(buffer)
    }

    fn read_u8(&mut self) -> Result<u8, AmqpFrameError> {
        Ok(u8::from_be_bytes(self.take_array()?))
    }

    fn read_i8(&mut self) -> Result<i8, AmqpFrameError> {
        Ok(i8::from_be_bytes(self.take_array()?))
    }

    fn read_u16(&mut self) -> Result<u16, AmqpFrameError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    fn read_i16(&mut self) -> Result<i16, AmqpFrameError> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    fn read_u32(&mut self) -> Result<u32, AmqpFrameError> {
        Ok(u32::from_be_bytes(self.take_array()?))
    }

    fn read_i32(&mut self) -> Result<i32, AmqpFrameError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    fn read_u64(&mut self) -> Result<u64, AmqpFrameError> {
        Ok(u64::from_be_bytes(self.take_array()?))
    }

    fn read_i64(&mut self) -> Result<i64, AmqpFrameError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    fn read_f32(&mut self) -> Result<f32, AmqpFrameError> {
        Ok(f32::from_be_bytes(self.take_array()?))
    }

    fn read_f64(&mut self) -> Result<f64, AmqpFrameError> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    fn read_remaining_bytes(&mut self) -> Vec<u8> {
        let result = self.data.to_vec();
        self.data = &self.data[0..0];

        result
    }

    fn read_short_string(&mut self) -> Result<String, AmqpFrameError> {
        let length = self.read_u8()? as usize;
        Ok(String::from_utf8(self.take(length)?.to_vec())?)
    }

    fn read_long_bytes(&mut self) -> Result<Vec<u8>, AmqpFrameError> {
        let length = self.read_u32()? as usize;
        Ok(self.take(length)?.to_vec())
    }

    fn read_long_string(&mut self) -> Result<String, AmqpFrameError> {
        Ok(String::from_utf8(self.read_long_bytes()?)?)
    }

    fn bytes_available(&self) -> usize {
        self.data.len()
    }

    fn read_table(&mut self) -> Result<AmqpTable, AmqpFrameError> {
        let length = self.read_u32()? as usize;
        let mut reader = AmqpFrameReader::new(self.take(length)?);
        let mut result = AmqpTable::new();

        while reader.bytes_available() > 0 {
            let key = reader.read_short_string()?;
            let value_type = reader.read_u8()?;
            let value = reader.read_value(value_type)?;

            result.insert(key, value);
        }

        Ok(result)
    }

    fn read_array(&mut self) -> Result<Vec<AmqpData>, AmqpFrameError> {
        let length = self.read_u32()? as usize;
        let mut reader = AmqpFrameReader::new(self.take(length)?);
        let mut result = Vec::new();

        while reader.bytes_available() > 0 {
            let value_type = reader.read_u8()?;
            result.push(reader.read_value(value_type)?);
        }

        Ok(result)
    }

    fn read_value(&mut self, value_type: u8) -> Result<AmqpData, AmqpFrameError> {
        match value_type {
            b't' => Ok(AmqpData::Bool(self.read_u8()? > 0)),
            b'b' => Ok(AmqpData::I8(self.read_i8()?)),
            b'B' => Ok(AmqpData::U8(self.read_u8()?)),
            b'U' => Ok(AmqpData::I16(self.read_i16()?)),
            b'u' => Ok(AmqpData::U16(self.read_u16()?)),
            b'I' => Ok(AmqpData::I32(self.read_i32()?)),
            b'i' => Ok(AmqpData::U32(self.read_u32()?)),
            b'L' => Ok(AmqpData::I64(self.read_i64()?)),
            b'l' => Ok(AmqpData::U64(self.read_u64()?)),
            b'f' => Ok(AmqpData::Float(self.read_f32()?)),
            b'd' => Ok(AmqpData::Double(self.read_f64()?)),
            b'D' => Ok(AmqpData::Decimal(self.read_u8()?, self.read_u32()?)),
            b's' => Ok(AmqpData::ShortString(self.read_short_string()?)),
            b'S' => Ok(AmqpData::LongString(self.read_long_string()?)),
            b'x' => Ok(AmqpData::ByteArray(self.read_long_bytes()?)),
            b'T' => Ok(AmqpData::Timestamp(self.read_u64()?)),
            b'V' => Ok(AmqpData::None),
            b'F' => Ok(AmqpData::FieldTable(self.read_table()?)),
            b'A' => Ok(AmqpData::FieldArray(self.read_array()?)),
            _ => Err(AmqpFrameError::InvalidFieldType(value_type))
        }
    }
}

/// Splits a byte stream into frames, enforcing the negotiated limits.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    channel_max: u16,
    frame_max: u32,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::with_capacity(AMQP_FRAME_MIN_SIZE as usize), channel_max: u16::MAX, frame_max: 0 }
    }

    /// `frame_max == 0` means no limit.
    pub fn set_limits(&mut self, channel_max: u16, frame_max: u32) {
        self.channel_max = channel_max;
        self.frame_max = frame_max;
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the next complete frame, or `None` when more bytes are needed.
    pub fn decode(&mut self) -> Result<Option<AmqpFrame>, AmqpFrameError> {
        if self.buffer.len() >= 4 && &self.buffer[..4] == b"AMQP" {
            return Err(AmqpFrameError::ProtocolHeader(self.buffer[..self.buffer.len().min(8)].to_vec()));
        }

        if self.buffer.len() < 7 {
            return Ok(None);
        }

        let frame_type = self.buffer[0];
        let channel = u16::from_be_bytes([self.buffer[1], self.buffer[2]]);
        let size = u32::from_be_bytes([self.buffer[3], self.buffer[4], self.buffer[5], self.buffer[6]]);

        if !matches!(frame_type, AMQP_FRAME_TYPE_METHOD | AMQP_FRAME_TYPE_HEADER | AMQP_FRAME_TYPE_CONTENT | AMQP_FRAME_TYPE_HEARTBEAT) {
            return Err(AmqpFrameError::InvalidFrameType(frame_type));
        }

        if channel > self.channel_max {
            return Err(AmqpFrameError::ChannelOutOfRange(channel, self.channel_max));
        }

        if self.frame_max > 0 && size.saturating_add(AMQP_FRAME_OVERHEAD) > self.frame_max {
            return Err(AmqpFrameError::FrameTooLarge(size.saturating_add(AMQP_FRAME_OVERHEAD), self.frame_max));
        }

        let total = 7 + size as usize + 1;
        if self.buffer.len() < total {
            return Ok(None);
        }

        if self.buffer[total - 1] != AMQP_FRAME_END {
            return Err(AmqpFrameError::FrameEndInvalid);
        }

        let frame = AmqpFrameReader::new(&self.buffer[7..total - 1]).read_frame(frame_type, channel);
        self.buffer.drain(..total);

        frame.map(Some)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes exactly one frame from `data`, failing if it is truncated.
pub fn decode_frame(data: &[u8]) -> Result<AmqpFrame, AmqpFrameError> {
    let mut decoder = FrameDecoder::new();
    decoder.feed(data);

    decoder.decode()?.ok_or(AmqpFrameError::BufferTooShort)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_writer::FrameWriter;

    fn open_ok_bytes(channel: u16) -> Vec<u8> {
        FrameWriter::write_frame(&AmqpFrame::method(channel, AmqpMethod::ChannelOpenOk())).unwrap()
    }

    #[test]
    fn decoder_waits_for_complete_frame() {
        let bytes = open_ok_bytes(1);
        let mut decoder = FrameDecoder::new();

        decoder.feed(&bytes[..5]);
        assert_eq!(decoder.decode().unwrap(), None);

        decoder.feed(&bytes[5..]);
        assert_eq!(decoder.decode().unwrap(), Some(AmqpFrame::method(1, AmqpMethod::ChannelOpenOk())));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn decoder_yields_back_to_back_frames() {
        let mut bytes = open_ok_bytes(1);
        bytes.extend(open_ok_bytes(2));

        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);

        assert_eq!(decoder.decode().unwrap().map(|f| f.channel), Some(1));
        assert_eq!(decoder.decode().unwrap().map(|f| f.channel), Some(2));
        assert_eq!(decoder.decode().unwrap(), None);
    }

    #[test]
    fn bad_frame_end_is_rejected() {
        let mut bytes = open_ok_bytes(1);
        let last = bytes.len() - 1;
        bytes[last] = 0;

        assert_eq!(decode_frame(&bytes), Err(AmqpFrameError::FrameEndInvalid));
    }

    #[test]
    fn limits_are_enforced() {
        let mut decoder = FrameDecoder::new();
        decoder.set_limits(4, 4096);
        decoder.feed(&open_ok_bytes(5));
        assert_eq!(decoder.decode(), Err(AmqpFrameError::ChannelOutOfRange(5, 4)));

        let mut decoder = FrameDecoder::new();
        decoder.set_limits(u16::MAX, 4096);
        decoder.feed(&[AMQP_FRAME_TYPE_CONTENT, 0, 1, 0, 0, 0x20, 0]);
        assert_eq!(decoder.decode(), Err(AmqpFrameError::FrameTooLarge(0x2000 + 8, 4096)));
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        assert_eq!(decode_frame(&[9, 0, 0, 0, 0, 0, 0, 0xCE]), Err(AmqpFrameError::InvalidFrameType(9)));
    }

    #[test]
    fn unknown_method_is_rejected() {
        let bytes = [1, 0, 1, 0, 0, 0, 4, 0, 99, 0, 1, 0xCE];
        assert_eq!(decode_frame(&bytes), Err(AmqpFrameError::InvalidClassMethod(99, 1)));
    }

    #[test]
    fn truncated_method_is_rejected() {
        // queue.declare-ok with the counters missing
        let bytes = [1, 0, 1, 0, 0, 0, 6, 0, 50, 0, 11, 1, b'q', 0xCE];
        assert_eq!(decode_frame(&bytes), Err(AmqpFrameError::BufferTooShort));
    }

    #[test]
    fn broker_protocol_header_is_reported() {
        assert_eq!(
            decode_frame(b"AMQP\x01\x01\x00\x0a"),
            Err(AmqpFrameError::ProtocolHeader(b"AMQP\x01\x01\x00\x0a".to_vec()))
        );
    }

    #[test]
    fn open_ok_without_known_hosts() {
        let bytes = [1, 0, 0, 0, 0, 0, 4, 0, 10, 0, 41, 0xCE];
        assert_eq!(decode_frame(&bytes).unwrap(), AmqpFrame::method(0, AmqpMethod::ConnectionOpenOk(String::new())));
    }
}
