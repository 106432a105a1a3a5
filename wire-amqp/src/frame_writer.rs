use super::frame::{AmqpFrame, AmqpFrameError, AmqpFramePayload, AmqpMethod, AmqpData, AmqpBasicProperties, AmqpTable};
use super::defines::*;

pub struct FrameWriter;

impl FrameWriter {
    pub fn write_frame(frame: &AmqpFrame) -> Result<Vec<u8>, AmqpFrameError> {
        let mut result = Vec::new();
        FrameWriter::append_frame(&mut result, frame)?;

        Ok(result)
    }

    /// Serializes `frame` at the end of `result`.
    pub fn append_frame(result: &mut Vec<u8>, frame: &AmqpFrame) -> Result<(), AmqpFrameError> {
        write_u8(result, frame.payload.frame_type());
        write_u16(result, frame.channel);

        let size_offset = result.len();
        write_u32(result, 0);   // placeholder for frame size

        match &frame.payload {
            AmqpFramePayload::Method(method) => FrameWriter::serialize_method_frame(result, method)?,
            AmqpFramePayload::Header(class, size, properties) => FrameWriter::serialize_header_frame(result, *class, *size, properties)?,
            AmqpFramePayload::Content(data) => write_bytes(result, data),
            AmqpFramePayload::Heartbeat() => (),
        }

        // fill the real size
        let payload_size = (result.len() - size_offset - 4) as u32;
        result[size_offset .. size_offset + 4].copy_from_slice(&payload_size.to_be_bytes());

        write_u8(result, AMQP_FRAME_END);
        Ok(())
    }

    /// Header frame followed by as many body frames as `frame_max` requires.
    /// An empty body produces the header frame only.
    pub fn append_content(result: &mut Vec<u8>, channel: u16, properties: &AmqpBasicProperties, body: &[u8], frame_max: u32) -> Result<(), AmqpFrameError> {
        let header = AmqpFrame {
            channel,
            payload: AmqpFramePayload::Header(AMQP_CLASS_BASIC, body.len() as u64, properties.clone()),
        };
        FrameWriter::append_frame(result, &header)?;

        for chunk in body.chunks(body_chunk_size(frame_max)) {
            FrameWriter::append_frame(result, &AmqpFrame { channel, payload: AmqpFramePayload::Content(chunk.to_vec()) })?;
        }

        Ok(())
    }

    fn serialize_header_frame(target: &mut Vec<u8>, class_id: u16, size: u64, properties: &AmqpBasicProperties) -> Result<(), AmqpFrameError> {
        write_u16(target, class_id);
        write_u16(target, 0);
        write_u64(target, size);

        // properties_mask - will be filled later
        let mask_offset = target.len();
        write_u16(target, 0);

        let mut properties_mask: u16 = 0;
        let mask = &mut properties_mask;

        write_short_property(target, mask, AMQP_BASIC_PROPERTY_CONTENT_TYPE_BIT, &properties.content_type)?;
        write_short_property(target, mask, AMQP_BASIC_PROPERTY_CONTENT_ENCODING_BIT, &properties.content_encoding)?;

        if let Some(value) = &properties.headers {
            *mask |= 1 << AMQP_BASIC_PROPERTY_HEADERS_BIT;
            write_table(target, value)?;
        }

        if let Some(value) = properties.delivery_mode {
            *mask |= 1 << AMQP_BASIC_PROPERTY_DELIVERY_MODE_BIT;
            write_u8(target, value);
        }

        if let Some(value) = properties.priority {
            *mask |= 1 << AMQP_BASIC_PROPERTY_PRIORITY_BIT;
            write_u8(target, value);
        }

        write_short_property(target, mask, AMQP_BASIC_PROPERTY_CORRELATION_ID_BIT, &properties.correlation_id)?;
        write_short_property(target, mask, AMQP_BASIC_PROPERTY_REPLY_TO_BIT, &properties.reply_to)?;
        write_short_property(target, mask, AMQP_BASIC_PROPERTY_EXPIRATION_BIT, &properties.expiration)?;
        write_short_property(target, mask, AMQP_BASIC_PROPERTY_MESSAGE_ID_BIT, &properties.message_id)?;

        if let Some(value) = properties.timestamp {
            *mask |= 1 << AMQP_BASIC_PROPERTY_TIMESTAMP_BIT;
            write_u64(target, value);
        }

        write_short_property(target, mask, AMQP_BASIC_PROPERTY_TYPE_BIT, &properties.message_type)?;
        write_short_property(target, mask, AMQP_BASIC_PROPERTY_USER_ID_BIT, &properties.user_id)?;
        write_short_property(target, mask, AMQP_BASIC_PROPERTY_APP_ID_BIT, &properties.app_id)?;
        write_short_property(target, mask, AMQP_BASIC_PROPERTY_CLUSTER_ID_BIT, &properties.cluster_id)?;

        // fill the properties_mask
        target[mask_offset .. mask_offset + 2].copy_from_slice(&properties_mask.to_be_bytes());
        Ok(())
    }

    fn serialize_method_frame(target: &mut Vec<u8>, method: &AmqpMethod) -> Result<(), AmqpFrameError> {
        let (class_id, method_id) = method.class_method_id();
        write_u16(target, class_id);
        write_u16(target, method_id);

        match method {
            AmqpMethod::ConnectionStart(major, minor, properties, mechanisms, locales) => {
                write_u8(target, *major);
                write_u8(target, *minor);
                write_table(target, properties)?;
                write_long_string(target, mechanisms);
                write_long_string(target, locales);
            },
            AmqpMethod::ConnectionStartOk(properties, mechanism, response, locale) => {
                write_table(target, properties)?;
                write_short_string(target, mechanism)?;
                write_long_string(target, response);
                write_short_string(target, locale)?;
            },
            AmqpMethod::ConnectionTune(channel_max, frame_max, heartbeat)
            | AmqpMethod::ConnectionTuneOk(channel_max, frame_max, heartbeat) => {
                write_u16(target, *channel_max);
                write_u32(target, *frame_max);
                write_u16(target, *heartbeat);
            },
            AmqpMethod::ConnectionOpen(vhost) => {
                write_short_string(target, vhost)?;
                write_short_string(target, "")?;    // deprecated but necessary
                write_u8(target, 0);                // deprecated but necessary
            },
            AmqpMethod::ConnectionOpenOk(known_hosts) => {
                write_short_string(target, known_hosts)?;
            },
            AmqpMethod::ConnectionClose(reply_code, reply_text, class_id, method_id)
            | AmqpMethod::ChannelClose(reply_code, reply_text, class_id, method_id) => {
                write_u16(target, *reply_code);
                write_short_string(target, reply_text)?;
                write_u16(target, *class_id);
                write_u16(target, *method_id);
            },
            AmqpMethod::ChannelOpen() => {
                write_short_string(target, "")?;    // deprecated but necessary
            },
            AmqpMethod::ChannelOpenOk() => {
                write_u32(target, 0);               // deprecated but necessary
            },
            AmqpMethod::ChannelFlow(active) | AmqpMethod::ChannelFlowOk(active) => {
                write_u8(target, *active as u8);
            },
            AmqpMethod::ExchangeDeclare(name, exchange_type, flags, arguments) => {
                write_u16(target, 0);               // ticket
                write_short_string(target, name)?;
                write_short_string(target, exchange_type)?;
                write_u8(target, *flags);
                write_table(target, arguments)?;
            },
            AmqpMethod::QueueDeclare(name, flags, arguments) => {
                write_u16(target, 0);               // ticket
                write_short_string(target, name)?;
                write_u8(target, *flags);
                write_table(target, arguments)?;
            },
            AmqpMethod::QueueDeclareOk(name, messages, consumers) => {
                write_short_string(target, name)?;
                write_u32(target, *messages);
                write_u32(target, *consumers);
            },
            AmqpMethod::QueueBind(name, exchange, routing_key, flags, arguments) => {
                write_u16(target, 0);               // ticket
                write_short_string(target, name)?;
                write_short_string(target, exchange)?;
                write_short_string(target, routing_key)?;
                write_u8(target, *flags);
                write_table(target, arguments)?;
            },
            AmqpMethod::BasicConsume(queue, tag, flags, arguments) => {
                write_u16(target, 0);               // ticket
                write_short_string(target, queue)?;
                write_short_string(target, tag)?;
                write_u8(target, *flags);
                write_table(target, arguments)?;
            },
            AmqpMethod::BasicConsumeOk(tag) | AmqpMethod::BasicCancelOk(tag) => {
                write_short_string(target, tag)?;
            },
            AmqpMethod::BasicCancel(tag, flags) => {
                write_short_string(target, tag)?;
                write_u8(target, *flags);
            },
            AmqpMethod::BasicPublish(exchange, routing_key, flags) => {
                write_u16(target, 0);               // ticket
                write_short_string(target, exchange)?;
                write_short_string(target, routing_key)?;
                write_u8(target, *flags);
            },
            AmqpMethod::BasicReturn(code, reply_text, exchange, routing_key) => {
                write_u16(target, *code);
                write_short_string(target, reply_text)?;
                write_short_string(target, exchange)?;
                write_short_string(target, routing_key)?;
            },
            AmqpMethod::BasicDeliver(consumer_tag, delivery_tag, redelivered, exchange, routing_key) => {
                write_short_string(target, consumer_tag)?;
                write_u64(target, *delivery_tag);
                write_u8(target, *redelivered as u8);
                write_short_string(target, exchange)?;
                write_short_string(target, routing_key)?;
            },
            AmqpMethod::BasicGet(queue, no_ack) => {
                write_u16(target, 0);               // ticket
                write_short_string(target, queue)?;
                write_u8(target, *no_ack as u8);
            },
            AmqpMethod::BasicGetOk(delivery_tag, redelivered, exchange, routing_key, messages) => {
                write_u64(target, *delivery_tag);
                write_u8(target, *redelivered as u8);
                write_short_string(target, exchange)?;
                write_short_string(target, routing_key)?;
                write_u32(target, *messages);
            },
            AmqpMethod::BasicGetEmpty() => {
                write_short_string(target, "")?;    // cluster-id, deprecated
            },
            AmqpMethod::ConnectionCloseOk()
            | AmqpMethod::ChannelCloseOk()
            | AmqpMethod::ExchangeDeclareOk()
            | AmqpMethod::QueueBindOk() => (),
        }

        Ok(())
    }
}

/// Largest body slice that fits in one content frame; `frame_max == 0` means unlimited.
pub fn body_chunk_size(frame_max: u32) -> usize {
    match frame_max {
        0 => usize::MAX,
        _ => frame_max.saturating_sub(AMQP_FRAME_OVERHEAD).max(1) as usize,
    }
}

fn write_u8(buffer: &mut Vec<u8>, value: u8) {
    buffer.push(value);
}

fn write_i8(buffer: &mut Vec<u8>, value: i8) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

fn write_u16(buffer: &mut Vec<u8>, value: u16) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

fn write_i16(buffer: &mut Vec<u8>, value: i16) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(buffer: &mut Vec<u8>, value: u32) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

fn write_i32(buffer: &mut Vec<u8>, value: i32) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

fn write_u64(buffer: &mut Vec<u8>, value: u64) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

fn write_i64(buffer: &mut Vec<u8>, value: i64) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

fn write_f32(buffer: &mut Vec<u8>, value: f32) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

fn write_f64(buffer: &mut Vec<u8>, value: f64) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

fn write_bytes(buffer: &mut Vec<u8>, value: &[u8]) {
    buffer.extend_from_slice(value);
}

fn write_short_string(buffer: &mut Vec<u8>, value: &str) -> Result<(), AmqpFrameError> {
    if value.len() > u8::MAX as usize {
        return Err(AmqpFrameError::ShortStringTooLong(value.len()));
    }

    write_u8(buffer, value.len() as u8);
    write_bytes(buffer, value.as_bytes());
    Ok(())
}

fn write_short_property(buffer: &mut Vec<u8>, mask: &mut u16, bit: u16, value: &Option<String>) -> Result<(), AmqpFrameError> {
    if let Some(value) = value {
        *mask |= 1 << bit;
        write_short_string(buffer, value)?;
    }

    Ok(())
}

fn write_long_bytes(buffer: &mut Vec<u8>, value: &[u8]) {
    write_u32(buffer, value.len() as u32);
    write_bytes(buffer, value);
}

fn write_long_string(buffer: &mut Vec<u8>, value: &str) {
    write_long_bytes(buffer, value.as_bytes());
}

fn write_table(buffer: &mut Vec<u8>, value: &AmqpTable) -> Result<(), AmqpFrameError> {
    // size placeholder, to be filled later
    let size_offset = buffer.len();
    write_u32(buffer, 0);

    for (key, value) in value.iter() {
        write_short_string(buffer, key)?;
        write_value(buffer, value)?;
    }

    let payload_size = (buffer.len() - size_offset - 4) as u32;
    buffer[size_offset .. size_offset + 4].copy_from_slice(&payload_size.to_be_bytes());
    Ok(())
}

fn write_array(buffer: &mut Vec<u8>, value: &[AmqpData]) -> Result<(), AmqpFrameError> {
    let size_offset = buffer.len();
    write_u32(buffer, 0);

    for value in value.iter() {
        write_value(buffer, value)?;
    }

    let payload_size = (buffer.len() - size_offset - 4) as u32;
    buffer[size_offset .. size_offset + 4].copy_from_slice(&payload_size.to_be_bytes());
    Ok(())
}

fn write_value(buffer: &mut Vec<u8>, value: &AmqpData) -> Result<(), AmqpFrameError> {
    match value {
        AmqpData::None => write_u8(buffer, b'V'),
        AmqpData::Bool(value) => {
            write_u8(buffer, b't');
            write_u8(buffer, *value as u8);
        },
        AmqpData::I8(value) => {
            write_u8(buffer, b'b');
            write_i8(buffer, *value);
        },
        AmqpData::U8(value) => {
            write_u8(buffer, b'B');
            write_u8(buffer, *value);
        },
        AmqpData::I16(value) => {
            write_u8(buffer, b'U');
            write_i16(buffer, *value);
        },
        AmqpData::U16(value) => {
            write_u8(buffer, b'u');
            write_u16(buffer, *value);
        },
        AmqpData::I32(value) => {
            write_u8(buffer, b'I');
            write_i32(buffer, *value);
        },
        AmqpData::U32(value) => {
            write_u8(buffer, b'i');
            write_u32(buffer, *value);
        },
        AmqpData::I64(value) => {
            write_u8(buffer, b'L');
            write_i64(buffer, *value);
        },
        AmqpData::U64(value) => {
            write_u8(buffer, b'l');
            write_u64(buffer, *value);
        },
        AmqpData::Float(value) => {
            write_u8(buffer, b'f');
            write_f32(buffer, *value);
        },
        AmqpData::Double(value) => {
            write_u8(buffer, b'd');
            write_f64(buffer, *value);
        },
        AmqpData::Decimal(scale, value) => {
            write_u8(buffer, b'D');
            write_u8(buffer, *scale);
            write_u32(buffer, *value);
        },
        AmqpData::ShortString(value) => {
            write_u8(buffer, b's');
            write_short_string(buffer, value)?;
        },
        AmqpData::LongString(value) => {
            write_u8(buffer, b'S');
            write_long_string(buffer, value);
        },
        AmqpData::ByteArray(value) => {
            write_u8(buffer, b'x');
            write_long_bytes(buffer, value);
        },
        AmqpData::Timestamp(value) => {
            write_u8(buffer, b'T');
            write_u64(buffer, *value);
        },
        AmqpData::FieldArray(value) => {
            write_u8(buffer, b'A');
            write_array(buffer, value)?;
        },
        AmqpData::FieldTable(value) => {
            write_u8(buffer, b'F');
            write_table(buffer, value)?;
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_reader::{decode_frame, FrameDecoder};

    fn round_trip(method: AmqpMethod) {
        let frame = AmqpFrame::method(3, method);
        let bytes = FrameWriter::write_frame(&frame).unwrap();
        assert_eq!(decode_frame(&bytes).unwrap(), frame);
    }

    #[test]
    fn method_frame_layout() {
        let bytes = FrameWriter::write_frame(&AmqpFrame::method(0, AmqpMethod::ConnectionTuneOk(10, 131072, 0))).unwrap();

        assert_eq!(bytes[0], AMQP_FRAME_TYPE_METHOD);
        assert_eq!(&bytes[1..3], &[0, 0]);
        assert_eq!(&bytes[3..7], &12u32.to_be_bytes());
        assert_eq!(&bytes[7..11], &[0, 10, 0, 31]);
        assert_eq!(*bytes.last().unwrap(), AMQP_FRAME_END);
        assert_eq!(bytes.len(), 12 + AMQP_FRAME_OVERHEAD as usize);
    }

    #[test]
    fn heartbeat_frame_is_empty() {
        let bytes = FrameWriter::write_frame(&AmqpFrame::heartbeat()).unwrap();
        assert_eq!(bytes, vec![8, 0, 0, 0, 0, 0, 0, 0xCE]);
    }

    #[test]
    fn methods_survive_decoding() {
        let mut table = AmqpTable::new();
        table.insert("product".to_string(), AmqpData::LongString("broker".to_string()));
        table.insert("flag".to_string(), AmqpData::Bool(true));
        table.insert("small".to_string(), AmqpData::I8(-3));
        table.insert("blob".to_string(), AmqpData::ByteArray(vec![0, 1, 0]));
        table.insert("nested".to_string(), AmqpData::FieldArray(vec![AmqpData::I32(7), AmqpData::None]));

        round_trip(AmqpMethod::ConnectionStart(0, 9, table, "PLAIN".to_string(), "en_US".to_string()));
        round_trip(AmqpMethod::QueueDeclareOk("amq.gen-1".to_string(), 4, 1));
        round_trip(AmqpMethod::BasicReturn(312, "NO_ROUTE".to_string(), "ex".to_string(), "key".to_string()));
        round_trip(AmqpMethod::BasicGetOk(9, true, "".to_string(), "q".to_string(), 2));
        round_trip(AmqpMethod::ChannelClose(404, "NOT_FOUND".to_string(), 40, 10));
    }

    #[test]
    fn long_short_string_is_rejected() {
        let name = "x".repeat(256);
        let result = FrameWriter::write_frame(&AmqpFrame::method(1, AmqpMethod::QueueDeclare(name, 0, AmqpTable::new())));

        assert_eq!(result, Err(AmqpFrameError::ShortStringTooLong(256)));
    }

    #[test]
    fn content_is_split_by_frame_max() {
        let body: Vec<u8> = (0..100u8).collect();
        let mut bytes = Vec::new();
        FrameWriter::append_content(&mut bytes, 1, &AmqpBasicProperties::default(), &body, 48).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.set_limits(u16::MAX, 48);
        decoder.feed(&bytes);

        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode().unwrap() {
            frames.push(frame);
        }

        // header + 40 + 40 + 20
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0].payload, AmqpFramePayload::Header(AMQP_CLASS_BASIC, 100, AmqpBasicProperties::default()));

        let mut reassembled = Vec::new();
        for frame in &frames[1..] {
            match &frame.payload {
                AmqpFramePayload::Content(data) => {
                    assert!(data.len() <= 40);
                    reassembled.extend_from_slice(data);
                },
                other => panic!("unexpected payload {:?}", other),
            }
        }
        assert_eq!(reassembled, body);
    }

    #[test]
    fn empty_body_sends_header_only() {
        let mut bytes = Vec::new();
        FrameWriter::append_content(&mut bytes, 1, &AmqpBasicProperties::default(), &[], 4096).unwrap();

        let frame = decode_frame(&bytes).unwrap();
        assert_eq!(frame.payload.frame_type(), AMQP_FRAME_TYPE_HEADER);
        assert_eq!(bytes.len(), 14 + AMQP_FRAME_OVERHEAD as usize);
    }

    #[test]
    fn properties_survive_decoding() {
        let properties = AmqpBasicProperties {
            content_type: Some("text/plain".to_string()),
            delivery_mode: Some(2),
            timestamp: Some(1_700_000_000),
            message_type: Some("event".to_string()),
            cluster_id: Some("c1".to_string()),
            ..Default::default()
        };

        let frame = AmqpFrame { channel: 5, payload: AmqpFramePayload::Header(AMQP_CLASS_BASIC, 11, properties) };
        let bytes = FrameWriter::write_frame(&frame).unwrap();
        assert_eq!(decode_frame(&bytes).unwrap(), frame);
    }

    #[test]
    fn chunk_size_handles_unlimited() {
        assert_eq!(body_chunk_size(0), usize::MAX);
        assert_eq!(body_chunk_size(4096), 4088);
    }
}
