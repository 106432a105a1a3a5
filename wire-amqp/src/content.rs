use super::defines::AMQP_CLASS_BASIC;
use super::error::{AmqpError, AmqpResult};
use super::frame::{AmqpBasicProperties, AmqpTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentOwnership {
    Free,
    /// Produced by the delivery machinery; read-only until unlinked.
    Linked,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Built locally, not received from the broker.
    Local,
    Deliver { consumer_tag: String, delivery_tag: u64, redelivered: bool },
    Get { delivery_tag: u64, redelivered: bool, message_count: u32 },
    Return { reply_code: u16, reply_text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    properties: AmqpBasicProperties,
    body: Vec<u8>,
    exchange: String,
    routing_key: String,
    delivery: Delivery,
    ownership: ContentOwnership,
}

macro_rules! string_property {
    ($getter:ident, $setter:ident) => {
        pub fn $getter(&self) -> Option<&str> {
            self.properties.$getter.as_deref()
        }

        pub fn $setter(&mut self, value: Option<&str>) -> AmqpResult<()> {
            self.check_free()?;
            self.properties.$getter = value.map(|value| value.to_string());
            Ok(())
        }
    };
}

impl Content {
    pub fn new() -> Self {
        Self {
            properties: AmqpBasicProperties::default(),
            body: Vec::new(),
            exchange: String::new(),
            routing_key: String::new(),
            delivery: Delivery::Local,
            ownership: ContentOwnership::Free,
        }
    }

    pub fn with_body(body: &[u8]) -> Self {
        let mut content = Content::new();
        content.body = body.to_vec();
        content
    }

    pub(crate) fn received(properties: AmqpBasicProperties, body: Vec<u8>, exchange: String, routing_key: String, delivery: Delivery) -> Self {
        Self { properties, body, exchange, routing_key, delivery, ownership: ContentOwnership::Linked }
    }

    fn check_free(&self) -> AmqpResult<()> {
        match self.ownership {
            ContentOwnership::Free => Ok(()),
            ContentOwnership::Linked => Err(AmqpError::Contract("content is linked, unlink it before modifying".to_string())),
        }
    }

    /// Detaches a delivered content into caller ownership. No-op when already free.
    pub fn unlink(&mut self) {
        self.ownership = ContentOwnership::Free;
    }

    pub fn ownership(&self) -> ContentOwnership {
        self.ownership
    }

    pub fn is_linked(&self) -> bool {
        self.ownership == ContentOwnership::Linked
    }

    pub fn class_id(&self) -> u16 {
        AMQP_CLASS_BASIC
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    pub fn set_body(&mut self, body: &[u8]) -> AmqpResult<()> {
        self.check_free()?;
        self.body = body.to_vec();
        Ok(())
    }

    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub(crate) fn set_route(&mut self, exchange: &str, routing_key: &str) {
        self.exchange = exchange.to_string();
        self.routing_key = routing_key.to_string();
    }

    pub fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    pub fn properties(&self) -> &AmqpBasicProperties {
        &self.properties
    }

    string_property!(content_type, set_content_type);
    string_property!(content_encoding, set_content_encoding);
    string_property!(correlation_id, set_correlation_id);
    string_property!(reply_to, set_reply_to);
    string_property!(message_id, set_message_id);
    string_property!(user_id, set_user_id);
    string_property!(app_id, set_app_id);
    string_property!(expiration, set_expiration);
    string_property!(message_type, set_message_type);

    pub fn priority(&self) -> Option<u8> {
        self.properties.priority
    }

    /// Priority ranges 0 to 9.
    pub fn set_priority(&mut self, value: Option<u8>) -> AmqpResult<()> {
        self.check_free()?;
        if let Some(priority) = value.filter(|priority| *priority > 9) {
            return Err(AmqpError::Contract(format!("priority {} is outside 0-9", priority)));
        }

        self.properties.priority = value;
        Ok(())
    }

    pub fn delivery_mode(&self) -> Option<u8> {
        self.properties.delivery_mode
    }

    /// 1 is non-persistent, 2 is persistent.
    pub fn set_delivery_mode(&mut self, value: Option<u8>) -> AmqpResult<()> {
        self.check_free()?;
        if let Some(mode) = value.filter(|mode| !matches!(mode, 1 | 2)) {
            return Err(AmqpError::Contract(format!("delivery mode {} is not 1 or 2", mode)));
        }

        self.properties.delivery_mode = value;
        Ok(())
    }

    /// Seconds since the Unix epoch.
    pub fn timestamp(&self) -> Option<u64> {
        self.properties.timestamp
    }

    pub fn set_timestamp(&mut self, value: Option<u64>) -> AmqpResult<()> {
        self.check_free()?;
        self.properties.timestamp = value;
        Ok(())
    }

    pub fn headers(&self) -> Option<&AmqpTable> {
        self.properties.headers.as_ref()
    }

    pub fn set_headers(&mut self, value: Option<AmqpTable>) -> AmqpResult<()> {
        self.check_free()?;
        self.properties.headers = value;
        Ok(())
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingContent {
    pub delivery: Delivery,
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Default)]
enum AssemblyState {
    #[default]
    Idle,
    AwaitingHeader(PendingContent),
    AwaitingBody(PendingContent, usize, AmqpBasicProperties, Vec<u8>),
}

/// Reassembles method + header + body frames of one channel into a [`Content`].
#[derive(Debug, Default)]
pub(crate) struct ContentAssembler {
    state: AssemblyState,
}

impl ContentAssembler {
    pub fn is_idle(&self) -> bool {
        matches!(self.state, AssemblyState::Idle)
    }

    pub fn start(&mut self, pending: PendingContent) -> AmqpResult<()> {
        if !self.is_idle() {
            return Err(AmqpError::UnexpectedFrame("content header", "method frame".to_string()));
        }

        self.state = AssemblyState::AwaitingHeader(pending);
        Ok(())
    }

    pub fn header(&mut self, class_id: u16, size: u64, properties: AmqpBasicProperties) -> AmqpResult<Option<Content>> {
        let pending = match std::mem::take(&mut self.state) {
            AssemblyState::AwaitingHeader(pending) => pending,
            _ => return Err(AmqpError::UnexpectedFrame("method frame", "content header".to_string())),
        };

        if class_id != AMQP_CLASS_BASIC {
            return Err(AmqpError::UnexpectedFrame("basic content header", format!("class {}", class_id)));
        }

        let size = usize::try_from(size)
            .map_err(|_| AmqpError::Contract(format!("content of {} bytes cannot be held in memory", size)))?;

        if size == 0 {
            return Ok(Some(Content::received(properties, Vec::new(), pending.exchange, pending.routing_key, pending.delivery)));
        }

        // the header's size is untrusted, cap the preallocation
        let body = Vec::with_capacity(size.min(1 << 20));
        self.state = AssemblyState::AwaitingBody(pending, size, properties, body);
        Ok(None)
    }

    pub fn body(&mut self, data: &[u8]) -> AmqpResult<Option<Content>> {
        let (pending, size, properties, mut body) = match std::mem::take(&mut self.state) {
            AssemblyState::AwaitingBody(pending, size, properties, body) => (pending, size, properties, body),
            _ => return Err(AmqpError::UnexpectedFrame("method frame", "content body".to_string())),
        };

        if body.len() + data.len() > size {
            return Err(AmqpError::UnexpectedFrame("content body", format!("{} bytes past declared size {}", body.len() + data.len() - size, size)));
        }

        body.extend_from_slice(data);
        if body.len() < size {
            self.state = AssemblyState::AwaitingBody(pending, size, properties, body);
            return Ok(None);
        }

        Ok(Some(Content::received(properties, body, pending.exchange, pending.routing_key, pending.delivery)))
    }
}
