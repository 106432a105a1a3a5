use std::sync::OnceLock;

// Logs through the `log` facade when the connection's diagnostics allow `$level`.
macro_rules! diag {
    ($diagnostics:expr, $level:ident, $($arg:tt)+) => {
        if $diagnostics.enabled(log::Level::$level) {
            log::log!(log::Level::$level, $($arg)+);
        }
    };
}

pub mod defines;
pub mod frame;
pub mod frame_reader;
pub mod frame_writer;
pub mod error;
pub mod config;
pub mod content;
pub mod transport;
pub mod connection;
pub mod session;
mod diagnostics;
mod dispatch;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState};
pub use content::{Content, ContentOwnership, Delivery};
pub use error::{AmqpError, AmqpResult, ErrorKind};
pub use frame::{AmqpBasicProperties, AmqpData, AmqpTable};
pub use session::{Session, SessionState, WaitStatus};
pub use transport::{Transport, TransportReader, TransportWriter};

static CLIENT_PROPERTIES: OnceLock<AmqpTable> = OnceLock::new();

/// One-time process setup. Returns the client properties announced in `connection.start-ok`.
/// Called by `Connection::open`, calling it again is harmless.
pub fn initialise() -> &'static AmqpTable {
    CLIENT_PROPERTIES.get_or_init(|| {
        let mut properties = AmqpTable::new();
        properties.insert("product".to_string(), AmqpData::LongString(env!("CARGO_PKG_NAME").to_string()));
        properties.insert("version".to_string(), AmqpData::LongString(env!("CARGO_PKG_VERSION").to_string()));
        properties.insert("platform".to_string(), AmqpData::LongString(format!("Rust ({})", std::env::consts::OS)));
        properties.insert("information".to_string(), AmqpData::LongString("Blocking AMQP 0-9-1 client".to_string()));
        properties
    })
}

fn set_flag(flags: u8, bit: u8, value: bool) -> u8 {
    if value {
        flags | (1 << bit)
    } else {
        flags & !(1 << bit)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AmqpExchangeFlags {
    flags: u8,
}

impl AmqpExchangeFlags {
    pub fn new() -> Self {
        Self { flags: 0 }
    }

    /// Only check that the exchange exists; a missing one fails with reply code 404.
    pub fn passive(mut self, value: bool) -> Self {
        self.flags = set_flag(self.flags, 0, value);
        self
    }

    pub fn durable(mut self, value: bool) -> Self {
        self.flags = set_flag(self.flags, 1, value);
        self
    }

    /// Travels in the third flag bit, which 0-9-1 brokers read as auto-delete.
    pub fn undeletable(mut self, value: bool) -> Self {
        self.flags = set_flag(self.flags, 2, value);
        self
    }

    pub fn internal(mut self, value: bool) -> Self {
        self.flags = set_flag(self.flags, 3, value);
        self
    }

    pub fn is_passive(self) -> bool {
        (self.flags & 1) != 0
    }
}

impl From<AmqpExchangeFlags> for u8 {
    fn from(value: AmqpExchangeFlags) -> u8 {
        value.flags
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AmqpQueueFlags {
    flags: u8,
}

impl AmqpQueueFlags {
    pub fn new() -> Self {
        Self { flags: 0 }
    }

    pub fn passive(mut self, value: bool) -> Self {
        self.flags = set_flag(self.flags, 0, value);
        self
    }

    pub fn durable(mut self, value: bool) -> Self {
        self.flags = set_flag(self.flags, 1, value);
        self
    }

    pub fn exclusive(mut self, value: bool) -> Self {
        self.flags = set_flag(self.flags, 2, value);
        self
    }

    pub fn auto_delete(mut self, value: bool) -> Self {
        self.flags = set_flag(self.flags, 3, value);
        self
    }

    pub fn is_passive(self) -> bool {
        (self.flags & 1) != 0
    }
}

impl From<AmqpQueueFlags> for u8 {
    fn from(value: AmqpQueueFlags) -> u8 {
        value.flags
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmqpConsumeFlags {
    flags: u8,
}

impl AmqpConsumeFlags {
    /// No flags set. Note that `Default` is different and turns on `no_local` and `no_ack`.
    pub fn new() -> Self {
        Self { flags: 0 }
    }

    pub fn no_local(mut self, value: bool) -> Self {
        self.flags = set_flag(self.flags, 0, value);
        self
    }

    pub fn no_ack(mut self, value: bool) -> Self {
        self.flags = set_flag(self.flags, 1, value);
        self
    }

    pub fn exclusive(mut self, value: bool) -> Self {
        self.flags = set_flag(self.flags, 2, value);
        self
    }
}

impl Default for AmqpConsumeFlags {
    fn default() -> Self {
        AmqpConsumeFlags::new().no_local(true).no_ack(true)
    }
}

impl From<AmqpConsumeFlags> for u8 {
    fn from(value: AmqpConsumeFlags) -> u8 {
        value.flags
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AmqpPublishFlags {
    flags: u8,
}

impl AmqpPublishFlags {
    pub fn new() -> Self {
        Self { flags: 0 }
    }

    /// Return the message when no queue is bound to the routing key.
    pub fn mandatory(mut self, value: bool) -> Self {
        self.flags = set_flag(self.flags, 0, value);
        self
    }

    /// Return the message when no consumer can take it right away.
    pub fn immediate(mut self, value: bool) -> Self {
        self.flags = set_flag(self.flags, 1, value);
        self
    }
}

impl From<AmqpPublishFlags> for u8 {
    fn from(value: AmqpPublishFlags) -> u8 {
        value.flags
    }
}
