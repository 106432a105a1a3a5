use std::io;

use thiserror::Error;

use super::defines::AMQP_REPLY_NOT_FOUND;
use super::frame::AmqpFrameError;

/// Coarse classification of [`AmqpError`], for callers that branch on the failure family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Framing,
    Protocol,
    ConnectionDead,
    SessionDead,
    Timeout,
    Contract,
    Transport,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AmqpError {
    #[error("Frame error - {0}")]
    Framing(#[from] AmqpFrameError),
    #[error("Transport error - {0}")]
    Transport(String),
    #[error("Connection closed by server - {0} {1}")]
    ConnectionClosedByServer(u16, String, u16, u16),        // reply-code, reply-text, class-id, method-id
    #[error("Channel closed by server - {0} {1}")]
    ChannelClosedByServer(u16, String, u16, u16),           // reply-code, reply-text, class-id, method-id
    #[error("Unexpected frame - expected {0}, got {1}")]
    UnexpectedFrame(&'static str, String),
    #[error("Handshake refused - {0}")]
    HandshakeRefused(String),
    #[error("Connection is dead - {0}")]
    ConnectionDead(String),
    #[error("Connection already destroyed")]
    ConnectionDestroyed,
    #[error("Session is dead - {0}")]
    SessionDead(String),
    #[error("Session already destroyed")]
    SessionDestroyed,
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("Contract violation - {0}")]
    Contract(String),
}

impl AmqpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AmqpError::Framing(_) => ErrorKind::Framing,
            AmqpError::Transport(_) => ErrorKind::Transport,
            AmqpError::ConnectionClosedByServer(..)
            | AmqpError::ChannelClosedByServer(..)
            | AmqpError::UnexpectedFrame(..)
            | AmqpError::HandshakeRefused(_) => ErrorKind::Protocol,
            AmqpError::ConnectionDead(_) | AmqpError::ConnectionDestroyed => ErrorKind::ConnectionDead,
            AmqpError::SessionDead(_) | AmqpError::SessionDestroyed => ErrorKind::SessionDead,
            AmqpError::Timeout(_) => ErrorKind::Timeout,
            AmqpError::Contract(_) => ErrorKind::Contract,
        }
    }

    /// Broker reply code, 0 when the failure did not come from the broker.
    pub fn reply_code(&self) -> u16 {
        match self {
            AmqpError::ConnectionClosedByServer(code, ..) | AmqpError::ChannelClosedByServer(code, ..) => *code,
            _ => 0,
        }
    }

    pub fn reply_text(&self) -> &str {
        match self {
            AmqpError::ConnectionClosedByServer(_, text, ..) | AmqpError::ChannelClosedByServer(_, text, ..) => text,
            _ => "",
        }
    }

    /// Class and method of the request the broker rejected.
    pub fn class_method_id(&self) -> (u16, u16) {
        match self {
            AmqpError::ConnectionClosedByServer(_, _, class, method)
            | AmqpError::ChannelClosedByServer(_, _, class, method) => (*class, *method),
            _ => (0, 0),
        }
    }

    /// True when the broker refused a request because the named entity does not exist.
    pub fn is_not_found(&self) -> bool {
        self.reply_code() == AMQP_REPLY_NOT_FOUND
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }
}

impl From<io::Error> for AmqpError {
    fn from(error: io::Error) -> Self {
        AmqpError::Transport(error.to_string())
    }
}

impl From<wire_library::socket::SocketError> for AmqpError {
    fn from(error: wire_library::socket::SocketError) -> Self {
        AmqpError::Transport(error.to_string())
    }
}

pub type AmqpResult<T> = Result<T, AmqpError>;
