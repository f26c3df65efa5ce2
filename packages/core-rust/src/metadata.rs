//! Decoded call metadata handed to the router by the protocol decoder.

use crate::headers::HeaderMap;
use crate::protocol::ProtocolType;

/// Kind of an RPC message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Call,
    Reply,
    Exception,
    Oneway,
}

impl MessageType {
    /// Maps the wire value (1..=4) to a message kind. Anything else is an
    /// invalid message type.
    #[must_use]
    pub fn from_wire(value: i8) -> Option<Self> {
        match value {
            1 => Some(Self::Call),
            2 => Some(Self::Reply),
            3 => Some(Self::Exception),
            4 => Some(Self::Oneway),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_wire(self) -> i8 {
        match self {
            Self::Call => 1,
            Self::Reply => 2,
            Self::Exception => 3,
            Self::Oneway => 4,
        }
    }
}

/// Outcome carried by a reply message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyType {
    Success,
    Error,
}

/// Metadata for one decoded message.
///
/// `message_type` is `None` when the decoder saw an invalid message kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageMetadata {
    method_name: Option<String>,
    pub message_type: Option<MessageType>,
    pub sequence_id: i32,
    pub headers: HeaderMap,
    pub protocol: Option<ProtocolType>,
    pub reply_type: Option<ReplyType>,
}

impl MessageMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for a call with the given method name.
    #[must_use]
    pub fn call(method_name: impl Into<String>) -> Self {
        Self {
            method_name: Some(method_name.into()),
            message_type: Some(MessageType::Call),
            ..Self::default()
        }
    }

    /// Convenience constructor for a one-way call.
    #[must_use]
    pub fn oneway(method_name: impl Into<String>) -> Self {
        Self {
            method_name: Some(method_name.into()),
            message_type: Some(MessageType::Oneway),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.add(name, value);
        self
    }

    #[must_use]
    pub fn has_method_name(&self) -> bool {
        self.method_name.is_some()
    }

    /// The method name, or `""` when the decoder produced none.
    #[must_use]
    pub fn method_name(&self) -> &str {
        self.method_name.as_deref().unwrap_or_default()
    }

    pub fn set_method_name(&mut self, name: impl Into<String>) {
        self.method_name = Some(name.into());
    }

    /// The `service` part of a `service:method` name, if present.
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        self.method_name
            .as_deref()
            .and_then(|m| m.split_once(':'))
            .map(|(service, _)| service)
    }

    /// Removes a `service:` prefix from the method name. Returns `true` if a
    /// prefix was removed.
    pub fn strip_service_name(&mut self) -> bool {
        let Some(method) = self.method_name.as_mut() else {
            return false;
        };
        match method.find(':') {
            Some(pos) => {
                method.drain(..=pos);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_oneway(&self) -> bool {
        self.message_type == Some(MessageType::Oneway)
    }
}
