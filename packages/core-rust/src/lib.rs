//! `rpcgate` core: decoded call metadata, header matching, transport and
//! protocol kinds, and the application exceptions the proxy synthesizes.

pub mod app_exception;
pub mod header_matcher;
pub mod headers;
pub mod metadata;
pub mod metadata_match;
pub mod protocol;

pub use app_exception::{AppException, AppExceptionType};
pub use header_matcher::{
    match_all, HeaderMatchSpec, HeaderMatcher, HeaderMatcherConfig, HeaderMatcherError, Int64Range,
};
pub use headers::HeaderMap;
pub use metadata::{MessageMetadata, MessageType, ReplyType};
pub use metadata_match::MetadataMatchCriteria;
pub use protocol::{passthrough_supported, ProtocolType, TransportType};
