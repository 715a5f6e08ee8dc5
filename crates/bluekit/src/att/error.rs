//! ATT protocol error codes

use super::constants::*;
use std::fmt;

/// Attribute-protocol error codes as carried in an error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttErrorCode {
    /// The handle does not address any attribute on the server.
    InvalidHandle,
    /// The attribute cannot be read.
    ReadNotPermitted,
    /// The attribute cannot be written.
    WriteNotPermitted,
    /// The request is not supported for the addressed attribute.
    RequestNotSupported,
    /// No attribute matched the request.
    AttributeNotFound,
    /// The value length is invalid for the attribute.
    InvalidAttributeValueLength,
    /// The request failed for a reason the server cannot express.
    UnlikelyError,
    /// Application-defined error.
    ApplicationError(u8),
    /// Error code not known to this implementation.
    Unknown(u8),
}

impl From<u8> for AttErrorCode {
    fn from(code: u8) -> Self {
        match code {
            ATT_ERROR_INVALID_HANDLE => AttErrorCode::InvalidHandle,
            ATT_ERROR_READ_NOT_PERMITTED => AttErrorCode::ReadNotPermitted,
            ATT_ERROR_WRITE_NOT_PERMITTED => AttErrorCode::WriteNotPermitted,
            ATT_ERROR_REQUEST_NOT_SUPPORTED => AttErrorCode::RequestNotSupported,
            ATT_ERROR_ATTRIBUTE_NOT_FOUND => AttErrorCode::AttributeNotFound,
            ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH => AttErrorCode::InvalidAttributeValueLength,
            ATT_ERROR_UNLIKELY => AttErrorCode::UnlikelyError,
            c if (ATT_ERROR_APPLICATION_ERROR_START..=ATT_ERROR_APPLICATION_ERROR_END)
                .contains(&c) =>
            {
                AttErrorCode::ApplicationError(c)
            }
            c => AttErrorCode::Unknown(c),
        }
    }
}

impl From<AttErrorCode> for u8 {
    fn from(code: AttErrorCode) -> Self {
        match code {
            AttErrorCode::InvalidHandle => ATT_ERROR_INVALID_HANDLE,
            AttErrorCode::ReadNotPermitted => ATT_ERROR_READ_NOT_PERMITTED,
            AttErrorCode::WriteNotPermitted => ATT_ERROR_WRITE_NOT_PERMITTED,
            AttErrorCode::RequestNotSupported => ATT_ERROR_REQUEST_NOT_SUPPORTED,
            AttErrorCode::AttributeNotFound => ATT_ERROR_ATTRIBUTE_NOT_FOUND,
            AttErrorCode::InvalidAttributeValueLength => ATT_ERROR_INVALID_ATTRIBUTE_VALUE_LENGTH,
            AttErrorCode::UnlikelyError => ATT_ERROR_UNLIKELY,
            AttErrorCode::ApplicationError(c) => c,
            AttErrorCode::Unknown(c) => c,
        }
    }
}

impl fmt::Display for AttErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttErrorCode::InvalidHandle => write!(f, "invalid handle"),
            AttErrorCode::ReadNotPermitted => write!(f, "read not permitted"),
            AttErrorCode::WriteNotPermitted => write!(f, "write not permitted"),
            AttErrorCode::RequestNotSupported => write!(f, "request not supported"),
            AttErrorCode::AttributeNotFound => write!(f, "attribute not found"),
            AttErrorCode::InvalidAttributeValueLength => {
                write!(f, "invalid attribute value length")
            }
            AttErrorCode::UnlikelyError => write!(f, "unlikely error"),
            AttErrorCode::ApplicationError(c) => write!(f, "application error 0x{:02x}", c),
            AttErrorCode::Unknown(c) => write!(f, "unknown error code 0x{:02x}", c),
        }
    }
}
