//! Status code decoding.
//!
//! The library decodes its own status codes, and that call can itself fail.
//! [`ErrorDecoder`] tries the original code, then the decoder's failure code
//! once, and gives up after that.

use serde::Serialize;
use tracing::debug;

use crate::transport::{StatusCode, Transport};

/// A status code together with its library text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedStatus {
    /// The decoded code.
    pub status: StatusCode,
    /// Library text for the code.
    pub message: String,
}

/// Outcome of decoding a status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The library knows the code.
    Known(DecodedStatus),
    /// The library answered with its "unknown error code" text.
    Unknown(DecodedStatus),
    /// Decoding failed, and decoding that failure failed too.
    Undecodable(StatusCode),
}

/// Stateless decoder over a transport.
pub struct ErrorDecoder<'a> {
    transport: &'a dyn Transport,
}

impl<'a> ErrorDecoder<'a> {
    /// Decoder using the offline `lib_decode_error` of `transport`.
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self { transport }
    }

    /// Decode `code` into a message.
    ///
    /// If the decode call fails with status `e`, `e` itself is decoded and
    /// returned in place of the original. A second failure yields
    /// [`Decoded::Undecodable`] for the original code.
    pub fn decode(&self, code: StatusCode) -> Decoded {
        match self.transport.lib_decode_error(code) {
            Ok(message) => classify(code, message),
            Err(inner) => {
                debug!(code = code.0, inner = inner.0, "Decoding status failed, decoding failure");
                match self.transport.lib_decode_error(inner) {
                    Ok(message) => classify(inner, message),
                    Err(_) => Decoded::Undecodable(code),
                }
            }
        }
    }
}

fn classify(status: StatusCode, message: String) -> Decoded {
    let decoded = DecodedStatus { status, message };
    if status == StatusCode::UNKNOWN_ERROR_CODE || decoded.message.contains("unknown error code") {
        Decoded::Unknown(decoded)
    } else {
        Decoded::Known(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedTransport;

    #[test]
    fn test_known_code() {
        let sim = SimulatedTransport::new();
        match ErrorDecoder::new(&sim).decode(StatusCode::DEVICE_BUSY) {
            Decoded::Known(status) => {
                assert_eq!(status.status, StatusCode::DEVICE_BUSY);
                assert!(status.message.contains("busy"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_code() {
        let sim = SimulatedTransport::new();
        assert!(matches!(
            ErrorDecoder::new(&sim).decode(StatusCode(-123_456)),
            Decoded::Unknown(_)
        ));
    }

    #[test]
    fn test_decoder_failure_is_decoded_once_more() {
        let sim = SimulatedTransport::new();
        sim.fail_decode_of(StatusCode(-1001), StatusCode::DEVICE_BLOCKED);
        match ErrorDecoder::new(&sim).decode(StatusCode(-1001)) {
            Decoded::Known(status) => assert_eq!(status.status, StatusCode::DEVICE_BLOCKED),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_double_failure_is_undecodable() {
        let sim = SimulatedTransport::new();
        sim.fail_decode_of(StatusCode(-1001), StatusCode(-1002));
        sim.fail_decode_of(StatusCode(-1002), StatusCode(-1003));
        assert_eq!(
            ErrorDecoder::new(&sim).decode(StatusCode(-1001)),
            Decoded::Undecodable(StatusCode(-1001))
        );
    }
}
