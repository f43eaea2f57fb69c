//! Device handle shared by the chassis and its controllers.
//!
//! A [`DeviceHandle`] pairs the shared transport with a USB device index. It
//! does not own the open USB connection; opening and closing are driven by
//! [`crate::chassis::Chassis`].

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::decode::{Decoded, ErrorDecoder};
use crate::error::{Result, SepiaError};
use crate::transport::{StatusCode, Transport, TransportResult, UsbIdentity};

/// Highest USB device index the library addresses.
pub const MAX_DEVICE_INDEX: i32 = 7;

/// Transport plus device index, cheap to clone.
#[derive(Clone)]
pub struct DeviceHandle {
    transport: Arc<dyn Transport>,
    index: i32,
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl DeviceHandle {
    /// Address device `index` through `transport`. Does not open anything.
    pub fn new(transport: Arc<dyn Transport>, index: i32) -> Result<Self> {
        if !(0..=MAX_DEVICE_INDEX).contains(&index) {
            return Err(SepiaError::invalid_argument(format!(
                "device index {index} outside 0..={MAX_DEVICE_INDEX}"
            )));
        }
        Ok(Self { transport, index })
    }

    /// USB device index.
    pub fn index(&self) -> i32 {
        self.index
    }

    /// Shared transport.
    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Run one transport call against this device.
    ///
    /// A nonzero status is decoded and turned into a [`SepiaError`] naming
    /// `operation`.
    pub(crate) fn call<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Transport, i32) -> TransportResult<T>,
    {
        f(self.transport.as_ref(), self.index).map_err(|code| self.status_error(operation, code))
    }

    /// Run an offline decoder through the same error mapping.
    pub(crate) fn offline<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Transport) -> TransportResult<T>,
    {
        f(self.transport.as_ref()).map_err(|code| self.status_error(operation, code))
    }

    /// Turn a raw status into a typed error.
    pub(crate) fn status_error(&self, operation: &'static str, code: StatusCode) -> SepiaError {
        status_error(self.transport.as_ref(), self.index, operation, code)
    }

    /// Open the USB connection exclusively.
    pub(crate) fn open(&self) -> Result<UsbIdentity> {
        let identity = self.call("usb_open_device", |t, dev| t.usb_open_device(dev))?;
        info!(
            device = self.index,
            product_model = %identity.product_model,
            serial_number = %identity.serial_number,
            "Opened Sepia2 device"
        );
        Ok(identity)
    }

    /// Whether the USB connection is currently open.
    pub(crate) fn is_open(&self) -> Result<bool> {
        self.call("usb_is_open_device", |t, dev| t.usb_is_open_device(dev))
    }

    /// Close the USB connection.
    pub(crate) fn close(&self) -> Result<()> {
        debug!(device = self.index, "Closing Sepia2 device");
        self.call("usb_close_device", |t, dev| t.usb_close_device(dev))
    }
}

pub(crate) fn status_error(
    transport: &dyn Transport,
    device: i32,
    operation: &'static str,
    code: StatusCode,
) -> SepiaError {
    let decoded = ErrorDecoder::new(transport).decode(code);
    if code.is_busy() {
        let message = match decoded {
            Decoded::Known(status) | Decoded::Unknown(status) => status.message,
            Decoded::Undecodable(_) => "device busy".to_string(),
        };
        return SepiaError::DeviceBusy {
            device,
            operation,
            code,
            message,
        };
    }
    match decoded {
        Decoded::Known(status) => {
            debug!(device, operation, code = code.0, message = %status.message, "Library call failed");
            SepiaError::Library {
                device,
                operation,
                code,
                message: status.message,
            }
        }
        Decoded::Unknown(_) | Decoded::Undecodable(_) => {
            warn!(device, operation, code = code.0, "Library returned an undecodable status");
            SepiaError::UndecodableStatus {
                device,
                operation,
                code,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::sim::SimulatedTransport;

    #[test]
    fn test_index_range() {
        let sim: Arc<dyn Transport> = Arc::new(SimulatedTransport::new());
        assert!(DeviceHandle::new(sim.clone(), 0).is_ok());
        assert!(DeviceHandle::new(sim.clone(), 7).is_ok());
        let err = DeviceHandle::new(sim, 8).unwrap_err();
        assert_eq!(err.class(), ErrorClass::CallerContract);
    }

    #[test]
    fn test_status_mapping() {
        let sim = SimulatedTransport::new();
        let busy = status_error(&sim, 0, "usb_open_device", StatusCode::DEVICE_BUSY);
        assert!(busy.is_busy());

        let lib = status_error(&sim, 0, "fwr_get_version", StatusCode(-1201));
        assert_eq!(lib.class(), ErrorClass::Transport);
        assert!(!lib.is_busy());

        let unknown = status_error(&sim, 0, "fwr_get_version", StatusCode(-31_337));
        assert_eq!(unknown.class(), ErrorClass::Protocol);
    }
}
