//! Driver for PicoQuant Sepia II / PDL 828 laser driver chassis.
//!
//! The vendor library addresses modules by device index and slot number and
//! knows nothing about what is plugged where. This crate reads the chassis'
//! module map on open and exposes one typed controller per module, plus a
//! [`Chassis`] facade for the common workflows.
//!
//! # Architecture
//!
//! ## Transport
//! - [`Transport`] - one method per library function, status codes as `Err`
//! - [`sim::SimulatedTransport`] - in-memory chassis for tests and demos
//!
//! ## Discovery
//! - [`ModuleMap`] / [`ModuleDescriptor`] - modules in firmware map order
//!
//! ## Controllers
//! - [`OscillatorController`] - SOM / SOMD clock, outputs, sequencer delays
//! - [`SimpleLaserController`] - SLM intensity and pulse parameters
//! - [`TunableLaserController`] - Prima wavelength, mode, gating
//! - [`SafetyController`] - SCM softlock
//!
//! ## Facade
//! - [`Chassis`] - open, start/stop, lock/unlock, status, teardown
//! - [`list_devices`] - probe all device indices
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use daq_driver_sepia::sim::{SimDevice, SimulatedTransport};
//! use daq_driver_sepia::{Chassis, ChassisConfig};
//!
//! # fn example() -> daq_driver_sepia::Result<()> {
//! let transport = Arc::new(SimulatedTransport::with_device(0, SimDevice::standard()));
//! let chassis = Chassis::open(transport, &ChassisConfig::default())?;
//!
//! let report = chassis.start_laser_simple(0, 27.0, 50.0, Some(12.0))?;
//! println!("running at {:?}", report.actual_frequency);
//!
//! chassis.stop_lasers()?;
//! // Dropping the chassis engages the softlock and closes the device.
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod chassis;
pub mod config;
pub mod controller;
pub mod decode;
pub mod device;
pub mod error;
pub mod module_map;
pub mod sim;
pub mod transport;

pub use chassis::{list_devices, Chassis, ChassisStatus, DeviceListing, StartReport};
pub use config::{load_chassis_config, load_chassis_config_from_str, ChassisConfig, ConfigError};
pub use controller::{
    AuxInMode, Channels, ClockSetting, Delay, DelayUnits, LaserController, LaserStatus,
    ModuleController, OperationMode, OscillatorController, OscillatorStatus, SafetyController,
    SafetyStatus, SeqOutput, SimpleLaserController, SimpleLaserStatus, TunableDeviceInfo,
    TunableLaserController, TunableLaserStatus,
};
pub use decode::{DecodedStatus, ErrorDecoder};
pub use device::DeviceHandle;
pub use error::{ErrorClass, Result, SepiaError};
pub use module_map::{ModuleDescriptor, ModuleMap, ModuleType};
pub use transport::{OscillatorFamily, StatusCode, Transport};
