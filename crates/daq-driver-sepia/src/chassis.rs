//! Chassis facade.
//!
//! A [`Chassis`] exists only while its USB device is open. Opening reads the
//! module map and builds one controller per recognised module; dropping the
//! chassis engages the safety softlock, frees the map and closes the device.
//! [`Chassis::close`] is the only way to release the device and leave the
//! lasers running.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ChassisConfig;
use crate::controller::simple_laser::EXTERNAL_FALLING_EDGE;
use crate::controller::{
    intensity_fine_steps, validate_channel, AuxInMode, Channels, ClockSetting, Delay,
    LaserController, LaserStatus, ModuleController, OscillatorController, OscillatorStatus,
    SafetyController, SafetyStatus,
};
use crate::device::{DeviceHandle, MAX_DEVICE_INDEX};
use crate::error::{Result, SepiaError};
use crate::module_map::{ModuleDescriptor, ModuleMap};
use crate::transport::{OscillatorFamily, Transport, UsbIdentity};

/// Burst pattern used by [`Chassis::start_laser_simple`]: one pulse per
/// sequencer cycle.
const SINGLE_PULSE_BURST: [u32; 8] = [1, 0, 0, 0, 0, 0, 0, 0];

/// Channel whose SYNC output [`Chassis::start_laser_simple`] enables.
const SYNC_CHANNEL: usize = 0;

/// One device found by [`list_devices`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceListing {
    /// USB device index.
    pub index: i32,
    /// Product model string.
    pub product_model: String,
    /// Serial number string.
    pub serial_number: String,
}

/// What [`Chassis::start_laser_simple`] actually applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StartReport {
    /// Clock the oscillator runs at; `None` without an oscillator.
    pub actual_frequency: Option<ClockSetting>,
    /// Delay read back from the sequencer, if one was requested.
    pub applied_delay: Option<Delay>,
}

/// Snapshot of every module of the chassis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChassisStatus {
    /// USB device index.
    pub device_index: i32,
    /// Product model string.
    pub product_model: String,
    /// Serial number string.
    pub serial_number: String,
    /// Chassis firmware version.
    pub firmware_version: String,
    /// Version of the vendor library behind the transport.
    pub library_version: String,
    /// Module map in discovery order.
    pub modules: Vec<ModuleDescriptor>,
    /// Safety module status, if present.
    pub safety: Option<SafetyStatus>,
    /// Oscillator status, if present.
    pub oscillator: Option<OscillatorStatus>,
    /// Laser status in discovery order.
    pub lasers: Vec<LaserStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Drop locks the lasers and releases the device.
    Armed,
    /// Device already released.
    Released,
}

/// An open Sepia2 chassis and the controllers of its modules.
#[derive(Debug)]
pub struct Chassis {
    device: DeviceHandle,
    identity: UsbIdentity,
    map: ModuleMap,
    oscillator: Option<OscillatorController>,
    safety: Option<SafetyController>,
    lasers: Vec<LaserController>,
    unhandled: Vec<ModuleDescriptor>,
    teardown: Teardown,
}

impl Chassis {
    /// Open the device named by `config` and discover its modules.
    ///
    /// On failure after the USB open, the module map is freed and the device
    /// closed before the error is returned.
    pub fn open(transport: Arc<dyn Transport>, config: &ChassisConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| SepiaError::invalid_argument(e.to_string()))?;
        let device = DeviceHandle::new(transport, config.device_index)?;
        let identity = device.open()?;

        match Self::assemble(device.clone(), identity, config) {
            Ok(chassis) => Ok(chassis),
            Err(err) => {
                warn!(device = device.index(), error = %err, "Chassis open failed, releasing device");
                if let Err(e) = ModuleMap::release(&device) {
                    warn!(device = device.index(), error = %e, "Failed to free module map");
                }
                if let Err(e) = device.close() {
                    warn!(device = device.index(), error = %e, "Failed to close device");
                }
                Err(err)
            }
        }
    }

    /// Open device `index` with default settings.
    pub fn open_index(transport: Arc<dyn Transport>, index: i32) -> Result<Self> {
        Self::open(transport, &ChassisConfig::for_device(index))
    }

    fn assemble(device: DeviceHandle, identity: UsbIdentity, config: &ChassisConfig) -> Result<Self> {
        let map = ModuleMap::discover(&device, config.restart)?;

        let mut oscillator: Option<OscillatorController> = None;
        let mut safety: Option<SafetyController> = None;
        let mut lasers = Vec::new();
        let mut unhandled = Vec::new();

        for descriptor in map.iter() {
            if config.verbose {
                info!(
                    slot_id = descriptor.slot_id,
                    module_type = %descriptor.module_type,
                    primary = descriptor.is_primary,
                    "Found module"
                );
            }
            match ModuleController::from_descriptor(&device, descriptor) {
                ModuleController::Oscillator(osc) => {
                    if let Some(previous) = oscillator.replace(osc) {
                        warn!(
                            previous_slot = previous.descriptor().slot_id,
                            slot_id = descriptor.slot_id,
                            "More than one oscillator, using the last one"
                        );
                    }
                }
                ModuleController::Safety(scm) => {
                    if let Some(previous) = safety.replace(scm) {
                        warn!(
                            previous_slot = previous.descriptor().slot_id,
                            slot_id = descriptor.slot_id,
                            "More than one safety module, using the last one"
                        );
                    }
                }
                ModuleController::SimpleLaser(slm) => lasers.push(LaserController::Simple(slm)),
                ModuleController::TunableLaser(pri) => lasers.push(LaserController::Tunable(pri)),
                ModuleController::Unhandled(descriptor) => {
                    debug!(
                        slot_id = descriptor.slot_id,
                        abbreviation = %descriptor.abbreviation,
                        "No controller for module"
                    );
                    unhandled.push(descriptor);
                }
            }
        }

        if config.reset_sequencer {
            if let Some(osc) = &oscillator {
                osc.set_sequencer(false, AuxInMode::FreeRunning)?;
            }
        }

        info!(
            device = device.index(),
            serial_number = %identity.serial_number,
            lasers = lasers.len(),
            oscillator = oscillator.is_some(),
            safety = safety.is_some(),
            "Chassis ready"
        );

        Ok(Self {
            device,
            identity,
            map,
            oscillator,
            safety,
            lasers,
            unhandled,
            teardown: Teardown::Armed,
        })
    }

    /// USB device index.
    pub fn device_index(&self) -> i32 {
        self.device.index()
    }

    /// Product model read at open.
    pub fn product_model(&self) -> &str {
        &self.identity.product_model
    }

    /// Serial number read at open.
    pub fn serial_number(&self) -> &str {
        &self.identity.serial_number
    }

    /// Discovered module map.
    pub fn module_map(&self) -> &ModuleMap {
        &self.map
    }

    /// Oscillator controller, if the chassis has one.
    pub fn oscillator(&self) -> Option<&OscillatorController> {
        self.oscillator.as_ref()
    }

    /// Safety module controller, if the chassis has one.
    pub fn safety(&self) -> Option<&SafetyController> {
        self.safety.as_ref()
    }

    /// Lasers in discovery order.
    pub fn lasers(&self) -> &[LaserController] {
        &self.lasers
    }

    /// Laser `index` in discovery order.
    pub fn laser(&self, index: usize) -> Result<&LaserController> {
        self.lasers.get(index).ok_or(SepiaError::NoSuchLaser {
            index,
            count: self.lasers.len(),
        })
    }

    /// Modules without a controller.
    pub fn unhandled(&self) -> &[ModuleDescriptor] {
        &self.unhandled
    }

    /// Long type name of a module, for reporting.
    pub fn describe_module(&self, descriptor: &ModuleDescriptor) -> Result<String> {
        ModuleMap::describe_long(&self.device, descriptor.type_code)
    }

    /// Firmware version of the chassis.
    pub fn firmware_version(&self) -> Result<String> {
        self.device
            .call("fwr_get_version", |t, dev| t.fwr_get_version(dev))
    }

    /// Version of the vendor library. Needs no device.
    pub fn library_version(&self) -> Result<String> {
        self.device
            .offline("lib_get_version", |t| t.lib_get_version())
    }

    /// Engage the safety softlock. No-op without a safety module.
    pub fn lock(&self) -> Result<()> {
        match &self.safety {
            Some(safety) => safety.set_soft_lock(true),
            None => {
                debug!(device = self.device.index(), "No safety module, lock ignored");
                Ok(())
            }
        }
    }

    /// Release the safety softlock. No-op without a safety module.
    pub fn unlock(&self) -> Result<()> {
        match &self.safety {
            Some(safety) => safety.set_soft_lock(false),
            None => {
                debug!(device = self.device.index(), "No safety module, unlock ignored");
                Ok(())
            }
        }
    }

    /// Run laser `laser_index` from the oscillator's internal clock.
    ///
    /// The laser index doubles as the sequencer output channel. Arguments
    /// are checked before the first transport call; a transport failure
    /// part way through leaves earlier steps applied.
    pub fn start_laser_simple(
        &self,
        laser_index: usize,
        frequency_mhz: f64,
        intensity_percent: f64,
        delay_ns: Option<f64>,
    ) -> Result<StartReport> {
        let laser = self.laser(laser_index)?;
        let slm = laser.as_simple().ok_or(SepiaError::Unsupported {
            module: laser.descriptor().module_type.to_string(),
            operation: "start_laser_simple",
        })?;
        intensity_fine_steps(intensity_percent)?;

        if let Some(osc) = &self.oscillator {
            validate_channel(laser_index)?;
            if !frequency_mhz.is_finite() || frequency_mhz <= 0.0 {
                return Err(SepiaError::invalid_argument(format!(
                    "frequency {frequency_mhz} MHz must be positive"
                )));
            }
            if let Some(delay) = delay_ns {
                if osc.family() == OscillatorFamily::Som {
                    return Err(SepiaError::Unsupported {
                        module: osc.family().to_string(),
                        operation: "set_delay",
                    });
                }
                if !delay.is_finite() || delay < 0.0 {
                    return Err(SepiaError::invalid_argument(format!(
                        "delay {delay} ns must be finite and non-negative"
                    )));
                }
            }
        } else if delay_ns.is_some() {
            warn!(laser_index, "No oscillator, requested delay ignored");
        }

        self.unlock()?;

        let mut report = StartReport {
            actual_frequency: None,
            applied_delay: None,
        };
        if let Some(osc) = &self.oscillator {
            report.actual_frequency = Some(osc.set_clock_internal(frequency_mhz)?);
            osc.set_burst_array(SINGLE_PULSE_BURST)?;
            osc.set_output(
                &Channels::single(laser_index)?,
                Some(&Channels::single(SYNC_CHANNEL)?),
                Some(false),
            )?;
            if let Some(delay) = delay_ns {
                report.applied_delay = Some(osc.set_delay(laser_index, delay, 0)?);
            }
            slm.set_pulse_parameters(EXTERNAL_FALLING_EDGE, true)?;
        }
        slm.set_intensity(intensity_percent)?;

        info!(
            laser_index,
            slot_id = slm.descriptor().slot_id,
            requested_mhz = frequency_mhz,
            actual_mhz = report.actual_frequency.map(|c| c.actual_mhz),
            intensity_percent,
            "Laser started"
        );
        Ok(report)
    }

    /// Disable every sequencer output. No-op without an oscillator.
    pub fn stop_lasers(&self) -> Result<()> {
        match &self.oscillator {
            Some(osc) => {
                osc.set_output(&Channels::none(), None, None)?;
                info!(device = self.device.index(), "Lasers stopped");
                Ok(())
            }
            None => {
                debug!(device = self.device.index(), "No oscillator, stop ignored");
                Ok(())
            }
        }
    }

    /// Read the state of every controller.
    pub fn status(&self) -> Result<ChassisStatus> {
        let safety = self
            .safety
            .as_ref()
            .map(SafetyController::get_current_status)
            .transpose()?;
        let oscillator = self
            .oscillator
            .as_ref()
            .map(OscillatorController::get_current_status)
            .transpose()?;
        let lasers = self
            .lasers
            .iter()
            .map(LaserController::get_current_status)
            .collect::<Result<Vec<_>>>()?;

        Ok(ChassisStatus {
            device_index: self.device.index(),
            product_model: self.identity.product_model.clone(),
            serial_number: self.identity.serial_number.clone(),
            firmware_version: self.firmware_version()?,
            library_version: self.library_version()?,
            modules: self.map.iter().cloned().collect(),
            safety,
            oscillator,
            lasers,
        })
    }

    /// Release the device and leave the lasers in their current state.
    ///
    /// Both release steps are attempted; the first failure is returned.
    pub fn close(mut self) -> Result<()> {
        self.teardown = Teardown::Released;
        let freed = ModuleMap::release(&self.device);
        let closed = self.device.close();
        info!(device = self.device.index(), "Chassis closed, lasers left running");
        freed.and(closed)
    }
}

impl Drop for Chassis {
    fn drop(&mut self) {
        if self.teardown == Teardown::Released {
            return;
        }
        self.teardown = Teardown::Released;

        match self.device.is_open() {
            Ok(true) => {}
            Ok(false) => {
                debug!(device = self.device.index(), "Device already closed");
                return;
            }
            Err(e) => {
                warn!(device = self.device.index(), error = %e, "Could not query device state, releasing anyway");
            }
        }

        if let Some(safety) = &self.safety {
            if let Err(e) = safety.set_soft_lock(true) {
                warn!(device = self.device.index(), error = %e, "Failed to engage softlock during teardown");
            }
        }
        if let Err(e) = ModuleMap::release(&self.device) {
            warn!(device = self.device.index(), error = %e, "Failed to free module map during teardown");
        }
        if let Err(e) = self.device.close() {
            warn!(device = self.device.index(), error = %e, "Failed to close device during teardown");
        }
        debug!(device = self.device.index(), "Chassis locked and released");
    }
}

/// Probe device indices 0..=7 and list those that answer.
///
/// Each device is opened non-exclusively, read and closed again; busy or
/// absent devices are skipped.
pub fn list_devices(transport: &dyn Transport) -> Vec<DeviceListing> {
    (0..=MAX_DEVICE_INDEX)
        .filter_map(|index| match transport.usb_open_get_ser_num_and_close(index) {
            Ok(identity) => Some(DeviceListing {
                index,
                product_model: identity.product_model,
                serial_number: identity.serial_number,
            }),
            Err(code) => {
                debug!(index, code = code.0, busy = code.is_busy(), "No usable device");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::sim::{SimDevice, SimulatedTransport};
    use crate::transport::StatusCode;

    fn open_standard() -> (Arc<SimulatedTransport>, Chassis) {
        let sim = Arc::new(SimulatedTransport::with_device(0, SimDevice::standard()));
        let chassis = Chassis::open_index(sim.clone(), 0).unwrap();
        (sim, chassis)
    }

    #[test]
    #[traced_test]
    fn test_teardown_failure_is_logged() {
        let (sim, chassis) = open_standard();
        sim.fail_on("scm_set_laser_soft_lock", StatusCode(-1203));
        drop(chassis);
        assert!(logs_contain("Failed to engage softlock during teardown"));
        assert!(!sim.is_open(0));
    }

    #[test]
    #[traced_test]
    fn test_duplicate_oscillator_is_logged() {
        let device = SimDevice::new("5")
            .with_module(crate::sim::SimModule::somd(200))
            .with_module(crate::sim::SimModule::somd(201));
        let sim = Arc::new(SimulatedTransport::with_device(0, device));
        let chassis = Chassis::open_index(sim, 0).unwrap();
        assert_eq!(chassis.oscillator().map(|o| o.descriptor().slot_id), Some(201));
        assert!(logs_contain("More than one oscillator"));
    }

    #[test]
    #[traced_test]
    fn test_failed_open_is_logged() {
        let sim = Arc::new(SimulatedTransport::with_device(0, SimDevice::standard()));
        sim.fail_on("fwr_get_module_map", StatusCode(-1201));
        assert!(Chassis::open_index(sim.clone(), 0).is_err());
        assert!(logs_contain("Chassis open failed"));
        assert!(!sim.is_open(0));
    }

    #[test]
    fn test_laser_lookup() {
        let (_sim, chassis) = open_standard();
        assert!(chassis.laser(2).is_ok());
        assert_eq!(
            chassis.laser(3).unwrap_err(),
            SepiaError::NoSuchLaser { index: 3, count: 3 }
        );
    }
}
