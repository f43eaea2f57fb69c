//! Safety interlock controller (SCM 828).

use serde::Serialize;
use tracing::info;

use crate::device::DeviceHandle;
use crate::error::Result;
use crate::module_map::ModuleDescriptor;

/// Interlock and LED state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SafetyStatus {
    /// Softlock engaged.
    pub soft_locked: bool,
    /// Effective lock of the laser power line: hardlock, softlock or failure.
    pub laser_locked: bool,
    /// Power LED lit.
    pub power_led: bool,
    /// Laser active LED lit.
    pub laser_active_led: bool,
}

/// Controller for the SCM module.
#[derive(Debug)]
pub struct SafetyController {
    device: DeviceHandle,
    descriptor: ModuleDescriptor,
}

impl SafetyController {
    pub(crate) fn new(device: DeviceHandle, descriptor: ModuleDescriptor) -> Self {
        Self { device, descriptor }
    }

    /// Slot and type of the module.
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// Engage or release the software interlock.
    pub fn set_soft_lock(&self, locked: bool) -> Result<()> {
        let slot = self.descriptor.slot_id;
        self.device.call("scm_set_laser_soft_lock", |t, dev| {
            t.scm_set_laser_soft_lock(dev, slot, locked)
        })?;
        info!(slot_id = slot, locked, "Laser softlock changed");
        Ok(())
    }

    /// Softlock state.
    pub fn soft_locked(&self) -> Result<bool> {
        let slot = self.descriptor.slot_id;
        self.device.call("scm_get_laser_soft_lock", |t, dev| {
            t.scm_get_laser_soft_lock(dev, slot)
        })
    }

    /// Whether the power line is locked for any reason.
    pub fn laser_locked(&self) -> Result<bool> {
        let slot = self.descriptor.slot_id;
        self.device.call("scm_get_laser_locked", |t, dev| {
            t.scm_get_laser_locked(dev, slot)
        })
    }

    /// Read locks and LEDs.
    pub fn get_current_status(&self) -> Result<SafetyStatus> {
        let slot = self.descriptor.slot_id;
        let (power_led, laser_active_led) = self
            .device
            .call("scm_get_power_and_laser_leds", |t, dev| {
                t.scm_get_power_and_laser_leds(dev, slot)
            })?;
        Ok(SafetyStatus {
            soft_locked: self.soft_locked()?,
            laser_locked: self.laser_locked()?,
            power_led,
            laser_active_led,
        })
    }
}
