//! Simple laser driver controller (SLM 828).

use serde::Serialize;
use tracing::debug;

use crate::controller::{intensity_fine_steps, intensity_percent};
use crate::device::DeviceHandle;
use crate::error::Result;
use crate::module_map::ModuleDescriptor;

/// SLM trigger code for the falling edge of the external trigger input,
/// which is where the oscillator's sequencer outputs arrive.
pub const EXTERNAL_FALLING_EDGE: i32 = 7;

/// Snapshot of an SLM driver.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimpleLaserStatus {
    /// Slot of the laser module.
    pub slot_id: i32,
    /// Frequency / trigger mode code.
    pub trigger_mode: i32,
    /// Trigger mode as decoded by the library.
    pub trigger_mode_name: String,
    /// Pulsed (true) or continuous (false).
    pub pulsed: bool,
    /// Laser head type code.
    pub head_type: i32,
    /// Laser head type as decoded by the library.
    pub head_type_name: String,
    /// Intensity in percent.
    pub intensity_percent: f64,
}

/// Controller for an SLM module.
#[derive(Debug)]
pub struct SimpleLaserController {
    device: DeviceHandle,
    descriptor: ModuleDescriptor,
}

impl SimpleLaserController {
    pub(crate) fn new(device: DeviceHandle, descriptor: ModuleDescriptor) -> Self {
        Self { device, descriptor }
    }

    /// Slot and type of the module.
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// Set intensity in percent of the head control voltage.
    pub fn set_intensity(&self, percent: f64) -> Result<()> {
        let fine = intensity_fine_steps(percent)?;
        let slot = self.descriptor.slot_id;
        debug!(slot_id = slot, percent, fine, "Setting SLM intensity");
        self.device.call("slm_set_intensity_fine_step", |t, dev| {
            t.slm_set_intensity_fine_step(dev, slot, fine)
        })
    }

    /// Select the trigger source and pulsed / continuous operation.
    pub fn set_pulse_parameters(&self, trigger_mode: i32, pulsed: bool) -> Result<()> {
        let slot = self.descriptor.slot_id;
        self.device.call("slm_set_pulse_parameters", |t, dev| {
            t.slm_set_pulse_parameters(dev, slot, trigger_mode, pulsed)
        })
    }

    /// Read trigger mode, head type and intensity.
    pub fn get_current_status(&self) -> Result<SimpleLaserStatus> {
        let slot = self.descriptor.slot_id;
        let params = self.device.call("slm_get_pulse_parameters", |t, dev| {
            t.slm_get_pulse_parameters(dev, slot)
        })?;
        let intensity = self.device.call("slm_get_intensity_fine_step", |t, dev| {
            t.slm_get_intensity_fine_step(dev, slot)
        })?;
        let trigger_mode_name = self.device.offline("slm_decode_freq_trig_mode", |t| {
            t.slm_decode_freq_trig_mode(params.freq_trig_mode)
        })?;
        let head_type_name = self.device.offline("slm_decode_head_type", |t| {
            t.slm_decode_head_type(params.head_type)
        })?;

        Ok(SimpleLaserStatus {
            slot_id: slot,
            trigger_mode: params.freq_trig_mode,
            trigger_mode_name,
            pulsed: params.pulse_mode,
            head_type: params.head_type,
            head_type_name,
            intensity_percent: intensity_percent(intensity),
        })
    }
}
