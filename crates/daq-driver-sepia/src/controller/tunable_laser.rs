//! Prima multi-wavelength laser controller.
//!
//! A Prima has several wavelengths selected by index, each with its own
//! intensity. Pulsed operation modes need a repetition frequency; the
//! continuous modes ignore frequency and trigger source.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::controller::{intensity_fine_steps, intensity_percent};
use crate::device::DeviceHandle;
use crate::error::{Result, SepiaError};
use crate::module_map::ModuleDescriptor;
use crate::transport::{
    Limits, PriGatingData, PriGatingLimits, PriTriggerLevelLimits, Transport, TransportResult,
};

/// Prima operation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OperationMode {
    /// Laser off.
    Off = 0,
    /// Pulsed, narrow pulses.
    NarrowPulse = 1,
    /// Pulsed, broad pulses.
    BroadPulse = 2,
    /// Continuous wave.
    Cw = 3,
}

impl OperationMode {
    /// Hardware code of the mode.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Mode for a hardware code, `None` for unknown codes.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Off),
            1 => Some(Self::NarrowPulse),
            2 => Some(Self::BroadPulse),
            3 => Some(Self::Cw),
            _ => None,
        }
    }

    /// Pulsed modes need a repetition frequency.
    pub fn is_pulsed(self) -> bool {
        matches!(self, Self::NarrowPulse | Self::BroadPulse)
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::NarrowPulse => write!(f, "narrow pulse"),
            Self::BroadPulse => write!(f, "broad pulse"),
            Self::Cw => write!(f, "CW"),
        }
    }
}

/// Identification and wavelength table of a Prima.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunableDeviceInfo {
    /// Device identifier.
    pub device_id: String,
    /// Device type string.
    pub device_type: String,
    /// Firmware version of the laser head.
    pub fw_version: String,
    /// Wavelength in nm per wavelength index.
    pub wavelengths_nm: Vec<i32>,
}

/// Snapshot of a Prima.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TunableLaserStatus {
    /// Slot of the laser module.
    pub slot_id: i32,
    /// Operation mode code.
    pub operation_mode: i32,
    /// Operation mode as decoded by the module.
    pub operation_mode_name: String,
    /// Trigger source code.
    pub trigger_source: i32,
    /// Trigger source as decoded by the module.
    pub trigger_source_name: String,
    /// Whether the trigger source uses the frequency setting.
    pub frequency_enabled: bool,
    /// Whether the trigger source uses the trigger level.
    pub trigger_level_enabled: bool,
    /// External trigger level in mV.
    pub trigger_level_mv: i32,
    /// Allowed trigger level range and step.
    pub trigger_level_limits: PriTriggerLevelLimits,
    /// Repetition frequency in Hz.
    pub frequency_hz: i32,
    /// Allowed repetition frequency range in Hz.
    pub frequency_limits: Limits,
    /// Selected wavelength index.
    pub wavelength_idx: i32,
    /// Selected wavelength in nm.
    pub wavelength_nm: i32,
    /// Intensity of the selected wavelength in percent.
    pub intensity_percent: f64,
    /// Gating on/off times.
    pub gating: PriGatingData,
    /// Allowed gating ranges.
    pub gating_limits: PriGatingLimits,
    /// Whether gating is active.
    pub gating_enabled: bool,
    /// Gate input termination is high impedance.
    pub gate_high_impedance: bool,
}

/// Controller for a Prima module.
#[derive(Debug)]
pub struct TunableLaserController {
    device: DeviceHandle,
    descriptor: ModuleDescriptor,
}

impl TunableLaserController {
    pub(crate) fn new(device: DeviceHandle, descriptor: ModuleDescriptor) -> Self {
        Self { device, descriptor }
    }

    /// Slot and type of the module.
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn call<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&dyn Transport, i32, i32) -> TransportResult<T>,
    ) -> Result<T> {
        let slot = self.descriptor.slot_id;
        self.device.call(operation, |t, dev| f(t, dev, slot))
    }

    /// Currently selected wavelength index.
    pub fn wavelength_index(&self) -> Result<i32> {
        self.call("pri_get_wavelength_idx", |t, dev, slot| {
            t.pri_get_wavelength_idx(dev, slot)
        })
    }

    /// Set intensity in percent for the current wavelength.
    pub fn set_intensity(&self, percent: f64) -> Result<()> {
        let fine = intensity_fine_steps(percent)?;
        let wl_idx = self.wavelength_index()?;
        debug!(slot_id = self.descriptor.slot_id, wl_idx, percent, "Setting Prima intensity");
        self.call("pri_set_intensity", |t, dev, slot| {
            t.pri_set_intensity(dev, slot, wl_idx, fine)
        })
    }

    /// Set operation mode, and for pulsed modes frequency and trigger source.
    ///
    /// Fails with [`SepiaError::MissingFrequency`] before touching the
    /// hardware if a pulsed mode is requested without a frequency, and with
    /// [`SepiaError::OutOfRange`] if the frequency is outside the limits the
    /// module reports. Nothing is written in either case.
    pub fn set_laser_parameters(
        &self,
        mode: OperationMode,
        trigger_source: i32,
        frequency_hz: Option<i32>,
    ) -> Result<()> {
        let frequency = match (mode.is_pulsed(), frequency_hz) {
            (true, None) => {
                return Err(SepiaError::MissingFrequency {
                    mode: mode.to_string(),
                })
            }
            (true, Some(f)) => Some(f),
            (false, _) => None,
        };
        if let Some(frequency_hz) = frequency {
            let limits = self.call("pri_get_frequency_limits", |t, dev, slot| {
                t.pri_get_frequency_limits(dev, slot)
            })?;
            check_range("frequency", frequency_hz, limits)?;
        }

        self.call("pri_set_operation_mode", |t, dev, slot| {
            t.pri_set_operation_mode(dev, slot, mode.code())
        })?;
        if let Some(frequency_hz) = frequency {
            self.call("pri_set_frequency", |t, dev, slot| {
                t.pri_set_frequency(dev, slot, frequency_hz)
            })?;
            self.call("pri_set_trigger_source", |t, dev, slot| {
                t.pri_set_trigger_source(dev, slot, trigger_source)
            })?;
        }
        info!(
            slot_id = self.descriptor.slot_id,
            %mode,
            trigger_source,
            ?frequency,
            "Prima parameters set"
        );
        Ok(())
    }

    /// Select a wavelength by index.
    pub fn set_wavelength_index(&self, wl_idx: i32) -> Result<()> {
        let info = self.call("pri_get_device_info", |t, dev, slot| {
            t.pri_get_device_info(dev, slot)
        })?;
        check_range(
            "wavelength index",
            wl_idx,
            Limits {
                min: 0,
                max: info.wavelength_count - 1,
            },
        )?;
        self.call("pri_set_wavelength_idx", |t, dev, slot| {
            t.pri_set_wavelength_idx(dev, slot, wl_idx)
        })
    }

    /// Configure gating. On time in ns, off time as a multiple of it.
    pub fn set_gating(&self, on_time: i32, off_time_factor: i32, enabled: bool) -> Result<()> {
        let limits = self.call("pri_get_gating_limits", |t, dev, slot| {
            t.pri_get_gating_limits(dev, slot)
        })?;
        check_range("gating on time", on_time, limits.on_time)?;
        check_range("gating off time factor", off_time_factor, limits.off_time_factor)?;

        let data = PriGatingData {
            on_time,
            off_time_factor,
        };
        self.call("pri_set_gating_data", |t, dev, slot| {
            t.pri_set_gating_data(dev, slot, data)
        })?;
        self.call("pri_set_gating_enabled", |t, dev, slot| {
            t.pri_set_gating_enabled(dev, slot, enabled)
        })
    }

    /// Set the external trigger level in mV.
    pub fn set_trigger_level(&self, level_mv: i32) -> Result<()> {
        let limits = self.call("pri_get_trigger_level_limits", |t, dev, slot| {
            t.pri_get_trigger_level_limits(dev, slot)
        })?;
        check_range(
            "trigger level",
            level_mv,
            Limits {
                min: limits.min_mv,
                max: limits.max_mv,
            },
        )?;
        self.call("pri_set_trigger_level", |t, dev, slot| {
            t.pri_set_trigger_level(dev, slot, level_mv)
        })
    }

    /// Select high impedance termination for the gate input.
    pub fn set_gate_high_impedance(&self, high: bool) -> Result<()> {
        self.call("pri_set_gate_high_impedance", |t, dev, slot| {
            t.pri_set_gate_high_impedance(dev, slot, high)
        })
    }

    /// Identification plus the decoded wavelength table.
    pub fn device_info(&self) -> Result<TunableDeviceInfo> {
        let info = self.call("pri_get_device_info", |t, dev, slot| {
            t.pri_get_device_info(dev, slot)
        })?;
        let wavelengths_nm = (0..info.wavelength_count.max(0))
            .map(|wl_idx| {
                self.call("pri_decode_wavelength", |t, dev, slot| {
                    t.pri_decode_wavelength(dev, slot, wl_idx)
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(TunableDeviceInfo {
            device_id: info.device_id,
            device_type: info.device_type,
            fw_version: info.fw_version,
            wavelengths_nm,
        })
    }

    /// Read every parameter and limit of the module.
    pub fn get_current_status(&self) -> Result<TunableLaserStatus> {
        let operation_mode = self.call("pri_get_operation_mode", |t, dev, slot| {
            t.pri_get_operation_mode(dev, slot)
        })?;
        let operation_mode_name = self.call("pri_decode_operation_mode", |t, dev, slot| {
            t.pri_decode_operation_mode(dev, slot, operation_mode)
        })?;
        let trigger_source = self.call("pri_get_trigger_source", |t, dev, slot| {
            t.pri_get_trigger_source(dev, slot)
        })?;
        let source = self.call("pri_decode_trigger_source", |t, dev, slot| {
            t.pri_decode_trigger_source(dev, slot, trigger_source)
        })?;
        let trigger_level_mv = self.call("pri_get_trigger_level", |t, dev, slot| {
            t.pri_get_trigger_level(dev, slot)
        })?;
        let trigger_level_limits = self.call("pri_get_trigger_level_limits", |t, dev, slot| {
            t.pri_get_trigger_level_limits(dev, slot)
        })?;
        let frequency_hz = self.call("pri_get_frequency", |t, dev, slot| {
            t.pri_get_frequency(dev, slot)
        })?;
        let frequency_limits = self.call("pri_get_frequency_limits", |t, dev, slot| {
            t.pri_get_frequency_limits(dev, slot)
        })?;
        let wavelength_idx = self.wavelength_index()?;
        let wavelength_nm = self.call("pri_decode_wavelength", |t, dev, slot| {
            t.pri_decode_wavelength(dev, slot, wavelength_idx)
        })?;
        let intensity = self.call("pri_get_intensity", |t, dev, slot| {
            t.pri_get_intensity(dev, slot, wavelength_idx)
        })?;
        let gating = self.call("pri_get_gating_data", |t, dev, slot| {
            t.pri_get_gating_data(dev, slot)
        })?;
        let gating_limits = self.call("pri_get_gating_limits", |t, dev, slot| {
            t.pri_get_gating_limits(dev, slot)
        })?;
        let gating_enabled = self.call("pri_get_gating_enabled", |t, dev, slot| {
            t.pri_get_gating_enabled(dev, slot)
        })?;
        let gate_high_impedance = self.call("pri_get_gate_high_impedance", |t, dev, slot| {
            t.pri_get_gate_high_impedance(dev, slot)
        })?;

        Ok(TunableLaserStatus {
            slot_id: self.descriptor.slot_id,
            operation_mode,
            operation_mode_name,
            trigger_source,
            trigger_source_name: source.name,
            frequency_enabled: source.frequency_enabled,
            trigger_level_enabled: source.trigger_level_enabled,
            trigger_level_mv,
            trigger_level_limits,
            frequency_hz,
            frequency_limits,
            wavelength_idx,
            wavelength_nm,
            intensity_percent: intensity_percent(intensity),
            gating,
            gating_limits,
            gating_enabled,
            gate_high_impedance,
        })
    }
}

fn check_range(parameter: &'static str, value: i32, limits: Limits) -> Result<()> {
    if limits.contains(value) {
        Ok(())
    } else {
        Err(SepiaError::OutOfRange {
            parameter,
            value: i64::from(value),
            min: i64::from(limits.min),
            max: i64::from(limits.max),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_mode_codes() {
        for code in 0..4 {
            assert_eq!(OperationMode::from_code(code).map(OperationMode::code), Some(code));
        }
        assert!(OperationMode::NarrowPulse.is_pulsed());
        assert!(OperationMode::BroadPulse.is_pulsed());
        assert!(!OperationMode::Cw.is_pulsed());
        assert!(!OperationMode::Off.is_pulsed());
    }

    #[test]
    fn test_check_range() {
        let limits = Limits { min: -5, max: 5 };
        assert!(check_range("level", 5, limits).is_ok());
        assert_eq!(
            check_range("level", 6, limits),
            Err(SepiaError::OutOfRange {
                parameter: "level",
                value: 6,
                min: -5,
                max: 5
            })
        );
    }
}
