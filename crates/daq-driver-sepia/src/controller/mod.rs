//! Per-module-type controllers.
//!
//! Each controller holds a [`DeviceHandle`] and the descriptor of the module
//! it drives. Controllers never cache hardware state: every getter is a round
//! trip, every setter writes immediately.
//!
//! - [`OscillatorController`] - SOM / SOMD oscillator and sequencer
//! - [`SimpleLaserController`] - SLM laser driver
//! - [`TunableLaserController`] - Prima multi-wavelength laser
//! - [`SafetyController`] - SCM safety interlock

pub mod oscillator;
pub mod safety;
pub mod simple_laser;
pub mod tunable_laser;

use std::fmt;

use serde::{Serialize, Serializer};

use crate::device::DeviceHandle;
use crate::error::{Result, SepiaError};
use crate::module_map::{ModuleDescriptor, ModuleType};

pub use oscillator::{
    AuxInMode, ChannelSummary, ClockSetting, Delay, DelayUnits, OscillatorController,
    OscillatorStatus, SeqOutput,
};
pub use safety::{SafetyController, SafetyStatus};
pub use simple_laser::{SimpleLaserController, SimpleLaserStatus};
pub use tunable_laser::{
    OperationMode, TunableDeviceInfo, TunableLaserController, TunableLaserStatus,
};

/// Number of sequencer output channels.
pub const CHANNEL_COUNT: usize = 8;

/// Set of output channel indices 0..=7.
///
/// Stored with channel `n` at bit `n`. The hardware byte is bit-reversed:
/// channel 0 is the most significant bit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Channels(u8);

impl Channels {
    /// Empty set.
    pub fn none() -> Self {
        Self(0)
    }

    /// Set containing only `channel`.
    pub fn single(channel: usize) -> Result<Self> {
        let mut set = Self::none();
        set.insert(channel)?;
        Ok(set)
    }

    /// Set containing every channel in `channels`.
    pub fn from_slice(channels: &[usize]) -> Result<Self> {
        let mut set = Self::none();
        for &channel in channels {
            set.insert(channel)?;
        }
        Ok(set)
    }

    /// Add `channel`, rejecting indices above 7.
    pub fn insert(&mut self, channel: usize) -> Result<()> {
        validate_channel(channel)?;
        self.0 |= 1 << channel;
        Ok(())
    }

    /// Whether `channel` is in the set.
    pub fn contains(&self, channel: usize) -> bool {
        channel < CHANNEL_COUNT && self.0 & (1 << channel) != 0
    }

    /// True if no channel is set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of channels in the set.
    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Channels in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..CHANNEL_COUNT).filter(move |&c| self.contains(c))
    }

    /// Channels in ascending order.
    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }

    /// Encode for the hardware: channel 0 -> 0x80, channel 7 -> 0x01.
    pub fn to_hardware_mask(self) -> u8 {
        self.0.reverse_bits()
    }

    /// Inverse of [`Channels::to_hardware_mask`].
    pub fn from_hardware_mask(mask: u8) -> Self {
        Self(mask.reverse_bits())
    }
}

impl fmt::Debug for Channels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for Channels {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

pub(crate) fn validate_channel(channel: usize) -> Result<()> {
    if channel < CHANNEL_COUNT {
        Ok(())
    } else {
        Err(SepiaError::InvalidChannel { channel })
    }
}

/// Convert a percentage to per-mille fine steps.
pub(crate) fn intensity_fine_steps(percent: f64) -> Result<u16> {
    if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
        return Err(SepiaError::invalid_argument(format!(
            "intensity {percent} % outside 0..=100"
        )));
    }
    // Bounded to 0..=1000 by the check above.
    Ok((percent * 10.0).round() as u16)
}

pub(crate) fn intensity_percent(fine_steps: u16) -> f64 {
    f64::from(fine_steps) / 10.0
}

/// Controller for one discovered module.
#[derive(Debug)]
pub enum ModuleController {
    /// SOM or SOMD.
    Oscillator(OscillatorController),
    /// SCM.
    Safety(SafetyController),
    /// SLM driver.
    SimpleLaser(SimpleLaserController),
    /// Prima.
    TunableLaser(TunableLaserController),
    /// Module with no controller; kept for reporting.
    Unhandled(ModuleDescriptor),
}

impl ModuleController {
    /// Build the controller matching the descriptor's module type.
    pub fn from_descriptor(device: &DeviceHandle, descriptor: &ModuleDescriptor) -> Self {
        match &descriptor.module_type {
            ModuleType::OscillatorSom | ModuleType::OscillatorSomd => {
                match OscillatorController::new(device.clone(), descriptor.clone()) {
                    Some(osc) => Self::Oscillator(osc),
                    None => Self::Unhandled(descriptor.clone()),
                }
            }
            ModuleType::Safety => {
                Self::Safety(SafetyController::new(device.clone(), descriptor.clone()))
            }
            ModuleType::SimpleLaser => {
                Self::SimpleLaser(SimpleLaserController::new(device.clone(), descriptor.clone()))
            }
            ModuleType::TunableLaser => Self::TunableLaser(TunableLaserController::new(
                device.clone(),
                descriptor.clone(),
            )),
            ModuleType::Unrecognized(_) => Self::Unhandled(descriptor.clone()),
        }
    }

    /// Slot and type of the module.
    pub fn descriptor(&self) -> &ModuleDescriptor {
        match self {
            Self::Oscillator(c) => c.descriptor(),
            Self::Safety(c) => c.descriptor(),
            Self::SimpleLaser(c) => c.descriptor(),
            Self::TunableLaser(c) => c.descriptor(),
            Self::Unhandled(d) => d,
        }
    }
}

/// Status of one laser, by kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaserStatus {
    /// SLM status.
    Simple(SimpleLaserStatus),
    /// Prima status.
    Tunable(TunableLaserStatus),
}

/// Any laser controller.
#[derive(Debug)]
pub enum LaserController {
    /// SLM driver.
    Simple(SimpleLaserController),
    /// Prima laser.
    Tunable(TunableLaserController),
}

impl LaserController {
    /// Slot and type of the module.
    pub fn descriptor(&self) -> &ModuleDescriptor {
        match self {
            Self::Simple(c) => c.descriptor(),
            Self::Tunable(c) => c.descriptor(),
        }
    }

    /// Slot id of the laser module.
    pub fn slot_id(&self) -> i32 {
        self.descriptor().slot_id
    }

    /// Set intensity in percent (0..=100).
    pub fn set_intensity(&self, percent: f64) -> Result<()> {
        match self {
            Self::Simple(c) => c.set_intensity(percent),
            Self::Tunable(c) => c.set_intensity(percent),
        }
    }

    /// Read the laser status.
    pub fn get_current_status(&self) -> Result<LaserStatus> {
        match self {
            Self::Simple(c) => c.get_current_status().map(LaserStatus::Simple),
            Self::Tunable(c) => c.get_current_status().map(LaserStatus::Tunable),
        }
    }

    /// The SLM controller, if this is one.
    pub fn as_simple(&self) -> Option<&SimpleLaserController> {
        match self {
            Self::Simple(c) => Some(c),
            Self::Tunable(_) => None,
        }
    }

    /// The Prima controller, if this is one.
    pub fn as_tunable(&self) -> Option<&TunableLaserController> {
        match self {
            Self::Tunable(c) => Some(c),
            Self::Simple(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;

    #[test]
    fn test_hardware_mask_bit_order() {
        assert_eq!(Channels::single(0).unwrap().to_hardware_mask(), 0x80);
        assert_eq!(Channels::single(7).unwrap().to_hardware_mask(), 0x01);
        assert_eq!(
            Channels::from_slice(&[0, 3]).unwrap().to_hardware_mask(),
            0b1001_0000
        );
        assert_eq!(Channels::from_hardware_mask(0x40).to_vec(), vec![1]);
    }

    #[test]
    fn test_hardware_mask_round_trip_all_bytes() {
        for mask in 0..=u8::MAX {
            assert_eq!(Channels::from_hardware_mask(mask).to_hardware_mask(), mask);
        }
    }

    #[test]
    fn test_invalid_channel() {
        let err = Channels::from_slice(&[1, 8]).unwrap_err();
        assert_eq!(err, SepiaError::InvalidChannel { channel: 8 });
        assert_eq!(err.class(), ErrorClass::CallerContract);
        assert!(!Channels::none().contains(9));
    }

    #[test]
    fn test_intensity_scaling() {
        assert_eq!(intensity_fine_steps(0.0).unwrap(), 0);
        assert_eq!(intensity_fine_steps(42.37).unwrap(), 424);
        assert_eq!(intensity_fine_steps(100.0).unwrap(), 1000);
        assert!(intensity_fine_steps(100.1).is_err());
        assert!(intensity_fine_steps(-0.5).is_err());
        assert!(intensity_fine_steps(f64::NAN).is_err());
        assert!((intensity_percent(424) - 42.4).abs() < 1e-9);
    }

    #[test]
    fn test_channels_serialize_as_list() {
        let json = serde_json::to_string(&Channels::from_slice(&[2, 5]).unwrap()).unwrap();
        assert_eq!(json, "[2,5]");
    }
}
