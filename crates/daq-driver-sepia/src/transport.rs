//! Transport boundary to the Sepia2 device library.
//!
//! The vendor library is a flat set of C functions, each addressed by a USB
//! device index and (for module functions) a slot id, each returning an
//! integer status code. [`Transport`] mirrors that surface one method per
//! library function, with the out-parameters folded into the `Ok` value and a
//! nonzero status returned as `Err(StatusCode)`.
//!
//! Nothing in this module interprets status codes or sequences calls; that
//! is the job of [`crate::device::DeviceHandle`] and the controllers.
//!
//! Implementations must be synchronous and blocking. The crate ships
//! [`crate::sim::SimulatedTransport`] for tests; a hardware binding is supplied
//! by the host application.

use std::fmt;

use serde::Serialize;

/// Raw status code returned by every library function.
///
/// Zero means success and is never carried in an `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StatusCode(pub i32);

impl StatusCode {
    /// USB device is opened by another process.
    pub const DEVICE_BUSY: StatusCode = StatusCode(-9004);
    /// USB device is blocked by the driver.
    pub const DEVICE_BLOCKED: StatusCode = StatusCode(-9005);
    /// Returned by the error decoder for codes it does not know.
    pub const UNKNOWN_ERROR_CODE: StatusCode = StatusCode(-9999);

    /// Raw integer value.
    pub fn code(self) -> i32 {
        self.0
    }

    /// True for the busy / blocked codes the USB group reports.
    pub fn is_busy(self) -> bool {
        self == Self::DEVICE_BUSY || self == Self::DEVICE_BLOCKED
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a single transport round trip.
pub type TransportResult<T> = std::result::Result<T, StatusCode>;

/// Oscillator module family.
///
/// The SOM 828 and SOM 828-D expose the same functions under different
/// prefixes; a few differ in integer width or are SOMD-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OscillatorFamily {
    /// SOM 828 (8-bit divider).
    Som,
    /// SOM 828-D (16-bit divider, sequencer delays, resynchronization).
    Somd,
}

impl OscillatorFamily {
    /// Largest divider the family's burst-values register accepts.
    pub fn max_divider(self) -> u16 {
        match self {
            Self::Som => u8::MAX as u16,
            Self::Somd => u16::MAX,
        }
    }
}

impl fmt::Display for OscillatorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Som => write!(f, "SOM"),
            Self::Somd => write!(f, "SOMD"),
        }
    }
}

/// Product model and serial number reported when a USB device is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsbIdentity {
    /// Product model, e.g. "Sepia II".
    pub product_model: String,
    /// Device serial number.
    pub serial_number: String,
}

/// One entry of the firmware module map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawModuleInfo {
    /// Slot id used to address the module.
    pub slot_id: i32,
    /// Primary (not secondary) module in its slot.
    pub is_primary: bool,
    /// The entry describes the backplane.
    pub is_backplane: bool,
    /// Module keeps an uptime counter.
    pub has_uptime_counter: bool,
}

/// Frequency / trigger mode register of an oscillator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreqTrigMode {
    /// Index into the module's list of trigger sources.
    pub mode: i32,
    /// SOMD only: synchronize immediately on change. Always false on SOM.
    pub sync_now: bool,
}

/// Pre-scaler values of an oscillator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BurstValues {
    /// Pre-scaler dividing the trigger source.
    pub divider: u16,
    /// Pre-sync pulse count.
    pub presync: u8,
    /// Sync mask count.
    pub mask_sync: u8,
}

/// Output enable and sync composition bytes, in hardware bit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutSyncEnable {
    /// Enabled outputs.
    pub out_enable: u8,
    /// Outputs contributing to the SYNC signal.
    pub sync_enable: u8,
    /// SYNC polarity inverted.
    pub sync_inverse: bool,
}

/// AUX in/out sequencer control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuxIoControl {
    /// AUX OUT enabled.
    pub aux_out: bool,
    /// AUX IN sequencer control code.
    pub aux_in: u8,
}

/// Delay units of a SOMD, valid for the current clock configuration only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDelayUnits {
    /// Coarse delay step width in seconds.
    pub coarse_step_s: f64,
    /// Number of fine steps currently applicable.
    pub fine_steps_max: u8,
}

/// Sequencer output record as read from a SOMD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeqOutputInfos {
    /// Output runs delayed.
    pub delayed: bool,
    /// Firmware forces the output undelayed.
    pub force_undelayed: bool,
    /// Combination mask, hardware bit order.
    pub out_combi: u8,
    /// Combined bursts are masked.
    pub masked_combi: bool,
    /// Coarse delay in nanoseconds.
    pub delay_coarse_ns: f64,
    /// Fine delay steps.
    pub delay_fine: u8,
}

/// Sequencer output record as written to a SOMD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeqOutputWrite {
    /// Output runs delayed.
    pub delayed: bool,
    /// Combination mask, hardware bit order.
    pub out_combi: u8,
    /// Combined bursts are masked.
    pub masked_combi: bool,
    /// Coarse delay in nanoseconds.
    pub delay_coarse_ns: f64,
    /// Fine delay steps.
    pub delay_fine: u8,
}

/// Pulse parameters of an SLM driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlmPulseParameters {
    /// Frequency / trigger mode code.
    pub freq_trig_mode: i32,
    /// Pulsed (true) or continuous (false).
    pub pulse_mode: bool,
    /// Laser head type code.
    pub head_type: i32,
}

/// Identification block of a Prima module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriDeviceInfo {
    /// Device identifier.
    pub device_id: String,
    /// Device type string.
    pub device_type: String,
    /// Firmware version of the module.
    pub fw_version: String,
    /// Number of selectable wavelengths.
    pub wavelength_count: i32,
}

/// Decoded Prima trigger source entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriTriggerSource {
    /// Source name.
    pub name: String,
    /// The frequency setting applies to this source.
    pub frequency_enabled: bool,
    /// The trigger level setting applies to this source.
    pub trigger_level_enabled: bool,
}

/// Trigger level limits of a Prima module, in millivolts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriTriggerLevelLimits {
    /// Lowest level.
    pub min_mv: i32,
    /// Highest level.
    pub max_mv: i32,
    /// Step width.
    pub resolution_mv: i32,
}

/// Inclusive integer range reported by hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limits {
    /// Lower bound.
    pub min: i32,
    /// Upper bound.
    pub max: i32,
}

impl Limits {
    /// Check whether `value` lies inside the range.
    pub fn contains(&self, value: i32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Gating limits of a Prima module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriGatingLimits {
    /// On time range in nanoseconds.
    pub on_time: Limits,
    /// Off time factor range.
    pub off_time_factor: Limits,
}

/// Gating configuration of a Prima module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriGatingData {
    /// On time in nanoseconds.
    pub on_time: i32,
    /// Off time as a multiple of the on time.
    pub off_time_factor: i32,
}

/// Synchronous call/response access to the Sepia2 library.
///
/// `dev` is the USB device index (0..=7), `slot` the module slot id from the
/// module map. Methods grouped by library prefix; decoders marked *offline*
/// do not need an open device.
pub trait Transport: Send + Sync {
    // ---------------------------------------------------------------- LIB
    /// *Offline.* Human-readable text for a status code.
    fn lib_decode_error(&self, code: StatusCode) -> TransportResult<String>;
    /// *Offline.* Library version string.
    fn lib_get_version(&self) -> TransportResult<String>;

    // ---------------------------------------------------------------- USB
    /// Open the device exclusively and read its identity.
    fn usb_open_device(&self, dev: i32) -> TransportResult<UsbIdentity>;
    /// Non-exclusive open, read identity, close.
    fn usb_open_get_ser_num_and_close(&self, dev: i32) -> TransportResult<UsbIdentity>;
    /// Whether the device is currently open.
    fn usb_is_open_device(&self, dev: i32) -> TransportResult<bool>;
    /// Close the device.
    fn usb_close_device(&self, dev: i32) -> TransportResult<()>;

    // ---------------------------------------------------------------- FWR
    /// Chassis firmware version.
    fn fwr_get_version(&self, dev: i32) -> TransportResult<String>;
    /// Build the library's module map; `restart` reboots the firmware first.
    /// Returns the module count.
    fn fwr_get_module_map(&self, dev: i32, restart: bool) -> TransportResult<i32>;
    /// Module map entry at `map_idx`.
    fn fwr_get_module_info_by_map_idx(&self, dev: i32, map_idx: i32)
        -> TransportResult<RawModuleInfo>;
    /// Release the library's module map.
    fn fwr_free_module_map(&self, dev: i32) -> TransportResult<()>;

    // ---------------------------------------------------------------- COM
    /// Type code of the primary or secondary module in a slot.
    fn com_get_module_type(&self, dev: i32, slot: i32, primary: bool) -> TransportResult<i32>;
    /// *Offline.* Long module type name.
    fn com_decode_module_type(&self, module_type: i32) -> TransportResult<String>;
    /// *Offline.* Abbreviated module type tag, e.g. "SOMD".
    fn com_decode_module_type_abbr(&self, module_type: i32) -> TransportResult<String>;

    // ---------------------------------------------------------------- SCM
    /// Power line state: true if hardlocked, softlocked or failed.
    fn scm_get_laser_locked(&self, dev: i32, slot: i32) -> TransportResult<bool>;
    /// Softlock state.
    fn scm_get_laser_soft_lock(&self, dev: i32, slot: i32) -> TransportResult<bool>;
    /// Engage or release the softlock.
    fn scm_set_laser_soft_lock(&self, dev: i32, slot: i32, locked: bool) -> TransportResult<()>;
    /// Returns (power LED, laser active LED).
    fn scm_get_power_and_laser_leds(&self, dev: i32, slot: i32) -> TransportResult<(bool, bool)>;

    // ------------------------------------------------------------ SOM/SOMD
    /// Trigger source selection.
    fn som_get_freq_trig_mode(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
    ) -> TransportResult<FreqTrigMode>;
    /// Select the trigger source.
    fn som_set_freq_trig_mode(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
        mode: FreqTrigMode,
    ) -> TransportResult<()>;
    /// Online decoder: the list of trigger sources is module specific.
    fn som_decode_freq_trig_mode(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
        mode: i32,
    ) -> TransportResult<String>;
    /// Pre-scaler values.
    fn som_get_burst_values(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
    ) -> TransportResult<BurstValues>;
    /// Write the pre-scaler values.
    fn som_set_burst_values(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
        values: BurstValues,
    ) -> TransportResult<()>;
    /// Burst length per output channel, natural channel order.
    fn som_get_burst_length_array(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
    ) -> TransportResult<[u32; 8]>;
    /// Write the burst length per output channel.
    fn som_set_burst_length_array(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
        lengths: [u32; 8],
    ) -> TransportResult<()>;
    /// Output and sync enable bytes.
    fn som_get_out_n_sync_enable(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
    ) -> TransportResult<OutSyncEnable>;
    /// Write output and sync enable bytes.
    fn som_set_out_n_sync_enable(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
        value: OutSyncEnable,
    ) -> TransportResult<()>;
    /// AUX in/out sequencer control.
    fn som_get_aux_io_sequencer_ctrl(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
    ) -> TransportResult<AuxIoControl>;
    /// Write AUX in/out sequencer control.
    fn som_set_aux_io_sequencer_ctrl(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
        value: AuxIoControl,
    ) -> TransportResult<()>;
    /// *Offline.*
    fn som_decode_aux_in_sequencer_ctrl(
        &self,
        family: OscillatorFamily,
        aux_in: u8,
    ) -> TransportResult<String>;
    /// Delay step widths for the current clock.
    fn somd_get_delay_units(&self, dev: i32, slot: i32) -> TransportResult<RawDelayUnits>;
    /// Sequencer record of output `output`.
    fn somd_get_seq_output_infos(
        &self,
        dev: i32,
        slot: i32,
        output: u8,
    ) -> TransportResult<SeqOutputInfos>;
    /// Write the sequencer record of output `output`.
    fn somd_set_seq_output_infos(
        &self,
        dev: i32,
        slot: i32,
        output: u8,
        record: SeqOutputWrite,
    ) -> TransportResult<()>;
    /// Resynchronize the sequencer immediately.
    fn somd_synchronize_now(&self, dev: i32, slot: i32) -> TransportResult<()>;

    // ---------------------------------------------------------------- SLM
    /// Intensity in per mille of the head control voltage.
    fn slm_get_intensity_fine_step(&self, dev: i32, slot: i32) -> TransportResult<u16>;
    /// Write the intensity in per mille.
    fn slm_set_intensity_fine_step(&self, dev: i32, slot: i32, intensity: u16)
        -> TransportResult<()>;
    /// Trigger mode, pulse mode and head type.
    fn slm_get_pulse_parameters(&self, dev: i32, slot: i32) -> TransportResult<SlmPulseParameters>;
    /// Write trigger mode and pulse mode.
    fn slm_set_pulse_parameters(
        &self,
        dev: i32,
        slot: i32,
        freq_trig_mode: i32,
        pulse_mode: bool,
    ) -> TransportResult<()>;
    /// *Offline.* Same list for every SLM.
    fn slm_decode_freq_trig_mode(&self, freq_trig_mode: i32) -> TransportResult<String>;
    /// *Offline.*
    fn slm_decode_head_type(&self, head_type: i32) -> TransportResult<String>;

    // ---------------------------------------------------------------- PRI
    /// Identification block.
    fn pri_get_device_info(&self, dev: i32, slot: i32) -> TransportResult<PriDeviceInfo>;
    /// Operation mode code.
    fn pri_get_operation_mode(&self, dev: i32, slot: i32) -> TransportResult<i32>;
    /// Write the operation mode code.
    fn pri_set_operation_mode(&self, dev: i32, slot: i32, mode: i32) -> TransportResult<()>;
    /// Online decoder for an operation mode code.
    fn pri_decode_operation_mode(&self, dev: i32, slot: i32, mode: i32)
        -> TransportResult<String>;
    /// Trigger source code.
    fn pri_get_trigger_source(&self, dev: i32, slot: i32) -> TransportResult<i32>;
    /// Write the trigger source code.
    fn pri_set_trigger_source(&self, dev: i32, slot: i32, source: i32) -> TransportResult<()>;
    /// Online decoder for a trigger source code.
    fn pri_decode_trigger_source(
        &self,
        dev: i32,
        slot: i32,
        source: i32,
    ) -> TransportResult<PriTriggerSource>;
    /// Trigger level range and step in mV.
    fn pri_get_trigger_level_limits(
        &self,
        dev: i32,
        slot: i32,
    ) -> TransportResult<PriTriggerLevelLimits>;
    /// Trigger level in mV.
    fn pri_get_trigger_level(&self, dev: i32, slot: i32) -> TransportResult<i32>;
    /// Write the trigger level in mV.
    fn pri_set_trigger_level(&self, dev: i32, slot: i32, level_mv: i32) -> TransportResult<()>;
    /// Frequency limits in Hz.
    fn pri_get_frequency_limits(&self, dev: i32, slot: i32) -> TransportResult<Limits>;
    /// Repetition frequency in Hz.
    fn pri_get_frequency(&self, dev: i32, slot: i32) -> TransportResult<i32>;
    /// Write the repetition frequency in Hz.
    fn pri_set_frequency(&self, dev: i32, slot: i32, frequency_hz: i32) -> TransportResult<()>;
    /// Gating on time and off time factor ranges.
    fn pri_get_gating_limits(&self, dev: i32, slot: i32) -> TransportResult<PriGatingLimits>;
    /// Gating on time and off time factor.
    fn pri_get_gating_data(&self, dev: i32, slot: i32) -> TransportResult<PriGatingData>;
    /// Write gating on time and off time factor.
    fn pri_set_gating_data(&self, dev: i32, slot: i32, data: PriGatingData)
        -> TransportResult<()>;
    /// Whether gating is active.
    fn pri_get_gating_enabled(&self, dev: i32, slot: i32) -> TransportResult<bool>;
    /// Enable or disable gating.
    fn pri_set_gating_enabled(&self, dev: i32, slot: i32, enabled: bool) -> TransportResult<()>;
    /// Whether the gate input is high impedance.
    fn pri_get_gate_high_impedance(&self, dev: i32, slot: i32) -> TransportResult<bool>;
    /// Select the gate input termination.
    fn pri_set_gate_high_impedance(&self, dev: i32, slot: i32, high: bool)
        -> TransportResult<()>;
    /// Wavelength in nm for a wavelength index.
    fn pri_decode_wavelength(&self, dev: i32, slot: i32, wl_idx: i32) -> TransportResult<i32>;
    /// Selected wavelength index.
    fn pri_get_wavelength_idx(&self, dev: i32, slot: i32) -> TransportResult<i32>;
    /// Select a wavelength index.
    fn pri_set_wavelength_idx(&self, dev: i32, slot: i32, wl_idx: i32) -> TransportResult<()>;
    /// Intensity in per mille of the pump current for one wavelength index.
    fn pri_get_intensity(&self, dev: i32, slot: i32, wl_idx: i32) -> TransportResult<u16>;
    /// Write the intensity in per mille for one wavelength index.
    fn pri_set_intensity(
        &self,
        dev: i32,
        slot: i32,
        wl_idx: i32,
        intensity: u16,
    ) -> TransportResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_codes() {
        assert!(StatusCode::DEVICE_BUSY.is_busy());
        assert!(StatusCode::DEVICE_BLOCKED.is_busy());
        assert!(!StatusCode::UNKNOWN_ERROR_CODE.is_busy());
        assert!(!StatusCode(-1).is_busy());
    }

    #[test]
    fn test_max_divider() {
        assert_eq!(OscillatorFamily::Som.max_divider(), 255);
        assert_eq!(OscillatorFamily::Somd.max_divider(), 65535);
    }

    #[test]
    fn test_limits_contains() {
        let limits = Limits { min: 10, max: 20 };
        assert!(limits.contains(10));
        assert!(limits.contains(20));
        assert!(!limits.contains(21));
    }
}
