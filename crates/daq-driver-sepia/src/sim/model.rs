//! In-memory model of a Sepia2 chassis.

use crate::transport::{
    BurstValues, Limits, OscillatorFamily, PriDeviceInfo, PriGatingData, PriGatingLimits,
    PriTriggerLevelLimits, PriTriggerSource, SeqOutputInfos,
};

/// Module type codes reported by the simulated firmware.
pub const TYPE_BACKPLANE: i32 = 0x10;
/// Safety module.
pub const TYPE_SCM: i32 = 0x41;
/// Oscillator without delay.
pub const TYPE_SOM: i32 = 0x50;
/// Oscillator with delay.
pub const TYPE_SOMD: i32 = 0x52;
/// Simple laser driver.
pub const TYPE_SLM: i32 = 0x60;
/// Prima laser.
pub const TYPE_PRI: i32 = 0x70;

/// Coarse delay step of a simulated SOMD, in seconds.
pub const COARSE_STEP_S: f64 = 1.0 / (80.0e6 * 16.0);
/// Fine delay steps of a simulated SOMD.
pub const FINE_STEPS_MAX: u8 = 15;

pub(crate) const FREQ_TRIG_MODES: [&str; 5] = [
    "ext. rising",
    "ext. falling",
    "int. A 80.00 MHz",
    "int. B 40.00 MHz",
    "int. C 20.00 MHz",
];

pub(crate) const AUX_IN_MODES: [&str; 4] = [
    "free running",
    "running while AUX IN high",
    "running while AUX IN low",
    "disabled",
];

pub(crate) const SLM_FREQ_TRIG_MODES: [&str; 8] = [
    "80 MHz",
    "40 MHz",
    "20 MHz",
    "10 MHz",
    "5 MHz",
    "2.5 MHz",
    "ext. rising",
    "ext. falling",
];

pub(crate) const SLM_HEAD_TYPES: [&str; 3] = ["LED", "pulsed laser diode", "CW laser diode"];

pub(crate) const PRI_OPERATION_MODES: [&str; 4] = ["off", "narrow pulse", "broad pulse", "CW"];

/// Decode table for simulated status codes.
pub(crate) fn error_text(code: i32) -> Option<&'static str> {
    Some(match code {
        -1201 => "FW: module map not present",
        -1202 => "FW: no module in slot",
        -1203 => "COM: function not supported by module type",
        -1204 => "COM: illegal parameter",
        -1205 => "COM: unknown module type",
        -9001 => "USB: device not open",
        -9003 => "USB: no such device",
        -9004 => "USB: device busy",
        -9005 => "USB: device blocked by driver",
        _ => return None,
    })
}

pub(crate) fn module_abbreviation(type_code: i32) -> Option<&'static str> {
    Some(match type_code {
        TYPE_BACKPLANE => "BKPL",
        TYPE_SCM => "SCM",
        TYPE_SOM => "SOM",
        TYPE_SOMD => "SOMD",
        TYPE_SLM => "SLM",
        TYPE_PRI => "PRI",
        _ => return None,
    })
}

pub(crate) fn module_long_name(type_code: i32) -> Option<&'static str> {
    Some(match type_code {
        TYPE_BACKPLANE => "Backplane",
        TYPE_SCM => "SCM 828 safety module",
        TYPE_SOM => "SOM 828 oscillator module",
        TYPE_SOMD => "SOM 828-D oscillator module",
        TYPE_SLM => "SLM 828 laser driver module",
        TYPE_PRI => "PRI Prima multi-wavelength laser",
        _ => return None,
    })
}

/// Register state of a simulated oscillator.
#[derive(Debug, Clone, PartialEq)]
pub struct OscillatorState {
    /// SOM or SOMD.
    pub family: OscillatorFamily,
    /// Trigger mode code.
    pub freq_trig_mode: i32,
    /// SOMD immediate synchronization flag.
    pub sync_now: bool,
    /// Pre-scaler values.
    pub burst: BurstValues,
    /// Burst length per output channel.
    pub burst_lengths: [u32; 8],
    /// Output enable byte, hardware bit order.
    pub out_enable: u8,
    /// Sync enable byte, hardware bit order.
    pub sync_enable: u8,
    /// SYNC polarity inverted.
    pub sync_inverse: bool,
    /// AUX OUT enabled.
    pub aux_out: bool,
    /// AUX IN sequencer control code.
    pub aux_in: u8,
    /// Sequencer record per output.
    pub seq_outputs: [SeqOutputInfos; 8],
    /// Number of `somd_synchronize_now` calls.
    pub synchronizations: u32,
}

impl OscillatorState {
    fn new(family: OscillatorFamily) -> Self {
        let seq = SeqOutputInfos {
            delayed: false,
            force_undelayed: false,
            out_combi: 0,
            masked_combi: false,
            delay_coarse_ns: 0.0,
            delay_fine: 0,
        };
        let mut seq_outputs = [seq; 8];
        for (channel, record) in seq_outputs.iter_mut().enumerate() {
            record.out_combi = 0x80 >> channel;
        }
        Self {
            family,
            freq_trig_mode: 0,
            sync_now: false,
            burst: BurstValues {
                divider: 1,
                presync: 0,
                mask_sync: 0,
            },
            burst_lengths: [1, 0, 0, 0, 0, 0, 0, 0],
            out_enable: 0,
            sync_enable: 0x80,
            sync_inverse: false,
            aux_out: true,
            aux_in: 3,
            seq_outputs,
            synchronizations: 0,
        }
    }
}

/// Register state of a simulated Prima laser.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaState {
    /// Identification block.
    pub info: PriDeviceInfo,
    /// Wavelength per index.
    pub wavelengths_nm: Vec<i32>,
    /// Operation mode code.
    pub operation_mode: i32,
    /// Decoded trigger sources by code.
    pub trigger_sources: Vec<PriTriggerSource>,
    /// Trigger source code.
    pub trigger_source: i32,
    /// Accepted trigger level range.
    pub trigger_level_limits: PriTriggerLevelLimits,
    /// Trigger level in mV.
    pub trigger_level_mv: i32,
    /// Accepted frequency range in Hz.
    pub frequency_limits: Limits,
    /// Repetition frequency in Hz.
    pub frequency_hz: i32,
    /// Accepted gating ranges.
    pub gating_limits: PriGatingLimits,
    /// Gating on time and off time factor.
    pub gating: PriGatingData,
    /// Gating active.
    pub gating_enabled: bool,
    /// Gate input high impedance.
    pub gate_high_impedance: bool,
    /// Selected wavelength index.
    pub wavelength_idx: i32,
    /// Intensity per wavelength, per mille.
    pub intensity: Vec<u16>,
}

impl Default for PrimaState {
    fn default() -> Self {
        let source = |name: &str, frequency_enabled, trigger_level_enabled| PriTriggerSource {
            name: name.to_string(),
            frequency_enabled,
            trigger_level_enabled,
        };
        Self {
            info: PriDeviceInfo {
                device_id: "PRI-0815".into(),
                device_type: "Prima".into(),
                fw_version: "1.05.420".into(),
                wavelength_count: 3,
            },
            wavelengths_nm: vec![405, 510, 640],
            operation_mode: 0,
            trigger_sources: vec![
                source("internal", true, false),
                source("external rising", false, true),
                source("external falling", false, true),
            ],
            trigger_source: 0,
            trigger_level_limits: PriTriggerLevelLimits {
                min_mv: -1000,
                max_mv: 1000,
                resolution_mv: 20,
            },
            trigger_level_mv: 0,
            frequency_limits: Limits {
                min: 1_000,
                max: 80_000_000,
            },
            frequency_hz: 1_000_000,
            gating_limits: PriGatingLimits {
                on_time: Limits {
                    min: 20,
                    max: 1_000_000,
                },
                off_time_factor: Limits { min: 1, max: 1000 },
            },
            gating: PriGatingData {
                on_time: 100,
                off_time_factor: 10,
            },
            gating_enabled: false,
            gate_high_impedance: false,
            wavelength_idx: 0,
            intensity: vec![0; 3],
        }
    }
}

/// Register state of one simulated module.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleState {
    /// SCM registers.
    Safety {
        /// Softlock engaged.
        soft_lock: bool,
        /// Key switch or interlock open.
        hard_lock: bool,
    },
    /// SOM or SOMD registers.
    Oscillator(Box<OscillatorState>),
    /// SLM registers.
    SimpleLaser {
        /// Intensity in per mille.
        intensity: u16,
        /// Trigger mode code.
        freq_trig_mode: i32,
        /// Pulsed (true) or continuous (false).
        pulse_mode: bool,
        /// Laser head type code.
        head_type: i32,
    },
    /// Prima registers.
    TunableLaser(Box<PrimaState>),
    /// Module without registers.
    Passive,
}

/// One module plugged into a simulated chassis.
#[derive(Debug, Clone, PartialEq)]
pub struct SimModule {
    /// Slot id in the map.
    pub slot_id: i32,
    /// Module type code.
    pub type_code: i32,
    /// Primary module in its slot.
    pub is_primary: bool,
    /// The entry describes the backplane.
    pub is_backplane: bool,
    /// Module keeps an uptime counter.
    pub has_uptime_counter: bool,
    /// Register state.
    pub state: ModuleState,
}

impl SimModule {
    fn new(slot_id: i32, type_code: i32, state: ModuleState) -> Self {
        Self {
            slot_id,
            type_code,
            is_primary: true,
            is_backplane: false,
            has_uptime_counter: true,
            state,
        }
    }

    /// SCM with the softlock engaged.
    pub fn safety(slot_id: i32) -> Self {
        Self::new(
            slot_id,
            TYPE_SCM,
            ModuleState::Safety {
                soft_lock: true,
                hard_lock: false,
            },
        )
    }

    /// SOM oscillator.
    pub fn som(slot_id: i32) -> Self {
        Self::new(
            slot_id,
            TYPE_SOM,
            ModuleState::Oscillator(Box::new(OscillatorState::new(OscillatorFamily::Som))),
        )
    }

    /// SOMD oscillator.
    pub fn somd(slot_id: i32) -> Self {
        Self::new(
            slot_id,
            TYPE_SOMD,
            ModuleState::Oscillator(Box::new(OscillatorState::new(OscillatorFamily::Somd))),
        )
    }

    /// SLM driver, continuous, zero intensity.
    pub fn simple_laser(slot_id: i32) -> Self {
        Self::new(
            slot_id,
            TYPE_SLM,
            ModuleState::SimpleLaser {
                intensity: 0,
                freq_trig_mode: 0,
                pulse_mode: false,
                head_type: 1,
            },
        )
    }

    /// Prima with default registers.
    pub fn prima(slot_id: i32) -> Self {
        Self::new(
            slot_id,
            TYPE_PRI,
            ModuleState::TunableLaser(Box::default()),
        )
    }

    /// Backplane entry.
    pub fn backplane(slot_id: i32) -> Self {
        let mut module = Self::new(slot_id, TYPE_BACKPLANE, ModuleState::Passive);
        module.is_backplane = true;
        module.has_uptime_counter = false;
        module
    }

    /// Module with an arbitrary type code and no registers.
    pub fn passive(slot_id: i32, type_code: i32) -> Self {
        Self::new(slot_id, type_code, ModuleState::Passive)
    }

    /// Mark the module secondary.
    pub fn secondary(mut self) -> Self {
        self.is_primary = false;
        self
    }

    /// Oscillator registers, if this is an oscillator.
    pub fn oscillator(&self) -> Option<&OscillatorState> {
        match &self.state {
            ModuleState::Oscillator(osc) => Some(osc),
            _ => None,
        }
    }

    /// Prima registers, if this is a Prima.
    pub fn prima_state(&self) -> Option<&PrimaState> {
        match &self.state {
            ModuleState::TunableLaser(pri) => Some(pri),
            _ => None,
        }
    }
}

/// A simulated USB device and its modules.
#[derive(Debug, Clone, PartialEq)]
pub struct SimDevice {
    /// Product model reported on open.
    pub product_model: String,
    /// Serial number reported on open.
    pub serial_number: String,
    /// Firmware version string.
    pub firmware_version: String,
    /// Another process holds the device.
    pub busy: bool,
    /// Modules in map order.
    pub modules: Vec<SimModule>,
}

impl SimDevice {
    /// Empty chassis.
    pub fn new(serial_number: impl Into<String>) -> Self {
        Self {
            product_model: "Sepia II".into(),
            serial_number: serial_number.into(),
            firmware_version: "1.2.25.611".into(),
            busy: false,
            modules: Vec::new(),
        }
    }

    /// Safety, SOMD, two SLM drivers, a Prima and a backplane, in that order.
    pub fn standard() -> Self {
        Self::new("1046337")
            .with_module(SimModule::safety(100))
            .with_module(SimModule::somd(200))
            .with_module(SimModule::simple_laser(300))
            .with_module(SimModule::simple_laser(400))
            .with_module(SimModule::prima(500))
            .with_module(SimModule::backplane(0))
    }

    /// Safety, SOM and one SLM driver.
    pub fn with_som() -> Self {
        Self::new("1046338")
            .with_module(SimModule::safety(100))
            .with_module(SimModule::som(200))
            .with_module(SimModule::simple_laser(300))
    }

    /// Append a module to the map.
    pub fn with_module(mut self, module: SimModule) -> Self {
        self.modules.push(module);
        self
    }

    /// Mark the device as held by another process.
    pub fn busy(mut self) -> Self {
        self.busy = true;
        self
    }

    /// Slot ids in map order.
    pub fn slot_ids(&self) -> Vec<i32> {
        self.modules.iter().map(|m| m.slot_id).collect()
    }
}
