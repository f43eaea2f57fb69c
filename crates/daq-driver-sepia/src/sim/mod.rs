//! Simulated Sepia2 transport.
//!
//! [`SimulatedTransport`] keeps an in-memory model of one or more chassis and
//! answers every [`Transport`] call from it. Each call is recorded so tests
//! can assert on ordering, and failures can be injected per operation.
//!
//! ```
//! use std::sync::Arc;
//! use daq_driver_sepia::sim::{SimDevice, SimulatedTransport};
//!
//! let sim = Arc::new(SimulatedTransport::with_device(0, SimDevice::standard()));
//! assert_eq!(sim.call_count(), 0);
//! ```

mod faults;
mod model;

use std::collections::BTreeMap;

use parking_lot::Mutex;
use tracing::trace;

pub use faults::FaultScenario;
pub use model::{
    ModuleState, OscillatorState, PrimaState, SimDevice, SimModule, COARSE_STEP_S,
    FINE_STEPS_MAX, TYPE_BACKPLANE, TYPE_PRI, TYPE_SCM, TYPE_SLM, TYPE_SOM, TYPE_SOMD,
};

use faults::FaultState;
use model::{
    error_text, module_abbreviation, module_long_name, AUX_IN_MODES, FREQ_TRIG_MODES,
    PRI_OPERATION_MODES, SLM_FREQ_TRIG_MODES, SLM_HEAD_TYPES,
};

use crate::transport::{
    AuxIoControl, BurstValues, FreqTrigMode, Limits, OscillatorFamily, OutSyncEnable,
    PriDeviceInfo, PriGatingData, PriGatingLimits, PriTriggerLevelLimits, PriTriggerSource,
    RawDelayUnits, RawModuleInfo, SeqOutputInfos, SeqOutputWrite, SlmPulseParameters, StatusCode,
    Transport, TransportResult, UsbIdentity,
};

/// Module map has not been read.
pub const ERR_NO_MAP: StatusCode = StatusCode(-1201);
/// No module at the addressed slot.
pub const ERR_NO_SUCH_SLOT: StatusCode = StatusCode(-1202);
/// Function not available on the module at the addressed slot.
pub const ERR_WRONG_MODULE: StatusCode = StatusCode(-1203);
/// Parameter outside the accepted range.
pub const ERR_ILLEGAL_PARAM: StatusCode = StatusCode(-1204);
/// Decoder does not know the module type.
pub const ERR_UNKNOWN_TYPE: StatusCode = StatusCode(-1205);
/// Device is not open.
pub const ERR_NOT_OPEN: StatusCode = StatusCode(-9001);
/// No device at the index.
pub const ERR_NO_DEVICE: StatusCode = StatusCode(-9003);

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Transport method name.
    pub operation: &'static str,
    /// Device index, if the call addressed one.
    pub device: Option<i32>,
    /// Slot id, if the call addressed one.
    pub slot: Option<i32>,
}

#[derive(Debug)]
struct DeviceSlot {
    model: SimDevice,
    open: bool,
    map_loaded: bool,
    map_reads: u32,
}

#[derive(Debug, Default)]
struct SimState {
    devices: BTreeMap<i32, DeviceSlot>,
    calls: Vec<CallRecord>,
    faults: FaultState,
}

impl SimState {
    fn enter(
        &mut self,
        operation: &'static str,
        device: Option<i32>,
        slot: Option<i32>,
    ) -> TransportResult<()> {
        trace!(operation, ?device, ?slot, "Simulated call");
        self.calls.push(CallRecord {
            operation,
            device,
            slot,
        });
        self.faults.check(operation)
    }
}

/// In-memory [`Transport`].
#[derive(Debug, Default)]
pub struct SimulatedTransport {
    state: Mutex<SimState>,
}

impl SimulatedTransport {
    /// Transport with no devices attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport with one device at `index`.
    pub fn with_device(index: i32, device: SimDevice) -> Self {
        let sim = Self::new();
        sim.add_device(index, device);
        sim
    }

    /// Attach (or replace) the device at `index`.
    pub fn add_device(&self, index: i32, device: SimDevice) {
        self.state.lock().devices.insert(
            index,
            DeviceSlot {
                model: device,
                open: false,
                map_loaded: false,
                map_reads: 0,
            },
        );
    }

    /// Mark the device at `index` as held by another process.
    pub fn set_busy(&self, index: i32, busy: bool) {
        if let Some(slot) = self.state.lock().devices.get_mut(&index) {
            slot.model.busy = busy;
        }
    }

    /// Engage or release the hardware interlock of a safety module.
    pub fn set_hard_lock(&self, index: i32, slot_id: i32, locked: bool) {
        let mut state = self.state.lock();
        let module = state
            .devices
            .get_mut(&index)
            .and_then(|d| d.model.modules.iter_mut().find(|m| m.slot_id == slot_id));
        if let Some(SimModule {
            state: ModuleState::Safety { hard_lock, .. },
            ..
        }) = module
        {
            *hard_lock = locked;
        }
    }

    /// Add a fault scenario.
    pub fn inject(&self, scenario: FaultScenario) {
        self.state.lock().faults.add(scenario);
    }

    /// Every call of `operation` fails with `code`.
    pub fn fail_on(&self, operation: &'static str, code: StatusCode) {
        self.inject(FaultScenario::FailOn { operation, code });
    }

    /// Calls of `operation` after the first `count` fail with `code`.
    pub fn fail_after(&self, operation: &'static str, count: u32, code: StatusCode) {
        self.inject(FaultScenario::FailAfterN {
            operation,
            count,
            code,
        });
    }

    /// Make decoding of `code` fail with `failure`.
    pub fn fail_decode_of(&self, code: StatusCode, failure: StatusCode) {
        self.state.lock().faults.fail_decode_of(code, failure);
    }

    /// Remove every fault scenario.
    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Every call recorded so far.
    pub fn calls(&self) -> Vec<CallRecord> {
        self.state.lock().calls.clone()
    }

    /// Operation names recorded so far, excluding error decoding.
    pub fn operations(&self) -> Vec<&'static str> {
        self.state
            .lock()
            .calls
            .iter()
            .map(|c| c.operation)
            .filter(|op| *op != "lib_decode_error")
            .collect()
    }

    /// Number of calls recorded, error decoding included.
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Snapshot of the device at `index`.
    pub fn device(&self, index: i32) -> Option<SimDevice> {
        self.state.lock().devices.get(&index).map(|d| d.model.clone())
    }

    /// Snapshot of one module.
    pub fn module(&self, index: i32, slot_id: i32) -> Option<SimModule> {
        self.device(index)
            .and_then(|d| d.modules.into_iter().find(|m| m.slot_id == slot_id))
    }

    /// Whether device `index` is open.
    pub fn is_open(&self, index: i32) -> bool {
        self.state
            .lock()
            .devices
            .get(&index)
            .is_some_and(|d| d.open)
    }

    /// Whether device `index` holds a module map.
    pub fn map_loaded(&self, index: i32) -> bool {
        self.state
            .lock()
            .devices
            .get(&index)
            .is_some_and(|d| d.map_loaded)
    }

    /// How often the module map was read with or without restart.
    pub fn map_reads(&self, index: i32) -> u32 {
        self.state
            .lock()
            .devices
            .get(&index)
            .map_or(0, |d| d.map_reads)
    }

    fn offline<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce() -> TransportResult<T>,
    ) -> TransportResult<T> {
        self.state.lock().enter(operation, None, None)?;
        f()
    }

    fn device_call<T>(
        &self,
        operation: &'static str,
        dev: i32,
        f: impl FnOnce(&mut DeviceSlot) -> TransportResult<T>,
    ) -> TransportResult<T> {
        let mut state = self.state.lock();
        state.enter(operation, Some(dev), None)?;
        let slot = state.devices.get_mut(&dev).ok_or(ERR_NO_DEVICE)?;
        if !slot.open {
            return Err(ERR_NOT_OPEN);
        }
        f(slot)
    }

    fn module_call<T>(
        &self,
        operation: &'static str,
        dev: i32,
        slot_id: i32,
        f: impl FnOnce(&mut SimModule) -> TransportResult<T>,
    ) -> TransportResult<T> {
        let mut state = self.state.lock();
        state.enter(operation, Some(dev), Some(slot_id))?;
        let slot = state.devices.get_mut(&dev).ok_or(ERR_NO_DEVICE)?;
        if !slot.open {
            return Err(ERR_NOT_OPEN);
        }
        if !slot.map_loaded {
            return Err(ERR_NO_MAP);
        }
        let module = slot
            .model
            .modules
            .iter_mut()
            .find(|m| m.slot_id == slot_id)
            .ok_or(ERR_NO_SUCH_SLOT)?;
        f(module)
    }

    fn oscillator<T>(
        &self,
        operation: &'static str,
        dev: i32,
        slot_id: i32,
        family: OscillatorFamily,
        f: impl FnOnce(&mut OscillatorState) -> TransportResult<T>,
    ) -> TransportResult<T> {
        self.module_call(operation, dev, slot_id, |module| match &mut module.state {
            ModuleState::Oscillator(osc) if osc.family == family => f(osc),
            _ => Err(ERR_WRONG_MODULE),
        })
    }

    fn safety<T>(
        &self,
        operation: &'static str,
        dev: i32,
        slot_id: i32,
        f: impl FnOnce(&mut bool, &mut bool) -> TransportResult<T>,
    ) -> TransportResult<T> {
        self.module_call(operation, dev, slot_id, |module| match &mut module.state {
            ModuleState::Safety {
                soft_lock,
                hard_lock,
            } => f(soft_lock, hard_lock),
            _ => Err(ERR_WRONG_MODULE),
        })
    }

    fn slm<T>(
        &self,
        operation: &'static str,
        dev: i32,
        slot_id: i32,
        f: impl FnOnce(&mut u16, &mut i32, &mut bool, i32) -> TransportResult<T>,
    ) -> TransportResult<T> {
        self.module_call(operation, dev, slot_id, |module| match &mut module.state {
            ModuleState::SimpleLaser {
                intensity,
                freq_trig_mode,
                pulse_mode,
                head_type,
            } => f(intensity, freq_trig_mode, pulse_mode, *head_type),
            _ => Err(ERR_WRONG_MODULE),
        })
    }

    fn prima<T>(
        &self,
        operation: &'static str,
        dev: i32,
        slot_id: i32,
        f: impl FnOnce(&mut PrimaState) -> TransportResult<T>,
    ) -> TransportResult<T> {
        self.module_call(operation, dev, slot_id, |module| match &mut module.state {
            ModuleState::TunableLaser(pri) => f(pri),
            _ => Err(ERR_WRONG_MODULE),
        })
    }

    fn identity(&self, operation: &'static str, dev: i32, open: bool) -> TransportResult<UsbIdentity> {
        let mut state = self.state.lock();
        state.enter(operation, Some(dev), None)?;
        let slot = state.devices.get_mut(&dev).ok_or(ERR_NO_DEVICE)?;
        if slot.model.busy {
            return Err(StatusCode::DEVICE_BUSY);
        }
        if open {
            slot.open = true;
        }
        Ok(UsbIdentity {
            product_model: slot.model.product_model.clone(),
            serial_number: slot.model.serial_number.clone(),
        })
    }
}

fn lookup(table: &[&str], index: i32) -> TransportResult<String> {
    usize::try_from(index)
        .ok()
        .and_then(|i| table.get(i))
        .map(|s| s.to_string())
        .ok_or(ERR_ILLEGAL_PARAM)
}

fn check(condition: bool) -> TransportResult<()> {
    if condition {
        Ok(())
    } else {
        Err(ERR_ILLEGAL_PARAM)
    }
}

fn seq_index(output: u8) -> TransportResult<usize> {
    check(output < 8)?;
    Ok(usize::from(output))
}

impl Transport for SimulatedTransport {
    fn lib_decode_error(&self, code: StatusCode) -> TransportResult<String> {
        let mut state = self.state.lock();
        state.enter("lib_decode_error", None, None)?;
        if let Some(failure) = state.faults.decode_failure(code) {
            return Err(failure);
        }
        Ok(error_text(code.0)
            .unwrap_or("LIB: unknown error code")
            .to_string())
    }

    fn lib_get_version(&self) -> TransportResult<String> {
        self.offline("lib_get_version", || Ok("1.2.64.753".to_string()))
    }

    fn usb_open_device(&self, dev: i32) -> TransportResult<UsbIdentity> {
        self.identity("usb_open_device", dev, true)
    }

    fn usb_open_get_ser_num_and_close(&self, dev: i32) -> TransportResult<UsbIdentity> {
        self.identity("usb_open_get_ser_num_and_close", dev, false)
    }

    fn usb_is_open_device(&self, dev: i32) -> TransportResult<bool> {
        let mut state = self.state.lock();
        state.enter("usb_is_open_device", Some(dev), None)?;
        state.devices.get(&dev).map(|d| d.open).ok_or(ERR_NO_DEVICE)
    }

    fn usb_close_device(&self, dev: i32) -> TransportResult<()> {
        self.device_call("usb_close_device", dev, |slot| {
            slot.open = false;
            Ok(())
        })
    }

    fn fwr_get_version(&self, dev: i32) -> TransportResult<String> {
        self.device_call("fwr_get_version", dev, |slot| {
            Ok(slot.model.firmware_version.clone())
        })
    }

    fn fwr_get_module_map(&self, dev: i32, _restart: bool) -> TransportResult<i32> {
        self.device_call("fwr_get_module_map", dev, |slot| {
            slot.map_loaded = true;
            slot.map_reads += 1;
            i32::try_from(slot.model.modules.len()).map_err(|_| ERR_ILLEGAL_PARAM)
        })
    }

    fn fwr_get_module_info_by_map_idx(
        &self,
        dev: i32,
        map_idx: i32,
    ) -> TransportResult<RawModuleInfo> {
        self.device_call("fwr_get_module_info_by_map_idx", dev, |slot| {
            if !slot.map_loaded {
                return Err(ERR_NO_MAP);
            }
            let module = usize::try_from(map_idx)
                .ok()
                .and_then(|i| slot.model.modules.get(i))
                .ok_or(ERR_ILLEGAL_PARAM)?;
            Ok(RawModuleInfo {
                slot_id: module.slot_id,
                is_primary: module.is_primary,
                is_backplane: module.is_backplane,
                has_uptime_counter: module.has_uptime_counter,
            })
        })
    }

    fn fwr_free_module_map(&self, dev: i32) -> TransportResult<()> {
        self.device_call("fwr_free_module_map", dev, |slot| {
            slot.map_loaded = false;
            Ok(())
        })
    }

    fn com_get_module_type(&self, dev: i32, slot: i32, _primary: bool) -> TransportResult<i32> {
        self.module_call("com_get_module_type", dev, slot, |module| Ok(module.type_code))
    }

    fn com_decode_module_type(&self, module_type: i32) -> TransportResult<String> {
        self.offline("com_decode_module_type", || {
            module_long_name(module_type)
                .map(str::to_string)
                .ok_or(ERR_UNKNOWN_TYPE)
        })
    }

    fn com_decode_module_type_abbr(&self, module_type: i32) -> TransportResult<String> {
        self.offline("com_decode_module_type_abbr", || {
            module_abbreviation(module_type)
                .map(str::to_string)
                .ok_or(ERR_UNKNOWN_TYPE)
        })
    }

    fn scm_get_laser_locked(&self, dev: i32, slot: i32) -> TransportResult<bool> {
        self.safety("scm_get_laser_locked", dev, slot, |soft, hard| Ok(*soft || *hard))
    }

    fn scm_get_laser_soft_lock(&self, dev: i32, slot: i32) -> TransportResult<bool> {
        self.safety("scm_get_laser_soft_lock", dev, slot, |soft, _| Ok(*soft))
    }

    fn scm_set_laser_soft_lock(&self, dev: i32, slot: i32, locked: bool) -> TransportResult<()> {
        self.safety("scm_set_laser_soft_lock", dev, slot, |soft, _| {
            *soft = locked;
            Ok(())
        })
    }

    fn scm_get_power_and_laser_leds(&self, dev: i32, slot: i32) -> TransportResult<(bool, bool)> {
        self.safety("scm_get_power_and_laser_leds", dev, slot, |soft, hard| {
            Ok((true, !(*soft || *hard)))
        })
    }

    fn som_get_freq_trig_mode(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
    ) -> TransportResult<FreqTrigMode> {
        self.oscillator("som_get_freq_trig_mode", dev, slot, family, |osc| {
            Ok(FreqTrigMode {
                mode: osc.freq_trig_mode,
                sync_now: osc.sync_now,
            })
        })
    }

    fn som_set_freq_trig_mode(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
        mode: FreqTrigMode,
    ) -> TransportResult<()> {
        self.oscillator("som_set_freq_trig_mode", dev, slot, family, |osc| {
            lookup(&FREQ_TRIG_MODES, mode.mode)?;
            osc.freq_trig_mode = mode.mode;
            osc.sync_now = family == OscillatorFamily::Somd && mode.sync_now;
            Ok(())
        })
    }

    fn som_decode_freq_trig_mode(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
        mode: i32,
    ) -> TransportResult<String> {
        self.oscillator("som_decode_freq_trig_mode", dev, slot, family, |_| {
            lookup(&FREQ_TRIG_MODES, mode)
        })
    }

    fn som_get_burst_values(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
    ) -> TransportResult<BurstValues> {
        self.oscillator("som_get_burst_values", dev, slot, family, |osc| Ok(osc.burst))
    }

    fn som_set_burst_values(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
        values: BurstValues,
    ) -> TransportResult<()> {
        self.oscillator("som_set_burst_values", dev, slot, family, |osc| {
            check(values.divider >= 1 && values.divider <= family.max_divider())?;
            osc.burst = values;
            Ok(())
        })
    }

    fn som_get_burst_length_array(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
    ) -> TransportResult<[u32; 8]> {
        self.oscillator("som_get_burst_length_array", dev, slot, family, |osc| {
            Ok(osc.burst_lengths)
        })
    }

    fn som_set_burst_length_array(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
        lengths: [u32; 8],
    ) -> TransportResult<()> {
        self.oscillator("som_set_burst_length_array", dev, slot, family, |osc| {
            osc.burst_lengths = lengths;
            Ok(())
        })
    }

    fn som_get_out_n_sync_enable(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
    ) -> TransportResult<OutSyncEnable> {
        self.oscillator("som_get_out_n_sync_enable", dev, slot, family, |osc| {
            Ok(OutSyncEnable {
                out_enable: osc.out_enable,
                sync_enable: osc.sync_enable,
                sync_inverse: osc.sync_inverse,
            })
        })
    }

    fn som_set_out_n_sync_enable(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
        value: OutSyncEnable,
    ) -> TransportResult<()> {
        self.oscillator("som_set_out_n_sync_enable", dev, slot, family, |osc| {
            osc.out_enable = value.out_enable;
            osc.sync_enable = value.sync_enable;
            osc.sync_inverse = value.sync_inverse;
            Ok(())
        })
    }

    fn som_get_aux_io_sequencer_ctrl(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
    ) -> TransportResult<AuxIoControl> {
        self.oscillator("som_get_aux_io_sequencer_ctrl", dev, slot, family, |osc| {
            Ok(AuxIoControl {
                aux_out: osc.aux_out,
                aux_in: osc.aux_in,
            })
        })
    }

    fn som_set_aux_io_sequencer_ctrl(
        &self,
        dev: i32,
        slot: i32,
        family: OscillatorFamily,
        value: AuxIoControl,
    ) -> TransportResult<()> {
        self.oscillator("som_set_aux_io_sequencer_ctrl", dev, slot, family, |osc| {
            check(usize::from(value.aux_in) < AUX_IN_MODES.len())?;
            osc.aux_out = value.aux_out;
            osc.aux_in = value.aux_in;
            Ok(())
        })
    }

    fn som_decode_aux_in_sequencer_ctrl(
        &self,
        _family: OscillatorFamily,
        aux_in: u8,
    ) -> TransportResult<String> {
        self.offline("som_decode_aux_in_sequencer_ctrl", || {
            lookup(&AUX_IN_MODES, i32::from(aux_in))
        })
    }

    fn somd_get_delay_units(&self, dev: i32, slot: i32) -> TransportResult<RawDelayUnits> {
        self.oscillator("somd_get_delay_units", dev, slot, OscillatorFamily::Somd, |_| {
            Ok(RawDelayUnits {
                coarse_step_s: COARSE_STEP_S,
                fine_steps_max: FINE_STEPS_MAX,
            })
        })
    }

    fn somd_get_seq_output_infos(
        &self,
        dev: i32,
        slot: i32,
        output: u8,
    ) -> TransportResult<SeqOutputInfos> {
        self.oscillator(
            "somd_get_seq_output_infos",
            dev,
            slot,
            OscillatorFamily::Somd,
            |osc| Ok(osc.seq_outputs[seq_index(output)?]),
        )
    }

    fn somd_set_seq_output_infos(
        &self,
        dev: i32,
        slot: i32,
        output: u8,
        record: SeqOutputWrite,
    ) -> TransportResult<()> {
        self.oscillator(
            "somd_set_seq_output_infos",
            dev,
            slot,
            OscillatorFamily::Somd,
            |osc| {
                let index = seq_index(output)?;
                check(record.delay_fine <= FINE_STEPS_MAX)?;
                check(record.delay_coarse_ns.is_finite() && record.delay_coarse_ns >= 0.0)?;
                osc.seq_outputs[index] = SeqOutputInfos {
                    delayed: record.delayed,
                    force_undelayed: false,
                    out_combi: record.out_combi,
                    masked_combi: record.masked_combi,
                    delay_coarse_ns: record.delay_coarse_ns,
                    delay_fine: record.delay_fine,
                };
                Ok(())
            },
        )
    }

    fn somd_synchronize_now(&self, dev: i32, slot: i32) -> TransportResult<()> {
        self.oscillator("somd_synchronize_now", dev, slot, OscillatorFamily::Somd, |osc| {
            osc.synchronizations += 1;
            Ok(())
        })
    }

    fn slm_get_intensity_fine_step(&self, dev: i32, slot: i32) -> TransportResult<u16> {
        self.slm("slm_get_intensity_fine_step", dev, slot, |intensity, _, _, _| {
            Ok(*intensity)
        })
    }

    fn slm_set_intensity_fine_step(
        &self,
        dev: i32,
        slot: i32,
        intensity: u16,
    ) -> TransportResult<()> {
        self.slm("slm_set_intensity_fine_step", dev, slot, |current, _, _, _| {
            check(intensity <= 1000)?;
            *current = intensity;
            Ok(())
        })
    }

    fn slm_get_pulse_parameters(&self, dev: i32, slot: i32) -> TransportResult<SlmPulseParameters> {
        self.slm("slm_get_pulse_parameters", dev, slot, |_, mode, pulsed, head| {
            Ok(SlmPulseParameters {
                freq_trig_mode: *mode,
                pulse_mode: *pulsed,
                head_type: head,
            })
        })
    }

    fn slm_set_pulse_parameters(
        &self,
        dev: i32,
        slot: i32,
        freq_trig_mode: i32,
        pulse_mode: bool,
    ) -> TransportResult<()> {
        self.slm("slm_set_pulse_parameters", dev, slot, |_, mode, pulsed, _| {
            lookup(&SLM_FREQ_TRIG_MODES, freq_trig_mode)?;
            *mode = freq_trig_mode;
            *pulsed = pulse_mode;
            Ok(())
        })
    }

    fn slm_decode_freq_trig_mode(&self, freq_trig_mode: i32) -> TransportResult<String> {
        self.offline("slm_decode_freq_trig_mode", || {
            lookup(&SLM_FREQ_TRIG_MODES, freq_trig_mode)
        })
    }

    fn slm_decode_head_type(&self, head_type: i32) -> TransportResult<String> {
        self.offline("slm_decode_head_type", || lookup(&SLM_HEAD_TYPES, head_type))
    }

    fn pri_get_device_info(&self, dev: i32, slot: i32) -> TransportResult<PriDeviceInfo> {
        self.prima("pri_get_device_info", dev, slot, |pri| Ok(pri.info.clone()))
    }

    fn pri_get_operation_mode(&self, dev: i32, slot: i32) -> TransportResult<i32> {
        self.prima("pri_get_operation_mode", dev, slot, |pri| Ok(pri.operation_mode))
    }

    fn pri_set_operation_mode(&self, dev: i32, slot: i32, mode: i32) -> TransportResult<()> {
        self.prima("pri_set_operation_mode", dev, slot, |pri| {
            lookup(&PRI_OPERATION_MODES, mode)?;
            pri.operation_mode = mode;
            Ok(())
        })
    }

    fn pri_decode_operation_mode(
        &self,
        dev: i32,
        slot: i32,
        mode: i32,
    ) -> TransportResult<String> {
        self.prima("pri_decode_operation_mode", dev, slot, |_| {
            lookup(&PRI_OPERATION_MODES, mode)
        })
    }

    fn pri_get_trigger_source(&self, dev: i32, slot: i32) -> TransportResult<i32> {
        self.prima("pri_get_trigger_source", dev, slot, |pri| Ok(pri.trigger_source))
    }

    fn pri_set_trigger_source(&self, dev: i32, slot: i32, source: i32) -> TransportResult<()> {
        self.prima("pri_set_trigger_source", dev, slot, |pri| {
            check(usize::try_from(source).is_ok_and(|s| s < pri.trigger_sources.len()))?;
            pri.trigger_source = source;
            Ok(())
        })
    }

    fn pri_decode_trigger_source(
        &self,
        dev: i32,
        slot: i32,
        source: i32,
    ) -> TransportResult<PriTriggerSource> {
        self.prima("pri_decode_trigger_source", dev, slot, |pri| {
            usize::try_from(source)
                .ok()
                .and_then(|s| pri.trigger_sources.get(s))
                .cloned()
                .ok_or(ERR_ILLEGAL_PARAM)
        })
    }

    fn pri_get_trigger_level_limits(
        &self,
        dev: i32,
        slot: i32,
    ) -> TransportResult<PriTriggerLevelLimits> {
        self.prima("pri_get_trigger_level_limits", dev, slot, |pri| {
            Ok(pri.trigger_level_limits)
        })
    }

    fn pri_get_trigger_level(&self, dev: i32, slot: i32) -> TransportResult<i32> {
        self.prima("pri_get_trigger_level", dev, slot, |pri| Ok(pri.trigger_level_mv))
    }

    fn pri_set_trigger_level(&self, dev: i32, slot: i32, level_mv: i32) -> TransportResult<()> {
        self.prima("pri_set_trigger_level", dev, slot, |pri| {
            let limits = pri.trigger_level_limits;
            check(level_mv >= limits.min_mv && level_mv <= limits.max_mv)?;
            pri.trigger_level_mv = level_mv;
            Ok(())
        })
    }

    fn pri_get_frequency_limits(&self, dev: i32, slot: i32) -> TransportResult<Limits> {
        self.prima("pri_get_frequency_limits", dev, slot, |pri| Ok(pri.frequency_limits))
    }

    fn pri_get_frequency(&self, dev: i32, slot: i32) -> TransportResult<i32> {
        self.prima("pri_get_frequency", dev, slot, |pri| Ok(pri.frequency_hz))
    }

    fn pri_set_frequency(&self, dev: i32, slot: i32, frequency_hz: i32) -> TransportResult<()> {
        self.prima("pri_set_frequency", dev, slot, |pri| {
            check(pri.frequency_limits.contains(frequency_hz))?;
            pri.frequency_hz = frequency_hz;
            Ok(())
        })
    }

    fn pri_get_gating_limits(&self, dev: i32, slot: i32) -> TransportResult<PriGatingLimits> {
        self.prima("pri_get_gating_limits", dev, slot, |pri| Ok(pri.gating_limits))
    }

    fn pri_get_gating_data(&self, dev: i32, slot: i32) -> TransportResult<PriGatingData> {
        self.prima("pri_get_gating_data", dev, slot, |pri| Ok(pri.gating))
    }

    fn pri_set_gating_data(
        &self,
        dev: i32,
        slot: i32,
        data: PriGatingData,
    ) -> TransportResult<()> {
        self.prima("pri_set_gating_data", dev, slot, |pri| {
            check(pri.gating_limits.on_time.contains(data.on_time))?;
            check(pri.gating_limits.off_time_factor.contains(data.off_time_factor))?;
            pri.gating = data;
            Ok(())
        })
    }

    fn pri_get_gating_enabled(&self, dev: i32, slot: i32) -> TransportResult<bool> {
        self.prima("pri_get_gating_enabled", dev, slot, |pri| Ok(pri.gating_enabled))
    }

    fn pri_set_gating_enabled(&self, dev: i32, slot: i32, enabled: bool) -> TransportResult<()> {
        self.prima("pri_set_gating_enabled", dev, slot, |pri| {
            pri.gating_enabled = enabled;
            Ok(())
        })
    }

    fn pri_get_gate_high_impedance(&self, dev: i32, slot: i32) -> TransportResult<bool> {
        self.prima("pri_get_gate_high_impedance", dev, slot, |pri| {
            Ok(pri.gate_high_impedance)
        })
    }

    fn pri_set_gate_high_impedance(
        &self,
        dev: i32,
        slot: i32,
        high: bool,
    ) -> TransportResult<()> {
        self.prima("pri_set_gate_high_impedance", dev, slot, |pri| {
            pri.gate_high_impedance = high;
            Ok(())
        })
    }

    fn pri_decode_wavelength(&self, dev: i32, slot: i32, wl_idx: i32) -> TransportResult<i32> {
        self.prima("pri_decode_wavelength", dev, slot, |pri| {
            usize::try_from(wl_idx)
                .ok()
                .and_then(|i| pri.wavelengths_nm.get(i))
                .copied()
                .ok_or(ERR_ILLEGAL_PARAM)
        })
    }

    fn pri_get_wavelength_idx(&self, dev: i32, slot: i32) -> TransportResult<i32> {
        self.prima("pri_get_wavelength_idx", dev, slot, |pri| Ok(pri.wavelength_idx))
    }

    fn pri_set_wavelength_idx(&self, dev: i32, slot: i32, wl_idx: i32) -> TransportResult<()> {
        self.prima("pri_set_wavelength_idx", dev, slot, |pri| {
            check(usize::try_from(wl_idx).is_ok_and(|i| i < pri.wavelengths_nm.len()))?;
            pri.wavelength_idx = wl_idx;
            Ok(())
        })
    }

    fn pri_get_intensity(&self, dev: i32, slot: i32, wl_idx: i32) -> TransportResult<u16> {
        self.prima("pri_get_intensity", dev, slot, |pri| {
            usize::try_from(wl_idx)
                .ok()
                .and_then(|i| pri.intensity.get(i))
                .copied()
                .ok_or(ERR_ILLEGAL_PARAM)
        })
    }

    fn pri_set_intensity(
        &self,
        dev: i32,
        slot: i32,
        wl_idx: i32,
        intensity: u16,
    ) -> TransportResult<()> {
        self.prima("pri_set_intensity", dev, slot, |pri| {
            check(intensity <= 1000)?;
            let entry = usize::try_from(wl_idx)
                .ok()
                .and_then(|i| pri.intensity.get_mut(i))
                .ok_or(ERR_ILLEGAL_PARAM)?;
            *entry = intensity;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_calls_need_open_device_and_map() {
        let sim = SimulatedTransport::with_device(0, SimDevice::standard());
        assert_eq!(sim.scm_get_laser_soft_lock(0, 100), Err(ERR_NOT_OPEN));
        sim.usb_open_device(0).unwrap();
        assert_eq!(sim.scm_get_laser_soft_lock(0, 100), Err(ERR_NO_MAP));
        sim.fwr_get_module_map(0, false).unwrap();
        assert_eq!(sim.scm_get_laser_soft_lock(0, 100), Ok(true));
        assert_eq!(sim.scm_get_laser_soft_lock(0, 999), Err(ERR_NO_SUCH_SLOT));
    }

    #[test]
    fn test_family_mismatch() {
        let sim = SimulatedTransport::with_device(0, SimDevice::with_som());
        sim.usb_open_device(0).unwrap();
        sim.fwr_get_module_map(0, false).unwrap();
        assert!(sim
            .som_get_burst_values(0, 200, OscillatorFamily::Som)
            .is_ok());
        assert_eq!(
            sim.som_get_burst_values(0, 200, OscillatorFamily::Somd),
            Err(ERR_WRONG_MODULE)
        );
        assert_eq!(
            sim.som_set_burst_values(
                0,
                200,
                OscillatorFamily::Som,
                BurstValues {
                    divider: 256,
                    presync: 0,
                    mask_sync: 0
                }
            ),
            Err(ERR_ILLEGAL_PARAM)
        );
    }

    #[test]
    fn test_busy_device() {
        let sim = SimulatedTransport::with_device(0, SimDevice::standard().busy());
        assert_eq!(sim.usb_open_device(0), Err(StatusCode::DEVICE_BUSY));
        assert!(!sim.is_open(0));
    }

    #[test]
    fn test_calls_are_recorded() {
        let sim = SimulatedTransport::with_device(0, SimDevice::standard());
        sim.usb_open_device(0).unwrap();
        sim.fwr_get_module_map(0, false).unwrap();
        sim.scm_set_laser_soft_lock(0, 100, false).unwrap();
        let calls = sim.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[2],
            CallRecord {
                operation: "scm_set_laser_soft_lock",
                device: Some(0),
                slot: Some(100)
            }
        );
    }

    #[test]
    fn test_injected_fault() {
        let sim = SimulatedTransport::with_device(0, SimDevice::standard());
        sim.fail_on("usb_open_device", StatusCode(-9003));
        assert_eq!(sim.usb_open_device(0), Err(StatusCode(-9003)));
        sim.clear_faults();
        assert!(sim.usb_open_device(0).is_ok());
    }
}
