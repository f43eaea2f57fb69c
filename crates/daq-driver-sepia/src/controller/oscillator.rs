//! Oscillator / sequencer controller (SOM 828 and SOM 828-D).
//!
//! The oscillator divides its trigger source into the pulse train shared by
//! all laser drivers, and gates that train onto eight sequencer outputs. The
//! SOMD additionally delays or combines individual outputs.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::controller::{validate_channel, Channels, CHANNEL_COUNT};
use crate::device::DeviceHandle;
use crate::error::{Result, SepiaError};
use crate::module_map::ModuleDescriptor;
use crate::transport::{
    AuxIoControl, BurstValues, FreqTrigMode, OscillatorFamily, OutSyncEnable, SeqOutputInfos,
    SeqOutputWrite, Transport, TransportResult,
};

/// Trigger mode code selecting the internal 80 MHz clock.
pub const INTERNAL_TRIGGER_80MHZ: i32 = 2;

/// Frequency of the internal clock in MHz.
pub const BASE_CLOCK_MHZ: f64 = 80.0;

/// Result of [`OscillatorController::set_clock_internal`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClockSetting {
    /// Divider written to the pre-scaler.
    pub divider: u16,
    /// `80 / divider`, the frequency the hardware actually produces.
    pub actual_mhz: f64,
}

/// Delay applied to one sequencer output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Delay {
    /// Coarse delay in nanoseconds.
    pub coarse_ns: f64,
    /// Fine delay steps.
    pub fine_steps: u8,
}

/// Delay resolution of a SOMD for its current clock configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DelayUnits {
    /// Coarse step width in nanoseconds.
    pub coarse_step_ns: f64,
    /// Fine steps available.
    pub fine_steps_max: u8,
}

/// Configuration of one sequencer output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SeqOutput {
    /// The output carries its own pulse, delayed.
    Delayed(Delay),
    /// The output carries the combination of other channels' bursts.
    Combined {
        /// Channels whose bursts are combined.
        channels: Channels,
        /// Combined bursts are masked.
        masked: bool,
        /// Delay the hardware keeps in the coupled fields.
        retained: Delay,
    },
}

impl SeqOutput {
    fn from_raw(raw: &SeqOutputInfos) -> Self {
        let delay = Delay {
            coarse_ns: raw.delay_coarse_ns,
            fine_steps: raw.delay_fine,
        };
        if raw.delayed && !raw.force_undelayed {
            Self::Delayed(delay)
        } else {
            Self::Combined {
                channels: Channels::from_hardware_mask(raw.out_combi),
                masked: raw.masked_combi,
                retained: delay,
            }
        }
    }
}

impl fmt::Display for SeqOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delayed(delay) => write!(
                f,
                "delayed {:.2} ns and {} a.u.",
                delay.coarse_ns, delay.fine_steps
            ),
            Self::Combined {
                channels, masked, ..
            } => write!(
                f,
                "undelayed, combining {:?}, masked: {}",
                channels.to_vec(),
                masked
            ),
        }
    }
}

/// AUX IN control of the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AuxInMode {
    /// Sequencer runs regardless of AUX IN.
    FreeRunning = 0,
    /// Sequencer runs while AUX IN is high.
    AuxHigh = 1,
    /// Sequencer runs while AUX IN is low.
    AuxLow = 2,
    /// Sequencer stopped.
    Disabled = 3,
}

impl AuxInMode {
    /// Hardware code of the mode.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Mode for a hardware code, `None` for unknown codes.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::FreeRunning),
            1 => Some(Self::AuxHigh),
            2 => Some(Self::AuxLow),
            3 => Some(Self::Disabled),
            _ => None,
        }
    }
}

/// Rendered state of one sequencer output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSummary {
    /// Output channel index.
    pub channel: usize,
    /// Decoded sequencer record.
    pub output: SeqOutput,
    /// Human readable summary of the record.
    pub description: String,
}

/// Snapshot of every readable oscillator parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OscillatorStatus {
    /// SOM or SOMD.
    pub family: OscillatorFamily,
    /// Slot of the oscillator.
    pub slot_id: i32,
    /// Trigger mode code.
    pub trigger_mode: i32,
    /// Trigger mode as decoded by the module.
    pub trigger_mode_name: String,
    /// SOMD only.
    pub sync_now: Option<bool>,
    /// Pre-scaler values.
    pub burst_values: BurstValues,
    /// Present only while running from the internal clock.
    pub clock_mhz: Option<f64>,
    /// Burst length per output channel.
    pub burst_lengths: [u32; 8],
    /// Enabled outputs.
    pub outputs: Channels,
    /// Outputs contributing to SYNC.
    pub sync_channels: Channels,
    /// SYNC polarity inverted.
    pub sync_invert: bool,
    /// AUX IN sequencer control code.
    pub aux_in: u8,
    /// AUX IN control as decoded by the library.
    pub aux_in_name: String,
    /// AUX OUT enabled.
    pub aux_out: bool,
    /// SOMD only; empty on a SOM.
    pub channels: Vec<ChannelSummary>,
}

/// Controller for a SOM or SOMD module.
#[derive(Debug)]
pub struct OscillatorController {
    device: DeviceHandle,
    descriptor: ModuleDescriptor,
    family: OscillatorFamily,
}

impl OscillatorController {
    /// `None` if the descriptor is not an oscillator.
    pub(crate) fn new(device: DeviceHandle, descriptor: ModuleDescriptor) -> Option<Self> {
        let family = descriptor.module_type.oscillator_family()?;
        debug!(slot_id = descriptor.slot_id, %family, "Created oscillator controller");
        Some(Self {
            device,
            descriptor,
            family,
        })
    }

    /// Slot and type of the module.
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// SOM or SOMD.
    pub fn family(&self) -> OscillatorFamily {
        self.family
    }

    fn call<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&dyn Transport, i32, i32, OscillatorFamily) -> TransportResult<T>,
    ) -> Result<T> {
        let slot = self.descriptor.slot_id;
        let family = self.family;
        self.device.call(operation, |t, dev| f(t, dev, slot, family))
    }

    fn require_somd(&self, operation: &'static str) -> Result<()> {
        match self.family {
            OscillatorFamily::Somd => Ok(()),
            OscillatorFamily::Som => Err(SepiaError::Unsupported {
                module: self.family.to_string(),
                operation,
            }),
        }
    }

    /// Select a trigger source by code.
    ///
    /// `sync_now` exists on the SOMD only.
    pub fn set_trigger_mode(&self, mode: i32, sync_now: bool) -> Result<()> {
        if sync_now {
            self.require_somd("set_trigger_mode(sync_now)")?;
        }
        self.call("som_set_freq_trig_mode", |t, dev, slot, family| {
            t.som_set_freq_trig_mode(dev, slot, family, FreqTrigMode { mode, sync_now })
        })
    }

    /// Run from the internal 80 MHz clock divided down towards `target_mhz`.
    pub fn set_clock_internal(&self, target_mhz: f64) -> Result<ClockSetting> {
        if !target_mhz.is_finite() || target_mhz <= 0.0 {
            return Err(SepiaError::invalid_argument(format!(
                "clock frequency {target_mhz} MHz must be positive"
            )));
        }
        let max = f64::from(self.family.max_divider());
        // Clamped into 1..=max_divider, so the cast cannot truncate.
        let divider = (BASE_CLOCK_MHZ / target_mhz).round().clamp(1.0, max) as u16;

        self.set_trigger_mode(INTERNAL_TRIGGER_80MHZ, false)?;
        self.call("som_set_burst_values", |t, dev, slot, family| {
            t.som_set_burst_values(
                dev,
                slot,
                family,
                BurstValues {
                    divider,
                    presync: 0,
                    mask_sync: 0,
                },
            )
        })?;

        let setting = ClockSetting {
            divider,
            actual_mhz: BASE_CLOCK_MHZ / f64::from(divider),
        };
        info!(
            slot_id = self.descriptor.slot_id,
            target_mhz,
            divider,
            actual_mhz = setting.actual_mhz,
            "Oscillator running from internal clock"
        );
        Ok(setting)
    }

    /// Enable `output`, optionally changing the sync channels and sync
    /// polarity. Omitted fields keep their current hardware values.
    pub fn set_output(
        &self,
        output: &Channels,
        sync: Option<&Channels>,
        sync_invert: Option<bool>,
    ) -> Result<()> {
        let current = self.call("som_get_out_n_sync_enable", |t, dev, slot, family| {
            t.som_get_out_n_sync_enable(dev, slot, family)
        })?;
        let value = OutSyncEnable {
            out_enable: output.to_hardware_mask(),
            sync_enable: sync.map_or(current.sync_enable, |s| s.to_hardware_mask()),
            sync_inverse: sync_invert.unwrap_or(current.sync_inverse),
        };
        debug!(
            slot_id = self.descriptor.slot_id,
            outputs = ?output,
            sync_enable = value.sync_enable,
            sync_inverse = value.sync_inverse,
            "Setting output enable"
        );
        self.call("som_set_out_n_sync_enable", |t, dev, slot, family| {
            t.som_set_out_n_sync_enable(dev, slot, family, value)
        })
    }

    /// Current delay resolution. Only valid until the clock changes.
    pub fn delay_units(&self) -> Result<DelayUnits> {
        self.require_somd("delay_units")?;
        let raw = self.call("somd_get_delay_units", |t, dev, slot, _| {
            t.somd_get_delay_units(dev, slot)
        })?;
        Ok(DelayUnits {
            coarse_step_ns: raw.coarse_step_s * 1e9,
            fine_steps_max: raw.fine_steps_max,
        })
    }

    /// Sequencer record of one output.
    pub fn seq_output(&self, channel: usize) -> Result<SeqOutput> {
        self.require_somd("seq_output")?;
        let raw = self.read_seq_output(channel)?;
        Ok(SeqOutput::from_raw(&raw))
    }

    fn read_seq_output(&self, channel: usize) -> Result<SeqOutputInfos> {
        let output = output_index(channel)?;
        self.call("somd_get_seq_output_infos", |t, dev, slot, _| {
            t.somd_get_seq_output_infos(dev, slot, output)
        })
    }

    fn write_seq_output(&self, channel: usize, record: SeqOutputWrite) -> Result<()> {
        let output = output_index(channel)?;
        self.call("somd_set_seq_output_infos", |t, dev, slot, _| {
            t.somd_set_seq_output_infos(dev, slot, output, record)
        })
    }

    /// Delay `channel` by `coarse_ns` plus `fine_steps`.
    ///
    /// The coarse delay is floored to a whole number of coarse steps, the
    /// fine steps clamped to what the clock configuration allows. Returns
    /// the delay the hardware reports back.
    pub fn set_delay(&self, channel: usize, coarse_ns: f64, fine_steps: u8) -> Result<Delay> {
        self.require_somd("set_delay")?;
        validate_channel(channel)?;
        if !coarse_ns.is_finite() || coarse_ns < 0.0 {
            return Err(SepiaError::invalid_argument(format!(
                "delay {coarse_ns} ns must be finite and non-negative"
            )));
        }

        let units = self.delay_units()?;
        let step = units.coarse_step_ns;
        let target = if step > 0.0 {
            ((coarse_ns / step + 1e-9).floor() * step).min(coarse_ns)
        } else {
            coarse_ns
        };
        let fine = fine_steps.min(units.fine_steps_max);

        self.write_seq_output(
            channel,
            SeqOutputWrite {
                delayed: true,
                out_combi: Channels::single(channel)?.to_hardware_mask(),
                masked_combi: false,
                delay_coarse_ns: target,
                delay_fine: fine,
            },
        )?;

        let applied = match SeqOutput::from_raw(&self.read_seq_output(channel)?) {
            SeqOutput::Delayed(delay) => delay,
            SeqOutput::Combined { retained, .. } => {
                warn!(channel, "Output reads back undelayed after delay was set");
                retained
            }
        };
        debug!(
            channel,
            requested_ns = coarse_ns,
            applied_ns = applied.coarse_ns,
            fine_steps = applied.fine_steps,
            "Sequencer delay set"
        );
        Ok(applied)
    }

    /// Burst length per sequencer step.
    pub fn set_burst_array(&self, lengths: [u32; 8]) -> Result<()> {
        self.call("som_set_burst_length_array", |t, dev, slot, family| {
            t.som_set_burst_length_array(dev, slot, family, lengths)
        })
    }

    /// Make `channel` output the combination of `combine_with`, keeping
    /// its stored delay.
    pub fn set_combiner(&self, channel: usize, combine_with: &Channels, masked: bool) -> Result<()> {
        self.require_somd("set_combiner")?;
        let current = self.read_seq_output(channel)?;
        self.write_seq_output(
            channel,
            SeqOutputWrite {
                delayed: false,
                out_combi: combine_with.to_hardware_mask(),
                masked_combi: masked,
                delay_coarse_ns: current.delay_coarse_ns,
                delay_fine: current.delay_fine,
            },
        )
    }

    /// Configure AUX OUT and AUX IN sequencer control.
    pub fn set_sequencer(&self, aux_out: bool, aux_in: AuxInMode) -> Result<()> {
        self.call("som_set_aux_io_sequencer_ctrl", |t, dev, slot, family| {
            t.som_set_aux_io_sequencer_ctrl(
                dev,
                slot,
                family,
                AuxIoControl {
                    aux_out,
                    aux_in: aux_in.code(),
                },
            )
        })
    }

    /// Resynchronize the SOMD sequencer.
    pub fn synchronize_now(&self) -> Result<()> {
        self.require_somd("synchronize_now")?;
        self.call("somd_synchronize_now", |t, dev, slot, _| {
            t.somd_synchronize_now(dev, slot)
        })
    }

    /// Read every parameter. Fails on the first failing read.
    pub fn get_current_status(&self) -> Result<OscillatorStatus> {
        let mode = self.call("som_get_freq_trig_mode", |t, dev, slot, family| {
            t.som_get_freq_trig_mode(dev, slot, family)
        })?;
        let trigger_mode_name = self.call("som_decode_freq_trig_mode", |t, dev, slot, family| {
            t.som_decode_freq_trig_mode(dev, slot, family, mode.mode)
        })?;
        let burst_values = self.call("som_get_burst_values", |t, dev, slot, family| {
            t.som_get_burst_values(dev, slot, family)
        })?;
        let clock_mhz = (mode.mode == INTERNAL_TRIGGER_80MHZ && burst_values.divider > 0)
            .then(|| BASE_CLOCK_MHZ / f64::from(burst_values.divider));
        let burst_lengths = self.call("som_get_burst_length_array", |t, dev, slot, family| {
            t.som_get_burst_length_array(dev, slot, family)
        })?;
        let enable = self.call("som_get_out_n_sync_enable", |t, dev, slot, family| {
            t.som_get_out_n_sync_enable(dev, slot, family)
        })?;
        let aux = self.call("som_get_aux_io_sequencer_ctrl", |t, dev, slot, family| {
            t.som_get_aux_io_sequencer_ctrl(dev, slot, family)
        })?;
        let family = self.family;
        let aux_in_name = self.device.offline("som_decode_aux_in_sequencer_ctrl", |t| {
            t.som_decode_aux_in_sequencer_ctrl(family, aux.aux_in)
        })?;

        let channels = match self.family {
            OscillatorFamily::Som => Vec::new(),
            OscillatorFamily::Somd => (0..CHANNEL_COUNT)
                .map(|channel| {
                    let output = SeqOutput::from_raw(&self.read_seq_output(channel)?);
                    Ok(ChannelSummary {
                        channel,
                        description: output.to_string(),
                        output,
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        Ok(OscillatorStatus {
            family: self.family,
            slot_id: self.descriptor.slot_id,
            trigger_mode: mode.mode,
            trigger_mode_name,
            sync_now: (self.family == OscillatorFamily::Somd).then_some(mode.sync_now),
            burst_values,
            clock_mhz,
            burst_lengths,
            outputs: Channels::from_hardware_mask(enable.out_enable),
            sync_channels: Channels::from_hardware_mask(enable.sync_enable),
            sync_invert: enable.sync_inverse,
            aux_in: aux.aux_in,
            aux_in_name,
            aux_out: aux.aux_out,
            channels,
        })
    }
}

fn output_index(channel: usize) -> Result<u8> {
    validate_channel(channel)?;
    u8::try_from(channel).map_err(|_| SepiaError::InvalidChannel { channel })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_output_from_raw() {
        let raw = SeqOutputInfos {
            delayed: true,
            force_undelayed: false,
            out_combi: 0x80,
            masked_combi: false,
            delay_coarse_ns: 12.5,
            delay_fine: 3,
        };
        assert_eq!(
            SeqOutput::from_raw(&raw),
            SeqOutput::Delayed(Delay {
                coarse_ns: 12.5,
                fine_steps: 3
            })
        );

        let forced = SeqOutputInfos {
            force_undelayed: true,
            out_combi: 0b1001_0000,
            ..raw
        };
        match SeqOutput::from_raw(&forced) {
            SeqOutput::Combined {
                channels, retained, ..
            } => {
                assert_eq!(channels.to_vec(), vec![0, 3]);
                assert_eq!(retained.fine_steps, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_summary_text() {
        let delayed = SeqOutput::Delayed(Delay {
            coarse_ns: 3.126,
            fine_steps: 4,
        });
        assert_eq!(delayed.to_string(), "delayed 3.13 ns and 4 a.u.");

        let combined = SeqOutput::Combined {
            channels: Channels::from_slice(&[1, 2]).unwrap(),
            masked: true,
            retained: Delay {
                coarse_ns: 0.0,
                fine_steps: 0,
            },
        };
        assert_eq!(
            combined.to_string(),
            "undelayed, combining [1, 2], masked: true"
        );
    }

    #[test]
    fn test_aux_in_codes() {
        for code in 0..4 {
            assert_eq!(AuxInMode::from_code(code).map(AuxInMode::code), Some(code));
        }
        assert_eq!(AuxInMode::from_code(4), None);
    }
}
