//! Oscillator Controller Test Suite
//!
//! # Test Coverage
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_set_output_preserves_sync` | Omitted sync fields keep hardware values |
//! | `test_set_output_no_write_after_failed_read` | Read-merge-write aborts on read failure |
//! | `test_set_delay_floors_to_step` | Coarse delay never exceeds the request |
//! | `test_set_delay_clamps_fine_steps` | Fine steps limited by the delay units |
//! | `test_set_combiner_preserves_delay` | Combining keeps the stored delay |
//! | `test_som_rejects_somd_operations` | SOMD-only calls fail before transport |

mod common;

use daq_driver_sepia::sim::{SimDevice, COARSE_STEP_S, FINE_STEPS_MAX};
use daq_driver_sepia::{AuxInMode, Channels, ErrorClass, SepiaError, SeqOutput, StatusCode};

use common::OSC_SLOT;

// =============================================================================
// Outputs
// =============================================================================

#[test]
fn test_set_output_preserves_sync() {
    let (sim, chassis) = common::standard();
    let osc = chassis.oscillator().unwrap();

    osc.set_output(&Channels::from_slice(&[2, 5]).unwrap(), None, None)
        .unwrap();
    let state = sim.module(0, OSC_SLOT).unwrap();
    let state = state.oscillator().unwrap();
    assert_eq!(state.out_enable, 0b0010_0100);
    assert_eq!(state.sync_enable, 0x80);
    assert!(!state.sync_inverse);

    osc.set_output(&Channels::none(), None, Some(true)).unwrap();
    let state = sim.module(0, OSC_SLOT).unwrap();
    let state = state.oscillator().unwrap();
    assert_eq!(state.out_enable, 0);
    assert_eq!(state.sync_enable, 0x80);
    assert!(state.sync_inverse);
}

#[test]
fn test_set_output_no_write_after_failed_read() {
    let (sim, chassis) = common::standard();
    sim.fail_on("som_get_out_n_sync_enable", StatusCode(-1204));

    let err = chassis
        .oscillator()
        .unwrap()
        .set_output(&Channels::single(1).unwrap(), None, None)
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transport);
    assert!(!sim.operations().contains(&"som_set_out_n_sync_enable"));
    sim.clear_faults();
}

// =============================================================================
// Delays and combiners
// =============================================================================

#[test]
fn test_delay_units() {
    let (_sim, chassis) = common::standard();
    let units = chassis.oscillator().unwrap().delay_units().unwrap();
    assert!((units.coarse_step_ns - COARSE_STEP_S * 1e9).abs() < 1e-12);
    assert_eq!(units.fine_steps_max, FINE_STEPS_MAX);
}

#[test]
fn test_set_delay_floors_to_step() {
    let (_sim, chassis) = common::standard();
    let osc = chassis.oscillator().unwrap();
    let step = COARSE_STEP_S * 1e9;

    for request in [0.0, 0.5, 12.0, 12.5, 100.3, 999.9] {
        let applied = osc.set_delay(3, request, 0).unwrap();
        assert!(applied.coarse_ns <= request, "request {request}");
        assert!(request - applied.coarse_ns < step, "request {request}");
        let steps = applied.coarse_ns / step;
        assert!((steps - steps.round()).abs() < 1e-6, "request {request}");
    }

    let applied = osc.set_delay(3, 12.0, 0).unwrap();
    assert!((applied.coarse_ns - 11.718_75).abs() < 1e-6);
}

#[test]
fn test_set_delay_clamps_fine_steps() {
    let (_sim, chassis) = common::standard();
    let osc = chassis.oscillator().unwrap();

    assert_eq!(osc.set_delay(0, 5.0, 200).unwrap().fine_steps, FINE_STEPS_MAX);
    assert_eq!(osc.set_delay(0, 5.0, 4).unwrap().fine_steps, 4);
}

#[test]
fn test_set_delay_refreshes_units_each_call() {
    let (sim, chassis) = common::standard();
    let osc = chassis.oscillator().unwrap();
    osc.set_delay(0, 5.0, 0).unwrap();
    osc.set_delay(1, 5.0, 0).unwrap();
    let refreshes = sim
        .operations()
        .iter()
        .filter(|op| **op == "somd_get_delay_units")
        .count();
    assert_eq!(refreshes, 2);
}

#[test]
fn test_set_delay_invalid_channel() {
    let (sim, chassis) = common::standard();
    let err = chassis.oscillator().unwrap().set_delay(8, 5.0, 0).unwrap_err();
    assert_eq!(err, SepiaError::InvalidChannel { channel: 8 });
    assert_eq!(sim.call_count(), 0);
}

#[test]
fn test_set_combiner_preserves_delay() {
    let (sim, chassis) = common::standard();
    let osc = chassis.oscillator().unwrap();

    let delay = osc.set_delay(4, 25.0, 6).unwrap();
    osc.set_combiner(4, &Channels::from_slice(&[0, 1]).unwrap(), true)
        .unwrap();

    match osc.seq_output(4).unwrap() {
        SeqOutput::Combined {
            channels,
            masked,
            retained,
        } => {
            assert_eq!(channels.to_vec(), vec![0, 1]);
            assert!(masked);
            assert_eq!(retained, delay);
        }
        other => panic!("unexpected {other:?}"),
    }

    let state = sim.module(0, OSC_SLOT).unwrap();
    assert_eq!(state.oscillator().unwrap().seq_outputs[4].out_combi, 0b1100_0000);
}

// =============================================================================
// Sequencer, status, family checks
// =============================================================================

#[test]
fn test_set_sequencer_and_synchronize() {
    let (sim, chassis) = common::standard();
    let osc = chassis.oscillator().unwrap();

    osc.set_sequencer(true, AuxInMode::AuxLow).unwrap();
    osc.synchronize_now().unwrap();

    let state = sim.module(0, OSC_SLOT).unwrap();
    let state = state.oscillator().unwrap();
    assert!(state.aux_out);
    assert_eq!(state.aux_in, 2);
    assert_eq!(state.synchronizations, 1);
}

#[test]
fn test_status_external_trigger_has_no_clock() {
    let (_sim, chassis) = common::standard();
    let osc = chassis.oscillator().unwrap();
    osc.set_trigger_mode(1, true).unwrap();

    let status = osc.get_current_status().unwrap();
    assert_eq!(status.trigger_mode, 1);
    assert_eq!(status.trigger_mode_name, "ext. falling");
    assert_eq!(status.sync_now, Some(true));
    assert_eq!(status.clock_mhz, None);
    assert_eq!(status.aux_in_name, "free running");
}

#[test]
fn test_som_rejects_somd_operations() {
    let (sim, chassis) = common::open(SimDevice::with_som());
    let osc = chassis.oscillator().unwrap();

    for err in [
        osc.set_delay(0, 1.0, 0).unwrap_err(),
        osc.set_combiner(0, &Channels::none(), false).unwrap_err(),
        osc.seq_output(0).unwrap_err(),
        osc.delay_units().unwrap_err(),
        osc.synchronize_now().unwrap_err(),
        osc.set_trigger_mode(2, true).unwrap_err(),
    ] {
        assert!(matches!(err, SepiaError::Unsupported { .. }), "{err}");
        assert_eq!(err.class(), ErrorClass::CallerContract);
    }
    assert_eq!(sim.call_count(), 0);

    let status = osc.get_current_status().unwrap();
    assert!(status.channels.is_empty());
    assert_eq!(status.sync_now, None);
}
