//! Laser Controller Test Suite
//!
//! Covers the SLM driver and the Prima multi-wavelength laser.
//!
//! # Test Coverage
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_slm_status` | Decoded trigger mode and head type |
//! | `test_prima_pulsed_needs_frequency` | MissingFrequency before any transport call |
//! | `test_prima_pulsed_sequence` | Limits read, then mode, frequency, trigger source in order |
//! | `test_prima_frequency_out_of_limits` | Frequency checked before the mode is written |
//! | `test_prima_rejected_by_hardware` | Hardware rejection mid-sequence leaves partial state |
//! | `test_prima_intensity_uses_current_wavelength` | Intensity follows the wavelength index |
//! | `test_prima_limits` | Gating and trigger level checked against hardware limits |
//! | `test_prima_status_reports_limits` | Frequency, trigger level and gating limits in the status |

mod common;

use daq_driver_sepia::sim::ModuleState;
use daq_driver_sepia::{ErrorClass, LaserStatus, OperationMode, SepiaError, StatusCode};

use common::{PRI_SLOT, SLM_SLOT};

// =============================================================================
// SLM
// =============================================================================

#[test]
fn test_slm_status() {
    let (_sim, chassis) = common::standard();
    let slm = chassis.laser(0).unwrap().as_simple().unwrap();

    slm.set_pulse_parameters(3, false).unwrap();
    slm.set_intensity(12.5).unwrap();

    let status = slm.get_current_status().unwrap();
    assert_eq!(status.slot_id, SLM_SLOT);
    assert_eq!(status.trigger_mode, 3);
    assert_eq!(status.trigger_mode_name, "10 MHz");
    assert!(!status.pulsed);
    assert_eq!(status.head_type_name, "pulsed laser diode");
    assert!((status.intensity_percent - 12.5).abs() < 1e-9);
}

#[test]
fn test_slm_intensity_out_of_range() {
    let (sim, chassis) = common::standard();
    let err = chassis.laser(0).unwrap().set_intensity(101.0).unwrap_err();
    assert_eq!(err.class(), ErrorClass::CallerContract);
    assert_eq!(sim.call_count(), 0);
}

#[test]
fn test_slm_rejected_trigger_mode() {
    let (_sim, chassis) = common::standard();
    let slm = chassis.laser(0).unwrap().as_simple().unwrap();
    let err = slm.set_pulse_parameters(12, true).unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transport);
    assert_eq!(err.status_code(), Some(StatusCode(-1204)));
    assert!(err.to_string().contains("illegal parameter"));
}

// =============================================================================
// Prima
// =============================================================================

#[test]
fn test_prima_pulsed_needs_frequency() {
    let (sim, chassis) = common::standard();
    let pri = chassis.laser(2).unwrap().as_tunable().unwrap();

    for mode in [OperationMode::NarrowPulse, OperationMode::BroadPulse] {
        let err = pri.set_laser_parameters(mode, 0, None).unwrap_err();
        assert!(matches!(err, SepiaError::MissingFrequency { .. }));
        assert_eq!(err.class(), ErrorClass::CallerContract);
    }
    assert_eq!(sim.call_count(), 0);
}

#[test]
fn test_prima_pulsed_sequence() {
    let (sim, chassis) = common::standard();
    let pri = chassis.laser(2).unwrap().as_tunable().unwrap();

    pri.set_laser_parameters(OperationMode::BroadPulse, 1, Some(2_000_000))
        .unwrap();
    assert_eq!(
        sim.operations(),
        vec![
            "pri_get_frequency_limits",
            "pri_set_operation_mode",
            "pri_set_frequency",
            "pri_set_trigger_source"
        ]
    );

    let state = sim.module(0, PRI_SLOT).unwrap();
    let state = state.prima_state().unwrap();
    assert_eq!(state.operation_mode, 2);
    assert_eq!(state.frequency_hz, 2_000_000);
    assert_eq!(state.trigger_source, 1);
}

#[test]
fn test_prima_continuous_ignores_frequency() {
    let (sim, chassis) = common::standard();
    let pri = chassis.laser(2).unwrap().as_tunable().unwrap();

    pri.set_laser_parameters(OperationMode::Cw, 2, Some(5)).unwrap();
    assert_eq!(sim.operations(), vec!["pri_set_operation_mode"]);
}

#[test]
fn test_prima_intensity_uses_current_wavelength() {
    let (sim, chassis) = common::standard();
    let pri = chassis.laser(2).unwrap().as_tunable().unwrap();

    pri.set_wavelength_index(2).unwrap();
    chassis.laser(2).unwrap().set_intensity(25.0).unwrap();

    let state = sim.module(0, PRI_SLOT).unwrap();
    assert_eq!(state.prima_state().unwrap().intensity, vec![0, 0, 250]);

    let err = pri.set_wavelength_index(3).unwrap_err();
    assert!(matches!(err, SepiaError::OutOfRange { max: 2, .. }));
}

#[test]
fn test_prima_limits() {
    let (sim, chassis) = common::standard();
    let pri = chassis.laser(2).unwrap().as_tunable().unwrap();

    let err = pri.set_gating(10, 5, true).unwrap_err();
    assert!(matches!(
        err,
        SepiaError::OutOfRange {
            parameter: "gating on time",
            ..
        }
    ));
    assert!(!sim.operations().contains(&"pri_set_gating_data"));

    pri.set_gating(200, 4, true).unwrap();
    let err = pri.set_trigger_level(1500).unwrap_err();
    assert_eq!(err.class(), ErrorClass::CallerContract);
    pri.set_trigger_level(-500).unwrap();
    pri.set_gate_high_impedance(true).unwrap();

    let status = pri.get_current_status().unwrap();
    assert_eq!(status.gating.on_time, 200);
    assert_eq!(status.gating.off_time_factor, 4);
    assert!(status.gating_enabled);
    assert_eq!(status.trigger_level_mv, -500);
    assert!(status.gate_high_impedance);
}

#[test]
fn test_prima_device_info_and_status() {
    let (_sim, chassis) = common::standard();
    let pri = chassis.laser(2).unwrap().as_tunable().unwrap();

    let info = pri.device_info().unwrap();
    assert_eq!(info.device_type, "Prima");
    assert_eq!(info.wavelengths_nm, vec![405, 510, 640]);

    pri.set_wavelength_index(1).unwrap();
    pri.set_laser_parameters(OperationMode::NarrowPulse, 0, Some(40_000_000))
        .unwrap();

    match chassis.laser(2).unwrap().get_current_status().unwrap() {
        LaserStatus::Tunable(status) => {
            assert_eq!(status.operation_mode_name, "narrow pulse");
            assert_eq!(status.trigger_source_name, "internal");
            assert!(status.frequency_enabled);
            assert!(!status.trigger_level_enabled);
            assert_eq!(status.wavelength_nm, 510);
            assert_eq!(status.frequency_hz, 40_000_000);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_prima_status_reports_limits() {
    let (_sim, chassis) = common::standard();
    let pri = chassis.laser(2).unwrap().as_tunable().unwrap();

    let status = pri.get_current_status().unwrap();
    assert_eq!(status.frequency_limits.min, 1_000);
    assert_eq!(status.frequency_limits.max, 80_000_000);
    assert_eq!(status.trigger_level_limits.min_mv, -1000);
    assert_eq!(status.trigger_level_limits.max_mv, 1000);
    assert_eq!(status.trigger_level_limits.resolution_mv, 20);
    assert_eq!(status.gating_limits.on_time.min, 20);
    assert_eq!(status.gating_limits.on_time.max, 1_000_000);
    assert_eq!(status.gating_limits.off_time_factor.min, 1);
    assert_eq!(status.gating_limits.off_time_factor.max, 1000);
}

#[test]
fn test_prima_frequency_out_of_limits() {
    let (sim, chassis) = common::standard();
    let pri = chassis.laser(2).unwrap().as_tunable().unwrap();

    for frequency_hz in [10, 80_000_001] {
        let err = pri
            .set_laser_parameters(OperationMode::NarrowPulse, 0, Some(frequency_hz))
            .unwrap_err();
        assert_eq!(
            err,
            SepiaError::OutOfRange {
                parameter: "frequency",
                value: i64::from(frequency_hz),
                min: 1_000,
                max: 80_000_000,
            }
        );
        assert_eq!(err.class(), ErrorClass::CallerContract);
    }
    assert_eq!(
        sim.operations(),
        vec!["pri_get_frequency_limits", "pri_get_frequency_limits"]
    );

    match sim.module(0, PRI_SLOT).unwrap().state {
        ModuleState::TunableLaser(state) => {
            assert_eq!(state.operation_mode, 0);
            assert_eq!(state.frequency_hz, 1_000_000);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_prima_rejected_by_hardware() {
    let (sim, chassis) = common::standard();
    let pri = chassis.laser(2).unwrap().as_tunable().unwrap();

    let err = pri
        .set_laser_parameters(OperationMode::NarrowPulse, 9, Some(2_000_000))
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::Transport);
    assert_eq!(
        sim.operations(),
        vec![
            "pri_get_frequency_limits",
            "pri_set_operation_mode",
            "pri_set_frequency",
            "pri_set_trigger_source"
        ]
    );

    match sim.module(0, PRI_SLOT).unwrap().state {
        ModuleState::TunableLaser(state) => {
            assert_eq!(state.operation_mode, 1);
            assert_eq!(state.frequency_hz, 2_000_000);
            assert_eq!(state.trigger_source, 0);
        }
        other => panic!("unexpected {other:?}"),
    }
}
