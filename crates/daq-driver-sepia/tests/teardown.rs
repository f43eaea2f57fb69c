//! Chassis Teardown Test Suite
//!
//! Dropping a chassis must lock the lasers before releasing the device;
//! closing it explicitly must leave them running.
//!
//! # Test Coverage
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_drop_locks_then_releases` | Softlock, free map, close, in that order |
//! | `test_close_leaves_lasers_running` | No softlock on explicit close |
//! | `test_drop_after_external_close` | Nothing sent when the device is already closed |
//! | `test_drop_without_safety_module` | No softlock attempt without an SCM |
//! | `test_drop_continues_after_lock_failure` | Map freed and device closed anyway |
//! | `test_close_reports_first_failure` | Close attempts both steps, returns the first error |

mod common;

use daq_driver_sepia::sim::{ModuleState, SimDevice, SimModule};
use daq_driver_sepia::{StatusCode, Transport};

use common::{OSC_SLOT, SCM_SLOT};

fn soft_locked(sim: &daq_driver_sepia::sim::SimulatedTransport) -> bool {
    match sim.module(0, SCM_SLOT).map(|m| m.state) {
        Some(ModuleState::Safety { soft_lock, .. }) => soft_lock,
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_drop_locks_then_releases() {
    let (sim, chassis) = common::standard();
    chassis.start_laser_simple(0, 27.0, 50.0, None).unwrap();
    assert!(!soft_locked(&sim));
    sim.clear_calls();

    drop(chassis);

    assert!(soft_locked(&sim));
    assert!(!sim.is_open(0));
    assert!(!sim.map_loaded(0));
    assert_eq!(
        sim.operations(),
        vec![
            "usb_is_open_device",
            "scm_set_laser_soft_lock",
            "fwr_free_module_map",
            "usb_close_device",
        ]
    );
}

#[test]
fn test_close_leaves_lasers_running() {
    let (sim, chassis) = common::standard();
    chassis.start_laser_simple(0, 27.0, 50.0, None).unwrap();
    sim.clear_calls();

    chassis.close().unwrap();

    assert!(!soft_locked(&sim));
    assert!(!sim.is_open(0));
    assert_eq!(sim.operations(), vec!["fwr_free_module_map", "usb_close_device"]);

    let osc = sim.module(0, OSC_SLOT).unwrap();
    assert_eq!(osc.oscillator().unwrap().out_enable, 0x80);
}

#[test]
fn test_drop_after_external_close() {
    let (sim, chassis) = common::standard();
    sim.usb_close_device(0).unwrap();
    sim.clear_calls();

    drop(chassis);

    assert_eq!(sim.operations(), vec!["usb_is_open_device"]);
}

#[test]
fn test_drop_without_safety_module() {
    let device = SimDevice::new("11")
        .with_module(SimModule::somd(200))
        .with_module(SimModule::simple_laser(300));
    let (sim, chassis) = common::open(device);

    drop(chassis);

    assert_eq!(
        sim.operations(),
        vec!["usb_is_open_device", "fwr_free_module_map", "usb_close_device"]
    );
}

#[test]
fn test_drop_continues_after_lock_failure() {
    let (sim, chassis) = common::standard();
    sim.fail_on("scm_set_laser_soft_lock", StatusCode(-1203));

    drop(chassis);

    assert!(!sim.is_open(0));
    assert!(!sim.map_loaded(0));
}

#[test]
fn test_close_reports_first_failure() {
    let (sim, chassis) = common::standard();
    sim.fail_on("fwr_free_module_map", StatusCode(-1201));

    let err = chassis.close().unwrap_err();
    assert_eq!(err.status_code(), Some(StatusCode(-1201)));
    assert!(!sim.is_open(0));
    assert!(!sim.operations().contains(&"scm_set_laser_soft_lock"));
}
