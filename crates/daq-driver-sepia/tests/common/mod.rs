//! Shared fixtures for the simulated-chassis test suites.

#![allow(dead_code)]

use std::sync::Arc;

use daq_driver_sepia::sim::{SimDevice, SimulatedTransport};
use daq_driver_sepia::{Chassis, ChassisConfig};

/// Slot ids of [`SimDevice::standard`].
pub const SCM_SLOT: i32 = 100;
pub const OSC_SLOT: i32 = 200;
pub const SLM_SLOT: i32 = 300;
pub const SLM2_SLOT: i32 = 400;
pub const PRI_SLOT: i32 = 500;

/// Open a chassis on a simulated device at index 0 and clear the call log.
pub fn open(device: SimDevice) -> (Arc<SimulatedTransport>, Chassis) {
    let sim = Arc::new(SimulatedTransport::with_device(0, device));
    let chassis = Chassis::open(sim.clone(), &ChassisConfig::default()).unwrap();
    sim.clear_calls();
    (sim, chassis)
}

/// Standard chassis: SCM, SOMD, two SLM, a Prima and a backplane.
pub fn standard() -> (Arc<SimulatedTransport>, Chassis) {
    open(SimDevice::standard())
}
