//! Module map discovery and classification.
//!
//! The firmware keeps a map of every module plugged into the chassis. Reading
//! it is the only way to learn what the chassis contains; the map must be
//! freed again before the USB handle is closed.

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::device::DeviceHandle;
use crate::error::Result;
use crate::transport::OscillatorFamily;

/// Classified module type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ModuleType {
    /// SOM 828 oscillator.
    OscillatorSom,
    /// SOM 828-D oscillator with sequencer delays.
    OscillatorSomd,
    /// SCM 828 safety module.
    Safety,
    /// SLM 828 laser driver.
    SimpleLaser,
    /// Prima multi-wavelength laser.
    TunableLaser,
    /// Anything else; carries the abbreviation as reported.
    Unrecognized(String),
}

impl ModuleType {
    /// Classify an abbreviated type tag.
    pub fn from_abbreviation(abbr: &str) -> Self {
        match abbr.trim() {
            "SOM" => Self::OscillatorSom,
            "SOMD" => Self::OscillatorSomd,
            "SCM" => Self::Safety,
            "SLM" => Self::SimpleLaser,
            "PRI" => Self::TunableLaser,
            other => Self::Unrecognized(other.to_string()),
        }
    }

    /// Oscillator family, if this is an oscillator.
    pub fn oscillator_family(&self) -> Option<OscillatorFamily> {
        match self {
            Self::OscillatorSom => Some(OscillatorFamily::Som),
            Self::OscillatorSomd => Some(OscillatorFamily::Somd),
            _ => None,
        }
    }

    /// SLM or Prima.
    pub fn is_laser(&self) -> bool {
        matches!(self, Self::SimpleLaser | Self::TunableLaser)
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OscillatorSom => write!(f, "SOM"),
            Self::OscillatorSomd => write!(f, "SOMD"),
            Self::Safety => write!(f, "SCM"),
            Self::SimpleLaser => write!(f, "SLM"),
            Self::TunableLaser => write!(f, "PRI"),
            Self::Unrecognized(abbr) => write!(f, "{abbr}"),
        }
    }
}

/// One discovered module. Immutable after discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleDescriptor {
    /// Position in the firmware map.
    pub map_index: i32,
    /// Slot id used to address the module.
    pub slot_id: i32,
    /// Primary (not secondary) module in its slot.
    pub is_primary: bool,
    /// The entry describes the backplane.
    pub is_backplane: bool,
    /// Module keeps an uptime counter.
    pub has_uptime_counter: bool,
    /// Raw module type code.
    pub type_code: i32,
    /// Abbreviated type tag as decoded by the library.
    pub abbreviation: String,
    /// Classified module type.
    pub module_type: ModuleType,
}

/// Ordered list of the modules of one chassis.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModuleMap {
    modules: Vec<ModuleDescriptor>,
}

impl ModuleMap {
    /// Read the firmware module map.
    ///
    /// `restart` reboots the firmware before mapping. Any failure aborts the
    /// whole discovery; no partial map is returned.
    pub fn discover(device: &DeviceHandle, restart: bool) -> Result<Self> {
        let count = device.call("fwr_get_module_map", |t, dev| {
            t.fwr_get_module_map(dev, restart)
        })?;
        debug!(device = device.index(), count, restart, "Reading module map");

        let mut modules = Vec::with_capacity(count.max(0) as usize);
        for map_index in 0..count {
            let info = device.call("fwr_get_module_info_by_map_idx", |t, dev| {
                t.fwr_get_module_info_by_map_idx(dev, map_index)
            })?;
            let type_code = device.call("com_get_module_type", |t, dev| {
                t.com_get_module_type(dev, info.slot_id, info.is_primary)
            })?;
            let abbreviation = device.offline("com_decode_module_type_abbr", |t| {
                t.com_decode_module_type_abbr(type_code)
            })?;
            let module_type = ModuleType::from_abbreviation(&abbreviation);

            debug!(
                map_index,
                slot_id = info.slot_id,
                primary = info.is_primary,
                module_type = %module_type,
                "Discovered module"
            );

            modules.push(ModuleDescriptor {
                map_index,
                slot_id: info.slot_id,
                is_primary: info.is_primary,
                is_backplane: info.is_backplane,
                has_uptime_counter: info.has_uptime_counter,
                type_code,
                abbreviation,
                module_type,
            });
        }

        info!(device = device.index(), modules = modules.len(), "Module map ready");
        Ok(Self { modules })
    }

    /// Free the library's module map.
    pub fn release(device: &DeviceHandle) -> Result<()> {
        debug!(device = device.index(), "Freeing module map");
        device.call("fwr_free_module_map", |t, dev| t.fwr_free_module_map(dev))
    }

    /// Long module type name for a raw type code.
    pub fn describe_long(device: &DeviceHandle, type_code: i32) -> Result<String> {
        device.offline("com_decode_module_type", |t| t.com_decode_module_type(type_code))
    }

    /// Modules in map order.
    pub fn iter(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.iter()
    }

    /// Number of modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// True for a chassis without modules.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// First module with the given slot id.
    pub fn find(&self, slot_id: i32) -> Option<&ModuleDescriptor> {
        self.modules.iter().find(|m| m.slot_id == slot_id)
    }

    /// All modules of a type, in discovery order.
    pub fn find_all(&self, module_type: &ModuleType) -> Vec<&ModuleDescriptor> {
        self.modules
            .iter()
            .filter(|m| &m.module_type == module_type)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::sim::{SimDevice, SimulatedTransport};
    use crate::transport::StatusCode;

    #[test]
    fn test_abbreviation_mapping() {
        assert_eq!(ModuleType::from_abbreviation("SOMD"), ModuleType::OscillatorSomd);
        assert_eq!(ModuleType::from_abbreviation("SOM"), ModuleType::OscillatorSom);
        assert_eq!(ModuleType::from_abbreviation("SCM"), ModuleType::Safety);
        assert_eq!(ModuleType::from_abbreviation("SLM"), ModuleType::SimpleLaser);
        assert_eq!(ModuleType::from_abbreviation("PRI"), ModuleType::TunableLaser);
        assert_eq!(
            ModuleType::from_abbreviation("VUV"),
            ModuleType::Unrecognized("VUV".into())
        );
    }

    #[test]
    fn test_discover_in_order() {
        let sim = Arc::new(SimulatedTransport::with_device(0, SimDevice::standard()));
        let device = DeviceHandle::new(sim.clone(), 0).unwrap();
        device.open().unwrap();

        let map = ModuleMap::discover(&device, false).unwrap();
        let slots: Vec<i32> = map.iter().map(|m| m.slot_id).collect();
        assert_eq!(slots, SimDevice::standard().slot_ids());
        assert_eq!(map.find_all(&ModuleType::SimpleLaser).len(), 2);
        assert_eq!(
            map.find(200).map(|m| m.module_type.clone()),
            Some(ModuleType::OscillatorSomd)
        );
        assert!(map
            .iter()
            .any(|m| matches!(m.module_type, ModuleType::Unrecognized(_))));
    }

    #[test]
    fn test_discover_failure_is_total() {
        let sim = Arc::new(SimulatedTransport::with_device(0, SimDevice::standard()));
        sim.fail_on("com_get_module_type", StatusCode(-1201));
        let device = DeviceHandle::new(sim.clone(), 0).unwrap();
        device.open().unwrap();
        assert!(ModuleMap::discover(&device, false).is_err());
    }

    #[test]
    fn test_describe_long() {
        let sim = Arc::new(SimulatedTransport::with_device(0, SimDevice::standard()));
        let device = DeviceHandle::new(sim, 0).unwrap();
        let name = ModuleMap::describe_long(&device, crate::sim::TYPE_SLM).unwrap();
        assert!(name.contains("SLM"));
    }
}
