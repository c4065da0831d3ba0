//! Vehicles the station accepts packets from

use std::collections::HashMap;

use crate::config::VehicleEntry;

/// Oldest vehicle software build speaking this packet format.
pub const MIN_SOFTWARE_BUILD: u32 = 242;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleDescriptor {
    pub vehicle_id: u32,
    pub software_build: u32,
    pub name: String,
}

impl VehicleDescriptor {
    pub fn is_compatible(&self) -> bool {
        self.software_build >= MIN_SOFTWARE_BUILD
    }
}

impl From<&VehicleEntry> for VehicleDescriptor {
    fn from(entry: &VehicleEntry) -> Self {
        Self {
            vehicle_id: entry.vehicle_id,
            software_build: entry.software_build,
            name: entry.name.clone(),
        }
    }
}

/// Lookup of known vehicles by id.
pub trait VehicleRegistry: Send + Sync {
    fn find_vehicle(&self, vehicle_id: u32) -> Option<&VehicleDescriptor>;
}

/// Registry fixed at startup from the station configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    vehicles: HashMap<u32, VehicleDescriptor>,
}

impl StaticRegistry {
    pub fn new(vehicles: impl IntoIterator<Item = VehicleDescriptor>) -> Self {
        Self { vehicles: vehicles.into_iter().map(|v| (v.vehicle_id, v)).collect() }
    }

    pub fn from_config(entries: &[VehicleEntry]) -> Self {
        Self::new(entries.iter().map(VehicleDescriptor::from))
    }

    pub fn insert(&mut self, vehicle: VehicleDescriptor) -> Option<VehicleDescriptor> {
        self.vehicles.insert(vehicle.vehicle_id, vehicle)
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }
}

impl VehicleRegistry for StaticRegistry {
    fn find_vehicle(&self, vehicle_id: u32) -> Option<&VehicleDescriptor> {
        self.vehicles.get(&vehicle_id)
    }
}
