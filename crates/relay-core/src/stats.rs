//! Final statistics computed when a monitoring session ends.

use serde::{Deserialize, Serialize};

use crate::device::{Device, DeviceId, DeviceTable};

/// Rounded per-device summary carried by the `end_statistics` broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStats {
    pub device_id: DeviceId,
    pub max: f64,
    pub avg: f64,
    pub min: f64,
}

impl DeviceStats {
    /// Summarizes a device, rounding each value to the nearest integer.
    pub fn from_device(device: &Device) -> Self {
        Self {
            device_id: device.id,
            max: device.max.round(),
            avg: device.average.round(),
            min: device.min.round(),
        }
    }
}

/// Computes the final statistics for all six devices, in id order.
///
/// Derived purely from current table values; no separate accumulation.
pub fn final_statistics(table: &DeviceTable) -> Vec<DeviceStats> {
    table.iter().map(DeviceStats::from_device).collect()
}
