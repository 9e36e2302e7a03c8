//! Device identity, per-device state, and the fixed six-device table.
//!
//! The table is the single source of truth for device telemetry. It is
//! owned by exactly one writer (the registry actor) and only ever leaves
//! that owner as cloned [`DeviceRecord`] snapshots.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DomainError, DomainResult};

/// Number of provisioned devices. The set is fixed for the process lifetime.
pub const DEVICE_COUNT: usize = 6;

/// Watermark defaults: `max` starts below any reading, `min` above.
const DEFAULT_MAX: f64 = 0.0;
const DEFAULT_MIN: f64 = 100.0;

/// Identifier of one of the six provisioned devices.
///
/// Construction validates the 1..=6 range, so a `DeviceId` held anywhere
/// in the system is known to address a real table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(u8);

impl DeviceId {
    /// The sole admin device, permitted to trigger the synchronized start.
    pub const ADMIN: DeviceId = DeviceId(1);

    /// Validates a raw wire id into a `DeviceId`.
    ///
    /// # Errors
    ///
    /// `DomainError::DeviceOutOfRange` for anything outside 1..=6.
    pub fn new(raw: u32) -> DomainResult<Self> {
        if (1..=DEVICE_COUNT as u32).contains(&raw) {
            Ok(Self(raw as u8))
        } else {
            Err(DomainError::DeviceOutOfRange {
                id: raw,
                max: DEVICE_COUNT as u32,
            })
        }
    }

    /// Returns the numeric id (1..=6).
    pub fn get(&self) -> u8 {
        self.0
    }

    /// Zero-based table slot for this id.
    fn index(&self) -> usize {
        (self.0 - 1) as usize
    }

    /// Whether this is the admin device (id 1).
    pub fn is_admin(&self) -> bool {
        *self == Self::ADMIN
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a single device.
///
/// `online` is derived: it is set only together with a fresh `last_update`
/// (login or reading) and cleared by explicit logout or the liveness sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Fixed device id (1..=6)
    pub id: DeviceId,

    /// Last reported level
    pub level: f64,

    /// Running average, supplied by the producer with each reading
    pub average: f64,

    /// High watermark since the last reset
    pub max: f64,

    /// Low watermark since the last reset
    pub min: f64,

    /// Whether the device is currently considered online
    pub online: bool,

    /// When the device last logged in or reported
    pub last_update: DateTime<Utc>,
}

impl Device {
    /// Creates a device in its boot state: offline, default watermarks.
    pub fn new(id: DeviceId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            level: 0.0,
            average: 0.0,
            max: DEFAULT_MAX,
            min: DEFAULT_MIN,
            online: false,
            last_update: now,
        }
    }

    /// Handles a login: resets to boot state, then marks online.
    ///
    /// A repeated login is the only implicit reset a device ever gets.
    pub fn apply_login(&mut self, now: DateTime<Utc>) {
        *self = Self::new(self.id, now);
        self.online = true;
    }

    /// Handles a logout: offline immediately, watermarks untouched.
    pub fn apply_logout(&mut self) {
        self.online = false;
    }

    /// Handles a reading: stores the level and producer-supplied average,
    /// raises/lowers the watermarks, and marks the device online.
    pub fn apply_reading(&mut self, level: f64, average: f64, now: DateTime<Utc>) {
        self.level = level;
        self.average = average;
        self.max = self.max.max(level);
        self.min = self.min.min(level);
        self.online = true;
        self.last_update = now;
    }

    /// Whether this device should be demoted by a sweep at `now`.
    ///
    /// Only meaningful for online devices; offline devices cannot decay
    /// further and are skipped by the sweep.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.online && now - self.last_update >= timeout
    }

    /// Wire view of this device.
    pub fn record(&self) -> DeviceRecord {
        DeviceRecord {
            device_id: self.id,
            vol: self.level,
            avg: self.average,
            max: self.max,
            min: self.min,
            con: self.online,
            last_update: self.last_update.timestamp_millis(),
        }
    }
}

/// Serializable per-device record pushed to clients.
///
/// Field names match the wire protocol (`deviceId`, `lastUpdate` in
/// epoch milliseconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub vol: f64,
    pub avg: f64,
    pub max: f64,
    pub min: f64,
    pub con: bool,
    pub last_update: i64,
}

/// The fixed table of all six devices, in id order.
///
/// Cardinality never changes; devices are never destroyed. The table is
/// intended to be owned by a single writer and cloned out as records.
#[derive(Debug, Clone)]
pub struct DeviceTable {
    devices: [Device; DEVICE_COUNT],
}

impl DeviceTable {
    /// Creates the table with all six devices offline.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            devices: std::array::from_fn(|i| Device::new(DeviceId(i as u8 + 1), now)),
        }
    }

    /// Returns the device with the given id.
    pub fn get(&self, id: DeviceId) -> &Device {
        // Index is in range by DeviceId construction
        &self.devices[id.index()]
    }

    /// Marks a device logged in (reset + online).
    pub fn apply_login(&mut self, id: DeviceId, now: DateTime<Utc>) {
        self.devices[id.index()].apply_login(now);
    }

    /// Marks a device logged out.
    pub fn apply_logout(&mut self, id: DeviceId) {
        self.devices[id.index()].apply_logout();
    }

    /// Applies a reading to a device.
    pub fn apply_reading(&mut self, id: DeviceId, level: f64, average: f64, now: DateTime<Utc>) {
        self.devices[id.index()].apply_reading(level, average, now);
    }

    /// Demotes every online device that has been silent for `timeout`.
    ///
    /// Returns whether any device flipped. The sweep only demotes;
    /// promotion happens exclusively via login/reading events.
    pub fn sweep(&mut self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let mut changed = false;
        for device in self.devices.iter_mut() {
            if device.is_stale(now, timeout) {
                device.apply_logout();
                changed = true;
            }
        }
        changed
    }

    /// Immutable copy of all six devices for serialization.
    ///
    /// Never exposes the live table, so broadcasts cannot observe a
    /// half-applied mutation.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.devices.iter().map(Device::record).collect()
    }

    /// Iterates the devices in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn id(raw: u32) -> DeviceId {
        DeviceId::new(raw).expect("valid id")
    }

    #[test]
    fn test_device_id_range() {
        for raw in 1..=6 {
            assert!(DeviceId::new(raw).is_ok());
        }
        assert!(matches!(
            DeviceId::new(0),
            Err(DomainError::DeviceOutOfRange { id: 0, max: 6 })
        ));
        assert!(DeviceId::new(7).is_err());
        assert!(DeviceId::new(u32::MAX).is_err());
    }

    #[test]
    fn test_admin_device() {
        assert!(id(1).is_admin());
        assert!(!id(2).is_admin());
        assert_eq!(DeviceId::ADMIN, id(1));
    }

    #[test]
    fn test_table_boots_offline_with_default_watermarks() {
        let table = DeviceTable::new(now());
        for (i, device) in table.iter().enumerate() {
            assert_eq!(device.id.get() as usize, i + 1);
            assert!(!device.online);
            assert_eq!(device.max, 0.0);
            assert_eq!(device.min, 100.0);
        }
    }

    #[test]
    fn test_login_marks_online() {
        let t = now();
        let mut table = DeviceTable::new(t);
        table.apply_login(id(3), t);

        let snapshot = table.snapshot();
        for record in &snapshot {
            assert_eq!(record.con, record.device_id == id(3));
        }
    }

    #[test]
    fn test_repeated_login_resets_watermarks() {
        let t = now();
        let mut table = DeviceTable::new(t);
        table.apply_reading(id(2), 80.0, 80.0, t);
        assert_eq!(table.get(id(2)).max, 80.0);

        table.apply_login(id(2), t);
        let device = table.get(id(2));
        assert!(device.online);
        assert_eq!(device.max, 0.0);
        assert_eq!(device.min, 100.0);
        assert_eq!(device.level, 0.0);
    }

    #[test]
    fn test_reading_updates_watermarks() {
        let t = now();
        let mut table = DeviceTable::new(t);
        table.apply_reading(id(2), 55.0, 55.0, t);
        table.apply_reading(id(2), 80.0, 67.5, t);

        let device = table.get(id(2));
        assert_eq!(device.max, 80.0);
        assert!(device.min <= 55.0);
        assert_eq!(device.level, 80.0);
        assert_eq!(device.average, 67.5);
        assert!(device.online);
    }

    #[test]
    fn test_watermarks_bracket_level_after_first_reading() {
        let t = now();
        let mut table = DeviceTable::new(t);
        for level in [55.0, 80.0, 12.0, 43.0] {
            table.apply_reading(id(4), level, level, t);
            let device = table.get(id(4));
            assert!(device.min <= device.level && device.level <= device.max);
        }
    }

    #[test]
    fn test_logout_keeps_watermarks() {
        let t = now();
        let mut table = DeviceTable::new(t);
        table.apply_reading(id(5), 42.0, 42.0, t);
        table.apply_logout(id(5));

        let device = table.get(id(5));
        assert!(!device.online);
        assert_eq!(device.max, 42.0);
        assert_eq!(device.min, 42.0);
    }

    #[test]
    fn test_sweep_demotes_only_after_timeout() {
        let t = now();
        let timeout = Duration::milliseconds(10_000);
        let mut table = DeviceTable::new(t);
        table.apply_login(id(3), t);

        // Just under the window: still online
        assert!(!table.sweep(t + Duration::milliseconds(9_999), timeout));
        assert!(table.get(id(3)).online);

        // At the window boundary: demoted
        assert!(table.sweep(t + Duration::milliseconds(10_000), timeout));
        assert!(!table.get(id(3)).online);
    }

    #[test]
    fn test_sweep_ignores_offline_devices() {
        let t = now();
        let timeout = Duration::milliseconds(10_000);
        let mut table = DeviceTable::new(t);

        // Nothing online, nothing to demote
        assert!(!table.sweep(t + Duration::milliseconds(60_000), timeout));
    }

    #[test]
    fn test_sweep_does_not_promote() {
        let t = now();
        let timeout = Duration::milliseconds(10_000);
        let mut table = DeviceTable::new(t);
        table.apply_login(id(2), t);
        table.apply_logout(id(2));

        table.sweep(t, timeout);
        assert!(!table.get(id(2)).online);
    }

    #[test]
    fn test_fresh_reading_survives_sweep() {
        let t = now();
        let timeout = Duration::milliseconds(10_000);
        let mut table = DeviceTable::new(t);
        table.apply_login(id(6), t);

        // Reading at t+9s refreshes the window
        table.apply_reading(id(6), 10.0, 10.0, t + Duration::milliseconds(9_000));
        assert!(!table.sweep(t + Duration::milliseconds(12_000), timeout));
        assert!(table.get(id(6)).online);
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let t = now();
        let mut table = DeviceTable::new(t);
        let before = table.snapshot();

        table.apply_reading(id(1), 99.0, 99.0, t);
        let after = table.snapshot();

        assert_eq!(before.len(), DEVICE_COUNT);
        assert_ne!(before, after);
        assert_eq!(before[0].vol, 0.0);
    }

    #[test]
    fn test_record_wire_shape() {
        let t = now();
        let mut table = DeviceTable::new(t);
        table.apply_reading(id(2), 55.0, 55.0, t);

        let json = serde_json::to_value(table.get(id(2)).record()).expect("serialize");
        assert_eq!(json["deviceId"], 2);
        assert_eq!(json["vol"], 55.0);
        assert_eq!(json["con"], true);
        assert_eq!(json["lastUpdate"], t.timestamp_millis());
    }
}
