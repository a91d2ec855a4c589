//! Deterministic sort and merge helpers shared by the store and the engine.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::audio::{AudioDevice, DeviceKey, KnownDevice};

/// Drop repeated ids, keeping the first occurrence of each.
pub fn dedupe<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    for id in ids {
        let id = id.as_ref();
        if seen.insert(id.to_string()) {
            result.push(id.to_string());
        }
    }
    result
}

/// Requested ids first, then the remaining base ids, each part deduplicated
/// in first-occurrence order.
pub fn merge_priority_order(requested: &[String], base: &[String]) -> Vec<String> {
    let mut order = dedupe(requested);
    let placed: HashSet<String> = order.iter().cloned().collect();
    order.extend(dedupe(base.iter().filter(|id| !placed.contains(*id))));
    order
}

/// Stable sort of devices by their index in `order`. Devices missing from the
/// order keep their relative input order after all ranked devices.
pub fn sort_by_priority(devices: &[AudioDevice], order: &[String]) -> Vec<AudioDevice> {
    let mut rank: HashMap<&str, usize> = HashMap::new();
    for (index, uid) in order.iter().enumerate() {
        rank.entry(uid.as_str()).or_insert(index);
    }

    let mut sorted = devices.to_vec();
    // sort_by_key is stable, so unranked devices stay in input order
    sorted.sort_by_key(|device| {
        rank.get(device.uid.as_str())
            .copied()
            .unwrap_or(usize::MAX)
    });
    sorted
}

/// Order known devices for display and for building base priority orders:
/// most recently seen first, then case-insensitive name, uid, input before
/// output, and finally original position.
pub fn sort_known_devices(records: Vec<KnownDevice>) -> Vec<KnownDevice> {
    let mut indexed: Vec<(usize, KnownDevice)> = records.into_iter().enumerate().collect();
    indexed.sort_by(|(left_index, left), (right_index, right)| {
        compare_known(left, right).then(left_index.cmp(right_index))
    });
    indexed.into_iter().map(|(_, record)| record).collect()
}

fn compare_known(left: &KnownDevice, right: &KnownDevice) -> Ordering {
    right
        .last_seen
        .cmp(&left.last_seen)
        .then_with(|| left.name.to_lowercase().cmp(&right.name.to_lowercase()))
        .then_with(|| left.uid.cmp(&right.uid))
        .then_with(|| left.device_type.cmp(&right.device_type))
}

/// Collapse duplicate `(uid, type)` records, keeping the most recently seen
/// one at the position where the key first appeared. Returns the collapsed
/// list and how many records were dropped.
pub fn dedupe_known_devices(records: Vec<KnownDevice>) -> (Vec<KnownDevice>, usize) {
    let original_len = records.len();
    let mut positions: HashMap<DeviceKey, usize> = HashMap::new();
    let mut result: Vec<KnownDevice> = Vec::new();

    for record in records {
        match positions.get(&record.key()) {
            Some(&position) => {
                if record.last_seen > result[position].last_seen {
                    result[position] = record;
                }
            }
            None => {
                positions.insert(record.key(), result.len());
                result.push(record);
            }
        }
    }

    let removed = original_len - result.len();
    (result, removed)
}
