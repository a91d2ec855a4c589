//! Attribution of default-device changes to the engine itself.
//!
//! Setting a default device makes the audio system report a default-device
//! change shortly afterwards. The engine records what it applied and when, and
//! a change that matches a recent record is treated as its own echo rather
//! than an outside request.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::audio::DeviceType;

/// The last default device the engine itself applied for one device type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedChange {
    pub device_id: String,
    pub applied_at: Instant,
}

/// Where an observed default-device change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Nothing differs from what the engine already knows
    Unchanged,
    /// Every difference matches a recent change made by the engine
    SelfCaused,
    /// At least one difference was made by someone else
    External,
}

#[derive(Debug, Default)]
pub struct SuppressionTracker {
    markers: HashMap<DeviceType, AppliedChange>,
}

impl SuppressionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, device_type: DeviceType, device_id: String, applied_at: Instant) {
        self.markers.insert(
            device_type,
            AppliedChange {
                device_id,
                applied_at,
            },
        );
    }

    pub fn marker(&self, device_type: DeviceType) -> Option<&AppliedChange> {
        self.markers.get(&device_type)
    }

    /// True when `actual_id` is what the engine applied within `window`
    pub fn is_self_change(
        &self,
        device_type: DeviceType,
        actual_id: &str,
        now: Instant,
        window: Duration,
    ) -> bool {
        self.markers.get(&device_type).is_some_and(|marker| {
            marker.device_id == actual_id && now.saturating_duration_since(marker.applied_at) <= window
        })
    }

    /// Classify the differences between cached and actual default ids.
    ///
    /// `changes` holds `(type, actual id)` for every type whose actual default
    /// differs from the cached one.
    pub fn classify(
        &self,
        changes: &[(DeviceType, Option<String>)],
        now: Instant,
        window: Duration,
    ) -> ChangeOrigin {
        if changes.is_empty() {
            return ChangeOrigin::Unchanged;
        }

        let all_self_caused = changes.iter().all(|(device_type, actual)| {
            actual
                .as_deref()
                .is_some_and(|id| self.is_self_change(*device_type, id, now, window))
        });

        if all_self_caused {
            ChangeOrigin::SelfCaused
        } else {
            ChangeOrigin::External
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(500);

    #[test]
    fn test_matching_recent_change_is_self_caused() {
        let now = Instant::now();
        let mut tracker = SuppressionTracker::new();
        tracker.record(DeviceType::Output, "out-2".to_string(), now);

        let changes = vec![(DeviceType::Output, Some("out-2".to_string()))];
        assert_eq!(
            tracker.classify(&changes, now + Duration::from_millis(200), WINDOW),
            ChangeOrigin::SelfCaused
        );
    }

    #[test]
    fn test_expired_marker_is_external() {
        let now = Instant::now();
        let mut tracker = SuppressionTracker::new();
        tracker.record(DeviceType::Output, "out-2".to_string(), now);

        let changes = vec![(DeviceType::Output, Some("out-2".to_string()))];
        assert_eq!(
            tracker.classify(&changes, now + Duration::from_millis(501), WINDOW),
            ChangeOrigin::External
        );
    }

    #[test]
    fn test_different_device_is_external() {
        let now = Instant::now();
        let mut tracker = SuppressionTracker::new();
        tracker.record(DeviceType::Output, "out-2".to_string(), now);

        let changes = vec![(DeviceType::Output, Some("out-3".to_string()))];
        assert_eq!(tracker.classify(&changes, now, WINDOW), ChangeOrigin::External);
    }

    #[test]
    fn test_one_external_type_makes_whole_event_external() {
        let now = Instant::now();
        let mut tracker = SuppressionTracker::new();
        tracker.record(DeviceType::Output, "out-2".to_string(), now);

        let changes = vec![
            (DeviceType::Output, Some("out-2".to_string())),
            (DeviceType::Input, Some("in-1".to_string())),
        ];
        assert_eq!(tracker.classify(&changes, now, WINDOW), ChangeOrigin::External);
    }

    #[test]
    fn test_no_differences_is_unchanged() {
        let tracker = SuppressionTracker::new();
        assert_eq!(
            tracker.classify(&[], Instant::now(), WINDOW),
            ChangeOrigin::Unchanged
        );
    }

    #[test]
    fn test_missing_default_is_never_self_caused() {
        let now = Instant::now();
        let mut tracker = SuppressionTracker::new();
        tracker.record(DeviceType::Input, "in-1".to_string(), now);

        let changes = vec![(DeviceType::Input, None)];
        assert_eq!(tracker.classify(&changes, now, WINDOW), ChangeOrigin::External);
    }
}
