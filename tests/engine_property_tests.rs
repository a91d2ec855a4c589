use audio_priority_sync::audio::{AudioDevice, DeviceType};
use audio_priority_sync::engine::EngineSettings;
use std::time::Duration;

mod test_utils;
use test_utils::{TestEnvironment, ids, output};

#[cfg(test)]
mod idempotence {
    use super::*;

    #[tokio::test]
    async fn test_no_set_call_when_best_device_is_already_default() {
        let env = TestEnvironment::new(vec![output("out-1", "11"), output("out-2", "12")]);
        env.audio.set_system_default_silently("12", DeviceType::Output);
        env.set_order(DeviceType::Output, &["out-2", "out-1"]);

        let report = env
            .engine
            .apply_highest_priority(Some(DeviceType::Output), true);

        assert!(report.switches.is_empty());
        assert!(env.set_calls().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_apply_sets_default_once() {
        let env = TestEnvironment::new(vec![output("out-1", "11"), output("out-2", "12")]);
        env.set_order(DeviceType::Output, &["out-2"]);

        for _ in 0..3 {
            env.engine.apply_highest_priority(None, true);
        }

        assert_eq!(env.set_calls(), vec![("12".to_string(), DeviceType::Output)]);
    }
}

#[cfg(test)]
mod self_change_suppression {
    use super::*;

    fn settings() -> EngineSettings {
        EngineSettings {
            debounce: Duration::from_millis(50),
            suppression_window: Duration::from_millis(500),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_of_own_change_triggers_nothing() {
        let env = TestEnvironment::with_settings(
            vec![output("out-1", "11"), output("out-2", "12")],
            settings(),
        );
        env.audio.set_system_default_silently("11", DeviceType::Output);
        env.set_order(DeviceType::Output, &["out-2", "out-1"]);
        env.audio.set_echo_default_changes(true);
        env.engine.start().unwrap();
        let lists_after_start = env.audio.list_call_count();

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(env.set_calls(), vec![("12".to_string(), DeviceType::Output)]);
        assert_eq!(env.audio.list_call_count(), lists_after_start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_change_inside_window_only_updates_cache() {
        let env = TestEnvironment::with_settings(
            vec![output("out-1", "11"), output("out-2", "12")],
            settings(),
        );
        env.audio.set_system_default_silently("11", DeviceType::Output);
        env.set_order(DeviceType::Output, &["out-2", "out-1"]);
        env.engine.start().unwrap();

        // The hardware briefly reports the old device, then settles on ours
        env.audio.set_system_default_silently("11", DeviceType::Output);
        env.engine.refresh(false);
        assert_eq!(
            env.engine.default_device_id(DeviceType::Output).as_deref(),
            Some("11")
        );
        let lists_before = env.audio.list_call_count();

        env.audio.set_system_default("12", DeviceType::Output);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(env.audio.list_call_count(), lists_before);
        assert_eq!(
            env.engine.default_device_id(DeviceType::Output).as_deref(),
            Some("12")
        );
        assert_eq!(env.set_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_change_after_window_is_external() {
        let env = TestEnvironment::with_settings(
            vec![output("out-1", "11"), output("out-2", "12")],
            settings(),
        );
        env.audio.set_system_default_silently("11", DeviceType::Output);
        env.set_order(DeviceType::Output, &["out-2", "out-1"]);
        env.engine.start().unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        env.audio.set_system_default_silently("11", DeviceType::Output);
        env.engine.refresh(false);
        let lists_before = env.audio.list_call_count();

        env.audio.set_system_default("12", DeviceType::Output);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Treated as outside the engine: refreshed, but already on the best device
        assert_eq!(env.audio.list_call_count(), lists_before + 1);
        assert_eq!(env.set_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mixed_change_is_handled_as_external() {
        let env = TestEnvironment::with_settings(
            vec![
                output("out-1", "11"),
                output("out-2", "12"),
                test_utils::input("in-1", "21"),
                test_utils::input("in-2", "22"),
            ],
            settings(),
        );
        env.set_order(DeviceType::Output, &["out-2"]);
        env.set_order(DeviceType::Input, &["in-1"]);
        env.engine.start().unwrap();
        assert_eq!(env.set_calls().len(), 2);

        // Output moves back to ours after a stale read, input is changed by the user
        env.audio.set_system_default_silently("11", DeviceType::Output);
        env.engine.refresh(false);
        env.audio.set_system_default_silently("12", DeviceType::Output);
        env.audio.set_system_default("22", DeviceType::Input);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(
            env.set_calls().last(),
            Some(&("21".to_string(), DeviceType::Input))
        );
        assert_eq!(env.set_calls().len(), 3);
    }
}

#[cfg(test)]
mod memory_isolation {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_new_device_does_not_touch_existing_records() {
        let env = TestEnvironment::new(vec![output("out-1", "11"), output("out-2", "12")]);
        env.engine.start().unwrap();
        let before = env.engine.known_devices();
        assert_eq!(before.len(), 2);

        env.audio.add_device(output("out-3", "13"));
        tokio::time::sleep(Duration::from_millis(300)).await;

        let after = env.engine.known_devices();
        assert_eq!(after.len(), 3);
        for record in &before {
            let current = after
                .iter()
                .find(|candidate| candidate.key() == record.key())
                .expect("existing record should be kept");
            assert_eq!(current.last_seen, record.last_seen);
        }
        assert!(after.iter().any(|record| record.uid == "out-3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_is_remembered_when_default_change_is_handled_first() {
        let env = TestEnvironment::new(vec![output("out-1", "11")]);
        env.engine.start().unwrap();

        // The system switches to a freshly plugged device before the list
        // notification is handled
        env.audio.add_device_silently(output("headphones", "30"));
        env.audio.set_system_default("30", DeviceType::Output);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(
            env.engine.connected_devices(DeviceType::Output).len(),
            2
        );

        env.audio.trigger_device_list_change();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let known: Vec<String> = env
            .engine
            .known_devices()
            .into_iter()
            .map(|record| record.uid)
            .collect();
        assert!(known.contains(&"headphones".to_string()));
        assert_eq!(known.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_change_does_not_touch_memory() {
        let env = TestEnvironment::new(vec![output("out-1", "11"), output("out-2", "12")]);
        env.engine.set_mode(false).unwrap();
        env.engine.start().unwrap();
        let before = env.engine.known_devices();

        env.audio.set_system_default("12", DeviceType::Output);
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(env.engine.known_devices(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnected_device_is_remembered_again() {
        let env = TestEnvironment::new(vec![output("out-1", "11")]);
        env.engine.start().unwrap();
        env.store().forget("out-1", DeviceType::Output).unwrap();

        env.audio.remove_device("out-1", DeviceType::Output);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(env.engine.known_devices().is_empty());

        env.audio.add_device(output("out-1", "15"));
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(env.engine.known_devices().len(), 1);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn uid_strategy() -> impl Strategy<Value = String> {
        (0u8..6).prop_map(|n| format!("uid-{}", n))
    }

    fn expected_order(requested: &[String], base: &[String]) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for uid in requested.iter().chain(base) {
            if !order.contains(uid) {
                order.push(uid.clone());
            }
        }
        order
    }

    proptest! {
        #[test]
        fn set_priorities_places_requested_ids_before_the_base(
            connected in prop::collection::vec(uid_strategy(), 0..5),
            requested in prop::collection::vec(uid_strategy(), 0..6),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();

            let order = runtime.block_on(async {
                let mut devices: Vec<AudioDevice> = Vec::new();
                for (position, uid) in connected.iter().enumerate() {
                    if !devices.iter().any(|device| &device.uid == uid) {
                        devices.push(output(uid, &(100 + position).to_string()));
                    }
                }
                let env = TestEnvironment::new(devices);
                env.engine.set_mode(false).unwrap();
                env.engine.start().unwrap();

                let base: Vec<String> = env
                    .engine
                    .known_devices()
                    .into_iter()
                    .filter(|record| record.device_type == DeviceType::Output)
                    .map(|record| record.uid)
                    .collect();

                let update = env
                    .engine
                    .set_priorities(DeviceType::Output, &requested)
                    .unwrap();
                (update.order, expected_order(&requested, &base))
            });

            prop_assert_eq!(order.0, order.1);
        }
    }

    #[test]
    fn test_expected_order_helper() {
        assert_eq!(
            expected_order(&ids(&["b", "b"]), &ids(&["a", "b", "c"])),
            ids(&["b", "a", "c"])
        );
    }
}
