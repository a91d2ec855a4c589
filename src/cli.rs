//! Command line surface: argument definitions, device identifier resolution
//! and the views rendered as text or JSON.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;

use crate::audio::{AudioDevice, DeviceType, KnownDevice};
use crate::engine::{EngineReport, PriorityUpdate};

#[derive(Parser, Debug)]
#[command(name = "audio-priority-sync")]
#[command(about = "Keeps the highest-priority connected audio devices active")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Render command output as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the background synchronization service
    Daemon,
    /// Show the mode, default devices and connected devices
    Status,
    /// List every remembered device
    List,
    /// Replace the priority order for a device class
    SetPriority {
        /// Device class
        #[arg(value_enum)]
        class: ClassArg,
        /// Device UIDs, 1-based indexes from `list`, or device names
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Switch to the highest-priority connected device now
    Apply {
        /// Only apply for this class
        #[arg(value_enum)]
        class: Option<ClassArg>,
    },
    /// Enable or disable automatic switching
    Mode {
        #[arg(value_enum)]
        mode: ModeArg,
    },
    /// Remove a device from memory
    Forget {
        /// Device UID, 1-based index from `list`, or device name
        id: String,
        /// Only forget the record for this class
        #[arg(long, value_enum)]
        class: Option<ClassArg>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassArg {
    Input,
    Output,
}

impl From<ClassArg> for DeviceType {
    fn from(class: ClassArg) -> Self {
        match class {
            ClassArg::Input => DeviceType::Input,
            ClassArg::Output => DeviceType::Output,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    Auto,
    Manual,
}

impl ModeArg {
    pub fn is_auto(self) -> bool {
        self == ModeArg::Auto
    }
}

/// One row of the `list` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedDevice {
    pub index: usize,
    pub uid: String,
    pub name: String,
    pub device_type: DeviceType,
    pub connected: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Build the device listing for one class: remembered devices in their
/// stored order, then connected devices that are not remembered yet.
/// Indexes are 1-based and per class.
pub fn device_listing(
    device_type: DeviceType,
    known: &[KnownDevice],
    connected: &[AudioDevice],
) -> Vec<ListedDevice> {
    let mut listing: Vec<ListedDevice> = known
        .iter()
        .filter(|record| record.device_type == device_type)
        .map(|record| ListedDevice {
            index: 0,
            uid: record.uid.clone(),
            name: record.name.clone(),
            device_type,
            connected: connected.iter().any(|device| record.matches(&device.uid, device.device_type)),
            last_seen: Some(record.last_seen),
        })
        .collect();

    for device in connected.iter().filter(|device| device.device_type == device_type) {
        if !listing.iter().any(|row| row.uid == device.uid) {
            listing.push(ListedDevice {
                index: 0,
                uid: device.uid.clone(),
                name: device.name.clone(),
                device_type,
                connected: true,
                last_seen: None,
            });
        }
    }

    for (position, row) in listing.iter_mut().enumerate() {
        row.index = position + 1;
    }
    listing
}

/// Resolve user supplied identifiers against a class listing. Each token may
/// be a UID, a 1-based index into the listing, or a case-insensitive device
/// name that matches exactly one row.
pub fn resolve_device_ids(tokens: &[String], candidates: &[ListedDevice]) -> Result<Vec<String>> {
    tokens
        .iter()
        .map(|token| resolve_device_id(token, candidates))
        .collect()
}

fn resolve_device_id(token: &str, candidates: &[ListedDevice]) -> Result<String> {
    let token = token.trim();
    if token.is_empty() {
        bail!("Empty device identifier");
    }

    if let Some(row) = candidates.iter().find(|row| row.uid == token) {
        return Ok(row.uid.clone());
    }

    if let Ok(index) = token.parse::<usize>() {
        return match candidates.iter().find(|row| row.index == index) {
            Some(row) => Ok(row.uid.clone()),
            None => bail!(
                "Device index {} is out of range (1-{})",
                index,
                candidates.len()
            ),
        };
    }

    let mut by_name: Vec<&str> = Vec::new();
    for row in candidates
        .iter()
        .filter(|row| row.name.eq_ignore_ascii_case(token))
    {
        if !by_name.contains(&row.uid.as_str()) {
            by_name.push(&row.uid);
        }
    }
    match by_name.as_slice() {
        [uid] => Ok(uid.to_string()),
        [] => bail!("Unknown device: {}", token),
        uids => bail!(
            "Device name '{}' is ambiguous, use one of: {}",
            token,
            uids.join(", ")
        ),
    }
}

/// Snapshot rendered by `status`
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub auto_mode: bool,
    pub classes: Vec<ClassStatus>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassStatus {
    pub device_type: DeviceType,
    pub default_device: Option<AudioDevice>,
    pub priority_order: Vec<String>,
    pub connected: Vec<AudioDevice>,
}

pub fn render_status(status: &StatusView) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Mode: {}",
        if status.auto_mode { "auto" } else { "manual" }
    );
    for class in &status.classes {
        let _ = writeln!(out);
        let default = class
            .default_device
            .as_ref()
            .map(|device| format!("{} ({})", device.name, device.uid))
            .unwrap_or_else(|| "none".to_string());
        let _ = writeln!(out, "Default {}: {}", class.device_type.as_str(), default);
        if class.connected.is_empty() {
            let _ = writeln!(out, "  No connected {} devices", class.device_type.as_str());
        }
        for (position, device) in class.connected.iter().enumerate() {
            let ranked = class.priority_order.iter().any(|uid| uid == &device.uid);
            let _ = writeln!(
                out,
                "  {}. {}{}",
                position + 1,
                device,
                if ranked { "" } else { " (unranked)" }
            );
        }
    }
    render_warnings(&mut out, &status.warnings);
    out
}

pub fn render_listing(listing: &[ListedDevice]) -> String {
    let mut out = String::new();
    let mut current = None;
    for row in listing {
        if current != Some(row.device_type) {
            if current.is_some() {
                let _ = writeln!(out);
            }
            let _ = writeln!(out, "{} devices:", row.device_type);
            current = Some(row.device_type);
        }
        let last_seen = row
            .last_seen
            .map(|seen| seen.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        let _ = writeln!(
            out,
            "  {}. {} [{}] {} (last seen {})",
            row.index,
            row.name,
            if row.connected { "connected" } else { "disconnected" },
            row.uid,
            last_seen
        );
    }
    if listing.is_empty() {
        let _ = writeln!(out, "No devices remembered yet");
    }
    out
}

pub fn render_report(report: &EngineReport) -> String {
    let mut out = String::new();
    for switch in &report.switches {
        let _ = writeln!(
            out,
            "Default {} device set to {} ({})",
            switch.device_type.as_str(),
            switch.name,
            switch.uid
        );
    }
    if report.switches.is_empty() {
        let _ = writeln!(out, "Default devices already match priorities");
    }
    let warnings: Vec<String> = report.warnings.iter().map(ToString::to_string).collect();
    render_warnings(&mut out, &warnings);
    out
}

pub fn render_priority_update(update: &PriorityUpdate) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} priority:", update.device_type);
    for (position, uid) in update.order.iter().enumerate() {
        let _ = writeln!(out, "  {}. {}", position + 1, uid);
    }
    for switch in &update.report.switches {
        let _ = writeln!(
            out,
            "Default {} device set to {} ({})",
            switch.device_type.as_str(),
            switch.name,
            switch.uid
        );
    }
    let warnings: Vec<String> = update
        .report
        .warnings
        .iter()
        .map(ToString::to_string)
        .collect();
    render_warnings(&mut out, &warnings);
    out
}

fn render_warnings(out: &mut String, warnings: &[String]) {
    for warning in warnings {
        let _ = writeln!(out, "warning: {}", warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn known(uid: &str, name: &str, device_type: DeviceType, day: u32) -> KnownDevice {
        KnownDevice {
            uid: uid.to_string(),
            device_type,
            name: name.to_string(),
            last_seen: Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap(),
        }
    }

    fn connected(uid: &str, name: &str, device_type: DeviceType) -> AudioDevice {
        AudioDevice::new(uid.to_string(), "1".to_string(), name.to_string(), device_type)
    }

    fn tokens(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn sample_listing() -> Vec<ListedDevice> {
        let known = vec![
            known("usb-headset", "USB Headset", DeviceType::Output, 3),
            known("speakers", "MacBook Speakers", DeviceType::Output, 2),
            known("mic", "USB Headset", DeviceType::Input, 2),
        ];
        let connected = vec![
            connected("speakers", "MacBook Speakers", DeviceType::Output),
            connected("hdmi", "Display Audio", DeviceType::Output),
        ];
        device_listing(DeviceType::Output, &known, &connected)
    }

    #[test]
    fn test_listing_appends_unremembered_connected_devices() {
        let listing = sample_listing();

        let uids: Vec<&str> = listing.iter().map(|row| row.uid.as_str()).collect();
        assert_eq!(uids, vec!["usb-headset", "speakers", "hdmi"]);
        assert_eq!(
            listing.iter().map(|row| row.index).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(!listing[0].connected);
        assert!(listing[1].connected);
        assert!(listing[2].last_seen.is_none());
    }

    #[test]
    fn test_resolve_by_uid_index_and_name() {
        let listing = sample_listing();

        let resolved =
            resolve_device_ids(&tokens(&["hdmi", "1", "macbook speakers"]), &listing).unwrap();

        assert_eq!(resolved, vec!["hdmi", "usb-headset", "speakers"]);
    }

    #[test]
    fn test_resolve_rejects_unknown_tokens() {
        let listing = sample_listing();

        assert!(resolve_device_ids(&tokens(&["4"]), &listing).is_err());
        assert!(resolve_device_ids(&tokens(&["0"]), &listing).is_err());
        assert!(resolve_device_ids(&tokens(&["bluetooth"]), &listing).is_err());
        assert!(resolve_device_ids(&tokens(&["  "]), &listing).is_err());
    }

    #[test]
    fn test_resolve_rejects_ambiguous_names() {
        let listing = vec![
            ListedDevice {
                index: 1,
                uid: "a".to_string(),
                name: "Headset".to_string(),
                device_type: DeviceType::Output,
                connected: true,
                last_seen: None,
            },
            ListedDevice {
                index: 2,
                uid: "b".to_string(),
                name: "headset".to_string(),
                device_type: DeviceType::Output,
                connected: false,
                last_seen: None,
            },
        ];

        let error = resolve_device_ids(&tokens(&["HEADSET"]), &listing).unwrap_err();
        assert!(error.to_string().contains("ambiguous"));
    }

    #[test]
    fn test_cli_parses_set_priority() {
        let cli = Cli::try_parse_from([
            "audio-priority-sync",
            "--json",
            "set-priority",
            "output",
            "hdmi",
            "2",
        ])
        .unwrap();

        assert!(cli.json);
        assert_eq!(
            cli.command,
            Some(Commands::SetPriority {
                class: ClassArg::Output,
                ids: tokens(&["hdmi", "2"]),
            })
        );
    }

    #[test]
    fn test_cli_requires_ids_for_set_priority() {
        assert!(Cli::try_parse_from(["audio-priority-sync", "set-priority", "input"]).is_err());
    }

    #[test]
    fn test_render_listing_groups_by_class() {
        let text = render_listing(&sample_listing());
        assert!(text.starts_with("Output devices:"));
        assert!(text.contains("3. Display Audio [connected] hdmi (last seen never)"));
    }
}
