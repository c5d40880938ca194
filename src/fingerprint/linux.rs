//! Linux hardware component readers.

use std::fs;
use std::process::Command;

use super::ComponentKind;

pub fn read_component(kind: ComponentKind) -> Option<String> {
    match kind {
        ComponentKind::DiskSerial => disk_serial(),
        ComponentKind::MacAddress => mac_address(),
        ComponentKind::CpuId => cpu_id(),
        ComponentKind::MotherboardSerial => motherboard_serial(),
        ComponentKind::MachineId => machine_id(),
    }
}

fn disk_serial() -> Option<String> {
    let output = Command::new("lsblk")
        .args(["-dno", "SERIAL"])
        .output()
        .ok()?;
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

fn mac_address() -> Option<String> {
    let entries = fs::read_dir("/sys/class/net").ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        // Loopback has no hardware identity.
        if name == "lo" {
            continue;
        }
        if let Ok(addr) = fs::read_to_string(entry.path().join("address")) {
            let addr = addr.trim();
            if !addr.is_empty() && addr != "00:00:00:00:00:00" {
                return Some(addr.to_string());
            }
        }
    }
    None
}

fn cpu_id() -> Option<String> {
    let output = Command::new("lscpu").output().ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find(|line| line.starts_with("Model name"))
        .and_then(|line| line.split(':').nth(1))
        .map(|s| s.trim().to_string())
}

fn motherboard_serial() -> Option<String> {
    fs::read_to_string("/sys/devices/virtual/dmi/id/board_serial")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn machine_id() -> Option<String> {
    fs::read_to_string("/etc/machine-id")
        .or_else(|_| fs::read_to_string("/var/lib/dbus/machine-id"))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
