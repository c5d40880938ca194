//! Windows hardware component readers.

use std::process::Command;

use super::ComponentKind;

pub fn read_component(kind: ComponentKind) -> Option<String> {
    match kind {
        ComponentKind::DiskSerial => wmic_value("diskdrive", "SerialNumber"),
        ComponentKind::MacAddress => wmic_value("nic where \"NetEnabled=true\"", "MACAddress"),
        ComponentKind::CpuId => wmic_value("cpu", "ProcessorId"),
        ComponentKind::MotherboardSerial => wmic_value("baseboard", "SerialNumber"),
        ComponentKind::MachineId => machine_guid(),
    }
}

fn wmic_value(alias: &str, property: &str) -> Option<String> {
    let output = Command::new("wmic")
        .args([alias, "get", property, "/value"])
        .output()
        .ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .filter_map(|l| l.trim().strip_prefix(&format!("{property}=")))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

fn machine_guid() -> Option<String> {
    let output = Command::new("reg")
        .args([
            "query",
            r"HKLM\SOFTWARE\Microsoft\Cryptography",
            "/v",
            "MachineGuid",
        ])
        .output()
        .ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find(|l| l.contains("MachineGuid"))
        .and_then(|l| l.split_whitespace().last())
        .map(str::to_string)
}
