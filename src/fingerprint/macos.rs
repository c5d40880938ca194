//! macOS hardware component readers.

use std::process::Command;

use super::ComponentKind;

pub fn read_component(kind: ComponentKind) -> Option<String> {
    match kind {
        ComponentKind::DiskSerial => disk_serial(),
        ComponentKind::MacAddress => mac_address(),
        ComponentKind::CpuId => cpu_id(),
        ComponentKind::MotherboardSerial => platform_serial(),
        ComponentKind::MachineId => platform_uuid(),
    }
}

fn ioreg_value(key: &str) -> Option<String> {
    let output = Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find(|l| l.contains(key))
        .and_then(|l| l.split('"').nth(3))
        .map(str::to_string)
}

fn disk_serial() -> Option<String> {
    let output = Command::new("system_profiler")
        .args(["SPSerialATADataType", "SPNVMeDataType"])
        .output()
        .ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find(|l| l.trim_start().starts_with("Serial Number:"))
        .and_then(|l| l.split(':').nth(1))
        .map(|s| s.trim().to_string())
}

fn mac_address() -> Option<String> {
    let output = Command::new("ifconfig").arg("en0").output().ok()?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find(|l| l.trim_start().starts_with("ether"))
        .and_then(|l| l.split_whitespace().nth(1))
        .map(str::to_string)
}

fn cpu_id() -> Option<String> {
    let output = Command::new("sysctl")
        .args(["-n", "machdep.cpu.brand_string"])
        .output()
        .ok()?;
    let s = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!s.is_empty()).then_some(s)
}

fn platform_serial() -> Option<String> {
    ioreg_value("IOPlatformSerialNumber")
}

fn platform_uuid() -> Option<String> {
    ioreg_value("IOPlatformUUID")
}
