//! Hardware fingerprinting for license binding.
//!
//! A fingerprint is an ordered set of independently hashed hardware component
//! identifiers plus one "primary" composite hash used for display and session
//! lookup. Matching is fuzzy: a configurable fraction of the stored component
//! weight must agree with the current machine, so single-component churn
//! (disk swap, NIC change) passes while wholesale replacement (new
//! motherboard and CPU together) does not.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[cfg(target_os = "linux")]
#[path = "fingerprint/linux.rs"]
mod platform;
#[cfg(target_os = "macos")]
#[path = "fingerprint/macos.rs"]
mod platform;
#[cfg(target_os = "windows")]
#[path = "fingerprint/windows.rs"]
mod platform;

/// The hardware components a fingerprint is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentKind {
    DiskSerial,
    MacAddress,
    CpuId,
    MotherboardSerial,
    MachineId,
}

impl ComponentKind {
    /// All component kinds, in capture order.
    pub const ALL: [ComponentKind; 5] = [
        ComponentKind::DiskSerial,
        ComponentKind::MacAddress,
        ComponentKind::CpuId,
        ComponentKind::MotherboardSerial,
        ComponentKind::MachineId,
    ];
}

/// One independently hashed component identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintComponent {
    pub kind: ComponentKind,
    /// SHA-256 of the raw identifier, hex-encoded.
    pub hash: String,
}

/// An ordered set of component hashes plus the derived primary hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintSet {
    pub components: Vec<FingerprintComponent>,
    /// Stable composite hash over the sorted component hashes.
    pub primary: String,
}

impl FingerprintSet {
    /// Build a set from component hashes, deriving the primary hash.
    pub fn from_components(components: Vec<FingerprintComponent>) -> Self {
        let mut hashes: Vec<&str> = components.iter().map(|c| c.hash.as_str()).collect();
        hashes.sort_unstable();

        let mut hasher = Sha256::new();
        for h in &hashes {
            hasher.update(h.as_bytes());
        }
        let primary = hex::encode(hasher.finalize());

        Self {
            components,
            primary,
        }
    }

    /// Look up the hash for a specific component kind, if captured.
    pub fn component(&self, kind: ComponentKind) -> Option<&str> {
        self.components
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.hash.as_str())
    }
}

/// Matching policy: minimum fraction and per-component weights.
///
/// These come from configuration, never from inline constants at call sites.
#[derive(Debug, Clone)]
pub struct FingerprintPolicy {
    /// Fraction of the stored weight that must match (0.0 ..= 1.0).
    pub minimum_match_fraction: f64,
    /// Relative weight per component kind. Motherboard and CPU carry double
    /// weight so that replacing both together always reads as new hardware.
    pub weights: ComponentWeights,
}

impl FingerprintPolicy {
    pub fn new(minimum_match_fraction: f64) -> Self {
        Self {
            minimum_match_fraction,
            weights: ComponentWeights::default(),
        }
    }
}

impl Default for FingerprintPolicy {
    fn default() -> Self {
        Self::new(0.6)
    }
}

/// Relative component weights used during matching.
#[derive(Debug, Clone)]
pub struct ComponentWeights {
    pub disk_serial: u32,
    pub mac_address: u32,
    pub cpu_id: u32,
    pub motherboard_serial: u32,
    pub machine_id: u32,
}

impl ComponentWeights {
    fn weight_of(&self, kind: ComponentKind) -> u32 {
        match kind {
            ComponentKind::DiskSerial => self.disk_serial,
            ComponentKind::MacAddress => self.mac_address,
            ComponentKind::CpuId => self.cpu_id,
            ComponentKind::MotherboardSerial => self.motherboard_serial,
            ComponentKind::MachineId => self.machine_id,
        }
    }
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            disk_serial: 1,
            mac_address: 1,
            cpu_id: 2,
            motherboard_serial: 2,
            machine_id: 1,
        }
    }
}

/// Reads the running machine's hardware identity.
#[derive(Debug, Clone, Default)]
pub struct FingerprintProvider;

impl FingerprintProvider {
    pub fn new() -> Self {
        Self
    }

    /// Capture the current machine's fingerprint.
    ///
    /// A component that cannot be read is omitted from the set rather than
    /// failing the capture; a degraded set still matches against itself.
    pub fn capture(&self) -> FingerprintSet {
        let mut components = Vec::with_capacity(ComponentKind::ALL.len());

        for kind in ComponentKind::ALL {
            match platform::read_component(kind) {
                Some(raw) if !raw.trim().is_empty() => {
                    components.push(FingerprintComponent {
                        kind,
                        hash: hash_component(kind, raw.trim()),
                    });
                }
                _ => {
                    tracing::debug!(?kind, "hardware component unavailable, omitting");
                }
            }
        }

        FingerprintSet::from_components(components)
    }
}

/// The machine name reported to the server as part of device identity.
pub fn machine_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Raw identifier used to derive the local store's encryption key.
///
/// The machine id is OS-install-stable and survives component swaps, so the
/// store stays readable across the hardware drift the fuzzy matcher is meant
/// to tolerate. Hostname is the fallback on machines without one.
pub(crate) fn storage_key_material() -> String {
    platform::read_component(ComponentKind::MachineId)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown-machine".to_string())
        })
}

/// Hash a raw component identifier. The kind is mixed in so two components
/// with coincidentally equal raw values never produce equal hashes.
fn hash_component(kind: ComponentKind, raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{kind:?}:").as_bytes());
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// Fuzzy match of a current fingerprint against a stored one.
///
/// The match succeeds when the weight of components present in both sets with
/// equal hashes, divided by the total stored weight (at least 1), reaches the
/// policy's minimum fraction.
pub fn matches(stored: &FingerprintSet, current: &FingerprintSet, policy: &FingerprintPolicy) -> bool {
    let mut stored_weight: u32 = 0;
    let mut matched_weight: u32 = 0;

    for component in &stored.components {
        let weight = policy.weights.weight_of(component.kind);
        stored_weight += weight;

        if current.component(component.kind) == Some(component.hash.as_str()) {
            matched_weight += weight;
        }
    }

    let fraction = f64::from(matched_weight) / f64::from(stored_weight.max(1));
    fraction >= policy.minimum_match_fraction
}
