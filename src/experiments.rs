//! Process-wide behavior flags. Each experiment is a named boolean with a
//! default policy and an expiry date; the expiry is metadata for tooling that
//! forces periodic re-evaluation, it is never checked at runtime. Flags are
//! resolved once at first use from the built-in defaults plus the optional
//! `RINGPOINT_EXPERIMENTS` environment override (a comma-separated list of
//! names, prefixed with `-` to disable: `peer_framing,-frame_size_estimation`).
//!
//! Decision points read a flag at most once per operation, so a forced toggle
//! only affects the next operation armed, never one already in flight.

use std::collections::HashMap;
use std::sync::RwLock;

use lazy_static::lazy_static;
use tracing::warn;

/// Size receive buffers from the caller's RPC-size estimate and hold the read
/// open until the estimate is satisfied, batching small reads.
pub const FRAME_SIZE_ESTIMATION: &str = "frame_size_estimation";

/// Do not complete a read until the configured low watermark of bytes has
/// accumulated, reducing wakeup frequency.
pub const READ_LOW_WATERMARK: &str = "read_low_watermark";

/// Cap outbound chunk sizes at the last frame size advertised by the peer,
/// approximating its memory pressure.
pub const PEER_FRAMING: &str = "peer_framing";

/// Let buffer allocation consult the quota pressure signal instead of only
/// the fixed ceiling.
pub const PRESSURE_AWARE_ALLOCATION: &str = "pressure_aware_allocation";

/// Listener-side multishot accept. Not consulted by the endpoint layer; kept
/// registered here because the registry is process-wide.
pub const MULTISHOT_ACCEPT: &str = "multishot_accept";

/// Default rollout policy for an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultPolicy {
    Off,
    DebugOnly,
    ReleaseOnly,
    On,
}

impl DefaultPolicy {
    fn resolve(self) -> bool {
        match self {
            DefaultPolicy::Off => false,
            DefaultPolicy::On => true,
            DefaultPolicy::DebugOnly => cfg!(debug_assertions),
            DefaultPolicy::ReleaseOnly => !cfg!(debug_assertions),
        }
    }
}

/// A registered experiment definition.
pub struct Experiment {
    pub name: &'static str,
    pub default: DefaultPolicy,
    /// Re-evaluation deadline, `YYYY/MM/DD`. Tooling hygiene only.
    pub expiry: &'static str,
}

/// Every experiment known to this process.
pub const EXPERIMENTS: &[Experiment] = &[
    Experiment {
        name: FRAME_SIZE_ESTIMATION,
        default: DefaultPolicy::DebugOnly,
        expiry: "2027/03/01",
    },
    Experiment {
        name: READ_LOW_WATERMARK,
        default: DefaultPolicy::Off,
        expiry: "2027/03/01",
    },
    Experiment {
        name: PEER_FRAMING,
        default: DefaultPolicy::Off,
        expiry: "2027/06/01",
    },
    Experiment {
        name: PRESSURE_AWARE_ALLOCATION,
        default: DefaultPolicy::On,
        expiry: "2026/12/01",
    },
    Experiment {
        name: MULTISHOT_ACCEPT,
        default: DefaultPolicy::On,
        expiry: "2027/01/01",
    },
];

lazy_static! {
    static ref RESOLVED: RwLock<HashMap<&'static str, bool>> =
        RwLock::new(resolve(std::env::var("RINGPOINT_EXPERIMENTS").ok().as_deref()));
}

fn resolve(overrides: Option<&str>) -> HashMap<&'static str, bool> {
    let mut map: HashMap<&'static str, bool> = EXPERIMENTS
        .iter()
        .map(|e| (e.name, e.default.resolve()))
        .collect();

    if let Some(spec) = overrides {
        for token in spec.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let (name, value) = match token.strip_prefix('-') {
                Some(name) => (name, false),
                None => (token, true),
            };
            match map.get_mut(name) {
                Some(slot) => *slot = value,
                None => warn!(name, "ignoring override for unknown experiment"),
            }
        }
    }
    map
}

/// Whether the named experiment is enabled. Unknown names are disabled.
pub fn is_enabled(name: &str) -> bool {
    RESOLVED
        .read()
        .expect("experiment registry lock poisoned")
        .get(name)
        .copied()
        .unwrap_or(false)
}

/// Force an experiment on or off for the remainder of the process. Intended
/// for tests and rollout tooling; in-flight operations are unaffected.
pub fn force_set(name: &str, enabled: bool) {
    let mut map = RESOLVED
        .write()
        .expect("experiment registry lock poisoned");
    match map.get_mut(name) {
        Some(slot) => *slot = enabled,
        None => warn!(name, "force_set for unknown experiment"),
    }
}
