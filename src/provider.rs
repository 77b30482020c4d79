//! Inference provider mapping
//!
//! The queue tags each item with an `inference_provider` hint. This worker
//! only serves the Runway-hosted models; `wan_local` items belong to the WAN
//! worker and must be left unclaimed-in-effect (skipped, no report), so the
//! lease expires and the right worker picks them up.

use std::fmt;

/// Closed set of provider hints this worker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gen4Turbo,
    Gen45Turbo,
    Gen3aTurbo,
    Veo3,
    Veo31,
    Veo31Fast,
    /// Owned by a different worker class (e.g. `wan_local`). Skip, never fail.
    Foreign,
}

impl Provider {
    /// Resolve a queue hint to a provider.
    ///
    /// Unknown hints resolve to `Foreign`: claiming a task we cannot serve
    /// and failing it would poison items meant for newer worker builds.
    pub fn from_hint(hint: &str) -> Provider {
        match hint {
            "gen4_turbo" => Provider::Gen4Turbo,
            "gen4.5_turbo" => Provider::Gen45Turbo,
            "gen3a_turbo" => Provider::Gen3aTurbo,
            "veo3" => Provider::Veo3,
            "veo3.1" => Provider::Veo31,
            "veo3.1_fast" => Provider::Veo31Fast,
            "wan_local" => Provider::Foreign,
            _ => Provider::Foreign,
        }
    }

    /// Runway model identifier for the API payload.
    ///
    /// Returns `None` for `Foreign`; callers must have skipped by then.
    pub fn model_name(&self) -> Option<&'static str> {
        match self {
            Provider::Gen4Turbo => Some("gen4_turbo"),
            Provider::Gen45Turbo => Some("gen4.5_turbo"),
            Provider::Gen3aTurbo => Some("gen3a_turbo"),
            Provider::Veo3 => Some("veo3"),
            Provider::Veo31 => Some("veo3.1"),
            Provider::Veo31Fast => Some("veo3.1_fast"),
            Provider::Foreign => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_name().unwrap_or("foreign"))
    }
}
