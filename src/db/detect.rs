//! Client capability detection.
//!
//! Works out, once per process, which connection defaults the client should
//! send (TLS mode and application name). The result is memoized behind a
//! mutex so concurrent first callers never race the detection.

use std::sync::Mutex;
use url::Url;

/// Environment variable that overrides the detected TLS mode.
pub const SSLMODE_ENV: &str = "QUERYDESK_SSLMODE";

/// TLS modes understood by libpq-compatible servers, strongest first.
const SSL_MODES: [&str; 6] = [
    "verify-full",
    "verify-ca",
    "require",
    "prefer",
    "allow",
    "disable",
];

/// Connection defaults applied to every PostgreSQL connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProfile {
    /// TLS negotiation mode.
    pub sslmode: String,
    /// Name reported to the server in `pg_stat_activity`.
    pub application_name: String,
}

/// Memoized profile.
static PROFILE: Mutex<Option<ClientProfile>> = Mutex::new(None);

/// Returns the process-wide client profile, detecting it on first use.
pub fn client_profile() -> ClientProfile {
    let mut guard = super::lock(&PROFILE);
    guard.get_or_insert_with(detect_profile).clone()
}

fn detect_profile() -> ClientProfile {
    let sslmode = [SSLMODE_ENV, "PGSSLMODE"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|v| v.trim().to_lowercase())
        .find(|v| SSL_MODES.contains(&v.as_str()))
        .unwrap_or_else(|| "prefer".to_string());

    let application_name = std::env::var("PGAPPNAME")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());

    tracing::debug!(%sslmode, %application_name, "Detected client profile");

    ClientProfile {
        sslmode,
        application_name,
    }
}

impl ClientProfile {
    /// Appends the profile's parameters to `url`, keeping any the caller already set.
    pub fn apply_to(&self, url: &mut Url) {
        let has = |key: &str| url.query_pairs().any(|(k, _)| k == key);
        let add_sslmode = !has("sslmode");
        let add_app = !has("application_name");

        if !add_sslmode && !add_app {
            return;
        }

        let mut pairs = url.query_pairs_mut();
        if add_sslmode {
            pairs.append_pair("sslmode", &self.sslmode);
        }
        if add_app {
            pairs.append_pair("application_name", &self.application_name);
        }
    }
}
