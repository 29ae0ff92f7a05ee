//! Anonymous identity for an OpenProse install.
//!
//! A single JSON file (`<project>/.prose/state.json` by default) holds three keys:
//!
//! ```text
//! {
//!   "USER_ID": "user-<12 alphanumeric>",          -- generated once, never replaced
//!   "SESSION_ID": "sess-<unix-ms>-<6 alphanumeric>", -- rotated after one hour
//!   "OPENPROSE_TELEMETRY": "enabled" | "disabled"
//! }
//! ```
//!
//! [`IdentityStore::load`] reconciles the file and never fails: any I/O error
//! produces a [`StateLoad::Degraded`] outcome carrying a telemetry-disabled state.
//! There is no locking. Two processes reconciling at the same time race and the
//! last writer wins.

use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::StateError;

/// Sessions older than this (by their embedded timestamp) are rotated.
pub const SESSION_TTL_MS: u64 = 3_600_000;

/// `USER_ID` used by the degraded fallback state.
pub const UNKNOWN_USER_ID: &str = "unknown";

const USER_PREFIX: &str = "user-";
const SESSION_PREFIX: &str = "sess-";
const USER_TOKEN_LEN: usize = 12;
const SESSION_TOKEN_LEN: usize = 6;
const TOKEN_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetrySetting {
    Enabled,
    Disabled,
}

impl TelemetrySetting {
    pub fn as_str(self) -> &'static str {
        match self {
            TelemetrySetting::Enabled => "enabled",
            TelemetrySetting::Disabled => "disabled",
        }
    }

    pub fn is_enabled(self) -> bool {
        self == TelemetrySetting::Enabled
    }

    /// Only the literal `"disabled"` opts out.
    fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            Some("disabled") => TelemetrySetting::Disabled,
            _ => TelemetrySetting::Enabled,
        }
    }
}

impl std::fmt::Display for TelemetrySetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The reconciled identity triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityState {
    pub user_id: String,
    pub session_id: String,
    pub telemetry: TelemetrySetting,
}

impl IdentityState {
    /// Synthetic state returned when the state file cannot be used.
    pub fn degraded(now_ms: u64) -> Self {
        Self {
            user_id: UNKNOWN_USER_ID.into(),
            session_id: generate_session_id(now_ms),
            telemetry: TelemetrySetting::Disabled,
        }
    }
}

/// Outcome of [`IdentityStore::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateLoad {
    /// The file was read (or created) and brought up to date.
    Reconciled {
        state: IdentityState,
        user_created: bool,
        session_rotated: bool,
    },
    /// The file could not be used; `state` is the synthetic fallback.
    Degraded { state: IdentityState, reason: String },
}

impl StateLoad {
    pub fn state(&self) -> &IdentityState {
        match self {
            StateLoad::Reconciled { state, .. } | StateLoad::Degraded { state, .. } => state,
        }
    }

    pub fn into_state(self) -> IdentityState {
        match self {
            StateLoad::Reconciled { state, .. } | StateLoad::Degraded { state, .. } => state,
        }
    }

    /// True when this load generated the install's `USER_ID`.
    pub fn is_new_user(&self) -> bool {
        matches!(
            self,
            StateLoad::Reconciled {
                user_created: true,
                ..
            }
        )
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, StateLoad::Degraded { .. })
    }
}

/// On-disk form. Keys this crate does not own are carried through rewrites.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(rename = "USER_ID", default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(rename = "SESSION_ID", default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
    #[serde(
        rename = "OPENPROSE_TELEMETRY",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    telemetry: Option<String>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl StateFile {
    fn fresh() -> Self {
        Self {
            telemetry: Some(TelemetrySetting::Enabled.as_str().into()),
            ..Self::default()
        }
    }

    fn to_state(&self) -> IdentityState {
        IdentityState {
            user_id: self.user_id.clone().unwrap_or_default(),
            session_id: self.session_id.clone().unwrap_or_default(),
            telemetry: TelemetrySetting::from_raw(self.telemetry.as_deref()),
        }
    }
}

struct Reconciled {
    file: StateFile,
    user_created: bool,
    session_rotated: bool,
}

/// File-backed identity repository with a single load-and-reconcile operation.
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> StateLoad {
        self.load_at(now_ms()).await
    }

    /// Reconcile against an explicit clock reading (milliseconds since epoch).
    pub async fn load_at(&self, now_ms: u64) -> StateLoad {
        match self.reconcile(now_ms).await {
            Ok(reconciled) => StateLoad::Reconciled {
                state: reconciled.file.to_state(),
                user_created: reconciled.user_created,
                session_rotated: reconciled.session_rotated,
            },
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Identity state unavailable, using degraded state"
                );
                StateLoad::Degraded {
                    state: IdentityState::degraded(now_ms),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Reconcile, then persist the telemetry flag.
    pub async fn set_telemetry(
        &self,
        setting: TelemetrySetting,
    ) -> Result<IdentityState, StateError> {
        let mut reconciled = self.reconcile(now_ms()).await?;
        reconciled.file.telemetry = Some(setting.as_str().into());
        self.write_file(&reconciled.file).await?;
        tracing::info!(telemetry = %setting, "Telemetry setting saved");
        Ok(reconciled.file.to_state())
    }

    async fn reconcile(&self, now_ms: u64) -> Result<Reconciled, StateError> {
        let parent = self.path.parent().ok_or_else(|| {
            StateError::DirectoryUnavailable(format!("{} has no parent", self.path.display()))
        })?;
        tokio::fs::create_dir_all(parent).await?;

        let mut file = self.read_file().await?.unwrap_or_else(StateFile::fresh);

        let user_created = file.user_id.as_deref().is_none_or(str::is_empty);
        if user_created {
            file.user_id = Some(generate_user_id());
        }

        let session_rotated = file
            .session_id
            .as_deref()
            .is_none_or(|id| session_expired(id, now_ms));
        if session_rotated {
            file.session_id = Some(generate_session_id(now_ms));
        }

        if user_created || session_rotated {
            self.write_file(&file).await?;
            tracing::debug!(
                path = %self.path.display(),
                user_created,
                session_rotated,
                "Identity state written"
            );
        }

        Ok(Reconciled {
            file,
            user_created,
            session_rotated,
        })
    }

    /// `Ok(None)` when the file is absent or unparsable.
    async fn read_file(&self) -> Result<Option<StateFile>, StateError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<StateFile>(&content) {
            Ok(file) => Ok(Some(file)),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Corrupt identity state, replacing with defaults"
                );
                Ok(None)
            }
        }
    }

    async fn write_file(&self, file: &StateFile) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(file)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

pub fn generate_user_id() -> String {
    format!("{USER_PREFIX}{}", random_token(USER_TOKEN_LEN))
}

pub fn generate_session_id(now_ms: u64) -> String {
    format!("{SESSION_PREFIX}{now_ms}-{}", random_token(SESSION_TOKEN_LEN))
}

/// Timestamp embedded in a `sess-<ms>-<token>` identifier.
pub fn session_timestamp(session_id: &str) -> Option<u64> {
    session_id
        .strip_prefix(SESSION_PREFIX)?
        .split('-')
        .next()?
        .parse()
        .ok()
}

/// Unparsable identifiers count as expired. Timestamps in the future never expire.
pub fn session_expired(session_id: &str, now_ms: u64) -> bool {
    match session_timestamp(session_id) {
        Some(started) => now_ms.saturating_sub(started) > SESSION_TTL_MS,
        None => true,
    }
}

// Not cryptographic. Identifiers only group telemetry events.
fn random_token(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(TOKEN_CHARSET[rng.gen_range(0..TOKEN_CHARSET.len())]))
        .collect()
}
