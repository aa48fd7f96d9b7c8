//! On-disk persistence of per-platform session cookies.
//!
//! One JSON file per platform under the sessions directory. Writes go to a
//! temp file first and are renamed into place.

use crate::error::BridgeResult;
use crate::http::CookieJar;
use crate::platform::Platform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredential {
    pub platform: Platform,
    pub cookies: CookieJar,
    pub saved_at: DateTime<Utc>,
}

impl SessionCredential {
    pub fn new(platform: Platform, cookies: CookieJar) -> Self {
        Self {
            platform,
            cookies,
            saved_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, platform: Platform) -> PathBuf {
        self.dir.join(format!("{}_session.json", platform.as_str()))
    }

    /// Load the stored credential. A corrupt file is removed and treated as
    /// absent.
    pub fn load(&self, platform: Platform) -> BridgeResult<Option<SessionCredential>> {
        let path = self.path_for(platform);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<SessionCredential>(&raw) {
            Ok(credential) if credential.platform == platform => Ok(Some(credential)),
            Ok(_) | Err(_) => {
                tracing::warn!("discarding unreadable {platform} session at {}", path.display());
                self.invalidate(platform)?;
                Ok(None)
            }
        }
    }

    pub fn save(&self, credential: &SessionCredential) -> BridgeResult<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(credential.platform);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(credential)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn invalidate(&self, platform: Platform) -> BridgeResult<()> {
        match std::fs::remove_file(self.path_for(platform)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
