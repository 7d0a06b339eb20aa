//! Player roles and the persistent role directory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{LauncherError, LauncherResult};

/// Role given to names the directory has never seen.
pub const DEFAULT_ROLE: &str = "Player";

/// Known roles, highest rank first.
pub const ROLE_PRIORITY: [(&str, u8); 4] = [("Owner", 0), ("Admin", 1), ("VIP", 2), ("Player", 3)];

const UNKNOWN_ROLE_PRIORITY: u8 = u8::MAX;

/// An online player with the role label the directory assigns them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub role: String,
}

impl Player {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
        }
    }
}

/// Sort key of a role; unknown roles sort after every known one.
pub fn role_priority(role: &str) -> u8 {
    ROLE_PRIORITY
        .iter()
        .find(|(name, _)| *name == role)
        .map(|(_, priority)| *priority)
        .unwrap_or(UNKNOWN_ROLE_PRIORITY)
}

/// Orders players by role rank, then case-insensitively by name.
pub fn sort_players(players: &mut [Player]) {
    players.sort_by_cached_key(|p| (role_priority(&p.role), p.name.to_lowercase()));
}

/// Name to role mapping backed by a JSON object file.
///
/// Every mutation rewrites the whole file. Two launchers sharing one file
/// resolve conflicts as last writer wins.
#[derive(Debug)]
pub struct RoleDirectory {
    path: PathBuf,
    roles: Mutex<BTreeMap<String, String>>,
}

impl RoleDirectory {
    /// Opens the directory at `path`. A missing or unreadable file starts
    /// empty.
    pub async fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let roles = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                Ok(roles) => {
                    info!("👥 Loaded {} role entries from {}", roles.len(), path.display());
                    roles
                }
                Err(e) => {
                    warn!("Role file {} is not valid JSON, starting empty: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No role file at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                warn!("Failed to read role file {}: {}", path.display(), e);
                BTreeMap::new()
            }
        };

        Self {
            path,
            roles: Mutex::new(roles),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn get_role(&self, name: &str) -> String {
        self.roles
            .lock()
            .await
            .get(name)
            .cloned()
            .unwrap_or_else(|| DEFAULT_ROLE.to_string())
    }

    /// Assigns `role` to `name` and persists right away.
    pub async fn set_role(&self, name: &str, role: &str) -> LauncherResult<()> {
        let mut roles = self.roles.lock().await;
        let mut updated = roles.clone();
        updated.insert(name.to_string(), role.to_string());
        self.persist(&updated).await?;
        *roles = updated;
        info!("Role of {} set to {}", name, role);
        Ok(())
    }

    /// Adds every unseen name with [`DEFAULT_ROLE`]. Writes the file only when
    /// something was added and returns how many entries were.
    ///
    /// The in-memory map only changes once the file is written, so a failed
    /// or cancelled write is retried by the next merge.
    pub async fn merge_observed(&self, names: &[String]) -> LauncherResult<usize> {
        let mut roles = self.roles.lock().await;
        let mut updated = roles.clone();
        for name in names {
            updated
                .entry(name.clone())
                .or_insert_with(|| DEFAULT_ROLE.to_string());
        }
        let added = updated.len() - roles.len();
        if added == 0 {
            return Ok(0);
        }

        self.persist(&updated).await?;
        *roles = updated;
        Ok(added)
    }

    /// Labels `names` with their roles and returns them in display order.
    pub async fn players_for(&self, names: &[String]) -> Vec<Player> {
        let roles = self.roles.lock().await;
        let mut players: Vec<Player> = names
            .iter()
            .map(|name| {
                let role = roles.get(name).map(String::as_str).unwrap_or(DEFAULT_ROLE);
                Player::new(name.clone(), role)
            })
            .collect();
        sort_players(&mut players);
        players
    }

    /// Snapshot of every known entry, sorted by name.
    pub async fn entries(&self) -> Vec<(String, String)> {
        self.roles
            .lock()
            .await
            .iter()
            .map(|(name, role)| (name.clone(), role.clone()))
            .collect()
    }

    async fn persist(&self, roles: &BTreeMap<String, String>) -> LauncherResult<()> {
        let content = serde_json::to_string_pretty(roles)
            .map_err(|e| LauncherError::Config(format!("cannot encode roles: {}", e)))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::Io(parent.to_path_buf(), e))?;
        }
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| LauncherError::Io(self.path.clone(), e))
    }
}
