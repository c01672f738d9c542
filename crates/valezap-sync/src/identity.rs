//! Player and session identifiers.
//!
//! The player id survives restarts through a `player_id` file in the state
//! directory. The session id lives for one process run.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;
use valezap_types::ConversationKey;

use crate::error::IdentityError;

const PLAYER_ID_FILE: &str = "player_id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub player_id: String,
    pub session_id: String,
}

impl Identity {
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(self.session_id.clone(), self.player_id.clone())
    }
}

fn player_id_path(state_dir: &Path) -> PathBuf {
    state_dir.join(PLAYER_ID_FILE)
}

/// Resolve identity. An explicit player override is used as-is and never
/// written to disk; otherwise the persisted id is reused or a new one minted.
pub async fn resolve_identity(
    state_dir: &Path,
    player_override: Option<String>,
    session_override: Option<String>,
) -> Result<Identity, IdentityError> {
    let player_id = match player_override.filter(|p| !p.trim().is_empty()) {
        Some(player) => player.trim().to_string(),
        None => load_or_create_player_id(state_dir).await?,
    };
    let session_id = session_override
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Ok(Identity {
        player_id,
        session_id,
    })
}

async fn load_or_create_player_id(state_dir: &Path) -> Result<String, IdentityError> {
    let path = player_id_path(state_dir);
    if let Ok(raw) = tokio::fs::read_to_string(&path).await {
        let stored = raw.trim();
        if !stored.is_empty() {
            debug!("reusing persisted player id from {}", path.display());
            return Ok(stored.to_string());
        }
    }

    let player_id = Uuid::new_v4().to_string();
    let io_err = |source| IdentityError::Io {
        path: path.clone(),
        source,
    };
    tokio::fs::create_dir_all(state_dir).await.map_err(io_err)?;
    tokio::fs::write(&path, &player_id).await.map_err(io_err)?;
    info!("minted new player id, persisted to {}", path.display());
    Ok(player_id)
}
