//! Credential store

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::authn::session::{sanitize_credential, Session};
use crate::errors::ClientError;
use crate::filesys::file::File;

/// Persisted key of the access token
pub const TOKEN_KEY: &str = "jstratusd-token";

/// Persisted key of the user id
pub const USER_ID_KEY: &str = "jstratusd-userId";

/// On-disk form. Both keys live in one document so they are written and
/// removed together.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCredentials {
    #[serde(rename = "jstratusd-token", default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,

    #[serde(rename = "jstratusd-userId", default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
}

/// Process-wide holder of the current [`Session`]
///
/// Reads are synchronous and never touch the disk. Writers are serialized so
/// an interleaved `set` and `clear` cannot leave memory and disk disagreeing.
pub struct CredentialStore {
    current: RwLock<Session>,
    file: Option<Arc<File>>,
    write_lock: Mutex<()>,
}

impl CredentialStore {
    /// Store that forgets everything when the process ends
    pub fn in_memory() -> Self {
        Self {
            current: RwLock::new(Session::anonymous()),
            file: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Restore the session persisted in `file`.
    ///
    /// A missing file means no session. An unreadable one is discarded, since
    /// a half-valid credential is worse than none.
    pub async fn load(file: Arc<File>) -> Result<Self, ClientError> {
        let session = if file.exists().await {
            match file.read_json::<StoredCredentials>().await {
                Ok(stored) => Session::new(stored.token.as_deref(), stored.user_id.as_deref()),
                Err(e) => {
                    warn!("Discarding unreadable credentials file: {}", e);
                    file.delete().await?;
                    Session::anonymous()
                }
            }
        } else {
            Session::anonymous()
        };

        debug!(
            "Credential store loaded (authenticated: {})",
            session.is_authenticated()
        );

        Ok(Self {
            current: RwLock::new(session),
            file: Some(file),
            write_lock: Mutex::new(()),
        })
    }

    /// Snapshot of the current session
    pub fn get(&self) -> Session {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the session. The token is sanitized first; a token that
    /// sanitizes to nothing is rejected.
    pub async fn set(&self, token: &str, user_id: Option<&str>) -> Result<Session, ClientError> {
        let token = sanitize_credential(token)
            .ok_or_else(|| ClientError::Validation("empty or placeholder token".to_string()))?;
        let user_id = user_id.and_then(sanitize_credential);

        let _guard = self.write_lock.lock().await;

        if let Some(file) = &self.file {
            file.write_json_atomic(&StoredCredentials {
                token: Some(token.clone()),
                user_id: user_id.clone(),
            })
            .await?;
        }

        let session = Session::new(Some(&token), user_id.as_deref());
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = session.clone();

        info!("Session stored");
        Ok(session)
    }

    /// Drop token and user id together.
    ///
    /// Memory is cleared before the file so requests issued while the file is
    /// being removed already go out unauthenticated.
    pub async fn clear(&self) -> Result<(), ClientError> {
        let _guard = self.write_lock.lock().await;

        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Session::anonymous();

        if let Some(file) = &self.file {
            file.delete().await?;
        }

        info!("Session cleared");
        Ok(())
    }
}
