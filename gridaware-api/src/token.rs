//! Session token persistence
//!
//! The CLI keeps the backend JWT in a plain file under the GridAware state
//! directory (`$GRIDAWARE_HOME`, or `~/.gridaware`).

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("could not determine a home directory")]
    NoHome,
    #[error("no session token saved; log in first")]
    NotLoggedIn,
    #[error("token file error: {0}")]
    Io(#[from] io::Error),
}

/// Resolve the state directory: `$GRIDAWARE_HOME` wins, `~/.gridaware`
/// otherwise.
pub fn gridaware_home() -> Result<PathBuf, TokenError> {
    if let Ok(dir) = std::env::var("GRIDAWARE_HOME") {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".gridaware"))
        .ok_or(TokenError::NoHome)
}

/// Load/save/clear of the session JWT file.
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self {
            path: home.into().join("session.jwt"),
        }
    }

    /// Store rooted at [`gridaware_home`].
    pub fn open_default() -> Result<Self, TokenError> {
        Ok(Self::new(gridaware_home()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<String, TokenError> {
        if !self.path.exists() {
            return Err(TokenError::NotLoggedIn);
        }
        let token = std::fs::read_to_string(&self.path)?;
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::NotLoggedIn);
        }
        Ok(token.to_string())
    }

    pub fn save(&self, token: &str) -> Result<(), TokenError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, token)?;
        log::debug!("session token saved to {}", self.path.display());
        Ok(())
    }

    /// Remove the saved token. Succeeds if none was saved.
    pub fn clear(&self) -> Result<(), TokenError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save("eyJhbGciOiJIUzI1NiJ9.e30.sig").unwrap();
        assert_eq!(store.load().unwrap(), "eyJhbGciOiJIUzI1NiJ9.e30.sig");
    }

    #[test]
    fn load_without_a_token_reports_not_logged_in() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        assert!(matches!(store.load(), Err(TokenError::NotLoggedIn)));
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save("  tok-123\n").unwrap();
        assert_eq!(store.load().unwrap(), "tok-123");
    }

    #[test]
    fn an_empty_file_counts_as_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save("").unwrap();
        assert!(matches!(store.load(), Err(TokenError::NotLoggedIn)));
    }

    #[test]
    fn save_creates_the_state_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("nested"));
        store.save("tok").unwrap();
        assert_eq!(store.load().unwrap(), "tok");
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save("tok").unwrap();
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(matches!(store.load(), Err(TokenError::NotLoggedIn)));
    }
}
