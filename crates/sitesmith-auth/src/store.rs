use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reply shape for `register` and `login`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
}

impl AuthResponse {
    fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
        }
    }
}

/// One `username,password` line per user.
pub struct CredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CredentialStore {
    /// Open the store, creating an empty file if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), "opened credential store");
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn register(&self, username: &str, password: &str) -> Result<AuthResponse> {
        let (username, password) = required(username, password)?;
        if username.contains([',', '\n', '\r']) {
            return Err(Error::InvalidUsername);
        }
        if password.contains(['\n', '\r']) {
            return Err(Error::InvalidPassword);
        }

        let _guard = self.lock.lock();
        let mut users = self.read_users()?;
        if users.contains_key(username) {
            return Err(Error::AlreadyExists);
        }
        users.insert(username.to_string(), password.to_string());
        self.write_users(&users)?;

        tracing::info!(username, "registered user");
        Ok(AuthResponse::ok("User registered successfully"))
    }

    pub fn login(&self, username: &str, password: &str) -> Result<AuthResponse> {
        let (username, password) = required(username, password)?;
        let _guard = self.lock.lock();
        match self.read_users()?.get(username) {
            Some(stored) if stored == password => Ok(AuthResponse::ok("Login successful")),
            _ => Err(Error::InvalidCredentials),
        }
    }

    /// `true` when the user was created.
    pub fn register_user(&self, username: &str, password: &str) -> bool {
        self.register(username, password).is_ok()
    }

    /// `true` when the pair matches a stored user.
    pub fn verify_user(&self, username: &str, password: &str) -> bool {
        self.login(username, password).is_ok()
    }

    fn read_users(&self) -> Result<BTreeMap<String, String>> {
        let text = std::fs::read_to_string(&self.path)?;
        Ok(text
            .lines()
            .filter_map(|line| line.split_once(','))
            .filter(|(user, pass)| !user.is_empty() && !pass.is_empty())
            .map(|(user, pass)| (user.to_string(), pass.to_string()))
            .collect())
    }

    fn write_users(&self, users: &BTreeMap<String, String>) -> Result<()> {
        let body: String = users
            .iter()
            .map(|(user, pass)| format!("{user},{pass}\n"))
            .collect();
        std::fs::write(&self.path, body)?;
        Ok(())
    }
}

fn required<'a>(username: &'a str, password: &'a str) -> Result<(&'a str, &'a str)> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(Error::MissingFields);
    }
    Ok((username, password))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, CredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("users.txt")).unwrap();
        (dir, store)
    }

    #[test]
    fn open_creates_an_empty_file() {
        let (_dir, store) = store();
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "");
    }

    #[test]
    fn register_then_login() {
        let (_dir, store) = store();
        let reply = store.register("ada", "lovelace").unwrap();
        assert!(reply.success);
        assert!(store.login("ada", "lovelace").unwrap().success);
        assert_eq!(
            std::fs::read_to_string(store.path()).unwrap(),
            "ada,lovelace\n"
        );
    }

    #[test]
    fn duplicate_usernames_are_rejected() {
        let (_dir, store) = store();
        store.register("ada", "one").unwrap();
        assert!(matches!(store.register("ada", "two"), Err(Error::AlreadyExists)));
        assert!(store.verify_user("ada", "one"));
    }

    #[test]
    fn wrong_or_unknown_credentials_fail() {
        let (_dir, store) = store();
        store.register("ada", "one").unwrap();
        assert!(matches!(store.login("ada", "two"), Err(Error::InvalidCredentials)));
        assert!(matches!(store.login("bob", "one"), Err(Error::InvalidCredentials)));
    }

    #[test]
    fn blank_and_unstorable_fields_are_rejected() {
        let (_dir, store) = store();
        assert!(matches!(store.register("", "x"), Err(Error::MissingFields)));
        assert!(matches!(store.register("ada", ""), Err(Error::MissingFields)));
        assert!(matches!(store.register("a,b", "x"), Err(Error::InvalidUsername)));
        assert!(matches!(store.register("ada", "x\ny"), Err(Error::InvalidPassword)));
        assert!(!store.register_user("  ", "x"));
    }

    #[test]
    fn passwords_may_contain_commas() {
        let (_dir, store) = store();
        store.register("ada", "a,b,c").unwrap();
        assert!(store.verify_user("ada", "a,b,c"));
    }

    #[test]
    fn users_survive_reopening() {
        let (dir, store) = store();
        store.register("ada", "one").unwrap();
        store.register("bob", "two").unwrap();
        drop(store);

        let reopened = CredentialStore::open(dir.path().join("users.txt")).unwrap();
        assert!(reopened.verify_user("bob", "two"));
        assert!(reopened.verify_user("ada", "one"));
    }

    #[test]
    fn reply_serializes_to_wire_shape() {
        let reply = AuthResponse::ok("Login successful");
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            serde_json::json!({"success": true, "message": "Login successful"})
        );
    }
}
