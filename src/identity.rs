use std::fmt;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::limits::*;

/// Opaque owner identifier: the case-folded username.
///
/// Two spellings of one name (`Simone`, `simone`) map to the same id, which is
/// what makes owner comparisons case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn from_username(username: &str) -> Self {
        Self(username.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    /// Display spelling, as configured.
    pub username: String,
    password: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("empty username")]
    EmptyUsername,
    #[error("username too long: {0} bytes")]
    UsernameTooLong(usize),
    #[error("duplicate username: {0}")]
    Duplicate(String),
    #[error("too many users")]
    TooManyUsers,
    #[error("malformed user entry {0:?} (expected name:password)")]
    Malformed(String),
}

/// The identity collaborator: known users and their login passwords.
#[derive(Debug, Default)]
pub struct UserDirectory {
    users: DashMap<UserId, User>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `name:password,name:password`. Blank entries are skipped.
    pub fn from_spec(spec: &str) -> Result<Self, IdentityError> {
        let directory = Self::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, password) = entry
                .split_once(':')
                .ok_or_else(|| IdentityError::Malformed(entry.to_string()))?;
            directory.register(name, password)?;
        }
        Ok(directory)
    }

    pub fn register(&self, username: &str, password: &str) -> Result<UserId, IdentityError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(IdentityError::EmptyUsername);
        }
        if username.len() > MAX_USERNAME_LEN {
            return Err(IdentityError::UsernameTooLong(username.len()));
        }
        if self.users.len() >= MAX_USERS {
            return Err(IdentityError::TooManyUsers);
        }
        let id = UserId::from_username(username);
        match self.users.entry(id.clone()) {
            Entry::Occupied(_) => Err(IdentityError::Duplicate(username.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(User {
                    id: id.clone(),
                    username: username.to_string(),
                    password: password.to_string(),
                });
                Ok(id)
            }
        }
    }

    /// Case-insensitive lookup of a known user.
    pub fn resolve(&self, username: &str) -> Option<UserId> {
        let id = UserId::from_username(username);
        self.users.contains_key(&id).then_some(id)
    }

    /// Map the login name carried by a request to an owner id.
    pub fn current_user(&self, login: Option<&str>) -> Option<UserId> {
        login.and_then(|name| self.resolve(name))
    }

    pub fn username(&self, id: &UserId) -> Option<String> {
        self.users.get(id).map(|u| u.username.clone())
    }

    pub fn password_for(&self, username: &str) -> Option<String> {
        self.users
            .get(&UserId::from_username(username))
            .map(|u| u.password.clone())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
