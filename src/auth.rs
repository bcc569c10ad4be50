use std::sync::Arc;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{PgWireError, PgWireResult};
use tracing::warn;

use crate::identity::UserDirectory;
use crate::observability;

/// Cleartext-password source backed by the configured users.
#[derive(Debug)]
pub struct SlotbookAuthSource {
    directory: Arc<UserDirectory>,
}

impl SlotbookAuthSource {
    pub fn new(directory: Arc<UserDirectory>) -> Self {
        Self { directory }
    }

    fn lookup(&self, user: &str) -> PgWireResult<Password> {
        match self.directory.password_for(user) {
            Some(password) => Ok(Password::new(None, password.into_bytes())),
            None => {
                metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
                warn!(user, "login for unknown user");
                Err(PgWireError::InvalidPassword(user.to_string()))
            }
        }
    }
}

#[async_trait]
impl AuthSource for SlotbookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        self.lookup(login.user().unwrap_or_default())
    }
}
