// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! User registration and lookup.

use tracing::info;

use crate::error::{ShopError, ShopResult, ValidationError};
use crate::model::{NewUser, User};
use crate::pending::PendingOperation;
use crate::storage::traits::StorageError;

use super::ShopCoordinator;

/// Shape check only: one `@` with something on both sides and a dot in the
/// domain.
fn looks_like_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
}

impl ShopCoordinator {
    /// Register a user and queue the welcome notification.
    ///
    /// `password_hash` is stored as given; hashing belongs to the caller.
    #[tracing::instrument(skip(self, password_hash))]
    pub async fn register_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> ShopResult<User> {
        if !looks_like_email(email) {
            return Err(ValidationError::InvalidEmail.into());
        }
        let deadline = self.deadline();

        let new_user = NewUser {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
        };
        let user = match self
            .durable_call(deadline, "insert_user", self.durable.insert_user(&new_user))
            .await
        {
            Err(ShopError::Durable(StorageError::Conflict(_))) => {
                return Err(ValidationError::DuplicateUser.into());
            }
            other => other?,
        };

        self.enqueue_pending(deadline, &PendingOperation::register(&user)).await?;

        info!(user_id = user.id, "User registered");
        Ok(user)
    }

    #[tracing::instrument(skip(self))]
    pub async fn user_by_email(&self, email: &str) -> ShopResult<Option<User>> {
        let deadline = self.deadline();
        self.durable_call(deadline, "user_by_email", self.durable.user_by_email(email))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::looks_like_email;

    #[test]
    fn test_email_shape() {
        assert!(looks_like_email("ana@example.com"));
        assert!(looks_like_email("a.b+c@mail.example.org"));

        assert!(!looks_like_email(""));
        assert!(!looks_like_email("ana"));
        assert!(!looks_like_email("@example.com"));
        assert!(!looks_like_email("ana@"));
        assert!(!looks_like_email("ana@localhost"));
        assert!(!looks_like_email("ana@@example.com"));
        assert!(!looks_like_email("an a@example.com"));
        assert!(!looks_like_email("ana@.com"));
    }
}
