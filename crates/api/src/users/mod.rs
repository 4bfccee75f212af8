//! Account provisioning: user profile records bridged to the external
//! identity provider.
//!
//! The profile row in the users table is the application's record;
//! manually-registered accounts additionally get an identity-provider
//! account created before the row is written, so a provider rejection
//! never leaves an orphaned profile.

pub mod identity;

use std::sync::Arc;

use chrono::Utc;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use cartage_core::{Email, EmailError, UserId};

use crate::store::{Item, Key, KeyValueStore, StoreError, UpdateAction, Value};
use identity::{IdentityError, IdentityProvider};

/// Attribute names of the users table.
mod attr {
    pub const USER_ID: &str = "user_id";
    pub const EMAIL: &str = "email";
    pub const AUTH_TYPE: &str = "auth_type";
    pub const FIRST_NAME: &str = "first_name";
    pub const SURNAME: &str = "surname";
    pub const ADDRESS: &str = "address";
    pub const PHONE: &str = "phone";
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
}

/// How the account authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    /// Registered with email and password through the identity provider.
    Manual,
    /// Registered through a federated identity; no credentials to manage.
    Federated,
}

impl AuthKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Federated => "federated",
        }
    }
}

/// A new account request.
#[derive(Debug, Deserialize)]
pub struct NewAccount {
    /// Email address; must be unique.
    pub email: String,
    /// Authentication kind.
    pub auth_type: AuthKind,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub surname: String,
    /// Optional postal address.
    #[serde(default)]
    pub address: Option<String>,
    /// Optional phone number.
    #[serde(default)]
    pub phone: Option<String>,
    /// Password, required for manual accounts.
    #[serde(default)]
    pub password: Option<SecretString>,
}

/// A partial profile update; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize)]
pub struct ProfileChanges {
    /// New given name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// New family name.
    #[serde(default)]
    pub surname: Option<String>,
    /// New postal address.
    #[serde(default)]
    pub address: Option<String>,
    /// New phone number.
    #[serde(default)]
    pub phone: Option<String>,
}

/// Provisioning failures.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The email failed validation.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// A required field was missing or blank.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// An account with this email already exists.
    #[error("User already exists")]
    EmailTaken,

    /// The password violates the identity provider's policy.
    #[error("password does not meet policy: {0}")]
    RejectedPassword(String),

    /// The target user record does not exist.
    #[error("unknown user_id")]
    UnknownUser,

    /// An update carried no fields.
    #[error("Nothing to update")]
    NothingToUpdate,

    /// Identity provider failure not covered by a more specific variant.
    #[error(transparent)]
    Identity(IdentityError),

    /// Underlying store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Creates and updates user profile records.
#[derive(Clone)]
pub struct AccountProvisioner {
    store: Arc<dyn KeyValueStore>,
    identity: Arc<dyn IdentityProvider>,
    table: String,
    email_index: String,
}

impl AccountProvisioner {
    /// Create a provisioner over `table`, using `email_index` for
    /// uniqueness checks.
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        identity: Arc<dyn IdentityProvider>,
        table: impl Into<String>,
        email_index: impl Into<String>,
    ) -> Self {
        Self {
            store,
            identity,
            table: table.into(),
            email_index: email_index.into(),
        }
    }

    /// Provision a new account and return its generated id.
    ///
    /// For manual accounts the identity-provider account is created first;
    /// the profile row is only written once the provider accepted the
    /// credentials.
    ///
    /// # Errors
    ///
    /// Validation errors before any write; [`ProvisionError::EmailTaken`]
    /// on duplicates (application record or provider); provider and store
    /// failures otherwise.
    pub async fn create(&self, account: NewAccount) -> Result<UserId, ProvisionError> {
        let email = Email::parse(account.email.trim())?;
        let first_name = required(&account.first_name, "first_name")?;
        let surname = required(&account.surname, "surname")?;

        if self.email_exists(&email).await? {
            return Err(ProvisionError::EmailTaken);
        }

        if account.auth_type == AuthKind::Manual {
            let password = account
                .password
                .as_ref()
                .ok_or(ProvisionError::MissingField("password"))?;
            self.identity
                .create_account(&email, first_name, surname, password)
                .await
                .map_err(|err| match err {
                    IdentityError::AlreadyExists => ProvisionError::EmailTaken,
                    IdentityError::RejectedPassword(msg) => ProvisionError::RejectedPassword(msg),
                    other => ProvisionError::Identity(other),
                })?;
        }

        let user_id = UserId::generate();
        let now = Utc::now().to_rfc3339();
        let mut item = Item::new();
        item.insert(attr::USER_ID.to_owned(), Value::text(user_id.as_str()));
        item.insert(attr::EMAIL.to_owned(), Value::text(email.as_str()));
        item.insert(
            attr::AUTH_TYPE.to_owned(),
            Value::text(account.auth_type.as_str()),
        );
        item.insert(attr::FIRST_NAME.to_owned(), Value::text(first_name));
        item.insert(attr::SURNAME.to_owned(), Value::text(surname));
        if let Some(address) = trimmed(account.address.as_deref()) {
            item.insert(attr::ADDRESS.to_owned(), Value::text(address));
        }
        if let Some(phone) = trimmed(account.phone.as_deref()) {
            item.insert(attr::PHONE.to_owned(), Value::text(phone));
        }
        item.insert(attr::CREATED_AT.to_owned(), Value::text(now.clone()));
        item.insert(attr::UPDATED_AT.to_owned(), Value::text(now));

        self.store.put(&self.table, item).await?;
        debug!(user_id = %user_id, "provisioned account");
        Ok(user_id)
    }

    /// Apply a partial profile update.
    ///
    /// Name changes on manual accounts propagate to the identity provider
    /// after the store write.
    ///
    /// # Errors
    ///
    /// [`ProvisionError::UnknownUser`] for a missing record,
    /// [`ProvisionError::NothingToUpdate`] for an empty change set,
    /// provider and store failures otherwise.
    pub async fn update(
        &self,
        user_id: &UserId,
        changes: ProfileChanges,
    ) -> Result<(), ProvisionError> {
        let key = Key::new(attr::USER_ID, user_id.as_str());
        let current = self
            .store
            .get(&self.table, &key)
            .await?
            .ok_or(ProvisionError::UnknownUser)?;

        let mut actions = Vec::new();
        for (field, value) in [
            (attr::FIRST_NAME, changes.first_name.as_deref()),
            (attr::SURNAME, changes.surname.as_deref()),
            (attr::ADDRESS, changes.address.as_deref()),
            (attr::PHONE, changes.phone.as_deref()),
        ] {
            if let Some(value) = trimmed(value) {
                actions.push(UpdateAction::set(field, value));
            }
        }
        if actions.is_empty() {
            return Err(ProvisionError::NothingToUpdate);
        }
        actions.push(UpdateAction::set(
            attr::UPDATED_AT,
            Utc::now().to_rfc3339(),
        ));

        self.store
            .update(&self.table, &key, actions, crate::store::Condition::Always)
            .await?;

        let is_manual = current
            .get(attr::AUTH_TYPE)
            .and_then(Value::as_text)
            .is_some_and(|kind| kind == AuthKind::Manual.as_str());
        let name_changed = changes.first_name.is_some() || changes.surname.is_some();
        if is_manual && name_changed {
            let email = current
                .get(attr::EMAIL)
                .and_then(Value::as_text)
                .map(Email::parse)
                .transpose()?
                .ok_or_else(|| {
                    ProvisionError::Store(StoreError::Corrupt(
                        "user record is missing email".to_owned(),
                    ))
                })?;
            self.identity
                .update_profile(
                    &email,
                    trimmed(changes.first_name.as_deref()),
                    trimmed(changes.surname.as_deref()),
                )
                .await
                .map_err(ProvisionError::Identity)?;
        }

        Ok(())
    }

    async fn email_exists(&self, email: &Email) -> Result<bool, ProvisionError> {
        let page = self
            .store
            .query_index(
                &self.table,
                &self.email_index,
                attr::EMAIL,
                &Value::text(email.as_str()),
                None,
            )
            .await?;
        Ok(!page.items.is_empty())
    }
}

fn required<'a>(value: &'a str, field: &'static str) -> Result<&'a str, ProvisionError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ProvisionError::MissingField(field));
    }
    Ok(value)
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
