//! Identity provider bridge.
//!
//! Account lifecycle in the external identity provider is out of scope;
//! this module owns only the thin contract the provisioner needs (create
//! an account with a permanent password, keep profile attributes in sync)
//! and its Cognito-backed implementation.

use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::Client;
use aws_sdk_cognitoidentityprovider::types::{AttributeType, MessageActionType};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::info;

use cartage_core::Email;

/// Identity provider failures.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// An account with this username already exists.
    #[error("account already exists")]
    AlreadyExists,

    /// The password violates the provider's policy.
    #[error("password does not meet policy: {0}")]
    RejectedPassword(String),

    /// A request parameter was rejected.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The provider throttled or timed out; retryable.
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),

    /// Any other provider failure.
    #[error("identity provider error: {0}")]
    Service(String),
}

/// External identity provider operations used by account provisioning.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Create an account with a verified email and a permanent password;
    /// no invitation message is sent.
    async fn create_account(
        &self,
        email: &Email,
        first_name: &str,
        surname: &str,
        password: &SecretString,
    ) -> Result<(), IdentityError>;

    /// Propagate profile attribute changes to the provider.
    async fn update_profile(
        &self,
        email: &Email,
        first_name: Option<&str>,
        surname: Option<&str>,
    ) -> Result<(), IdentityError>;
}

/// Cognito-backed [`IdentityProvider`].
pub struct CognitoProvider {
    client: Client,
    user_pool_id: String,
}

impl CognitoProvider {
    /// Create a provider from the ambient AWS configuration.
    pub async fn new(user_pool_id: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let user_pool_id = user_pool_id.into();
        info!(user_pool_id = %user_pool_id, "Connected to Cognito");
        Self {
            client: Client::new(&config),
            user_pool_id,
        }
    }
}

fn attribute(name: &str, value: &str) -> Result<AttributeType, IdentityError> {
    AttributeType::builder()
        .name(name)
        .value(value)
        .build()
        .map_err(|e| IdentityError::InvalidParameter(e.to_string()))
}

#[async_trait]
impl IdentityProvider for CognitoProvider {
    async fn create_account(
        &self,
        email: &Email,
        first_name: &str,
        surname: &str,
        password: &SecretString,
    ) -> Result<(), IdentityError> {
        // Create with a suppressed invitation, then immediately promote the
        // password to permanent so the account is usable right away.
        let result = self
            .client
            .admin_create_user()
            .user_pool_id(&self.user_pool_id)
            .username(email.as_str())
            .user_attributes(attribute("email", email.as_str())?)
            .user_attributes(attribute("email_verified", "true")?)
            .user_attributes(attribute("given_name", first_name)?)
            .user_attributes(attribute("family_name", surname)?)
            .temporary_password(password.expose_secret())
            .message_action(MessageActionType::Suppress)
            .send()
            .await;

        if let Err(err) = result {
            let service = err.into_service_error();
            if service.is_username_exists_exception() {
                return Err(IdentityError::AlreadyExists);
            }
            if service.is_invalid_password_exception() {
                return Err(IdentityError::RejectedPassword(service.to_string()));
            }
            if service.is_invalid_parameter_exception() {
                return Err(IdentityError::InvalidParameter(service.to_string()));
            }
            if service.is_too_many_requests_exception() {
                return Err(IdentityError::Unavailable(service.to_string()));
            }
            return Err(IdentityError::Service(service.to_string()));
        }

        let result = self
            .client
            .admin_set_user_password()
            .user_pool_id(&self.user_pool_id)
            .username(email.as_str())
            .password(password.expose_secret())
            .permanent(true)
            .send()
            .await;

        if let Err(err) = result {
            let service = err.into_service_error();
            if service.is_invalid_password_exception() {
                return Err(IdentityError::RejectedPassword(service.to_string()));
            }
            if service.is_too_many_requests_exception() {
                return Err(IdentityError::Unavailable(service.to_string()));
            }
            return Err(IdentityError::Service(service.to_string()));
        }

        Ok(())
    }

    async fn update_profile(
        &self,
        email: &Email,
        first_name: Option<&str>,
        surname: Option<&str>,
    ) -> Result<(), IdentityError> {
        let mut attributes = Vec::new();
        if let Some(first_name) = first_name {
            attributes.push(attribute("given_name", first_name)?);
        }
        if let Some(surname) = surname {
            attributes.push(attribute("family_name", surname)?);
        }
        if attributes.is_empty() {
            return Ok(());
        }

        let result = self
            .client
            .admin_update_user_attributes()
            .user_pool_id(&self.user_pool_id)
            .username(email.as_str())
            .set_user_attributes(Some(attributes))
            .send()
            .await;

        if let Err(err) = result {
            let service = err.into_service_error();
            if service.is_invalid_parameter_exception() {
                return Err(IdentityError::InvalidParameter(service.to_string()));
            }
            if service.is_too_many_requests_exception() {
                return Err(IdentityError::Unavailable(service.to_string()));
            }
            return Err(IdentityError::Service(service.to_string()));
        }

        Ok(())
    }
}
