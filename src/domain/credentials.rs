//! Credential and identity extraction.
//!
//! Depending on the configured auth type the credential is a single user key
//! (`API_KEY`) or an application id with an optional application key
//! (`APP_ID`). Credentials are read from either the query string or the
//! request headers.

use crate::domain::error::ConfigError;
use crate::domain::request::ApiRequest;
use serde::Deserialize;
use std::fmt;

/// Where credentials are read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialsLocation {
    Query,
    #[default]
    Header,
}

/// How requests are authenticated against the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum AuthType {
    #[default]
    #[serde(rename = "API_KEY")]
    ApiKey,
    #[serde(rename = "APP_ID")]
    AppId,
    /// Accepted by the configuration schema but not implemented.
    #[serde(rename = "OAUTH")]
    OAuth,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AuthType::ApiKey => "API_KEY",
            AuthType::AppId => "APP_ID",
            AuthType::OAuth => "OAUTH",
        })
    }
}

/// Identity fields carried by authorize calls and report transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Identity {
    pub user_key: Option<String>,
    pub app_id: Option<String>,
    pub app_key: Option<String>,
    pub referer: Option<String>,
    pub user_id: Option<String>,
}

impl Identity {
    /// Identity for a user-key credential.
    pub fn user_key(user_key: impl Into<String>) -> Self {
        Self {
            user_key: Some(user_key.into()),
            ..Self::default()
        }
    }

    /// Identity for an application id and optional key.
    pub fn app(app_id: impl Into<String>, app_key: Option<String>) -> Self {
        Self {
            app_id: Some(app_id.into()),
            app_key,
            ..Self::default()
        }
    }

    /// The primary credential: the user key, or else the app id.
    pub fn credential(&self) -> Option<&str> {
        self.user_key.as_deref().or(self.app_id.as_deref())
    }
}

/// Parameter names the credentials are looked up under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialParams {
    pub user_key: String,
    pub app_id: String,
    pub app_key: String,
    pub user_id: Option<String>,
}

impl Default for CredentialParams {
    fn default() -> Self {
        Self {
            user_key: "user_key".to_string(),
            app_id: "app_id".to_string(),
            app_key: "app_key".to_string(),
            user_id: None,
        }
    }
}

const REFERER_HEADER: &str = "referer";

/// Reads the identity of a request according to the configured auth type.
#[derive(Debug, Clone)]
pub struct CredentialExtractor {
    location: CredentialsLocation,
    auth_type: AuthType,
    params: CredentialParams,
}

impl CredentialExtractor {
    /// Create an extractor.
    ///
    /// # Errors
    /// Returns `ConfigError::UnsupportedAuthType` for `OAUTH`.
    pub fn new(
        location: CredentialsLocation,
        auth_type: AuthType,
        params: CredentialParams,
    ) -> Result<Self, ConfigError> {
        if auth_type == AuthType::OAuth {
            return Err(ConfigError::UnsupportedAuthType(auth_type.to_string()));
        }
        Ok(Self {
            location,
            auth_type,
            params,
        })
    }

    pub fn auth_type(&self) -> AuthType {
        self.auth_type
    }

    pub fn location(&self) -> CredentialsLocation {
        self.location
    }

    fn lookup<'a>(&self, request: &'a ApiRequest, name: &str) -> Option<&'a str> {
        let value = match self.location {
            CredentialsLocation::Query => request.query_param(name),
            CredentialsLocation::Header => request.header(name),
        };
        value.filter(|v| !v.is_empty())
    }

    /// Extract the identity of `request`.
    ///
    /// Returns `None` when the mandatory credential for the auth type is absent.
    pub fn extract(&self, request: &ApiRequest) -> Option<Identity> {
        let mut identity = match self.auth_type {
            AuthType::ApiKey => Identity::user_key(self.lookup(request, &self.params.user_key)?),
            AuthType::AppId => Identity::app(
                self.lookup(request, &self.params.app_id)?,
                self.lookup(request, &self.params.app_key)
                    .map(str::to_string),
            ),
            AuthType::OAuth => return None,
        };

        identity.referer = request
            .header(REFERER_HEADER)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        identity.user_id = self
            .params
            .user_id
            .as_deref()
            .and_then(|name| self.lookup(request, name))
            .map(str::to_string);

        Some(identity)
    }
}
