use std::fmt;
use std::sync::Arc;

use dbbuddy_core::config::CloudConfig;
use dbbuddy_core::errors::ControlPlaneError;
use gcp_auth::TokenProvider;
use secrecy::SecretString;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Source of bearer tokens for control-plane requests.
#[derive(Clone)]
pub enum Credentials {
    Static(SecretString),
    Provider(Arc<dyn TokenProvider>),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Credentials::Static(<redacted>)"),
            Self::Provider(_) => f.write_str("Credentials::Provider"),
        }
    }
}

impl Credentials {
    pub fn fixed(token: impl Into<String>) -> Self {
        Self::Static(SecretString::from(token.into()))
    }

    /// A configured access token wins; otherwise application default
    /// credentials are discovered.
    pub async fn from_config(cloud: &CloudConfig) -> Result<Self, ControlPlaneError> {
        if let Some(token) = &cloud.access_token {
            return Ok(Self::Static(token.clone()));
        }

        let provider =
            gcp_auth::provider().await.map_err(|error| ControlPlaneError::Auth(error.to_string()))?;
        Ok(Self::Provider(provider))
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Static(_) => "static access token",
            Self::Provider(_) => "application default credentials",
        }
    }

    pub async fn bearer(&self) -> Result<SecretString, ControlPlaneError> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::Provider(provider) => {
                let token = provider
                    .token(&[CLOUD_PLATFORM_SCOPE])
                    .await
                    .map_err(|error| ControlPlaneError::Auth(error.to_string()))?;
                Ok(SecretString::from(token.as_str().to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::Credentials;

    #[tokio::test]
    async fn static_token_is_returned_verbatim_and_redacted_in_debug() {
        let credentials = Credentials::fixed("ya29.token");
        let bearer = credentials.bearer().await.expect("static token");

        assert_eq!(bearer.expose_secret(), "ya29.token");
        assert!(!format!("{credentials:?}").contains("ya29"));
        assert_eq!(credentials.describe(), "static access token");
    }
}
