use std::time::Duration;

use dbbuddy_core::errors::ControlPlaneError;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::auth::Credentials;

/// Authenticated JSON client shared by the API adapters.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: Client,
    credentials: Credentials,
}

impl ApiClient {
    pub fn new(credentials: Credentials, timeout: Duration) -> Result<Self, ControlPlaneError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ControlPlaneError::Transport(error.to_string()))?;
        Ok(Self { http, credentials })
    }

    /// `Ok(None)` when the resource does not exist.
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, ControlPlaneError> {
        let response = self.execute(self.http.get(url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(response).await.map(Some)
    }

    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> Result<T, ControlPlaneError> {
        read_json(self.execute(self.http.get(url)).await?).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<T, ControlPlaneError> {
        read_json(self.execute(self.http.post(url).query(query).json(body)).await?).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> Result<T, ControlPlaneError> {
        read_json(self.execute(self.http.patch(url).query(query).json(body)).await?).await
    }

    pub async fn upload<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<T, ControlPlaneError> {
        let request = self
            .http
            .post(url)
            .query(query)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        read_json(self.execute(request).await?).await
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response, ControlPlaneError> {
        let token = self.credentials.bearer().await?;
        let response = request
            .bearer_auth(token.expose_secret())
            .send()
            .await
            .map_err(|error| ControlPlaneError::Transport(error.to_string()))?;

        debug!(
            event_name = "control_plane.response",
            url = %response.url(),
            status = response.status().as_u16(),
            "control plane responded"
        );
        Ok(response)
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ControlPlaneError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ControlPlaneError::Api { status: status.as_u16(), body });
    }

    response.json::<T>().await.map_err(|error| ControlPlaneError::Decode(error.to_string()))
}
