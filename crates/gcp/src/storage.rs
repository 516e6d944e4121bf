use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dbbuddy_core::domain::operation::{OperationHandle, OperationStatus, Submission};
use dbbuddy_core::domain::resource::{
    keys, ConfigDrift, ObservedResource, ResourceDescriptor, ResourceKind,
};
use dbbuddy_core::errors::ControlPlaneError;
use dbbuddy_core::reconcile::ControlPlane;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use walkdir::WalkDir;

use crate::client::ApiClient;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload source `{0}` is not a directory")]
    NotADirectory(PathBuf),
    #[error("could not walk `{path}`: {message}")]
    Walk { path: PathBuf, message: String },
    #[error("could not read `{path}`: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),
}

#[derive(Debug, Deserialize)]
struct BucketResource {
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    name: String,
}

/// Object storage API: buckets are inserted synchronously.
#[derive(Clone, Debug)]
pub struct StorageApi {
    client: ApiClient,
    base_url: String,
    project: String,
}

impl StorageApi {
    pub fn new(client: ApiClient, base_url: &str, project: impl Into<String>) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string(), project: project.into() }
    }

    /// Uploads every file under `source` to `bucket`, keeping the relative
    /// path under `prefix`. Returns the `gs://` URI of each object in path order.
    pub async fn upload_folder(
        &self,
        bucket: &str,
        source: &Path,
        prefix: Option<&str>,
    ) -> Result<Vec<String>, UploadError> {
        if !source.is_dir() {
            return Err(UploadError::NotADirectory(source.to_path_buf()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(source).sort_by_file_name() {
            let entry = entry.map_err(|error| UploadError::Walk {
                path: source.to_path_buf(),
                message: error.to_string(),
            })?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }

        let url = format!("{}/upload/storage/v1/b/{bucket}/o", self.base_url);
        let mut uris = Vec::with_capacity(files.len());
        for path in files {
            let object = object_name(source, &path, prefix);
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|source| UploadError::Read { path: path.clone(), source })?;

            let uploaded: ObjectResource = self
                .client
                .upload(
                    &url,
                    &[("uploadType", "media"), ("name", object.as_str())],
                    bytes,
                    content_type(&path),
                )
                .await?;

            info!(
                event_name = "storage.object_uploaded",
                bucket = bucket,
                object = %uploaded.name,
                "uploaded document"
            );
            uris.push(format!("gs://{bucket}/{}", uploaded.name));
        }

        Ok(uris)
    }
}

fn object_name(root: &Path, file: &Path, prefix: Option<&str>) -> String {
    let relative = file
        .strip_prefix(root)
        .unwrap_or(file)
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/");

    match prefix.map(|prefix| prefix.trim_matches('/')).filter(|prefix| !prefix.is_empty()) {
        Some(prefix) => format!("{prefix}/{relative}"),
        None => relative,
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|extension| extension.to_str()) {
        Some("md") => "text/markdown",
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("html") | Some("htm") => "text/html",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl ControlPlane for StorageApi {
    async fn get(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<Option<ObservedResource>, ControlPlaneError> {
        if descriptor.kind != ResourceKind::Bucket {
            return Err(ControlPlaneError::Unsupported { kind: descriptor.kind });
        }

        let url = format!("{}/storage/v1/b/{}", self.base_url, descriptor.identity);
        let bucket = self.client.get_optional::<BucketResource>(&url).await?;
        Ok(bucket.map(|bucket| {
            let observed = ObservedResource::ready("READY");
            match bucket.location {
                Some(location) => observed.with_config(keys::LOCATION, location),
                None => observed,
            }
        }))
    }

    async fn create(&self, descriptor: &ResourceDescriptor) -> Result<Submission, ControlPlaneError> {
        if descriptor.kind != ResourceKind::Bucket {
            return Err(ControlPlaneError::Unsupported { kind: descriptor.kind });
        }

        let mut body = json!({ "name": descriptor.identity });
        if let Some(location) = descriptor.desired(keys::LOCATION) {
            body["location"] = json!(location);
        }

        let url = format!("{}/storage/v1/b", self.base_url);
        let _created: BucketResource =
            self.client.post(&url, &[("project", self.project.as_str())], &body).await?;
        Ok(Submission::Completed)
    }

    async fn patch(
        &self,
        descriptor: &ResourceDescriptor,
        _observed: &ObservedResource,
        _drift: &[ConfigDrift],
    ) -> Result<Submission, ControlPlaneError> {
        Err(ControlPlaneError::Unsupported { kind: descriptor.kind })
    }

    async fn operation_status(
        &self,
        handle: &OperationHandle,
    ) -> Result<OperationStatus, ControlPlaneError> {
        Err(ControlPlaneError::Unsupported { kind: handle.kind })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    use dbbuddy_core::domain::operation::Submission;
    use dbbuddy_core::domain::resource::{keys, ResourceDescriptor, ResourceKind};
    use dbbuddy_core::reconcile::ControlPlane;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{object_name, StorageApi, UploadError};
    use crate::auth::Credentials;
    use crate::client::ApiClient;

    fn api(server: &MockServer) -> StorageApi {
        let client = ApiClient::new(Credentials::fixed("token"), Duration::from_secs(5))
            .expect("client should build");
        StorageApi::new(client, &server.uri(), "demo")
    }

    #[test]
    fn object_names_join_prefix_and_relative_path() {
        let root = Path::new("/docs");
        assert_eq!(
            object_name(root, Path::new("/docs/schema/tables.md"), Some("postgres/")),
            "postgres/schema/tables.md"
        );
        assert_eq!(object_name(root, Path::new("/docs/readme.txt"), None), "readme.txt");
        assert_eq!(object_name(root, Path::new("/docs/readme.txt"), Some("")), "readme.txt");
    }

    #[tokio::test]
    async fn bucket_insert_is_synchronous() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/b"))
            .and(query_param("project", "demo"))
            .and(body_json(json!({"name": "docs-bucket", "location": "US"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"name": "docs-bucket", "location": "US"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let descriptor =
            ResourceDescriptor::new(ResourceKind::Bucket, "docs-bucket").with(keys::LOCATION, "US");
        let submission = api(&server).create(&descriptor).await.expect("create bucket");
        assert_eq!(submission, Submission::Completed);
    }

    #[tokio::test]
    async fn existing_bucket_is_ready() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/storage/v1/b/docs-bucket"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"location": "EU"})))
            .mount(&server)
            .await;

        let observed = api(&server)
            .get(&ResourceDescriptor::new(ResourceKind::Bucket, "docs-bucket"))
            .await
            .expect("get bucket")
            .expect("bucket exists");
        assert!(observed.state.is_ready());
        assert_eq!(observed.config.get(keys::LOCATION).map(String::as_str), Some("EU"));
    }

    #[tokio::test]
    async fn folder_upload_returns_gs_uris_in_path_order() {
        let server = MockServer::start().await;
        for object in ["postgres/a.md", "postgres/nested/b.txt"] {
            Mock::given(method("POST"))
                .and(path("/upload/storage/v1/b/docs-bucket/o"))
                .and(query_param("uploadType", "media"))
                .and(query_param("name", object))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": object})))
                .expect(1)
                .mount(&server)
                .await;
        }

        let dir = TempDir::new().expect("tempdir");
        fs::create_dir_all(dir.path().join("nested")).expect("nested dir");
        fs::write(dir.path().join("a.md"), "# tables").expect("write a");
        fs::write(dir.path().join("nested").join("b.txt"), "columns").expect("write b");

        let uris = api(&server)
            .upload_folder("docs-bucket", dir.path(), Some("postgres"))
            .await
            .expect("upload");

        assert_eq!(
            uris,
            vec![
                "gs://docs-bucket/postgres/a.md".to_string(),
                "gs://docs-bucket/postgres/nested/b.txt".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn upload_rejects_missing_folder() {
        let server = MockServer::start().await;
        let dir = TempDir::new().expect("tempdir");
        let error = api(&server)
            .upload_folder("docs-bucket", &dir.path().join("absent"), None)
            .await
            .expect_err("missing folder");
        assert!(matches!(error, UploadError::NotADirectory(_)));
    }
}
