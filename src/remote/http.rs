//! Google Drive v3 REST adapter.
//!
//! Implements the [`RemoteDrive`] port with a bearer token; interactive
//! authentication flows are out of scope. HTTP statuses map onto the
//! transient/permanent classification the retry policy consumes.

use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::{ListPage, RemoteDrive, RemoteError, RemoteFile, FOLDER_MIME};

const API_BASE: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime";
const PAGE_SIZE: u32 = 1000;

/// Wire shape of one file resource
#[derive(Debug, Deserialize)]
struct DriveFileMeta {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "mimeType", default)]
    mime_type: String,
    /// The API reports sizes as decimal strings
    #[serde(default)]
    size: Option<String>,
    #[serde(rename = "modifiedTime", default)]
    modified_time: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<DriveFileMeta> for RemoteFile {
    fn from(meta: DriveFileMeta) -> Self {
        let is_folder = meta.mime_type == FOLDER_MIME;
        RemoteFile {
            id: meta.id,
            name: meta.name,
            is_folder,
            size_bytes: meta
                .size
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            mime_type: meta.mime_type,
            modified_time: meta.modified_time,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFileMeta>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
}

pub struct HttpDrive {
    client: Client,
    token: String,
}

impl HttpDrive {
    pub fn new(token: String) -> Self {
        Self {
            client: Client::new(),
            token,
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, RemoteError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = ensure_success(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| RemoteError::Permanent(format!("malformed response: {e}")))
    }
}

#[async_trait]
impl RemoteDrive for HttpDrive {
    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListPage, RemoteError> {
        let q = format!(
            "'{}' in parents and trashed = false",
            escape_query(folder_id)
        );
        let fields = format!("nextPageToken,files({FILE_FIELDS})");
        let page_size = PAGE_SIZE.to_string();
        let mut query: Vec<(&str, &str)> = vec![
            ("q", &q),
            ("fields", &fields),
            ("pageSize", &page_size),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let list: DriveFileList = self.get_json(&format!("{API_BASE}/files"), &query).await?;
        Ok(ListPage {
            items: list.files.into_iter().map(RemoteFile::from).collect(),
            next_page_token: list.next_page_token,
        })
    }

    async fn get_meta(&self, file_id: &str) -> Result<RemoteFile, RemoteError> {
        let meta: DriveFileMeta = self
            .get_json(
                &format!("{API_BASE}/files/{file_id}"),
                &[("fields", FILE_FIELDS)],
            )
            .await?;
        Ok(meta.into())
    }

    async fn download_native(&self, file_id: &str, dest: &Path) -> Result<u64, RemoteError> {
        let resp = self
            .client
            .get(format!("{API_BASE}/files/{file_id}"))
            .bearer_auth(&self.token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(transport_error)?;
        let resp = ensure_success(resp).await?;
        sink_to_file(resp, dest).await
    }

    async fn export(
        &self,
        file_id: &str,
        export_mime: &str,
        dest: &Path,
    ) -> Result<u64, RemoteError> {
        let resp = self
            .client
            .get(format!("{API_BASE}/files/{file_id}/export"))
            .bearer_auth(&self.token)
            .query(&[("mimeType", export_mime)])
            .send()
            .await
            .map_err(transport_error)?;
        let resp = ensure_success(resp).await?;
        sink_to_file(resp, dest).await
    }

    async fn find_child_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<String>, RemoteError> {
        let q = format!(
            "'{}' in parents and name = '{}' and mimeType = '{FOLDER_MIME}' and trashed = false",
            escape_query(parent_id),
            escape_query(name)
        );
        let list: DriveFileList = self
            .get_json(
                &format!("{API_BASE}/files"),
                &[("q", &q), ("fields", "files(id)"), ("pageSize", "1")],
            )
            .await?;
        Ok(list.files.into_iter().next().map(|f| f.id))
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, RemoteError> {
        let body = json!({
            "name": name,
            "mimeType": FOLDER_MIME,
            "parents": [parent_id],
        });
        let resp = self
            .client
            .post(format!("{API_BASE}/files"))
            .bearer_auth(&self.token)
            .query(&[("fields", "id")])
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = ensure_success(resp).await?;
        let meta: DriveFileMeta = resp
            .json()
            .await
            .map_err(|e| RemoteError::Permanent(format!("malformed response: {e}")))?;
        Ok(meta.id)
    }

    async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        mime: &str,
        source: &Path,
    ) -> Result<RemoteFile, RemoteError> {
        let size = tokio::fs::metadata(source).await.map_err(local_io_error)?.len();

        // Resumable upload: create a session from the metadata, then PUT
        // the content against the session URL.
        let metadata = json!({
            "name": name,
            "parents": [parent_id],
            "mimeType": mime,
        });
        let resp = self
            .client
            .post(format!("{UPLOAD_BASE}/files"))
            .bearer_auth(&self.token)
            .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
            .header("X-Upload-Content-Type", mime)
            .header("X-Upload-Content-Length", size.to_string())
            .json(&metadata)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = ensure_success(resp).await?;
        let session_url = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                RemoteError::Permanent("upload session response had no location".into())
            })?;

        let file = tokio::fs::File::open(source).await.map_err(local_io_error)?;
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let resp = self
            .client
            .put(&session_url)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .header(reqwest::header::CONTENT_TYPE, mime)
            .body(body)
            .send()
            .await
            .map_err(transport_error)?;
        let resp = ensure_success(resp).await?;

        let meta: DriveFileMeta = resp
            .json()
            .await
            .map_err(|e| RemoteError::Permanent(format!("malformed response: {e}")))?;
        Ok(meta.into())
    }
}

/// Surface non-2xx responses with their status so the classifier can sort
/// transient from permanent
async fn ensure_success(resp: Response) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let detail = resp.text().await.unwrap_or_default();
    let detail = detail.chars().take(200).collect::<String>();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(RemoteError::Transient(format!("rate limited: {detail}")));
    }
    Err(RemoteError::from_http_status(
        status.as_u16(),
        format!("status {status}: {detail}"),
    ))
}

/// Stream a response body into a local file
async fn sink_to_file(mut resp: Response, dest: &Path) -> Result<u64, RemoteError> {
    let mut file = tokio::fs::File::create(dest).await.map_err(local_io_error)?;
    let mut written = 0u64;

    while let Some(chunk) = resp.chunk().await.map_err(transport_error)? {
        file.write_all(&chunk).await.map_err(local_io_error)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(local_io_error)?;

    Ok(written)
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::Permanent(format!("malformed response: {e}"))
    } else {
        RemoteError::Transient(format!("transport failure: {e}"))
    }
}

fn local_io_error(e: std::io::Error) -> RemoteError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::StorageFull | ErrorKind::QuotaExceeded => RemoteError::DiskFull(e.to_string()),
        _ => RemoteError::Transient(format!("local I/O failure: {e}")),
    }
}

/// Escape a value for embedding in a files.list query string
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
