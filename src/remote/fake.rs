//! In-memory drive used by the engine tests.
//!
//! Holds a folder tree and file contents in memory, supports scripted
//! per-item failures so the retry and fallback paths can be exercised, and
//! records uploads, folder creations and export requests for assertions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::{ListPage, RemoteDrive, RemoteError, RemoteFile, FOLDER_MIME};

#[derive(Debug, Clone)]
struct FakeFolder {
    parent_id: String,
    name: String,
}

#[derive(Debug, Clone)]
struct FakeFile {
    parent_id: String,
    name: String,
    mime_type: String,
    content: Vec<u8>,
    modified_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub parent_id: String,
    pub name: String,
    pub mime: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct DownloadFailure {
    remaining: u32,
    transient: bool,
    /// Write a truncated payload before failing, the way a streaming sink
    /// dies mid-transfer
    leave_partial: bool,
}

#[derive(Default)]
struct Inner {
    folders: HashMap<String, FakeFolder>,
    files: HashMap<String, FakeFile>,
    download_failures: HashMap<String, DownloadFailure>,
    /// upload name -> (remaining failures, transient?)
    upload_failures: HashMap<String, (u32, bool)>,
    uploads: Vec<UploadRecord>,
    export_mimes: Vec<String>,
    upload_seq: u32,
    folder_seq: u32,
}

pub struct FakeDrive {
    root_id: String,
    root_name: String,
    page_size: usize,
    inner: Mutex<Inner>,
}

impl FakeDrive {
    pub fn new(root_id: &str) -> Self {
        Self {
            root_id: root_id.to_string(),
            root_name: "Root".to_string(),
            page_size: 2,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn add_folder(&self, parent_id: &str, id: &str, name: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.folders.insert(
            id.to_string(),
            FakeFolder {
                parent_id: parent_id.to_string(),
                name: name.to_string(),
            },
        );
    }

    pub fn add_file(
        &self,
        parent_id: &str,
        id: &str,
        name: &str,
        mime: &str,
        content: &[u8],
        modified_time: Option<DateTime<Utc>>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.files.insert(
            id.to_string(),
            FakeFile {
                parent_id: parent_id.to_string(),
                name: name.to_string(),
                mime_type: mime.to_string(),
                content: content.to_vec(),
                modified_time,
            },
        );
    }

    pub fn remove_file(&self, id: &str) {
        self.inner.lock().unwrap().files.remove(id);
    }

    /// Script the next `count` downloads/exports of `id` to fail
    pub fn fail_downloads(&self, id: &str, count: u32, transient: bool) {
        self.inner.lock().unwrap().download_failures.insert(
            id.to_string(),
            DownloadFailure {
                remaining: count,
                transient,
                leave_partial: false,
            },
        );
    }

    /// Script the next `count` downloads/exports of `id` to write a partial
    /// file and then fail
    pub fn fail_downloads_leaving_partial(&self, id: &str, count: u32, transient: bool) {
        self.inner.lock().unwrap().download_failures.insert(
            id.to_string(),
            DownloadFailure {
                remaining: count,
                transient,
                leave_partial: true,
            },
        );
    }

    /// Script the next `count` uploads of `name` to fail
    pub fn fail_uploads(&self, name: &str, count: u32, transient: bool) {
        self.inner
            .lock()
            .unwrap()
            .upload_failures
            .insert(name.to_string(), (count, transient));
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.inner.lock().unwrap().uploads.clone()
    }

    pub fn export_mimes_requested(&self) -> Vec<String> {
        self.inner.lock().unwrap().export_mimes.clone()
    }

    /// `(id, name)` of every child folder of `parent_id`
    pub fn child_folders(&self, parent_id: &str) -> Vec<(String, String)> {
        let inner = self.inner.lock().unwrap();
        let mut out: Vec<_> = inner
            .folders
            .iter()
            .filter(|(_, f)| f.parent_id == parent_id)
            .map(|(id, f)| (id.clone(), f.name.clone()))
            .collect();
        out.sort();
        out
    }

    fn take_failure(
        failures: &mut HashMap<String, (u32, bool)>,
        key: &str,
    ) -> Option<RemoteError> {
        if let Some((remaining, transient)) = failures.get_mut(key) {
            if *remaining > 0 {
                *remaining -= 1;
                return Some(if *transient {
                    RemoteError::Transient(format!("scripted 503 for {key}"))
                } else {
                    RemoteError::Permanent(format!("scripted 404 not found for {key}"))
                });
            }
        }
        None
    }

    fn take_download_failure(&self, file_id: &str) -> Option<(RemoteError, bool)> {
        let mut inner = self.inner.lock().unwrap();
        let script = inner.download_failures.get_mut(file_id)?;
        if script.remaining == 0 {
            return None;
        }
        script.remaining -= 1;
        let err = if script.transient {
            RemoteError::Transient(format!("scripted 503 for {file_id}"))
        } else {
            RemoteError::Permanent(format!("scripted 404 not found for {file_id}"))
        };
        Some((err, script.leave_partial))
    }

    fn content_of(&self, file_id: &str) -> Result<Vec<u8>, RemoteError> {
        let inner = self.inner.lock().unwrap();
        inner
            .files
            .get(file_id)
            .map(|f| f.content.clone())
            .ok_or_else(|| RemoteError::Permanent(format!("404 not found: {file_id}")))
    }

    /// Run one scripted download failure, leaving a truncated file behind
    /// when the script asks for it. `Some(err)` means the caller must fail.
    fn scripted_download_failure(&self, file_id: &str, dest: &Path) -> Option<RemoteError> {
        let (err, leave_partial) = self.take_download_failure(file_id)?;
        if leave_partial {
            let truncated: Vec<u8> = self
                .content_of(file_id)
                .map(|c| c[..c.len() / 2].to_vec())
                .unwrap_or_else(|_| b"part".to_vec());
            let _ = std::fs::write(dest, truncated);
        }
        Some(err)
    }
}

fn write_dest(dest: &Path, content: &[u8]) -> Result<u64, RemoteError> {
    std::fs::write(dest, content)
        .map_err(|e| RemoteError::Transient(format!("local write failed: {e}")))?;
    Ok(content.len() as u64)
}

#[async_trait]
impl RemoteDrive for FakeDrive {
    async fn list_children(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListPage, RemoteError> {
        let inner = self.inner.lock().unwrap();

        let mut items: Vec<RemoteFile> = Vec::new();
        for (id, folder) in &inner.folders {
            if folder.parent_id == folder_id {
                items.push(RemoteFile {
                    id: id.clone(),
                    name: folder.name.clone(),
                    is_folder: true,
                    size_bytes: 0,
                    mime_type: FOLDER_MIME.to_string(),
                    modified_time: None,
                });
            }
        }
        for (id, file) in &inner.files {
            if file.parent_id == folder_id {
                items.push(RemoteFile {
                    id: id.clone(),
                    name: file.name.clone(),
                    is_folder: false,
                    size_bytes: file.content.len() as u64,
                    mime_type: file.mime_type.clone(),
                    modified_time: file.modified_time,
                });
            }
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));

        let offset: usize = page_token.map(|t| t.parse().unwrap_or(0)).unwrap_or(0);
        let page: Vec<RemoteFile> = items
            .iter()
            .skip(offset)
            .take(self.page_size)
            .cloned()
            .collect();
        let next = offset + page.len();
        let next_page_token = (next < items.len()).then(|| next.to_string());

        Ok(ListPage {
            items: page,
            next_page_token,
        })
    }

    async fn get_meta(&self, file_id: &str) -> Result<RemoteFile, RemoteError> {
        if file_id == self.root_id {
            return Ok(RemoteFile {
                id: self.root_id.clone(),
                name: self.root_name.clone(),
                is_folder: true,
                size_bytes: 0,
                mime_type: FOLDER_MIME.to_string(),
                modified_time: None,
            });
        }

        let inner = self.inner.lock().unwrap();
        if let Some(folder) = inner.folders.get(file_id) {
            return Ok(RemoteFile {
                id: file_id.to_string(),
                name: folder.name.clone(),
                is_folder: true,
                size_bytes: 0,
                mime_type: FOLDER_MIME.to_string(),
                modified_time: None,
            });
        }
        inner
            .files
            .get(file_id)
            .map(|f| RemoteFile {
                id: file_id.to_string(),
                name: f.name.clone(),
                is_folder: false,
                size_bytes: f.content.len() as u64,
                mime_type: f.mime_type.clone(),
                modified_time: f.modified_time,
            })
            .ok_or_else(|| RemoteError::Permanent(format!("404 not found: {file_id}")))
    }

    async fn download_native(&self, file_id: &str, dest: &Path) -> Result<u64, RemoteError> {
        if let Some(err) = self.scripted_download_failure(file_id, dest) {
            return Err(err);
        }
        let content = self.content_of(file_id)?;
        write_dest(dest, &content)
    }

    async fn export(
        &self,
        file_id: &str,
        export_mime: &str,
        dest: &Path,
    ) -> Result<u64, RemoteError> {
        if let Some(err) = self.scripted_download_failure(file_id, dest) {
            return Err(err);
        }
        let content = self.content_of(file_id)?;
        self.inner
            .lock()
            .unwrap()
            .export_mimes
            .push(export_mime.to_string());
        write_dest(dest, &content)
    }

    async fn find_child_folder(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<String>, RemoteError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .folders
            .iter()
            .find(|(_, f)| f.parent_id == parent_id && f.name == name)
            .map(|(id, _)| id.clone()))
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, RemoteError> {
        let mut inner = self.inner.lock().unwrap();
        inner.folder_seq += 1;
        let id = format!("folder-{}", inner.folder_seq);
        inner.folders.insert(
            id.clone(),
            FakeFolder {
                parent_id: parent_id.to_string(),
                name: name.to_string(),
            },
        );
        Ok(id)
    }

    async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        mime: &str,
        source: &Path,
    ) -> Result<RemoteFile, RemoteError> {
        let content = std::fs::read(source)
            .map_err(|e| RemoteError::Transient(format!("local read failed: {e}")))?;

        let mut inner = self.inner.lock().unwrap();
        if let Some(err) = Self::take_failure(&mut inner.upload_failures, name) {
            return Err(err);
        }

        inner.uploads.push(UploadRecord {
            parent_id: parent_id.to_string(),
            name: name.to_string(),
            mime: mime.to_string(),
            content: content.clone(),
        });
        inner.upload_seq += 1;
        let id = format!("uploaded-{}", inner.upload_seq);

        Ok(RemoteFile {
            id,
            name: name.to_string(),
            is_folder: false,
            size_bytes: content.len() as u64,
            mime_type: mime.to_string(),
            modified_time: Some(Utc::now()),
        })
    }
}
