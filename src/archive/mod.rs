//! Archive container: flat deflate-compressed zip files.
//!
//! Members sit at the archive root with no directory prefix and are keyed
//! by remote item id; the original paths live only in the manifest. Both
//! operations are blocking and run under `spawn_blocking` in the engines.

pub mod manifest;
pub mod restore_state;

use std::fs::File;
use std::io;
use std::path::Path;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::utils::errors::{Result, VaultError};

/// Deflate-compress every file under `src_dir` into `archive_file`.
/// Member names are relative to `src_dir`, so the staging directory itself
/// never appears as a prefix.
pub fn create_archive(src_dir: &Path, archive_file: &Path) -> Result<()> {
    let file = File::create(archive_file)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(src_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| VaultError::InvalidArchivePath(e.to_string()))?;
        let member_name = relative.to_string_lossy().replace('\\', "/");

        zip.start_file(member_name, options)?;
        let mut source = File::open(entry.path())?;
        io::copy(&mut source, &mut zip)?;
    }

    zip.finish()?;
    Ok(())
}

/// Unpack every member of `archive_file` into `dest_dir`
pub fn extract_archive(archive_file: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_file)?;
    let mut archive = ZipArchive::new(file)?;
    std::fs::create_dir_all(dest_dir)?;

    for index in 0..archive.len() {
        let mut member = archive.by_index(index)?;

        // Reject members whose names escape the destination
        let relative = match member.enclosed_name() {
            Some(p) => p.to_owned(),
            None => return Err(VaultError::InvalidArchivePath(member.name().to_string())),
        };
        let out_path = dest_dir.join(relative);

        if member.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut member, &mut out)?;
    }

    Ok(())
}
