//! MIME translation for drive-native documents.
//!
//! Native Google documents have no binary representation and must be
//! exported; the table below fixes the portable format for each supported
//! kind. Everything else is downloaded as-is.

/// Prefix shared by all drive-native document MIME types
pub const NATIVE_MIME_PREFIX: &str = "application/vnd.google-apps";

/// Export target for one drive-native document kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportMapping {
    pub source_mime: &'static str,
    pub export_mime: &'static str,
    pub extension: &'static str,
}

const EXPORT_TABLE: &[ExportMapping] = &[
    ExportMapping {
        source_mime: "application/vnd.google-apps.document",
        export_mime: "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        extension: ".docx",
    },
    ExportMapping {
        source_mime: "application/vnd.google-apps.spreadsheet",
        export_mime: "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        extension: ".xlsx",
    },
    ExportMapping {
        source_mime: "application/vnd.google-apps.presentation",
        export_mime: "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        extension: ".pptx",
    },
    ExportMapping {
        source_mime: "application/vnd.google-apps.drawing",
        export_mime: "image/png",
        extension: ".png",
    },
];

/// Look up the export mapping for a remote MIME type
pub fn export_for(mime: &str) -> Option<&'static ExportMapping> {
    EXPORT_TABLE.iter().find(|m| m.source_mime == mime)
}

/// Drive-native document with no export mapping: counted and skipped
pub fn is_unsupported_native(mime: &str) -> bool {
    mime.starts_with(NATIVE_MIME_PREFIX) && export_for(mime).is_none()
}

/// Derive the MIME type for a restore upload from the file extension.
/// Unknown extensions fall back to a generic binary type.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "xml" => "application/xml",
        "zip" => "application/zip",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

/// MIME for uploading a file name, by its extension
pub fn mime_for_file_name(name: &str) -> &'static str {
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => mime_for_extension(ext),
        _ => "application/octet-stream",
    }
}
