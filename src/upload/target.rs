//! What gets uploaded and where.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

/// MIME type used when the extension is unknown.
pub const FALLBACK_MIME_TYPE: &str = "text/plain";

/// Upload parameters derived from the source file and destination path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// Local file to read.
    pub source: PathBuf,
    /// Remote name: destination prefix followed by the source file name.
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

impl UploadTarget {
    /// Check the source eagerly and derive the remote name and MIME type.
    ///
    /// `destination` of `"."` (or empty) means the root; anything else is a
    /// prefix normalised to end with exactly one `/`.
    pub fn resolve(
        source: impl AsRef<Path>,
        destination: &str,
        mime_override: Option<&str>,
    ) -> Result<Self> {
        let source = source.as_ref();

        let metadata = std::fs::metadata(source).map_err(|e| {
            Error::local_io(source, format!("Source file is not accessible: {e}"))
        })?;
        if !metadata.is_file() {
            return Err(Error::local_io(source, "Source is not a regular file"));
        }

        let base_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::local_io(source, "Source has no file name"))?;

        let mime_type = match mime_override {
            Some(mime) if !mime.trim().is_empty() => mime.trim().to_string(),
            _ => guess_mime_type(source).to_string(),
        };

        let target = Self {
            source: source.to_path_buf(),
            file_name: format!("{}{base_name}", destination_prefix(destination)),
            mime_type,
            size_bytes: metadata.len(),
        };

        debug!(
            file_name = %target.file_name,
            mime_type = %target.mime_type,
            size_bytes = target.size_bytes,
            "Resolved upload target"
        );

        Ok(target)
    }
}

/// Normalise a destination path into a name prefix.
pub fn destination_prefix(destination: &str) -> String {
    let trimmed = destination.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        return String::new();
    }
    format!("{trimmed}/")
}

/// MIME type for `path` based on its extension.
pub fn guess_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    match extension.as_deref() {
        Some("txt" | "log" | "text") => "text/plain",
        Some("md" | "markdown") => "text/markdown",
        Some("csv") => "text/csv",
        Some("tsv") => "text/tab-separated-values",
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("js" | "mjs") => "text/javascript",
        Some("xml") => "application/xml",
        Some("json") => "application/json",
        Some("yaml" | "yml") => "application/yaml",
        Some("toml") => "application/toml",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz" | "tgz") => "application/gzip",
        Some("tar") => "application/x-tar",
        Some("7z") => "application/x-7z-compressed",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("xls") => "application/vnd.ms-excel",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("ppt") => "application/vnd.ms-powerpoint",
        Some("pptx") => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        Some("bmp") => "image/bmp",
        Some("ico") => "image/vnd.microsoft.icon",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        _ => FALLBACK_MIME_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_prefix() {
        assert_eq!(destination_prefix("."), "");
        assert_eq!(destination_prefix(""), "");
        assert_eq!(destination_prefix("/"), "");
        assert_eq!(destination_prefix("backups"), "backups/");
        assert_eq!(destination_prefix("backups/"), "backups/");
        assert_eq!(destination_prefix("backups///"), "backups/");
        assert_eq!(destination_prefix("a/b"), "a/b/");
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type(Path::new("notes.txt")), "text/plain");
        assert_eq!(guess_mime_type(Path::new("photo.JPG")), "image/jpeg");
        assert_eq!(guess_mime_type(Path::new("report.pdf")), "application/pdf");
        assert_eq!(guess_mime_type(Path::new("archive.tar.gz")), "application/gzip");
        assert_eq!(guess_mime_type(Path::new("Makefile")), FALLBACK_MIME_TYPE);
        assert_eq!(guess_mime_type(Path::new("data.unknownext")), FALLBACK_MIME_TYPE);
    }

    #[test]
    fn test_resolve_root_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        std::fs::write(&path, b"0123456789").unwrap();

        let target = UploadTarget::resolve(&path, ".", None).unwrap();
        assert_eq!(target.file_name, "hello.txt");
        assert_eq!(target.mime_type, "text/plain");
        assert_eq!(target.size_bytes, 10);
        assert_eq!(target.source, path);
    }

    #[test]
    fn test_resolve_prefix_and_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.bin");
        std::fs::write(&path, [0u8; 3]).unwrap();

        let target =
            UploadTarget::resolve(&path, "backups/", Some("application/octet-stream")).unwrap();
        assert_eq!(target.file_name, "backups/dump.bin");
        assert_eq!(target.mime_type, "application/octet-stream");
    }

    #[test]
    fn test_resolve_missing_source_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let err = UploadTarget::resolve(dir.path().join("nope.txt"), ".", None).unwrap_err();
        assert!(matches!(err, Error::LocalIo { .. }));
    }

    #[test]
    fn test_resolve_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = UploadTarget::resolve(dir.path(), ".", None).unwrap_err();
        assert!(matches!(err, Error::LocalIo { ref message, .. } if message.contains("regular file")));
    }
}
