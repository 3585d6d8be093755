use anyhow::{anyhow, Context};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["pdf", "doc", "docx", "zip", "rar"];
pub const ATTACHMENTS_DIR: &str = "attachments";

const COPY_BUF_BYTES: usize = 8192;

/// Opaque reference to one stored attachment. The daemon keeps the handle;
/// callers stream the bytes themselves.
#[derive(Debug, Clone)]
pub struct AttachmentHandle {
    pub file_name: String,
    pub rel_path: String,
    pub size: u64,
    pub sha256: String,
}

/// Strips any directory components from a client-supplied name.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let name = Path::new(raw.trim()).file_name()?.to_str()?.to_string();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name)
    }
}

pub fn file_extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty())
}

pub fn extension_allowed(ext: &str) -> bool {
    ALLOWED_EXTENSIONS.contains(&ext)
}

pub fn content_type_for(file_name: &str) -> &'static str {
    match file_extension(file_name).as_deref() {
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("zip") => "application/zip",
        Some("rar") => "application/vnd.rar",
        _ => "application/octet-stream",
    }
}

/// Human-readable size used in attachment views: one decimal, stepping
/// through bytes/KB/MB/GB.
pub fn format_file_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["bytes", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}

/// Validates a client-supplied upload before any bytes move: name, extension
/// allow-list, readable source, size cap. Returns the source size, or a
/// user-facing field message.
pub fn check_attachment(source_path: &Path, file_name: &str) -> Result<u64, String> {
    let Some(ext) = file_extension(file_name) else {
        return Err(
            "File type not supported. Upload PDF, DOC, DOCX, ZIP, or RAR files only.".to_string(),
        );
    };
    if !extension_allowed(&ext) {
        return Err(
            "File type not supported. Upload PDF, DOC, DOCX, ZIP, or RAR files only.".to_string(),
        );
    }
    let meta = std::fs::metadata(source_path)
        .map_err(|_| "Attachment source file is not readable.".to_string())?;
    if !meta.is_file() {
        return Err("Attachment source file is not readable.".to_string());
    }
    if meta.len() > MAX_ATTACHMENT_BYTES {
        return Err("File size cannot exceed 10MB.".to_string());
    }
    Ok(meta.len())
}

/// Copies the source into `attachments/<project_id>/<file_name>` inside the
/// workspace, hashing while copying. Bytes pass through a fixed-size buffer;
/// the whole file is never held in memory. The size cap is re-enforced during
/// the copy in case the source changed since validation.
pub fn store_attachment(
    workspace: &Path,
    project_id: &str,
    source_path: &Path,
    file_name: &str,
) -> anyhow::Result<AttachmentHandle> {
    let dir = workspace.join(ATTACHMENTS_DIR).join(project_id);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.to_string_lossy()))?;
    let dst = dir.join(file_name);

    let mut src = File::open(source_path).with_context(|| {
        format!(
            "failed to open attachment source {}",
            source_path.to_string_lossy()
        )
    })?;
    let mut out = File::create(&dst)
        .with_context(|| format!("failed to create {}", dst.to_string_lossy()))?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; COPY_BUF_BYTES];
    let mut copied: u64 = 0;
    loop {
        let n = src.read(&mut buf).context("failed reading attachment source")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        out.write_all(&buf[..n]).context("failed writing attachment")?;
        copied += n as u64;
        if copied > MAX_ATTACHMENT_BYTES {
            drop(out);
            let _ = std::fs::remove_file(&dst);
            return Err(anyhow!(
                "attachment exceeds {} bytes",
                MAX_ATTACHMENT_BYTES
            ));
        }
    }
    out.flush().context("failed to flush attachment")?;

    Ok(AttachmentHandle {
        file_name: file_name.to_string(),
        rel_path: format!("{}/{}/{}", ATTACHMENTS_DIR, project_id, file_name),
        size: copied,
        sha256: format!("{:x}", hasher.finalize()),
    })
}

/// Read side of the store: hands back the byte stream for a stored handle.
pub fn open_attachment(workspace: &Path, rel_path: &str) -> anyhow::Result<File> {
    let abs = attachment_abs_path(workspace, rel_path);
    File::open(&abs)
        .with_context(|| format!("stored attachment missing: {}", abs.to_string_lossy()))
}

pub fn attachment_abs_path(workspace: &Path, rel_path: &str) -> PathBuf {
    workspace.join(rel_path)
}

/// Streaming SHA-256 of a file on disk.
pub fn file_sha256(path: &Path) -> anyhow::Result<String> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open {} for checksum", path.to_string_lossy()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; COPY_BUF_BYTES];
    loop {
        let n = f.read(&mut buf).context("failed reading file for checksum")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories_and_rejects_empty() {
        assert_eq!(
            sanitize_file_name("report.pdf").as_deref(),
            Some("report.pdf")
        );
        assert_eq!(
            sanitize_file_name("/tmp/up/../report.pdf").as_deref(),
            Some("report.pdf")
        );
        assert_eq!(sanitize_file_name("  "), None);
        assert_eq!(sanitize_file_name("/"), None);
    }

    #[test]
    fn extension_allow_list_is_case_insensitive() {
        assert_eq!(file_extension("Final.PDF").as_deref(), Some("pdf"));
        assert!(extension_allowed("docx"));
        assert!(extension_allowed("rar"));
        assert!(!extension_allowed("exe"));
        assert_eq!(file_extension("no-extension"), None);
    }

    #[test]
    fn content_types_cover_the_allow_list() {
        assert_eq!(content_type_for("a.pdf"), "application/pdf");
        assert_eq!(content_type_for("a.zip"), "application/zip");
        assert_eq!(content_type_for("a.bin"), "application/octet-stream");
    }

    #[test]
    fn file_size_display_steps_units() {
        assert_eq!(format_file_size(512), "512.0 bytes");
        assert_eq!(format_file_size(2048), "2.0 KB");
        assert_eq!(format_file_size(10 * 1024 * 1024), "10.0 MB");
    }
}
