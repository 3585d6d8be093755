use anyhow::{anyhow, Context};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db;
use crate::storage;

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/portal.sqlite3";
const META_WORKSPACE_ENTRY: &str = "meta/workspace.json";
pub const BUNDLE_FORMAT_V1: &str = "portal-workspace-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

struct BundleFile {
    entry_name: String,
    abs_path: PathBuf,
    sha256: String,
    size: u64,
}

fn collect_attachment_files(dir: &Path, workspace: &Path, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    for ent in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.to_string_lossy()))?
    {
        let p = ent?.path();
        if p.is_dir() {
            collect_attachment_files(&p, workspace, out)?;
        } else if p.is_file() {
            out.push(p);
        }
    }
    Ok(())
}

fn entry_name_for(workspace: &Path, abs: &Path) -> anyhow::Result<String> {
    let rel = abs
        .strip_prefix(workspace)
        .with_context(|| format!("file escapes workspace: {}", abs.to_string_lossy()))?;
    // Zip entry names always use forward slashes.
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/"))
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let db_path = workspace_path.join(db::DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }

    let mut files: Vec<BundleFile> = vec![BundleFile {
        entry_name: DB_ENTRY.to_string(),
        sha256: storage::file_sha256(&db_path)?,
        size: std::fs::metadata(&db_path)?.len(),
        abs_path: db_path,
    }];

    let attachments_dir = workspace_path.join(storage::ATTACHMENTS_DIR);
    if attachments_dir.is_dir() {
        let mut found = Vec::new();
        collect_attachment_files(&attachments_dir, workspace_path, &mut found)?;
        found.sort();
        for abs in found {
            files.push(BundleFile {
                entry_name: entry_name_for(workspace_path, &abs)?,
                sha256: storage::file_sha256(&abs)?,
                size: std::fs::metadata(&abs)?.len(),
                abs_path: abs,
            });
        }
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        "files": files.iter().map(|f| json!({
            "path": f.entry_name,
            "sha256": f.sha256,
            "size": f.size,
        })).collect::<Vec<_>>(),
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    for f in &files {
        zip.start_file(&f.entry_name, opts)
            .with_context(|| format!("failed to start entry {}", f.entry_name))?;
        let mut src = File::open(&f.abs_path)
            .with_context(|| format!("failed to open {}", f.abs_path.to_string_lossy()))?;
        std::io::copy(&mut src, &mut zip)
            .with_context(|| format!("failed to write entry {}", f.entry_name))?;
    }

    let workspace_meta = json!({
        "sourceWorkspace": workspace_path.to_string_lossy(),
    });
    zip.start_file(META_WORKSPACE_ENTRY, opts)
        .context("failed to start workspace metadata entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&workspace_meta)
            .context("failed to serialize workspace metadata")?
            .as_bytes(),
    )
    .context("failed to write workspace metadata entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: files.len() + 2,
    })
}

/// Maps a manifest entry name onto its destination inside the workspace,
/// rejecting anything that would land outside it.
fn dest_for_entry(workspace_path: &Path, entry_name: &str) -> anyhow::Result<PathBuf> {
    let parts: Vec<&str> = entry_name.split('/').collect();
    if parts
        .iter()
        .any(|p| p.is_empty() || *p == "." || *p == "..")
    {
        return Err(anyhow!("bundle entry has unsafe path: {}", entry_name));
    }
    if entry_name == DB_ENTRY {
        return Ok(workspace_path.join(db::DB_FILE));
    }
    if parts.first() == Some(&storage::ATTACHMENTS_DIR) {
        let mut dest = workspace_path.to_path_buf();
        for p in &parts {
            dest.push(p);
        }
        return Ok(dest);
    }
    Err(anyhow!("unexpected bundle entry: {}", entry_name))
}

pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;

    if !is_zip_file(in_path)? {
        // A bare sqlite file restores as a workspace without attachments.
        let dst = workspace_path.join(db::DB_FILE);
        std::fs::copy(in_path, &dst).with_context(|| {
            format!(
                "failed to copy sqlite backup from {} to {}",
                in_path.to_string_lossy(),
                dst.to_string_lossy()
            )
        })?;
        return Ok(ImportSummary {
            bundle_format_detected: "legacy-sqlite3".to_string(),
        });
    }

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let files = manifest
        .get("files")
        .and_then(|v| v.as_array())
        .context("manifest has no files list")?
        .clone();

    // Extract each file next to its destination, verify the checksum, then
    // swap it in. A mismatch aborts before anything replaces live data.
    let mut staged: Vec<(PathBuf, PathBuf)> = Vec::new();
    for f in &files {
        let entry_name = f
            .get("path")
            .and_then(|v| v.as_str())
            .context("manifest file entry missing path")?;
        let expected_sha = f
            .get("sha256")
            .and_then(|v| v.as_str())
            .context("manifest file entry missing sha256")?;

        let dest = dest_for_entry(workspace_path, entry_name)?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
        let tmp = dest.with_extension("importing");
        if tmp.exists() {
            let _ = std::fs::remove_file(&tmp);
        }

        {
            let mut entry = archive
                .by_name(entry_name)
                .with_context(|| format!("bundle missing entry {}", entry_name))?;
            let mut out = File::create(&tmp).with_context(|| {
                format!("failed to create temp file {}", tmp.to_string_lossy())
            })?;
            std::io::copy(&mut entry, &mut out)
                .with_context(|| format!("failed to extract {}", entry_name))?;
            out.flush().context("failed to flush extracted file")?;
        }

        let actual_sha = storage::file_sha256(&tmp)?;
        if actual_sha != expected_sha {
            let _ = std::fs::remove_file(&tmp);
            for (t, _) in &staged {
                let _ = std::fs::remove_file(t);
            }
            return Err(anyhow!(
                "checksum mismatch for {}: expected {}, got {}",
                entry_name,
                expected_sha,
                actual_sha
            ));
        }
        staged.push((tmp, dest));
    }

    for (tmp, dest) in &staged {
        if dest.exists() {
            std::fs::remove_file(dest).with_context(|| {
                format!("failed to remove existing {}", dest.to_string_lossy())
            })?;
        }
        std::fs::rename(tmp, dest).with_context(|| {
            format!("failed to move extracted file to {}", dest.to_string_lossy())
        })?;
    }

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
    })
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}
