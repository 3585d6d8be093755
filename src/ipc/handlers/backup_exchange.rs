use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn resolve_workspace(state: &AppState, req: &Request) -> Result<PathBuf, serde_json::Value> {
    if let Some(p) = helpers::param_str(&req.params, "workspacePath") {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }
    match &state.workspace {
        Some(p) => Ok(p.clone()),
        None => Err(err(&req.id, "no_workspace", "no workspace selected", None)),
    }
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out = match helpers::param_str(&req.params, "outPath") {
        Some(s) if !s.trim().is_empty() => PathBuf::from(s),
        _ => return err(&req.id, "bad_params", "missing params.outPath", None),
    };
    let workspace = match resolve_workspace(state, req) {
        Ok(w) => w,
        Err(resp) => return resp,
    };

    // Flush WAL pages into the main database file so the bundle carries
    // every committed row.
    if state.workspace.as_deref() == Some(workspace.as_path()) {
        if let Some(conn) = &state.db {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
        }
    }

    match backup::export_workspace_bundle(&workspace, &out) {
        Ok(summary) => {
            log::info!(
                "exported workspace bundle to {} ({} entries)",
                out.display(),
                summary.entry_count
            );
            ok(
                &req.id,
                json!({
                    "path": out.to_string_lossy(),
                    "bundleFormat": summary.bundle_format,
                    "entryCount": summary.entry_count,
                }),
            )
        }
        Err(e) => err(
            &req.id,
            "io_failed",
            format!("{e:?}"),
            Some(json!({ "path": out.to_string_lossy() })),
        ),
    }
}

fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let in_path = match helpers::param_str(&req.params, "inPath") {
        Some(s) if !s.trim().is_empty() => PathBuf::from(s),
        _ => return err(&req.id, "bad_params", "missing params.inPath", None),
    };
    if !in_path.is_file() {
        return err(
            &req.id,
            "not_found",
            "bundle file not found",
            Some(json!({ "path": in_path.to_string_lossy() })),
        );
    }
    let workspace = match resolve_workspace(state, req) {
        Ok(w) => w,
        Err(resp) => return resp,
    };

    if state.workspace.as_deref() == Some(workspace.as_path()) {
        // Drop the open handle before replacing the file underneath it.
        state.db = None;
    }

    let summary = match backup::import_workspace_bundle(&in_path, &workspace) {
        Ok(s) => s,
        Err(e) => {
            return err(
                &req.id,
                "io_failed",
                format!("{e:?}"),
                Some(json!({ "path": in_path.to_string_lossy() })),
            )
        }
    };

    match db::open_db(&workspace) {
        Ok(conn) => {
            state.workspace = Some(workspace.clone());
            state.db = Some(conn);
            log::info!(
                "imported workspace bundle from {} into {}",
                in_path.display(),
                workspace.display()
            );
            ok(
                &req.id,
                json!({
                    "workspacePath": workspace.to_string_lossy(),
                    "bundleFormatDetected": summary.bundle_format_detected,
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_export(state, req)),
        "backup.import" => Some(handle_import(state, req)),
        _ => None,
    }
}
