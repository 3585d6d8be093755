
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use test_support::{
    create_student, create_teacher, days_from_now, error_code, request, request_ok, spawn_sidecar,
    temp_dir, write_source_file,
};

const PAYLOAD: &[u8] = b"%PDF-1.4 bundled report";

#[test]
fn export_then_import_restores_projects_grades_and_attachments() {
    let ws1 = temp_dir("portal-bundle-src");
    let ws2 = temp_dir("portal-bundle-dst");
    let staging = temp_dir("portal-bundle-staging");
    let out = temp_dir("portal-bundle-out").join("portal.backup.zip");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": ws1.to_string_lossy() }),
    );
    let s1 = create_student(&mut stdin, &mut reader, "2", "asha", "ST-001");
    let t1 = create_teacher(&mut stdin, &mut reader, "3", "godhiambo", "EMP-001");

    let source = write_source_file(&staging, "final_report.pdf", PAYLOAD);
    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "projects.submit",
        json!({
            "principalId": s1,
            "title": "Final Report Submission",
            "description": "Complete write-up with appendices.",
            "dueDate": days_from_now(14),
            "teacherId": t1,
            "attachment": {
                "sourcePath": source.to_string_lossy(),
                "fileName": "final_report.pdf"
            }
        }),
    );
    let pid = submitted["project"]["id"].as_str().expect("id").to_string();

    let opened = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grading.open",
        json!({ "principalId": t1, "projectId": pid }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grading.submitRubric",
        json!({
            "principalId": t1,
            "gradeId": opened["grade"]["id"].as_str().expect("gradeId"),
            "contentScore": 20,
            "presentationScore": 20,
            "creativityScore": 20,
            "technicalScore": 20
        }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "backup.export",
        json!({ "outPath": out.to_string_lossy() }),
    );
    assert_eq!(
        exported["bundleFormat"].as_str(),
        Some("portal-workspace-v1")
    );
    // manifest + meta + database + one attachment
    assert_eq!(exported["entryCount"].as_i64(), Some(4));

    // The manifest carries a checksum for every file entry.
    let mut archive = zip::ZipArchive::new(File::open(&out).expect("open bundle")).expect("zip");
    let mut manifest_text = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest_text)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest_text).expect("manifest json");
    assert_eq!(manifest["format"].as_str(), Some("portal-workspace-v1"));
    let files = manifest["files"].as_array().expect("files");
    assert_eq!(files.len(), 2);
    let attachment_entry = format!("attachments/{}/final_report.pdf", pid);
    let expected_sha = format!("{:x}", Sha256::digest(PAYLOAD));
    let att_manifest = files
        .iter()
        .find(|f| f["path"].as_str() == Some(attachment_entry.as_str()))
        .expect("attachment in manifest");
    assert_eq!(att_manifest["sha256"].as_str(), Some(expected_sha.as_str()));
    assert_eq!(
        att_manifest["size"].as_i64(),
        Some(PAYLOAD.len() as i64)
    );
    archive.by_name("db/portal.sqlite3").expect("db entry");
    archive
        .by_name("meta/workspace.json")
        .expect("workspace metadata entry");
    drop(archive);

    // Import switches the daemon onto the restored workspace.
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "backup.import",
        json!({
            "inPath": out.to_string_lossy(),
            "workspacePath": ws2.to_string_lossy()
        }),
    );
    assert_eq!(
        imported["workspacePath"].as_str(),
        Some(ws2.to_string_lossy().as_ref())
    );
    assert_eq!(
        imported["bundleFormatDetected"].as_str(),
        Some("portal-workspace-v1")
    );

    let health = request_ok(&mut stdin, &mut reader, "9", "health", json!({}));
    assert_eq!(
        health["workspacePath"].as_str(),
        Some(ws2.to_string_lossy().as_ref())
    );

    // Everything survived: the grade, the project, and the attachment bytes.
    let view = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "projects.getAssigned",
        json!({ "principalId": t1, "projectId": pid }),
    );
    assert_eq!(view["project"]["status"].as_str(), Some("graded"));
    assert_eq!(view["project"]["grade"]["score"].as_i64(), Some(80));

    let download = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "projects.download",
        json!({ "principalId": s1, "projectId": pid }),
    );
    let path = download["attachment"]["path"].as_str().expect("path");
    assert!(path.starts_with(ws2.to_string_lossy().as_ref()));
    assert_eq!(std::fs::read(path).expect("restored attachment"), PAYLOAD);

    let _ = std::fs::remove_dir_all(ws1);
    let _ = std::fs::remove_dir_all(ws2);
    let _ = std::fs::remove_dir_all(staging);
    let _ = std::fs::remove_dir_all(out.parent().expect("out dir"));
}

#[test]
fn export_needs_a_workspace_and_a_target_path() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "backup.export",
        json!({ "outPath": "/tmp/somewhere.zip" }),
    );
    assert_eq!(error_code(&resp), "no_workspace");

    let workspace = temp_dir("portal-bundle-noout");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let resp = request(&mut stdin, &mut reader, "3", "backup.export", json!({}));
    assert_eq!(error_code(&resp), "bad_params");

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "backup.import",
        json!({ "inPath": "/tmp/does-not-exist.zip" }),
    );
    assert_eq!(error_code(&resp), "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}

fn write_bundle(path: &std::path::Path, manifest: serde_json::Value, entries: &[(&str, &[u8])]) {
    let file = File::create(path).expect("create bundle");
    let mut zip = zip::ZipWriter::new(file);
    let opts = zip::write::FileOptions::default();
    zip.start_file("manifest.json", opts).expect("manifest");
    zip.write_all(manifest.to_string().as_bytes())
        .expect("write manifest");
    for (name, bytes) in entries {
        zip.start_file(*name, opts).expect("entry");
        zip.write_all(bytes).expect("write entry");
    }
    zip.finish().expect("finish zip");
}

#[test]
fn import_rejects_checksum_mismatches_before_replacing_anything() {
    let workspace = temp_dir("portal-bundle-badsum");
    let bundle_dir = temp_dir("portal-bundle-badsum-in");
    let bundle = bundle_dir.join("tampered.zip");

    let payload = b"not the bytes the manifest promises";
    write_bundle(
        &bundle,
        json!({
            "format": "portal-workspace-v1",
            "version": 1,
            "files": [{
                "path": "db/portal.sqlite3",
                "sha256": "0".repeat(64),
                "size": payload.len()
            }]
        }),
        &[("db/portal.sqlite3", payload)],
    );

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "backup.import",
        json!({
            "inPath": bundle.to_string_lossy(),
            "workspacePath": workspace.to_string_lossy()
        }),
    );
    assert_eq!(error_code(&resp), "io_failed");
    assert!(resp["error"]["message"]
        .as_str()
        .is_some_and(|m| m.contains("checksum mismatch")));
    assert!(!workspace.join("portal.sqlite3").exists());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(bundle_dir);
}

#[test]
fn import_rejects_entries_that_escape_the_workspace() {
    let workspace = temp_dir("portal-bundle-escape");
    let bundle_dir = temp_dir("portal-bundle-escape-in");
    let bundle = bundle_dir.join("hostile.zip");

    let payload = b"anything";
    write_bundle(
        &bundle,
        json!({
            "format": "portal-workspace-v1",
            "version": 1,
            "files": [{
                "path": "attachments/../../evil.pdf",
                "sha256": format!("{:x}", Sha256::digest(payload)),
                "size": payload.len()
            }]
        }),
        &[("attachments/../../evil.pdf", payload)],
    );

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "backup.import",
        json!({
            "inPath": bundle.to_string_lossy(),
            "workspacePath": workspace.to_string_lossy()
        }),
    );
    assert_eq!(error_code(&resp), "io_failed");
    assert!(resp["error"]["message"]
        .as_str()
        .is_some_and(|m| m.contains("unsafe path")));

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(bundle_dir);
}

#[test]
fn bare_sqlite_files_import_as_a_legacy_workspace() {
    let workspace = temp_dir("portal-bundle-legacy");
    let staging = temp_dir("portal-bundle-legacy-in");

    // An empty file is a valid fresh SQLite database; the schema fills in
    // when the workspace opens.
    let legacy = staging.join("old-portal.sqlite3");
    std::fs::write(&legacy, b"").expect("write legacy file");

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "backup.import",
        json!({
            "inPath": legacy.to_string_lossy(),
            "workspacePath": workspace.to_string_lossy()
        }),
    );
    assert_eq!(
        imported["bundleFormatDetected"].as_str(),
        Some("legacy-sqlite3")
    );

    // The daemon is live on the restored workspace straight away.
    let _ = create_student(&mut stdin, &mut reader, "2", "asha", "ST-001");
    assert!(workspace.join("portal.sqlite3").is_file());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(staging);
}
