
use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir, write_source_file};

/// Builds a workspace database from before attachment checksums were
/// recorded: same tables, no attachment_sha256 column.
fn seed_pre_checksum_workspace(workspace: &std::path::Path) {
    let conn = rusqlite::Connection::open(workspace.join("portal.sqlite3")).expect("create db");
    conn.execute_batch(
        "CREATE TABLE users(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            role TEXT NOT NULL CHECK(role IN ('student','teacher')),
            created_at TEXT NOT NULL
        );
        CREATE TABLE projects(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            student_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            due_date TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            is_submitted INTEGER NOT NULL DEFAULT 1,
            attachment_name TEXT,
            attachment_path TEXT,
            attachment_size INTEGER,
            FOREIGN KEY(student_id) REFERENCES users(id),
            FOREIGN KEY(teacher_id) REFERENCES users(id)
        );
        INSERT INTO users VALUES
            ('s-legacy', 'asha', 'Asha', 'Mwangi', NULL, NULL, 'student',
             '2020-02-01T09:00:00.000000Z'),
            ('t-legacy', 'godhiambo', 'Grace', 'Odhiambo', NULL, NULL, 'teacher',
             '2020-02-01T09:00:00.000000Z');
        INSERT INTO projects VALUES
            ('p-legacy', 'Archived Compiler Project', 'Submitted before checksums existed.',
             's-legacy', 't-legacy',
             '2020-03-01T00:00:00.000000Z', '2020-02-20T10:00:00.000000Z', 1,
             'old_report.pdf', 'attachments/p-legacy/old_report.pdf', 1024);",
    )
    .expect("seed legacy schema");
}

#[test]
fn old_workspaces_gain_the_checksum_column_on_open() {
    let workspace = temp_dir("portal-migration");
    let staging = temp_dir("portal-migration-src");
    seed_pre_checksum_workspace(&workspace);

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // The legacy row reads back; its checksum is simply absent.
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "projects.listOwned",
        json!({ "principalId": "s-legacy" }),
    );
    assert_eq!(listing["totalCount"].as_i64(), Some(1));
    let item = &listing["items"][0];
    assert_eq!(item["title"].as_str(), Some("Archived Compiler Project"));
    assert_eq!(item["status"].as_str(), Some("overdue"));
    assert_eq!(
        item["attachment"]["fileName"].as_str(),
        Some("old_report.pdf")
    );
    assert!(item["attachment"]["sha256"].is_null());

    // New submissions on the migrated workspace carry checksums.
    let source = write_source_file(&staging, "fresh.pdf", b"%PDF-1.4 fresh");
    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "projects.submit",
        json!({
            "principalId": "s-legacy",
            "title": "Fresh Submission",
            "description": "First upload after the upgrade.",
            "dueDate": test_support::days_from_now(14),
            "teacherId": "t-legacy",
            "attachment": {
                "sourcePath": source.to_string_lossy(),
                "fileName": "fresh.pdf"
            }
        }),
    );
    assert!(submitted["project"]["attachment"]["sha256"]
        .as_str()
        .is_some_and(|s| s.len() == 64));

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(staging);
}
