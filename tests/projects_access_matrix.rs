
use serde_json::json;
use test_support::{
    create_student, create_teacher, error_code, request, request_ok, spawn_sidecar, submit_project,
    temp_dir,
};

#[test]
fn ownership_gates_reads_without_leaking_existence() {
    let workspace = temp_dir("portal-access");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let s1 = create_student(&mut stdin, &mut reader, "2", "asha", "ST-001");
    let s2 = create_student(&mut stdin, &mut reader, "3", "brian", "ST-002");
    let t1 = create_teacher(&mut stdin, &mut reader, "4", "godhiambo", "EMP-001");
    let t2 = create_teacher(&mut stdin, &mut reader, "5", "nkamau", "EMP-002");

    let project = submit_project(&mut stdin, &mut reader, "6", &s1, &t1, "Compiler Project");
    let pid = project.get("id").and_then(|v| v.as_str()).expect("id");

    // Owner view, with portfolio stats on the side.
    let owned = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "projects.getOwned",
        json!({ "principalId": s1, "projectId": pid }),
    );
    assert_eq!(
        owned["project"]["title"].as_str(),
        Some("Compiler Project")
    );
    assert_eq!(owned["stats"]["totalProjects"].as_i64(), Some(1));
    assert_eq!(owned["stats"]["gradedProjects"].as_i64(), Some(0));

    // Another student sees the same response as for an id that never existed.
    let resp = request(
        &mut stdin,
        &mut reader,
        "8",
        "projects.getOwned",
        json!({ "principalId": s2, "projectId": pid }),
    );
    assert_eq!(error_code(&resp), "not_found");
    let resp = request(
        &mut stdin,
        &mut reader,
        "9",
        "projects.getOwned",
        json!({ "principalId": s2, "projectId": "never-existed" }),
    );
    assert_eq!(error_code(&resp), "not_found");

    // Role mismatches are called out as such.
    let resp = request(
        &mut stdin,
        &mut reader,
        "10",
        "projects.getOwned",
        json!({ "principalId": t1, "projectId": pid }),
    );
    assert_eq!(error_code(&resp), "permission_denied");
    let resp = request(
        &mut stdin,
        &mut reader,
        "11",
        "projects.getAssigned",
        json!({ "principalId": s1, "projectId": pid }),
    );
    assert_eq!(error_code(&resp), "permission_denied");

    // Assigned teacher reads it; any other teacher cannot tell it exists.
    let assigned = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "projects.getAssigned",
        json!({ "principalId": t1, "projectId": pid }),
    );
    assert_eq!(
        assigned["project"]["studentName"].as_str(),
        Some("Asha Mwangi")
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "13",
        "projects.getAssigned",
        json!({ "principalId": t2, "projectId": pid }),
    );
    assert_eq!(error_code(&resp), "not_found");

    // Downloads follow the same rule for every party.
    for (req_id, principal, expected) in [
        ("14", &s2, "not_found"),
        ("15", &t2, "not_found"),
    ] {
        let resp = request(
            &mut stdin,
            &mut reader,
            req_id,
            "projects.download",
            json!({ "principalId": principal, "projectId": pid }),
        );
        assert_eq!(error_code(&resp), expected, "principal {}", principal);
    }
    // Owner and assigned teacher reach the attachment check itself.
    for (req_id, principal) in [("16", &s1), ("17", &t1)] {
        let resp = request(
            &mut stdin,
            &mut reader,
            req_id,
            "projects.download",
            json!({ "principalId": principal, "projectId": pid }),
        );
        assert_eq!(error_code(&resp), "no_attachment", "principal {}", principal);
    }

    let _ = std::fs::remove_dir_all(workspace);
}
