
use serde_json::json;
use test_support::{
    create_student, create_teacher, error_code, field_message, request, request_ok, spawn_sidecar,
    submit_project, temp_dir,
};

#[test]
fn bulk_grading_processes_only_eligible_projects() {
    let workspace = temp_dir("portal-bulk-eligible");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let s1 = create_student(&mut stdin, &mut reader, "2", "asha", "ST-001");
    let t1 = create_teacher(&mut stdin, &mut reader, "3", "godhiambo", "EMP-001");
    let t2 = create_teacher(&mut stdin, &mut reader, "4", "nkamau", "EMP-002");

    let pa = submit_project(&mut stdin, &mut reader, "5", &s1, &t1, "Compiler Project");
    let pb = submit_project(&mut stdin, &mut reader, "6", &s1, &t1, "Database Report");
    let pc = submit_project(&mut stdin, &mut reader, "7", &s1, &t1, "Networking Lab");
    let pd = submit_project(&mut stdin, &mut reader, "8", &s1, &t2, "Graphics Demo");

    // An existing grade row, even a zero-score one, takes a project out of
    // the bulk path.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "grading.open",
        json!({ "principalId": t1, "projectId": pc["id"].as_str().expect("id") }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "grading.bulkGrade",
        json!({
            "principalId": t1,
            "projectIds": [
                pa["id"].as_str().expect("id"),
                pb["id"].as_str().expect("id"),
                pc["id"].as_str().expect("id"),
                pd["id"].as_str().expect("id"),
                "no-such-project"
            ],
            "score": 65,
            "feedback": "Reviewed in the moderation batch."
        }),
    );
    assert_eq!(result["processedCount"].as_i64(), Some(2));

    let graded = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "projects.getAssigned",
        json!({ "principalId": t1, "projectId": pa["id"].as_str().expect("id") }),
    );
    assert_eq!(graded["project"]["status"].as_str(), Some("graded"));
    assert_eq!(graded["project"]["grade"]["score"].as_i64(), Some(65));
    assert_eq!(graded["project"]["grade"]["letterGrade"].as_str(), Some("B"));
    assert_eq!(
        graded["project"]["grade"]["feedback"].as_str(),
        Some("Reviewed in the moderation batch.")
    );

    // The pre-existing session kept its own score.
    let session = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "grading.open",
        json!({ "principalId": t1, "projectId": pc["id"].as_str().expect("id") }),
    );
    assert_eq!(session["isNew"].as_bool(), Some(false));
    assert_eq!(session["grade"]["score"].as_i64(), Some(0));

    // The other teacher's project was silently skipped.
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "projects.getAssigned",
        json!({ "principalId": t2, "projectId": pd["id"].as_str().expect("id") }),
    );
    assert_eq!(other["project"]["status"].as_str(), Some("pending"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bulk_zero_score_still_counts_as_graded() {
    let workspace = temp_dir("portal-bulk-zero");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let s1 = create_student(&mut stdin, &mut reader, "2", "asha", "ST-001");
    let t1 = create_teacher(&mut stdin, &mut reader, "3", "godhiambo", "EMP-001");
    let p = submit_project(&mut stdin, &mut reader, "4", &s1, &t1, "Compiler Project");

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grading.bulkGrade",
        json!({
            "principalId": t1,
            "projectIds": [p["id"].as_str().expect("id")],
            "score": 0
        }),
    );
    assert_eq!(result["processedCount"].as_i64(), Some(1));

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "projects.getAssigned",
        json!({ "principalId": t1, "projectId": p["id"].as_str().expect("id") }),
    );
    assert_eq!(view["project"]["status"].as_str(), Some("graded"));
    assert_eq!(view["project"]["grade"]["score"].as_i64(), Some(0));
    assert_eq!(view["project"]["grade"]["letterGrade"].as_str(), Some("F"));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn bulk_request_shape_is_validated() {
    let workspace = temp_dir("portal-bulk-shape");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let s1 = create_student(&mut stdin, &mut reader, "2", "asha", "ST-001");
    let t1 = create_teacher(&mut stdin, &mut reader, "3", "godhiambo", "EMP-001");

    let resp = request(
        &mut stdin,
        &mut reader,
        "4",
        "grading.bulkGrade",
        json!({ "principalId": t1, "projectIds": [], "score": 50 }),
    );
    assert_eq!(error_code(&resp), "validation_error");
    assert_eq!(field_message(&resp, "projectIds"), "This field is required.");

    let too_many: Vec<String> = (0..501).map(|i| format!("p-{}", i)).collect();
    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "grading.bulkGrade",
        json!({ "principalId": t1, "projectIds": too_many, "score": 50 }),
    );
    assert_eq!(error_code(&resp), "validation_error");
    assert_eq!(
        field_message(&resp, "projectIds"),
        "Cannot grade more than 500 projects at once."
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "6",
        "grading.bulkGrade",
        json!({ "principalId": t1, "projectIds": ["a", 7], "score": 50 }),
    );
    assert_eq!(error_code(&resp), "validation_error");
    assert_eq!(
        field_message(&resp, "projectIds"),
        "Project ids must be strings."
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "7",
        "grading.bulkGrade",
        json!({ "principalId": t1, "projectIds": ["a"], "score": 101 }),
    );
    assert_eq!(error_code(&resp), "validation_error");
    assert_eq!(
        field_message(&resp, "score"),
        "Ensure this value is less than or equal to 100."
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "8",
        "grading.bulkGrade",
        json!({ "principalId": t1, "projectIds": ["a"] }),
    );
    assert_eq!(error_code(&resp), "validation_error");
    assert_eq!(field_message(&resp, "score"), "This field is required.");

    // Both failures arrive together.
    let resp = request(
        &mut stdin,
        &mut reader,
        "9",
        "grading.bulkGrade",
        json!({ "principalId": t1, "score": -5 }),
    );
    assert_eq!(error_code(&resp), "validation_error");
    assert_eq!(field_message(&resp, "projectIds"), "This field is required.");
    assert_eq!(
        field_message(&resp, "score"),
        "Ensure this value is greater than or equal to 0."
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "10",
        "grading.bulkGrade",
        json!({ "principalId": s1, "projectIds": ["a"], "score": 50 }),
    );
    assert_eq!(error_code(&resp), "permission_denied");

    let _ = std::fs::remove_dir_all(workspace);
}
