use serde_json::json;

mod test_support;
use test_support::{request, request_err, request_ok, send_line, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("attendanced-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["version"].as_str().is_some());
    assert!(health["workspacePath"].is_null());

    let code = request_err(&mut stdin, &mut reader, "2", "students.list", json!({}));
    assert_eq!(code, "no_workspace");

    let code = request_err(&mut stdin, &mut reader, "3", "workspace.select", json!({}));
    assert_eq!(code, "bad_params");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert!(workspace.join("attendance.sqlite3").is_file());

    let calls = [
        ("departments.list", json!({})),
        ("departments.sections.list", json!({ "departmentName": "Nowhere" })),
        ("teachers.list", json!({})),
        ("courses.list", json!({})),
        ("courses.subjectCodes", json!({ "department": "CSE" })),
        ("students.list", json!({})),
        ("students.departments", json!({})),
        ("students.sections", json!({})),
        ("students.search", json!({ "query": "x" })),
        ("attendance.sessions.list", json!({})),
        ("attendance.sessions.get", json!({ "sessionId": "missing" })),
        ("reports.records", json!({})),
        ("reports.dashboard", json!({})),
        (
            "reports.classOverview",
            json!({ "department": "CSE", "section": "A" }),
        ),
    ];
    for (i, (method, params)) in calls.iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &format!("f{}", i), method, params.clone());
        if resp["ok"] == json!(false) {
            assert_ne!(resp["error"]["code"], json!("not_implemented"), "{}", method);
        }
    }

    let code = request_err(&mut stdin, &mut reader, "5", "grades.compute", json!({}));
    assert_eq!(code, "not_implemented");

    let bad = send_line(&mut stdin, &mut reader, "{not json");
    assert_eq!(bad["ok"], json!(false));
    assert_eq!(bad["error"]["code"], json!("bad_json"));

    // Still serving after a malformed line.
    let health = request_ok(&mut stdin, &mut reader, "6", "health", json!({}));
    assert_eq!(
        health["workspacePath"].as_str(),
        Some(workspace.to_string_lossy().as_ref())
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn missing_grouping_keys_are_rejected_before_any_work() {
    let workspace = temp_dir("attendanced-router-keys");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let cases = [
        ("reports.subjectWise", json!({ "department": "CSE", "section": "A" })),
        ("reports.subjectWise", json!({ "department": "CSE", "section": "A", "subjectCode": "  " })),
        ("reports.studentWise", json!({})),
        ("reports.classOverview", json!({ "department": "CSE" })),
        ("reports.classOverview", json!({ "section": "A" })),
    ];
    for (i, (method, params)) in cases.iter().enumerate() {
        let code = request_err(&mut stdin, &mut reader, &format!("k{}", i), method, params.clone());
        assert_eq!(code, "bad_params", "{} {}", method, params);
    }

    drop(stdin);
    let _ = child.wait();
}
