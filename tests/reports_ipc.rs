use serde_json::json;
use std::io::BufReader;
use std::process::{ChildStdin, ChildStdout};

mod test_support;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

struct Seeded {
    s1: String,
    s2: String,
}

fn seed(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Seeded {
    let _ = request_ok(
        stdin,
        reader,
        "seed-dept",
        "departments.create",
        json!({ "name": "CSE", "sections": ["A"] }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "seed-course",
        "courses.create",
        json!({ "courseCode": "CS3", "courseName": "Compilers", "semester": 5, "department": "CSE" }),
    );
    let mut ids = Vec::new();
    for roll in ["1CS01", "1CS02"] {
        let created = request_ok(
            stdin,
            reader,
            &format!("seed-{}", roll),
            "students.create",
            json!({
                "rollNumber": roll,
                "name": format!("Student {}", roll),
                "department": "CSE",
                "section": "A",
                "semester": 5,
            }),
        );
        ids.push(created["studentId"].as_str().expect("studentId").to_string());
    }
    let seeded = Seeded {
        s1: ids[0].clone(),
        s2: ids[1].clone(),
    };

    // S1 only ever has a record; S2 is never marked.
    let plan = [
        ("CS1", "2024-09-02", "present"),
        ("CS1", "2024-09-03", "absent"),
        ("CS2", "2024-09-04", "present"),
        ("CS2", "2024-09-05", "present"),
        ("CS2", "2024-09-06", "present"),
    ];
    for (i, (subject, date, status)) in plan.iter().enumerate() {
        let _ = request_ok(
            stdin,
            reader,
            &format!("seed-session-{}", i),
            "attendance.sessions.create",
            json!({
                "department": "CSE",
                "section": "A",
                "subjectCode": subject,
                "teacher": "Dr. Rao",
                "date": date,
                "records": [{ "studentId": seeded.s1, "status": status }],
            }),
        );
    }
    seeded
}

#[test]
fn subject_student_and_class_reports() {
    let workspace = temp_dir("attendanced-reports");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let Seeded { s1, s2 } = seed(&mut stdin, &mut reader);

    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "reports.subjectWise",
        json!({ "department": "CSE", "section": "a", "subjectCode": "cs1" }),
    );
    assert_eq!(subject["totalSessions"], json!(2));
    assert_eq!(subject["classAverage"], json!(25));
    let rows = subject["students"].as_array().expect("students");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["student"]["id"], json!(s1));
    assert_eq!(rows[0]["percentage"], json!(50));
    assert_eq!(rows[0]["eligible"], json!(false));
    assert_eq!(rows[1]["student"]["id"], json!(s2));
    assert_eq!(rows[1]["totalClasses"], json!(2));
    assert_eq!(rows[1]["classesAttended"], json!(0));
    assert_eq!(rows[1]["sessions"][0]["marked"], json!(false));
    // Newest session first.
    assert_eq!(rows[0]["sessions"][0]["date"], json!("2024-09-03"));

    let profile = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.studentWise",
        json!({ "query": "1cs01", "type": "usn" }),
    );
    assert_eq!(profile["students"].as_array().map(|s| s.len()), Some(1));
    assert_eq!(profile["attendance"][0]["student"]["id"], json!(s1));
    let p = &profile["attendance"][0]["profile"];
    assert_eq!(p["totalClasses"], json!(5));
    assert_eq!(p["totalPresent"], json!(4));
    assert_eq!(p["overallPercentage"], json!(80));
    assert_eq!(p["subjects"][0]["subjectCode"], json!("CS1"));
    assert_eq!(p["subjects"][0]["percentage"], json!(50));
    assert_eq!(p["subjects"][1]["subjectCode"], json!("CS2"));
    assert_eq!(p["subjects"][1]["percentage"], json!(100));
    assert_eq!(p["subjects"][1]["eligible"], json!(true));

    // S2 has no records, so no sessions reach the profile.
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.studentWise",
        json!({ "studentId": s2 }),
    );
    assert_eq!(empty["profile"]["totalClasses"], json!(0));
    assert_eq!(empty["profile"]["overallPercentage"], json!(0));
    assert_eq!(empty["student"]["id"], json!(s2));

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "reports.studentWise",
        json!({ "studentId": "ghost" }),
    );
    assert_eq!(code, "not_found");

    let overview = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "reports.classOverview",
        json!({ "department": "CSE", "section": "A" }),
    );
    assert_eq!(overview["totalStudents"], json!(2));
    let subjects = overview["subjects"].as_array().expect("subjects");
    let codes: Vec<&str> = subjects
        .iter()
        .filter_map(|s| s["subjectCode"].as_str())
        .collect();
    assert_eq!(codes, vec!["CS1", "CS2", "CS3"]);
    assert_eq!(subjects[0]["averageAttendance"], json!(25));
    assert_eq!(subjects[0]["studentsAbove75"], json!(0));
    assert_eq!(subjects[0]["studentsBelow75"], json!(2));
    assert_eq!(subjects[1]["averageAttendance"], json!(50));
    assert_eq!(subjects[1]["studentsAbove75"], json!(1));
    assert_eq!(subjects[2]["totalSessions"], json!(0));
    assert_eq!(subjects[2]["averageAttendance"], json!(0));
    assert_eq!(subjects[2]["studentsBelow75"], json!(2));

    let without_courses = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "reports.classOverview",
        json!({ "department": "CSE", "section": "A", "includeCourses": false }),
    );
    assert_eq!(without_courses["subjects"].as_array().map(|s| s.len()), Some(2));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn student_query_reports_every_match() {
    let workspace = temp_dir("attendanced-reports-query");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let Seeded { s1, s2 } = seed(&mut stdin, &mut reader);

    let both = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "reports.studentWise",
        json!({ "query": "1cs0", "type": "usn" }),
    );
    let students = both["students"].as_array().expect("students");
    let attendance = both["attendance"].as_array().expect("attendance");
    assert_eq!(students.len(), 2);
    assert_eq!(attendance.len(), 2);
    for entry in attendance {
        let id = entry["student"]["id"].as_str().expect("id");
        let expected = if id == s1 {
            (5, 80)
        } else {
            assert_eq!(id, s2);
            (0, 0)
        };
        assert_eq!(entry["profile"]["studentId"], json!(id));
        assert_eq!(entry["profile"]["totalClasses"], json!(expected.0));
        assert_eq!(entry["profile"]["overallPercentage"], json!(expected.1));
    }

    let none = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.studentWise",
        json!({ "query": "zzz" }),
    );
    assert_eq!(none["students"], json!([]));
    assert_eq!(none["attendance"], json!([]));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn flat_records_and_dashboard() {
    let workspace = temp_dir("attendanced-records");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let Seeded { s1, .. } = seed(&mut stdin, &mut reader);

    let flat = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "reports.records",
        json!({
            "startDate": "2024-09-02",
            "endDate": "2024-09-03T08:00:00Z",
            "department": "CSE",
            "section": "A",
        }),
    );
    assert_eq!(flat["window"]["start"], json!("2024-09-02T00:00:00.000"));
    assert_eq!(flat["window"]["end"], json!("2024-09-03T23:59:59.999"));
    assert_eq!(flat["totalSessions"], json!(2));
    let records = flat["records"].as_array().expect("records");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["date"], json!("2024-09-02"));
    assert_eq!(records[0]["studentId"], json!(s1));
    assert_eq!(records[0]["rollNumber"], json!("1CS01"));
    assert_eq!(records[0]["subjectCode"], json!("CS1"));
    assert_eq!(records[0]["status"], json!("present"));
    assert_eq!(records[1]["status"], json!("absent"));

    let one_subject = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.records",
        json!({ "subjectCode": "CS2" }),
    );
    assert!(one_subject["window"].is_null());
    assert_eq!(one_subject["totalRecords"], json!(3));

    let dash = request_ok(&mut stdin, &mut reader, "4", "reports.dashboard", json!({}));
    assert_eq!(dash["stats"]["totalStudents"], json!(2));
    assert_eq!(dash["stats"]["totalCourses"], json!(1));
    assert_eq!(dash["stats"]["totalDepartments"], json!(1));
    assert_eq!(dash["stats"]["totalAttendanceSessions"], json!(5));
    let cse = &dash["departmentStats"][0];
    assert_eq!(cse["name"], json!("CSE"));
    assert_eq!(cse["students"], json!(2));
    assert_eq!(cse["courses"], json!(1));
    assert_eq!(cse["sessions"], json!(5));
    assert_eq!(cse["sections"], json!(["A"]));
    assert_eq!(cse["activeSections"], json!(["A"]));
    let recent = dash["recentSessions"].as_array().expect("recentSessions");
    assert_eq!(recent.len(), 5);
    assert_eq!(recent[0]["date"], json!("2024-09-06"));
    assert_eq!(recent[4]["date"], json!("2024-09-02"));

    drop(stdin);
    let _ = child.wait();
}
