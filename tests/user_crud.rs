use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_portald");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn portald");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> String {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string()
}

#[test]
fn create_validates_and_defaults() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "open", "store.open", json!({}));

    for (id, params) in [
        ("no_name", json!({ "name": " ", "email": "a@b.c", "role": "student" })),
        ("no_email", json!({ "name": "A", "email": "", "role": "student" })),
        ("bad_role", json!({ "name": "A", "email": "a@b.c", "role": "wizard" })),
        ("no_role", json!({ "name": "A", "email": "a@b.c" })),
    ] {
        let resp = request(&mut stdin, &mut reader, id, "users.create", params);
        assert_eq!(error_code(&resp), "validation", "case {id}");
    }

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "ok",
        "users.create",
        json!({
            "name": "Maya Lin",
            "email": "maya@school.edu",
            "role": "student",
            "grade": 7,
            "studentId": "S55555"
        }),
    );
    let user = res.get("user").expect("user");
    assert_eq!(user["name"], json!("Maya Lin"));
    assert_eq!(user["grade"], json!(7));
    assert_eq!(user["studentId"], json!("S55555"));
    assert_eq!(user["achievements"], json!([]));
    assert!(user["avatarUrl"].as_str().unwrap_or("").starts_with("https://"));
    assert!(user.get("password").is_none());

    let dup = request(
        &mut stdin,
        &mut reader,
        "dup",
        "users.create",
        json!({ "name": "Other", "email": "maya@school.edu", "role": "teacher" }),
    );
    assert_eq!(error_code(&dup), "duplicate");
}

#[test]
fn update_enforces_role_immutability_and_email_uniqueness() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "open", "store.open", json!({}));

    let a = request_ok(
        &mut stdin,
        &mut reader,
        "a",
        "users.create",
        json!({ "name": "Maya Lin", "email": "maya@school.edu", "role": "student" }),
    )["user"]["id"]
        .as_str()
        .expect("id")
        .to_string();
    let _b = request_ok(
        &mut stdin,
        &mut reader,
        "b",
        "users.create",
        json!({ "name": "Ben Ortiz", "email": "ben@school.edu", "role": "student" }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "role",
        "users.update",
        json!({ "userId": a, "patch": { "role": "teacher" } }),
    );
    assert_eq!(error_code(&resp), "validation");

    let resp = request(
        &mut stdin,
        &mut reader,
        "email",
        "users.update",
        json!({ "userId": a, "patch": { "email": "ben@school.edu" } }),
    );
    assert_eq!(error_code(&resp), "duplicate");

    // Same-value role and own email are both no-ops, not conflicts.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "ok",
        "users.update",
        json!({ "userId": a, "patch": {
            "role": "student",
            "email": "maya@school.edu",
            "name": "Maya R. Lin",
            "loginStreak": 9
        } }),
    );
    assert_eq!(res["user"]["name"], json!("Maya R. Lin"));
    assert_eq!(res["user"]["loginStreak"], json!(9));

    let resp = request(
        &mut stdin,
        &mut reader,
        "missing",
        "users.update",
        json!({ "userId": "user-ghost", "patch": { "name": "X" } }),
    );
    assert_eq!(error_code(&resp), "not_found");
}

#[test]
fn deleting_a_student_cleans_up_references() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "open", "store.open", json!({}));

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "t",
        "users.create",
        json!({ "name": "Priya Patel", "email": "priya@school.edu", "role": "teacher", "subject": "Science" }),
    )["user"]["id"]
        .as_str()
        .expect("id")
        .to_string();
    let keep = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "users.create",
        json!({ "name": "Keep Me", "email": "keep@school.edu", "role": "student" }),
    )["user"]["id"]
        .as_str()
        .expect("id")
        .to_string();
    let gone = request_ok(
        &mut stdin,
        &mut reader,
        "s2",
        "users.create",
        json!({ "name": "Gone Soon", "email": "gone@school.edu", "role": "student" }),
    )["user"]["id"]
        .as_str()
        .expect("id")
        .to_string();

    let master = request_ok(
        &mut stdin,
        &mut reader,
        "ma",
        "assignments.createMaster",
        json!({
            "teacherId": teacher,
            "title": "Lab Report",
            "subject": "Science",
            "instructions": "Write it up.",
            "dueDate": "2025-06-01T00:00:00Z",
            "assignedStudentIds": [keep, gone]
        }),
    )["masterAssignmentId"]
        .as_str()
        .expect("master id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "msg",
        "messages.send",
        json!({ "studentId": gone, "teacherId": teacher, "senderId": gone, "body": "hello" }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "del",
        "users.delete",
        json!({ "userId": gone }),
    );

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "roster",
        "assignments.roster",
        json!({ "masterAssignmentId": master }),
    );
    assert_eq!(roster["total"], json!(1));
    assert_eq!(
        roster["studentAssignments"][0]["studentId"],
        json!(keep.as_str())
    );

    let convs = request_ok(
        &mut stdin,
        &mut reader,
        "convs",
        "conversations.list",
        json!({ "userId": teacher, "role": "teacher" }),
    );
    assert_eq!(convs["conversations"], json!([]));

    let resp = request(
        &mut stdin,
        &mut reader,
        "again",
        "users.delete",
        json!({ "userId": gone }),
    );
    assert_eq!(error_code(&resp), "not_found");
}

#[test]
fn deleting_a_teacher_removes_their_catalog() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "open", "store.open", json!({}));

    let teacher = request_ok(
        &mut stdin,
        &mut reader,
        "t",
        "users.create",
        json!({ "name": "Priya Patel", "email": "priya@school.edu", "role": "teacher", "subject": "Science" }),
    )["user"]["id"]
        .as_str()
        .expect("id")
        .to_string();
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "s",
        "users.create",
        json!({ "name": "Maya Lin", "email": "maya@school.edu", "role": "student" }),
    )["user"]["id"]
        .as_str()
        .expect("id")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ma",
        "assignments.createMaster",
        json!({
            "teacherId": teacher,
            "title": "Lab Report",
            "subject": "Science",
            "instructions": "Write it up.",
            "dueDate": "2025-06-01T00:00:00Z",
            "assignedStudentIds": [student]
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "del",
        "users.delete",
        json!({ "userId": teacher }),
    );

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "assignments.listForStudent",
        json!({ "studentId": student }),
    );
    assert_eq!(res["studentAssignments"], json!([]));
}
