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

fn request_ok(
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn seeded_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let (child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(&mut stdin, &mut reader, "open", "store.open", json!({}));
    let _ = request_ok(&mut stdin, &mut reader, "seed", "store.seed", json!({}));
    (child, stdin, reader)
}

#[test]
fn roster_search_pages_through_all_students() {
    let (_child, mut stdin, mut reader) = seeded_sidecar();

    // 101 students at the default page size of 10.
    let page1 = request_ok(&mut stdin, &mut reader, "1", "roster.search", json!({}));
    assert_eq!(page1["total"], json!(101));
    assert_eq!(page1["pageCount"], json!(11));
    assert_eq!(page1["page"], json!(1));
    assert_eq!(page1["students"].as_array().map(|a| a.len()), Some(10));
    // Creation order: the seeded Aryan student account comes first.
    assert_eq!(page1["students"][0]["id"], json!("user-student-aryan"));

    let page11 = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.search",
        json!({ "page": 11 }),
    );
    assert_eq!(page11["students"].as_array().map(|a| a.len()), Some(1));

    let page12 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.search",
        json!({ "page": 12 }),
    );
    assert_eq!(page12["students"], json!([]));
    assert_eq!(page12["total"], json!(101));

    let big = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "roster.search",
        json!({ "pageSize": 200 }),
    );
    assert_eq!(big["students"].as_array().map(|a| a.len()), Some(101));
    assert_eq!(big["pageCount"], json!(1));
}

#[test]
fn roster_search_filters_by_name_or_email() {
    let (_child, mut stdin, mut reader) = seeded_sidecar();

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "roster.search",
        json!({ "query": "ARYAN" }),
    );
    assert_eq!(res["total"], json!(1));
    assert_eq!(res["students"][0]["id"], json!("user-student-aryan"));

    // Email substrings match too; every generated student is @school.edu.
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "roster.search",
        json!({ "query": "school.edu", "pageSize": 200 }),
    );
    assert_eq!(res["total"], json!(101));

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "roster.search",
        json!({ "query": "no such student anywhere" }),
    );
    assert_eq!(res["total"], json!(0));
    assert_eq!(res["students"], json!([]));
    assert_eq!(res["pageCount"], json!(0));
}

#[test]
fn users_list_filters_by_role() {
    let (_child, mut stdin, mut reader) = seeded_sidecar();

    let teachers = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "users.list",
        json!({ "role": "teacher" }),
    );
    assert_eq!(teachers["total"], json!(2));

    let admins = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "users.list",
        json!({ "role": "admin" }),
    );
    assert_eq!(admins["total"], json!(2));

    let all = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "users.list",
        json!({ "role": "all" }),
    );
    assert_eq!(all["total"], json!(105));
    // Directory listing pages at the default size too.
    assert_eq!(all["users"].as_array().map(|a| a.len()), Some(10));
    assert_eq!(all["pageCount"], json!(11));

    let page2 = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "users.list",
        json!({ "page": 2, "pageSize": 100 }),
    );
    assert_eq!(page2["users"].as_array().map(|a| a.len()), Some(5));
}

#[test]
fn assignment_roster_pages_in_fan_out_order() {
    let (_child, mut stdin, mut reader) = seeded_sidecar();

    let masters = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "assignments.listMaster",
        json!({ "teacherId": "user-teacher-aryan" }),
    );
    let master_id = masters["masterAssignments"][0]["id"]
        .as_str()
        .expect("master id")
        .to_string();
    assert_eq!(
        masters["masterAssignments"][0]["assignedStudentCount"],
        json!(51)
    );

    let page1 = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "assignments.roster",
        json!({ "masterAssignmentId": master_id, "pageSize": 25 }),
    );
    assert_eq!(page1["total"], json!(51));
    assert_eq!(page1["pageCount"], json!(3));
    // Aryan was listed first in the template, so page one leads with him.
    assert_eq!(
        page1["studentAssignments"][0]["studentId"],
        json!("user-student-aryan")
    );

    let page3 = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assignments.roster",
        json!({ "masterAssignmentId": master_id, "pageSize": 25, "page": 3 }),
    );
    assert_eq!(page3["studentAssignments"].as_array().map(|a| a.len()), Some(1));

    let beyond = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "assignments.roster",
        json!({ "masterAssignmentId": master_id, "pageSize": 25, "page": 4 }),
    );
    assert_eq!(beyond["studentAssignments"], json!([]));
}
