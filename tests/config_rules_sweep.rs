use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_timetabled");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn timetabled");
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
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
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

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false));
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .expect("error code")
}

fn setup_admin(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "setup-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "setup-signup",
        "auth.signup",
        json!({
            "email": "admin@uni.edu",
            "password": "secret",
            "name": "Admin",
            "role": "admin"
        }),
    );
    let login = request_ok(
        stdin,
        reader,
        "setup-login",
        "auth.login",
        json!({ "email": "admin@uni.edu", "password": "secret" }),
    );
    login
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string()
}

/// One teacher, one subject, one room; returns (teacherId, subjectId, roomId).
fn seed_catalog(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    token: &str,
) -> (String, String, String) {
    let teacher = request_ok(
        stdin,
        reader,
        "seed-t",
        "teachers.create",
        json!({ "token": token, "name": "Garcia" }),
    );
    let program = request_ok(
        stdin,
        reader,
        "seed-p",
        "programs.create",
        json!({
            "token": token,
            "code": "INF-01",
            "name": "Computer Science",
            "level": "engineering"
        }),
    );
    let subject = request_ok(
        stdin,
        reader,
        "seed-s",
        "subjects.create",
        json!({
            "token": token,
            "code": "ALG-1",
            "name": "Algorithms",
            "programId": program.get("programId").and_then(|v| v.as_str()).expect("id"),
            "modality": "in_person"
        }),
    );
    let room = request_ok(
        stdin,
        reader,
        "seed-r",
        "rooms.create",
        json!({ "token": token, "name": "B-101", "capacity": 30, "kind": "classroom" }),
    );
    (
        teacher.get("teacherId").and_then(|v| v.as_str()).expect("id").to_string(),
        subject.get("subjectId").and_then(|v| v.as_str()).expect("id").to_string(),
        room.get("roomId").and_then(|v| v.as_str()).expect("id").to_string(),
    )
}

#[test]
fn config_get_returns_defaults_and_updates_merge() {
    let workspace = temp_dir("timetabled-config-defaults");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let token = setup_admin(&mut stdin, &mut reader, &workspace);

    let config = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "config.get",
        json!({ "token": token }),
    );
    assert_eq!(
        config.pointer("/schedule/dayStart").and_then(|v| v.as_str()),
        Some("07:00")
    );
    assert_eq!(
        config
            .pointer("/validation/maxTeacherHoursPerDay")
            .and_then(|v| v.as_i64()),
        Some(8)
    );
    assert_eq!(
        config.pointer("/interface/theme").and_then(|v| v.as_str()),
        Some("light")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "config.update",
        json!({
            "token": token,
            "section": "institution",
            "patch": { "name": "Universidad Central" }
        }),
    );
    let config = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "config.get",
        json!({ "token": token }),
    );
    assert_eq!(
        config.pointer("/institution/name").and_then(|v| v.as_str()),
        Some("Universidad Central")
    );
    // Untouched fields keep their defaults.
    assert_eq!(
        config.pointer("/institution/phone").and_then(|v| v.as_str()),
        Some("")
    );
}

#[test]
fn invalid_patches_are_rejected_whole() {
    let workspace = temp_dir("timetabled-config-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let token = setup_admin(&mut stdin, &mut reader, &workspace);

    let cases = [
        json!({ "section": "validation", "patch": { "maxTeacherHoursPerDay": 0 } }),
        json!({ "section": "validation", "patch": { "minRestMinutes": 500 } }),
        json!({ "section": "validation", "patch": { "surprise": 1 } }),
        json!({ "section": "schedule", "patch": { "dayStart": "25:00" } }),
        json!({ "section": "schedule", "patch": { "dayStart": "12:00", "dayEnd": "09:00" } }),
        json!({ "section": "schedule", "patch": { "days": [] } }),
        json!({ "section": "schedule", "patch": { "days": ["Monday", "Monday"] } }),
        json!({ "section": "interface", "patch": { "itemsPerPage": 7 } }),
        json!({ "section": "interface", "patch": { "theme": "solarized" } }),
    ];
    for (i, case) in cases.iter().enumerate() {
        let mut params = case.clone();
        params["token"] = json!(token);
        let resp = request(
            &mut stdin,
            &mut reader,
            &format!("c{}", i),
            "config.update",
            params,
        );
        assert_eq!(error_code(&resp), "bad_params", "case {}: {}", i, case);
    }

    // Nothing stuck: a partially-bad patch must not have been saved.
    let config = request_ok(
        &mut stdin,
        &mut reader,
        "verify",
        "config.get",
        json!({ "token": token }),
    );
    assert_eq!(
        config.pointer("/schedule/dayStart").and_then(|v| v.as_str()),
        Some("07:00")
    );
}

#[test]
fn shrinking_institution_hours_sweeps_existing_slots() {
    let workspace = temp_dir("timetabled-config-sweep");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let token = setup_admin(&mut stdin, &mut reader, &workspace);
    let (teacher_id, subject_id, room_id) = seed_catalog(&mut stdin, &mut reader, &token);

    // Valid under the default 07:00-21:00 hours.
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "slots.create",
        json!({
            "token": token,
            "teacherId": teacher_id,
            "subjectId": subject_id,
            "roomId": room_id,
            "day": "Monday",
            "start": "07:00",
            "end": "08:00"
        }),
    );
    let slot_id = created
        .pointer("/slot/id")
        .and_then(|v| v.as_str())
        .expect("slot id")
        .to_string();

    // The institution now opens at 08:00; the existing slot is stranded.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "config.update",
        json!({
            "token": token,
            "section": "schedule",
            "patch": { "dayStart": "08:00" }
        }),
    );
    assert_eq!(
        updated.pointer("/sweep/total").and_then(|v| v.as_i64()),
        Some(1)
    );
    assert_eq!(
        updated
            .pointer("/sweep/slotsWithErrors")
            .and_then(|v| v.as_i64()),
        Some(1)
    );

    let sweep = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "slots.sweep",
        json!({ "token": token }),
    );
    let findings = sweep
        .get("findings")
        .and_then(|v| v.as_array())
        .expect("findings");
    assert_eq!(findings.len(), 1);
    assert_eq!(
        findings[0].get("slotId").and_then(|v| v.as_str()),
        Some(slot_id.as_str())
    );
    assert_eq!(
        findings[0].get("teacherName").and_then(|v| v.as_str()),
        Some("Garcia")
    );
    let errors = findings[0]
        .get("errors")
        .and_then(|v| v.as_array())
        .expect("finding errors");
    assert!(
        errors[0]
            .as_str()
            .map(|e| e.contains("08:00"))
            .unwrap_or(false),
        "{:?}",
        errors
    );

    // Resetting the schedule section restores the wide hours; the sweep in
    // the reset response already reflects them.
    let reset = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "config.reset",
        json!({ "token": token, "section": "schedule" }),
    );
    assert_eq!(
        reset
            .pointer("/sweep/slotsWithErrors")
            .and_then(|v| v.as_i64()),
        Some(0)
    );
}

#[test]
fn interface_updates_do_not_trigger_a_sweep() {
    let workspace = temp_dir("timetabled-config-no-sweep");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let token = setup_admin(&mut stdin, &mut reader, &workspace);

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "config.update",
        json!({
            "token": token,
            "section": "interface",
            "patch": { "theme": "dark" }
        }),
    );
    assert!(updated.get("sweep").map(|v| v.is_null()).unwrap_or(false));
}

#[test]
fn config_writes_require_the_admin_role() {
    let workspace = temp_dir("timetabled-config-roles");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _admin = setup_admin(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "auth.signup",
        json!({
            "email": "garcia@uni.edu",
            "password": "secret",
            "name": "Garcia",
            "role": "teacher"
        }),
    );
    let login = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "email": "garcia@uni.edu", "password": "secret" }),
    );
    let teacher_token = login.get("token").and_then(|v| v.as_str()).expect("token");

    let denied = request(
        &mut stdin,
        &mut reader,
        "3",
        "config.update",
        json!({
            "token": teacher_token,
            "section": "interface",
            "patch": { "theme": "dark" }
        }),
    );
    assert_eq!(error_code(&denied), "forbidden");

    // Reading the configuration stays open to any signed-in user.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "config.get",
        json!({ "token": teacher_token }),
    );
}
