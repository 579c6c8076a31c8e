use crate::ipc::error::{err, ok};
use crate::ipc::handlers::config::{load_institution_rules, schedule_days};
use crate::ipc::helpers::{
    authenticate, day_order_index, load_rooms, load_slots, load_teacher_availability, now_utc,
    parse_range, require_admin,
};
use crate::ipc::types::{AppState, Request};
use crate::rules::{self, InstitutionRules, RoomInfo, Slot, SlotCandidate, TeacherAvailability};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Everything `evaluate` needs, fetched fresh per request so the verdict is
/// never computed against a stale schedule.
struct Snapshot {
    slots: Vec<Slot>,
    teachers: Vec<TeacherAvailability>,
    rooms: Vec<RoomInfo>,
    rules: InstitutionRules,
    days: Vec<String>,
}

fn load_snapshot(conn: &Connection, req: &Request) -> Result<Snapshot, serde_json::Value> {
    let inner = || -> anyhow::Result<Snapshot> {
        Ok(Snapshot {
            slots: load_slots(conn)?,
            teachers: load_teacher_availability(conn)?,
            rooms: load_rooms(conn)?,
            rules: load_institution_rules(conn)?,
            days: schedule_days(conn)?,
        })
    };
    inner().map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn referent_exists(
    conn: &Connection,
    req: &Request,
    table: &str,
    id: &str,
    what: &str,
) -> Result<(), serde_json::Value> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found: Option<i64> = conn
        .query_row(&sql, [id], |r| r.get(0))
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if found.is_none() {
        return Err(err(&req.id, "not_found", format!("{} not found", what), None));
    }
    Ok(())
}

fn string_param(req: &Request, field: &str) -> Result<String, serde_json::Value> {
    match req.params.get(field).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(err(
            &req.id,
            "bad_params",
            format!("missing {}", field),
            None,
        )),
    }
}

/// Boundary assembly of a candidate: times parsed to minutes, range ordered,
/// day one of the configured week, all referents present. The evaluator only
/// ever sees well-formed input.
fn candidate_from_params(
    conn: &Connection,
    req: &Request,
    snapshot: &Snapshot,
    editing: Option<&Slot>,
) -> Result<SlotCandidate, serde_json::Value> {
    let field = |name: &str, fallback: Option<&str>| -> Result<String, serde_json::Value> {
        match req.params.get(name).and_then(|v| v.as_str()) {
            Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
            _ => match fallback {
                Some(v) => Ok(v.to_string()),
                None => Err(err(&req.id, "bad_params", format!("missing {}", name), None)),
            },
        }
    };

    let teacher_id = field("teacherId", editing.map(|s| s.teacher_id.as_str()))?;
    let subject_id = field("subjectId", editing.map(|s| s.subject_id.as_str()))?;
    let room_id = field("roomId", editing.map(|s| s.room_id.as_str()))?;
    let day = field("day", editing.map(|s| s.day.as_str()))?;

    if !snapshot.days.iter().any(|d| d == &day) {
        return Err(err(
            &req.id,
            "bad_params",
            format!(
                "day must be one of the configured week ({}), got {:?}",
                snapshot.days.join(", "),
                day
            ),
            None,
        ));
    }

    let range = match (
        req.params.get("start").and_then(|v| v.as_str()),
        req.params.get("end").and_then(|v| v.as_str()),
    ) {
        (Some(start), Some(end)) => parse_range(req, start, end)?,
        (None, None) => match editing {
            Some(slot) => slot.range,
            None => return Err(err(&req.id, "bad_params", "missing start and end", None)),
        },
        _ => {
            return Err(err(
                &req.id,
                "bad_params",
                "start and end must be supplied together",
                None,
            ))
        }
    };

    referent_exists(conn, req, "teachers", &teacher_id, "teacher")?;
    referent_exists(conn, req, "subjects", &subject_id, "subject")?;
    referent_exists(conn, req, "rooms", &room_id, "room")?;

    Ok(SlotCandidate {
        id: editing.map(|s| s.id.clone()),
        teacher_id,
        subject_id,
        room_id,
        day,
        range,
    })
}

fn find_slot<'a>(snapshot: &'a Snapshot, slot_id: &str) -> Option<&'a Slot> {
    snapshot.slots.iter().find(|s| s.id == slot_id)
}

/// Errors block the write outright; warnings block until the operator sends
/// `confirmWarnings: true`. Returns the confirmed warnings for the response.
fn gate_on_report(
    req: &Request,
    report: &rules::ValidationReport,
) -> Result<Vec<String>, serde_json::Value> {
    if !report.is_valid() {
        return Err(err(
            &req.id,
            "validation_failed",
            "the proposed slot violates institution rules",
            Some(report.to_json()),
        ));
    }
    if !report.warnings.is_empty() {
        let confirmed = req
            .params
            .get("confirmWarnings")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !confirmed {
            return Err(err(
                &req.id,
                "warnings_unconfirmed",
                "the proposed slot raises warnings; repeat with confirmWarnings to proceed",
                Some(report.to_json()),
            ));
        }
    }
    Ok(report.warnings.clone())
}

fn slot_json(candidate: &SlotCandidate, slot_id: &str) -> serde_json::Value {
    json!({
        "id": slot_id,
        "teacherId": candidate.teacher_id,
        "subjectId": candidate.subject_id,
        "roomId": candidate.room_id,
        "day": candidate.day,
        "start": candidate.range.start().to_string(),
        "end": candidate.range.end().to_string(),
    })
}

fn handle_slots_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = authenticate(conn, req) {
        return resp;
    }

    let days = match schedule_days(conn) {
        Ok(d) => d,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT
           s.id, s.day, s.start_minute, s.end_minute,
           s.teacher_id, t.name,
           s.subject_id, sub.code, sub.name,
           s.room_id, r.name
         FROM slots s
         JOIN teachers t ON t.id = s.teacher_id
         JOIN subjects sub ON sub.id = s.subject_id
         JOIN rooms r ON r.id = s.room_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    type Row = (
        String,
        String,
        i64,
        i64,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    );
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, String>(10)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<Row>, _>>());

    let mut rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Optional equality filters.
    let day_filter = req.params.get("day").and_then(|v| v.as_str());
    let teacher_filter = req.params.get("teacherId").and_then(|v| v.as_str());
    let room_filter = req.params.get("roomId").and_then(|v| v.as_str());
    rows.retain(|r| {
        day_filter.map_or(true, |d| r.1 == d)
            && teacher_filter.map_or(true, |t| r.4 == t)
            && room_filter.map_or(true, |rm| r.9 == rm)
    });

    rows.sort_by(|a, b| {
        day_order_index(&days, &a.1)
            .cmp(&day_order_index(&days, &b.1))
            .then(a.2.cmp(&b.2))
    });

    let slots: Vec<serde_json::Value> = rows
        .into_iter()
        .map(
            |(id, day, start, end, teacher_id, teacher, subject_id, code, subject, room_id, room)| {
                json!({
                    "id": id,
                    "day": day,
                    "start": format!("{:02}:{:02}", start / 60, start % 60),
                    "end": format!("{:02}:{:02}", end / 60, end % 60),
                    "teacherId": teacher_id,
                    "teacherName": teacher,
                    "subjectId": subject_id,
                    "subjectCode": code,
                    "subjectName": subject,
                    "roomId": room_id,
                    "roomName": room,
                })
            },
        )
        .collect();

    ok(&req.id, json!({ "slots": slots }))
}

fn handle_slots_validate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    // A dry run, open to any signed-in user: teachers probe their own options.
    if let Err(resp) = authenticate(conn, req) {
        return resp;
    }

    let snapshot = match load_snapshot(conn, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let editing = match req.params.get("slotId").and_then(|v| v.as_str()) {
        Some(slot_id) => match find_slot(&snapshot, slot_id) {
            Some(s) => Some(s.clone()),
            None => return err(&req.id, "not_found", "slot not found", None),
        },
        None => None,
    };
    let candidate = match candidate_from_params(conn, req, &snapshot, editing.as_ref()) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let report = rules::evaluate(
        &candidate,
        &snapshot.slots,
        &snapshot.teachers,
        &snapshot.rooms,
        &snapshot.rules,
    );
    ok(&req.id, report.to_json())
}

fn handle_slots_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let snapshot = match load_snapshot(conn, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let candidate = match candidate_from_params(conn, req, &snapshot, None) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let report = rules::evaluate(
        &candidate,
        &snapshot.slots,
        &snapshot.teachers,
        &snapshot.rooms,
        &snapshot.rules,
    );
    let warnings = match gate_on_report(req, &report) {
        Ok(w) => w,
        Err(resp) => return resp,
    };

    let slot_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO slots(id, teacher_id, subject_id, room_id, day, start_minute, end_minute, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &slot_id,
            &candidate.teacher_id,
            &candidate.subject_id,
            &candidate.room_id,
            &candidate.day,
            candidate.range.start().minutes(),
            candidate.range.end().minutes(),
            &now_utc(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "slots" })),
        );
    }

    ok(
        &req.id,
        json!({
            "slot": slot_json(&candidate, &slot_id),
            "confirmedWarnings": warnings,
        }),
    )
}

fn handle_slots_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let slot_id = match string_param(req, "slotId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let snapshot = match load_snapshot(conn, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let Some(editing) = find_slot(&snapshot, &slot_id).cloned() else {
        return err(&req.id, "not_found", "slot not found", None);
    };

    // The stored version of the slot never conflicts with its own edit;
    // candidate.id carries the exclusion through evaluate.
    let candidate = match candidate_from_params(conn, req, &snapshot, Some(&editing)) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let report = rules::evaluate(
        &candidate,
        &snapshot.slots,
        &snapshot.teachers,
        &snapshot.rooms,
        &snapshot.rules,
    );
    let warnings = match gate_on_report(req, &report) {
        Ok(w) => w,
        Err(resp) => return resp,
    };

    if let Err(e) = conn.execute(
        "UPDATE slots SET teacher_id = ?, subject_id = ?, room_id = ?, day = ?,
         start_minute = ?, end_minute = ? WHERE id = ?",
        (
            &candidate.teacher_id,
            &candidate.subject_id,
            &candidate.room_id,
            &candidate.day,
            candidate.range.start().minutes(),
            candidate.range.end().minutes(),
            &slot_id,
        ),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "slot": slot_json(&candidate, &slot_id),
            "confirmedWarnings": warnings,
        }),
    )
}

fn handle_slots_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let slot_id = match string_param(req, "slotId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match conn.execute("DELETE FROM slots WHERE id = ?", [&slot_id]) {
        Ok(0) => err(&req.id, "not_found", "slot not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_slots_sweep(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let snapshot = match load_snapshot(conn, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    let outcome = rules::sweep(
        &snapshot.slots,
        &snapshot.teachers,
        &snapshot.rooms,
        &snapshot.rules,
    );

    let teacher_name = |id: &str| {
        snapshot
            .teachers
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.name.clone())
    };
    let room_name = |id: &str| {
        snapshot
            .rooms
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.name.clone())
    };

    let findings: Vec<serde_json::Value> = outcome
        .findings
        .iter()
        .map(|f| {
            json!({
                "slotId": f.slot.id,
                "day": f.slot.day,
                "start": f.slot.range.start().to_string(),
                "end": f.slot.range.end().to_string(),
                "teacherId": f.slot.teacher_id,
                "teacherName": teacher_name(&f.slot.teacher_id),
                "roomId": f.slot.room_id,
                "roomName": room_name(&f.slot.room_id),
                "errors": f.report.errors,
                "warnings": f.report.warnings,
            })
        })
        .collect();

    let mut result = outcome.summary_json();
    result["findings"] = json!(findings);
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "slots.list" => Some(handle_slots_list(state, req)),
        "slots.validate" => Some(handle_slots_validate(state, req)),
        "slots.create" => Some(handle_slots_create(state, req)),
        "slots.update" => Some(handle_slots_update(state, req)),
        "slots.delete" => Some(handle_slots_delete(state, req)),
        "slots.sweep" => Some(handle_slots_sweep(state, req)),
        _ => None,
    }
}
