use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    authenticate, now_utc, parse_range, require_admin, windows_to_json,
};
use crate::ipc::types::{AppState, Request};
use crate::rules::TimeRange;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn days_from_param(
    req: &Request,
    value: &serde_json::Value,
) -> Result<Vec<String>, serde_json::Value> {
    let Some(arr) = value.as_array() else {
        return Err(err(
            &req.id,
            "bad_params",
            "availableDays must be an array of day names",
            None,
        ));
    };
    let mut days = Vec::with_capacity(arr.len());
    for item in arr {
        match item.as_str().map(|s| s.trim()) {
            Some(day) if !day.is_empty() => days.push(day.to_string()),
            _ => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    "availableDays must contain non-empty day names",
                    None,
                ))
            }
        }
    }
    Ok(days)
}

fn windows_from_param(
    req: &Request,
    value: &serde_json::Value,
) -> Result<Vec<TimeRange>, serde_json::Value> {
    let Some(arr) = value.as_array() else {
        return Err(err(
            &req.id,
            "bad_params",
            "availabilityWindows must be an array of {start, end}",
            None,
        ));
    };
    let mut windows = Vec::with_capacity(arr.len());
    for item in arr {
        let (Some(start), Some(end)) = (
            item.get("start").and_then(|v| v.as_str()),
            item.get("end").and_then(|v| v.as_str()),
        ) else {
            return Err(err(
                &req.id,
                "bad_params",
                "each availability window needs start and end times",
                None,
            ));
        };
        windows.push(parse_range(req, start, end)?);
    }
    Ok(windows)
}

fn availability_json(req_id: &str, raw: &str, what: &str) -> Result<serde_json::Value, serde_json::Value> {
    serde_json::from_str(raw).map_err(|_| {
        err(
            req_id,
            "db_query_failed",
            format!("stored {} is corrupt", what),
            None,
        )
    })
}

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = authenticate(conn, req) {
        return resp;
    }

    let mut stmt = match conn.prepare(
        "SELECT
           t.id,
           t.name,
           t.email,
           t.specialty,
           t.available_days,
           t.availability_windows,
           t.user_id,
           (SELECT COUNT(*) FROM slots s WHERE s.teacher_id = t.id) AS slot_count
         FROM teachers t
         ORDER BY t.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    type Row = (
        String,
        String,
        Option<String>,
        Option<String>,
        String,
        String,
        Option<String>,
        i64,
    );
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, i64>(7)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<Row>, _>>());

    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut teachers = Vec::with_capacity(rows.len());
    for (id, name, email, specialty, days_raw, windows_raw, user_id, slot_count) in rows {
        let days = match availability_json(&req.id, &days_raw, "available days") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        let windows = match availability_json(&req.id, &windows_raw, "availability windows") {
            Ok(v) => v,
            Err(resp) => return resp,
        };
        teachers.push(json!({
            "id": id,
            "name": name,
            "email": email,
            "specialty": specialty,
            "availableDays": days,
            "availabilityWindows": windows,
            "userId": user_id,
            "slotCount": slot_count,
        }));
    }

    ok(&req.id, json!({ "teachers": teachers }))
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let email = req
        .params
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let specialty = req
        .params
        .get("specialty")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let days = match req.params.get("availableDays") {
        Some(v) => match days_from_param(req, v) {
            Ok(d) => d,
            Err(resp) => return resp,
        },
        None => Vec::new(),
    };
    let windows = match req.params.get("availabilityWindows") {
        Some(v) => match windows_from_param(req, v) {
            Ok(w) => w,
            Err(resp) => return resp,
        },
        None => Vec::new(),
    };

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, name, email, specialty, available_days, availability_windows, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &teacher_id,
            &name,
            &email,
            &specialty,
            &json!(days).to_string(),
            &windows_to_json(&windows).to_string(),
            &now_utc(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(&req.id, json!({ "teacherId": teacher_id, "name": name }))
}

struct TeacherPatch {
    name: Option<String>,
    email: Option<Option<String>>,
    specialty: Option<Option<String>>,
    days_json: Option<String>,
    windows_json: Option<String>,
}

fn patch_from_params(req: &Request) -> Result<TeacherPatch, serde_json::Value> {
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if v.trim().is_empty() => {
            return Err(err(&req.id, "bad_params", "name must not be empty", None))
        }
        Some(v) => Some(v.trim().to_string()),
        None => None,
    };
    let email = req
        .params
        .get("email")
        .map(|v| v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()));
    let specialty = req
        .params
        .get("specialty")
        .map(|v| v.as_str().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()));
    let days_json = match req.params.get("availableDays") {
        Some(v) => Some(json!(days_from_param(req, v)?).to_string()),
        None => None,
    };
    let windows_json = match req.params.get("availabilityWindows") {
        Some(v) => Some(windows_to_json(&windows_from_param(req, v)?).to_string()),
        None => None,
    };
    Ok(TeacherPatch {
        name,
        email,
        specialty,
        days_json,
        windows_json,
    })
}

fn apply_teacher_patch(
    conn: &rusqlite::Connection,
    req: &Request,
    teacher_id: &str,
    patch: &TeacherPatch,
) -> Option<serde_json::Value> {
    if let Some(name) = &patch.name {
        if let Err(e) = conn.execute(
            "UPDATE teachers SET name = ? WHERE id = ?",
            (name, teacher_id),
        ) {
            return Some(err(&req.id, "db_update_failed", e.to_string(), None));
        }
    }
    if let Some(email) = &patch.email {
        if let Err(e) = conn.execute(
            "UPDATE teachers SET email = ? WHERE id = ?",
            (email, teacher_id),
        ) {
            return Some(err(&req.id, "db_update_failed", e.to_string(), None));
        }
    }
    if let Some(specialty) = &patch.specialty {
        if let Err(e) = conn.execute(
            "UPDATE teachers SET specialty = ? WHERE id = ?",
            (specialty, teacher_id),
        ) {
            return Some(err(&req.id, "db_update_failed", e.to_string(), None));
        }
    }
    if let Some(days) = &patch.days_json {
        if let Err(e) = conn.execute(
            "UPDATE teachers SET available_days = ? WHERE id = ?",
            (days, teacher_id),
        ) {
            return Some(err(&req.id, "db_update_failed", e.to_string(), None));
        }
    }
    if let Some(windows) = &patch.windows_json {
        if let Err(e) = conn.execute(
            "UPDATE teachers SET availability_windows = ? WHERE id = ?",
            (windows, teacher_id),
        ) {
            return Some(err(&req.id, "db_update_failed", e.to_string(), None));
        }
    }
    None
}

fn handle_teachers_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let Some(teacher_id) = req.params.get("teacherId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing teacherId", None);
    };
    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    let patch = match patch_from_params(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    if let Some(resp) = apply_teacher_patch(conn, req, teacher_id, &patch) {
        return resp;
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_teachers_update_own(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user = match authenticate(conn, req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let teacher_id: Option<String> = match conn
        .query_row(
            "SELECT id FROM teachers WHERE user_id = ?",
            [&user.id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(teacher_id) = teacher_id else {
        return err(
            &req.id,
            "not_found",
            "no roster record is linked to this account",
            None,
        );
    };

    // Self-service keeps the schedule plannable: a teacher must stay
    // reachable on at least one day and one window.
    let days = match req.params.get("availableDays") {
        Some(v) => match days_from_param(req, v) {
            Ok(d) => d,
            Err(resp) => return resp,
        },
        None => return err(&req.id, "bad_params", "missing availableDays", None),
    };
    if days.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "availableDays must list at least one day",
            None,
        );
    }
    let windows = match req.params.get("availabilityWindows") {
        Some(v) => match windows_from_param(req, v) {
            Ok(w) => w,
            Err(resp) => return resp,
        },
        None => {
            return err(
                &req.id,
                "bad_params",
                "missing availabilityWindows",
                None,
            )
        }
    };
    if windows.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "availabilityWindows must list at least one window",
            None,
        );
    }

    let mut patch = match patch_from_params(req) {
        Ok(p) => p,
        Err(resp) => return resp,
    };
    // Only profile fields; the account link and email stay admin-managed.
    patch.email = None;
    if let Some(resp) = apply_teacher_patch(conn, req, &teacher_id, &patch) {
        return resp;
    }

    ok(&req.id, json!({ "teacherId": teacher_id }))
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let Some(teacher_id) = req.params.get("teacherId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing teacherId", None);
    };
    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // The teacher's scheduled classes go with the teacher.
    if let Err(e) = tx.execute("DELETE FROM slots WHERE teacher_id = ?", [teacher_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "slots" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM teachers WHERE id = ?", [teacher_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.update" => Some(handle_teachers_update(state, req)),
        "teachers.update_own" => Some(handle_teachers_update_own(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        _ => None,
    }
}
