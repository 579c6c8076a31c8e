use crate::ipc::error::{err, ok};
use crate::ipc::handlers::config::schedule_days;
use crate::ipc::helpers::{authenticate, day_order_index, require_admin, AuthUser};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct ScheduleRow {
    day: String,
    start: i64,
    end: i64,
    subject: String,
    other: String,
}

fn clock(minutes: i64) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

fn sort_week_order(rows: &mut [ScheduleRow], days: &[String]) {
    rows.sort_by(|a, b| {
        day_order_index(days, &a.day)
            .cmp(&day_order_index(days, &b.day))
            .then(a.start.cmp(&b.start))
    });
}

fn weekly_hours(rows: &[ScheduleRow]) -> String {
    let minutes: i64 = rows.iter().map(|r| r.end - r.start).sum();
    format!("{:.1}", minutes as f64 / 60.0)
}

/// A teacher account may only look at its own linked roster record; the
/// administrator may look at anyone's.
fn resolve_teacher_scope(
    conn: &Connection,
    req: &Request,
    user: &AuthUser,
    requested: &str,
) -> Result<(), serde_json::Value> {
    if user.is_admin() {
        return Ok(());
    }
    let own: Option<String> = conn
        .query_row(
            "SELECT id FROM teachers WHERE user_id = ?",
            [&user.id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if own.as_deref() != Some(requested) {
        return Err(err(
            &req.id,
            "forbidden",
            "teachers may only view their own schedule",
            None,
        ));
    }
    Ok(())
}

fn handle_reports_teacher(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user = match authenticate(conn, req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    let Some(teacher_id) = req.params.get("teacherId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing teacherId", None);
    };
    if let Err(resp) = resolve_teacher_scope(conn, req, &user, teacher_id) {
        return resp;
    }

    let teacher_name: Option<String> = match conn
        .query_row("SELECT name FROM teachers WHERE id = ?", [teacher_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(teacher_name) = teacher_name else {
        return err(&req.id, "not_found", "teacher not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT s.day, s.start_minute, s.end_minute,
                sub.code, sub.name, r.name, r.building
         FROM slots s
         JOIN subjects sub ON sub.id = s.subject_id
         JOIN rooms r ON r.id = s.room_id
         WHERE s.teacher_id = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([teacher_id], |row| {
            let building: Option<String> = row.get(6)?;
            let room: String = row.get(5)?;
            Ok(ScheduleRow {
                day: row.get(0)?,
                start: row.get(1)?,
                end: row.get(2)?,
                subject: format!("{} - {}", row.get::<_, String>(3)?, row.get::<_, String>(4)?),
                other: match building {
                    Some(b) if !b.is_empty() => format!("{} ({})", room, b),
                    _ => room,
                },
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let mut rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let days = match schedule_days(conn) {
        Ok(d) => d,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    sort_week_order(&mut rows, &days);

    let hours = weekly_hours(&rows);
    let schedule: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| {
            json!({
                "day": r.day,
                "start": clock(r.start),
                "end": clock(r.end),
                "subject": r.subject,
                "room": r.other,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "teacherId": teacher_id,
            "teacherName": teacher_name,
            "schedule": schedule,
            "weeklyHours": hours,
        }),
    )
}

fn handle_reports_room(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }
    let Some(room_id) = req.params.get("roomId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing roomId", None);
    };

    let room_name: Option<String> = match conn
        .query_row("SELECT name FROM rooms WHERE id = ?", [room_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(room_name) = room_name else {
        return err(&req.id, "not_found", "room not found", None);
    };

    let mut stmt = match conn.prepare(
        "SELECT s.day, s.start_minute, s.end_minute,
                sub.code, sub.name, t.name
         FROM slots s
         JOIN subjects sub ON sub.id = s.subject_id
         JOIN teachers t ON t.id = s.teacher_id
         WHERE s.room_id = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([room_id], |row| {
            Ok(ScheduleRow {
                day: row.get(0)?,
                start: row.get(1)?,
                end: row.get(2)?,
                subject: format!("{} - {}", row.get::<_, String>(3)?, row.get::<_, String>(4)?),
                other: row.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let mut rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let days = match schedule_days(conn) {
        Ok(d) => d,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    sort_week_order(&mut rows, &days);

    let occupancy: Vec<serde_json::Value> = rows
        .iter()
        .map(|r| {
            json!({
                "day": r.day,
                "start": clock(r.start),
                "end": clock(r.end),
                "subject": r.subject,
                "teacher": r.other,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "roomId": room_id,
            "roomName": room_name,
            "occupancy": occupancy,
        }),
    )
}

fn count(conn: &Connection, sql: &str) -> rusqlite::Result<i64> {
    conn.query_row(sql, [], |r| r.get(0))
}

fn admin_dashboard(conn: &Connection, req: &Request) -> serde_json::Value {
    let totals = (|| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "teachers": count(conn, "SELECT COUNT(*) FROM teachers")?,
            "subjects": count(conn, "SELECT COUNT(*) FROM subjects")?,
            "rooms": count(conn, "SELECT COUNT(*) FROM rooms")?,
            "programs": count(conn, "SELECT COUNT(*) FROM programs")?,
            "slots": count(conn, "SELECT COUNT(*) FROM slots")?,
        }))
    })();
    let totals = match totals {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let days = match schedule_days(conn) {
        Ok(d) => d,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut per_day = Vec::with_capacity(days.len());
    for day in &days {
        let n: i64 = match conn.query_row("SELECT COUNT(*) FROM slots WHERE day = ?", [day], |r| {
            r.get(0)
        }) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        per_day.push(json!({ "day": day, "slots": n }));
    }

    ok(
        &req.id,
        json!({
            "role": "admin",
            "totals": totals,
            "slotsPerDay": per_day,
        }),
    )
}

fn teacher_dashboard(conn: &Connection, req: &Request, user: &AuthUser) -> serde_json::Value {
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

    let mut stmt = match conn.prepare(
        "SELECT s.day, s.start_minute, s.end_minute, s.subject_id,
                sub.code, sub.name, r.name
         FROM slots s
         JOIN subjects sub ON sub.id = s.subject_id
         JOIN rooms r ON r.id = s.room_id
         WHERE s.teacher_id = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&teacher_id], |row| {
            Ok((
                ScheduleRow {
                    day: row.get(0)?,
                    start: row.get(1)?,
                    end: row.get(2)?,
                    subject: format!(
                        "{} - {}",
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?
                    ),
                    other: row.get(6)?,
                },
                row.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut subject_ids: Vec<&str> = rows.iter().map(|(_, sid)| sid.as_str()).collect();
    subject_ids.sort_unstable();
    subject_ids.dedup();
    let subject_count = subject_ids.len();
    let mut day_names: Vec<&str> = rows.iter().map(|(r, _)| r.day.as_str()).collect();
    day_names.sort_unstable();
    day_names.dedup();
    let day_count = day_names.len();

    let mut schedule: Vec<ScheduleRow> = rows.into_iter().map(|(r, _)| r).collect();
    let days = match schedule_days(conn) {
        Ok(d) => d,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    sort_week_order(&mut schedule, &days);
    let hours = weekly_hours(&schedule);

    let upcoming: Vec<serde_json::Value> = schedule
        .iter()
        .take(5)
        .map(|r| {
            json!({
                "day": r.day,
                "start": clock(r.start),
                "end": clock(r.end),
                "subject": r.subject,
                "room": r.other,
            })
        })
        .collect();

    ok(
        &req.id,
        json!({
            "role": "teacher",
            "teacherId": teacher_id,
            "weeklyHours": hours,
            "subjectCount": subject_count,
            "dayCount": day_count,
            "upcoming": upcoming,
        }),
    )
}

fn handle_reports_dashboard(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user = match authenticate(conn, req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    if user.is_admin() {
        admin_dashboard(conn, req)
    } else {
        teacher_dashboard(conn, req, &user)
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.teacher" => Some(handle_reports_teacher(state, req)),
        "reports.room" => Some(handle_reports_room(state, req)),
        "reports.dashboard" => Some(handle_reports_dashboard(state, req)),
        _ => None,
    }
}
