use crate::ipc::error::err;
use crate::ipc::types::Request;
use crate::rules::{ClockTime, RoomInfo, Slot, TeacherAvailability, TimeRange};
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use serde_json::json;

pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Resolves `params.token` to its session's user. Every method except
/// `health`, `workspace.select`, `auth.signup`, and `auth.login` goes
/// through here.
pub fn authenticate(conn: &Connection, req: &Request) -> Result<AuthUser, serde_json::Value> {
    let Some(token) = req.params.get("token").and_then(|v| v.as_str()) else {
        return Err(err(&req.id, "unauthorized", "missing params.token", None));
    };

    let user = conn
        .query_row(
            "SELECT u.id, u.email, u.name, u.role
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = ?",
            [token],
            |r| {
                Ok(AuthUser {
                    id: r.get(0)?,
                    email: r.get(1)?,
                    name: r.get(2)?,
                    role: r.get(3)?,
                })
            },
        )
        .optional();

    match user {
        Ok(Some(u)) => Ok(u),
        Ok(None) => Err(err(&req.id, "unauthorized", "invalid session token", None)),
        Err(e) => Err(err(&req.id, "db_query_failed", e.to_string(), None)),
    }
}

pub fn require_admin(conn: &Connection, req: &Request) -> Result<AuthUser, serde_json::Value> {
    let user = authenticate(conn, req)?;
    if !user.is_admin() {
        return Err(err(
            &req.id,
            "forbidden",
            "administrator role required",
            None,
        ));
    }
    Ok(user)
}

pub fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Boundary parse of a "HH:MM" param; everything downstream works in
/// minutes-since-midnight.
pub fn parse_clock(req: &Request, field: &str, raw: &str) -> Result<ClockTime, serde_json::Value> {
    raw.parse().map_err(|_| {
        err(
            &req.id,
            "bad_params",
            format!("{} must be a HH:MM time, got {:?}", field, raw),
            None,
        )
    })
}

pub fn parse_range(
    req: &Request,
    start_raw: &str,
    end_raw: &str,
) -> Result<TimeRange, serde_json::Value> {
    let start = parse_clock(req, "start", start_raw)?;
    let end = parse_clock(req, "end", end_raw)?;
    TimeRange::new(start, end).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            format!("start {} must come before end {}", start, end),
            None,
        )
    })
}

#[derive(Deserialize)]
struct StoredWindow {
    start: String,
    end: String,
}

/// Availability windows persist as `[{"start":"HH:MM","end":"HH:MM"}]`.
pub fn parse_windows_json(raw: &str) -> anyhow::Result<Vec<TimeRange>> {
    let stored: Vec<StoredWindow> = serde_json::from_str(raw)?;
    let mut windows = Vec::with_capacity(stored.len());
    for w in stored {
        let start: ClockTime = w
            .start
            .parse()
            .map_err(|e| anyhow::anyhow!("availability window: {}", e))?;
        let end: ClockTime = w
            .end
            .parse()
            .map_err(|e| anyhow::anyhow!("availability window: {}", e))?;
        let range = TimeRange::new(start, end)
            .ok_or_else(|| anyhow::anyhow!("availability window {}-{} is inverted", start, end))?;
        windows.push(range);
    }
    Ok(windows)
}

pub fn windows_to_json(windows: &[TimeRange]) -> serde_json::Value {
    json!(windows
        .iter()
        .map(|w| json!({ "start": w.start().to_string(), "end": w.end().to_string() }))
        .collect::<Vec<_>>())
}

pub fn parse_days_json(raw: &str) -> anyhow::Result<Vec<String>> {
    Ok(serde_json::from_str(raw)?)
}

pub fn load_slots(conn: &Connection) -> anyhow::Result<Vec<Slot>> {
    let mut stmt = conn.prepare(
        "SELECT id, teacher_id, subject_id, room_id, day, start_minute, end_minute FROM slots",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut slots = Vec::with_capacity(rows.len());
    for (id, teacher_id, subject_id, room_id, day, start, end) in rows {
        let range = TimeRange::from_minutes(start, end)
            .ok_or_else(|| anyhow::anyhow!("slot {} stores a corrupt time range", id))?;
        slots.push(Slot {
            id,
            teacher_id,
            subject_id,
            room_id,
            day,
            range,
        });
    }
    Ok(slots)
}

pub fn load_teacher_availability(conn: &Connection) -> anyhow::Result<Vec<TeacherAvailability>> {
    let mut stmt =
        conn.prepare("SELECT id, name, available_days, availability_windows FROM teachers")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut teachers = Vec::with_capacity(rows.len());
    for (id, name, days_raw, windows_raw) in rows {
        teachers.push(TeacherAvailability {
            id,
            name,
            available_days: parse_days_json(&days_raw)?,
            availability_windows: parse_windows_json(&windows_raw)?,
        });
    }
    Ok(teachers)
}

pub fn load_rooms(conn: &Connection) -> anyhow::Result<Vec<RoomInfo>> {
    let mut stmt = conn.prepare("SELECT id, name, capacity FROM rooms")?;
    let rooms = stmt
        .query_map([], |row| {
            Ok(RoomInfo {
                id: row.get(0)?,
                name: row.get(1)?,
                capacity: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rooms)
}

/// Position of `day` in the configured week, unknown days last. Report and
/// listing order everywhere is week order, then start time.
pub fn day_order_index(days: &[String], day: &str) -> usize {
    days.iter().position(|d| d == day).unwrap_or(usize::MAX)
}
