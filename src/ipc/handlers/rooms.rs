use crate::ipc::error::{err, ok};
use crate::ipc::handlers::config::load_institution_rules;
use crate::ipc::helpers::{authenticate, now_utc, require_admin};
use crate::ipc::types::{AppState, Request};
use crate::rules;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const KINDS: [&str; 5] = [
    "classroom",
    "laboratory",
    "auditorium",
    "workshop",
    "computer_lab",
];

fn kind_from_param(req: &Request) -> Result<Option<String>, serde_json::Value> {
    match req.params.get("kind").and_then(|v| v.as_str()) {
        Some(v) if KINDS.contains(&v) => Ok(Some(v.to_string())),
        Some(other) => Err(err(
            &req.id,
            "bad_params",
            format!("kind must be one of {}, got {:?}", KINDS.join(", "), other),
            None,
        )),
        None => Ok(None),
    }
}

/// Positive, and under the configured institution ceiling. The ceiling check
/// is the room-write-time rule from the constraint module, not a schema limit.
fn capacity_from_param(
    conn: &rusqlite::Connection,
    req: &Request,
) -> Result<Option<i64>, serde_json::Value> {
    let Some(value) = req.params.get("capacity") else {
        return Ok(None);
    };
    let capacity = match value.as_i64() {
        Some(n) if n > 0 => n,
        _ => {
            return Err(err(
                &req.id,
                "bad_params",
                "capacity must be a positive integer",
                None,
            ))
        }
    };
    let rules = load_institution_rules(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    if let Some(msg) = rules::check_room_capacity(capacity, &rules) {
        return Err(err(&req.id, "bad_params", msg, None));
    }
    Ok(Some(capacity))
}

fn handle_rooms_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = authenticate(conn, req) {
        return resp;
    }

    let mut stmt = match conn.prepare(
        "SELECT
           r.id,
           r.name,
           r.building,
           r.capacity,
           r.kind,
           (SELECT COUNT(*) FROM slots s WHERE s.room_id = r.id) AS slot_count
         FROM rooms r
         ORDER BY r.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "building": row.get::<_, Option<String>>(2)?,
                "capacity": row.get::<_, i64>(3)?,
                "kind": row.get::<_, String>(4)?,
                "slotCount": row.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(rooms) => ok(&req.id, json!({ "rooms": rooms })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_rooms_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let building = req
        .params
        .get("building")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let capacity = match capacity_from_param(conn, req) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "bad_params", "missing capacity", None),
        Err(resp) => return resp,
    };
    let kind = match kind_from_param(req) {
        Ok(Some(k)) => k,
        Ok(None) => return err(&req.id, "bad_params", "missing kind", None),
        Err(resp) => return resp,
    };

    let room_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO rooms(id, name, building, capacity, kind, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&room_id, &name, &building, capacity, &kind, &now_utc()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "rooms" })),
        );
    }

    ok(&req.id, json!({ "roomId": room_id, "name": name }))
}

fn handle_rooms_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let Some(room_id) = req.params.get("roomId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing roomId", None);
    };
    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM rooms WHERE id = ?", [room_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "room not found", None);
    }

    if let Some(name) = req.params.get("name").and_then(|v| v.as_str()) {
        if name.trim().is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        if let Err(e) = conn.execute(
            "UPDATE rooms SET name = ? WHERE id = ?",
            (name.trim(), room_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(building) = req.params.get("building") {
        let building = building
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Err(e) = conn.execute(
            "UPDATE rooms SET building = ? WHERE id = ?",
            (&building, room_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(capacity) = match capacity_from_param(conn, req) {
        Ok(v) => v,
        Err(resp) => return resp,
    } {
        if let Err(e) = conn.execute(
            "UPDATE rooms SET capacity = ? WHERE id = ?",
            (capacity, room_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(kind) = match kind_from_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    } {
        if let Err(e) = conn.execute("UPDATE rooms SET kind = ? WHERE id = ?", (&kind, room_id)) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_rooms_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let Some(room_id) = req.params.get("roomId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing roomId", None);
    };
    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM rooms WHERE id = ?", [room_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "room not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute("DELETE FROM slots WHERE room_id = ?", [room_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "slots" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM rooms WHERE id = ?", [room_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "rooms" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "rooms.list" => Some(handle_rooms_list(state, req)),
        "rooms.create" => Some(handle_rooms_create(state, req)),
        "rooms.update" => Some(handle_rooms_update(state, req)),
        "rooms.delete" => Some(handle_rooms_delete(state, req)),
        _ => None,
    }
}
