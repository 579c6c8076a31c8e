use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{authenticate, now_utc, require_admin};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const LEVELS: [&str; 4] = ["bachelor", "engineering", "masters", "doctorate"];

/// Program codes are stored trimmed and uppercased so "mat-01" and "MAT-01"
/// collide instead of coexisting.
fn code_from_param(req: &Request) -> Result<Option<String>, serde_json::Value> {
    match req.params.get("code").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(Some(v.trim().to_ascii_uppercase())),
        Some(_) => Err(err(&req.id, "bad_params", "code must not be empty", None)),
        None => Ok(None),
    }
}

fn level_from_param(req: &Request) -> Result<Option<String>, serde_json::Value> {
    match req.params.get("level").and_then(|v| v.as_str()) {
        Some(v) if LEVELS.contains(&v) => Ok(Some(v.to_string())),
        Some(other) => Err(err(
            &req.id,
            "bad_params",
            format!("level must be one of {}, got {:?}", LEVELS.join(", "), other),
            None,
        )),
        None => Ok(None),
    }
}

fn code_taken(
    conn: &rusqlite::Connection,
    req: &Request,
    code: &str,
    except_id: Option<&str>,
) -> Result<bool, serde_json::Value> {
    let found: Option<String> = conn
        .query_row("SELECT id FROM programs WHERE code = ?", [code], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    Ok(match found {
        Some(id) => Some(id.as_str()) != except_id,
        None => false,
    })
}

fn handle_programs_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = authenticate(conn, req) {
        return resp;
    }

    let mut stmt = match conn.prepare(
        "SELECT
           p.id,
           p.code,
           p.name,
           p.level,
           p.department,
           p.active,
           (SELECT COUNT(*) FROM subjects s WHERE s.program_id = p.id) AS subject_count
         FROM programs p
         ORDER BY p.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "code": row.get::<_, String>(1)?,
                "name": row.get::<_, String>(2)?,
                "level": row.get::<_, String>(3)?,
                "department": row.get::<_, Option<String>>(4)?,
                "active": row.get::<_, i64>(5)? != 0,
                "subjectCount": row.get::<_, i64>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(programs) => ok(&req.id, json!({ "programs": programs })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_programs_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let code = match code_from_param(req) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "bad_params", "missing code", None),
        Err(resp) => return resp,
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let level = match level_from_param(req) {
        Ok(Some(l)) => l,
        Ok(None) => return err(&req.id, "bad_params", "missing level", None),
        Err(resp) => return resp,
    };
    let department = req
        .params
        .get("department")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    match code_taken(conn, req, &code, None) {
        Ok(true) => {
            return err(
                &req.id,
                "duplicate",
                format!("a program with code {} already exists", code),
                None,
            )
        }
        Ok(false) => {}
        Err(resp) => return resp,
    }

    let program_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO programs(id, code, name, level, department, active, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &program_id,
            &code,
            &name,
            &level,
            &department,
            active as i64,
            &now_utc(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "programs" })),
        );
    }

    ok(&req.id, json!({ "programId": program_id, "code": code }))
}

fn handle_programs_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let Some(program_id) = req.params.get("programId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing programId", None);
    };
    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM programs WHERE id = ?", [program_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "program not found", None);
    }

    if let Some(code) = match code_from_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    } {
        match code_taken(conn, req, &code, Some(program_id)) {
            Ok(true) => {
                return err(
                    &req.id,
                    "duplicate",
                    format!("a program with code {} already exists", code),
                    None,
                )
            }
            Ok(false) => {}
            Err(resp) => return resp,
        }
        if let Err(e) = conn.execute(
            "UPDATE programs SET code = ? WHERE id = ?",
            (&code, program_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(name) = req.params.get("name").and_then(|v| v.as_str()) {
        if name.trim().is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        if let Err(e) = conn.execute(
            "UPDATE programs SET name = ? WHERE id = ?",
            (name.trim(), program_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(level) = match level_from_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    } {
        if let Err(e) = conn.execute(
            "UPDATE programs SET level = ? WHERE id = ?",
            (&level, program_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(department) = req.params.get("department") {
        let department = department
            .as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if let Err(e) = conn.execute(
            "UPDATE programs SET department = ? WHERE id = ?",
            (&department, program_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(active) = req.params.get("active").and_then(|v| v.as_bool()) {
        if let Err(e) = conn.execute(
            "UPDATE programs SET active = ? WHERE id = ?",
            (active as i64, program_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_programs_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let Some(program_id) = req.params.get("programId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing programId", None);
    };
    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM programs WHERE id = ?", [program_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "program not found", None);
    }

    // Subjects reference programs; deleting out from under them would orphan
    // the catalog, so the delete is blocked until they move or go.
    let subject_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM subjects WHERE program_id = ?",
        [program_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if subject_count > 0 {
        return err(
            &req.id,
            "program_in_use",
            format!("{} subjects still reference this program", subject_count),
            Some(json!({ "subjectCount": subject_count })),
        );
    }

    match conn.execute("DELETE FROM programs WHERE id = ?", [program_id]) {
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "programs.list" => Some(handle_programs_list(state, req)),
        "programs.create" => Some(handle_programs_create(state, req)),
        "programs.update" => Some(handle_programs_update(state, req)),
        "programs.delete" => Some(handle_programs_delete(state, req)),
        _ => None,
    }
}
