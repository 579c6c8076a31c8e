use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{authenticate, now_utc, require_admin};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const MODALITIES: [&str; 2] = ["in_person", "virtual"];

fn modality_from_param(req: &Request) -> Result<Option<String>, serde_json::Value> {
    match req.params.get("modality").and_then(|v| v.as_str()) {
        Some(v) if MODALITIES.contains(&v) => Ok(Some(v.to_string())),
        Some(other) => Err(err(
            &req.id,
            "bad_params",
            format!(
                "modality must be one of {}, got {:?}",
                MODALITIES.join(", "),
                other
            ),
            None,
        )),
        None => Ok(None),
    }
}

fn program_exists(
    conn: &rusqlite::Connection,
    req: &Request,
    program_id: &str,
) -> Result<bool, serde_json::Value> {
    conn.query_row("SELECT 1 FROM programs WHERE id = ?", [program_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))
}

fn code_taken(
    conn: &rusqlite::Connection,
    req: &Request,
    code: &str,
    except_id: Option<&str>,
) -> Result<bool, serde_json::Value> {
    let found: Option<String> = conn
        .query_row("SELECT id FROM subjects WHERE code = ?", [code], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    Ok(match found {
        Some(id) => Some(id.as_str()) != except_id,
        None => false,
    })
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = authenticate(conn, req) {
        return resp;
    }

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.code, s.name, s.modality, s.program_id, p.code, p.name
         FROM subjects s
         JOIN programs p ON p.id = s.program_id
         ORDER BY s.code",
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
                "modality": row.get::<_, String>(3)?,
                "programId": row.get::<_, String>(4)?,
                "programCode": row.get::<_, String>(5)?,
                "programName": row.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let code = match req.params.get("code").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_ascii_uppercase(),
        _ => return err(&req.id, "bad_params", "missing code", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let Some(program_id) = req.params.get("programId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing programId", None);
    };
    let modality = match modality_from_param(req) {
        Ok(Some(m)) => m,
        Ok(None) => return err(&req.id, "bad_params", "missing modality", None),
        Err(resp) => return resp,
    };

    match program_exists(conn, req, program_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "program not found", None),
        Err(resp) => return resp,
    }
    match code_taken(conn, req, &code, None) {
        Ok(true) => {
            return err(
                &req.id,
                "duplicate",
                format!("a subject with code {} already exists", code),
                None,
            )
        }
        Ok(false) => {}
        Err(resp) => return resp,
    }

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, code, name, program_id, modality, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&subject_id, &code, &name, program_id, &modality, &now_utc()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }

    ok(&req.id, json!({ "subjectId": subject_id, "code": code }))
}

fn handle_subjects_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let Some(subject_id) = req.params.get("subjectId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing subjectId", None);
    };
    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    if let Some(code) = req.params.get("code").and_then(|v| v.as_str()) {
        if code.trim().is_empty() {
            return err(&req.id, "bad_params", "code must not be empty", None);
        }
        let code = code.trim().to_ascii_uppercase();
        match code_taken(conn, req, &code, Some(subject_id)) {
            Ok(true) => {
                return err(
                    &req.id,
                    "duplicate",
                    format!("a subject with code {} already exists", code),
                    None,
                )
            }
            Ok(false) => {}
            Err(resp) => return resp,
        }
        if let Err(e) = conn.execute(
            "UPDATE subjects SET code = ? WHERE id = ?",
            (&code, subject_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(name) = req.params.get("name").and_then(|v| v.as_str()) {
        if name.trim().is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        if let Err(e) = conn.execute(
            "UPDATE subjects SET name = ? WHERE id = ?",
            (name.trim(), subject_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(program_id) = req.params.get("programId").and_then(|v| v.as_str()) {
        match program_exists(conn, req, program_id) {
            Ok(true) => {}
            Ok(false) => return err(&req.id, "not_found", "program not found", None),
            Err(resp) => return resp,
        }
        if let Err(e) = conn.execute(
            "UPDATE subjects SET program_id = ? WHERE id = ?",
            (program_id, subject_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }
    if let Some(modality) = match modality_from_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    } {
        if let Err(e) = conn.execute(
            "UPDATE subjects SET modality = ? WHERE id = ?",
            (&modality, subject_id),
        ) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_subjects_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let Some(subject_id) = req.params.get("subjectId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing subjectId", None);
    };
    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "subject not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Scheduled occurrences of the subject go with it.
    if let Err(e) = tx.execute("DELETE FROM slots WHERE subject_id = ?", [subject_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "slots" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM subjects WHERE id = ?", [subject_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "subjects" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.update" => Some(handle_subjects_update(state, req)),
        "subjects.delete" => Some(handle_subjects_delete(state, req)),
        _ => None,
    }
}
