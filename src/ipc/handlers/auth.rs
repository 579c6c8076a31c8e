use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{authenticate, now_utc, require_admin};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn user_json(id: &str, email: &str, name: &str, role: &str) -> serde_json::Value {
    json!({ "id": id, "email": email, "name": name, "role": role })
}

fn handle_signup(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let email = match req.params.get("email").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing email", None),
    };
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => return err(&req.id, "bad_params", "missing password", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing name", None),
    };
    let role = match req.params.get("role").and_then(|v| v.as_str()) {
        Some("admin") => "admin",
        Some("teacher") => "teacher",
        Some(other) => {
            return err(
                &req.id,
                "bad_params",
                format!("role must be admin or teacher, got {:?}", other),
                None,
            )
        }
        None => return err(&req.id, "bad_params", "missing role", None),
    };

    let existing: Option<String> = match conn
        .query_row("SELECT id FROM users WHERE email = ?", [&email], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if existing.is_some() {
        return err(
            &req.id,
            "duplicate",
            "a user with this email already exists",
            None,
        );
    }

    // Only one administrator account is allowed.
    if role == "admin" {
        let admin_count: i64 = match conn.query_row(
            "SELECT COUNT(*) FROM users WHERE role = 'admin'",
            [],
            |r| r.get(0),
        ) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if admin_count > 0 {
            return err(
                &req.id,
                "admin_exists",
                "an administrator already exists; only one is allowed",
                None,
            );
        }
    }

    let user_id = Uuid::new_v4().to_string();
    let salt = Uuid::new_v4().to_string();
    let hash = hash_password(&salt, &password);
    let created_at = now_utc();

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "INSERT INTO users(id, email, name, role, password_salt, password_hash, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (&user_id, &email, &name, role, &salt, &hash, &created_at),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "users" })),
        );
    }

    // A teacher account gets a roster record immediately; availability is
    // filled in later through the profile.
    let mut teacher_id: Option<String> = None;
    if role == "teacher" {
        let tid = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO teachers(id, name, email, specialty, available_days, availability_windows, user_id, created_at)
             VALUES(?, ?, ?, '', '[]', '[]', ?, ?)",
            (&tid, &name, &email, &user_id, &created_at),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "teachers" })),
            );
        }
        teacher_id = Some(tid);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "user": user_json(&user_id, &email, &name, role),
            "teacherId": teacher_id,
        }),
    )
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let email = match req.params.get("email").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing email", None),
    };
    let password = match req.params.get("password").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing password", None),
    };

    let row: Option<(String, String, String, String, String)> = match conn
        .query_row(
            "SELECT id, name, role, password_salt, password_hash FROM users WHERE email = ?",
            [&email],
            |r| {
                Ok((
                    r.get(0)?,
                    r.get(1)?,
                    r.get(2)?,
                    r.get(3)?,
                    r.get(4)?,
                ))
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Same response for unknown email and wrong password.
    let Some((user_id, name, role, salt, stored_hash)) = row else {
        return err(&req.id, "unauthorized", "invalid credentials", None);
    };
    if hash_password(&salt, &password) != stored_hash {
        return err(&req.id, "unauthorized", "invalid credentials", None);
    }

    let token = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO sessions(token, user_id, created_at) VALUES(?, ?, ?)",
        (&token, &user_id, &now_utc()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "sessions" })),
        );
    }

    ok(
        &req.id,
        json!({
            "token": token,
            "user": user_json(&user_id, &email, &name, &role),
        }),
    )
}

fn handle_verify(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let user = match authenticate(conn, req) {
        Ok(u) => u,
        Err(resp) => return resp,
    };
    ok(
        &req.id,
        json!({ "user": user_json(&user.id, &user.email, &user.name, &user.role) }),
    )
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(token) = req.params.get("token").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing token", None);
    };
    match conn.execute("DELETE FROM sessions WHERE token = ?", [token]) {
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_cleanup(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    // RFC3339 UTC timestamps compare lexicographically.
    let cutoff = (chrono::Utc::now() - chrono::Duration::days(30)).to_rfc3339();
    match conn.execute("DELETE FROM sessions WHERE created_at < ?", [&cutoff]) {
        Ok(removed) => ok(&req.id, json!({ "removedSessions": removed })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.signup" => Some(handle_signup(state, req)),
        "auth.login" => Some(handle_login(state, req)),
        "auth.verify" => Some(handle_verify(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.cleanup" => Some(handle_cleanup(state, req)),
        _ => None,
    }
}
