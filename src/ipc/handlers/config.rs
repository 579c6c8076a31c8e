use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{authenticate, load_rooms, load_slots, load_teacher_availability, require_admin};
use crate::ipc::types::{AppState, Request};
use crate::rules::{self, ClockTime, InstitutionRules};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, PartialEq)]
enum ConfigSection {
    Schedule,
    Validation,
    Institution,
    Interface,
}

const ALL_SECTIONS: [ConfigSection; 4] = [
    ConfigSection::Schedule,
    ConfigSection::Validation,
    ConfigSection::Institution,
    ConfigSection::Interface,
];

impl ConfigSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "schedule" => Some(Self::Schedule),
            "validation" => Some(Self::Validation),
            "institution" => Some(Self::Institution),
            "interface" => Some(Self::Interface),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Schedule => "config.schedule",
            Self::Validation => "config.validation",
            Self::Institution => "config.institution",
            Self::Interface => "config.interface",
        }
    }

    /// Sections whose values feed the constraint evaluator. Changing one
    /// re-sweeps the existing schedule.
    fn affects_rules(self) -> bool {
        matches!(self, Self::Schedule | Self::Validation)
    }
}

fn default_section(section: ConfigSection) -> Value {
    match section {
        ConfigSection::Schedule => json!({
            "days": ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"],
            "dayStart": "07:00",
            "dayEnd": "21:00",
            "blockMinutes": 60,
            "blockGapMinutes": 0
        }),
        ConfigSection::Validation => json!({
            "maxTeacherHoursPerDay": 8,
            "allowOverlap": false,
            "minRestMinutes": 0,
            "maxRoomCapacity": 40
        }),
        ConfigSection::Institution => json!({
            "name": "",
            "address": "",
            "phone": "",
            "contactEmail": "",
            "coordinator": ""
        }),
        ConfigSection::Interface => json!({
            "itemsPerPage": 12,
            "theme": "light",
            "showTooltips": true
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal config object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool()
        .ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_clock_string(v: &Value, key: &str) -> Result<String, String> {
    let s = parse_string_max(v, key, 8)?;
    let clock: ClockTime = s
        .parse()
        .map_err(|_| format!("{} must be a HH:MM time", key))?;
    Ok(clock.to_string())
}

fn parse_day_list(v: &Value, key: &str) -> Result<Value, String> {
    let arr = v.as_array().ok_or_else(|| format!("{} must be an array", key))?;
    if arr.is_empty() || arr.len() > 7 {
        return Err(format!("{} must list 1..=7 days", key));
    }
    let mut days: Vec<String> = Vec::with_capacity(arr.len());
    for item in arr {
        let day = parse_string_max(item, key, 16)?;
        if day.is_empty() {
            return Err(format!("{} must not contain empty names", key));
        }
        if days.contains(&day) {
            return Err(format!("{} lists {} twice", key, day));
        }
        days.push(day);
    }
    Ok(json!(days))
}

fn merge_section_patch(
    section: ConfigSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            ConfigSection::Schedule => match k.as_str() {
                "days" => {
                    obj.insert(k.clone(), parse_day_list(v, k)?);
                }
                "dayStart" | "dayEnd" => {
                    obj.insert(k.clone(), Value::String(parse_clock_string(v, k)?));
                }
                "blockMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 15, 240)?));
                }
                "blockGapMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 30)?));
                }
                _ => return Err(format!("unknown schedule field: {}", k)),
            },
            ConfigSection::Validation => match k.as_str() {
                "maxTeacherHoursPerDay" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 12)?));
                }
                "allowOverlap" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                "minRestMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 120)?));
                }
                "maxRoomCapacity" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 10, 100)?));
                }
                _ => return Err(format!("unknown validation field: {}", k)),
            },
            ConfigSection::Institution => match k.as_str() {
                "name" | "coordinator" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
                }
                "address" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 200)?));
                }
                "phone" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 32)?));
                }
                "contactEmail" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 200)?));
                }
                _ => return Err(format!("unknown institution field: {}", k)),
            },
            ConfigSection::Interface => match k.as_str() {
                "itemsPerPage" => {
                    let n = parse_i64_range(v, k, 6, 18)?;
                    if n != 6 && n != 9 && n != 12 && n != 18 {
                        return Err("itemsPerPage must be one of: 6, 9, 12, 18".into());
                    }
                    obj.insert(k.clone(), Value::from(n));
                }
                "theme" => {
                    let t = parse_string_max(v, k, 8)?.to_ascii_lowercase();
                    if t != "light" && t != "dark" {
                        return Err("theme must be one of: light, dark".into());
                    }
                    obj.insert(k.clone(), Value::String(t));
                }
                "showTooltips" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown interface field: {}", k)),
            },
        }
    }

    // Cross-field: the institution must open before it closes.
    if section == ConfigSection::Schedule {
        let start = obj
            .get("dayStart")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<ClockTime>().ok());
        let end = obj
            .get("dayEnd")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<ClockTime>().ok());
        match (start, end) {
            (Some(s), Some(e)) if s < e => {}
            _ => return Err("dayStart must come before dayEnd".into()),
        }
    }

    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: ConfigSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block the UI.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

/// The evaluator's rule set, assembled from the schedule and validation
/// sections. Used by every handler that validates against the institution.
pub fn load_institution_rules(conn: &rusqlite::Connection) -> anyhow::Result<InstitutionRules> {
    let schedule = load_section(conn, ConfigSection::Schedule)?;
    let validation = load_section(conn, ConfigSection::Validation)?;

    let clock = |section: &Value, key: &str| -> anyhow::Result<ClockTime> {
        let raw = section
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("config field {} missing", key))?;
        raw.parse()
            .map_err(|_| anyhow::anyhow!("config field {} is not a HH:MM time", key))
    };
    let int = |section: &Value, key: &str| -> anyhow::Result<i64> {
        section
            .get(key)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| anyhow::anyhow!("config field {} missing", key))
    };

    Ok(InstitutionRules {
        day_start: clock(&schedule, "dayStart")?,
        day_end: clock(&schedule, "dayEnd")?,
        max_teacher_hours_per_day: int(&validation, "maxTeacherHoursPerDay")? as f64,
        min_rest_minutes: int(&validation, "minRestMinutes")?,
        allow_overlap: validation
            .get("allowOverlap")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        max_room_capacity: int(&validation, "maxRoomCapacity")?,
    })
}

pub fn schedule_days(conn: &rusqlite::Connection) -> anyhow::Result<Vec<String>> {
    let schedule = load_section(conn, ConfigSection::Schedule)?;
    let days = schedule
        .get("days")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|d| d.as_str().map(|s| s.to_string()))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    Ok(days)
}

// Best-effort: the save has already happened; a failed sweep reports null
// rather than failing the update.
fn sweep_summary(conn: &rusqlite::Connection) -> Value {
    let outcome = (|| -> anyhow::Result<Value> {
        let slots = load_slots(conn)?;
        let teachers = load_teacher_availability(conn)?;
        let rooms = load_rooms(conn)?;
        let rules = load_institution_rules(conn)?;
        Ok(rules::sweep(&slots, &teachers, &rooms, &rules).summary_json())
    })();
    outcome.unwrap_or(Value::Null)
}

fn handle_config_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = authenticate(conn, req) {
        return resp;
    }

    let schedule = match load_section(conn, ConfigSection::Schedule) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let validation = match load_section(conn, ConfigSection::Validation) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let institution = match load_section(conn, ConfigSection::Institution) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let interface = match load_section(conn, ConfigSection::Interface) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "schedule": schedule,
            "validation": validation,
            "institution": institution,
            "interface": interface
        }),
    )
}

fn handle_config_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = ConfigSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    // Rule changes invalidate slots that were fine under the old rules; the
    // operator learns the damage immediately.
    let sweep = if section.affects_rules() {
        sweep_summary(conn)
    } else {
        Value::Null
    };

    ok(&req.id, json!({ "ok": true, "sweep": sweep }))
}

fn handle_config_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if let Err(resp) = require_admin(conn, req) {
        return resp;
    }

    let sections: Vec<ConfigSection> = match req.params.get("section").and_then(|v| v.as_str()) {
        Some(raw) => match ConfigSection::parse(raw) {
            Some(s) => vec![s],
            None => return err(&req.id, "bad_params", "unknown section", None),
        },
        None => ALL_SECTIONS.to_vec(),
    };

    let mut rules_changed = false;
    for section in &sections {
        if let Err(e) = db::settings_delete(conn, section.key()) {
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
        rules_changed = rules_changed || section.affects_rules();
    }

    let sweep = if rules_changed {
        sweep_summary(conn)
    } else {
        Value::Null
    };

    ok(&req.id, json!({ "ok": true, "sweep": sweep }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "config.get" => Some(handle_config_get(state, req)),
        "config.update" => Some(handle_config_update(state, req)),
        "config.reset" => Some(handle_config_reset(state, req)),
        _ => None,
    }
}
