use serde_json::json;
use std::fmt;
use std::str::FromStr;

/// Wall-clock time as minutes since midnight.
///
/// Time strings are parsed exactly once, where a request enters the system;
/// everything past that point compares and subtracts plain integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn from_minutes(minutes: i64) -> Option<Self> {
        if (0..24 * 60).contains(&minutes) {
            Some(ClockTime(minutes as u16))
        } else {
            None
        }
    }

    pub fn minutes(self) -> i64 {
        i64::from(self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeParseError {
    pub input: String,
}

impl fmt::Display for TimeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a valid HH:MM time: {:?}", self.input)
    }
}

impl std::error::Error for TimeParseError {}

impl FromStr for ClockTime {
    type Err = TimeParseError;

    // Accepts "HH:MM"; a trailing ":SS" from older stored values is dropped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TimeParseError {
            input: s.to_string(),
        };
        let mut parts = s.split(':');
        let hour: u16 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(bad)?;
        let minute: u16 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(bad)?;
        if hour > 23 || minute > 59 {
            return Err(bad());
        }
        Ok(ClockTime(hour * 60 + minute))
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// Half-open wall-clock interval, `start` strictly before `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    start: ClockTime,
    end: ClockTime,
}

impl TimeRange {
    pub fn new(start: ClockTime, end: ClockTime) -> Option<Self> {
        if start < end {
            Some(TimeRange { start, end })
        } else {
            None
        }
    }

    pub fn from_minutes(start: i64, end: i64) -> Option<Self> {
        TimeRange::new(ClockTime::from_minutes(start)?, ClockTime::from_minutes(end)?)
    }

    pub fn start(&self) -> ClockTime {
        self.start
    }

    pub fn end(&self) -> ClockTime {
        self.end
    }

    pub fn duration_minutes(&self) -> i64 {
        self.end.minutes() - self.start.minutes()
    }

    pub fn intersects(&self, other: &TimeRange) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Total containment; a partial overlap with `other` does not count.
    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub id: String,
    pub teacher_id: String,
    pub subject_id: String,
    pub room_id: String,
    pub day: String,
    pub range: TimeRange,
}

/// A proposed slot. `id` is set when an existing slot is being edited, so the
/// stored version of itself never counts as a conflict.
#[derive(Debug, Clone)]
pub struct SlotCandidate {
    pub id: Option<String>,
    pub teacher_id: String,
    pub subject_id: String,
    pub room_id: String,
    pub day: String,
    pub range: TimeRange,
}

impl SlotCandidate {
    pub fn from_slot(slot: &Slot) -> Self {
        SlotCandidate {
            id: Some(slot.id.clone()),
            teacher_id: slot.teacher_id.clone(),
            subject_id: slot.subject_id.clone(),
            room_id: slot.room_id.clone(),
            day: slot.day.clone(),
            range: slot.range,
        }
    }

    fn is_other(&self, slot: &Slot) -> bool {
        self.id.as_deref() != Some(slot.id.as_str())
    }
}

/// Empty `available_days` / `availability_windows` mean unrestricted.
#[derive(Debug, Clone)]
pub struct TeacherAvailability {
    pub id: String,
    pub name: String,
    pub available_days: Vec<String>,
    pub availability_windows: Vec<TimeRange>,
}

#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub id: String,
    pub name: String,
    pub capacity: i64,
}

#[derive(Debug, Clone)]
pub struct InstitutionRules {
    pub day_start: ClockTime,
    pub day_end: ClockTime,
    pub max_teacher_hours_per_day: f64,
    pub min_rest_minutes: i64,
    pub allow_overlap: bool,
    pub max_room_capacity: i64,
}

/// Errors block the write; warnings are advisory and the operator may confirm
/// past them. Produced fresh per call, never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "errors": self.errors,
            "warnings": self.warnings,
            "isValid": self.is_valid(),
        })
    }
}

fn teacher_label(teachers: &[TeacherAvailability], id: &str) -> String {
    teachers
        .iter()
        .find(|t| t.id == id)
        .map(|t| t.name.clone())
        .unwrap_or_else(|| id.to_string())
}

fn room_label(rooms: &[RoomInfo], id: &str) -> String {
    rooms
        .iter()
        .find(|r| r.id == id)
        .map(|r| r.name.clone())
        .unwrap_or_else(|| id.to_string())
}

/// Checks one candidate slot against the institution rules and the current
/// snapshot. Every applicable check runs and every message is collected, so
/// the operator sees all problems in one pass rather than one per attempt.
///
/// Check order: operating hours, daily teaching load, minimum rest,
/// double-booking, availability by day, availability by window. An unknown
/// `teacher_id` skips the availability checks; referential existence is
/// enforced by the write layer before evaluation.
pub fn evaluate(
    candidate: &SlotCandidate,
    all_slots: &[Slot],
    teachers: &[TeacherAvailability],
    rooms: &[RoomInfo],
    rules: &InstitutionRules,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    // Operating hours. Ending exactly at closing time is allowed.
    if candidate.range.start() < rules.day_start {
        report.errors.push(format!(
            "Start time {} is before the institution opening time {}.",
            candidate.range.start(),
            rules.day_start
        ));
    }
    if candidate.range.end() > rules.day_end {
        report.errors.push(format!(
            "End time {} is after the institution closing time {}.",
            candidate.range.end(),
            rules.day_end
        ));
    }

    let same_teacher_day: Vec<&Slot> = all_slots
        .iter()
        .filter(|s| {
            candidate.is_other(s)
                && s.teacher_id == candidate.teacher_id
                && s.day == candidate.day
        })
        .collect();

    // Daily load, counting the candidate itself.
    let total_minutes: i64 = candidate.range.duration_minutes()
        + same_teacher_day
            .iter()
            .map(|s| s.range.duration_minutes())
            .sum::<i64>();
    let total_hours = total_minutes as f64 / 60.0;
    if total_hours > rules.max_teacher_hours_per_day {
        report.errors.push(format!(
            "The teacher would have {:.1} hours scheduled on {}, over the daily limit of {} hours.",
            total_hours, candidate.day, rules.max_teacher_hours_per_day
        ));
    }

    // Rest gaps. Overlapping pairs are the double-booking check's business.
    if rules.min_rest_minutes > 0 {
        for s in &same_teacher_day {
            let gap = if s.range.end() <= candidate.range.start() {
                candidate.range.start().minutes() - s.range.end().minutes()
            } else if candidate.range.end() <= s.range.start() {
                s.range.start().minutes() - candidate.range.end().minutes()
            } else {
                0
            };
            if gap > 0 && gap < rules.min_rest_minutes {
                report.warnings.push(format!(
                    "Only {} minutes of rest next to the {}-{} class; the configured minimum is {} minutes.",
                    gap,
                    s.range.start(),
                    s.range.end(),
                    rules.min_rest_minutes
                ));
            }
        }
    }

    // Double-booking. Every conflicting slot reports, and a slot clashing on
    // more than one dimension produces more than one message.
    if !rules.allow_overlap {
        for s in all_slots.iter().filter(|s| {
            candidate.is_other(s) && s.day == candidate.day && candidate.range.intersects(&s.range)
        }) {
            if s.teacher_id == candidate.teacher_id {
                report.errors.push(format!(
                    "Teacher {} is already booked from {} to {} on {}.",
                    teacher_label(teachers, &s.teacher_id),
                    s.range.start(),
                    s.range.end(),
                    s.day
                ));
            }
            if s.room_id == candidate.room_id {
                report.errors.push(format!(
                    "Room {} is already occupied from {} to {}.",
                    room_label(rooms, &s.room_id),
                    s.range.start(),
                    s.range.end()
                ));
            }
            if s.subject_id == candidate.subject_id {
                report.warnings.push(format!(
                    "The subject is already scheduled from {} to {}.",
                    s.range.start(),
                    s.range.end()
                ));
            }
        }
    }

    if let Some(teacher) = teachers.iter().find(|t| t.id == candidate.teacher_id) {
        if !teacher.available_days.is_empty()
            && !teacher.available_days.iter().any(|d| d == &candidate.day)
        {
            report.errors.push(format!(
                "Teacher {} is not available on {}. Available days: {}.",
                teacher.name,
                candidate.day,
                teacher.available_days.join(", ")
            ));
        }

        if !teacher.availability_windows.is_empty()
            && !teacher
                .availability_windows
                .iter()
                .any(|w| w.contains(&candidate.range))
        {
            let windows = teacher
                .availability_windows
                .iter()
                .map(|w| format!("{}-{}", w.start(), w.end()))
                .collect::<Vec<_>>()
                .join(", ");
            report.errors.push(format!(
                "The class falls outside the availability of teacher {}. Declared windows: {}.",
                teacher.name, windows
            ));
        }
    }

    report
}

/// Room-write-time counterpart of the slot checks: a capacity above the
/// configured ceiling is rejected before the room is saved.
pub fn check_room_capacity(capacity: i64, rules: &InstitutionRules) -> Option<String> {
    if capacity > rules.max_room_capacity {
        Some(format!(
            "Room capacity {} exceeds the configured maximum of {} students per room.",
            capacity, rules.max_room_capacity
        ))
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct SweepFinding {
    pub slot: Slot,
    pub report: ValidationReport,
}

#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    pub total: usize,
    pub findings: Vec<SweepFinding>,
    pub slots_with_errors: usize,
    pub slots_with_warnings_only: usize,
}

impl SweepOutcome {
    pub fn summary_json(&self) -> serde_json::Value {
        json!({
            "total": self.total,
            "slotsWithErrors": self.slots_with_errors,
            "slotsWithWarningsOnly": self.slots_with_warnings_only,
        })
    }
}

/// Re-validates every persisted slot as its own candidate (self-excluded),
/// collecting the non-clean reports. Run after a rules change to surface
/// slots the new rules no longer admit.
pub fn sweep(
    all_slots: &[Slot],
    teachers: &[TeacherAvailability],
    rooms: &[RoomInfo],
    rules: &InstitutionRules,
) -> SweepOutcome {
    let mut out = SweepOutcome {
        total: all_slots.len(),
        ..SweepOutcome::default()
    };

    for slot in all_slots {
        let candidate = SlotCandidate::from_slot(slot);
        let report = evaluate(&candidate, all_slots, teachers, rooms, rules);
        if !report.is_valid() {
            out.slots_with_errors += 1;
        } else if !report.warnings.is_empty() {
            out.slots_with_warnings_only += 1;
        }
        if !report.is_clean() {
            out.findings.push(SweepFinding {
                slot: slot.clone(),
                report,
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> ClockTime {
        s.parse().expect("time")
    }

    fn range(start: &str, end: &str) -> TimeRange {
        TimeRange::new(t(start), t(end)).expect("range")
    }

    fn rules() -> InstitutionRules {
        InstitutionRules {
            day_start: t("07:00"),
            day_end: t("21:00"),
            max_teacher_hours_per_day: 8.0,
            min_rest_minutes: 0,
            allow_overlap: false,
            max_room_capacity: 40,
        }
    }

    fn slot(id: &str, teacher: &str, subject: &str, room: &str, day: &str, s: &str, e: &str) -> Slot {
        Slot {
            id: id.to_string(),
            teacher_id: teacher.to_string(),
            subject_id: subject.to_string(),
            room_id: room.to_string(),
            day: day.to_string(),
            range: range(s, e),
        }
    }

    fn cand(teacher: &str, subject: &str, room: &str, day: &str, s: &str, e: &str) -> SlotCandidate {
        SlotCandidate {
            id: None,
            teacher_id: teacher.to_string(),
            subject_id: subject.to_string(),
            room_id: room.to_string(),
            day: day.to_string(),
            range: range(s, e),
        }
    }

    fn teacher(id: &str, name: &str, days: &[&str], windows: &[(&str, &str)]) -> TeacherAvailability {
        TeacherAvailability {
            id: id.to_string(),
            name: name.to_string(),
            available_days: days.iter().map(|d| d.to_string()).collect(),
            availability_windows: windows.iter().map(|(s, e)| range(s, e)).collect(),
        }
    }

    #[test]
    fn clock_time_parses_and_formats() {
        assert_eq!(t("00:00").minutes(), 0);
        assert_eq!(t("07:00").minutes(), 420);
        assert_eq!(t("23:59").minutes(), 23 * 60 + 59);
        assert_eq!(t("09:05").to_string(), "09:05");
        // Seconds from older stored values are dropped.
        assert_eq!(t("10:30:00"), t("10:30"));

        assert!("24:00".parse::<ClockTime>().is_err());
        assert!("10:60".parse::<ClockTime>().is_err());
        assert!("7".parse::<ClockTime>().is_err());
        assert!("aa:bb".parse::<ClockTime>().is_err());
        assert!("".parse::<ClockTime>().is_err());
    }

    #[test]
    fn time_range_requires_strict_order() {
        assert!(TimeRange::new(t("09:00"), t("10:00")).is_some());
        assert!(TimeRange::new(t("10:00"), t("10:00")).is_none());
        assert!(TimeRange::new(t("10:00"), t("09:00")).is_none());
        assert_eq!(range("09:00", "10:30").duration_minutes(), 90);
    }

    #[test]
    fn clean_slot_inside_hours_is_valid() {
        let report = evaluate(
            &cand("t1", "s1", "r1", "Monday", "07:00", "08:00"),
            &[],
            &[],
            &[],
            &rules(),
        );
        assert!(report.is_valid());
        assert!(report.is_clean());
    }

    #[test]
    fn end_exactly_at_closing_time_is_valid() {
        let report = evaluate(
            &cand("t1", "s1", "r1", "Monday", "20:00", "21:00"),
            &[],
            &[],
            &[],
            &rules(),
        );
        assert!(report.is_valid());
    }

    #[test]
    fn both_bounds_violations_are_collected() {
        let report = evaluate(
            &cand("t1", "s1", "r1", "Monday", "06:00", "22:00"),
            &[],
            &[],
            &[],
            &rules(),
        );
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].contains("06:00"));
        assert!(report.errors[0].contains("07:00"));
        assert!(report.errors[1].contains("22:00"));
        assert!(report.errors[1].contains("21:00"));
    }

    #[test]
    fn daily_load_over_cap_reports_total() {
        // 4h + 3.5h already on Tuesday, candidate adds 1h: 8.5 > 8.
        let existing = vec![
            slot("a", "t1", "s1", "r1", "Tuesday", "08:00", "12:00"),
            slot("b", "t1", "s2", "r2", "Tuesday", "13:00", "16:30"),
        ];
        let report = evaluate(
            &cand("t1", "s3", "r3", "Tuesday", "17:00", "18:00"),
            &existing,
            &[],
            &[],
            &rules(),
        );
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("8.5"), "{:?}", report.errors);
        assert!(report.errors[0].contains("8 hours"), "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn daily_load_exactly_at_cap_passes() {
        let existing = vec![slot("a", "t1", "s1", "r1", "Tuesday", "08:00", "15:00")];
        let report = evaluate(
            &cand("t1", "s2", "r2", "Tuesday", "16:00", "17:00"),
            &existing,
            &[],
            &[],
            &rules(),
        );
        assert!(report.is_valid());
    }

    #[test]
    fn short_rest_gap_warns_but_stays_valid() {
        let mut r = rules();
        r.min_rest_minutes = 30;
        let existing = vec![slot("a", "t1", "s1", "r1", "Monday", "09:00", "10:00")];
        let report = evaluate(
            &cand("t1", "s2", "r2", "Monday", "10:15", "11:15"),
            &existing,
            &[],
            &[],
            &r,
        );
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("15 minutes"), "{:?}", report.warnings);
        assert!(report.warnings[0].contains("30 minutes"), "{:?}", report.warnings);
    }

    #[test]
    fn adjacent_slots_produce_no_rest_warning() {
        let mut r = rules();
        r.min_rest_minutes = 30;
        let existing = vec![slot("a", "t1", "s1", "r1", "Monday", "09:00", "10:00")];
        let report = evaluate(
            &cand("t1", "s2", "r2", "Monday", "10:00", "11:00"),
            &existing,
            &[],
            &[],
            &r,
        );
        assert!(report.is_clean());
    }

    #[test]
    fn rest_warning_emitted_per_offending_slot() {
        let mut r = rules();
        r.min_rest_minutes = 30;
        let existing = vec![
            slot("a", "t1", "s1", "r1", "Monday", "08:00", "09:45"),
            slot("b", "t1", "s2", "r2", "Monday", "11:20", "12:20"),
        ];
        // 15 minutes after slot a, 20 minutes before slot b.
        let report = evaluate(
            &cand("t1", "s3", "r3", "Monday", "10:00", "11:00"),
            &existing,
            &[],
            &[],
            &r,
        );
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn teacher_conflict_reports_without_room_conflict() {
        let existing = vec![slot("a", "t1", "s1", "r1", "Monday", "09:00", "10:00")];
        let report = evaluate(
            &cand("t1", "s2", "r2", "Monday", "09:30", "10:30"),
            &existing,
            &[],
            &[],
            &rules(),
        );
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("already booked"), "{:?}", report.errors);
        assert!(!report.errors[0].contains("occupied"));
    }

    #[test]
    fn room_conflict_reports_room_name() {
        let existing = vec![slot("a", "t1", "s1", "r1", "Monday", "09:00", "10:00")];
        let rooms = vec![RoomInfo {
            id: "r1".to_string(),
            name: "B-101".to_string(),
            capacity: 30,
        }];
        let report = evaluate(
            &cand("t2", "s2", "r1", "Monday", "09:30", "10:30"),
            &existing,
            &[],
            &rooms,
            &rules(),
        );
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("Room B-101"), "{:?}", report.errors);
        assert!(report.errors[0].contains("already occupied"));
    }

    #[test]
    fn subject_overlap_is_warning_only() {
        let existing = vec![slot("a", "t1", "s1", "r1", "Monday", "09:00", "10:00")];
        let report = evaluate(
            &cand("t2", "s1", "r2", "Monday", "09:30", "10:30"),
            &existing,
            &[],
            &[],
            &rules(),
        );
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("already scheduled"), "{:?}", report.warnings);
    }

    #[test]
    fn every_conflicting_slot_reports_its_own_message() {
        let existing = vec![
            slot("a", "t1", "s1", "r1", "Monday", "09:00", "10:00"),
            slot("b", "t1", "s2", "r2", "Monday", "10:00", "11:00"),
        ];
        let report = evaluate(
            &cand("t1", "s3", "r3", "Monday", "09:30", "10:30"),
            &existing,
            &[],
            &[],
            &rules(),
        );
        assert_eq!(report.errors.len(), 2);
    }

    #[test]
    fn one_slot_clashing_on_two_dimensions_reports_twice() {
        let existing = vec![slot("a", "t1", "s1", "r1", "Monday", "09:00", "10:00")];
        let report = evaluate(
            &cand("t1", "s2", "r1", "Monday", "09:30", "10:30"),
            &existing,
            &[],
            &[],
            &rules(),
        );
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.iter().any(|e| e.contains("already booked")));
        assert!(report.errors.iter().any(|e| e.contains("already occupied")));
    }

    #[test]
    fn allow_overlap_disables_double_booking_checks() {
        let mut r = rules();
        r.allow_overlap = true;
        let existing = vec![slot("a", "t1", "s1", "r1", "Monday", "09:00", "10:00")];
        let report = evaluate(
            &cand("t1", "s1", "r1", "Monday", "09:30", "10:30"),
            &existing,
            &[],
            &[],
            &r,
        );
        assert!(report.is_clean());
    }

    #[test]
    fn editing_a_slot_does_not_conflict_with_itself() {
        let existing = vec![slot("a", "t1", "s1", "r1", "Monday", "09:00", "10:00")];
        let candidate = SlotCandidate::from_slot(&existing[0]);
        let report = evaluate(&candidate, &existing, &[], &[], &rules());
        assert!(report.is_clean());
    }

    #[test]
    fn intersecting_same_teacher_pair_errors_from_either_side() {
        let a = slot("a", "t1", "s1", "r1", "Monday", "09:00", "10:00");
        let b = slot("b", "t1", "s2", "r2", "Monday", "09:45", "10:45");
        for (own, other) in [(&a, &b), (&b, &a)] {
            let report = evaluate(
                &SlotCandidate::from_slot(own),
                &[own.clone(), other.clone()],
                &[],
                &[],
                &rules(),
            );
            assert!(
                report.errors.iter().any(|e| e.contains("Teacher")),
                "{:?}",
                report.errors
            );
        }
    }

    #[test]
    fn unavailable_day_lists_actual_days() {
        let teachers = vec![teacher("t1", "Garcia", &["Monday", "Wednesday"], &[])];
        let report = evaluate(
            &cand("t1", "s1", "r1", "Tuesday", "09:00", "10:00"),
            &[],
            &teachers,
            &[],
            &rules(),
        );
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("Monday, Wednesday"), "{:?}", report.errors);
    }

    #[test]
    fn window_partial_containment_is_insufficient() {
        let teachers = vec![teacher("t1", "Garcia", &[], &[("09:00", "12:00")])];
        let report = evaluate(
            &cand("t1", "s1", "r1", "Monday", "11:00", "13:00"),
            &[],
            &teachers,
            &[],
            &rules(),
        );
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("09:00-12:00"), "{:?}", report.errors);
    }

    #[test]
    fn fully_contained_range_satisfies_a_window() {
        let teachers = vec![teacher("t1", "Garcia", &[], &[("09:00", "12:00"), ("14:00", "18:00")])];
        let report = evaluate(
            &cand("t1", "s1", "r1", "Monday", "15:00", "17:00"),
            &[],
            &teachers,
            &[],
            &rules(),
        );
        assert!(report.is_clean());
    }

    #[test]
    fn empty_availability_means_unrestricted() {
        let teachers = vec![teacher("t1", "Garcia", &[], &[])];
        let report = evaluate(
            &cand("t1", "s1", "r1", "Sunday", "07:00", "08:00"),
            &[],
            &teachers,
            &[],
            &rules(),
        );
        assert!(report.is_clean());
    }

    #[test]
    fn evaluation_is_idempotent() {
        let existing = vec![
            slot("a", "t1", "s1", "r1", "Monday", "09:00", "10:00"),
            slot("b", "t2", "s2", "r2", "Monday", "09:00", "12:00"),
        ];
        let candidate = cand("t1", "s1", "r1", "Monday", "06:30", "09:30");
        let first = evaluate(&candidate, &existing, &[], &[], &rules());
        let second = evaluate(&candidate, &existing, &[], &[], &rules());
        assert_eq!(first, second);
        assert!(!first.is_valid());
    }

    #[test]
    fn room_capacity_ceiling() {
        let r = rules();
        let msg = check_room_capacity(45, &r).expect("over the ceiling");
        assert!(msg.contains("45"));
        assert!(msg.contains("40"));
        assert!(check_room_capacity(40, &r).is_none());
        assert!(check_room_capacity(1, &r).is_none());
    }

    #[test]
    fn sweep_counts_errors_and_warning_only_slots() {
        let slots = vec![
            // Starts before opening: one error.
            slot("a", "t1", "s1", "r1", "Monday", "06:00", "07:30"),
            // Same subject, overlapping, different teacher/room: warning each.
            slot("b", "t2", "s9", "r2", "Tuesday", "09:00", "10:00"),
            slot("c", "t3", "s9", "r3", "Tuesday", "09:30", "10:30"),
            // Clean.
            slot("d", "t4", "s4", "r4", "Friday", "10:00", "11:00"),
        ];
        let outcome = sweep(&slots, &[], &[], &rules());
        assert_eq!(outcome.total, 4);
        assert_eq!(outcome.slots_with_errors, 1);
        assert_eq!(outcome.slots_with_warnings_only, 2);
        assert_eq!(outcome.findings.len(), 3);
        assert!(outcome.findings.iter().all(|f| f.slot.id != "d"));
    }

    #[test]
    fn sweep_on_empty_schedule_is_clean() {
        let outcome = sweep(&[], &[], &[], &rules());
        assert_eq!(outcome.total, 0);
        assert!(outcome.findings.is_empty());
    }
}
