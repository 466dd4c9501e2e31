use crate::model::{AttendanceSession, AttendanceStatus, Student};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Minimum percentage for exam eligibility; also the class overview bucket boundary.
pub const ELIGIBILITY_THRESHOLD: u32 = 75;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregateError {
    #[error("{0} is required")]
    MissingKey(&'static str),
}

/// `round(present / total * 100)`, or 0 when there is nothing to count.
///
/// Integer form of round-half-up so that e.g. 1/8 lands on 13 exactly.
pub fn percentage(present: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((200 * present + total) / (2 * total)) as u32
}

/// Rounded mean of already-rounded percentages, 0 for an empty slice.
pub fn mean_percentage(values: &[u32]) -> u32 {
    if values.is_empty() {
        return 0;
    }
    let sum: u64 = values.iter().map(|v| *v as u64).sum();
    let n = values.len() as u64;
    ((2 * sum + n) / (2 * n)) as u32
}

fn require_key(value: &str, name: &'static str) -> Result<(), AggregateError> {
    if value.trim().is_empty() {
        return Err(AggregateError::MissingKey(name));
    }
    Ok(())
}

/// First occurrence wins; keeps roster order.
fn distinct_roster(roster: &[Student]) -> Vec<&Student> {
    let mut seen: HashSet<&str> = HashSet::new();
    roster
        .iter()
        .filter(|s| seen.insert(s.id.as_str()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLine {
    pub session_id: String,
    pub date: NaiveDate,
    pub teacher: String,
    pub status: AttendanceStatus,
    /// False when the student had no record in the session.
    pub marked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendanceSummary {
    pub student: Student,
    pub total_classes: usize,
    pub classes_attended: usize,
    pub absent_classes: usize,
    pub percentage: u32,
    pub eligible: bool,
    pub sessions: Vec<SessionLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAttendance {
    pub subject_code: String,
    pub total_classes: usize,
    pub present_classes: usize,
    pub absent_classes: usize,
    pub percentage: u32,
    pub eligible: bool,
    pub sessions: Vec<SessionLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub student_id: String,
    pub subjects: Vec<SubjectAttendance>,
    pub total_classes: usize,
    pub total_present: usize,
    pub overall_percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectOverview {
    pub subject_code: String,
    pub total_sessions: usize,
    pub total_students: usize,
    pub average_attendance: u32,
    pub students_above_75: usize,
    pub students_below_75: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatRecord {
    pub session_id: String,
    pub date: NaiveDate,
    pub department: String,
    pub section: String,
    pub subject_code: String,
    pub teacher: String,
    pub student_id: String,
    pub student_name: String,
    pub roll_number: String,
    pub barcode_id: String,
    pub status: AttendanceStatus,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub date: NaiveDate,
    pub department: String,
    pub section: String,
    pub subject_code: String,
    pub teacher: String,
    pub total_students: usize,
    pub present_students: usize,
    pub absent_students: usize,
    pub attendance_percentage: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ClassKey<'a> {
    pub department: &'a str,
    pub section: &'a str,
}

fn session_line(session: &AttendanceSession, student_id: &str) -> SessionLine {
    let record = session.record_for(student_id);
    SessionLine {
        session_id: session.id.clone(),
        date: session.date,
        teacher: session.teacher.clone(),
        status: record.map(|r| r.status).unwrap_or(AttendanceStatus::Absent),
        marked: record.is_some(),
    }
}

fn summarize_student(sessions: &[AttendanceSession], student: &Student) -> StudentAttendanceSummary {
    let mut lines: Vec<SessionLine> = sessions
        .iter()
        .map(|s| session_line(s, &student.id))
        .collect();
    let total = lines.len();
    let attended = lines.iter().filter(|l| l.status.is_present()).count();
    // Newest first; same-day sessions keep input order.
    lines.sort_by(|a, b| b.date.cmp(&a.date));
    let pct = percentage(attended, total);
    StudentAttendanceSummary {
        student: student.clone(),
        total_classes: total,
        classes_attended: attended,
        absent_classes: total - attended,
        percentage: pct,
        eligible: pct >= ELIGIBILITY_THRESHOLD,
        sessions: lines,
    }
}

/// Per-student attendance for one subject, highest percentage first.
///
/// `sessions` must already be narrowed to one department, section and subject;
/// `roster` is every student of that department and section. Each roster
/// student appears exactly once; ties keep roster order.
pub fn subject_wise_attendance(
    sessions: &[AttendanceSession],
    roster: &[Student],
    subject_code: &str,
) -> Result<Vec<StudentAttendanceSummary>, AggregateError> {
    require_key(subject_code, "subjectCode")?;
    let mut rows: Vec<StudentAttendanceSummary> = distinct_roster(roster)
        .into_iter()
        .map(|student| summarize_student(sessions, student))
        .collect();
    rows.sort_by(|a, b| b.percentage.cmp(&a.percentage));
    Ok(rows)
}

/// Rounded mean of the student percentages of a subject-wise report.
pub fn class_average(rows: &[StudentAttendanceSummary]) -> u32 {
    let pcts: Vec<u32> = rows.iter().map(|r| r.percentage).collect();
    mean_percentage(&pcts)
}

/// One student's attendance across every subject, subjects ordered by code.
pub fn student_wise_attendance(
    sessions: &[AttendanceSession],
    student_id: &str,
) -> Result<StudentProfile, AggregateError> {
    require_key(student_id, "studentId")?;

    let mut by_subject: BTreeMap<&str, Vec<SessionLine>> = BTreeMap::new();
    for session in sessions {
        by_subject
            .entry(session.subject_code.as_str())
            .or_default()
            .push(session_line(session, student_id));
    }

    let subjects: Vec<SubjectAttendance> = by_subject
        .into_iter()
        .map(|(code, lines)| {
            let total = lines.len();
            let present = lines.iter().filter(|l| l.status.is_present()).count();
            let pct = percentage(present, total);
            SubjectAttendance {
                subject_code: code.to_string(),
                total_classes: total,
                present_classes: present,
                absent_classes: total - present,
                percentage: pct,
                eligible: pct >= ELIGIBILITY_THRESHOLD,
                sessions: lines,
            }
        })
        .collect();

    let total_classes: usize = subjects.iter().map(|s| s.total_classes).sum();
    let total_present: usize = subjects.iter().map(|s| s.present_classes).sum();
    Ok(StudentProfile {
        student_id: student_id.to_string(),
        overall_percentage: percentage(total_present, total_classes),
        total_classes,
        total_present,
        subjects,
    })
}

/// Per-subject statistics for a whole department+section.
///
/// Subjects come from the sessions plus `known_subjects` (course codes), so a
/// subject nobody has taken attendance for yet still reports zeros. Sessions
/// whose department or section differ (exact match) are ignored.
pub fn class_overview(
    sessions: &[AttendanceSession],
    roster: &[Student],
    class: ClassKey<'_>,
    known_subjects: &[String],
) -> Result<Vec<SubjectOverview>, AggregateError> {
    require_key(class.department, "department")?;
    require_key(class.section, "section")?;

    let mut by_subject: BTreeMap<&str, Vec<&AttendanceSession>> = BTreeMap::new();
    for code in known_subjects {
        let code = code.trim();
        if !code.is_empty() {
            by_subject.entry(code).or_default();
        }
    }
    for session in sessions {
        if session.department != class.department || session.section != class.section {
            continue;
        }
        by_subject
            .entry(session.subject_code.as_str())
            .or_default()
            .push(session);
    }

    let students = distinct_roster(roster);
    let overview = by_subject
        .into_iter()
        .map(|(code, group)| {
            let pcts: Vec<u32> = students
                .iter()
                .map(|student| {
                    let present = group
                        .iter()
                        .filter(|s| s.status_of(&student.id).is_present())
                        .count();
                    percentage(present, group.len())
                })
                .collect();
            let above = pcts.iter().filter(|p| **p >= ELIGIBILITY_THRESHOLD).count();
            SubjectOverview {
                subject_code: code.to_string(),
                total_sessions: group.len(),
                total_students: students.len(),
                average_attendance: mean_percentage(&pcts),
                students_above_75: above,
                students_below_75: pcts.len() - above,
            }
        })
        .collect();
    Ok(overview)
}

/// One row per (session, record), session order then record order.
pub fn flatten_session_records(sessions: &[AttendanceSession]) -> Vec<FlatRecord> {
    sessions
        .iter()
        .flat_map(|session| {
            session.records.iter().map(move |r| FlatRecord {
                session_id: session.id.clone(),
                date: session.date,
                department: session.department.clone(),
                section: session.section.clone(),
                subject_code: session.subject_code.clone(),
                teacher: session.teacher.clone(),
                student_id: r.student.id.clone(),
                student_name: r.student.name.clone(),
                roll_number: r.student.roll_number.clone(),
                barcode_id: r.student.barcode_id.clone(),
                status: r.status,
                timestamp: r.timestamp,
            })
        })
        .collect()
}

/// Headcount of a single session, measured against its own record list.
pub fn session_summary(session: &AttendanceSession) -> SessionSummary {
    let total = session.records.len();
    let present = session.present_count();
    SessionSummary {
        session_id: session.id.clone(),
        date: session.date,
        department: session.department.clone(),
        section: session.section.clone(),
        subject_code: session.subject_code.clone(),
        teacher: session.teacher.clone(),
        total_students: total,
        present_students: present,
        absent_students: total - present,
        attendance_percentage: percentage(present, total),
    }
}
