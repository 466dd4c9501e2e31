use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_DEPARTMENT: &str = "Computer Science Engineering";
pub const DEFAULT_ACADEMIC_YEAR: &str = "2023-24";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" => Some(AttendanceStatus::Present),
            "absent" => Some(AttendanceStatus::Absent),
            _ => None,
        }
    }

    pub fn is_present(self) -> bool {
        self == AttendanceStatus::Present
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub roll_number: String,
    pub department: String,
    pub section: String,
    pub barcode_id: String,
}

/// Student fields denormalised onto an attendance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRef {
    pub id: String,
    pub name: String,
    pub roll_number: String,
    pub barcode_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub student: StudentRef,
    pub status: AttendanceStatus,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSession {
    pub id: String,
    pub date: NaiveDate,
    pub department: String,
    pub section: String,
    pub subject_code: String,
    pub teacher: String,
    pub records: Vec<AttendanceRecord>,
}

impl AttendanceSession {
    pub fn record_for(&self, student_id: &str) -> Option<&AttendanceRecord> {
        self.records.iter().find(|r| r.student.id == student_id)
    }

    /// A student without a record in this session counts as absent.
    pub fn status_of(&self, student_id: &str) -> AttendanceStatus {
        self.record_for(student_id)
            .map(|r| r.status)
            .unwrap_or(AttendanceStatus::Absent)
    }

    pub fn present_count(&self) -> usize {
        self.records.iter().filter(|r| r.status.is_present()).count()
    }
}

/// Inclusive window of whole calendar days: `[start 00:00:00.000, end 23:59:59.999]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DayRange {
    pub fn single(day: NaiveDate) -> Self {
        Self {
            start: day,
            end: day,
        }
    }

    pub fn between(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        if start > end {
            return None;
        }
        Some(Self { start, end })
    }

    pub fn start_of_day(&self) -> NaiveDateTime {
        self.start.and_time(NaiveTime::MIN)
    }

    pub fn end_of_day(&self) -> NaiveDateTime {
        match self.end.succ_opt() {
            Some(next) => next.and_time(NaiveTime::MIN) - TimeDelta::milliseconds(1),
            None => NaiveDateTime::MAX,
        }
    }
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 instant; instants are truncated to their UTC day.
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    let t = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Some(d);
    }
    DateTime::parse_from_rfc3339(t)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).date_naive())
}

/// Section labels and subject codes are stored trimmed and upper-cased.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}
