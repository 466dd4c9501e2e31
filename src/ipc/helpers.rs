use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::parse_day;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;

/// Runs `f` against the open workspace and wraps the outcome in a response envelope.
pub fn with_db<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => {
            tracing::warn!(method = %req.method, code = error.code, "{}", error.message);
            error.response(&req.id)
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    get_optional_str(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent, null and blank strings all read as `None`.
pub fn get_optional_str(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(HandlerErr::bad_params(format!("{} must be a string", key)));
            };
            let t = s.trim();
            if t.is_empty() {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
    }
}

pub fn get_optional_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn get_optional_bool(params: &serde_json::Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a boolean", key))),
    }
}

pub fn get_optional_day(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<NaiveDate>, HandlerErr> {
    let Some(raw) = get_optional_str(params, key)? else {
        return Ok(None);
    };
    parse_day(&raw)
        .map(Some)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD or an ISO timestamp", key)))
}

pub fn get_int_in_range(
    params: &serde_json::Value,
    key: &str,
    range: std::ops::RangeInclusive<i64>,
    default: Option<i64>,
) -> Result<i64, HandlerErr> {
    let value = match (get_optional_i64(params, key)?, default) {
        (Some(v), _) => v,
        (None, Some(d)) => d,
        (None, None) => return Err(HandlerErr::bad_params(format!("missing {}", key))),
    };
    if !range.contains(&value) {
        return Err(HandlerErr::bad_params(format!(
            "{} must be between {} and {}",
            key,
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: usize,
    pub limit: usize,
}

impl Page {
    pub fn parse(params: &serde_json::Value, default_limit: i64) -> Result<Self, HandlerErr> {
        let page = get_int_in_range(params, "page", 1..=i64::MAX, Some(1))?;
        let limit = get_int_in_range(params, "limit", 1..=500, Some(default_limit))?;
        Ok(Self {
            page: page as usize,
            limit: limit as usize,
        })
    }

    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn meta(&self, total: usize) -> serde_json::Value {
        json!({
            "page": self.page,
            "limit": self.limit,
            "total": total,
            "pages": total.div_ceil(self.limit),
        })
    }
}

pub fn required_status(
    params: &serde_json::Value,
    key: &str,
) -> Result<crate::model::AttendanceStatus, HandlerErr> {
    let raw = get_required_str(params, key)?;
    crate::model::AttendanceStatus::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be 'present' or 'absent'", key)))
}

/// Lower-cased address with a non-empty local part and a dotted domain.
pub fn normalize_email(raw: &str) -> Result<String, HandlerErr> {
    let email = raw.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .rsplit_once('.')
                    .map(|(host, tld)| !host.is_empty() && (2..=3).contains(&tld.len()))
                    .unwrap_or(false)
        }
        None => false,
    };
    if !valid {
        return Err(HandlerErr::bad_params("please enter a valid email"));
    }
    Ok(email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_strings_are_missing() {
        let p = json!({ "a": "  ", "b": null, "c": 3, "d": " x " });
        assert_eq!(get_optional_str(&p, "a").expect("a"), None);
        assert_eq!(get_optional_str(&p, "b").expect("b"), None);
        assert!(get_optional_str(&p, "c").is_err());
        assert_eq!(get_required_str(&p, "d").expect("d"), "x");
        assert_eq!(get_required_str(&p, "a").unwrap_err().message, "missing a");
    }

    #[test]
    fn ranges_and_defaults() {
        let p = json!({ "semester": 9, "credits": 4 });
        assert!(get_int_in_range(&p, "semester", 1..=8, None).is_err());
        assert_eq!(get_int_in_range(&p, "credits", 1..=6, Some(3)).expect("credits"), 4);
        assert_eq!(get_int_in_range(&p, "missing", 1..=6, Some(3)).expect("default"), 3);
        assert!(get_int_in_range(&p, "missing", 1..=6, None).is_err());
    }

    #[test]
    fn paging_math() {
        let page = Page::parse(&json!({ "page": 2, "limit": 2 }), 20).expect("page");
        assert_eq!(page.offset(), 2);
        assert_eq!(page.meta(5)["pages"], json!(3));
        assert!(Page::parse(&json!({ "page": 0 }), 20).is_err());
        let defaults = Page::parse(&json!({}), 20).expect("defaults");
        assert_eq!((defaults.page, defaults.limit), (1, 20));
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email(" Rao@College.EDU ").expect("email"), "rao@college.edu");
        assert!(normalize_email("rao@college").is_err());
        assert!(normalize_email("@college.edu").is_err());
        assert!(normalize_email("a@b@c.edu").is_err());
    }

    #[test]
    fn day_params() {
        let p = json!({ "date": "2024-09-03", "bad": "yesterday" });
        assert_eq!(
            get_optional_day(&p, "date").expect("date"),
            NaiveDate::from_ymd_opt(2024, 9, 3)
        );
        assert!(get_optional_day(&p, "bad").is_err());
        assert_eq!(get_optional_day(&p, "none").expect("none"), None);
    }
}
