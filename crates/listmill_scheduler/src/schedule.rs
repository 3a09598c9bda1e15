//! Cron expression handling: normalization, parsing with a safe fallback,
//! and next-fire computation in Europe/Paris.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Europe::Paris;
use chrono_tz::Tz;
use cron::Schedule;
use tracing::warn;

/// Substituted for invalid expressions.
pub const FALLBACK_SCHEDULE: &str = "*/5 * * * *";

/// Repair user-supplied expressions: compressed forms like `*/5****` get
/// their spaces back, and short expressions are padded to five fields.
pub fn normalize_schedule(expr: &str) -> String {
    let expr = expr.trim();
    let mut fields: Vec<String> = if expr.contains(' ') {
        expr.split_whitespace().map(String::from).collect()
    } else {
        split_compressed(expr)
    };
    while fields.len() < 5 {
        fields.push("*".to_string());
    }
    fields.truncate(5);
    fields.join(" ")
}

fn split_compressed(expr: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut chars = expr.chars().peekable();
    while let Some(c) = chars.next() {
        let mut field = String::new();
        field.push(c);
        if c == '*' {
            if chars.peek() == Some(&'/') {
                field.push(chars.next().unwrap());
                while matches!(chars.peek(), Some(d) if d.is_ascii_digit()) {
                    field.push(chars.next().unwrap());
                }
            }
        } else {
            while matches!(chars.peek(), Some(d) if d.is_ascii_digit() || *d == ',' || *d == '-') {
                field.push(chars.next().unwrap());
            }
        }
        fields.push(field);
    }
    fields
}

/// Parse a 5-field expression, substituting the safe default when invalid.
/// Returns the schedule and whether the fallback was used.
pub fn parse_schedule(expr: &str) -> (Schedule, bool) {
    let normalized = normalize_schedule(expr);
    // The cron crate wants a seconds field; pin it to zero.
    match Schedule::from_str(&format!("0 {normalized}")) {
        Ok(schedule) => (schedule, false),
        Err(error) => {
            warn!(
                "Invalid cron expression '{expr}': {error}; substituting '{FALLBACK_SCHEDULE}'"
            );
            let fallback = Schedule::from_str(&format!("0 {FALLBACK_SCHEDULE}"))
                .expect("fallback schedule is valid");
            (fallback, true)
        }
    }
}

/// Next fire time strictly after `after`, evaluated in Europe/Paris.
pub fn next_fire(schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Tz>> {
    schedule.after(&after.with_timezone(&Paris)).next()
}
