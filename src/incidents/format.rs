use chrono::{DateTime, Utc};

/// US-dollar amount with thousands separators and no cents, e.g. `$12,500`.
pub fn format_currency(value: f64) -> String {
    if !value.is_finite() {
        return "$0".to_string();
    }
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0.0 {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}

pub fn format_downtime(days: f64) -> String {
    if days < 1.0 / 24.0 {
        let minutes = (days * 24.0 * 60.0).round();
        format!("{minutes:.0} minutes")
    } else if days < 1.0 {
        let hours = (days * 24.0).round();
        format!("{hours:.0} hours")
    } else {
        format!("{days:.1} days")
    }
}

/// `Jan 15, 2023`
pub fn format_date(value: &DateTime<Utc>) -> String {
    value.format("%b %-d, %Y").to_string()
}
