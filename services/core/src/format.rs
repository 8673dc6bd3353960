//! Display helpers. Presentation only: nothing here feeds stored data.

use chrono::{Datelike, Local};

pub const MONTHS: [&str; 12] = [
    "Enero",
    "Febrero",
    "Marzo",
    "Abril",
    "Mayo",
    "Junio",
    "Julio",
    "Agosto",
    "Septiembre",
    "Octubre",
    "Noviembre",
    "Diciembre",
];

/// Top-N labels are cut to this many characters
pub const LABEL_WIDTH: usize = 40;

/// Spanish name of the current month
pub fn current_month() -> &'static str {
    MONTHS[Local::now().month0() as usize]
}

pub fn current_year() -> i32 {
    Local::now().year()
}

/// Compact currency: `$1.2B`, `$3.4M`, `$5.6K`, `$789`
pub fn format_currency(value: f64) -> String {
    if value >= 1e9 {
        format!("${:.1}B", value / 1e9)
    } else if value >= 1e6 {
        format!("${:.1}M", value / 1e6)
    } else if value >= 1e3 {
        format!("${:.1}K", value / 1e3)
    } else {
        format!("${:.0}", value)
    }
}

/// Rounded integer with `,` thousands separators
pub fn format_thousands(value: f64) -> String {
    let rounded = format!("{:.0}", value);
    let (sign, digits) = match rounded.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", rounded.as_str()),
    };

    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }

    if out == "0" {
        out
    } else {
        format!("{}{}", sign, out)
    }
}

/// First `max` characters followed by `...` when the label is longer
pub fn truncate_label(label: &str, max: usize) -> String {
    match label.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &label[..cut]),
        None => label.to_string(),
    }
}
