//! Output formatting and display utilities
//!
//! Provides colored, formatted output for the CLI

use colored::Colorize;
use serde_json::Value;

use eventguard::{AlertSeverity, SecurityAlert, SecurityStats};

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow().bold(), msg);
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}

/// Print a header
pub fn header(msg: &str) {
    println!("\n{}", msg.bold().underline());
}

/// Rows of the statistics table
pub fn stats_rows(stats: &SecurityStats) -> Vec<(&'static str, u64)> {
    vec![
        ("Failed Logins", stats.failed_logins),
        ("Successful Logins", stats.successful_logins),
        ("Access Denied", stats.access_denied),
        ("Password Resets", stats.password_resets),
        ("MFA Enabled", stats.mfa_enabled),
    ]
}

/// Print the headline statistics table
pub fn print_stats(stats: &SecurityStats, hours: u64) {
    header(&format!("Security Statistics (Last {} Hours)", hours));
    println!();

    let rows: Vec<Vec<String>> = stats_rows(stats)
        .into_iter()
        .map(|(metric, count)| vec![metric.to_string(), count.to_string()])
        .collect();
    print_table(&["Metric".to_string(), "Count".to_string()], &rows);
}

/// Print one alert and its evidence table
pub fn print_alert(alert: &SecurityAlert) {
    let line = format!("[{}] {}", alert.severity, alert.message);
    match alert.severity {
        AlertSeverity::High => println!("{} {}", "⚠".red().bold(), line.red().bold()),
        AlertSeverity::Medium | AlertSeverity::Low => warning(&line),
    }

    let evidence = match serde_json::to_value(&alert.evidence) {
        Ok(Value::Array(rows)) => rows,
        _ => return,
    };
    let Some(Value::Object(first)) = evidence.first() else {
        return;
    };

    let headers: Vec<String> = first.keys().cloned().collect();
    let rows: Vec<Vec<String>> = evidence
        .iter()
        .map(|row| headers.iter().map(|h| cell(row.get(h))).collect())
        .collect();
    print_table(&headers, &rows);
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Render an aligned table
pub fn render_table(headers: &[String], rows: &[Vec<String>]) -> Vec<String> {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, value) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(value.chars().count());
            }
        }
    }

    let separator = format!(
        "+{}+",
        widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+")
    );
    let line = |cells: &[String]| {
        let padded: Vec<String> = widths
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let value = cells.get(i).map(String::as_str).unwrap_or("");
                format!(" {:<width$} ", value, width = w)
            })
            .collect();
        format!("|{}|", padded.join("|"))
    };

    let mut lines = vec![separator.clone(), line(headers), separator.clone()];
    lines.extend(rows.iter().map(|row| line(row)));
    lines.push(separator);
    lines
}

/// Print an aligned table
pub fn print_table(headers: &[String], rows: &[Vec<String>]) {
    let lines = render_table(headers, rows);
    for (index, line) in lines.iter().enumerate() {
        if index == 1 {
            println!("{}", line.bold());
        } else {
            println!("{}", line);
        }
    }
}

/// Print a JSON report
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), serde_json::Error> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}
