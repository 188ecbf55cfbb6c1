//! eventguard CLI - Security monitoring over the audit log
//!
//! Reads a JSON-lines audit log, prints headline statistics, evaluates the
//! threat detection rules and routes any alerts to the security log
//! channels.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

mod error;
mod output;

use error::{CliError, Result};
use eventguard::audit::{AuditTrail, JsonlAuditStore};
use eventguard::detection::{builtin_rules, SecurityAlert, ThreatDetector};
use eventguard::observability::{self, ObservabilityConfig};
use eventguard::{SecurityConfig, SecurityStats};

/// eventguard - Security monitoring for the event manager
#[derive(Parser)]
#[command(name = "eventguard")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the JSON-lines audit log
    #[arg(
        short,
        long,
        env = "EVENTGUARD_AUDIT_LOG",
        default_value = "storage/audit.jsonl",
        global = true
    )]
    audit_log: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor security events and raise alerts
    Monitor {
        /// Show security statistics only
        #[arg(long)]
        stats: bool,

        /// Check for security alerts only
        #[arg(long)]
        alerts: bool,

        /// Statistics look-back in hours
        #[arg(long, default_value_t = 24)]
        hours: u64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Monitor {
            stats,
            alerts,
            hours,
            json,
        } => cmd_monitor(&cli.audit_log, MonitorMode::from_flags(stats, alerts), hours, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Command Implementations
// =============================================================================

/// Which sections `monitor` runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorMode {
    Stats,
    Alerts,
    Both,
}

impl MonitorMode {
    /// `--stats` wins over `--alerts`; neither means both
    fn from_flags(stats: bool, alerts: bool) -> Self {
        match (stats, alerts) {
            (true, _) => Self::Stats,
            (false, true) => Self::Alerts,
            (false, false) => Self::Both,
        }
    }

    fn stats(self) -> bool {
        matches!(self, Self::Stats | Self::Both)
    }

    fn alerts(self) -> bool {
        matches!(self, Self::Alerts | Self::Both)
    }
}

#[derive(Serialize)]
struct MonitorReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    stats: Option<SecurityStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    alerts: Option<Vec<SecurityAlert>>,
}

fn cmd_monitor(audit_log: &Path, mode: MonitorMode, hours: u64, json: bool) -> Result<()> {
    observability::init(&ObservabilityConfig::from_env())?;

    let config = SecurityConfig::from_env();
    let trail = AuditTrail::new(Arc::new(JsonlAuditStore::new(audit_log)));
    let detector = ThreatDetector::with_rules(trail.clone(), builtin_rules(config.alert_window));

    let stats = if mode.stats() {
        Some(
            trail
                .security_stats(hours)
                .map_err(|e| CliError::audit_log(audit_log, e))?,
        )
    } else {
        None
    };

    let alerts = mode.alerts().then(|| detector.check_security_alerts());

    if json {
        output::print_json(&MonitorReport {
            stats: stats.clone(),
            alerts: alerts.clone(),
        })?;
    } else {
        if let Some(stats) = &stats {
            output::print_stats(stats, hours);
        }
        if let Some(alerts) = &alerts {
            output::header("Security Alerts");
            println!();
            if alerts.is_empty() {
                output::success("No security alerts detected.");
            }
            for alert in alerts {
                output::print_alert(alert);
            }
        }
    }

    if let Some(alerts) = &alerts {
        if !alerts.is_empty() {
            detector.send_alerts(alerts);
            if !json {
                output::info(&format!("{} alert(s) sent to the security log", alerts.len()));
            }
        }
    }

    Ok(())
}
