// Output formatting for CLI

use multirun_engine::JobSnapshot;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_text(&self) -> bool {
        matches!(self, OutputFormat::Text)
    }

    pub fn print_value<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        match self {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            // Text format is handled by each command
            OutputFormat::Text => {}
        }
        Ok(())
    }

    /// Periodic stats line
    pub fn print_stats(&self, snapshot: &JobSnapshot) -> anyhow::Result<()> {
        match self {
            OutputFormat::Text => println!("{}", snapshot.summary_line()),
            OutputFormat::Json => println!("{}", serde_json::to_string(snapshot)?),
        }
        Ok(())
    }
}

/// Print a simple key-value pair for text output
pub fn print_field(label: &str, value: &str) {
    println!("{:<14} {}", format!("{}:", label), value);
}

/// Final report of a finished run
pub fn print_report(format: OutputFormat, snapshot: &JobSnapshot) -> anyhow::Result<()> {
    if !format.is_text() {
        return format.print_value(snapshot);
    }

    let stats = &snapshot.stats;
    print_field("Job", &format!("{} ({})", snapshot.name, snapshot.id));
    print_field(
        "Completion",
        &snapshot
            .last_completion
            .as_ref()
            .map(|c| format!("{c:?}"))
            .unwrap_or_else(|| "-".to_string()),
    );
    print_field("Tested", &stats.tested.to_string());
    print_field("Hits", &stats.hits.to_string());
    print_field("Custom", &stats.custom.to_string());
    print_field("Fails", &stats.fails.to_string());
    print_field("Bans", &stats.bans.to_string());
    print_field("Retries", &stats.retries.to_string());
    print_field("Errors", &stats.errors.to_string());
    print_field("Evaded", &stats.evaded.to_string());
    print_field("Next skip", &snapshot.skip.to_string());
    if let Some(elapsed) = snapshot.elapsed {
        print_field("Elapsed", &format!("{:.1}s", elapsed.as_secs_f64()));
    }
    if let Some(proxies) = &snapshot.proxies {
        print_field(
            "Proxies",
            &format!(
                "{} total, {} working, {} banned",
                proxies.total, proxies.working, proxies.banned
            ),
        );
    }
    Ok(())
}
