//! Terminal output formatting.

use colored::{ColoredString, Colorize};
use docgraph_core::{HistoryEntry, SyncKind, SyncSettings, SyncStatus};

const MAX_ROW_ERRORS: usize = 5;

fn status_colored(status: SyncStatus) -> ColoredString {
    match status {
        SyncStatus::Completed => "completed".green(),
        SyncStatus::Error => "error".red(),
        SyncStatus::Cancelled => "cancelled".yellow(),
        SyncStatus::Processing => "processing".cyan(),
        SyncStatus::Queued => "queued".dimmed(),
    }
}

fn kind_label(kind: SyncKind) -> &'static str {
    match kind {
        SyncKind::NodeProperty => "properties",
        SyncKind::Relationship => "relationships",
        SyncKind::Label => "labels",
    }
}

/// Print history entries, newest first.
pub fn print_history_table(entries: &[HistoryEntry]) {
    if entries.is_empty() {
        println!("{}", "No sync history.".dimmed());
        return;
    }

    println!(
        "{:<10} {:<20} {:<14} {:<11} {:<12} {:<8} {}",
        "ID", "Started", "Kind", "Status", "Rows", "Time", "Names"
    );
    println!("{}", "─".repeat(96));

    for entry in entries {
        let started = entry
            .started_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        let rows = format!("{}/{}", entry.successes, entry.total);
        let duration = entry
            .duration_ms
            .map(format_duration)
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<10} {:<20} {:<14} {:<11} {:<12} {:<8} {}",
            short_id(&entry.id),
            started,
            kind_label(entry.kind),
            status_colored(entry.status),
            rows,
            duration,
            truncate(&entry.names.join(", "), 40)
        );
    }
}

/// Print the outcome of items just processed.
pub fn print_results(entries: &[HistoryEntry]) {
    for entry in entries {
        let marker = match entry.status {
            SyncStatus::Completed if entry.success => "✓".green().bold(),
            SyncStatus::Completed => "!".yellow().bold(),
            SyncStatus::Cancelled => "⊘".yellow().bold(),
            _ => "✗".red().bold(),
        };
        println!(
            "{} {} [{}] {}",
            marker,
            kind_label(entry.kind).bold(),
            entry.names.join(", ").cyan(),
            status_colored(entry.status)
        );
        println!(
            "  {} ok, {} failed of {} · {}",
            entry.successes,
            entry.errors,
            entry.total,
            entry.stats.summary().dimmed()
        );
        if let Some(message) = &entry.message {
            println!("  {}", message.dimmed());
        }
        for error in entry.row_errors.iter().take(MAX_ROW_ERRORS) {
            let subject = error
                .document
                .as_deref()
                .or(error.name.as_deref())
                .unwrap_or("-");
            println!("    {} {} {}", error.category.as_str().red(), subject, error.message.dimmed());
        }
        if entry.row_errors.len() > MAX_ROW_ERRORS {
            println!(
                "    {}",
                format!("… {} more errors", entry.row_errors.len() - MAX_ROW_ERRORS).dimmed()
            );
        }
    }
}

/// Print every mapping with its enabled flag.
pub fn print_mappings(settings: &SyncSettings) {
    println!(
        "{} {} {} {}",
        "Nodes:".bold(),
        settings.node_label.cyan(),
        "keyed by".dimmed(),
        settings.key_property.cyan()
    );
    if let Some(size) = settings.batch_size {
        println!("{} {}", "Batch size:".bold(), size);
    }

    println!();
    println!("{}", "Properties".bold());
    if settings.properties.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for (name, mapping) in &settings.properties {
        let target = match &mapping.target {
            Some(target) => format!(" → {}", target),
            None => String::new(),
        };
        println!(
            "  {} {:<24} {}{}",
            enabled_marker(mapping.enabled),
            name,
            mapping.value_type.as_str().dimmed(),
            target
        );
    }

    println!();
    println!("{}", "Relationships".bold());
    if settings.relationships.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for (name, mapping) in &settings.relationships {
        println!(
            "  {} {:<24} {} {}",
            enabled_marker(mapping.enabled),
            name,
            mapping.relationship_type.cyan(),
            format!("{:?}", mapping.direction).to_lowercase().dimmed()
        );
    }

    println!();
    println!("{}", "Labels".bold());
    if settings.labels.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for (name, mapping) in &settings.labels {
        let rule = match &mapping.value {
            Some(value) => format!("{} = {}", mapping.property, value),
            None => format!("{} is set", mapping.property),
        };
        println!("  {} {:<24} {}", enabled_marker(mapping.enabled), name, rule.dimmed());
    }
}

fn enabled_marker(enabled: bool) -> ColoredString {
    if enabled {
        "●".green()
    } else {
        "○".dimmed()
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn format_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1_000.0)
    }
}

/// Truncate a string to a maximum number of characters.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}
