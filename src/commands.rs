//! Textual command responder.
//!
//! Read-only queries for chat or console use:
//!
//! - `status [account]`
//! - `cursor`
//! - `queue <account>`
//!
//! Commands may be prefixed with `freepackages`.

use crate::host::FreePackages;
use crate::models::*;

/// Answer a command, or `None` if the message is not one of ours.
pub async fn respond(service: &FreePackages, message: &str) -> Option<String> {
    let mut words = message.split_whitespace();
    let mut command = words.next()?.to_lowercase();
    if command == "freepackages" {
        command = words.next().unwrap_or("status").to_lowercase();
    }
    let argument = words.next();

    let reply = match (command.as_str(), argument) {
        ("status", None) => match service.status_report().await {
            Ok(report) => render_report(&report),
            Err(e) => format!("Failed to read status: {}", e),
        },
        ("status", Some(account_id)) => match service.registry().status(account_id).await {
            Some(status) => format_account(&status),
            None => format!("{}: claiming is not enabled", account_id),
        },
        ("cursor", _) => match service.db().cursor_summary() {
            Ok(summary) => format_cursor(&summary),
            Err(e) => format!("Failed to read cursor: {}", e),
        },
        ("queue", Some(account_id)) => match service.registry().queue(account_id).await {
            Some(entries) => format_queue(account_id, &entries),
            None => format!("{}: claiming is not enabled", account_id),
        },
        ("queue", None) => "Usage: queue <account>".to_string(),
        _ => return None,
    };
    Some(reply)
}

pub fn format_cursor(summary: &CursorSummary) -> String {
    let mut line = format!(
        "Cursor at sequence {} ({} categorized, {} pending lookup)",
        summary.last_sequence, summary.categorized_entries, summary.pending_entries
    );
    if let Some(updated_at) = summary.updated_at {
        line.push_str(&format!(", updated {}", updated_at.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    line
}

pub fn format_account(status: &AccountStatus) -> String {
    let limit = match status.hourly_limit {
        Some(limit) => format!("{}/{} this hour", status.claims_in_window, limit),
        None => format!("{} this hour, unlimited", status.claims_in_window),
    };
    let last = status
        .last_decision
        .map(|d| d.as_str())
        .unwrap_or("none");
    format!(
        "{}: {}, {}, {} queued, {} owned, {} rejected, {} rules, last {}",
        status.account_id,
        status.state.as_str(),
        limit,
        status.queued,
        status.owned,
        status.rejected,
        status.rules,
        last
    )
}

pub fn format_queue(account_id: &str, entries: &[EntryId]) -> String {
    if entries.is_empty() {
        return format!("{}: nothing queued", account_id);
    }
    let ids: Vec<String> = entries.iter().map(ToString::to_string).collect();
    format!("{}: {} queued: {}", account_id, entries.len(), ids.join(", "))
}

pub fn render_report(report: &StatusReport) -> String {
    let mut lines = vec![format_cursor(&report.cursor)];
    if report.accounts.is_empty() {
        lines.push("No accounts have claiming enabled".to_string());
    }
    lines.extend(report.accounts.iter().map(format_account));
    lines.join("\n")
}
