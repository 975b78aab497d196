//! Plain-text and JSON rendering of reconciliation results.

use std::{borrow::Cow, fmt::Write as _};

use crate::engine::{OutcomeKind, StatusReport, SyncOutcome, SyncSummary};

pub fn render_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| display_width(h)).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(display_width(cell));
        }
    }

    let mut output = String::new();
    let header_cells = headers.iter().map(|h| h.to_string()).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&header_cells, &widths));
    let separator = widths
        .iter()
        .map(|w| "-".repeat((*w).max(3)))
        .collect::<Vec<_>>();
    let separator_widths = widths.iter().map(|w| (*w).max(3)).collect::<Vec<_>>();
    let _ = writeln!(output, "{}", format_row(&separator, &separator_widths));
    for row in rows {
        let _ = writeln!(output, "{}", format_row(row, &widths));
    }
    output
}

pub fn render_outcome(outcome: &SyncOutcome) -> String {
    match &outcome.result {
        OutcomeKind::Succeeded {
            remote_id,
            action,
            row_missing,
        } => {
            let mut line = format!(
                "#{} {}: {action} remote id {remote_id}",
                outcome.record_id, outcome.email
            );
            if *row_missing {
                line.push_str(" (local row no longer present)");
            }
            line
        }
        OutcomeKind::Failed { error } => {
            format!("#{} {}: failed: {error}", outcome.record_id, outcome.email)
        }
    }
}

/// Per-record table followed by the success/error/total line.
pub fn render_summary(summary: &SyncSummary) -> String {
    let mut output = String::new();
    if let Some(error) = &summary.fetch_error {
        let _ = writeln!(output, "Fetch failed: {}", sanitize_cell(error));
    }
    if summary.total() > 0 {
        let rows = summary
            .outcomes
            .iter()
            .map(|outcome| {
                let (status, detail) = match &outcome.result {
                    OutcomeKind::Succeeded {
                        remote_id, action, ..
                    } => (action.to_string(), remote_id.clone()),
                    OutcomeKind::Failed { error } => ("failed".to_string(), error.clone()),
                };
                vec![
                    outcome.record_id.to_string(),
                    outcome.email.clone(),
                    status,
                    detail,
                ]
            })
            .collect::<Vec<_>>();
        output.push_str(&render_table(&["id", "email", "status", "detail"], &rows));
    }
    let _ = write!(
        output,
        "Succeeded: {}  Failed: {}  Total: {}",
        summary.succeeded(),
        summary.failed(),
        summary.total()
    );
    if summary.skipped_rows > 0 {
        let _ = write!(output, "  Skipped rows: {}", summary.skipped_rows);
    }
    output.push('\n');
    output
}

pub fn render_summary_json(summary: &SyncSummary) -> serde_json::Result<String> {
    let value = serde_json::json!({
        "succeeded": summary.succeeded(),
        "failed": summary.failed(),
        "total": summary.total(),
        "skipped_rows": summary.skipped_rows,
        "fetch_error": summary.fetch_error,
        "outcomes": summary.outcomes,
    });
    serde_json::to_string_pretty(&value)
}

pub fn render_status(email: &str, status: &StatusReport) -> String {
    format!("{email}: {status}")
}

fn format_row(values: &[String], widths: &[usize]) -> String {
    let mut line = values
        .iter()
        .zip(widths)
        .map(|(value, width)| {
            let sanitized = sanitize_cell(value);
            let padding = width.saturating_sub(display_width(&sanitized));
            format!("{sanitized}{}", " ".repeat(padding))
        })
        .collect::<Vec<_>>()
        .join("  ");
    while line.ends_with(' ') {
        line.pop();
    }
    line
}

fn display_width(value: &str) -> usize {
    value.chars().count()
}

fn sanitize_cell(value: &str) -> Cow<'_, str> {
    if value.contains(['\n', '\r', '\t']) {
        Cow::Owned(value.replace(['\n', '\r', '\t'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SyncAction;

    fn summary() -> SyncSummary {
        SyncSummary {
            outcomes: vec![
                SyncOutcome {
                    record_id: 1,
                    email: "a@x.com".into(),
                    result: OutcomeKind::Succeeded {
                        remote_id: "SYS2".into(),
                        action: SyncAction::Created,
                        row_missing: false,
                    },
                },
                SyncOutcome {
                    record_id: 2,
                    email: "b@x.com".into(),
                    result: OutcomeKind::Failed {
                        error: "HTTP 401\nunauthorised".into(),
                    },
                },
            ],
            skipped_rows: 1,
            fetch_error: None,
        }
    }

    #[test]
    fn table_pads_columns_and_flattens_newlines() {
        let rendered = render_table(
            &["id", "email"],
            &[vec!["10".into(), "a@x.com".into()], vec!["2".into(), "b\nc".into()]],
        );
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "id  email");
        assert_eq!(lines[1], "---  -------");
        assert_eq!(lines[2], "10  a@x.com");
        assert_eq!(lines[3], "2   b c");
    }

    #[test]
    fn summary_ends_with_counts() {
        let rendered = render_summary(&summary());
        assert!(rendered.contains("created"));
        assert!(rendered.contains("HTTP 401 unauthorised"));
        assert!(rendered.ends_with("Succeeded: 1  Failed: 1  Total: 2  Skipped rows: 1\n"));
        assert_eq!(
            render_summary(&SyncSummary::default()),
            "Succeeded: 0  Failed: 0  Total: 0\n"
        );
    }

    #[test]
    fn fetch_failure_is_stated_before_the_counts() {
        let failed = SyncSummary {
            fetch_error: Some("table 'staff' does not exist".into()),
            ..SyncSummary::default()
        };
        assert_eq!(
            render_summary(&failed),
            "Fetch failed: table 'staff' does not exist\nSucceeded: 0  Failed: 0  Total: 0\n"
        );
        let json: serde_json::Value =
            serde_json::from_str(&render_summary_json(&failed).unwrap()).unwrap();
        assert_eq!(json["fetch_error"], "table 'staff' does not exist");
    }

    #[test]
    fn json_summary_flattens_outcome_status() {
        let json: serde_json::Value =
            serde_json::from_str(&render_summary_json(&summary()).unwrap()).unwrap();
        assert_eq!(json["total"], 2);
        assert_eq!(json["outcomes"][0]["status"], "succeeded");
        assert_eq!(json["outcomes"][0]["action"], "created");
        assert_eq!(json["outcomes"][1]["status"], "failed");
    }

    #[test]
    fn outcome_lines() {
        let s = summary();
        assert_eq!(render_outcome(&s.outcomes[0]), "#1 a@x.com: created remote id SYS2");
        assert!(render_outcome(&s.outcomes[1]).starts_with("#2 b@x.com: failed:"));
    }
}
