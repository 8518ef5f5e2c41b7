//! Probe report rendering

use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use normatic_pool::{HandleState, PoolStats, ReclaimReport};
use serde::Serialize;

/// What a probe run observed
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// Target with the password redacted
    pub target: String,
    pub database: String,
    pub acquired: usize,
    pub released: usize,
    pub reclaim: ReclaimReport,
    pub stats: PoolStats,
    pub connections: Vec<ConnectionRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionRow {
    pub id: u64,
    pub lease: u64,
    pub state: HandleState,
    pub alive: bool,
    pub age_ms: u64,
}

pub fn render_json(report: &ProbeReport) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

pub fn render_table(report: &ProbeReport) -> String {
    let mut summary = Table::new();
    summary
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Target", "Database", "Idle", "In use", "Created", "Destroyed"])
        .add_row(vec![
            report.target.clone(),
            report.database.clone(),
            report.stats.idle().to_string(),
            report.stats.in_use().to_string(),
            report.stats.created().to_string(),
            report.stats.destroyed().to_string(),
        ]);

    let mut connections = Table::new();
    connections
        .load_preset(UTF8_FULL)
        .set_header(vec!["Id", "Lease", "State", "Alive", "Age (ms)"]);
    for row in &report.connections {
        connections.add_row(vec![
            row.id.to_string(),
            row.lease.to_string(),
            state_label(row.state).to_string(),
            if row.alive { "yes" } else { "no" }.to_string(),
            row.age_ms.to_string(),
        ]);
    }

    format!(
        "{summary}\n{connections}\nacquired {} released {} | reclaim: {} returned to idle, {} destroyed",
        report.acquired,
        report.released,
        report.reclaim.returned_to_idle,
        report.reclaim.destroyed
    )
}

fn state_label(state: HandleState) -> &'static str {
    match state {
        HandleState::Idle => "idle",
        HandleState::InUse => "in use",
        HandleState::Destroyed => "destroyed",
    }
}
