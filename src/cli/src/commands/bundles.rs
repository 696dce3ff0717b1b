//! Bundle state commands.
//!
//! `status` lists the conflation state of every bundle the central server
//! tracks; `show` prints one bundle with its applied content.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

const BUNDLES_PATH: &str = "/api/v1/bundles";

#[derive(Args)]
pub struct StatusArgs {
    /// Only show bundles of this leaf hub
    #[arg(short, long)]
    pub leaf_hub: Option<String>,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Leaf hub name
    leaf_hub: String,

    /// Bundle category (control-info, managed-clusters, policies, placement-decisions)
    category: String,

    /// Print object payloads as well as keys
    #[arg(short, long)]
    payloads: bool,
}

// ── API response types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
struct Version {
    incarnation: u64,
    generation: u64,
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.incarnation, self.generation)
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct BundleState {
    leaf_hub_name: String,
    category: String,
    last_applied: Option<Version>,
    applied: u64,
    discarded: u64,
    conflicts: u64,
    last_applied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Serialize)]
struct StatusObject {
    key: String,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize, Serialize)]
struct BundleDetail {
    state: BundleState,
    objects: Vec<StatusObject>,
}

#[derive(Debug, Serialize, Tabled)]
struct BundleRow {
    #[tabled(rename = "Leaf Hub")]
    leaf_hub: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Applied")]
    applied: u64,
    #[tabled(rename = "Discarded")]
    discarded: u64,
    #[tabled(rename = "Conflicts")]
    conflicts: u64,
    #[tabled(rename = "Last Applied")]
    last_applied_at: String,
}

impl From<&BundleState> for BundleRow {
    fn from(state: &BundleState) -> Self {
        Self {
            leaf_hub: state.leaf_hub_name.clone(),
            category: state.category.clone(),
            version: format_version(state.last_applied),
            applied: state.applied,
            discarded: state.discarded,
            conflicts: state.conflicts,
            last_applied_at: state
                .last_applied_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".into()),
        }
    }
}

fn format_version(version: Option<Version>) -> String {
    version.map_or_else(|| "-".into(), |v| v.to_string())
}

// ── Command execution ───────────────────────────────────────────────────────

pub async fn status(args: StatusArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let states: Vec<BundleState> = match args.leaf_hub.as_deref() {
        Some(leaf_hub) => {
            client
                .get_with_query(BUNDLES_PATH, &[("leaf_hub", leaf_hub)])
                .await?
        }
        None => client.get(BUNDLES_PATH).await?,
    };

    match format {
        OutputFormat::Table => {
            let rows: Vec<BundleRow> = states.iter().map(BundleRow::from).collect();
            output::print_list(&rows, format)?;

            let conflicts: u64 = states.iter().map(|s| s.conflicts).sum();
            if conflicts > 0 {
                output::print_error(&format!(
                    "{} version conflict(s) reported; a leaf hub may be reusing an incarnation",
                    conflicts
                ));
            }
        }
        _ => output::print_item(&states, format)?,
    }

    Ok(())
}

pub async fn show(args: ShowArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let path = format!("{}/{}/{}", BUNDLES_PATH, args.leaf_hub, args.category);
    let detail: BundleDetail = client.get(&path).await?;

    match format {
        OutputFormat::Table => {
            let state = &detail.state;
            output::print_header(&format!("{} / {}", state.leaf_hub_name, state.category));
            output::print_detail("Version", &format_version(state.last_applied));
            output::print_detail("Applied", &state.applied.to_string());
            output::print_detail("Discarded", &state.discarded.to_string());
            output::print_detail("Conflicts", &state.conflicts.to_string());
            if let Some(at) = state.last_applied_at {
                output::print_detail("Last Applied", &at.to_rfc3339());
            }

            output::print_header(&format!("Objects ({})", detail.objects.len()));
            for object in &detail.objects {
                if args.payloads {
                    output::print_detail(&object.key, &object.payload.to_string());
                } else {
                    println!("  {}", object.key);
                }
            }
        }
        _ => output::print_item(&detail, format)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_from_state() {
        let state: BundleState = serde_json::from_value(serde_json::json!({
            "leafHubName": "hub1",
            "category": "policies",
            "lastApplied": {"incarnation": 6, "generation": 0},
            "applied": 4,
            "discarded": 2,
            "conflicts": 0,
            "lastAppliedAt": null,
        }))
        .unwrap();

        let row = BundleRow::from(&state);
        assert_eq!(row.version, "6.0");
        assert_eq!(row.last_applied_at, "-");
    }

    #[test]
    fn test_unknown_key_has_no_version() {
        assert_eq!(format_version(None), "-");
    }
}
