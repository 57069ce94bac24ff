use std::fmt::Write as _;

use anyhow::Result;
use clap::Args;
use dialoguer::console;

use crate::args::BaseArgs;
use crate::context::Session;
use crate::observations::{Condition, ReachObservation};
use crate::ui::{report_table, with_spinner};

#[derive(Debug, Clone, Args)]
pub struct LevelsArgs {
    /// Only show reaches with this condition
    #[arg(long, value_parser = parse_condition)]
    pub condition: Option<Condition>,

    /// Only show these reach ids (repeatable)
    #[arg(long = "reach")]
    pub reaches: Vec<String>,
}

fn parse_condition(value: &str) -> Result<Condition, String> {
    match value.to_ascii_lowercase().as_str() {
        "low" => Ok(Condition::Low),
        "medium" | "med" => Ok(Condition::Medium),
        "high" => Ok(Condition::High),
        other => Err(format!("unknown condition '{other}' (expected low, medium, high)")),
    }
}

pub async fn run(base: BaseArgs, args: LevelsArgs) -> Result<()> {
    let session = Session::open(&base)?;
    let cache = session.observations();
    let levels = with_spinner("Loading gauge observations...", cache.get_observations()).await?;

    let mut rows: Vec<&ReachObservation> = levels
        .values()
        .filter(|o| args.condition.is_none_or(|c| o.condition == c))
        .filter(|o| args.reaches.is_empty() || args.reaches.contains(&o.reach_id))
        .collect();
    rows.sort_by(|a, b| sort_key(&a.reach_id).cmp(&sort_key(&b.reach_id)));

    if base.json {
        println!("{}", serde_json::to_string(&rows)?);
        return Ok(());
    }

    let mut output = String::new();
    writeln!(
        output,
        "{} reaches with gauge observations\n",
        console::style(rows.len())
    )?;
    let mut table = report_table(&["Reach", "Stage", "Condition"]);
    for row in rows {
        table.add_row(vec![
            row.reach_id.clone(),
            row.stage.clone(),
            row.condition.to_string(),
        ]);
    }
    write!(output, "{table}")?;
    println!("{output}");
    Ok(())
}

/// Numeric ids sort numerically, anything else after them.
fn sort_key(id: &str) -> (u64, &str) {
    (id.parse().unwrap_or(u64::MAX), id)
}
