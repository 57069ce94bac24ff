use std::fmt::Write as _;

use anyhow::{bail, Result};
use clap::Args;
use dialoguer::console;
use serde::Serialize;

use crate::args::BaseArgs;
use crate::catalog::{self, Catalog, ObjectId};
use crate::context::Session;
use crate::layers::LayerKind;
use crate::ui::{report_table, with_spinner};
use crate::utils::pluralize;

#[derive(Debug, Clone, Args)]
pub struct PlanArgs {
    /// Layer to inspect
    #[arg(long, value_enum)]
    pub layer: LayerKind,
}

#[derive(Debug, Serialize)]
struct BlockPlan {
    index: usize,
    first_object_id: ObjectId,
    last_object_id: ObjectId,
    object_ids: usize,
}

#[derive(Debug, Serialize)]
struct LayerPlan {
    layer: LayerKind,
    url: String,
    max_record_count: usize,
    object_ids: usize,
    blocks: Vec<BlockPlan>,
}

impl LayerPlan {
    fn new(layer: LayerKind, url: &str, catalog: &Catalog) -> Self {
        let blocks = catalog
            .blocks()
            .iter()
            .enumerate()
            .filter_map(|(index, ids)| {
                Some(BlockPlan {
                    index,
                    first_object_id: *ids.first()?,
                    last_object_id: *ids.last()?,
                    object_ids: ids.len(),
                })
            })
            .collect();
        Self {
            layer,
            url: url.to_string(),
            max_record_count: catalog.max_record_count,
            object_ids: catalog.object_ids.len(),
            blocks,
        }
    }
}

/// Shows how a layer would be split into blocks, without fetching or
/// editing any features.
pub async fn run(base: BaseArgs, args: PlanArgs) -> Result<()> {
    let session = Session::open(&base)?;
    let configs = session.settings.layers(&[args.layer])?;
    let Some(config) = configs.first() else {
        bail!("no URL configured for layer {}", args.layer.as_str());
    };
    let tokens = session.token_provider()?;
    let layer = session.layer_client(config);

    let catalog = with_spinner(
        "Discovering layer...",
        catalog::discover(&layer, &tokens),
    )
    .await?;
    let plan = LayerPlan::new(config.kind, &config.base_url, &catalog);

    if base.json {
        println!("{}", serde_json::to_string(&plan)?);
        return Ok(());
    }

    let mut output = String::new();
    let block_count = plan.blocks.len();
    writeln!(
        output,
        "{} holds {} {} in {} {} of up to {}\n",
        console::style(plan.layer.as_str()).bold(),
        console::style(plan.object_ids),
        pluralize(plan.object_ids, "feature"),
        console::style(block_count),
        pluralize(block_count, "block"),
        plan.max_record_count,
    )?;

    let mut table = report_table(&["Block", "First OBJECTID", "Last OBJECTID", "Ids"]);
    for block in &plan.blocks {
        table.add_row(vec![
            block.index.to_string(),
            block.first_object_id.to_string(),
            block.last_object_id.to_string(),
            block.object_ids.to_string(),
        ]);
    }
    write!(output, "{table}")?;
    println!("{output}");
    Ok(())
}
