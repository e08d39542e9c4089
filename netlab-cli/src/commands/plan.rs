use std::path::PathBuf;

use clap::{Args, ValueEnum};
use comfy_table::{Table, presets};
use netlab::LabPlan;

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Lab file to validate
    pub lab: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t = PlanFormat::Table)]
    pub format: PlanFormat,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanFormat {
    Table,
    Json,
}

pub fn execute(args: PlanArgs, global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let lab = global.load_lab(&args.lab)?;
    let plan = lab.plan();

    match args.format {
        PlanFormat::Json => println!("{}", serde_json::to_string_pretty(plan)?),
        PlanFormat::Table => println!("{}", render_table(plan)),
    }
    Ok(())
}

fn render_table(plan: &LabPlan) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::NOTHING);
    table.set_header(vec!["NODE", "FLAVOR", "ROLE", "SEGMENT", "MAC"]);

    for node in &plan.nodes {
        for (i, attachment) in node.attachments.iter().enumerate() {
            let (name, flavor, role) = if i == 0 {
                (
                    node.name.clone(),
                    node.flavor.to_string(),
                    node.role.to_string(),
                )
            } else {
                (String::new(), String::new(), String::new())
            };
            table.add_row(vec![
                name,
                flavor,
                role,
                attachment.segment.clone(),
                attachment.mac.to_string(),
            ]);
        }
    }
    table
}
