//! Splitset inspection

use super::to_json;
use crate::config::OutputFormat;
use crate::context::Context;
use crate::split::Splitset;

pub fn run_splitset(ctx: &Context, id: i64, format: OutputFormat) -> Result<(), String> {
    let splitset: Splitset = ctx.store().get(id).map_err(|e| format!("Failed to get splitset: {e}"))?;

    match format {
        OutputFormat::Json => println!("{}", to_json(&splitset)?),
        OutputFormat::Table => {
            println!("Splitset {} ({} samples, {:?})", splitset.id, splitset.sample_count, splitset.supervision);
            if let Some(name) = &splitset.name {
                println!("  Name: {name}");
            }
            println!("  Features: {:?}", splitset.feature_ids);
            if let Some(label_id) = splitset.label_id {
                println!("  Label: {label_id}");
            }
            if let Some(bins) = splitset.bin_count {
                println!("  Bins: {bins}");
            }
            println!();
            println!("{:<24} {:>8} {:>9}", "PARTITION", "COUNT", "PERCENT");
            println!("{}", "-".repeat(43));
            for (partition, size) in &splitset.sizes {
                println!("{:<24} {:>8} {:>8.1}%", partition.as_str(), size.count, size.percent * 100.0);
            }
        }
    }
    Ok(())
}
