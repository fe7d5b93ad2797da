//! Queue progress and metric tables

use super::{to_json, truncate};
use crate::config::{OutputFormat, QueueArgs, QueueCommand};
use crate::context::Context;
use crate::queue::Queue;

pub fn run_queue(ctx: &Context, args: QueueArgs) -> Result<(), String> {
    let id = match args.command {
        QueueCommand::Status { id } | QueueCommand::Metrics { id } | QueueCommand::Aggregate { id } => id,
    };
    let queue: Queue = ctx.store().get(id).map_err(|e| format!("Failed to get queue: {e}"))?;

    match args.command {
        QueueCommand::Status { .. } => show_status(ctx, &queue, args.format),
        QueueCommand::Metrics { .. } => show_metrics(ctx, &queue, args.format),
        QueueCommand::Aggregate { .. } => show_aggregate(ctx, &queue, args.format),
    }
}

fn show_status(ctx: &Context, queue: &Queue, format: OutputFormat) -> Result<(), String> {
    let status = queue.status(ctx).map_err(|e| format!("Failed to read queue status: {e}"))?;
    match format {
        OutputFormat::Json => println!("{}", to_json(&status)?),
        OutputFormat::Table => {
            println!("Queue {}: {}/{} runs completed", status.queue_id, status.runs_completed, status.run_count);
            println!(
                "  Jobs: {} pending, {} running, {} succeeded, {} failed",
                status.pending, status.running, status.succeeded, status.failed
            );
        }
    }
    Ok(())
}

fn show_metrics(ctx: &Context, queue: &Queue, format: OutputFormat) -> Result<(), String> {
    let rows = queue.metrics_table(ctx).map_err(|e| format!("Failed to read metrics: {e}"))?;
    if rows.is_empty() {
        eprintln!("No evaluated predictors for queue {}", queue.id);
        return Ok(());
    }
    match format {
        OutputFormat::Json => println!("{}", to_json(&rows)?),
        OutputFormat::Table => {
            println!(
                "{:<10} {:<8} {:<7} {:<5} {:<22} {:<18} {:>14}",
                "PREDICTOR", "JOB", "REPEAT", "FOLD", "PARTITION", "METRIC", "VALUE"
            );
            println!("{}", "-".repeat(90));
            for row in &rows {
                let fold = row.fold_index.map(|f| f.to_string()).unwrap_or_else(|| "-".to_string());
                println!(
                    "{:<10} {:<8} {:<7} {:<5} {:<22} {:<18} {:>14.6}",
                    row.predictor_id,
                    row.job_id,
                    row.repeat_index,
                    fold,
                    row.partition.as_str(),
                    truncate(row.metric.name(), 18),
                    row.value
                );
            }
            println!("\n{} row(s)", rows.len());
        }
    }
    Ok(())
}

fn show_aggregate(ctx: &Context, queue: &Queue, format: OutputFormat) -> Result<(), String> {
    let rows = queue.metrics_aggregate_table(ctx).map_err(|e| format!("Failed to read metrics: {e}"))?;
    if rows.is_empty() {
        eprintln!("No evaluated predictors for queue {}", queue.id);
        return Ok(());
    }
    match format {
        OutputFormat::Json => println!("{}", to_json(&rows)?),
        OutputFormat::Table => {
            println!(
                "{:<10} {:<18} {:>12} {:>12} {:>12} {:>12} {:>12}",
                "PREDICTOR", "METRIC", "MEAN", "MEDIAN", "PSTDEV", "MIN", "MAX"
            );
            println!("{}", "-".repeat(94));
            for row in &rows {
                println!(
                    "{:<10} {:<18} {:>12.6} {:>12.6} {:>12.6} {:>12.6} {:>12.6}",
                    row.predictor_id,
                    truncate(row.metric.name(), 18),
                    row.mean,
                    row.median,
                    row.pstdev,
                    row.minimum,
                    row.maximum
                );
            }
        }
    }
    Ok(())
}
