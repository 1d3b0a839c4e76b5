mod collapse;
mod record;

use anyhow::{bail, Context, Result};
use clap::Parser;
use collapse::condense;
use std::fs;
use std::path::PathBuf;
use std::process;

/// Extract essential fields from a conversation JSONL transcript, collapsing
/// command markers and runs of empty tool executions into single records.
#[derive(Debug, Parser)]
#[command(name = "condenscript", version)]
struct Args {
    /// Path to the input conversation JSONL file.
    input_path: PathBuf,

    /// Keep only dialogue and collapsed command records, dropping all tool
    /// execution content.
    #[arg(long)]
    minimal: bool,
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

fn run(args: &Args) -> Result<()> {
    if !args.input_path.exists() {
        bail!("file not found: {}", args.input_path.display());
    }
    let input_path = fs::canonicalize(&args.input_path)
        .with_context(|| format!("resolving {}", args.input_path.display()))?;
    let file_name = input_path
        .file_name()
        .and_then(|n| n.to_str())
        .context("input path has no file name")?;

    let output_dir = std::env::current_dir()
        .context("resolving current directory")?
        .join("conversation_data");
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let suffix = if args.minimal { "_minimal" } else { "" };
    let output_path = output_dir.join(format!("filtered{suffix}_{file_name}"));

    let input_size = fs::metadata(&input_path)
        .with_context(|| format!("reading metadata of {}", input_path.display()))?
        .len();
    println!("Processing: {file_name}");
    println!("File size: {:.2} MB", megabytes(input_size));
    if args.minimal {
        println!("Mode: minimal (conversation only)");
    }

    let contents = fs::read_to_string(&input_path)
        .with_context(|| format!("reading {}", input_path.display()))?;
    let (records, errors) = condense(&contents, args.minimal);
    for (line, err) in &errors {
        eprintln!("condenscript: skipping invalid JSON at line {line}: {err}");
    }

    // Serialize everything up front so a failure never leaves a truncated
    // output file behind.
    let mut output = String::new();
    for rec in &records {
        let line = serde_json::to_string(rec).context("serializing record")?;
        output.push_str(&line);
        output.push('\n');
    }
    fs::write(&output_path, &output)
        .with_context(|| format!("writing {}", output_path.display()))?;

    let output_size = fs::metadata(&output_path)
        .with_context(|| format!("reading metadata of {}", output_path.display()))?
        .len();
    println!("Extracted: {} records", records.len());
    println!("Saved to: {}", output_path.display());
    println!("New size: {:.2} MB", megabytes(output_size));
    if input_size > 0 {
        let reduction = (1.0 - output_size as f64 / input_size as f64) * 100.0;
        println!("Reduction: {reduction:.1}%");
    }
    Ok(())
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(&args) {
        eprintln!("condenscript: {err:#}");
        process::exit(1);
    }
}
