use anyhow::{Context, Result};
use clap::Parser;
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing_subscriber::EnvFilter;
use vartrace::analysis::{self, ArrayShape, PointerTarget, Projections};
use vartrace::cli::{Cli, Command, OutputFormat};
use vartrace::reader::{self, TraceDocument};

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load(path: &Path) -> Result<TraceDocument> {
    let doc = reader::read_file(path)
        .with_context(|| format!("Failed to read trace {}", path.display()))?;
    tracing::debug!(
        "Loaded {} events from {} (truncated: {})",
        doc.events.len(),
        path.display(),
        doc.truncated
    );
    Ok(doc)
}

#[derive(Serialize)]
struct JsonElement<'a> {
    array: &'a str,
    indices: Vec<i32>,
    value: i64,
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    version: &'a str,
    events: usize,
    total_events: Option<u64>,
    truncated: bool,
    max_depth: u32,
    functions: &'a BTreeSet<String>,
    kind_counts: &'a BTreeMap<String, u64>,
    variables: &'a BTreeMap<String, i64>,
    arrays: &'a BTreeMap<String, ArrayShape>,
    array_elements: Vec<JsonElement<'a>>,
    pointers: &'a BTreeMap<String, PointerTarget>,
    violations: usize,
}

/// Print a human-readable summary
fn print_text_summary(doc: &TraceDocument, projections: &Projections, violations: usize) {
    println!("=== Trace Summary ===");
    println!("Version: {}", doc.version);
    println!("Events: {}", doc.events.len());
    if doc.truncated {
        println!("Status: truncated (no trailer)");
    } else {
        println!("Status: complete");
    }
    println!("Max depth: {}", projections.max_depth);
    println!("Violations: {}", violations);
    println!();

    if !projections.kind_counts.is_empty() {
        println!("Event kinds:");
        println!("─────────────────────────────────────────");
        for (kind, count) in &projections.kind_counts {
            println!("  {:<24} {:>8}", kind, count);
        }
        println!();
    }

    if !projections.functions.is_empty() {
        println!("Functions:");
        println!("─────────────────────────────────────────");
        for function in &projections.functions {
            println!("  {}", function);
        }
        println!();
    }

    if !projections.variables.is_empty() {
        println!("Variables:");
        println!("─────────────────────────────────────────");
        for (name, value) in &projections.variables {
            println!("  {} = {}", name, value);
        }
        println!();
    }

    if !projections.array_elements.is_empty() {
        println!("Array elements:");
        println!("─────────────────────────────────────────");
        for (key, value) in &projections.array_elements {
            let indices: Vec<String> = key.indices().iter().map(|i| format!("[{}]", i)).collect();
            println!("  {}{} = {}", key.array, indices.concat(), value);
        }
        println!();
    }

    if !projections.pointers.is_empty() {
        println!("Pointers:");
        println!("─────────────────────────────────────────");
        for (name, target) in &projections.pointers {
            println!("  {} -> {} ({})", name, target.alias_of, target.address);
        }
    }
}

fn run_summary(path: &Path, format: OutputFormat) -> Result<()> {
    let doc = load(path)?;
    let projections = Projections::replay(&doc.events);
    let violations = analysis::check(&doc).len();

    match format {
        OutputFormat::Text => print_text_summary(&doc, &projections, violations),
        OutputFormat::Json => {
            let summary = JsonSummary {
                version: &doc.version,
                events: doc.events.len(),
                total_events: doc.total_events,
                truncated: doc.truncated,
                max_depth: projections.max_depth,
                functions: &projections.functions,
                kind_counts: &projections.kind_counts,
                variables: &projections.variables,
                arrays: &projections.arrays,
                array_elements: projections
                    .array_elements
                    .iter()
                    .map(|(key, value)| JsonElement {
                        array: &key.array,
                        indices: key.indices(),
                        value: *value,
                    })
                    .collect(),
                pointers: &projections.pointers,
                violations,
            };
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}

fn run_check(path: &Path) -> Result<()> {
    let doc = load(path)?;
    let violations = analysis::check(&doc);
    if doc.truncated {
        println!("warning: trace has no trailer (interrupted run)");
    }
    if violations.is_empty() {
        println!("OK: {} events, no violations", doc.events.len());
        return Ok(());
    }
    for violation in &violations {
        println!("{}", violation);
    }
    anyhow::bail!("{} violation(s) found in {}", violations.len(), path.display());
}

fn run_events(path: &Path, kind: Option<&str>, function: Option<&str>) -> Result<()> {
    let pattern = function
        .map(Regex::new)
        .transpose()
        .context("Invalid --function regex")?;
    let doc = load(path)?;

    for event in &doc.events {
        if kind.is_some_and(|k| event.payload.kind() != k) {
            continue;
        }
        if pattern.as_ref().is_some_and(|re| !re.is_match(&event.func)) {
            continue;
        }
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    match args.command {
        Command::Summary { file, format } => run_summary(&file, format),
        Command::Check { file } => run_check(&file),
        Command::Events {
            file,
            kind,
            function,
        } => run_events(&file, kind.as_deref(), function.as_deref()),
    }
}
