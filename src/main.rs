use anyhow::{Context, Result};
use callmap::{cli::Cli, ExportPipeline, Session, TraceDocument};
use clap::Parser;
use std::fs;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.debug);

    let text = fs::read_to_string(&args.trace)
        .with_context(|| format!("cannot read trace {}", args.trace.display()))?;
    let document = TraceDocument::from_json(&text)
        .with_context(|| format!("invalid trace document {}", args.trace.display()))?;

    let records = document.to_records();
    let session = match &args.session_id {
        Some(id) if id.trim().is_empty() => anyhow::bail!("--session-id must not be empty"),
        Some(id) => Session::with_id(id.clone(), document.timestamp),
        None => document.session(),
    };
    tracing::debug!("replayed {} calls from {}", records.len(), args.trace.display());

    let pipeline = ExportPipeline::standard();

    if let Some(format) = args.diagram {
        let diagram = pipeline.render(format.artifact(), &session, &records)?;
        print!("{}", diagram);
        return Ok(());
    }

    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("cannot create {}", args.output_dir.display()))?;
    let report = pipeline.write_all(&session, &records, &args.output_dir);

    for path in &report.written {
        println!("{}", path.display());
    }
    for failure in &report.failures {
        eprintln!("failed: {} ({})", failure.artifact, failure.reason);
    }
    if report.written.is_empty() {
        anyhow::bail!("no artifacts were written to {}", args.output_dir.display());
    }

    Ok(())
}
