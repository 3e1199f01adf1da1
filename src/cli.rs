//! CLI argument parsing for callmap

use crate::export::Artifact;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Diagram printed to stdout instead of writing the artifact set
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DiagramFormat {
    /// PlantUML sequence diagram
    Plantuml,
    /// Mermaid architecture graph
    Mermaid,
}

impl DiagramFormat {
    pub fn artifact(self) -> Artifact {
        match self {
            DiagramFormat::Plantuml => Artifact::PlantUml,
            DiagramFormat::Mermaid => Artifact::Mermaid,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "callmap")]
#[command(version)]
#[command(about = "Render architecture maps, metrics and diagrams from a captured call trace", long_about = None)]
pub struct Cli {
    /// Trace document to replay (JSON with a `calls` event list)
    #[arg(short, long, value_name = "FILE")]
    pub trace: PathBuf,

    /// Directory receiving the eleven artifacts
    #[arg(short, long = "output-dir", value_name = "DIR", default_value = ".callmap/traces")]
    pub output_dir: PathBuf,

    /// Print a single diagram to stdout instead of writing artifacts
    #[arg(short, long, value_enum)]
    pub diagram: Option<DiagramFormat>,

    /// Override the session id used as the artifact file prefix
    #[arg(long = "session-id", value_name = "ID")]
    pub session_id: Option<String>,

    /// Enable debug tracing output to stderr
    #[arg(long)]
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_trace() {
        assert!(Cli::try_parse_from(["callmap"]).is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["callmap", "--trace", "run.json"]);
        assert_eq!(cli.trace, PathBuf::from("run.json"));
        assert_eq!(cli.output_dir, PathBuf::from(".callmap/traces"));
        assert!(cli.diagram.is_none());
        assert!(cli.session_id.is_none());
        assert!(!cli.debug);
    }

    #[test]
    fn test_cli_diagram_formats() {
        let cli = Cli::parse_from(["callmap", "-t", "run.json", "--diagram", "mermaid"]);
        assert_eq!(cli.diagram, Some(DiagramFormat::Mermaid));
        assert_eq!(cli.diagram.map(DiagramFormat::artifact), Some(Artifact::Mermaid));

        let cli = Cli::parse_from(["callmap", "-t", "run.json", "-d", "plantuml"]);
        assert_eq!(cli.diagram.map(DiagramFormat::artifact), Some(Artifact::PlantUml));

        assert!(Cli::try_parse_from(["callmap", "-t", "run.json", "--diagram", "svg"]).is_err());
    }

    #[test]
    fn test_cli_output_and_session() {
        let cli = Cli::parse_from([
            "callmap",
            "--trace",
            "run.json",
            "--output-dir",
            "/tmp/out",
            "--session-id",
            "replay_1",
            "--debug",
        ]);
        assert_eq!(cli.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(cli.session_id.as_deref(), Some("replay_1"));
        assert!(cli.debug);
    }
}
