//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

/// Decode command arguments.
#[derive(Debug, Args)]
pub struct DecodeCommand {
    /// Log file to decode (e.g. 042-AQL.LOG)
    pub file: PathBuf,

    /// Stop after this many samples
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

/// Inspect command arguments.
#[derive(Debug, Args)]
pub struct InspectCommand {
    /// Log file to inspect
    pub file: PathBuf,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Session command arguments.
#[derive(Debug, Args)]
pub struct SessionCommand {
    /// Storage root to read the session counter from
    #[arg(short, long, value_name = "DIR")]
    pub root: Option<PathBuf>,
}

/// Record command arguments.
#[derive(Debug, Args)]
pub struct RecordCommand {
    /// Stream name; the log file becomes NNN-<NAME>.LOG
    #[arg(short, long)]
    pub name: Option<String>,

    /// Storage root to record into
    #[arg(short, long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Drop input that would overrun the ring instead of waiting for the worker
    #[arg(long)]
    pub drop_overruns: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        file: Option<PathBuf>,
    },
}

/// Output format for decoded samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// One line per sample, values only
    Plain,
    /// Field names and values, aligned
    #[default]
    Table,
    /// One JSON object per sample
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_default() {
        assert_eq!(OutputFormat::default(), OutputFormat::Table);
    }

    #[test]
    fn test_output_format_value_names() {
        let names: Vec<String> = OutputFormat::value_variants()
            .iter()
            .filter_map(|v| v.to_possible_value())
            .map(|v| v.get_name().to_string())
            .collect();
        assert_eq!(names, ["plain", "table", "json"]);
    }

    #[test]
    fn test_config_command_debug() {
        let cmd = ConfigCommand::Show { json: false };
        let debug_str = format!("{cmd:?}");
        assert!(debug_str.contains("Show"));
    }
}
