//! Command-line arguments

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};
use speech_synthesis::AudioFormat;

/// narrator CLI
#[derive(Debug, Parser)]
#[command(name = "narrator")]
#[command(author, version, about = "Convert text into audio with fallback across speech engines", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./narrator.toml if present)
    #[arg(short, long, global = true, env = "NARRATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Convert every .txt file of a directory into an audio file
    ///
    /// Example: narrator convert --input-dir text/ --output-dir audio/ --concurrency 3
    Convert {
        /// Directory holding the chapter text files
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Directory receiving the audio files
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Audio format of the produced files
        #[arg(short, long, default_value = "mp3")]
        format: AudioFormat,

        /// Override the configured number of concurrent jobs
        #[arg(long)]
        concurrency: Option<usize>,

        /// List the jobs without calling any engine
        #[arg(long)]
        dry_run: bool,

        /// Write the job reports as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Convert a single text into one audio file
    ///
    /// Example: narrator speak --text "Xin chào" --output hello.mp3
    #[command(group(ArgGroup::new("source").required(true).args(["text", "file"])))]
    Speak {
        /// Text to convert
        #[arg(short, long)]
        text: Option<String>,

        /// Text file to convert
        #[arg(long)]
        file: Option<PathBuf>,

        /// Output audio file; its extension selects the format
        #[arg(short, long)]
        output: PathBuf,

        /// Voice overriding the engines' configured voices
        #[arg(long)]
        voice: Option<String>,
    },

    /// List configured engines in fallback order with their availability
    Engines,
}

/// Determine log filter level from verbosity count
pub const fn log_filter_from_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_filter_verbosity_levels() {
        assert_eq!(log_filter_from_verbosity(0), "warn");
        assert_eq!(log_filter_from_verbosity(1), "info");
        assert_eq!(log_filter_from_verbosity(2), "debug");
        assert_eq!(log_filter_from_verbosity(3), "trace");
        assert_eq!(log_filter_from_verbosity(10), "trace");
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
