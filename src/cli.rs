use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "httpcache-disk",
    about = "Inspect and maintain an on-disk HTTP response cache"
)]
pub struct Cli {
    /// Path to the configuration file (defaults to ./httpcache.toml if present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format; overrides the configuration file.
    #[arg(long, value_enum, global = true)]
    pub log: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the storage keys a logical key maps to.
    Keys { key: String },
    /// Print the status and headers stored under a key.
    Header { key: String },
    /// Print the status and headers stored under a key and write its body.
    Get {
        key: String,
        /// Write the body here instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Store a response under one or more keys.
    Put(StoreArgs),
    /// Replace whatever is stored under the given keys.
    Freshen(StoreArgs),
    /// Remove the given keys.
    Invalidate {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Print engine usage and metrics.
    Stats,
}

#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    #[arg(required = true)]
    pub keys: Vec<String>,

    /// Response status code.
    #[arg(long, default_value_t = 200)]
    pub status: u16,

    /// Response header as "Name: value". May be repeated.
    #[arg(long = "header", short = 'H')]
    pub headers: Vec<String>,

    /// File holding the response body; stdin is read when omitted.
    #[arg(long)]
    pub body: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_put_with_repeated_headers() {
        let cli = Cli::try_parse_from([
            "httpcache-disk",
            "put",
            "a",
            "b",
            "--status",
            "203",
            "-H",
            "Content-Type: text/plain",
            "--header",
            "ETag: \"v1\"",
            "--log",
            "json",
        ])
        .unwrap();

        assert_eq!(cli.log, Some(LogFormat::Json));
        let Command::Put(args) = cli.command else {
            panic!("expected put, got {:?}", cli.command);
        };
        assert_eq!(args.keys, ["a", "b"]);
        assert_eq!(args.status, 203);
        assert_eq!(args.headers.len(), 2);
        assert!(args.body.is_none());
    }

    #[test]
    fn invalidate_requires_a_key() {
        assert!(Cli::try_parse_from(["httpcache-disk", "invalidate"]).is_err());
    }
}
