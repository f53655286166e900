use clap::{ArgAction, Args, CommandFactory, Parser, Subcommand};

use pireport_server::{RESULT_LIMIT_MAX, RESULT_LIMIT_MIN};

/// Top-level CLI entry point.
#[derive(Debug, Parser)]
#[command(
    name = "pireport",
    version,
    author,
    about = "Performance indicator reporting service"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
    /// Increase logging verbosity (-v, -vv, -vvv).
    #[arg(global = true, short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub fn print_help() {
        let mut cmd = Cli::command();
        let _ = cmd.print_help();
        println!();
    }
}

/// Supported subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the pireport HTTP server.
    Serve(ServeArgs),
    /// Run a history query against the configured dataset and print JSON.
    Query(QueryArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs;

/// Filter the reporting dataset from the command line.
#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Reporting entity to match (case and whitespace insensitive).
    #[arg(long)]
    pub entity: String,
    /// PI code to match (e.g. PI2).
    #[arg(long)]
    pub pi: String,
    /// Record type filter.
    #[arg(long = "type", value_name = "TYPE")]
    pub record_type: Option<String>,
    /// Performance area filter.
    #[arg(long)]
    pub performance_area: Option<String>,
    /// Ratings filter.
    #[arg(long)]
    pub ratings: Option<String>,
    /// Exact score filter.
    #[arg(long)]
    pub score: Option<i64>,
    /// Inclusive lower year bound.
    #[arg(long)]
    pub start_year: Option<i64>,
    /// Inclusive upper year bound.
    #[arg(long)]
    pub end_year: Option<i64>,
    /// Cap the number of returned rows.
    #[arg(long, value_parser = validate_limit)]
    pub limit: Option<usize>,
    /// Pretty-print the JSON output.
    #[arg(long)]
    pub pretty: bool,
}

/// Validate row limit: must be between 1 and 1000.
pub fn validate_limit(s: &str) -> Result<usize, String> {
    let value = s
        .parse::<usize>()
        .map_err(|_| format!("invalid number: {}", s))?;

    if value < RESULT_LIMIT_MIN || value > RESULT_LIMIT_MAX {
        return Err(format!(
            "limit must be between {} and {}",
            RESULT_LIMIT_MIN, RESULT_LIMIT_MAX
        ));
    }

    Ok(value)
}
