use crate::commands::{run_commit, run_formats, run_preview, UploadArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use fleet_intake::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Fleet Intake",
    about = "Preview, commit, and serve broker manifest and trip log uploads",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Parse and classify a file without writing anything
    Preview(UploadArgs),
    /// Import a file into its partition and print the completeness result
    Commit(UploadArgs),
    /// List the recognized formats and the columns the active policy keeps
    Formats,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Preview(args) => run_preview(args),
        Command::Commit(args) => run_commit(args),
        Command::Formats => run_formats(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["fleet-intake-api"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn commit_accepts_partition_and_force() {
        let cli = Cli::try_parse_from([
            "fleet-intake-api",
            "commit",
            "--file",
            "routelog.csv",
            "--opco",
            "NORTH",
            "--account",
            "MTM-MCD",
            "--force",
        ])
        .expect("parses");

        match cli.command {
            Some(Command::Commit(args)) => {
                assert_eq!(args.opco.as_deref(), Some("NORTH"));
                assert_eq!(args.account.as_deref(), Some("MTM-MCD"));
                assert!(args.force);
            }
            other => panic!("expected commit, got {other:?}"),
        }
    }
}
