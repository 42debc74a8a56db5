use crate::commands::{poll_submissions, sync_templates, PollArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use staffing_hr::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Staffing HR",
    about = "Run the HR records and onboarding service or drive its document workflows",
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
    /// Manage cached e-signature templates
    Templates {
        #[command(subcommand)]
        command: TemplatesCommand,
    },
    /// Inspect submissions at the e-signature provider
    Submissions {
        #[command(subcommand)]
        command: SubmissionsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum TemplatesCommand {
    /// Pull every template from the provider and print the cached rows
    Sync,
}

#[derive(Subcommand, Debug)]
enum SubmissionsCommand {
    /// Print the provider-reported status of one or more submissions
    Poll(PollArgs),
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
        Command::Templates {
            command: TemplatesCommand::Sync,
        } => sync_templates().await,
        Command::Submissions {
            command: SubmissionsCommand::Poll(args),
        } => poll_submissions(args).await,
    }
}
