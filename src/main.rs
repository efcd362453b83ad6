use ciphersafe::cli::commands;
use ciphersafe::cli::commands::edit::EditArgs;
use ciphersafe::cli::{Cli, Commands};
use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    ciphersafe::logging::init(cli.verbose);

    let result = match cli.command {
        Commands::Init => commands::init::execute(&cli).await,
        Commands::Add {
            ref title,
            ref username,
            ref notes,
            ref fields,
            no_password,
        } => {
            commands::add::execute(
                &cli,
                title,
                username.as_deref(),
                notes.as_deref(),
                fields,
                no_password,
            )
            .await
        }
        Commands::Get { ref record, show } => commands::get::execute(&cli, record, show).await,
        Commands::List {
            ref search,
            conflicts,
            all,
        } => commands::list::execute(&cli, search.as_deref(), conflicts, all).await,
        Commands::Edit {
            ref record,
            ref title,
            ref username,
            ref notes,
            password,
            ref fields,
            ref remove,
        } => {
            let args = EditArgs {
                title: title.as_deref(),
                username: username.as_deref(),
                notes: notes.as_deref(),
                password,
                fields,
                remove,
            };
            commands::edit::execute(&cli, record, args).await
        }
        Commands::Delete { ref record, force } => {
            commands::delete::execute(&cli, record, force).await
        }
        Commands::Purge => commands::purge::execute(&cli).await,
        Commands::Export {
            ref format,
            ref output,
            protect,
        } => commands::export::execute(&cli, format.as_deref(), output.as_deref(), protect).await,
        Commands::Import {
            ref file,
            ref format,
        } => commands::import_cmd::execute(&cli, file, format.as_deref()).await,
        Commands::Sync { watch } => commands::sync::execute(&cli, watch).await,
        Commands::Restore => commands::restore::execute(&cli).await,
        Commands::Status => commands::status::execute(&cli).await,
        Commands::Passwd => commands::passwd::execute(&cli).await,
        Commands::Wipe { force } => commands::wipe::execute(&cli, force).await,
        Commands::Audit { last, ref since } => {
            commands::audit_cmd::execute(&cli, last, since.as_deref())
        }
        Commands::Completions { ref shell } => commands::completions::execute(shell),
    };

    if let Err(e) = result {
        ciphersafe::cli::output::error(&e.to_string());
        std::process::exit(1);
    }
}
