use anyhow::Context;
use clap::{Parser, Subcommand};
use nbdap::config::Settings;
use nbdap::{DebuggerInfo, bootstrap, tmp};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (default: ~/.config/nbdap/settings.toml)
    #[clap(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Print capabilities announced to the front end.
    Info,
    /// Print the temporary file a cell source is dumped into.
    CellFile {
        /// File with the cell source.
        path: PathBuf,
    },
    /// Print a port the external adapter can listen on.
    FindPort,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env().init();

    let args = Args::parse();
    let settings = Settings::load(args.config.as_deref());

    match args.command {
        Command::Info => {
            let info = DebuggerInfo::current();
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Command::CellFile { path } => {
            let code = std::fs::read_to_string(&path)
                .with_context(|| format!("read cell source {}", path.display()))?;
            println!("{}", tmp::cell_tmp_file(&code).display());
        }
        Command::FindPort => {
            let port = bootstrap::find_free_port(
                &settings.host,
                settings.port_max_tries,
                settings.port_range_start,
                settings.port_range_end,
            )
            .context("find a free port")?;
            println!("{port}");
        }
    }
    Ok(())
}
