use clap::Parser;
use mcnbt::{aggregate, bind, parse_file_with, Settings};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const DEFAULT_OUTPUT: &str = "./output.json";
/// Rendered output below this size goes to stdout when no output path was given.
const CONSOLE_LIMIT: usize = 20_000;

#[derive(Parser)]
#[command(
    name = "mcnbt",
    about = "Decode Minecraft schematics and world saves, and convert between formats"
)]
struct Cli {
    /// Schematic file, region container or world save directory
    path: PathBuf,
    /// json, canonical, litematica, worldedit, create or counts
    #[arg(long, default_value = "json")]
    format: String,
    /// Output JSON path
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
    /// Settings as a JSON object
    #[arg(long)]
    settings: Option<String>,
}

fn render(cli: &Cli, settings: &Settings) -> mcnbt::Result<serde_json::Value> {
    let decoded = parse_file_with(&cli.path, settings)?;
    let value = match cli.format.to_ascii_lowercase().as_str() {
        "json" => serde_json::to_value(&decoded)?,
        "counts" => {
            let structure = bind(&decoded)?.to_canonical_with(settings)?;
            serde_json::to_value(aggregate(&structure, settings))?
        }
        target => {
            let structure = bind(&decoded)?.to_canonical_with(settings)?;
            let native = mcnbt::convert_from_canonical_with(&structure, target, settings)?;
            serde_json::to_value(&native)?
        }
    };
    Ok(value)
}

fn run(cli: &Cli) -> mcnbt::Result<()> {
    let settings = Settings::from_json(cli.settings.as_deref())?;
    let value = render(cli, &settings)?;
    let compact = serde_json::to_vec(&value)?;
    let pretty = serde_json::to_string_pretty(&value)?;

    if compact.len() < CONSOLE_LIMIT && cli.output == PathBuf::from(DEFAULT_OUTPUT) {
        println!("{}", pretty);
    } else {
        log::info!(
            "Output is {} bytes, saving to {}",
            compact.len(),
            cli.output.display()
        );
        std::fs::write(&cli.output, pretty)?;
        log::info!("Saved JSON to {}", cli.output.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}: {}", cli.path.display(), e);
            ExitCode::FAILURE
        }
    }
}
