use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "live-baseline",
    version,
    about = "Hourly dynamic baseline and diagnosis for live-commerce metrics"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Init(InitArgs),
    Diagnose(DiagnoseArgs),
    Export(ExportArgs),
    Status(StatusArgs),
    Errors(ErrorsArgs),
}

#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    #[arg(long, default_value = ".cache/live-baseline")]
    pub state_dir: PathBuf,

    #[arg(long)]
    pub schema_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct InitArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[arg(long)]
    pub history: PathBuf,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DiagnoseArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[arg(long, conflicts_with = "query_path")]
    pub query: Option<String>,

    #[arg(long)]
    pub query_path: Option<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[arg(long)]
    pub output_dir: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ErrorsArgs {
    #[command(flatten)]
    pub engine: EngineArgs,

    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}
