use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::workflow::DEFAULT_BATCH_SIZE;

pub const DEFAULT_COLLECTION: &str = "seeds/inventory/drugs.json";

#[derive(Parser, Debug)]
#[command(
    name = "pharmaseed",
    version,
    about = "Pharmacy inventory seed preparation tooling"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Convert(ConvertArgs),
    Derive(DeriveArgs),
    Resolve(ResolveArgs),
    Prompts(PromptsArgs),
    Apply(ApplyArgs),
    Status(StatusArgs),
    Validate(ValidateArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Category {
    Drug,
    Consumable,
    Infusion,
    Injection,
    Ointment,
    SuspensionSyrup,
}

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Self::Drug => "Drug",
            Self::Consumable => "Consumable",
            Self::Infusion => "Infusion",
            Self::Injection => "Injection",
            Self::Ointment => "Ointment",
            Self::SuspensionSyrup => "Suspension or Syrup",
        }
    }

    pub fn default_output_name(self) -> &'static str {
        match self {
            Self::Drug => "drugs.json",
            Self::Consumable => "consumables.json",
            Self::Infusion => "infusions.json",
            Self::Injection => "injections.json",
            Self::Ointment => "ointments.json",
            Self::SuspensionSyrup => "suspensions-and-syrups.json",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum DeriveStrategy {
    Quantity,
    Convention,
}

impl DeriveStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quantity => "quantity",
            Self::Convention => "convention",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConvertArgs {
    #[arg(long, value_enum)]
    pub category: Category,

    #[arg(long)]
    pub csv: PathBuf,

    #[arg(long)]
    pub out: Option<PathBuf>,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct DeriveArgs {
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    pub collection: PathBuf,

    #[arg(long, value_enum, default_value_t = DeriveStrategy::Quantity)]
    pub strategy: DeriveStrategy,

    #[arg(long)]
    pub report_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ResolveArgs {
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    pub collection: PathBuf,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    #[arg(long, default_value = crate::oracle::DEFAULT_API_URL)]
    pub api_url: String,

    #[arg(long, default_value = crate::oracle::DEFAULT_MODEL)]
    pub model: String,

    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(long, default_value_t = false)]
    pub reresolve_all: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PromptsArgs {
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    pub collection: PathBuf,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    pub collection: PathBuf,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    #[arg(long)]
    pub batch_index: usize,

    #[arg(long)]
    pub response: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    pub collection: PathBuf,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    pub collection: PathBuf,

    #[arg(long)]
    pub report_path: Option<PathBuf>,
}
