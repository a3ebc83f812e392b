use clap::{Args, Parser, Subcommand};
use snapclass_classifiers::DeviceType;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "snapclass")]
#[command(author, version, about = "Classify images with a locally or remotely hosted model")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load the model and classify one or more images
    Classify {
        #[command(flatten)]
        model: ModelArgs,

        /// Label file (JSON array/object or one label per line)
        #[arg(short, long)]
        labels: Option<PathBuf>,

        /// Number of predictions to print per image
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Images to classify
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Load the model and print its input shape and class count
    Inspect {
        #[command(flatten)]
        model: ModelArgs,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Options shared by every subcommand that loads a model
#[derive(Args, Debug, Clone, Default)]
pub struct ModelArgs {
    /// Configuration file
    #[arg(short, long, default_value = "./snapclass.yaml")]
    pub config: PathBuf,

    /// Model location: path, http(s) URL or hf://owner/repo[@rev][/file]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Inference device: cpu, cuda[:N] or metal[:N]
    #[arg(long, value_parser = parse_device)]
    pub device: Option<DeviceType>,

    /// Skip the warm-up inference after loading
    #[arg(long)]
    pub no_warm_up: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Same syntax as the `model.device` setting
pub fn parse_device(s: &str) -> Result<DeviceType, String> {
    s.parse::<DeviceType>().map_err(|e| e.to_string())
}
