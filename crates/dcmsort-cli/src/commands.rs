use clap::{Args, Parser, Subcommand};
use dcmsort_core::AppConfig;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "dcmsort")]
#[command(about = "Sort imaging records into series and plan their conversion", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Group inputs, write or reuse conversion plans, and convert
    Convert {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        output: ConvertArgs,
    },
    /// List the study sessions found under each input
    Ls {
        #[command(flatten)]
        input: InputArgs,
    },
    /// Show what a heuristic provides
    Heuristic {
        /// Heuristic file, or `convertall`
        heuristic: Option<String>,
    },
    /// Print configuration values
    PrintConfig,
}

/// Where inputs come from and how they are grouped.
#[derive(Debug, Args)]
pub struct InputArgs {
    /// Files or directories to scan
    pub files: Vec<PathBuf>,
    /// Output directory for plans (and converted data unless --conv-outdir)
    #[arg(short, long)]
    pub outdir: Option<PathBuf>,
    /// Input location template containing {subject}, e.g. /data/{subject}/*.tar
    #[arg(short, long)]
    pub dicom_dir_template: Option<String>,
    /// Subject ids to expand the template with
    #[arg(short, long, num_args = 1..)]
    pub subjects: Vec<String>,
    /// Session id
    #[arg(long = "ses")]
    pub session: Option<String>,
    /// Heuristic file, or `convertall`
    #[arg(short = 'f', long)]
    pub heuristic: Option<String>,
    /// studyUID, accession_number or none
    #[arg(short, long)]
    pub grouping: Option<String>,
    /// Glob of paths to skip while walking directories
    #[arg(long = "ignore")]
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// dcm2niix or none
    #[arg(short, long)]
    pub converter: Option<String>,
    /// Output directory for converted data
    #[arg(long)]
    pub conv_outdir: Option<PathBuf>,
    /// Command mapping a subject id to its anonymized id
    #[arg(short, long)]
    pub anon_cmd: Option<String>,
    /// Lay out converted data as BIDS
    #[arg(short, long)]
    pub bids: bool,
    /// Replace existing outputs
    #[arg(long)]
    pub overwrite: bool,
}

impl InputArgs {
    /// Command-line values take precedence over the loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if !self.files.is_empty() {
            config.files = self.files.clone();
        }
        if let Some(outdir) = &self.outdir {
            config.outdir = outdir.clone();
        }
        if self.dicom_dir_template.is_some() {
            config.dicom_dir_template = self.dicom_dir_template.clone();
        }
        if !self.subjects.is_empty() {
            config.subjects = self.subjects.clone();
        }
        if self.session.is_some() {
            config.session = self.session.clone();
        }
        if self.heuristic.is_some() {
            config.heuristic = self.heuristic.clone();
        }
        if let Some(grouping) = &self.grouping {
            config.grouping = grouping.clone();
        }
        if !self.ignore_patterns.is_empty() {
            config.ignore_patterns = self.ignore_patterns.clone();
        }
    }
}

impl ConvertArgs {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(converter) = &self.converter {
            config.converter = converter.clone();
        }
        if self.conv_outdir.is_some() {
            config.conv_outdir = self.conv_outdir.clone();
        }
        if self.anon_cmd.is_some() {
            config.anon_cmd = self.anon_cmd.clone();
        }
        config.bids |= self.bids;
        config.overwrite |= self.overwrite;
    }
}
