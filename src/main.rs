// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::info;
use lopper::io;
use lopper::logger;
use lopper::rule::RuleFile;
use lopper::{Options, Pipeline, PipelineContext};

/// Runs lop rule files against a system device tree.
#[derive(Debug, Parser)]
#[command(name = "lopper", version, about)]
struct Cli {
    /// The system device tree (.dts or .dtb).
    input: PathBuf,

    /// Where to write the transformed tree; the extension picks the format.
    output: Option<PathBuf>,

    /// A lop rule file. May be given more than once.
    #[arg(short = 'i', long = "input", value_name = "LOP")]
    lops: Vec<PathBuf>,

    /// An assist to load and run against --target.
    #[arg(short = 'a', long = "assist")]
    assists: Vec<String>,

    /// Extra directories to search for assists.
    #[arg(short = 'A', long = "assist-paths", value_name = "DIR")]
    assist_paths: Vec<PathBuf>,

    /// The node assists named on the command line process.
    #[arg(short = 't', long)]
    target: Option<String>,

    /// More output; repeat for more.
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Overwrite an existing output file.
    #[arg(short = 'f', long)]
    force: bool,

    /// Treat warnings and rule failures as errors.
    #[arg(long)]
    werror: bool,

    /// Run the rules without writing any file.
    #[arg(long)]
    dryrun: bool,

    /// Directory for output files named by rules.
    #[arg(short = 'O', long, default_value = ".")]
    outdir: PathBuf,

    /// Arguments passed to the assists named with -a.
    #[arg(last = true)]
    assist_args: Vec<String>,
}

impl Cli {
    fn options(&self) -> Options {
        Options {
            werror: self.werror,
            dryrun: self.dryrun,
            verbose: self.verbose,
            outdir: self.outdir.clone(),
            force: self.force,
            load_paths: self.assist_paths.clone(),
            target: self.target.clone(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.verbose).context("failed to initialise logging")?;

    if let Some(output) = &cli.output
        && output.exists()
        && !cli.force
    {
        bail!("{} exists, use --force to overwrite it", output.display());
    }

    let tree = io::read_tree(&cli.input)
        .with_context(|| format!("failed to load {}", cli.input.display()))?;
    info!("loaded {} ({} nodes)", cli.input.display(), tree.len());

    let mut pipeline = Pipeline::new(PipelineContext::new(tree, cli.options()));
    pipeline.add_assists(&cli.assists, &cli.assist_args);
    for lop in &cli.lops {
        let file = RuleFile::read(lop)
            .with_context(|| format!("failed to load rules from {}", lop.display()))?;
        pipeline.add_rules(file);
    }
    pipeline.run().context("rule processing failed")?;

    let Some(output) = &cli.output else {
        return Ok(());
    };
    if cli.dryrun {
        info!("dryrun, not writing {}", output.display());
        return Ok(());
    }
    let mut ctx = pipeline.into_context();
    if !ctx
        .write_tree(output, None)
        .with_context(|| format!("failed to write {}", output.display()))?
    {
        bail!("{} was not written", output.display());
    }
    Ok(())
}
