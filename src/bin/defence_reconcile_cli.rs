use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use defence_reconcile::alignment::LengthRatioFilter;
use defence_reconcile::config::{MissingInputPolicy, ReconcileConfig};
use defence_reconcile::consensus::profile::{write_profile_file, GenomeEvidencePaths, PROFILE_SUFFIX};
use defence_reconcile::consensus::{OutcomePolicy, OutcomeRule};
use defence_reconcile::curation::write_pattern_template;
use defence_reconcile::error::Result;
use defence_reconcile::prefix::{prefix_directory, prefix_file};
use defence_reconcile::{export_pattern_file, finalize_corpus, Reconciler};

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

#[derive(Parser)]
#[command(name = "defence-reconcile")]
#[command(version)]
#[command(about = "Reconcile defence-system calls from two detectors and reciprocal alignments")]
#[command(long_about = r#"
Per genome, the calls of detector A (PADLOC-style CSV), detector B
(DefenseFinder-style TSV) and forward/reverse best-hit alignment tables are
mapped to canonical (type, subtype, outcome) triples and merged into a
consensus profile. Conflicting patterns are exported once for curation, and
the curated file gates the final genome x defence-system matrix.

Typical run:
  defence-reconcile corpus -k master_key.tsv -i inputs/ -o profiles/
  defence-reconcile export-patterns -p profiles/ -o patterns.csv
  (fill TYPE, SUBTYPE, OUTCOME in patterns.csv)
  defence-reconcile build-matrix -p profiles/ -c patterns.csv -o results/corpus
"#)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct RunOptions {
    /// Master key TSV (long `tool,label,type,subtype,outcome` or wide layout)
    #[arg(short = 'k', long = "master-key", value_name = "FILE", help_heading = "Input")]
    master_key: PathBuf,

    /// Treat missing evidence files as empty instead of failing the genome
    #[arg(long, help_heading = "Input")]
    tolerant: bool,

    /// Extra base names that keep a trailing `_1` (DISARM and PD-T7-5 always do)
    #[arg(long = "keep-suffix", value_name = "NAME", help_heading = "Naming")]
    keep_suffix: Vec<String>,

    /// Outcome priority, highest first, e.g. `a,b,forward,reverse`
    #[arg(long = "outcome-priority", value_name = "LIST", help_heading = "Consensus")]
    outcome_priority: Option<String>,

    /// Take the outcome of the highest-priority source instead of the majority
    #[arg(long = "priority-only", help_heading = "Consensus")]
    priority_only: bool,

    /// Keep alignment-only evidence regardless of length consistency
    #[arg(long = "no-length-filter", help_heading = "Consensus")]
    no_length_filter: bool,

    #[arg(long = "length-min", value_name = "RATIO", default_value = "0.8", help_heading = "Consensus")]
    length_min: f64,

    #[arg(long = "length-max", value_name = "RATIO", default_value = "1.25", help_heading = "Consensus")]
    length_max: f64,
}

impl RunOptions {
    fn config(&self) -> Result<ReconcileConfig> {
        let mut config = ReconcileConfig::default();
        config.suffix_exceptions.extend(self.keep_suffix.iter().cloned());
        if self.tolerant {
            config.missing_inputs = MissingInputPolicy::TreatAsEmpty;
        }
        let mut policy = OutcomePolicy::default();
        if let Some(list) = &self.outcome_priority {
            policy.priority = OutcomePolicy::parse_priority(list)?;
        }
        if self.priority_only {
            policy.rule = OutcomeRule::PriorityOnly;
        }
        config.outcome_policy = policy;
        config.blast_only_filter = (!self.no_length_filter).then_some(LengthRatioFilter {
            min: self.length_min,
            max: self.length_max,
        });
        Ok(config)
    }

    fn reconciler(&self) -> Result<Reconciler> {
        Reconciler::open(&self.master_key, self.config()?)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Build the consensus profile of one genome
    Profile {
        #[arg(short = 'g', long, value_name = "ID")]
        genome: String,
        #[arg(short = 'a', long = "detector-a", value_name = "FILE")]
        detector_a: PathBuf,
        #[arg(short = 'b', long = "detector-b", value_name = "FILE")]
        detector_b: PathBuf,
        #[arg(short = 'f', long, value_name = "FILE")]
        forward: PathBuf,
        #[arg(short = 'r', long, value_name = "FILE")]
        reverse: PathBuf,
        #[arg(short = 'o', long, value_name = "DIR", default_value = ".")]
        output: PathBuf,
        #[command(flatten)]
        options: RunOptions,
    },
    /// Build consensus profiles for every genome of an input directory
    Corpus {
        #[arg(short = 'i', long, value_name = "DIR")]
        input: PathBuf,
        #[arg(short = 'o', long, value_name = "DIR")]
        output: PathBuf,
        /// Restrict the run to these genomes (default: all found in the input)
        #[arg(short = 'g', long = "genome", value_name = "ID")]
        genomes: Vec<String>,
        /// Also write the curation template here
        #[arg(long, value_name = "FILE")]
        patterns: Option<PathBuf>,
        #[arg(short = 't', long, value_name = "N")]
        threads: Option<usize>,
        #[command(flatten)]
        options: RunOptions,
    },
    /// Write the unique CONFLICT/UNRESOLVED evidence patterns for curation
    ExportPatterns {
        #[arg(short = 'p', long, value_name = "DIR")]
        profiles: PathBuf,
        #[arg(short = 'o', long, value_name = "FILE")]
        output: PathBuf,
        #[arg(short = 'e', long, value_name = "N", default_value = "5")]
        examples: usize,
    },
    /// Merge curated patterns and write the genome x defence-system matrix
    BuildMatrix {
        #[arg(short = 'p', long, value_name = "DIR")]
        profiles: PathBuf,
        #[arg(short = 'c', long, value_name = "FILE")]
        curated: PathBuf,
        /// Output prefix; writes <prefix>_matrix.csv, _counts.csv, _summary.csv, _annotations.csv
        #[arg(short = 'o', long, value_name = "PREFIX")]
        output: PathBuf,
    },
    /// Prefix protein ids in FASTA and detector files with their genome id
    Prefix {
        #[arg(value_name = "FILE", required_unless_present = "directory")]
        files: Vec<PathBuf>,
        /// Genome id (default: inferred from each file name)
        #[arg(short = 'g', long, value_name = "ID")]
        genome: Option<String>,
        /// Prefix every .faa file here and the detector files of each
        /// `<genome>_TOOLOUTPUTS` subdirectory
        #[arg(short = 'd', long, value_name = "DIR", conflicts_with_all = ["files", "genome"])]
        directory: Option<PathBuf>,
    },
}

fn spinner(colour: &str, msg: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let template = format!("{{spinner:.{colour}}} {{msg}}");
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(TICKS)
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(msg.into());
    spinner
}

fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut path = prefix.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Profile {
            genome,
            detector_a,
            detector_b,
            forward,
            reverse,
            output,
            options,
        } => {
            let reconciler = options.reconciler()?;
            let bar = spinner("blue", format!("Reconciling {genome}..."));
            let paths = GenomeEvidencePaths {
                detector_a,
                detector_b,
                forward,
                reverse,
            };
            let profile = reconciler.reconcile_genome(&genome, &paths)?;
            std::fs::create_dir_all(&output)?;
            let out = output.join(format!("{genome}{PROFILE_SUFFIX}"));
            write_profile_file(&out, &profile.resolutions)?;
            bar.finish_with_message(format!(
                "{}: {} proteins ({}) -> {}",
                genome,
                profile.resolutions.len(),
                profile.status_counts(),
                out.display()
            ));
        }
        Command::Corpus {
            input,
            output,
            genomes,
            patterns,
            threads,
            options,
        } => {
            let reconciler = options.reconciler()?;
            let genomes = if genomes.is_empty() {
                reconciler.config.layout.discover(&input)?
            } else {
                genomes
            };

            let bar = ProgressBar::new(genomes.len() as u64);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            let ticker = bar.clone();
            let report = reconciler.reconcile_corpus(&input, &genomes, &output, threads, move |genome| {
                ticker.set_message(genome.to_string());
                ticker.inc(1);
            })?;
            bar.finish_with_message(format!(
                "{} written, {} skipped",
                report.written.len(),
                report.skipped.len()
            ));
            for skipped in &report.skipped {
                log::warn!("skipped {}: {}", skipped.genome_id, skipped.reason);
            }
            log::info!("Statuses: {}", report.statuses);

            if let Some(path) = patterns {
                let patterns = report.patterns.into_patterns();
                write_pattern_template(BufWriter::new(File::create(&path)?), &patterns)?;
                log::info!("Wrote {} patterns to {}", patterns.len(), path.display());
            }
        }
        Command::ExportPatterns {
            profiles,
            output,
            examples,
        } => {
            let bar = spinner("yellow", "Collecting unresolved patterns...");
            let patterns = export_pattern_file(&profiles, &output, examples)?;
            bar.finish_with_message(format!("{} patterns -> {}", patterns.len(), output.display()));
        }
        Command::BuildMatrix {
            profiles,
            curated,
            output,
        } => {
            let bar = spinner("cyan", "Merging curated patterns...");
            let finalized = finalize_corpus(&profiles, &curated)?;
            if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            let matrix = &finalized.matrix;
            matrix.write_presence(BufWriter::new(File::create(with_suffix(&output, "_matrix.csv"))?))?;
            matrix.write_counts(BufWriter::new(File::create(with_suffix(&output, "_counts.csv"))?))?;
            matrix.write_summary(BufWriter::new(File::create(with_suffix(&output, "_summary.csv"))?))?;
            write_profile_file(&with_suffix(&output, "_annotations.csv"), &finalized.resolutions)?;
            bar.finish_with_message(format!(
                "{} genomes x {} defence systems",
                matrix.rows.len(),
                matrix.columns.len()
            ));
        }
        Command::Prefix {
            directory: Some(dir), ..
        } => {
            let defaults = ReconcileConfig::default();
            let results = prefix_directory(&dir, &defaults.detector_a, &defaults.detector_b)?;
            let mut failed = 0;
            for (file, outcome) in &results {
                match outcome {
                    Ok(stats) => println!(
                        "{}: updated {}/{} ids",
                        file.display(),
                        stats.updated,
                        stats.records
                    ),
                    Err(e) => {
                        failed += 1;
                        println!("{}: failed: {e}", file.display());
                    }
                }
            }
            println!("{}/{} files prefixed", results.len() - failed, results.len());
        }
        Command::Prefix { files, genome, .. } => {
            let defaults = ReconcileConfig::default();
            for file in &files {
                let stats = prefix_file(file, genome.as_deref(), &defaults.detector_a, &defaults.detector_b)?;
                println!(
                    "{}: updated {}/{} ids",
                    file.display(),
                    stats.updated,
                    stats.records
                );
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
