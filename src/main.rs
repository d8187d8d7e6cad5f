use anyhow::{Context, Result};
use clap::Parser;
use indicatif::ProgressBar;
use std::fs;
use std::path::PathBuf;

use spotdump::extract::{Extractor, DEFAULT_BUF_SIZE};
use spotdump::format::{JoinOptions, LayoutMode};
use spotdump::io::TempRegistry;
use spotdump::source::SpotTable;
use spotdump::stats::JoinStats;
use spotdump::table::FlatTable;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Dump the spots of a flat sequence table as FASTQ or FASTA"
)]
struct Args {
    /// Input table dump (tab-separated, one spot per line)
    #[arg(short, long)]
    input: PathBuf,

    /// Accession used for synthesized names and output file names
    /// (defaults to the input file stem)
    #[arg(short, long)]
    accession: Option<String>,

    /// Directory for the final output files
    #[arg(short, long, default_value = ".")]
    outdir: PathBuf,

    /// Emit FASTA instead of FASTQ
    #[arg(long)]
    fasta: bool,

    /// One record per fragment instead of one per spot
    #[arg(long, conflicts_with_all = ["split_files", "split_3"])]
    split_spot: bool,

    /// One output file per fragment index
    #[arg(long, conflicts_with = "split_3")]
    split_files: bool,

    /// Paired fragments into _1/_2 files, everything else unpaired
    #[arg(long)]
    split_3: bool,

    /// Funnel all fragments into a single unsplit FASTA file
    #[arg(long, conflicts_with_all = ["fasta", "split_spot", "split_files", "split_3"])]
    fast: bool,

    /// With --fast, write to stdout instead of a file
    #[arg(long, requires = "fast")]
    stdout: bool,

    /// Drop fragments shorter than this
    #[arg(long, default_value_t = 0)]
    min_read_len: u32,

    /// Drop technical fragments (adapters, barcodes)
    #[arg(long)]
    skip_technical: bool,

    /// Emit only reads made of these bases (e.g. ACGT)
    #[arg(long)]
    filter_bases: Option<String>,

    /// Synthesize names from row ids even when the table has names
    #[arg(long)]
    rowid_as_name: bool,

    /// Append read=<n> to deflines
    #[arg(long)]
    print_read_nr: bool,

    /// Repeat the name on the FASTQ separator line
    #[arg(long)]
    print_name: bool,

    /// Fail on spots whose declared lengths do not match the data
    #[arg(long)]
    strict: bool,

    /// Worker threads (defaults to the number of CPUs)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Per-destination write buffer in bytes
    #[arg(long, default_value_t = DEFAULT_BUF_SIZE)]
    buf_size: usize,

    /// Show a progress bar
    #[arg(long)]
    progress: bool,

    /// Print elapsed time
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn layout(&self) -> LayoutMode {
        match (self.fasta, self.split_spot, self.split_files, self.split_3) {
            (false, true, _, _) => LayoutMode::FastqSplitSpot,
            (false, _, true, _) => LayoutMode::FastqSplitFile,
            (false, _, _, true) => LayoutMode::FastqSplit3,
            (false, false, false, false) => LayoutMode::FastqWholeSpot,
            (true, true, _, _) => LayoutMode::FastaSplitSpot,
            (true, _, true, _) => LayoutMode::FastaSplitFile,
            (true, _, _, true) => LayoutMode::FastaSplit3,
            (true, false, false, false) => LayoutMode::FastaWholeSpot,
        }
    }

    fn join_options(&self) -> JoinOptions {
        JoinOptions {
            rowid_as_name: self.rowid_as_name,
            skip_tech: self.skip_technical,
            min_read_len: self.min_read_len,
            terminate_on_invalid: self.strict,
            filter_bases: self.filter_bases.clone(),
            print_read_nr: self.print_read_nr,
            print_name: self.print_name,
        }
    }

    fn accession(&self) -> String {
        match &self.accession {
            Some(accession) => accession.clone(),
            None => self
                .input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "spots".to_string()),
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let table = FlatTable::from_path(&args.input)?;
    let accession = args.accession();
    let threads = args.threads.unwrap_or_else(num_cpus::get).max(1);
    let options = args.join_options();

    let start = std::time::Instant::now();
    let progress = args.progress.then(|| ProgressBar::new(table.row_count()));

    let extractor = Extractor::new(&table, &accession)
        .num_threads(threads)
        .buf_size(args.buf_size)
        .progress(progress.clone());

    let mut stats = JoinStats::default();
    if args.fast {
        let output = if args.stdout {
            None
        } else {
            fs::create_dir_all(&args.outdir)
                .with_context(|| format!("Failed to create {}", args.outdir.display()))?;
            Some(args.outdir.join(format!("{accession}.fasta")))
        };
        extractor.run_fast(&options, output.as_deref(), &mut stats)?;
    } else {
        let mode = args.layout();
        fs::create_dir_all(&args.outdir)
            .with_context(|| format!("Failed to create {}", args.outdir.display()))?;
        let temp_dir = args
            .outdir
            .join(format!(".{accession}.{}.tmp", std::process::id()));
        fs::create_dir_all(&temp_dir)
            .with_context(|| format!("Failed to create {}", temp_dir.display()))?;

        let registry = TempRegistry::new();
        let run = extractor.run_partitioned(mode, &options, &temp_dir, &registry, &mut stats);
        let concat = run.is_ok().then(|| {
            let extension = if mode.is_fastq() { "fastq" } else { "fasta" };
            registry.concatenate(&args.outdir, &accession, extension)
        });
        let _ = fs::remove_dir_all(&temp_dir);
        run?;
        if let Some(concat) = concat {
            concat?;
        }
    }

    if let Some(progress) = progress {
        progress.finish_and_clear();
    }

    let elapsed = start.elapsed();

    // Tab-separated summary, input name first for aggregation in shell loops
    let fname = args
        .input
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.input.to_string_lossy().into_owned());
    println!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        fname,
        stats.spots_read,
        stats.reads_read,
        stats.reads_written,
        stats.reads_zero_length,
        stats.reads_too_short,
        stats.reads_technical,
        stats.reads_invalid
    );

    if args.verbose {
        eprintln!("Elapsed: {:.3}s", elapsed.as_secs_f64());
    }

    Ok(())
}
