//! The join driver: probes the table, partitions its row range over worker
//! threads, runs the cursor → formatter → writer pipeline in each, and merges
//! the per-thread counters once everyone is done.

use indicatif::ProgressBar;
use log::warn;
use rayon::prelude::*;
use std::path::Path;

use crate::error::JoinError;
use crate::filter::BaseFilter;
use crate::format::{format_spot, format_spot_unsplit, JoinOptions, LayoutMode};
use crate::io::{PartitionWriter, RecordWriter, TempRegistry};
use crate::multi_writer::{MultiWriter, MultiWriterClient};
use crate::source::{ColumnSelection, SpotCursor, SpotTable};
use crate::stats::{JoinStats, QuitFlag};

/// Byte-block capacity of the fast path's shared queue.
const SHARED_QUEUE_BLOCKS: usize = 200;

/// Default per-destination write buffer.
pub const DEFAULT_BUF_SIZE: usize = 1024 * 1024;

/// One worker's slice of the row range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Partition {
    thread_id: u32,
    first_row: i64,
    row_count: u64,
}

/// Splits `row_count` rows into at most `num_threads` contiguous partitions
/// of ceil(rows / threads) rows each. Trailing partitions that would be empty
/// are not produced, shrinking the effective thread count.
fn partition_rows(row_count: u64, num_threads: usize) -> Vec<Partition> {
    let threads = num_threads.max(1) as u64;
    let rows_per_thread = row_count.div_ceil(threads);
    let mut parts = Vec::new();
    let mut first_row = 1i64;
    let mut remaining = row_count;
    while remaining > 0 {
        let take = rows_per_thread.min(remaining);
        parts.push(Partition {
            thread_id: parts.len() as u32,
            first_row,
            row_count: take,
        });
        first_row += take as i64;
        remaining -= take;
    }
    parts
}

/// Drives one table through the pipeline. Configure with the builder-style
/// setters, then call [`run_partitioned`](Extractor::run_partitioned) or
/// [`run_fast`](Extractor::run_fast).
pub struct Extractor<'a, T> {
    table: &'a T,
    accession: String,
    num_threads: usize,
    buf_size: usize,
    progress: Option<ProgressBar>,
    external_quit: Option<&'a QuitFlag>,
}

impl<'a, T: SpotTable + Sync> Extractor<'a, T> {
    pub fn new(table: &'a T, accession: &str) -> Self {
        Self {
            table,
            accession: accession.to_string(),
            num_threads: 1,
            buf_size: DEFAULT_BUF_SIZE,
            progress: None,
            external_quit: None,
        }
    }

    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    pub fn buf_size(mut self, buf_size: usize) -> Self {
        self.buf_size = buf_size.max(1);
        self
    }

    /// Bumped once per processed spot across all workers.
    pub fn progress(mut self, progress: Option<ProgressBar>) -> Self {
        self.progress = progress;
        self
    }

    /// Lets the caller cancel the run (e.g. from a signal handler). Workers
    /// poll it at spot boundaries and stop without error.
    pub fn quit_flag(mut self, quit: &'a QuitFlag) -> Self {
        self.external_quit = Some(quit);
        self
    }

    /// Runs the partitioned join: every worker writes its own part files into
    /// `temp_dir` and registers them with `registry` for later stitching.
    /// Counters land in `stats` even when the run fails.
    pub fn run_partitioned(
        &self,
        mode: LayoutMode,
        options: &JoinOptions,
        temp_dir: &Path,
        registry: &TempRegistry,
        stats: &mut JoinStats,
    ) -> Result<(), JoinError> {
        let row_count = self.table.row_count();
        if row_count == 0 {
            return Ok(());
        }

        let opts = mode.corrected(&self.normalize_options(options));
        let cols = mode.columns(&opts);
        let parts = partition_rows(row_count, self.num_threads);
        let local_quit = QuitFlag::new();
        let quit = self.external_quit.unwrap_or(&local_quit);

        let pool = build_pool(parts.len())?;
        let results: Vec<(JoinStats, Result<(), JoinError>)> = pool.install(|| {
            parts
                .par_iter()
                .map(|part| {
                    let mut local = JoinStats::default();
                    let result = self.run_worker(
                        part, mode, &opts, cols, temp_dir, registry, quit, &mut local,
                    );
                    if result.is_err() {
                        quit.set();
                    }
                    (local, result)
                })
                .collect()
        });
        collect_results(results, stats)
    }

    /// Runs the fast path: FASTA, no splitting, all workers funneled into one
    /// shared writer aimed at `output` (stdout when `None`).
    pub fn run_fast(
        &self,
        options: &JoinOptions,
        output: Option<&Path>,
        stats: &mut JoinStats,
    ) -> Result<(), JoinError> {
        let row_count = self.table.row_count();
        if row_count == 0 {
            return Ok(());
        }

        let opts = self.normalize_options(options);
        let cols = ColumnSelection {
            with_read_len: true,
            with_name: !opts.rowid_as_name,
            with_read_type: opts.skip_tech,
            with_quality: false,
        };
        let parts = partition_rows(row_count, self.num_threads);
        let local_quit = QuitFlag::new();
        let quit = self.external_quit.unwrap_or(&local_quit);

        let writer = MultiWriter::create(output, SHARED_QUEUE_BLOCKS)?;
        let pool = build_pool(parts.len())?;
        let results: Vec<(JoinStats, Result<(), JoinError>)> = pool.install(|| {
            parts
                .par_iter()
                .map(|part| {
                    let mut local = JoinStats::default();
                    let mut client = writer.client(&self.accession, self.buf_size);
                    let result =
                        self.run_fast_worker(part, &opts, cols, quit, &mut local, &mut client);
                    if result.is_err() {
                        quit.set();
                    }
                    (local, result)
                })
                .collect()
        });

        // producers are done; drain the queue before judging the outcome
        let drained = writer.finish();
        let run = collect_results(results, stats);
        match (run, drained) {
            (Ok(()), Ok(())) => Ok(()),
            // a closed queue means the consumer died first: its error is the cause
            (Err(JoinError::Worker(_)), Err(e)) => Err(e),
            (Err(e), _) => Err(e),
            (Ok(()), Err(e)) => Err(e),
        }
    }

    /// The one place options are reconciled with the table: without a NAME
    /// column, names fall back to row ids.
    fn normalize_options(&self, options: &JoinOptions) -> JoinOptions {
        let mut opts = options.clone();
        if !self.table.has_name_column() && !opts.rowid_as_name {
            warn!("table has no NAME column, using row ids as names");
            opts.rowid_as_name = true;
        }
        opts
    }

    #[allow(clippy::too_many_arguments)]
    fn run_worker(
        &self,
        part: &Partition,
        mode: LayoutMode,
        opts: &JoinOptions,
        cols: ColumnSelection,
        temp_dir: &Path,
        registry: &TempRegistry,
        quit: &QuitFlag,
        stats: &mut JoinStats,
    ) -> Result<(), JoinError> {
        let bases = BaseFilter::new(opts.filter_bases.as_deref());
        let mut writer = PartitionWriter::new(
            temp_dir,
            &self.accession,
            part.thread_id,
            self.buf_size,
            mode.is_fastq(),
            opts,
            registry,
        );
        let mut cursor = self
            .table
            .open_cursor(part.first_row, part.row_count, cols)?;

        while !quit.get() {
            let Some(next) = cursor.next_spot() else { break };
            let rec = next?;
            stats.spots_read += 1;
            stats.reads_read += rec.num_reads() as u64;
            format_spot(&rec, opts, mode, &bases, stats, &mut writer)?;
            if let Some(progress) = &self.progress {
                progress.inc(1);
            }
        }
        writer.finish()
    }

    fn run_fast_worker(
        &self,
        part: &Partition,
        opts: &JoinOptions,
        cols: ColumnSelection,
        quit: &QuitFlag,
        stats: &mut JoinStats,
        client: &mut MultiWriterClient,
    ) -> Result<(), JoinError> {
        let mut cursor = self
            .table
            .open_cursor(part.first_row, part.row_count, cols)?;

        while !quit.get() {
            let Some(next) = cursor.next_spot() else { break };
            let rec = next?;
            stats.spots_read += 1;
            stats.reads_read += rec.num_reads() as u64;
            format_spot_unsplit(&rec, opts, stats, client)?;
            if let Some(progress) = &self.progress {
                progress.inc(1);
            }
        }
        client.finish()
    }
}

fn build_pool(num_threads: usize) -> Result<rayon::ThreadPool, JoinError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|e| JoinError::Worker(e.to_string()))
}

/// Merges every worker's counters and keeps the error from the lowest thread
/// id, matching the join order of the original.
fn collect_results(
    results: Vec<(JoinStats, Result<(), JoinError>)>,
    stats: &mut JoinStats,
) -> Result<(), JoinError> {
    let mut first_err = None;
    for (local, result) in results {
        stats.merge(&local);
        if first_err.is_none() {
            first_err = result.err();
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
