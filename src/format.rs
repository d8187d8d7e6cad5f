//! Turns one spot into zero or more output records under a layout mode.
//!
//! The eight modes share one skeleton and differ in how fragments are split,
//! which destination stream each record goes to, and whether quality is
//! carried. All counter updates happen here; the caller only bumps the
//! per-spot totals.

use log::error;

use crate::error::JoinError;
use crate::filter::BaseFilter;
use crate::io::RecordWriter;
use crate::source::SpotRecord;
use crate::stats::JoinStats;

/// Caller-facing knobs of a join run.
#[derive(Debug, Clone, Default)]
pub struct JoinOptions {
    /// Synthesize `<accession>.<row_id>` names instead of reading the NAME
    /// column.
    pub rowid_as_name: bool,
    /// Drop technical fragments.
    pub skip_tech: bool,
    /// Fragments shorter than this are dropped; 0 means "non-empty".
    pub min_read_len: u32,
    /// Fail the run on length-invariant violations instead of continuing.
    pub terminate_on_invalid: bool,
    /// Optional allowed-base alphabet, see [`BaseFilter`].
    pub filter_bases: Option<String>,
    /// Render ` read=<n>` in deflines.
    pub print_read_nr: bool,
    /// Repeat the name on the FASTQ separator line.
    pub print_name: bool,
}

/// Output layout: FASTQ or FASTA crossed with the four splitting strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutMode {
    FastqWholeSpot,
    FastqSplitSpot,
    FastqSplitFile,
    FastqSplit3,
    FastaWholeSpot,
    FastaSplitSpot,
    FastaSplitFile,
    FastaSplit3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Split {
    Whole,
    Spot,
    File,
    Three,
}

impl LayoutMode {
    pub fn is_fastq(self) -> bool {
        matches!(
            self,
            LayoutMode::FastqWholeSpot
                | LayoutMode::FastqSplitSpot
                | LayoutMode::FastqSplitFile
                | LayoutMode::FastqSplit3
        )
    }

    fn split(self) -> Split {
        match self {
            LayoutMode::FastqWholeSpot | LayoutMode::FastaWholeSpot => Split::Whole,
            LayoutMode::FastqSplitSpot | LayoutMode::FastaSplitSpot => Split::Spot,
            LayoutMode::FastqSplitFile | LayoutMode::FastaSplitFile => Split::File,
            LayoutMode::FastqSplit3 | LayoutMode::FastaSplit3 => Split::Three,
        }
    }

    /// Column subset a cursor needs for this mode.
    pub fn columns(self, opts: &JoinOptions) -> crate::source::ColumnSelection {
        crate::source::ColumnSelection {
            with_read_len: self.split() != Split::Whole || opts.min_read_len > 0,
            with_name: !opts.rowid_as_name,
            with_read_type: match self.split() {
                Split::Whole => false,
                Split::Three => true,
                Split::Spot | Split::File => opts.skip_tech,
            },
            with_quality: self.is_fastq(),
        }
    }

    /// Mode-specific option correction: whole-spot output never skips
    /// technical fragments, split-3 always does.
    pub fn corrected(self, opts: &JoinOptions) -> JoinOptions {
        let mut opts = opts.clone();
        match self.split() {
            Split::Whole => opts.skip_tech = false,
            Split::Three => opts.skip_tech = true,
            Split::Spot | Split::File => {}
        }
        opts
    }
}

/// One record ready for text encoding. Slices borrow from the source spot
/// and must be consumed before the cursor advances.
#[derive(Debug, Clone, Copy)]
pub struct FormattedRecord<'a> {
    pub row_id: i64,
    /// Output stream selector: 0 is the default/unpaired stream, N >= 1 a
    /// distinct per-fragment stream.
    pub dst_id: u32,
    /// 1-based fragment number; 0 suppresses the `read=` defline element.
    pub read_id: u32,
    pub name: Option<&'a str>,
    pub bases: &'a [u8],
    pub quality: Option<&'a [u8]>,
}

/// Formats `rec` under `mode`, pushing records into `out` and accumulating
/// counter deltas into `stats`. `opts` must already be mode-corrected.
pub fn format_spot<W: RecordWriter>(
    rec: &SpotRecord<'_>,
    opts: &JoinOptions,
    mode: LayoutMode,
    bases: &BaseFilter,
    stats: &mut JoinStats,
    out: &mut W,
) -> Result<(), JoinError> {
    let fastq = mode.is_fastq();
    match mode.split() {
        Split::Whole => print_whole_spot(rec, opts, fastq, 1, bases, stats, out),
        // A single-fragment spot needs no splitting; route it through the
        // whole-spot path with this mode's destination.
        Split::Spot if rec.num_reads() == 1 => print_whole_spot(rec, opts, fastq, 0, bases, stats, out),
        Split::File if rec.num_reads() == 1 => print_whole_spot(rec, opts, fastq, 1, bases, stats, out),
        Split::Three if rec.num_reads() == 1 => print_whole_spot(rec, opts, fastq, 0, bases, stats, out),
        Split::Spot => print_split_spot(rec, opts, fastq, bases, stats, out),
        Split::File => print_split_file(rec, opts, fastq, bases, stats, out),
        Split::Three => print_split_3(rec, opts, fastq, bases, stats, out),
    }
}

/// Unsplit FASTA emission for the shared-sink fast path: every surviving
/// fragment goes to destination 0 with no read numbering and no base filter.
pub fn format_spot_unsplit<W: RecordWriter>(
    rec: &SpotRecord<'_>,
    opts: &JoinOptions,
    stats: &mut JoinStats,
    out: &mut W,
) -> Result<(), JoinError> {
    check_declared_len(rec, opts, stats)?;

    let mut offset = 0usize;
    for idx in 0..rec.num_reads() {
        let len = rec.read_len[idx] as usize;
        if len == 0 {
            stats.reads_zero_length += 1;
            continue;
        }
        if filter_fragment(rec, opts, idx, stats) {
            out.write_record(&FormattedRecord {
                row_id: rec.row_id,
                dst_id: 0,
                read_id: 0,
                name: rec.name,
                bases: clamp_slice(rec.read, offset, len),
                quality: None,
            })?;
            stats.reads_written += 1;
        }
        offset += len;
    }
    Ok(())
}

/// READ and QUALITY must be the same length (I1).
fn check_quality_len(
    rec: &SpotRecord<'_>,
    opts: &JoinOptions,
    stats: &mut JoinStats,
) -> Result<(), JoinError> {
    let quality_len = rec.quality.map_or(0, <[u8]>::len);
    if rec.read.len() != quality_len {
        error!(
            "row #{}: READ.len({}) != QUALITY.len({})",
            rec.row_id,
            rec.read.len(),
            quality_len
        );
        stats.reads_invalid += 1;
        if opts.terminate_on_invalid {
            return Err(JoinError::InvalidSpot { row_id: rec.row_id });
        }
    }
    Ok(())
}

/// READ must hold as many bases as READ_LEN declares (I2).
fn check_declared_len(
    rec: &SpotRecord<'_>,
    opts: &JoinOptions,
    stats: &mut JoinStats,
) -> Result<(), JoinError> {
    let declared = rec.declared_len();
    if rec.read.len() as u64 != declared {
        error!(
            "row #{}: READ.len({}) != sum(READ_LEN)({})",
            rec.row_id,
            rec.read.len(),
            declared
        );
        stats.reads_invalid += 1;
        if opts.terminate_on_invalid {
            return Err(JoinError::InvalidSpot { row_id: rec.row_id });
        }
    }
    Ok(())
}

/// Whole-spot gate: length first, then the technical check on the leading
/// fragment.
fn filter_whole(rec: &SpotRecord<'_>, opts: &JoinOptions, stats: &mut JoinStats) -> bool {
    let len = rec.read.len() as u32;
    let mut process = if opts.min_read_len > 0 {
        len >= opts.min_read_len
    } else {
        len > 0
    };
    if !process {
        stats.reads_too_short += 1;
    } else if opts.skip_tech {
        process = rec.is_biological(0);
        if !process {
            stats.reads_technical += 1;
        }
    }
    process
}

/// Per-fragment gate: technical check first, then length.
fn filter_fragment(
    rec: &SpotRecord<'_>,
    opts: &JoinOptions,
    idx: usize,
    stats: &mut JoinStats,
) -> bool {
    if opts.skip_tech && !rec.is_biological(idx) {
        stats.reads_technical += 1;
        return false;
    }
    let len = rec.read_len[idx];
    let process = if opts.min_read_len > 0 {
        len >= opts.min_read_len
    } else {
        len > 0
    };
    if !process {
        stats.reads_too_short += 1;
    }
    process
}

/// Slices `buf[offset .. offset + len]`, clamped so declared lengths beyond
/// the buffer (possible on invalid spots in non-strict runs) stay in bounds.
fn clamp_slice(buf: &[u8], offset: usize, len: usize) -> &[u8] {
    let start = offset.min(buf.len());
    let end = offset.saturating_add(len).min(buf.len());
    &buf[start..end]
}

fn print_whole_spot<W: RecordWriter>(
    rec: &SpotRecord<'_>,
    opts: &JoinOptions,
    fastq: bool,
    dst_id: u32,
    bases: &BaseFilter,
    stats: &mut JoinStats,
    out: &mut W,
) -> Result<(), JoinError> {
    if fastq {
        check_quality_len(rec, opts, stats)?;
    }
    if filter_whole(rec, opts, stats) && bases.accepts(rec.read) {
        out.write_record(&FormattedRecord {
            row_id: rec.row_id,
            dst_id,
            read_id: 1,
            name: rec.name,
            bases: rec.read,
            quality: if fastq { rec.quality } else { None },
        })?;
        stats.reads_written += 1;
    }
    Ok(())
}

fn print_split_spot<W: RecordWriter>(
    rec: &SpotRecord<'_>,
    opts: &JoinOptions,
    fastq: bool,
    bases: &BaseFilter,
    stats: &mut JoinStats,
    out: &mut W,
) -> Result<(), JoinError> {
    if fastq {
        check_quality_len(rec, opts, stats)?;
    }
    check_declared_len(rec, opts, stats)?;

    let mut offset = 0usize;
    for idx in 0..rec.num_reads() {
        let len = rec.read_len[idx] as usize;
        if len == 0 {
            stats.reads_zero_length += 1;
            continue;
        }
        if filter_fragment(rec, opts, idx, stats) {
            let fragment = clamp_slice(rec.read, offset, len);
            if bases.accepts(fragment) {
                // The whole-spot composition is tested a second time before
                // this layout emits; a fragment that passes alone but sits in
                // a rejected spot is counted as written without being emitted.
                if bases.accepts(rec.read) {
                    out.write_record(&FormattedRecord {
                        row_id: rec.row_id,
                        dst_id: 0,
                        read_id: idx as u32 + 1,
                        name: rec.name,
                        bases: fragment,
                        quality: fastq
                            .then(|| rec.quality.map(|q| clamp_slice(q, offset, len)))
                            .flatten(),
                    })?;
                }
                stats.reads_written += 1;
            }
        }
        offset += len;
    }
    Ok(())
}

fn print_split_file<W: RecordWriter>(
    rec: &SpotRecord<'_>,
    opts: &JoinOptions,
    fastq: bool,
    bases: &BaseFilter,
    stats: &mut JoinStats,
    out: &mut W,
) -> Result<(), JoinError> {
    if fastq {
        check_quality_len(rec, opts, stats)?;
    }
    check_declared_len(rec, opts, stats)?;

    let mut offset = 0usize;
    let mut dst_id = 1u32;
    for idx in 0..rec.num_reads() {
        let len = rec.read_len[idx] as usize;
        if len == 0 {
            stats.reads_zero_length += 1;
        } else {
            if filter_fragment(rec, opts, idx, stats) {
                let fragment = clamp_slice(rec.read, offset, len);
                if bases.accepts(fragment) {
                    out.write_record(&FormattedRecord {
                        row_id: rec.row_id,
                        dst_id,
                        read_id: idx as u32 + 1,
                        name: rec.name,
                        bases: fragment,
                        quality: fastq
                            .then(|| rec.quality.map(|q| clamp_slice(q, offset, len)))
                            .flatten(),
                    })?;
                    stats.reads_written += 1;
                }
            }
            offset += len;
        }
        // every fragment owns a destination slot, emitted or not
        dst_id += 1;
    }
    Ok(())
}

fn print_split_3<W: RecordWriter>(
    rec: &SpotRecord<'_>,
    opts: &JoinOptions,
    fastq: bool,
    bases: &BaseFilter,
    stats: &mut JoinStats,
    out: &mut W,
) -> Result<(), JoinError> {
    if fastq {
        check_quality_len(rec, opts, stats)?;
    }

    let mut valid_reads = 0u32;
    let mut valid_bio_reads = 0u32;
    for idx in 0..rec.num_reads() {
        let len = rec.read_len[idx];
        if len > 0 {
            valid_reads += 1;
            if rec.is_biological(idx) && (opts.min_read_len == 0 || len >= opts.min_read_len) {
                valid_bio_reads += 1;
            }
        }
    }

    check_declared_len(rec, opts, stats)?;

    if valid_reads == 0 {
        return Ok(());
    }

    let mut offset = 0usize;
    let mut dst_id = 1u32;
    for idx in 0..rec.num_reads() {
        let len = rec.read_len[idx] as usize;
        if len == 0 {
            stats.reads_zero_length += 1;
            continue;
        }
        if filter_fragment(rec, opts, idx, stats) {
            let fragment = clamp_slice(rec.read, offset, len);
            if bases.accepts(fragment) {
                // fewer than two pairable fragments: everything goes unpaired
                if valid_bio_reads < 2 {
                    dst_id = 0;
                }
                out.write_record(&FormattedRecord {
                    row_id: rec.row_id,
                    dst_id,
                    read_id: idx as u32 + 1,
                    name: rec.name,
                    bases: fragment,
                    quality: fastq
                        .then(|| rec.quality.map(|q| clamp_slice(q, offset, len)))
                        .flatten(),
                })?;
                stats.reads_written += 1;
            }
            if dst_id > 0 {
                dst_id += 1;
            }
        }
        offset += len;
    }
    Ok(())
}
