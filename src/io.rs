//! Text encoding and the partitioned output side: per-thread part files in a
//! temp directory, collected by a registry that stitches the final outputs
//! together after the join.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::JoinError;
use crate::format::{FormattedRecord, JoinOptions};

/// The one polymorphic seam between the formatter and its output: a sink
/// that accepts formatted records and can be torn down.
pub trait RecordWriter {
    fn write_record(&mut self, rec: &FormattedRecord<'_>) -> Result<(), JoinError>;

    /// Flushes and releases whatever the sink holds. Writers stay usable in
    /// the error path, so this takes `&mut self`.
    fn finish(&mut self) -> Result<(), JoinError>;
}

/// Writes one FASTQ (four-line) or FASTA (two-line) record.
///
/// The name token is the spot name when the record carries one, else
/// `<accession>.<row_id>`; ` read=<n>` is appended only when requested and
/// the record has a nonzero read number; the FASTQ separator line repeats
/// the name token only when `print_name`.
pub fn write_record_text<W: Write>(
    out: &mut W,
    rec: &FormattedRecord<'_>,
    accession: &str,
    fastq: bool,
    print_read_nr: bool,
    print_name: bool,
) -> io::Result<()> {
    out.write_all(if fastq { b"@" } else { b">" })?;
    write_name(out, rec, accession)?;
    write!(out, " length={}", rec.bases.len())?;
    if print_read_nr && rec.read_id > 0 {
        write!(out, " read={}", rec.read_id)?;
    }
    out.write_all(b"\n")?;
    out.write_all(rec.bases)?;
    if fastq {
        out.write_all(b"\n+")?;
        if print_name {
            write_name(out, rec, accession)?;
        }
        out.write_all(b"\n")?;
        out.write_all(rec.quality.unwrap_or_default())?;
    }
    out.write_all(b"\n")
}

fn write_name<W: Write>(out: &mut W, rec: &FormattedRecord<'_>, accession: &str) -> io::Result<()> {
    match rec.name {
        Some(name) => out.write_all(name.as_bytes()),
        None => write!(out, "{accession}.{}", rec.row_id),
    }
}

/// Collects finished partition files so the final per-destination outputs can
/// be stitched together once every worker has joined.
#[derive(Debug, Default)]
pub struct TempRegistry {
    entries: Mutex<Vec<RegistryEntry>>,
}

#[derive(Debug)]
struct RegistryEntry {
    dst_id: u32,
    thread_id: u32,
    path: PathBuf,
}

impl TempRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, dst_id: u32, thread_id: u32, path: PathBuf) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RegistryEntry {
                dst_id,
                thread_id,
                path,
            });
    }

    /// Concatenates the registered parts in `(dst_id, thread_id)` order and
    /// removes them. Destination 0 becomes `<accession>.<extension>`,
    /// destination N `<accession>_N.<extension>`. Returns the files created.
    pub fn concatenate(
        &self,
        out_dir: &Path,
        accession: &str,
        extension: &str,
    ) -> Result<Vec<PathBuf>, JoinError> {
        let mut entries = std::mem::take(
            &mut *self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        entries.sort_by_key(|e| (e.dst_id, e.thread_id));

        let mut created = Vec::new();
        let mut current: Option<(u32, File)> = None;
        for entry in &entries {
            let stale = match &current {
                Some((dst, _)) => *dst != entry.dst_id,
                None => true,
            };
            if stale {
                let file_name = if entry.dst_id == 0 {
                    format!("{accession}.{extension}")
                } else {
                    format!("{accession}_{}.{extension}", entry.dst_id)
                };
                let path = out_dir.join(file_name);
                let file = File::create(&path).map_err(JoinError::WriteFail)?;
                created.push(path);
                current = Some((entry.dst_id, file));
            }
            if let Some((_, out)) = current.as_mut() {
                let mut part = File::open(&entry.path).map_err(JoinError::WriteFail)?;
                io::copy(&mut part, out).map_err(JoinError::WriteFail)?;
            }
            let _ = fs::remove_file(&entry.path);
        }
        Ok(created)
    }
}

/// Buffered per-thread partition output. One lazily created file per
/// destination id: `<temp_dir>/<accession>.<thread_id>.part` for destination
/// 0 and `<temp_dir>/<accession>_<dst>.<thread_id>.part` above it. Closing
/// registers every file with the registry.
pub struct PartitionWriter<'a> {
    temp_dir: PathBuf,
    accession: String,
    thread_id: u32,
    buf_size: usize,
    fastq: bool,
    print_read_nr: bool,
    print_name: bool,
    registry: &'a TempRegistry,
    handles: BTreeMap<u32, (PathBuf, BufWriter<File>)>,
}

impl<'a> PartitionWriter<'a> {
    pub fn new(
        temp_dir: &Path,
        accession: &str,
        thread_id: u32,
        buf_size: usize,
        fastq: bool,
        opts: &JoinOptions,
        registry: &'a TempRegistry,
    ) -> Self {
        Self {
            temp_dir: temp_dir.to_path_buf(),
            accession: accession.to_string(),
            thread_id,
            buf_size,
            fastq,
            print_read_nr: opts.print_read_nr,
            print_name: opts.print_name,
            registry,
            handles: BTreeMap::new(),
        }
    }

    fn part_path(&self, dst_id: u32) -> PathBuf {
        let file_name = if dst_id == 0 {
            format!("{}.{}.part", self.accession, self.thread_id)
        } else {
            format!("{}_{dst_id}.{}.part", self.accession, self.thread_id)
        };
        self.temp_dir.join(file_name)
    }
}

impl RecordWriter for PartitionWriter<'_> {
    fn write_record(&mut self, rec: &FormattedRecord<'_>) -> Result<(), JoinError> {
        let path = self.part_path(rec.dst_id);
        let slot = match self.handles.entry(rec.dst_id) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                let file = File::create(&path).map_err(JoinError::WriteFail)?;
                vacant.insert((path, BufWriter::with_capacity(self.buf_size, file)))
            }
        };
        write_record_text(
            &mut slot.1,
            rec,
            &self.accession,
            self.fastq,
            self.print_read_nr,
            self.print_name,
        )
        .map_err(JoinError::WriteFail)
    }

    fn finish(&mut self) -> Result<(), JoinError> {
        let thread_id = self.thread_id;
        for (dst_id, (path, mut out)) in std::mem::take(&mut self.handles) {
            out.flush().map_err(JoinError::WriteFail)?;
            drop(out);
            self.registry.register(dst_id, thread_id, path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record<'a>(bases: &'a [u8], quality: Option<&'a [u8]>) -> FormattedRecord<'a> {
        FormattedRecord {
            row_id: 7,
            dst_id: 0,
            read_id: 2,
            name: None,
            bases,
            quality,
        }
    }

    fn render(
        rec: &FormattedRecord<'_>,
        fastq: bool,
        print_read_nr: bool,
        print_name: bool,
    ) -> String {
        let mut buf = Vec::new();
        write_record_text(&mut buf, rec, "SRX1", fastq, print_read_nr, print_name).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_fastq_record_layout() {
        let rec = record(b"ACGT", Some(b"!!!!"));
        assert_eq!(
            render(&rec, true, false, false),
            "@SRX1.7 length=4\nACGT\n+\n!!!!\n"
        );
        assert_eq!(
            render(&rec, true, true, true),
            "@SRX1.7 length=4 read=2\nACGT\n+SRX1.7\n!!!!\n"
        );
    }

    #[test]
    fn test_fasta_record_layout() {
        let rec = FormattedRecord {
            name: Some("spotA"),
            ..record(b"ACGT", None)
        };
        assert_eq!(render(&rec, false, false, false), ">spotA length=4\nACGT\n");
        assert_eq!(
            render(&rec, false, true, false),
            ">spotA length=4 read=2\nACGT\n"
        );
    }

    #[test]
    fn test_read_nr_suppressed_for_zero_read_id() {
        let rec = FormattedRecord {
            read_id: 0,
            ..record(b"ACGT", None)
        };
        assert_eq!(render(&rec, false, true, false), ">SRX1.7 length=4\nACGT\n");
    }

    #[test]
    fn test_partition_writer_routes_destinations_and_registers() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TempRegistry::new();
        let opts = JoinOptions::default();
        let mut writer = PartitionWriter::new(dir.path(), "SRX1", 3, 4096, false, &opts, &registry);

        writer
            .write_record(&FormattedRecord {
                dst_id: 1,
                read_id: 1,
                ..record(b"AAAA", None)
            })
            .unwrap();
        writer
            .write_record(&FormattedRecord {
                dst_id: 2,
                read_id: 2,
                ..record(b"CCCC", None)
            })
            .unwrap();
        writer.finish().unwrap();

        let part1 = fs::read_to_string(dir.path().join("SRX1_1.3.part")).unwrap();
        assert_eq!(part1, ">SRX1.7 length=4\nAAAA\n");
        let part2 = fs::read_to_string(dir.path().join("SRX1_2.3.part")).unwrap();
        assert_eq!(part2, ">SRX1.7 length=4\nCCCC\n");

        let out = tempfile::tempdir().unwrap();
        let created = registry.concatenate(out.path(), "SRX1", "fasta").unwrap();
        assert_eq!(created.len(), 2);
        assert!(out.path().join("SRX1_1.fasta").exists());
        assert!(out.path().join("SRX1_2.fasta").exists());
        // parts are consumed
        assert!(!dir.path().join("SRX1_1.3.part").exists());
    }

    #[test]
    fn test_registry_concatenates_in_thread_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("x.1.part");
        let b = dir.path().join("x.0.part");
        fs::write(&a, "second\n").unwrap();
        fs::write(&b, "first\n").unwrap();

        let registry = TempRegistry::new();
        registry.register(0, 1, a);
        registry.register(0, 0, b);

        let out = tempfile::tempdir().unwrap();
        let created = registry.concatenate(out.path(), "x", "fasta").unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(
            fs::read_to_string(out.path().join("x.fasta")).unwrap(),
            "first\nsecond\n"
        );
    }

    #[test]
    fn test_registry_keeps_destination_suffix_for_lone_streams() {
        let dir = tempfile::tempdir().unwrap();
        let part = dir.path().join("y_1.0.part");
        fs::write(&part, "data\n").unwrap();

        let registry = TempRegistry::new();
        registry.register(1, 0, part);

        let out = tempfile::tempdir().unwrap();
        let created = registry.concatenate(out.path(), "y", "fastq").unwrap();
        assert_eq!(created, vec![out.path().join("y_1.fastq")]);
    }
}
