//! Shared output sink for the fast path: every worker encodes into a local
//! block and hands full blocks to one consumer thread over a bounded queue.
//! Blocks from one producer land in order; interleaving across producers is
//! arbitrary.

use std::fs::File;
use std::io::{self, BufWriter, Stdout, Write};
use std::path::Path;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::thread::{self, JoinHandle};

use crate::error::JoinError;
use crate::format::FormattedRecord;
use crate::io::{write_record_text, RecordWriter};

/// Where the shared stream lands.
enum SharedSink {
    File(BufWriter<File>),
    Stdout(BufWriter<Stdout>),
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            SharedSink::File(w) => w.write(buf),
            SharedSink::Stdout(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SharedSink::File(w) => w.flush(),
            SharedSink::Stdout(w) => w.flush(),
        }
    }
}

/// One serialized destination shared by all fast-path workers.
pub struct MultiWriter {
    sender: SyncSender<Vec<u8>>,
    consumer: JoinHandle<Result<(), JoinError>>,
}

impl MultiWriter {
    /// Opens the destination (`None` means stdout) and spawns the consumer
    /// thread behind a queue of `queue_blocks` byte blocks. A full queue
    /// blocks producers until the consumer catches up.
    pub fn create(output: Option<&Path>, queue_blocks: usize) -> Result<Self, JoinError> {
        let mut sink = match output {
            Some(path) => {
                let file = File::create(path).map_err(JoinError::WriteFail)?;
                SharedSink::File(BufWriter::new(file))
            }
            None => SharedSink::Stdout(BufWriter::new(io::stdout())),
        };

        let (sender, receiver) = sync_channel::<Vec<u8>>(queue_blocks);
        let consumer = thread::spawn(move || -> Result<(), JoinError> {
            while let Ok(block) = receiver.recv() {
                sink.write_all(&block).map_err(JoinError::WriteFail)?;
            }
            sink.flush().map_err(JoinError::WriteFail)
        });

        Ok(Self { sender, consumer })
    }

    /// A per-worker producer handle encoding FASTA records into blocks of
    /// roughly `buf_size` bytes.
    pub fn client(&self, accession: &str, buf_size: usize) -> MultiWriterClient {
        MultiWriterClient {
            sender: self.sender.clone(),
            block: Vec::with_capacity(buf_size),
            buf_size,
            accession: accession.to_string(),
        }
    }

    /// Closes the queue, waits for the consumer to drain, and reports its
    /// write status. Every client must be finished (or dropped) first or this
    /// will wait on them.
    pub fn finish(self) -> Result<(), JoinError> {
        let MultiWriter { sender, consumer } = self;
        drop(sender);
        match consumer.join() {
            Ok(result) => result,
            Err(_) => Err(JoinError::Worker("output thread panicked".to_string())),
        }
    }
}

/// Producer side of a [`MultiWriter`]. Implements the same sink seam the
/// partition writer does, so workers are oblivious to which path they run.
pub struct MultiWriterClient {
    sender: SyncSender<Vec<u8>>,
    block: Vec<u8>,
    buf_size: usize,
    accession: String,
}

impl MultiWriterClient {
    fn flush_block(&mut self) -> Result<(), JoinError> {
        if self.block.is_empty() {
            return Ok(());
        }
        let block = std::mem::replace(&mut self.block, Vec::with_capacity(self.buf_size));
        self.sender
            .send(block)
            .map_err(|_| JoinError::Worker("shared output queue closed".to_string()))
    }
}

impl RecordWriter for MultiWriterClient {
    fn write_record(&mut self, rec: &FormattedRecord<'_>) -> Result<(), JoinError> {
        write_record_text(&mut self.block, rec, &self.accession, false, false, false)
            .map_err(JoinError::WriteFail)?;
        if self.block.len() >= self.buf_size {
            self.flush_block()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), JoinError> {
        self.flush_block()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn rec(bases: &[u8], row_id: i64) -> FormattedRecord<'_> {
        FormattedRecord {
            row_id,
            dst_id: 0,
            read_id: 0,
            name: None,
            bases,
            quality: None,
        }
    }

    #[test]
    fn test_producer_order_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fasta");
        let writer = MultiWriter::create(Some(&path), 4).unwrap();

        // tiny blocks so every record ships separately
        let mut client = writer.client("SRX1", 1);
        for (i, bases) in [&b"AAAA"[..], b"CCCC", b"GGGG"].iter().enumerate() {
            client.write_record(&rec(bases, i as i64 + 1)).unwrap();
        }
        client.finish().unwrap();
        drop(client);
        writer.finish().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            ">SRX1.1 length=4\nAAAA\n>SRX1.2 length=4\nCCCC\n>SRX1.3 length=4\nGGGG\n"
        );
    }

    #[test]
    fn test_partial_block_ships_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fasta");
        let writer = MultiWriter::create(Some(&path), 4).unwrap();

        let mut client = writer.client("SRX1", 1 << 20);
        client.write_record(&rec(b"ACGT", 1)).unwrap();
        client.finish().unwrap();
        drop(client);
        writer.finish().unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            ">SRX1.1 length=4\nACGT\n"
        );
    }

    #[test]
    fn test_interleaving_keeps_whole_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fasta");
        let writer = MultiWriter::create(Some(&path), 8).unwrap();

        let mut one = writer.client("A", 1);
        let mut two = writer.client("B", 1);
        one.write_record(&rec(b"AA", 1)).unwrap();
        two.write_record(&rec(b"TT", 1)).unwrap();
        one.write_record(&rec(b"CC", 2)).unwrap();
        one.finish().unwrap();
        two.finish().unwrap();
        drop((one, two));
        writer.finish().unwrap();

        let text = fs::read_to_string(&path).unwrap();
        // records from producer A appear in A's order regardless of B
        let a1 = text.find(">A.1").unwrap();
        let a2 = text.find(">A.2").unwrap();
        assert!(a1 < a2);
        assert!(text.contains(">B.1"));
    }
}
