use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;

use crate::error::JoinError;
use crate::source::{ColumnSelection, SpotCursor, SpotRecord, SpotTable};

/// One owned spot of a [`FlatTable`].
#[derive(Debug, Clone)]
pub struct FlatSpot {
    pub name: Option<String>,
    pub read: Vec<u8>,
    pub quality: Vec<u8>,
    pub read_len: Vec<u32>,
    pub read_type: Vec<u8>,
}

/// In-memory spot table backed by a tab-separated dump.
///
/// One spot per line with five columns: `NAME`, `READ`, `QUALITY`,
/// `READ_LEN`, `READ_TYPE`. The two trailing columns are comma-separated
/// integers; `.` marks an absent value. Empty lines and lines starting with
/// `#` are skipped. This stands in for the real column store in the CLI and
/// in tests.
#[derive(Debug, Default)]
pub struct FlatTable {
    spots: Vec<FlatSpot>,
    has_name: bool,
}

impl FlatTable {
    pub fn new(spots: Vec<FlatSpot>) -> Self {
        let has_name = spots.iter().any(|s| s.name.is_some());
        Self { spots, has_name }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read table {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("Failed to parse table {}", path.display()))
    }

    /// Parses the tab-separated dump format.
    pub fn parse(text: &str) -> Result<Self> {
        let mut spots = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let spot = parse_spot(line).with_context(|| format!("line {}", lineno + 1))?;
            spots.push(spot);
        }
        Ok(Self::new(spots))
    }
}

fn parse_spot(line: &str) -> Result<FlatSpot> {
    let mut fields = line.split('\t');
    let name = match fields.next() {
        Some(".") => None,
        Some(n) => Some(n.to_string()),
        None => bail!("missing NAME column"),
    };
    let read = field(&mut fields, "READ")?.as_bytes().to_vec();
    let quality = match field(&mut fields, "QUALITY")? {
        "." => Vec::new(),
        q => q.as_bytes().to_vec(),
    };
    let read_len = match field(&mut fields, "READ_LEN")? {
        "." => vec![read.len() as u32],
        lens => lens
            .split(',')
            .map(|l| l.parse::<u32>().context("bad READ_LEN entry"))
            .collect::<Result<_>>()?,
    };
    let read_type = match field(&mut fields, "READ_TYPE")? {
        "." => Vec::new(),
        types => types
            .split(',')
            .map(|t| t.parse::<u8>().context("bad READ_TYPE entry"))
            .collect::<Result<_>>()?,
    };
    Ok(FlatSpot {
        name,
        read,
        quality,
        read_len,
        read_type,
    })
}

fn field<'a>(fields: &mut std::str::Split<'a, char>, what: &str) -> Result<&'a str> {
    fields
        .next()
        .with_context(|| format!("missing {what} column"))
}

impl SpotTable for FlatTable {
    type Cursor<'a> = FlatCursor<'a>;

    fn row_count(&self) -> u64 {
        self.spots.len() as u64
    }

    fn has_name_column(&self) -> bool {
        self.has_name
    }

    fn open_cursor(
        &self,
        first_row: i64,
        row_count: u64,
        cols: ColumnSelection,
    ) -> Result<FlatCursor<'_>, JoinError> {
        if first_row < 1 {
            return Err(JoinError::SourceOpen(format!(
                "first row must be positive, got {first_row}"
            )));
        }
        if cols.with_name && !self.has_name {
            return Err(JoinError::SourceOpen(
                "table has no NAME column".to_string(),
            ));
        }
        let start = (first_row - 1) as u64;
        let end = start.saturating_add(row_count).min(self.spots.len() as u64);
        Ok(FlatCursor {
            spots: &self.spots,
            cols,
            next_row: start.min(self.spots.len() as u64) as usize,
            end_row: end as usize,
            whole_len: [0],
        })
    }
}

/// Cursor over a bounded window of a [`FlatTable`].
pub struct FlatCursor<'a> {
    spots: &'a [FlatSpot],
    cols: ColumnSelection,
    next_row: usize,
    end_row: usize,
    /// Scratch for the synthesized single-fragment length.
    whole_len: [u32; 1],
}

impl SpotCursor for FlatCursor<'_> {
    fn next_spot(&mut self) -> Option<Result<SpotRecord<'_>, JoinError>> {
        if self.next_row >= self.end_row {
            return None;
        }
        let idx = self.next_row;
        self.next_row += 1;

        let spot = &self.spots[idx];
        self.whole_len[0] = spot.read.len() as u32;
        let read_len: &[u32] = if self.cols.with_read_len {
            &spot.read_len
        } else {
            &self.whole_len
        };

        Some(Ok(SpotRecord {
            row_id: idx as i64 + 1,
            read: &spot.read,
            quality: self.cols.with_quality.then_some(spot.quality.as_slice()),
            name: if self.cols.with_name {
                spot.name.as_deref()
            } else {
                None
            },
            read_len,
            read_type: self.cols.with_read_type.then_some(spot.read_type.as_slice()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection_all() -> ColumnSelection {
        ColumnSelection {
            with_read_len: true,
            with_name: true,
            with_read_type: true,
            with_quality: true,
        }
    }

    #[test]
    fn test_parse_round_and_name_detection() {
        let table = FlatTable::parse(
            "# comment\n\
             spot1\tACGTACGT\t!!!!####\t4,4\t1,1\n\
             \n\
             .\tAAAA\t....\t4\t1\n",
        )
        .unwrap();
        assert_eq!(table.row_count(), 2);
        assert!(table.has_name_column());

        let mut cursor = table.open_cursor(1, 2, selection_all()).unwrap();
        let rec = cursor.next_spot().unwrap().unwrap();
        assert_eq!(rec.row_id, 1);
        assert_eq!(rec.name, Some("spot1"));
        assert_eq!(rec.read, b"ACGTACGT");
        assert_eq!(rec.quality, Some(&b"!!!!####"[..]));
        assert_eq!(rec.read_len, &[4, 4]);
        assert_eq!(rec.read_type, Some(&[1u8, 1][..]));

        let rec = cursor.next_spot().unwrap().unwrap();
        assert_eq!(rec.row_id, 2);
        assert_eq!(rec.name, None);
        assert!(cursor.next_spot().is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!(FlatTable::parse("onlyname\n").is_err());
        assert!(FlatTable::parse("n\tACGT\t!!!!\tnotanum\t1\n").is_err());
    }

    #[test]
    fn test_cursor_synthesizes_whole_spot_fragment() {
        let table = FlatTable::parse("s\tACGTAC\t!!!!!!\t3,3\t1,1\n").unwrap();
        let cols = ColumnSelection {
            with_read_len: false,
            ..ColumnSelection::default()
        };
        let mut cursor = table.open_cursor(1, 1, cols).unwrap();
        let rec = cursor.next_spot().unwrap().unwrap();
        assert_eq!(rec.read_len, &[6]);
        assert_eq!(rec.quality, None);
        assert_eq!(rec.read_type, None);
    }

    #[test]
    fn test_cursor_window_is_bounded_and_clamped() {
        let table = FlatTable::parse(
            ".\tAA\t..\t2\t1\n\
             .\tCC\t..\t2\t1\n\
             .\tGG\t..\t2\t1\n",
        )
        .unwrap();
        let cols = ColumnSelection {
            with_read_len: true,
            ..ColumnSelection::default()
        };
        let mut cursor = table.open_cursor(2, 10, cols).unwrap();
        assert_eq!(cursor.next_spot().unwrap().unwrap().row_id, 2);
        assert_eq!(cursor.next_spot().unwrap().unwrap().row_id, 3);
        assert!(cursor.next_spot().is_none());
    }

    #[test]
    fn test_name_column_must_exist_when_requested() {
        let table = FlatTable::parse(".\tAA\t..\t2\t1\n").unwrap();
        assert!(!table.has_name_column());
        let cols = ColumnSelection {
            with_name: true,
            ..ColumnSelection::default()
        };
        assert!(matches!(
            table.open_cursor(1, 1, cols),
            Err(JoinError::SourceOpen(_))
        ));
    }
}
