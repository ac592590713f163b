//! Debug information for mapping instruction indexes to source lines.

use std::sync::Arc;

/// A debug record. Records are sorted by `index`; each one covers the
/// instructions up to the next record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugInfo {
    /// First instruction covered
    pub index: usize,
    /// Line range (1-based, inclusive)
    pub start_line: u32,
    pub end_line: u32,
    pub file: Option<Arc<str>>,
    /// No source mapping is active from `index` on.
    pub is_clear: bool,
}

impl DebugInfo {
    pub fn new(index: usize, start_line: u32, end_line: u32) -> Self {
        Self {
            index,
            start_line,
            end_line,
            file: None,
            is_clear: false,
        }
    }

    pub fn clear(index: usize) -> Self {
        Self {
            index,
            start_line: 0,
            end_line: 0,
            file: None,
            is_clear: true,
        }
    }

    /// Find the record covering `ip`: the last record at or before it,
    /// unless that record is a clear marker.
    pub fn lookup(records: &[DebugInfo], ip: usize) -> Option<&DebugInfo> {
        let after = records.partition_point(|r| r.index <= ip);
        let record = records[..after].last()?;
        if record.is_clear { None } else { Some(record) }
    }
}
