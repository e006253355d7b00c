//! Block envelope decoding.
//!
//! Every non-empty block starts with a single rowset format tag byte. Blocks
//! tagged as rows carry a payload made up of length prefixed rows:
//!
//! ```text
//! [ tag: u8 ][ len: u32 LE ][ row bytes ][ len: u32 LE ][ row bytes ] ...
//! ```
//!
//! Blocks with any other tag are control blocks (or rows in a format we
//! don't understand) and get skipped. An empty block, or a rows block with an
//! empty payload, marks the end of the stream.
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt::Debug;
use std::ops::Range;
use streammerge_error::{Result, StreamMergeError};

/// Tag for blocks containing rows.
pub const ROWSET_FORMAT_ROWS: u8 = 0x01;

/// Tag used when encoding control blocks. Any tag other than
/// `ROWSET_FORMAT_ROWS` is treated the same way.
pub const ROWSET_FORMAT_CONTROL: u8 = 0x00;

const ROW_LEN_PREFIX: usize = std::mem::size_of::<u32>();

/// Decoded data block. Holds one or more rows for a single source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    source: usize,
    data: Bytes,
    num_rows: usize,
}

impl Payload {
    /// Create a new payload from framed row data, validating the framing.
    pub fn try_new(source: usize, data: Bytes) -> Result<Self> {
        if data.is_empty() {
            return Err(StreamMergeError::new(format!(
                "Payload for source {source} contains no rows"
            )));
        }

        let mut offset = 0;
        let mut num_rows = 0;
        while offset < data.len() {
            match frame_at(&data, offset) {
                Some(range) => {
                    offset = range.end;
                    num_rows += 1;
                }
                None => {
                    return Err(StreamMergeError::new(format!(
                        "Corrupt row framing in payload for source {source} at offset {offset}"
                    )))
                }
            }
        }

        Ok(Payload {
            source,
            data,
            num_rows,
        })
    }

    pub fn source(&self) -> usize {
        self.source
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Iterate over all rows in the payload.
    pub fn iter_rows(&self) -> impl Iterator<Item = Bytes> + '_ {
        let mut offset = 0;
        std::iter::from_fn(move || {
            if offset >= self.data.len() {
                return None;
            }
            let (row, next) = self.row_at(offset);
            offset = next;
            Some(row)
        })
    }

    /// Get the row starting at `offset` along with the offset of the next
    /// row.
    ///
    /// `offset` must point at the start of a row. Framing was validated on
    /// construction so this can't run off the end.
    pub(crate) fn row_at(&self, offset: usize) -> (Bytes, usize) {
        let range = frame_at(&self.data, offset).expect("framing to be validated");
        let next = range.end;
        (self.data.slice(range), next)
    }
}

/// Get the byte range of the row whose length prefix starts at `offset`.
fn frame_at(data: &[u8], offset: usize) -> Option<Range<usize>> {
    let prefix_end = offset.checked_add(ROW_LEN_PREFIX)?;
    let prefix = data.get(offset..prefix_end)?;
    let len = u32::from_le_bytes(prefix.try_into().ok()?) as usize;
    let row_end = prefix_end.checked_add(len)?;
    if row_end > data.len() {
        return None;
    }
    Some(prefix_end..row_end)
}

/// Result of decoding a single raw block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedBlock {
    /// Non-data block, discard it.
    Skip,
    /// Source reached end of stream.
    End,
    /// Block containing rows.
    Rows(Payload),
}

/// Turns raw blocks into decoded blocks.
///
/// Decoding happens on the task that completed the read, so implementations
/// must not block or do any I/O.
pub trait BlockDecoder: Debug + Sync + Send {
    fn decode(&self, source: usize, block: Bytes) -> Result<DecodedBlock>;
}

/// Decoder for the default rowset envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowsetDecoder;

impl BlockDecoder for RowsetDecoder {
    fn decode(&self, source: usize, mut block: Bytes) -> Result<DecodedBlock> {
        if block.is_empty() {
            return Ok(DecodedBlock::End);
        }

        if block[0] != ROWSET_FORMAT_ROWS {
            return Ok(DecodedBlock::Skip);
        }

        let payload = block.split_off(1);
        if payload.is_empty() {
            return Ok(DecodedBlock::End);
        }

        Ok(DecodedBlock::Rows(Payload::try_new(source, payload)?))
    }
}

/// Builds a single rows block.
#[derive(Debug)]
pub struct RowsetBlockBuilder {
    buf: BytesMut,
    num_rows: usize,
}

impl Default for RowsetBlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RowsetBlockBuilder {
    pub fn new() -> Self {
        let mut buf = BytesMut::new();
        buf.put_u8(ROWSET_FORMAT_ROWS);
        RowsetBlockBuilder { buf, num_rows: 0 }
    }

    pub fn push_row(&mut self, row: &[u8]) -> &mut Self {
        self.buf.put_u32_le(row.len() as u32);
        self.buf.put_slice(row);
        self.num_rows += 1;
        self
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Finish the block.
    ///
    /// A builder with no rows produces an end-of-stream block.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Encode a block that the rowset decoder will skip.
pub fn encode_control_block(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(body.len() + 1);
    buf.put_u8(ROWSET_FORMAT_CONTROL);
    buf.put_slice(body);
    buf.freeze()
}

/// Encode a rows block from an iterator of rows.
pub fn encode_rows_block<'a>(rows: impl IntoIterator<Item = &'a [u8]>) -> Bytes {
    let mut builder = RowsetBlockBuilder::new();
    for row in rows {
        builder.push_row(row);
    }
    builder.finish()
}
