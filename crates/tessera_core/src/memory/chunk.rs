//! # Chunked Column Storage
//!
//! Fixed-size chunks holding the plain-data columns of one archetype.
//!
//! ```text
//! Chunk 0: [A0 A1 .. An][B0 B1 .. Bn][id0 id1 .. idn]
//! Chunk 1: [A0 A1 .. An][B0 B1 .. Bn][id0 id1 .. idn]
//! ```
//!
//! Every column occupies one contiguous sub-range of each chunk, so a scan
//! over one component touches consecutive bytes. Slots are dense: releasing
//! a slot relocates the last occupied row into it.

use std::collections::VecDeque;

use bytemuck::Pod;

use crate::error::{EcsError, EcsResult};

/// Alignment guaranteed at the start of every chunk.
pub const CHUNK_ALIGN: usize = std::mem::align_of::<u64>();

/// Size and alignment of one column's element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Element size in bytes.
    pub size: usize,
    /// Element alignment in bytes (power of two, at most [`CHUNK_ALIGN`]).
    pub align: usize,
}

impl ColumnSpec {
    /// Column spec for a plain-data type.
    #[must_use]
    pub const fn of<T: Pod>() -> Self {
        Self {
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Column {
    size: usize,
    /// Byte offset of the column inside every chunk.
    offset: usize,
}

/// One fixed-size byte block. Backed by `u64` words for alignment.
struct Chunk {
    words: Box<[u64]>,
}

impl Chunk {
    fn zeroed(chunk_size: usize) -> Self {
        let words = chunk_size.div_ceil(CHUNK_ALIGN);
        Self {
            words: vec![0u64; words].into_boxed_slice(),
        }
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }
}

#[inline]
const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Lays out the columns for `rows` rows, returning the columns and the
/// number of bytes used.
fn layout(specs: &[ColumnSpec], rows: usize) -> (Vec<Column>, usize) {
    let mut offset = 0;
    let columns = specs
        .iter()
        .map(|spec| {
            offset = align_up(offset, spec.align);
            let column = Column {
                size: spec.size,
                offset,
            };
            offset += spec.size * rows;
            column
        })
        .collect();
    (columns, offset)
}

/// Structure-of-arrays storage for the trivial columns of one archetype.
///
/// # Example
///
/// ```rust,ignore
/// let mut store = ChunkedStore::new(&[ColumnSpec::of::<f32>()], 16384, 4)?;
/// let slot = store.allocate();
/// *store.get_mut::<f32>(slot, 0).unwrap() = 1.5;
/// ```
pub struct ChunkedStore {
    columns: Box<[Column]>,
    chunks: Vec<Chunk>,
    /// Emptied chunks kept for reuse, oldest first.
    empty: VecDeque<Chunk>,
    chunk_size: usize,
    row_size: usize,
    rows_per_chunk: usize,
    max_cached: usize,
    len: usize,
}

impl ChunkedStore {
    /// Creates a store for the given columns.
    ///
    /// One chunk is allocated up front; a store never has fewer.
    ///
    /// # Errors
    ///
    /// - [`EcsError::UnsupportedAlignment`] if a column needs more than
    ///   [`CHUNK_ALIGN`] or its alignment is not a power of two.
    /// - [`EcsError::ChunkTooSmall`] if `chunk_size` cannot hold one row.
    pub fn new(specs: &[ColumnSpec], chunk_size: usize, max_cached: usize) -> EcsResult<Self> {
        if let Some(spec) = specs
            .iter()
            .find(|spec| spec.align > CHUNK_ALIGN || !spec.align.is_power_of_two())
        {
            return Err(EcsError::UnsupportedAlignment {
                name: "column",
                align: spec.align,
                max: CHUNK_ALIGN,
            });
        }

        let row_size: usize = specs.iter().map(|spec| spec.size).sum();
        let mut rows = if row_size == 0 {
            chunk_size
        } else {
            chunk_size / row_size
        };
        // Alignment padding between columns can push the naive estimate over.
        while rows > 0 && layout(specs, rows).1 > chunk_size {
            rows -= 1;
        }
        if rows == 0 {
            return Err(EcsError::ChunkTooSmall {
                chunk_size,
                row_size,
            });
        }

        let (columns, _) = layout(specs, rows);
        Ok(Self {
            columns: columns.into_boxed_slice(),
            chunks: vec![Chunk::zeroed(chunk_size)],
            empty: VecDeque::new(),
            chunk_size,
            row_size,
            rows_per_chunk: rows,
            max_cached,
            len: 0,
        })
    }

    /// Number of occupied slots.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks if no slot is occupied.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Rows that fit in one chunk.
    #[inline]
    #[must_use]
    pub fn rows_per_chunk(&self) -> usize {
        self.rows_per_chunk
    }

    /// Chunks currently in use.
    #[inline]
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Emptied chunks waiting for reuse.
    #[inline]
    #[must_use]
    pub fn cached_chunk_count(&self) -> usize {
        self.empty.len()
    }

    /// Number of columns.
    #[inline]
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Bytes of one row across all columns, without padding.
    #[inline]
    #[must_use]
    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// Byte offset of a column inside each chunk.
    #[must_use]
    pub fn column_offset(&self, column: usize) -> Option<usize> {
        self.columns.get(column).map(|c| c.offset)
    }

    /// Element size of a column.
    #[must_use]
    pub fn column_size(&self, column: usize) -> Option<usize> {
        self.columns.get(column).map(|c| c.size)
    }

    /// Splits a slot into `(chunk index, row inside chunk)`.
    #[inline]
    #[must_use]
    pub fn locate(&self, slot: usize) -> (usize, usize) {
        (slot / self.rows_per_chunk, slot % self.rows_per_chunk)
    }

    /// Appends a slot and returns it.
    ///
    /// A chunk is added only when the last one is full, taken from the
    /// empty-chunk cache when possible. The slot's bytes are unspecified.
    pub fn allocate(&mut self) -> usize {
        let slot = self.len;
        if slot >= self.chunks.len() * self.rows_per_chunk {
            let chunk = if let Some(cached) = self.empty.pop_front() {
                tracing::trace!(chunks = self.chunks.len() + 1, "reusing cached chunk");
                cached
            } else {
                tracing::trace!(chunks = self.chunks.len() + 1, "allocating chunk");
                Chunk::zeroed(self.chunk_size)
            };
            self.chunks.push(chunk);
        }
        self.len += 1;
        slot
    }

    /// Releases a slot, moving the last occupied row into it.
    ///
    /// When the remaining rows fit in one chunk fewer, the trailing chunk is
    /// cached (up to the configured bound) or dropped.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::IndexOutOfRange`] if `slot` is not occupied.
    pub fn release(&mut self, slot: usize) -> EcsResult<()> {
        if slot >= self.len {
            return Err(EcsError::IndexOutOfRange {
                index: slot,
                len: self.len,
            });
        }
        let last = self.len - 1;
        if slot != last {
            self.copy_row(last, slot);
        }
        self.len -= 1;

        let chunks = self.chunks.len();
        if chunks > 1 && self.len <= (chunks - 1) * self.rows_per_chunk {
            if let Some(trailing) = self.chunks.pop() {
                if self.empty.len() < self.max_cached {
                    tracing::trace!(cached = self.empty.len() + 1, "caching emptied chunk");
                    self.empty.push_back(trailing);
                } else {
                    tracing::trace!("dropping emptied chunk");
                }
            }
        }
        Ok(())
    }

    /// Copies every column of row `from` into row `to`.
    fn copy_row(&mut self, from: usize, to: usize) {
        let (from_chunk, from_row) = self.locate(from);
        let (to_chunk, to_row) = self.locate(to);

        if from_chunk == to_chunk {
            let bytes = self.chunks[from_chunk].bytes_mut();
            for column in self.columns.iter() {
                let src = column.offset + from_row * column.size;
                let dst = column.offset + to_row * column.size;
                bytes.copy_within(src..src + column.size, dst);
            }
            return;
        }

        let (source, target) = pair_mut(&mut self.chunks, from_chunk, to_chunk);
        let (source, target) = (source.bytes(), target.bytes_mut());
        for column in self.columns.iter() {
            let src = column.offset + from_row * column.size;
            let dst = column.offset + to_row * column.size;
            target[dst..dst + column.size].copy_from_slice(&source[src..src + column.size]);
        }
    }

    fn column_range(&self, slot: usize, column: usize) -> EcsResult<(usize, usize, usize)> {
        if slot >= self.len {
            return Err(EcsError::IndexOutOfRange {
                index: slot,
                len: self.len,
            });
        }
        let Some(layout) = self.columns.get(column) else {
            return Err(EcsError::IndexOutOfRange {
                index: column,
                len: self.columns.len(),
            });
        };
        let (chunk, row) = self.locate(slot);
        let start = layout.offset + row * layout.size;
        Ok((chunk, start, start + layout.size))
    }

    /// Raw bytes of one component of one slot.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::IndexOutOfRange`] for an unoccupied slot or an
    /// unknown column.
    pub fn column_bytes(&self, slot: usize, column: usize) -> EcsResult<&[u8]> {
        let (chunk, start, end) = self.column_range(slot, column)?;
        Ok(&self.chunks[chunk].bytes()[start..end])
    }

    /// Mutable raw bytes of one component of one slot.
    ///
    /// # Errors
    ///
    /// Returns [`EcsError::IndexOutOfRange`] for an unoccupied slot or an
    /// unknown column.
    pub fn column_bytes_mut(&mut self, slot: usize, column: usize) -> EcsResult<&mut [u8]> {
        let (chunk, start, end) = self.column_range(slot, column)?;
        Ok(&mut self.chunks[chunk].bytes_mut()[start..end])
    }

    /// Typed reference to one component.
    ///
    /// Valid until the next `allocate`/`release` on this store. Returns
    /// `None` for a bad slot/column or if `T` does not match the column size.
    #[inline]
    #[must_use]
    pub fn get<T: Pod>(&self, slot: usize, column: usize) -> Option<&T> {
        let bytes = self.column_bytes(slot, column).ok()?;
        bytemuck::try_from_bytes(bytes).ok()
    }

    /// Typed mutable reference to one component.
    #[inline]
    pub fn get_mut<T: Pod>(&mut self, slot: usize, column: usize) -> Option<&mut T> {
        let bytes = self.column_bytes_mut(slot, column).ok()?;
        bytemuck::try_from_bytes_mut(bytes).ok()
    }

    /// Whole byte image of one chunk.
    #[inline]
    #[must_use]
    pub fn chunk_bytes(&self, chunk: usize) -> Option<&[u8]> {
        self.chunks.get(chunk).map(Chunk::bytes)
    }

    /// Whole mutable byte image of one chunk.
    #[inline]
    pub fn chunk_bytes_mut(&mut self, chunk: usize) -> Option<&mut [u8]> {
        self.chunks.get_mut(chunk).map(Chunk::bytes_mut)
    }
}

/// Borrows two distinct elements mutably.
pub(crate) fn pair_mut<T>(items: &mut [T], a: usize, b: usize) -> (&mut T, &mut T) {
    debug_assert_ne!(a, b);
    if a < b {
        let (left, right) = items.split_at_mut(b);
        (&mut left[a], &mut right[0])
    } else {
        let (left, right) = items.split_at_mut(a);
        (&mut right[0], &mut left[b])
    }
}
