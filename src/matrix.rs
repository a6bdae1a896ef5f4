//! Strided score-matrix views
//!
//! A score matrix is `rows x vocab_size` logits in row-major order with an
//! explicit row stride, so a view can address a slice of a wider buffer
//! (e.g. the last `vocab_size` columns skipped by a padded lm_head).

use crate::element::LogitElement;
use crate::error::{CrossEntropyError, Result};

/// Elements a buffer must hold for `rows` rows at `row_stride`.
///
/// The last row only needs `vocab_size` elements, not a full stride.
/// `None` when the span does not fit in `usize`.
pub fn required_len(rows: usize, vocab_size: usize, row_stride: usize) -> Option<usize> {
    if rows == 0 {
        return Some(0);
    }
    (rows - 1)
        .checked_mul(row_stride)?
        .checked_add(vocab_size)
}

/// Validate a layout and return the number of elements it addresses.
fn validate_layout(len: usize, rows: usize, vocab_size: usize, row_stride: usize) -> Result<usize> {
    if vocab_size == 0 {
        return Err(CrossEntropyError::Config(
            "vocab_size must be positive".to_string(),
        ));
    }
    if row_stride < vocab_size {
        return Err(CrossEntropyError::InvalidStride {
            row_stride,
            vocab_size,
        });
    }
    let needed = required_len(rows, vocab_size, row_stride).ok_or(
        CrossEntropyError::ShapeOverflow {
            what: "score buffer (rows x row_stride)",
        },
    )?;
    if len < needed {
        return Err(CrossEntropyError::ShapeMismatch {
            what: "score buffer length",
            expected: needed,
            got: len,
        });
    }
    Ok(needed)
}

fn contiguous_rows(len: usize, vocab_size: usize) -> Result<usize> {
    if vocab_size == 0 {
        return Err(CrossEntropyError::Config(
            "vocab_size must be positive".to_string(),
        ));
    }
    if len % vocab_size != 0 {
        return Err(CrossEntropyError::ShapeMismatch {
            what: "score buffer length (multiple of vocab_size)",
            expected: (len / vocab_size + 1) * vocab_size,
            got: len,
        });
    }
    Ok(len / vocab_size)
}

/// Read-only score matrix.
#[derive(Clone, Copy, Debug)]
pub struct ScoreMatrix<'a, T> {
    data: &'a [T],
    rows: usize,
    vocab_size: usize,
    row_stride: usize,
    active_len: usize,
}

impl<'a, T: LogitElement> ScoreMatrix<'a, T> {
    pub fn new(data: &'a [T], rows: usize, vocab_size: usize, row_stride: usize) -> Result<Self> {
        let active_len = validate_layout(data.len(), rows, vocab_size, row_stride)?;
        Ok(Self {
            data,
            rows,
            vocab_size,
            row_stride,
            active_len,
        })
    }

    /// Dense view with `row_stride == vocab_size`.
    pub fn contiguous(data: &'a [T], vocab_size: usize) -> Result<Self> {
        let rows = contiguous_rows(data.len(), vocab_size)?;
        Self::new(data, rows, vocab_size, vocab_size)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    /// The `vocab_size` scores of row `row`.
    pub fn row(&self, row: usize) -> &'a [T] {
        let start = row * self.row_stride;
        &self.data[start..start + self.vocab_size]
    }

    /// The prefix of the buffer the view actually addresses.
    pub(crate) fn active(&self) -> &'a [T] {
        &self.data[..self.active_len]
    }
}

/// Score matrix that the backward kernel overwrites with gradients.
#[derive(Debug)]
pub struct ScoreMatrixMut<'a, T> {
    data: &'a mut [T],
    rows: usize,
    vocab_size: usize,
    row_stride: usize,
    active_len: usize,
}

impl<'a, T: LogitElement> ScoreMatrixMut<'a, T> {
    pub fn new(
        data: &'a mut [T],
        rows: usize,
        vocab_size: usize,
        row_stride: usize,
    ) -> Result<Self> {
        let active_len = validate_layout(data.len(), rows, vocab_size, row_stride)?;
        Ok(Self {
            data,
            rows,
            vocab_size,
            row_stride,
            active_len,
        })
    }

    pub fn contiguous(data: &'a mut [T], vocab_size: usize) -> Result<Self> {
        let rows = contiguous_rows(data.len(), vocab_size)?;
        Self::new(data, rows, vocab_size, vocab_size)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    /// Borrow as a read-only view (the forward pass never writes).
    pub fn as_view(&self) -> ScoreMatrix<'_, T> {
        ScoreMatrix {
            data: &self.data[..],
            rows: self.rows,
            vocab_size: self.vocab_size,
            row_stride: self.row_stride,
            active_len: self.active_len,
        }
    }

    pub fn row(&self, row: usize) -> &[T] {
        let start = row * self.row_stride;
        &self.data[start..start + self.vocab_size]
    }

    pub(crate) fn active_mut(&mut self) -> &mut [T] {
        &mut self.data[..self.active_len]
    }

    /// Give the underlying buffer back.
    pub fn into_inner(self) -> &'a mut [T] {
        self.data
    }
}
