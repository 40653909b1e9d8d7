use crate::{Error, Result, Shape};

/// Compute default (contiguous) strides for a tensor of given shape.
pub(crate) fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = Vec::with_capacity(shape.len());
    let mut acc = 1;
    // Iterate dims in reverse to accumulate products
    for dim in shape.iter().rev() {
        strides.push(acc);
        acc *= *dim;
    }
    strides.reverse();
    strides
}

/// How a tensor's logical shape maps onto its flat buffer.
///
/// The element at multi-index `idx` lives at `Σ strides[i] * idx[i]`. The
/// `contiguous` flag is bookkeeping rather than a derived property: a
/// transpose always clears it, even when a second transpose has restored
/// the canonical strides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Shape,
    strides: Vec<usize>,
    contiguous: bool,
}

impl Layout {
    /// Row-major layout for `shape`.
    pub fn contiguous(shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let strides = shape.stride_contiguous();
        Self {
            shape,
            strides,
            contiguous: true,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    pub fn is_contiguous(&self) -> bool {
        self.contiguous
    }

    /// Flat buffer offset of `index`, checked against every axis extent.
    pub fn flat_index(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.rank() || index.iter().zip(self.dims()).any(|(i, d)| i >= d) {
            return Err(Error::out_of_bounds(index, &self.shape));
        }
        Ok(self.flat_index_unchecked(index))
    }

    pub(crate) fn flat_index_unchecked(&self, index: &[usize]) -> usize {
        index
            .iter()
            .zip(&self.strides)
            .map(|(i, stride)| i * stride)
            .sum()
    }

    /// Swap the last two axes in place. Never touches the data.
    pub fn transpose(&mut self) -> Result<()> {
        let rank = self.rank();
        if rank < 2 {
            return Err(Error::InvalidRank {
                op: "transpose",
                min: 2,
                got: rank,
            });
        }
        self.shape = self.shape.transposed();
        self.strides.swap(rank - 2, rank - 1);
        self.contiguous = false;
        Ok(())
    }

    /// A transposed copy of this layout.
    pub fn transposed(&self) -> Result<Self> {
        let mut layout = self.clone();
        layout.transpose()?;
        Ok(layout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_major_strides() {
        assert_eq!(contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(contiguous_strides(&[5]), vec![1]);
        assert!(contiguous_strides(&[]).is_empty());
    }

    #[test]
    fn flat_index_checks_bounds() {
        let layout = Layout::contiguous((2, 3));
        assert_eq!(layout.flat_index(&[1, 2]).unwrap(), 5);
        assert!(matches!(
            layout.flat_index(&[2, 0]),
            Err(Error::OutOfBounds { .. })
        ));
        assert!(matches!(
            layout.flat_index(&[0]),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn transpose_swaps_last_two_axes() {
        let mut layout = Layout::contiguous((4, 2, 3));
        layout.transpose().unwrap();
        assert_eq!(layout.dims(), &[4, 3, 2]);
        assert_eq!(layout.strides(), &[6, 1, 3]);
        assert!(!layout.is_contiguous());

        layout.transpose().unwrap();
        assert_eq!(layout.dims(), &[4, 2, 3]);
        assert_eq!(layout.strides(), &[6, 3, 1]);
        // Still flagged: a double transpose is not treated as contiguous.
        assert!(!layout.is_contiguous());
    }

    #[test]
    fn transpose_rank_one_fails() {
        let mut layout = Layout::contiguous(5usize);
        assert!(matches!(
            layout.transpose(),
            Err(Error::InvalidRank { got: 1, .. })
        ));
    }
}
