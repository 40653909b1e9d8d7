//! N-dimensional cursors.
//!
//! Every kernel walks its operands through a [`StridedIndex`] instead of a
//! nest of loops, so a kernel is written once regardless of whether the
//! tensor is contiguous or a transposed view, and regardless of which axis
//! should vary fastest.
//!
//! The loop nest is described by an `order` where `order[axis]` is the
//! position of `axis` in the nest. The axis at position `rank - 1` varies
//! fastest. The identity order is plain row-major iteration.

use crate::{Error, Layout, Result, Shape};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    Active,
    Exhausted,
}

/// Odometer over the multi-indices of a [`Layout`], yielding flat offsets.
#[derive(Debug, Clone)]
pub struct StridedIndex {
    shape: Shape,
    /// `order[axis]` is the position of `axis` in the loop nest.
    order: Vec<usize>,
    /// Extents and strides indexed by position.
    dims: Vec<usize>,
    strides: Vec<usize>,
    /// Current index, by position.
    pos: Vec<usize>,
    state: CursorState,
}

impl StridedIndex {
    /// Walk `layout` in the given order starting at `start` (in axis order).
    pub fn new(layout: &Layout, order: Option<&[usize]>, start: &[usize]) -> Result<Self> {
        let rank = layout.rank();
        let order = match order {
            Some(order) => {
                let mut seen = vec![false; rank];
                if order.len() != rank
                    || order
                        .iter()
                        .any(|&p| p >= rank || std::mem::replace(&mut seen[p], true))
                {
                    crate::bail!("iteration order {order:?} is not a permutation of 0..{rank}");
                }
                order.to_vec()
            }
            None => (0..rank).collect(),
        };
        // Validates `start` against the extents.
        layout.flat_index(start)?;

        let mut dims = vec![0; rank];
        let mut strides = vec![0; rank];
        let mut pos = vec![0; rank];
        for axis in 0..rank {
            dims[order[axis]] = layout.dims()[axis];
            strides[order[axis]] = layout.strides()[axis];
            pos[order[axis]] = start[axis];
        }
        let state = if layout.elem_count() == 0 {
            CursorState::Exhausted
        } else {
            CursorState::Active
        };
        Ok(Self {
            shape: layout.shape().clone(),
            order,
            dims,
            strides,
            pos,
            state,
        })
    }

    /// Row-major walk from the first element.
    pub fn from_layout(layout: &Layout) -> Self {
        let rank = layout.rank();
        let state = if layout.elem_count() == 0 {
            CursorState::Exhausted
        } else {
            CursorState::Active
        };
        Self {
            shape: layout.shape().clone(),
            order: (0..rank).collect(),
            dims: layout.dims().to_vec(),
            strides: layout.strides().to_vec(),
            pos: vec![0; rank],
            state,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    fn offset(&self) -> usize {
        self.pos
            .iter()
            .zip(&self.strides)
            .map(|(p, stride)| p * stride)
            .sum()
    }

    /// The current multi-index, in axis order.
    pub fn curr(&self) -> Vec<usize> {
        self.order.iter().map(|&p| self.pos[p]).collect()
    }

    /// Jump to `index` (in axis order). Re-arms an exhausted cursor.
    pub fn set_curr(&mut self, index: &[usize]) -> Result<()> {
        if index.len() != self.pos.len() || index.iter().zip(self.shape.dims()).any(|(i, d)| i >= d)
        {
            return Err(Error::out_of_bounds(index, &self.shape));
        }
        for (axis, &i) in index.iter().enumerate() {
            self.pos[self.order[axis]] = i;
        }
        self.state = CursorState::Active;
        Ok(())
    }

    /// Flat offset of the current element, then advance.
    pub fn next_offset(&mut self) -> Result<usize> {
        if self.is_exhausted() {
            return Err(Error::out_of_bounds(&self.curr(), &self.shape));
        }
        let offset = self.offset();
        for p in (0..self.pos.len()).rev() {
            if self.pos[p] + 1 < self.dims[p] {
                self.pos[p] += 1;
                return Ok(offset);
            }
            self.pos[p] = 0;
        }
        // Carried out of the outermost position.
        self.state = CursorState::Exhausted;
        Ok(offset)
    }

    /// Flat offset of the current element, then step back.
    pub fn back_offset(&mut self) -> Result<usize> {
        if self.is_exhausted() {
            return Err(Error::out_of_bounds(&self.curr(), &self.shape));
        }
        let offset = self.offset();
        for p in (0..self.pos.len()).rev() {
            if self.pos[p] > 0 {
                self.pos[p] -= 1;
                return Ok(offset);
            }
            self.pos[p] = self.dims[p] - 1;
        }
        self.state = CursorState::Exhausted;
        Ok(offset)
    }
}

impl Iterator for StridedIndex {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        self.next_offset().ok()
    }
}

/// Read cursor over a tensor buffer.
pub struct Cursor<'a, T> {
    data: &'a [T],
    index: StridedIndex,
}

impl<'a, T> Cursor<'a, T> {
    pub(crate) fn new(data: &'a [T], index: StridedIndex) -> Self {
        Self { data, index }
    }

    fn at(&self, offset: usize) -> Result<&'a T> {
        self.data
            .get(offset)
            .ok_or_else(|| Error::out_of_bounds(&self.index.curr(), &self.index.shape))
    }

    /// The current element, then advance.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<&'a T> {
        let offset = self.index.next_offset()?;
        self.at(offset)
    }

    /// The current element, then step back.
    pub fn back(&mut self) -> Result<&'a T> {
        let offset = self.index.back_offset()?;
        self.at(offset)
    }

    pub fn curr(&self) -> Vec<usize> {
        self.index.curr()
    }

    pub fn set_curr(&mut self, index: &[usize]) -> Result<()> {
        self.index.set_curr(index)
    }

    pub fn is_exhausted(&self) -> bool {
        self.index.is_exhausted()
    }
}

/// Write cursor over a tensor buffer.
pub struct CursorMut<'a, T> {
    data: &'a mut [T],
    index: StridedIndex,
}

impl<'a, T> CursorMut<'a, T> {
    pub(crate) fn new(data: &'a mut [T], index: StridedIndex) -> Self {
        Self { data, index }
    }

    fn at(&mut self, offset: usize) -> Result<&mut T> {
        let curr = self.index.curr();
        let shape = &self.index.shape;
        self.data
            .get_mut(offset)
            .ok_or_else(|| Error::out_of_bounds(&curr, shape))
    }

    /// The current element, then advance.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<&mut T> {
        let offset = self.index.next_offset()?;
        self.at(offset)
    }

    /// The current element, then step back.
    pub fn back(&mut self) -> Result<&mut T> {
        let offset = self.index.back_offset()?;
        self.at(offset)
    }

    pub fn curr(&self) -> Vec<usize> {
        self.index.curr()
    }

    pub fn set_curr(&mut self, index: &[usize]) -> Result<()> {
        self.index.set_curr(index)
    }

    pub fn is_exhausted(&self) -> bool {
        self.index.is_exhausted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(mut index: StridedIndex) -> Vec<usize> {
        let mut out = Vec::new();
        while !index.is_exhausted() {
            out.push(index.next_offset().unwrap());
        }
        out
    }

    #[test]
    fn row_major_walk() {
        let layout = Layout::contiguous((2, 3));
        assert_eq!(walk(StridedIndex::from_layout(&layout)), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn transposed_walk_follows_strides() {
        let layout = Layout::contiguous((2, 3)).transposed().unwrap();
        assert_eq!(walk(StridedIndex::from_layout(&layout)), vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn order_makes_first_axis_fastest() {
        let layout = Layout::contiguous((2, 3));
        // Axis 0 sits at position 1 (innermost), axis 1 at position 0.
        let index = StridedIndex::new(&layout, Some(&[1, 0]), &[0, 0]).unwrap();
        assert_eq!(walk(index), vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn starts_mid_tensor() {
        let layout = Layout::contiguous((2, 3));
        let mut index = StridedIndex::new(&layout, None, &[1, 1]).unwrap();
        assert_eq!(index.curr(), vec![1, 1]);
        assert_eq!(walk(index.clone()), vec![4, 5]);
        assert_eq!(index.next_offset().unwrap(), 4);
        assert_eq!(index.curr(), vec![1, 2]);
    }

    #[test]
    fn next_past_end_fails() {
        let layout = Layout::contiguous(2usize);
        let mut index = StridedIndex::from_layout(&layout);
        index.next_offset().unwrap();
        index.next_offset().unwrap();
        assert!(matches!(index.next_offset(), Err(Error::OutOfBounds { .. })));
    }

    #[test]
    fn back_mirrors_next() {
        let layout = Layout::contiguous((2, 2));
        let mut index = StridedIndex::new(&layout, None, &[1, 1]).unwrap();
        let offsets: Vec<_> = (0..4).map(|_| index.back_offset().unwrap()).collect();
        assert_eq!(offsets, vec![3, 2, 1, 0]);
        assert!(index.is_exhausted());
        assert!(index.back_offset().is_err());
    }

    #[test]
    fn set_curr_rearms() {
        let layout = Layout::contiguous((2, 2));
        let mut index = StridedIndex::from_layout(&layout);
        assert_eq!(walk(index.clone()).len(), 4);
        while !index.is_exhausted() {
            index.next_offset().unwrap();
        }
        index.set_curr(&[1, 0]).unwrap();
        assert_eq!(index.next_offset().unwrap(), 2);
        assert!(index.set_curr(&[0, 2]).is_err());
    }

    #[test]
    fn rejects_bad_order_and_start() {
        let layout = Layout::contiguous((2, 2));
        assert!(StridedIndex::new(&layout, Some(&[0, 0]), &[0, 0]).is_err());
        assert!(StridedIndex::new(&layout, Some(&[0]), &[0, 0]).is_err());
        assert!(matches!(
            StridedIndex::new(&layout, None, &[0, 2]),
            Err(Error::OutOfBounds { .. })
        ));
    }

    #[test]
    fn cursor_mut_writes_in_logical_order() {
        let layout = Layout::contiguous((2, 2)).transposed().unwrap();
        let mut data = vec![0; 4];
        let mut cursor = CursorMut::new(&mut data, StridedIndex::from_layout(&layout));
        for v in 1..=4 {
            *cursor.next().unwrap() = v;
        }
        assert!(cursor.is_exhausted());
        assert_eq!(data, vec![1, 3, 2, 4]);
    }

    #[test]
    fn cursor_back_walks_transposed_view() {
        let layout = Layout::contiguous((2, 3)).transposed().unwrap();
        let data = [1, 2, 3, 4, 5, 6];
        let mut cursor = Cursor::new(&data, StridedIndex::from_layout(&layout));
        cursor.set_curr(&[2, 1]).unwrap();
        let seen: Vec<i32> = (0..6).map(|_| *cursor.back().unwrap()).collect();
        assert_eq!(seen, vec![6, 3, 5, 2, 4, 1]);
        assert!(cursor.is_exhausted());
        assert!(cursor.back().is_err());

        cursor.set_curr(&[1, 0]).unwrap();
        assert_eq!(*cursor.next().unwrap(), 2);
        assert_eq!(cursor.curr(), vec![1, 1]);
    }

    #[test]
    fn cursor_mut_back_writes_in_reverse() {
        let layout = Layout::contiguous((2, 2)).transposed().unwrap();
        let mut data = vec![0; 4];
        let mut cursor = CursorMut::new(&mut data, StridedIndex::from_layout(&layout));
        cursor.set_curr(&[1, 1]).unwrap();
        for v in 1..=4 {
            *cursor.back().unwrap() = v;
        }
        assert!(cursor.is_exhausted());
        assert_eq!(data, vec![4, 2, 3, 1]);
    }

    #[test]
    fn iterator_impl_yields_offsets() {
        let layout = Layout::contiguous((3, 1));
        let offsets: Vec<usize> = StridedIndex::from_layout(&layout).collect();
        assert_eq!(offsets, vec![0, 1, 2]);
    }
}
