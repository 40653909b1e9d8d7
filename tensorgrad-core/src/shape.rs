use std::fmt;

/// The extents of a tensor, outermost axis first.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self(dims)
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn elem_count(&self) -> usize {
        self.0.iter().product()
    }

    /// Row-major strides for this shape.
    pub fn stride_contiguous(&self) -> Vec<usize> {
        crate::layout::contiguous_strides(&self.0)
    }

    /// The shape with the last two extents swapped. Callers check the rank.
    pub(crate) fn transposed(&self) -> Self {
        let mut dims = self.0.clone();
        let n = dims.len();
        dims.swap(n - 2, n - 1);
        Self(dims)
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self(dims.to_vec())
    }
}

impl From<&Shape> for Shape {
    fn from(shape: &Shape) -> Self {
        shape.clone()
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self(dims.to_vec())
    }
}

impl From<usize> for Shape {
    fn from(d: usize) -> Self {
        Self(vec![d])
    }
}

macro_rules! shape {
    (@usize $C:ident) => {
        usize
    };
    ($($C:ident),+) => {
        impl From<($(shape!(@usize $C),)+)> for Shape {
            #[allow(non_snake_case)]
            fn from(($($C,)+): ($(shape!(@usize $C),)+)) -> Self {
                Self(vec![$($C,)+])
            }
        }
    };
}

shape!(A);
shape!(A, B);
shape!(A, B, C);
shape!(A, B, C, D);
shape!(A, B, C, D, E);
shape!(A, B, C, D, E, F);
