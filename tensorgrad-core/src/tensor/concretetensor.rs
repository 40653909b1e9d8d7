use std::{
    fmt,
    ops::{Add, Div, Mul, Neg, Sub},
    sync::Arc,
};

use rand::distr::Uniform;
use rand_distr::{Distribution, Normal};

use crate::{
    cpu_storage::{CpuDevice, CpuStorage},
    graph::{BinaryOpType, UnaryOpType},
    iter::{Cursor, CursorMut, StridedIndex},
    Context, DType, Error, Layout, Result, Shape,
};

/// Tensors are strided n dimensional arrays over a shared buffer.
///
/// Cloning a tensor is cheap and yields an independent value: the buffer is
/// shared until one side writes to it. Only functions which allocate, copy
/// data, or do operations return `Result`s.
#[derive(Clone)]
pub struct Tensor<T: DType> {
    storage: Arc<CpuStorage<T>>,
    layout: Layout,
}

impl<T: DType> Tensor<T> {
    pub(crate) fn from_storage(storage: Arc<CpuStorage<T>>, layout: Layout) -> Self {
        Self { storage, layout }
    }

    /// Callers guarantee `data.len() == shape.elem_count()`.
    pub(crate) fn from_parts(data: Vec<T>, shape: Shape) -> Self {
        Self::from_storage(Arc::new(CpuStorage(data)), Layout::contiguous(shape))
    }

    /// Create a tensor from row-major data.
    pub fn new(data: Vec<T>, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ShapeMismatch {
                op: "new",
                lhs: Shape::from(data.len()),
                rhs: shape,
            });
        }
        Ok(Self::from_parts(data, shape))
    }

    /// Create a tensor filled with some value.
    pub fn full(v: T, shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        Self::from_parts(vec![v; shape.elem_count()], shape)
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Self::full(T::ZERO, shape)
    }

    /// Create a tensor filled with ones.
    pub fn ones(shape: impl Into<Shape>) -> Self {
        Self::full(T::ONE, shape)
    }

    pub fn zeros_like(&self) -> Self {
        Self::zeros(self.shape())
    }

    pub fn ones_like(&self) -> Self {
        Self::ones(self.shape())
    }

    /// A vector of `len` elements `start, start + step, ...`.
    pub fn arange(start: T, step: T, len: usize) -> Self {
        let mut data = Vec::with_capacity(len);
        let mut v = start;
        for _ in 0..len {
            data.push(v);
            v += step;
        }
        Self::from_parts(data, Shape::from(len))
    }

    /// Samples drawn uniformly from `[lo, hi)`.
    pub fn rand(shape: impl Into<Shape>, lo: T, hi: T) -> Result<Self> {
        let shape = shape.into();
        let dist = Uniform::new(lo.to_f64(), hi.to_f64())
            .with_context(|| format!("invalid uniform range [{lo:?}, {hi:?})"))?;
        let mut rng = rand::rng();
        let data = (0..shape.elem_count())
            .map(|_| T::from_f64(dist.sample(&mut rng)))
            .collect();
        Ok(Self::from_parts(data, shape))
    }

    /// Samples drawn from a normal distribution.
    pub fn randn(shape: impl Into<Shape>, mean: T, std: T) -> Result<Self> {
        let shape = shape.into();
        let dist = Normal::new(mean.to_f64(), std.to_f64())
            .with_context(|| format!("invalid normal parameters mean={mean:?} std={std:?}"))?;
        let mut rng = rand::rng();
        let data = (0..shape.elem_count())
            .map(|_| T::from_f64(dist.sample(&mut rng)))
            .collect();
        Ok(Self::from_parts(data, shape))
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn dims(&self) -> &[usize] {
        self.layout.dims()
    }

    pub fn strides(&self) -> &[usize] {
        self.layout.strides()
    }

    pub fn rank(&self) -> usize {
        self.layout.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.layout.elem_count()
    }

    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    /// Element at `index`.
    pub fn get(&self, index: &[usize]) -> Result<T> {
        let offset = self.layout.flat_index(index)?;
        self.storage
            .0
            .get(offset)
            .copied()
            .ok_or_else(|| Error::out_of_bounds(index, self.shape()))
    }

    pub fn get_mut(&mut self, index: &[usize]) -> Result<&mut T> {
        let offset = self.layout.flat_index(index)?;
        let shape = self.layout.shape();
        Arc::make_mut(&mut self.storage)
            .0
            .get_mut(offset)
            .ok_or_else(|| Error::out_of_bounds(index, shape))
    }

    pub fn set(&mut self, index: &[usize], v: T) -> Result<()> {
        *self.get_mut(index)? = v;
        Ok(())
    }

    /// Overwrite every element with `v`.
    pub fn set_all(&mut self, v: T) {
        Arc::make_mut(&mut self.storage).0.fill(v);
    }

    /// Reinterpret the elements (in logical row-major order) with a new
    /// shape. A non-contiguous tensor is materialized first.
    pub fn reshape(&mut self, shape: impl Into<Shape>) -> Result<()> {
        let shape = shape.into();
        if &shape == self.shape() {
            return Ok(());
        }
        if shape.elem_count() != self.elem_count() {
            return Err(Error::ShapeMismatch {
                op: "reshape",
                lhs: self.shape().clone(),
                rhs: shape,
            });
        }
        self.as_contiguous()?;
        self.layout = Layout::contiguous(shape);
        Ok(())
    }

    /// Swap the last two axes in place. The buffer is untouched.
    pub fn transpose(&mut self) -> Result<()> {
        self.layout.transpose()
    }

    /// A transposed view sharing this tensor's buffer.
    pub fn t(&self) -> Result<Self> {
        Ok(Self::from_storage(
            self.storage.clone(),
            self.layout.transposed()?,
        ))
    }

    /// Rewrite the buffer in logical row-major order and reset the strides.
    /// Does nothing for a tensor which is already contiguous.
    pub fn as_contiguous(&mut self) -> Result<()> {
        if self.is_contiguous() {
            return Ok(());
        }
        tracing::trace!(shape = %self.shape(), "materializing strided tensor");
        let mut cursor = self.begin();
        let mut data = Vec::with_capacity(self.elem_count());
        for _ in 0..self.elem_count() {
            data.push(*cursor.next()?);
        }
        self.storage = Arc::new(CpuStorage(data));
        self.layout = Layout::contiguous(self.shape().clone());
        Ok(())
    }

    /// Read cursor at the first element, row-major.
    pub fn begin(&self) -> Cursor<'_, T> {
        Cursor::new(&self.storage.0, StridedIndex::from_layout(&self.layout))
    }

    /// Write cursor at the first element, row-major.
    pub fn begin_mut(&mut self) -> CursorMut<'_, T> {
        let index = StridedIndex::from_layout(&self.layout);
        CursorMut::new(&mut Arc::make_mut(&mut self.storage).0, index)
    }

    /// Read cursor with a custom loop order, starting at `start`.
    pub fn iter_with(&self, order: Option<&[usize]>, start: &[usize]) -> Result<Cursor<'_, T>> {
        let index = StridedIndex::new(&self.layout, order, start)?;
        Ok(Cursor::new(&self.storage.0, index))
    }

    /// Write cursor with a custom loop order, starting at `start`.
    pub fn iter_mut_with(
        &mut self,
        order: Option<&[usize]>,
        start: &[usize],
    ) -> Result<CursorMut<'_, T>> {
        let index = StridedIndex::new(&self.layout, order, start)?;
        Ok(CursorMut::new(&mut Arc::make_mut(&mut self.storage).0, index))
    }

    /// All elements in logical row-major order.
    pub fn to_vec(&self) -> Vec<T> {
        let data = self.storage.as_slice();
        StridedIndex::from_layout(&self.layout)
            .map(|offset| data[offset])
            .collect()
    }

    /// Get data for a vector.
    pub fn to_vec1(&self) -> Result<Vec<T>> {
        if self.rank() != 1 {
            crate::bail!("to_vec1 expects a rank 1 tensor, got shape {}", self.shape());
        }
        Ok(self.to_vec())
    }

    /// Get data for a matrix.
    pub fn to_vec2(&self) -> Result<Vec<Vec<T>>> {
        let &[_, cols] = self.dims() else {
            crate::bail!("to_vec2 expects a rank 2 tensor, got shape {}", self.shape());
        };
        Ok(self
            .to_vec()
            .chunks(cols.max(1))
            .map(<[T]>::to_vec)
            .collect())
    }

    /// Get data for a 3 dimensional tensor.
    pub fn to_vec3(&self) -> Result<Vec<Vec<Vec<T>>>> {
        let &[_, rows, cols] = self.dims() else {
            crate::bail!("to_vec3 expects a rank 3 tensor, got shape {}", self.shape());
        };
        let flat = self.to_vec();
        Ok(flat
            .chunks((rows * cols).max(1))
            .map(|m| m.chunks(cols.max(1)).map(<[T]>::to_vec).collect())
            .collect())
    }

    pub fn add(&self, rhs: &Self) -> Result<Self> {
        CpuDevice.binary_impl(self, rhs, BinaryOpType::Add)
    }

    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        CpuDevice.binary_impl(self, rhs, BinaryOpType::Sub)
    }

    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        CpuDevice.binary_impl(self, rhs, BinaryOpType::Mul)
    }

    pub fn div(&self, rhs: &Self) -> Result<Self> {
        CpuDevice.binary_impl(self, rhs, BinaryOpType::Div)
    }

    /// Batched matrix multiplication over the last two axes:
    /// `(.., M, K) x (.., K, N) = (.., M, N)`.
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        CpuDevice.matmul_impl(self, rhs)
    }

    pub fn neg(&self) -> Result<Self> {
        CpuDevice.unary_impl(self, UnaryOpType::Neg)
    }

    pub fn relu(&self) -> Result<Self> {
        CpuDevice.unary_impl(self, UnaryOpType::Relu)
    }

    pub fn exp(&self) -> Result<Self> {
        CpuDevice.unary_impl(self, UnaryOpType::Exp)
    }

    /// Surround the last two axes with `rows` and `cols` elements of `value`
    /// on each side.
    pub fn pad(&self, rows: usize, cols: usize, value: T) -> Result<Self> {
        CpuDevice.pad_impl(self, rows, cols, value)
    }

    /// `self = self + rhs` elementwise, in place.
    pub(crate) fn add_assign(&mut self, rhs: &Self) -> Result<()> {
        CpuDevice.inplace_binary_impl(self, rhs, BinaryOpType::Add)
    }
}

impl<T: DType> fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("dtype", &T::NAME)
            .field("shape", self.shape())
            .field("strides", &self.strides())
            .field("data", &self.to_vec())
            .finish()
    }
}

macro_rules! tensor_binop {
    ($trait:ident, $fn_name:ident) => {
        impl<T: DType> $trait for &Tensor<T> {
            type Output = Result<Tensor<T>>;
            fn $fn_name(self, rhs: Self) -> Self::Output {
                Tensor::$fn_name(self, rhs)
            }
        }
    };
}

tensor_binop!(Add, add);
tensor_binop!(Div, div);
tensor_binop!(Mul, mul);
tensor_binop!(Sub, sub);

impl<T: DType> Neg for &Tensor<T> {
    type Output = Result<Tensor<T>>;
    fn neg(self) -> Self::Output {
        Tensor::neg(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_checks_length() {
        assert!(matches!(
            Tensor::new(vec![1.0f32, 2.0], (3, 1)),
            Err(Error::ShapeMismatch { op: "new", .. })
        ));
    }

    #[test]
    fn clone_is_copy_on_write() {
        let a = Tensor::new(vec![1.0f64, 2., 3.], 3usize).unwrap();
        let mut b = a.clone();
        b.set(&[0], 10.0).unwrap();
        assert_eq!(a.to_vec(), vec![1., 2., 3.]);
        assert_eq!(b.to_vec(), vec![10., 2., 3.]);
    }

    #[test]
    fn transposed_view_reads_through_strides() {
        let a = Tensor::new(vec![1.0f32, 2., 3., 4., 5., 6.], (2, 3)).unwrap();
        let t = a.t().unwrap();
        assert_eq!(t.dims(), &[3, 2]);
        assert_eq!(t.get(&[2, 1]).unwrap(), 6.0);
        assert_eq!(t.to_vec2().unwrap(), vec![vec![1., 4.], vec![2., 5.], vec![3., 6.]]);
        assert!(a.is_contiguous());
    }

    #[test]
    fn reshape_materializes_views() {
        let mut t = Tensor::new(vec![1.0f64, 2., 3., 4., 5., 6.], (2, 3))
            .unwrap()
            .t()
            .unwrap();
        t.reshape(6usize).unwrap();
        assert!(t.is_contiguous());
        assert_eq!(t.to_vec(), vec![1., 4., 2., 5., 3., 6.]);
        assert!(matches!(
            t.reshape((4, 2)),
            Err(Error::ShapeMismatch { op: "reshape", .. })
        ));
    }

    #[test]
    fn reshape_to_same_shape_keeps_strides() {
        let mut t = Tensor::<f32>::zeros((2, 3)).t().unwrap();
        let strides = t.strides().to_vec();
        t.reshape((3, 2)).unwrap();
        assert_eq!(t.strides(), strides.as_slice());
        assert!(!t.is_contiguous());
    }

    #[test]
    fn custom_order_cursor() {
        let t = Tensor::new(vec![1.0f32, 2., 3., 4.], (2, 2)).unwrap();
        let mut c = t.iter_with(Some(&[1, 0]), &[0, 0]).unwrap();
        let seen: Vec<f32> = (0..4).map(|_| *c.next().unwrap()).collect();
        assert_eq!(seen, vec![1., 3., 2., 4.]);
        assert!(c.is_exhausted());
    }

    #[test]
    fn custom_order_write_cursor() {
        let mut t = Tensor::<f32>::zeros((2, 2));
        let mut c = t.iter_mut_with(Some(&[1, 0]), &[0, 0]).unwrap();
        for v in 1..=4 {
            *c.next().unwrap() = v as f32;
        }
        assert!(c.is_exhausted());
        assert_eq!(t.to_vec(), vec![1., 3., 2., 4.]);

        let mut c = t.iter_mut_with(None, &[1, 0]).unwrap();
        *c.next().unwrap() = 9.;
        assert_eq!(t.to_vec2().unwrap(), vec![vec![1., 3.], vec![9., 4.]]);
    }

    #[test]
    fn back_over_transposed_tensor() {
        let t = Tensor::new(vec![1.0f64, 2., 3., 4.], (2, 2)).unwrap().t().unwrap();
        let mut c = t.iter_with(None, &[1, 1]).unwrap();
        let seen: Vec<f64> = (0..4).map(|_| *c.back().unwrap()).collect();
        assert_eq!(seen, vec![4., 2., 3., 1.]);
        assert!(c.is_exhausted());
    }

    #[test]
    fn randn_rejects_negative_std() {
        assert!(Tensor::<f64>::randn(4usize, 0.0, -1.0).is_err());
        let r = Tensor::<f64>::rand((2, 2), -1.0, 1.0).unwrap();
        assert!(r.to_vec().iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn arange_counts_up() {
        let t = Tensor::arange(1.0f32, 0.5, 4);
        assert_eq!(t.to_vec1().unwrap(), vec![1.0, 1.5, 2.0, 2.5]);
        assert!(t.to_vec2().is_err());
    }
}
