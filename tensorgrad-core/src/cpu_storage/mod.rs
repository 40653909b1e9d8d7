use crate::{
    graph::{BinaryOpType, UnaryOpType},
    iter::StridedIndex,
    DType, Error, Layout, Result, Shape, Tensor,
};

/// Flat, row-major element buffer. Tensors share it behind an `Arc` and
/// clone it on first write.
#[derive(Clone, Debug)]
pub struct CpuStorage<T: DType>(pub(crate) Vec<T>);

impl<T: DType> CpuStorage<T> {
    pub fn as_slice(&self) -> &[T] {
        &self.0
    }
}

/// Evaluates kernels. Every kernel reads its operands through strided
/// cursors and writes a fresh contiguous output.
pub(crate) struct CpuDevice;

fn check_same_shape<T: DType>(op: &'static str, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Result<()> {
    if lhs.shape() != rhs.shape() {
        return Err(Error::ShapeMismatch {
            op,
            lhs: lhs.shape().clone(),
            rhs: rhs.shape().clone(),
        });
    }
    Ok(())
}

impl CpuDevice {
    /// Lock-step elementwise combination of two identically shaped tensors.
    pub(crate) fn zip_map_impl<T: DType, F: Fn(T, T) -> T>(
        &self,
        op: &'static str,
        lhs: &Tensor<T>,
        rhs: &Tensor<T>,
        f: F,
    ) -> Result<Tensor<T>> {
        check_same_shape(op, lhs, rhs)?;
        let mut l = lhs.begin();
        let mut r = rhs.begin();
        let mut out = Vec::with_capacity(lhs.elem_count());
        for _ in 0..lhs.elem_count() {
            out.push(f(*l.next()?, *r.next()?));
        }
        Ok(Tensor::from_parts(out, lhs.shape().clone()))
    }

    pub(crate) fn binary_impl<T: DType>(
        &self,
        lhs: &Tensor<T>,
        rhs: &Tensor<T>,
        operator: BinaryOpType,
    ) -> Result<Tensor<T>> {
        self.zip_map_impl(operator.name(), lhs, rhs, operator.as_closure())
    }

    /// `dst = dst <op> src`, elementwise and in place.
    pub(crate) fn inplace_binary_impl<T: DType>(
        &self,
        dst: &mut Tensor<T>,
        src: &Tensor<T>,
        operator: BinaryOpType,
    ) -> Result<()> {
        check_same_shape(operator.name(), dst, src)?;
        let f = operator.as_closure::<T>();
        let n = dst.elem_count();
        let mut s = src.begin();
        let mut d = dst.begin_mut();
        for _ in 0..n {
            let x = d.next()?;
            *x = f(*x, *s.next()?);
        }
        Ok(())
    }

    pub(crate) fn unary_impl<T: DType>(
        &self,
        x: &Tensor<T>,
        operator: UnaryOpType,
    ) -> Result<Tensor<T>> {
        let f = operator.to_closure::<T>();
        let mut it = x.begin();
        let mut out = Vec::with_capacity(x.elem_count());
        for _ in 0..x.elem_count() {
            out.push(f(*it.next()?));
        }
        Ok(Tensor::from_parts(out, x.shape().clone()))
    }

    /// Batched matrix product over the trailing two axes.
    ///
    /// Leading axes must be identical. Each output element is a dot product
    /// along the contraction axis: `lhs` is walked along its last axis and
    /// `rhs` through a transposed view, so both cursors advance over the
    /// contraction axis fastest and jump rows with `set_curr`.
    pub(crate) fn matmul_impl<T: DType>(&self, lhs: &Tensor<T>, rhs: &Tensor<T>) -> Result<Tensor<T>> {
        for t in [lhs, rhs] {
            if t.rank() < 2 {
                return Err(Error::InvalidRank {
                    op: "matmul",
                    min: 2,
                    got: t.rank(),
                });
            }
        }
        let rank = lhs.rank();
        let (l, r) = (lhs.dims(), rhs.dims());
        if rhs.rank() != rank || l[..rank - 2] != r[..rank - 2] || l[rank - 1] != r[rank - 2] {
            return Err(Error::ShapeMismatch {
                op: "matmul",
                lhs: lhs.shape().clone(),
                rhs: rhs.shape().clone(),
            });
        }
        let k = l[rank - 1];
        let mut out_dims = l.to_vec();
        out_dims[rank - 1] = r[rank - 1];
        let out_layout = Layout::contiguous(out_dims);

        let rhs_t = rhs.t()?;
        let mut a = lhs.begin();
        let mut b = rhs_t.begin();
        let mut a_start = vec![0; rank];
        let mut b_start = vec![0; rank];
        let mut data = Vec::with_capacity(out_layout.elem_count());
        let mut out_index = StridedIndex::from_layout(&out_layout);
        while !out_index.is_exhausted() {
            let idx = out_index.curr();
            out_index.next_offset()?;
            a_start[..rank - 2].copy_from_slice(&idx[..rank - 2]);
            b_start[..rank - 2].copy_from_slice(&idx[..rank - 2]);
            a_start[rank - 2] = idx[rank - 2];
            b_start[rank - 2] = idx[rank - 1];

            let mut acc = T::ZERO;
            if k > 0 {
                a.set_curr(&a_start)?;
                b.set_curr(&b_start)?;
                for _ in 0..k {
                    acc += *a.next()? * *b.next()?;
                }
            }
            data.push(acc);
        }
        Ok(Tensor::from_parts(data, out_layout.shape().clone()))
    }

    /// Pad the trailing two axes by `rows`/`cols` on both sides with `value`.
    pub(crate) fn pad_impl<T: DType>(
        &self,
        x: &Tensor<T>,
        rows: usize,
        cols: usize,
        value: T,
    ) -> Result<Tensor<T>> {
        let rank = x.rank();
        if rank < 2 {
            return Err(Error::InvalidRank {
                op: "pad",
                min: 2,
                got: rank,
            });
        }
        let mut dims = x.dims().to_vec();
        dims[rank - 2] += 2 * rows;
        dims[rank - 1] += 2 * cols;
        let mut out = Tensor::full(value, dims);
        let mut src = x.begin();
        while !src.is_exhausted() {
            let mut idx = src.curr();
            let v = *src.next()?;
            idx[rank - 2] += rows;
            idx[rank - 1] += cols;
            out.set(&idx, v)?;
        }
        Ok(out)
    }

    /// Inverse of [`CpuDevice::pad_impl`]: the interior region of `padded`
    /// that corresponds to an unpadded tensor of `shape`.
    pub(crate) fn crop_impl<T: DType>(
        &self,
        padded: &Tensor<T>,
        rows: usize,
        cols: usize,
        shape: &Shape,
    ) -> Result<Tensor<T>> {
        let rank = shape.rank();
        let mut data = Vec::with_capacity(shape.elem_count());
        let mut index = StridedIndex::from_layout(&Layout::contiguous(shape.clone()));
        while !index.is_exhausted() {
            let mut idx = index.curr();
            index.next_offset()?;
            idx[rank - 2] += rows;
            idx[rank - 1] += cols;
            data.push(padded.get(&idx)?);
        }
        Ok(Tensor::from_parts(data, shape.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matmul_2d() {
        let a = Tensor::new(vec![1.0f64, 2., 3., 4.], (2, 2)).unwrap();
        let b = Tensor::new(vec![5.0f64, 6., 7., 8.], (2, 2)).unwrap();
        let c = CpuDevice.matmul_impl(&a, &b).unwrap();
        assert_eq!(c.to_vec(), vec![19., 22., 43., 50.]);
    }

    #[test]
    fn matmul_rectangular_batched() {
        // Two batches of (2x3)·(3x1).
        let a = Tensor::new((1..=12).map(|v| v as f64).collect(), (2, 2, 3)).unwrap();
        let b = Tensor::new(vec![1.0f64, 0., 1., 0., 1., 0.], (2, 3, 1)).unwrap();
        let c = CpuDevice.matmul_impl(&a, &b).unwrap();
        assert_eq!(c.dims(), &[2, 2, 1]);
        assert_eq!(c.to_vec(), vec![4., 10., 8., 11.]);
    }

    #[test]
    fn matmul_on_transposed_operand() {
        let a = Tensor::new(vec![1.0f64, 3., 2., 4.], (2, 2)).unwrap().t().unwrap();
        let b = Tensor::new(vec![5.0f64, 6., 7., 8.], (2, 2)).unwrap();
        let c = CpuDevice.matmul_impl(&a, &b).unwrap();
        assert_eq!(c.to_vec(), vec![19., 22., 43., 50.]);
        // The operand's own layout is untouched.
        assert!(!a.is_contiguous());
    }

    #[test]
    fn matmul_rejects_bad_shapes() {
        let a = Tensor::<f32>::zeros((2, 3));
        let b = Tensor::<f32>::zeros((2, 3));
        assert!(matches!(
            CpuDevice.matmul_impl(&a, &b),
            Err(Error::ShapeMismatch { op: "matmul", .. })
        ));
        let v = Tensor::<f32>::zeros(3usize);
        assert!(matches!(
            CpuDevice.matmul_impl(&v, &b),
            Err(Error::InvalidRank { .. })
        ));
        let batched = Tensor::<f32>::zeros((2, 3, 2));
        let other_batch = Tensor::<f32>::zeros((3, 2, 2));
        assert!(CpuDevice.matmul_impl(&batched, &other_batch).is_err());
    }

    #[test]
    fn pad_then_crop() {
        let x = Tensor::new(vec![1.0f32, 2., 3., 4.], (2, 2)).unwrap();
        let padded = CpuDevice.pad_impl(&x, 1, 2, 0.0).unwrap();
        assert_eq!(padded.dims(), &[4, 6]);
        assert_eq!(padded.get(&[1, 2]).unwrap(), 1.0);
        assert_eq!(padded.get(&[2, 3]).unwrap(), 4.0);
        assert_eq!(padded.get(&[0, 0]).unwrap(), 0.0);
        let cropped = CpuDevice.crop_impl(&padded, 1, 2, x.shape()).unwrap();
        assert_eq!(cropped.to_vec(), x.to_vec());
    }

    #[test]
    fn inplace_accumulates_through_views() {
        let mut dst = Tensor::new(vec![1.0f64, 1., 1., 1.], (2, 2)).unwrap();
        let src = Tensor::new(vec![1.0f64, 2., 3., 4.], (2, 2)).unwrap().t().unwrap();
        CpuDevice
            .inplace_binary_impl(&mut dst, &src, BinaryOpType::Add)
            .unwrap();
        assert_eq!(dst.to_vec(), vec![2., 4., 3., 5.]);
    }
}
