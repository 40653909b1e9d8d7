use std::ops::{Add, Div, Mul, Neg, Sub};

use crate::{
    cpu_storage::CpuDevice,
    graph::{BinaryOpType, Graph, GraphTensorId, Op, PadConfig, TrackGrad, UnaryOpType},
    DType, Error, Result, Shape, Tensor,
};

/// A tensor living in a [`Graph`]. Operations on graph tensors are evaluated
/// eagerly and, when every input records history, remember how they were
/// produced so that [`GraphTensor::backward`] can differentiate them.
///
/// Cloning a `GraphTensor` clones the handle: both refer to the same node.
#[derive(Clone)]
pub struct GraphTensor<T: DType> {
    id: GraphTensorId,
    graph: Graph<T>,
}

impl<T: DType> GraphTensor<T> {
    pub(crate) fn from_parts(id: GraphTensorId, graph: Graph<T>) -> Self {
        Self { id, graph }
    }

    /// Get the graph tensor ID.
    pub fn id(&self) -> GraphTensorId {
        self.id
    }

    /// Retrieve the graph for this `GraphTensor`.
    pub fn graph(&self) -> &Graph<T> {
        &self.graph
    }

    /// The current value of this node. Cheap: the buffer is shared until
    /// either side writes.
    pub fn value(&self) -> Result<Tensor<T>> {
        self.graph.with_node(self.id, |node| node.tensor.clone())
    }

    pub fn shape(&self) -> Result<Shape> {
        self.graph.with_node(self.id, |node| node.tensor.shape().clone())
    }

    pub fn rank(&self) -> Result<usize> {
        self.graph.with_node(self.id, |node| node.tensor.rank())
    }

    pub fn elem_count(&self) -> Result<usize> {
        self.graph.with_node(self.id, |node| node.tensor.elem_count())
    }

    pub fn get(&self, index: &[usize]) -> Result<T> {
        self.graph.with_node(self.id, |node| node.tensor.get(index))?
    }

    pub fn set(&self, index: &[usize], v: T) -> Result<()> {
        self.graph
            .with_node_mut(self.id, |node| node.tensor.set(index, v))?
    }

    pub fn set_all(&self, v: T) -> Result<()> {
        self.graph.with_node_mut(self.id, |node| node.tensor.set_all(v))
    }

    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.graph.with_node(self.id, |node| node.tensor.to_vec())
    }

    /// Reshape the value of this node. Ops already recorded keep the shapes
    /// they saw.
    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<()> {
        let shape = shape.into();
        self.graph
            .with_node_mut(self.id, |node| node.tensor.reshape(shape))?
    }

    /// Swap the last two axes. Only allowed on tensors which do not record
    /// history; use [`Tensor::t`] on [`GraphTensor::value`] for a view.
    pub fn transpose(&self) -> Result<()> {
        if self.is_history_tracked()? {
            crate::bail!(
                "cannot transpose tensor {} in place while it records history",
                self.id.0
            );
        }
        self.graph
            .with_node_mut(self.id, |node| node.tensor.transpose())?
    }

    pub fn set_track_grad(&self, track: TrackGrad) -> Result<()> {
        self.graph.with_node_mut(self.id, |node| node.track = track)
    }

    pub fn is_history_tracked(&self) -> Result<bool> {
        self.graph
            .with_node(self.id, |node| node.track == TrackGrad::Yes)
    }

    /// Whether this node was produced by a recorded op.
    pub fn has_op(&self) -> Result<bool> {
        self.graph.with_node(self.id, |node| node.op.is_some())
    }

    /// Allocate a zero gradient if there is none yet.
    pub fn init_grad(&self) -> Result<()> {
        self.graph.with_node_mut(self.id, |node| node.init_grad())
    }

    /// The accumulated gradient, in the current shape of this tensor.
    pub fn grad(&self) -> Result<Tensor<T>> {
        self.graph.with_node(self.id, |node| -> Result<Tensor<T>> {
            let mut grad = node
                .grad
                .clone()
                .ok_or(Error::GradientNotInitialized { id: self.id.0 })?;
            grad.reshape(node.tensor.shape())?;
            Ok(grad)
        })?
    }

    /// Replace the gradient. It must have the shape of this tensor.
    pub fn set_grad(&self, grad: Tensor<T>) -> Result<()> {
        self.graph.with_node_mut(self.id, |node| {
            if grad.shape() != node.tensor.shape() {
                return Err(Error::ShapeMismatch {
                    op: "set_grad",
                    lhs: node.tensor.shape().clone(),
                    rhs: grad.shape().clone(),
                });
            }
            node.grad = Some(grad);
            Ok(())
        })?
    }

    /// Fill the gradient with `v`, allocating it first if needed. Seeding
    /// the output with ones before [`GraphTensor::backward`] yields the
    /// gradient of the sum of the output.
    pub fn seed_grad(&self, v: T) -> Result<()> {
        self.graph.with_node_mut(self.id, |node| {
            node.init_grad();
            if let Some(grad) = node.grad.as_mut() {
                grad.set_all(v);
            }
        })
    }

    pub fn zero_grad(&self) -> Result<()> {
        self.graph.with_node_mut(self.id, |node| {
            if let Some(grad) = node.grad.as_mut() {
                grad.set_all(T::ZERO);
            }
        })
    }

    /// The inputs of the op which produced this tensor.
    pub fn parents(&self) -> Result<Vec<Self>> {
        let ids = self.graph.with_node(self.id, |node| node.parents.clone())?;
        Ok(ids
            .into_iter()
            .map(|id| Self::from_parts(id, self.graph.clone()))
            .collect())
    }

    /// The recorded ops which consumed this tensor.
    pub fn children(&self) -> Result<Vec<Self>> {
        let ids = self.graph.with_node(self.id, |node| node.children.clone())?;
        Ok(ids
            .into_iter()
            .map(|id| Self::from_parts(id, self.graph.clone()))
            .collect())
    }

    /// Copy this node into a new leaf of the same graph, carrying over its
    /// value, gradient and tracking flag but none of its history.
    pub fn deep_clone(&self) -> Result<Self> {
        let (tensor, grad, track) = self.graph.with_node(self.id, |node| {
            (node.tensor.clone(), node.grad.clone(), node.track)
        })?;
        let copy = self.graph.tensor(tensor, track);
        if let Some(grad) = grad {
            copy.graph.with_node_mut(copy.id, |node| node.grad = Some(grad))?;
        }
        Ok(copy)
    }

    /// Accumulate gradients into every tracked ancestor of this tensor. The
    /// gradient of this tensor must be seeded by the caller.
    pub fn backward(&self) -> Result<()> {
        self.graph.backward(self.id)
    }

    fn check_same_graph(&self, rhs: &Self) -> Result<()> {
        if !self.graph.same_graph(&rhs.graph) {
            crate::bail!(
                "tensors {} and {} belong to different graphs",
                self.id.0,
                rhs.id.0
            );
        }
        Ok(())
    }

    fn binary_op(&self, rhs: &Self, operator: BinaryOpType) -> Result<Self> {
        self.check_same_graph(rhs)?;
        let lhs_t = self.value()?;
        let rhs_t = rhs.value()?;
        let out = CpuDevice.binary_impl(&lhs_t, &rhs_t, operator)?;
        self.graph.record(
            out,
            Op::BinaryOp {
                l_id: self.id,
                r_id: rhs.id,
                operator,
                lhs: lhs_t,
                rhs: rhs_t,
            },
        )
    }

    fn unary_op(&self, operator: UnaryOpType) -> Result<Self> {
        let input = self.value()?;
        let out = CpuDevice.unary_impl(&input, operator)?;
        self.graph.record(
            out.clone(),
            Op::UnaryOp {
                v_id: self.id,
                operator,
                input,
                output: out,
            },
        )
    }

    pub fn add(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOpType::Add)
    }

    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOpType::Sub)
    }

    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOpType::Mul)
    }

    pub fn div(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOpType::Div)
    }

    /// Matrix multiplication: (.. x M x K) * (.. x K x N) = (.. x M x N)
    pub fn matmul(&self, rhs: &Self) -> Result<Self> {
        self.check_same_graph(rhs)?;
        let lhs_t = self.value()?;
        let rhs_t = rhs.value()?;
        let out = lhs_t.matmul(&rhs_t)?;
        self.graph.record(
            out,
            Op::MatMul {
                l_id: self.id,
                r_id: rhs.id,
                lhs: lhs_t,
                rhs: rhs_t,
            },
        )
    }

    pub fn neg(&self) -> Result<Self> {
        self.unary_op(UnaryOpType::Neg)
    }

    pub fn relu(&self) -> Result<Self> {
        self.unary_op(UnaryOpType::Relu)
    }

    pub fn exp(&self) -> Result<Self> {
        self.unary_op(UnaryOpType::Exp)
    }

    pub fn pad(&self, cfg: PadConfig<T>) -> Result<Self> {
        let input = self.value()?;
        let out = input.pad(cfg.rows, cfg.cols, cfg.value)?;
        self.graph.record(
            out,
            Op::Pad {
                v_id: self.id,
                rows: cfg.rows,
                cols: cfg.cols,
                input_shape: input.shape().clone(),
            },
        )
    }
}

macro_rules! graphtensor_binop {
    ($trait:ident, $fn_name:ident) => {
        impl<T: DType> $trait for &GraphTensor<T> {
            type Output = Result<GraphTensor<T>>;
            /// Add an elementwise operation to the graph.
            fn $fn_name(self, rhs: Self) -> Self::Output {
                GraphTensor::$fn_name(self, rhs)
            }
        }
    };
}

graphtensor_binop!(Add, add);
graphtensor_binop!(Div, div);
graphtensor_binop!(Mul, mul);
graphtensor_binop!(Sub, sub);

impl<T: DType> Neg for &GraphTensor<T> {
    type Output = Result<GraphTensor<T>>;
    fn neg(self) -> Self::Output {
        GraphTensor::neg(self)
    }
}
