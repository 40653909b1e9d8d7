use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    fmt,
    rc::Rc,
};

use petgraph::{
    algo::toposort,
    dot::{Config, Dot},
    graphmap::DiGraphMap,
    Graph as PetGraph,
};

use crate::{cpu_storage::CpuDevice, Context, DType, Error, GraphTensor, Result, Shape, Tensor};

/// Whether operations consuming a tensor record history for it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TrackGrad {
    #[default]
    Yes,
    No,
}

/// Padding applied to the trailing two axes by [`GraphTensor::pad`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PadConfig<T: DType> {
    pub rows: usize,
    pub cols: usize,
    pub value: T,
}

impl<T: DType> Default for PadConfig<T> {
    fn default() -> Self {
        Self {
            rows: 2,
            cols: 2,
            value: T::ZERO,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum BinaryOpType {
    Add,
    Div,
    Sub,
    Mul,
}

impl BinaryOpType {
    pub fn as_c_op(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Div => "/",
            Self::Sub => "-",
            Self::Mul => "*",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Div => "div",
            Self::Sub => "sub",
            Self::Mul => "mul",
        }
    }

    pub fn as_closure<T: DType>(&self) -> fn(T, T) -> T {
        match self {
            Self::Add => |x, y| x + y,
            Self::Div => |x, y| x / y,
            Self::Sub => |x, y| x - y,
            Self::Mul => |x, y| x * y,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum UnaryOpType {
    Neg,
    Relu,
    Exp,
}

impl UnaryOpType {
    pub fn to_closure<T: DType>(&self) -> fn(T) -> T {
        match self {
            Self::Neg => |x: T| -x,
            Self::Relu => |x: T| x.maximum(T::ZERO),
            Self::Exp => |x: T| x.exp(),
        }
    }
}

/// Handle to a node of a [`Graph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphTensorId(pub(crate) usize);

impl From<GraphTensorId> for usize {
    fn from(value: GraphTensorId) -> Self {
        value.0
    }
}

impl From<&GraphTensorId> for usize {
    fn from(value: &GraphTensorId) -> Self {
        value.0
    }
}

impl From<usize> for GraphTensorId {
    fn from(value: usize) -> Self {
        Self(value)
    }
}

/// The operation which produced a node.
///
/// Inputs are captured as views at the time the op ran, so a backward rule
/// sees the shapes and values of its forward pass even if the input nodes
/// have since been reshaped or written to.
#[derive(Debug, Clone)]
pub enum Op<T: DType> {
    BinaryOp {
        l_id: GraphTensorId,
        r_id: GraphTensorId,
        operator: BinaryOpType,
        lhs: Tensor<T>,
        rhs: Tensor<T>,
    },
    UnaryOp {
        v_id: GraphTensorId,
        operator: UnaryOpType,
        input: Tensor<T>,
        output: Tensor<T>,
    },
    MatMul {
        l_id: GraphTensorId,
        r_id: GraphTensorId,
        lhs: Tensor<T>,
        rhs: Tensor<T>,
    },
    Pad {
        v_id: GraphTensorId,
        rows: usize,
        cols: usize,
        input_shape: Shape,
    },
}

impl<T: DType> Op<T> {
    pub fn inputs(&self) -> Vec<GraphTensorId> {
        match self {
            Self::BinaryOp { l_id, r_id, .. } | Self::MatMul { l_id, r_id, .. } => {
                vec![*l_id, *r_id]
            }
            Self::UnaryOp { v_id, .. } | Self::Pad { v_id, .. } => vec![*v_id],
        }
    }

    /// Shape of the output as produced by the forward pass.
    pub fn output_shape(&self) -> Shape {
        match self {
            Self::BinaryOp { lhs, .. } => lhs.shape().clone(),
            Self::UnaryOp { output, .. } => output.shape().clone(),
            Self::MatMul { lhs, rhs, .. } => {
                let mut dims = lhs.dims().to_vec();
                let n = dims.len();
                dims[n - 1] = rhs.dims()[n - 1];
                Shape::from(dims)
            }
            Self::Pad {
                rows,
                cols,
                input_shape,
                ..
            } => {
                let mut dims = input_shape.dims().to_vec();
                let n = dims.len();
                dims[n - 2] += 2 * rows;
                dims[n - 1] += 2 * cols;
                Shape::from(dims)
            }
        }
    }

    /// Gradient contributions for each input, given the error signal `g` in
    /// the output shape.
    pub fn backward(&self, g: &Tensor<T>) -> Result<Vec<(GraphTensorId, Tensor<T>)>> {
        let grads = match self {
            Self::BinaryOp {
                l_id,
                r_id,
                operator,
                lhs,
                rhs,
            } => match operator {
                BinaryOpType::Add => vec![(*l_id, g.clone()), (*r_id, g.clone())],
                BinaryOpType::Sub => vec![(*l_id, g.clone()), (*r_id, g.neg()?)],
                BinaryOpType::Mul => vec![(*l_id, g.mul(rhs)?), (*r_id, g.mul(lhs)?)],
                BinaryOpType::Div => {
                    let dr = g.mul(lhs)?.div(&rhs.mul(rhs)?)?.neg()?;
                    vec![(*l_id, g.div(rhs)?), (*r_id, dr)]
                }
            },
            Self::UnaryOp {
                v_id,
                operator,
                input,
                output,
            } => {
                let dx = match operator {
                    UnaryOpType::Neg => g.neg()?,
                    UnaryOpType::Relu => CpuDevice.zip_map_impl("relu_backward", input, g, |x, dy| {
                        if x > T::ZERO {
                            dy
                        } else {
                            T::ZERO
                        }
                    })?,
                    UnaryOpType::Exp => g.mul(output)?,
                };
                vec![(*v_id, dx)]
            }
            Self::MatMul {
                l_id,
                r_id,
                lhs,
                rhs,
            } => vec![
                (*l_id, g.matmul(&rhs.t()?)?),
                (*r_id, lhs.t()?.matmul(g)?),
            ],
            Self::Pad {
                v_id,
                rows,
                cols,
                input_shape,
            } => vec![(*v_id, CpuDevice.crop_impl(g, *rows, *cols, input_shape)?)],
        };
        Ok(grads)
    }
}

impl<T: DType> fmt::Display for Op<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BinaryOp { operator, .. } => write!(f, "BinOp({})", operator.as_c_op()),
            Self::UnaryOp { operator, .. } => write!(f, "UnOp({operator:?})"),
            Self::MatMul { .. } => write!(f, "MatMul"),
            Self::Pad { rows, cols, .. } => write!(f, "Pad({rows}, {cols})"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Node<T: DType> {
    pub(crate) tensor: Tensor<T>,
    pub(crate) grad: Option<Tensor<T>>,
    pub(crate) op: Option<Op<T>>,
    pub(crate) track: TrackGrad,
    pub(crate) parents: Vec<GraphTensorId>,
    pub(crate) children: Vec<GraphTensorId>,
}

impl<T: DType> Node<T> {
    fn leaf(tensor: Tensor<T>, track: TrackGrad) -> Self {
        Self {
            tensor,
            grad: None,
            op: None,
            track,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    pub(crate) fn init_grad(&mut self) {
        if self.grad.is_none() {
            self.grad = Some(self.tensor.zeros_like());
        }
    }
}

/// Arena owning every tensor of a computation. [`GraphTensor`]s are handles
/// into it; cloning a `Graph` clones the handle, not the nodes.
#[derive(Clone)]
pub struct Graph<T: DType> {
    nodes: Rc<RefCell<Vec<Node<T>>>>,
}

impl<T: DType> Graph<T> {
    /// Create an empty Graph
    pub fn empty() -> Self {
        Self {
            nodes: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    pub(crate) fn same_graph(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.nodes, &other.nodes)
    }

    /// Add a leaf node holding `tensor`.
    pub fn tensor(&self, tensor: Tensor<T>, track: TrackGrad) -> GraphTensor<T> {
        let mut nodes = self.nodes.borrow_mut();
        let id = GraphTensorId(nodes.len());
        nodes.push(Node::leaf(tensor, track));
        GraphTensor::from_parts(id, self.clone())
    }

    /// A leaf which records history.
    pub fn leaf(&self, tensor: Tensor<T>) -> GraphTensor<T> {
        self.tensor(tensor, TrackGrad::Yes)
    }

    /// A leaf which never records history.
    pub fn constant(&self, tensor: Tensor<T>) -> GraphTensor<T> {
        self.tensor(tensor, TrackGrad::No)
    }

    pub(crate) fn with_node<R>(&self, id: GraphTensorId, f: impl FnOnce(&Node<T>) -> R) -> Result<R> {
        let nodes = self.nodes.borrow();
        let node = nodes
            .get(id.0)
            .with_context(|| format!("no tensor with id {} in this graph", id.0))?;
        Ok(f(node))
    }

    pub(crate) fn with_node_mut<R>(
        &self,
        id: GraphTensorId,
        f: impl FnOnce(&mut Node<T>) -> R,
    ) -> Result<R> {
        let mut nodes = self.nodes.borrow_mut();
        let node = nodes
            .get_mut(id.0)
            .with_context(|| format!("no tensor with id {} in this graph", id.0))?;
        Ok(f(node))
    }

    /// Add the output of an op. History is recorded only when every input is
    /// tracked; in that case the gradients of the output and of every input
    /// are initialized. Otherwise the output is a fresh tracked leaf.
    pub(crate) fn record(&self, out: Tensor<T>, op: Op<T>) -> Result<GraphTensor<T>> {
        let inputs = op.inputs();
        let mut nodes = self.nodes.borrow_mut();
        let id = GraphTensorId(nodes.len());
        let mut tracked = true;
        for input in &inputs {
            let node = nodes
                .get(input.0)
                .with_context(|| format!("no tensor with id {} in this graph", input.0))?;
            tracked &= node.track == TrackGrad::Yes;
        }
        if !tracked {
            nodes.push(Node::leaf(out, TrackGrad::Yes));
            return Ok(GraphTensor::from_parts(id, self.clone()));
        }

        tracing::debug!(id = id.0, op = %op, shape = %out.shape(), "recording op");
        for input in &inputs {
            let node = &mut nodes[input.0];
            node.init_grad();
            if !node.children.contains(&id) {
                node.children.push(id);
            }
        }
        let mut parents = inputs;
        parents.dedup();
        let mut node = Node::leaf(out, TrackGrad::Yes);
        node.init_grad();
        node.op = Some(op);
        node.parents = parents;
        nodes.push(node);
        Ok(GraphTensor::from_parts(id, self.clone()))
    }

    /// Nodes reachable from `root` through parent edges, as a DAG with
    /// edges pointing from input to output.
    fn ancestry(nodes: &[Node<T>], root: GraphTensorId) -> DiGraphMap<GraphTensorId, ()> {
        let mut g = DiGraphMap::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        g.add_node(root);
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            for &parent in &nodes[id.0].parents {
                g.add_edge(parent, id, ());
                stack.push(parent);
            }
        }
        g
    }

    /// Propagate the gradient of `root` to every tracked ancestor.
    ///
    /// Consumers always run before the tensors they consume, so each rule
    /// reads a fully accumulated error signal. Signals live only for this
    /// call: stored gradients of intermediate nodes are added to, never
    /// propagated again.
    pub fn backward(&self, root: GraphTensorId) -> Result<()> {
        let mut nodes = self.nodes.borrow_mut();
        let root_node = nodes
            .get(root.0)
            .with_context(|| format!("no tensor with id {} in this graph", root.0))?;
        if root_node.op.is_none() {
            return Err(Error::NoGradFn { id: root.0 });
        }
        let seed = root_node
            .grad
            .clone()
            .ok_or(Error::GradientNotInitialized { id: root.0 })?;

        let dag = Self::ancestry(&nodes, root);
        let order = toposort(&dag, None)
            .map_err(|cycle| Error::msg(format!("cycle through tensor {}", cycle.node_id().0)))?;

        let mut signals: HashMap<GraphTensorId, Tensor<T>> = HashMap::new();
        signals.insert(root, seed);
        for id in order.into_iter().rev() {
            let node = &nodes[id.0];
            if node.track == TrackGrad::No {
                continue;
            }
            let Some(op) = node.op.clone() else {
                continue;
            };
            let Some(mut g) = signals.remove(&id) else {
                continue;
            };
            g.reshape(op.output_shape())?;

            let _span = tracing::debug_span!("backward", id = id.0, op = %op).entered();
            for (input, contribution) in op.backward(&g)? {
                let node = &mut nodes[input.0];
                if node.track == TrackGrad::No {
                    continue;
                }
                let grad = node
                    .grad
                    .get_or_insert_with(|| contribution.zeros_like());
                grad.reshape(contribution.shape())?;
                grad.add_assign(&contribution)?;

                match signals.get_mut(&input) {
                    Some(signal) => {
                        signal.reshape(contribution.shape())?;
                        signal.add_assign(&contribution)?;
                    }
                    None => {
                        signals.insert(input, contribution);
                    }
                }
            }
        }
        Ok(())
    }

    /// Reset every allocated gradient to zero.
    pub fn zero_grads(&self) {
        for node in self.nodes.borrow_mut().iter_mut() {
            if let Some(grad) = node.grad.as_mut() {
                grad.set_all(T::ZERO);
            }
        }
    }

    pub fn to_petgraph(&self) -> PetGraph<String, ()> {
        let nodes = self.nodes.borrow();
        let mut g = PetGraph::<String, ()>::new();
        let idx: Vec<_> = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let label = match &node.op {
                    Some(op) => format!("{op} {}", node.tensor.shape()),
                    None => format!("Leaf#{i} {}", node.tensor.shape()),
                };
                g.add_node(label)
            })
            .collect();
        for (i, node) in nodes.iter().enumerate() {
            for parent in &node.parents {
                g.add_edge(idx[parent.0], idx[i], ());
            }
        }
        g
    }

    /// Produce a DOT format string of this graph.
    pub fn to_dot(&self) -> String {
        let g = self.to_petgraph();
        format!("{:?}", Dot::with_config(&g, &[Config::EdgeNoLabel]))
    }
}
