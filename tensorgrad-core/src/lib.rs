//! Tensorgrad is a small CPU tensor library with reverse-mode automatic
//! differentiation.
//!
//! Tensors are strided views over a shared, copy-on-write buffer, so a
//! transpose is a metadata change and every kernel walks its operands through
//! the same N-dimensional cursor regardless of layout.
//!
//! ## A quick guide
//! - Concrete values are [`Tensor`]s. Operations on them are evaluated
//!   immediately and return a new contiguous tensor.
//! - To differentiate, create a [`Graph`] and put leaves in it with
//!   [`Graph::leaf`] (records history) or [`Graph::constant`] (does not).
//!   These return [`GraphTensor`] handles.
//! - Operations on graph tensors evaluate eagerly and record an [`Op`] when
//!   every input records history.
//! - Seed the gradient of the output with [`GraphTensor::seed_grad`] and call
//!   [`GraphTensor::backward`]. Gradients accumulate into every tracked
//!   ancestor and are read back with [`GraphTensor::grad`].
//!
//! ## What can you do with it?
//! ```
//! use tensorgrad_core::{Graph, Tensor};
//!
//! let graph: Graph<f32> = Graph::empty();
//! let a = graph.leaf(Tensor::new(vec![1., 2., 3., 4.], (2, 2)).unwrap());
//! let b = graph.leaf(Tensor::new(vec![5., 6., 7., 8.], (2, 2)).unwrap());
//! let c = a.matmul(&b).unwrap();
//! assert_eq!(c.to_vec().unwrap(), vec![19., 22., 43., 50.]);
//!
//! c.seed_grad(1.0).unwrap();
//! c.backward().unwrap();
//! assert_eq!(a.grad().unwrap().to_vec2().unwrap(), vec![vec![11., 15.], vec![11., 15.]]);
//! assert_eq!(b.grad().unwrap().to_vec2().unwrap(), vec![vec![4., 4.], vec![6., 6.]]);
//! ```

mod cpu_storage;
mod dtype;
mod error;
mod graph;
mod iter;
mod layout;
mod shape;
mod tensor;

pub use cpu_storage::CpuStorage;
pub use dtype::{DType, DTypeOps, Expable};
pub use error::{Context, Error, Result};
pub use graph::{BinaryOpType, Graph, GraphTensorId, Op, PadConfig, TrackGrad, UnaryOpType};
pub use iter::{Cursor, CursorMut, StridedIndex};
pub use layout::Layout;
pub use shape::Shape;
pub use tensor::{GraphTensor, Tensor};
