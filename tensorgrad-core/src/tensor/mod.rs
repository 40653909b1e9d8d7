pub mod concretetensor;
pub mod graphtensor;

pub use concretetensor::Tensor;
pub use graphtensor::GraphTensor;
