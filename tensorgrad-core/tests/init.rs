use tensorgrad_core::{Error, Graph, Tensor, TrackGrad};

#[test]
fn fill_and_zeros() {
    let tensor = Tensor::<f32>::full(3.5, (2, 3));
    assert_eq!(tensor.to_vec2().unwrap(), vec![vec![3.5; 3]; 2]);
    assert_eq!(Tensor::<f64>::zeros((2, 2, 2)).to_vec(), vec![0.0; 8]);
    assert_eq!(tensor.ones_like().to_vec(), vec![1.0; 6]);
}

#[test]
fn new_from_rows() {
    let tensor = Tensor::new(vec![1.0f64, 2., 3., 4., 5., 6.], (3, 2)).unwrap();
    assert_eq!(tensor.strides(), &[2, 1]);
    assert_eq!(tensor.get(&[2, 0]).unwrap(), 5.0);
    assert!(matches!(
        tensor.get(&[3, 0]),
        Err(Error::OutOfBounds { .. })
    ));
    assert!(matches!(
        tensor.get(&[0, 0, 0]),
        Err(Error::OutOfBounds { .. })
    ));
}

#[test]
fn to_vec3_nests() {
    let tensor = Tensor::arange(0.0f32, 1.0, 8);
    let mut cube = tensor.clone();
    cube.reshape((2, 2, 2)).unwrap();
    assert_eq!(
        cube.to_vec3().unwrap(),
        vec![
            vec![vec![0., 1.], vec![2., 3.]],
            vec![vec![4., 5.], vec![6., 7.]],
        ]
    );
    assert_eq!(tensor.dims(), &[8]);
}

#[test]
fn randn_has_requested_moments() {
    let tensor = Tensor::<f64>::randn(10_000usize, 3.0, 0.5).unwrap();
    let data = tensor.to_vec();
    let mean = data.iter().sum::<f64>() / data.len() as f64;
    let var = data.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / data.len() as f64;
    assert!((mean - 3.0).abs() < 0.05, "mean {mean}");
    assert!((var.sqrt() - 0.5).abs() < 0.05, "std {}", var.sqrt());
}

#[test]
fn rand_stays_in_range() {
    let tensor = Tensor::<f32>::rand((16, 16), 2.0, 3.0).unwrap();
    assert!(tensor.to_vec().iter().all(|v| (2.0..3.0).contains(v)));
    assert!(Tensor::<f32>::rand(4usize, 1.0, 1.0).is_err());
}

#[test]
fn graph_leaves() {
    let graph = Graph::<f32>::empty();
    assert!(graph.is_empty());
    let a = graph.leaf(Tensor::ones(2usize));
    let b = graph.constant(Tensor::ones(2usize));
    let c = graph.tensor(Tensor::ones(2usize), TrackGrad::default());
    assert_eq!(graph.len(), 3);
    assert!(a.is_history_tracked().unwrap());
    assert!(!b.is_history_tracked().unwrap());
    assert!(c.is_history_tracked().unwrap());
    assert!(!a.has_op().unwrap());
}

#[test]
fn set_through_handle() {
    let graph = Graph::<f64>::empty();
    let a = graph.leaf(Tensor::zeros((2, 2)));
    a.set(&[1, 0], 7.0).unwrap();
    assert_eq!(a.to_vec().unwrap(), vec![0., 0., 7., 0.]);
    a.set_all(1.0).unwrap();
    assert_eq!(a.value().unwrap().to_vec(), vec![1.0; 4]);
    assert!(a.set(&[2, 0], 1.0).is_err());
}
