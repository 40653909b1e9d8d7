use std::time::Instant;
use tensorgrad_core::{DType, Graph, Tensor};

fn bench<T: DType>(type_name: &str, b: usize, m: usize, k: usize, n: usize) -> tensorgrad_core::Result<()> {
    // Number of times to run the matmul for averaging
    let iterations = 5;
    let mut total = std::time::Duration::new(0, 0);

    let graph = Graph::<T>::empty();
    let lhs = graph.leaf(Tensor::full(T::from_f64(1.), (b, m, k)));
    // Strided operands work too: transpose a (b, n, k) tensor into (b, k, n).
    let rhs = graph.leaf(Tensor::full(T::from_f64(2.), (b, n, k)).t()?);

    for _ in 0..iterations {
        let start = Instant::now();

        let out = std::hint::black_box(lhs.matmul(&rhs)?);
        out.seed_grad(T::ONE)?;
        out.backward()?;

        total += start.elapsed();
    }

    let avg = total / iterations;
    println!("{type_name} ({b}x{m}x{k} · {b}x{k}x{n}) forward+backward: {avg:?}");
    Ok(())
}

fn main() -> tensorgrad_core::Result<()> {
    bench::<f32>("f32", 1, 64, 64, 64)?;
    bench::<f64>("f64", 1, 64, 64, 64)?;
    bench::<f32>("f32", 4, 32, 48, 16)?;
    Ok(())
}
