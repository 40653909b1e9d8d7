use tensorgrad_core::{Graph, PadConfig, Tensor};

fn main() -> tensorgrad_core::Result<()> {
    let graph: Graph<f32> = Graph::empty();
    let w = graph.leaf(Tensor::randn((3, 4), 0.0, 0.1)?);
    let x = graph.leaf(Tensor::arange(0.0, 1.0, 8));
    x.reshape((4, 2))?;
    let b = graph.leaf(Tensor::ones((3, 2)));

    let h = w.matmul(&x)?;
    let h = (&h + &b)?.relu()?;
    let out = h.pad(PadConfig::default())?.exp()?;

    out.seed_grad(1.0)?;
    out.backward()?;

    dbg!(out.shape()?);
    dbg!(w.grad()?);
    dbg!(b.grad()?);
    dbg!(x.grad()?);
    println!("{}", graph.to_dot());
    Ok(())
}
