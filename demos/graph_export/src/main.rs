// Graph Export Demo — from a network description to graph text
//
// Architecture: Input(4) → Dense(8) → ReLU → Dense(3) → Softmax
//
// This demo shows:
//   1. Building a network with the DSL from a seeded context
//   2. Feeding it batches from a TensorDataset
//   3. Recording one forward pass on an ExecutionTape
//   4. Turning the tape into a ComputeGraph
//   5. Printing the graph as Graphviz DOT and StableHLO text
//
// Run with RUST_LOG=debug to see every executed operation.

use std::sync::Arc;

use log::info;
use tapestry::nn::Module;
use tapestry::prelude::*;

fn main() -> tapestry::Result<()> {
    env_logger::init();

    let ctx = ExecutionContext::new(
        Arc::new(tapestry::CpuOps),
        ContextConfig::default().with_seed(2024),
    );

    // 1. The network
    let net = network("mlp")
        .input(4)
        .dense(8)
        .relu()
        .dense(3)
        .softmax()
        .build(&ctx)?;
    println!("network '{}': {} parameters", net.name(), net.num_parameters());
    for (name, p) in net.named_parameters() {
        println!("  {name:<12} {}{}", p.dtype(), p.shape());
    }
    println!();

    // 2. Six random samples, three classes
    let x = ctx.rand_uniform((6, 4), -1.0, 1.0)?;
    let y = ctx.tensor(&[0.0, 1.0, 2.0, 0.0, 1.0, 2.0], 6)?;
    let dataset = TensorDataset::new(&x, &y)?.shuffle(7);
    let mut session = Session::new(ctx);

    let mut recorded = None;
    for (i, batch) in dataset.batches(4)?.enumerate() {
        let (bx, _) = batch?;
        // 3. Only the first batch is recorded
        if recorded.is_none() {
            let (tape, probs) =
                session.record_with(ExecutionTape::recording(), |s| net.forward(s, &bx))?;
            info!("recorded {} operations", tape.len());
            println!("batch {i}: probabilities {:?}", probs.to_f64_vec()?);
            recorded = Some(tape);
        } else {
            let probs = net.forward(&mut session, &bx)?;
            println!("batch {i}: probabilities {:?}", probs.to_f64_vec()?);
        }
    }
    println!();

    let Some(tape) = recorded else {
        tapestry::bail!("dataset produced no batches");
    };

    // 4. Tape → graph
    let graph = tape.to_compute_graph()?;
    println!("{graph}");

    // 5. Exports
    println!("--- DOT ---");
    print!("{}", to_dot(&graph, &DotOptions::default()));
    println!();
    println!("--- StableHLO ---");
    print!(
        "{}",
        to_stablehlo(&graph, &StableHloOptions::default().with_function_name("mlp"))?
    );

    Ok(())
}
