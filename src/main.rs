//! Benchmark runner for the BitNet shapes.
//!
//! Usage: `tlgemm [config.toml]`

use std::time::Instant;

use tlgemm::dispatch::BITNET_SHAPES;
use tlgemm::{DispatchConfig, DispatchPath, Dispatcher, Result, lut_len, pack_ternary};

struct Case {
    m: usize,
    k: usize,
    packed: Vec<u8>,
    lut: Vec<i16>,
    scale: f32,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match std::env::args().nth(1) {
        Some(path) => DispatchConfig::load(&path)?,
        None => DispatchConfig::default(),
    };

    println!("=== Ternary LUT GEMV Benchmark ===\n");

    let dispatcher = Dispatcher::new(config)?;
    let iterations = 20;
    let mut all_results = Vec::new();

    println!("Worker threads: {}\n", dispatcher.thread_count());

    for shape in BITNET_SHAPES {
        println!("Shape: {}×{} (bm={}, bk={})", shape.m, shape.k, shape.bm, shape.bk);
        println!("{}", "-".repeat(50));

        let case = make_case(&dispatcher, shape.m, shape.k)?;

        let single = bench_fn(&case, iterations, |c, out| {
            dispatcher.qgemm_serial(c.m, c.k, &c.packed, &c.lut, 1.0, c.scale, out)?;
            Ok(DispatchPath::SingleThreaded)
        })?;
        let blocked = bench_fn(&case, iterations, |c, out| {
            dispatcher.qgemm(c.m, c.k, &c.packed, &c.lut, 1.0, c.scale, out)
        })?;
        let tiled = bench_fn(&case, iterations, |c, out| {
            dispatcher.qgemm_tiled(c.m, c.k, &c.packed, &c.lut, 1.0, c.scale, out)
        })?;

        let results = vec![
            ("Single-threaded", single),
            ("K-block parallel", blocked),
            ("Row-tile parallel", tiled),
        ];

        let baseline_time = results[0].1.0;
        for (i, (name, (time_ms, gops))) in results.iter().enumerate() {
            println!(
                "{}. {:18} {:8.3} ms  {:6.2} GOPS  ({:.1}×)",
                i + 1,
                name,
                time_ms,
                gops,
                baseline_time / time_ms
            );
        }
        println!();

        all_results.push(((shape.m, shape.k), results));
    }

    print_summary_table(&all_results);
    Ok(())
}

fn make_case(dispatcher: &Dispatcher, m: usize, k: usize) -> Result<Case> {
    let weights: Vec<i8> = (0..m * k).map(|i| (i % 3) as i8 - 1).collect();
    let activations: Vec<f32> = (0..k).map(|i| ((i % 200) as f32 - 100.0) / 100.0).collect();

    let packed = pack_ternary(&weights, m, k)?;
    let mut lut = vec![0i16; lut_len(k)];
    let (scale, _) = dispatcher.preprocess(m, &activations, &mut lut)?;

    Ok(Case {
        m,
        k,
        packed,
        lut,
        scale,
    })
}

/// Time `f` over `iterations` runs after one warmup; returns (ms, GOPS).
fn bench_fn<F>(case: &Case, iterations: usize, f: F) -> Result<(f64, f64)>
where
    F: Fn(&Case, &mut [f32]) -> Result<DispatchPath>,
{
    // Warmup, also creates the pool
    let mut out = vec![0.0f32; case.m];
    f(case, &mut out)?;

    let mut total = 0.0;
    for _ in 0..iterations {
        let start = Instant::now();
        f(case, &mut out)?;
        total += start.elapsed().as_secs_f64();
    }

    let avg = total / iterations as f64;
    let gops = 2.0 * (case.m * case.k) as f64 / avg / 1e9;
    Ok((avg * 1000.0, gops))
}

#[allow(clippy::type_complexity)]
fn print_summary_table(all_results: &[((usize, usize), Vec<(&str, (f64, f64))>)]) {
    println!("\n{}", "=".repeat(80));
    println!("SUMMARY");
    println!("{}", "=".repeat(80));

    print!("\n{:<20}", "Method");
    for ((m, k), _) in all_results {
        print!(" {:>14}", format!("{}×{}", m, k));
    }
    println!(" {:>10}", "Speedup");
    println!("{}", "-".repeat(80));

    let num_methods = all_results[0].1.len();

    for method_idx in 0..num_methods {
        let method_name = all_results[0].1[method_idx].0;
        print!("{:<20}", method_name);

        let mut speedups = Vec::new();
        for (_, results) in all_results {
            let (time_ms, gops) = results[method_idx].1;
            speedups.push(results[0].1.0 / time_ms);
            print!(" {:>11.2} GO", gops);
        }

        let avg_speedup: f64 = speedups.iter().sum::<f64>() / speedups.len() as f64;
        println!(" {:>9.1}×", avg_speedup);
    }

    println!("{}", "=".repeat(80));
    println!("\nGO = GOPS (billion ternary multiply-adds per second)");
    println!("Speedup relative to single-threaded. Higher is better.\n");
}
