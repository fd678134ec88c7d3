//! Benchmark and tuning runner for the kernel variants.
//!
//! Runs every variant that can implement the requested problem and prints
//! one CSV row per variant:
//!
//! ```text
//! kernel,key,m,n,k,groups,latency_us,gflops
//! ```

use clap::Parser;
use half::f16;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Instant;
use tilegemm::{
    Element, ElementType, GemmConfig, GemmDescriptor, GemmError, GemmPlan, GroupedMatmul,
    KernelSerial, Layout, LayoutTag, ProblemShape, Workspace, WorkspaceSize,
};

#[derive(Parser, Debug)]
#[command(name = "tilegemm", about = "Benchmark the tiled GEMM kernel variants")]
struct Args {
    #[arg(long, default_value_t = 1024)]
    m: usize,

    #[arg(long, default_value_t = 1024)]
    n: usize,

    #[arg(long, default_value_t = 1024)]
    k: usize,

    /// Run this many equal problems as one grouped launch.
    #[arg(long = "group_count", default_value_t = 1)]
    group_count: usize,

    /// Operand A as `dtype:layout`, e.g. `f32:row` or `f16:col`.
    #[arg(long = "A", default_value = "f32:row")]
    a: Operand,

    #[arg(long = "B", default_value = "f32:row")]
    b: Operand,

    #[arg(long = "C", default_value = "f32:row")]
    c: Operand,

    /// Compute units (defaults to the configured or available count).
    #[arg(long)]
    units: Option<usize>,

    /// Pipeline stages (buffer slots per unit).
    #[arg(long)]
    stages: Option<usize>,

    #[arg(long, default_value_t = 3)]
    iterations: usize,
}

#[derive(Debug, Clone, Copy)]
struct Operand {
    element: ElementType,
    layout: LayoutTag,
}

impl FromStr for Operand {
    type Err = GemmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (element, layout) = s.split_once(':').unwrap_or((s, "row"));
        let layout: LayoutTag = layout.parse()?;
        if !layout.is_nd() {
            return Err(GemmError::InvalidConfig(format!(
                "operand layout must be row or col, got `{layout}`"
            )));
        }
        Ok(Self {
            element: element.parse()?,
            layout,
        })
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), GemmError> {
    let element = args.a.element;
    if args.b.element != element || args.c.element != element {
        return Err(GemmError::ElementMismatch {
            expected: element.to_string(),
            actual: format!("{}/{}", args.b.element, args.c.element),
        });
    }

    let mut config = (*GemmConfig::get()).clone();
    if let Some(units) = args.units {
        config.platform.compute_units = Some(units);
    }
    if let Some(stages) = args.stages {
        config.pipeline.stages = stages;
    }
    config.validate()?;

    println!("kernel,key,m,n,k,groups,latency_us,gflops");
    match element {
        ElementType::F16 => bench::<f16>(args, &config),
        ElementType::F32 => bench::<f32>(args, &config),
        ElementType::F64 => bench::<f64>(args, &config),
    }
}

fn bench<T: Element>(args: &Args, config: &GemmConfig) -> Result<(), GemmError> {
    let shape = ProblemShape::new(args.m, args.n, args.k);
    if args.group_count > 1 {
        return bench_grouped::<T>(args, shape, config);
    }

    let desc = GemmDescriptor::dense(T::TYPE, shape, args.a.layout, args.b.layout, args.c.layout);
    let a = test_data::<T>(desc.layout_a.capacity());
    let b = test_data::<T>(desc.layout_b.capacity());
    let mut c = vec![T::default(); desc.layout_c.capacity()];

    let mut plans = Vec::with_capacity(KernelSerial::ALL.len());
    for serial in KernelSerial::ALL {
        let mut forced = config.clone();
        forced.tiling.kernel = Some(serial);
        match GemmPlan::<T>::exact(&desc, &forced) {
            Ok(plan) => plans.push(plan),
            Err(err) if err.is_capability() => log::debug!("Skipping {}: {}", serial, err),
            Err(err) => return Err(err),
        }
    }

    // One workspace, sized for the hungriest variant.
    let size = plans
        .iter()
        .fold(WorkspaceSize::default(), |size, plan| size.max(plan.workspace_size()));
    let mut workspace = Workspace::allocate(size)?;
    for plan in &plans {
        let latency = time_it(args.iterations, || plan.run(&a, &b, &mut c, &mut workspace))?;
        print_row(plan.kernel_name(), &plan.key().to_string(), shape, 1, latency);
    }
    Ok(())
}

fn bench_grouped<T: Element>(args: &Args, shape: ProblemShape, config: &GemmConfig) -> Result<(), GemmError> {
    let ProblemShape { m, n, k } = shape;
    let (layout_a, layout_b, layout_c) = (
        Layout::nd(args.a.layout, m, k),
        Layout::nd(args.b.layout, k, n),
        Layout::nd(args.c.layout, m, n),
    );
    let groups = args.group_count;
    let grouped = GroupedMatmul::uniform(groups, shape, layout_a, layout_b, layout_c);
    grouped.can_implement()?;

    let a = test_data::<T>(groups * layout_a.capacity());
    let b = test_data::<T>(groups * layout_b.capacity());
    let mut c = vec![T::default(); groups * layout_c.capacity()];

    let latency = time_it(args.iterations, || grouped.run(&a, &b, &mut c, config))?;
    print_row("grouped", "-", shape, groups, latency);
    Ok(())
}

/// Average seconds per call over `iterations` timed runs, after one warmup.
fn time_it<F>(iterations: usize, mut f: F) -> Result<f64, GemmError>
where
    F: FnMut() -> Result<(), GemmError>,
{
    // Warmup
    f()?;

    let iterations = iterations.max(1);
    let mut total = 0.0;
    for _ in 0..iterations {
        let start = Instant::now();
        f()?;
        total += start.elapsed().as_secs_f64();
    }
    Ok(total / iterations as f64)
}

fn print_row(kernel: &str, key: &str, shape: ProblemShape, groups: usize, seconds: f64) {
    let gflops = shape.flops() * groups as f64 / seconds / 1e9;
    println!(
        "{},{},{},{},{},{},{:.1},{:.2}",
        kernel,
        key,
        shape.m,
        shape.n,
        shape.k,
        groups,
        seconds * 1e6,
        gflops
    );
}

fn test_data<T: Element>(len: usize) -> Vec<T> {
    (0..len).map(|i| T::from_f64((i % 7) as f64 * 0.125)).collect()
}
