//! rtcore CLI - backend report, scene renderer and refit benchmark.

use std::env;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, bail, Context};
use tracing::{debug, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use rtcore::config::RtConfig;
use rtcore::scenes::{box_instances, Scene, SceneKind};
use rtcore::{RayTracer, ShadingMode, TraceRaysOptions};

/// Set to `1` to write a Chrome trace to `trace.json`.
const TRACE_ENV: &str = "RTCORE_TRACE";

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = "info";
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = "debug",
            "-vv" | "--trace" => level = "trace",
            "-q" | "--quiet" => level = "warn",
            _ => filtered_args.push(arg),
        }
    }
    let _trace_guard = init_tracing(level);

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    let result = match filtered_args[0] {
        "info" | "i" => cmd_info(&filtered_args[1..]),
        "render" | "r" => cmd_render(&filtered_args[1..]),
        "bench" | "b" => cmd_bench(&filtered_args[1..]),
        "version" | "-V" | "--version" => {
            print_version();
            Ok(())
        }
        "help" | "h" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            eprintln!();
            print_help();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(level: &str) -> Option<tracing_chrome::FlushGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (chrome_layer, guard) = if env::var(TRACE_ENV).ok().as_deref() == Some("1") {
        let (layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
            .file("trace.json")
            .build();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(chrome_layer)
        .try_init()
    {
        eprintln!("Warning: logging disabled: {}", e);
    }

    guard
}

fn print_version() {
    println!(
        "rtcore {} (built {} {})",
        env!("CARGO_PKG_VERSION"),
        env!("RTCORE_BUILD_DATE"),
        env!("RTCORE_BUILD_TIME")
    );
}

fn print_help() {
    println!("rtcore - ray tracing acceleration structure toolkit");
    println!();
    println!("USAGE:");
    println!("    rtcore [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    i, info   [--backend <list>]    Negotiate a backend and report it");
    println!("    r, render [options]             Render a built-in scene to PNG");
    println!("    b, bench  [options]             Refit and trace the box scene repeatedly");
    println!("    version                         Show version and build date");
    println!("    h, help                         Show this help");
    println!();
    println!("RENDER/BENCH OPTIONS:");
    println!("    --scene <triangle|box>          Scene to build (bench always uses box)");
    println!("    --width <px>  --height <px>     Image size (default 640x480)");
    println!("    --mode <bary|palette>           Hit colouring");
    println!("    --backend <list>                Comma-separated candidates, e.g. vulkan,cpu");
    println!("    --out <file.png>                Output image (render, default out.png)");
    println!("    --frames <n>                    Frame count (bench, default 100)");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose                   Debug output");
    println!("    -vv, --trace                    Trace output");
    println!("    -q, --quiet                     Warnings and errors only");
    println!();
    println!("ENVIRONMENT:");
    println!("    RTCORE_CONFIG                   Config file path");
    println!("    RTCORE_BACKEND                  Backend candidates");
    println!("    RTCORE_TRACE=1                  Write a Chrome trace to trace.json");
    println!("    RUST_LOG                        Log filter (overrides -v/-q)");
}

/// Value following `name`, if present.
fn flag<'a>(args: &[&'a str], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|&a| a == name)
        .and_then(|i| args.get(i + 1).copied())
}

fn flag_u32(args: &[&str], name: &str, default: u32) -> anyhow::Result<u32> {
    match flag(args, name) {
        Some(v) => v.parse::<u32>().with_context(|| format!("{} expects a number, got '{}'", name, v)),
        None => Ok(default),
    }
}

fn load_config(args: &[&str]) -> RtConfig {
    let mut config = RtConfig::load();
    if let Some(list) = flag(args, "--backend") {
        config.apply_backend_override(list);
    }
    if let Some(mode) = flag(args, "--mode").and_then(ShadingMode::parse) {
        config.shading.mode = mode;
    }
    debug!("candidates: {:?}", config.candidates());
    config
}

fn cmd_info(args: &[&str]) -> anyhow::Result<()> {
    let config = load_config(args);
    let rt = RayTracer::with_config(&config);

    println!("Backend:    {}", rt.backend_name());
    println!("Supported:  {}", rt.is_supported());
    println!("Candidates: {}", join(&config.candidates()));
    match RtConfig::default_path() {
        Some(path) => println!("Config:     {}", path.display()),
        None => println!("Config:     (no config directory)"),
    }
    Ok(())
}

fn cmd_render(args: &[&str]) -> anyhow::Result<()> {
    let scene_name = flag(args, "--scene").unwrap_or("triangle");
    let kind = SceneKind::parse(scene_name).ok_or_else(|| anyhow!("unknown scene '{}'", scene_name))?;
    let width = flag_u32(args, "--width", 640)?;
    let height = flag_u32(args, "--height", 480)?;
    let out = PathBuf::from(flag(args, "--out").unwrap_or("out.png"));

    let config = load_config(args);
    let mut rt = RayTracer::with_config(&config);
    if !rt.is_supported() {
        bail!("no ray tracing backend available");
    }

    let scene = Scene::build(&mut rt, kind).ok_or_else(|| anyhow!("failed to build {} scene", kind.name()))?;
    let camera = scene.camera(width as f32 / height.max(1) as f32);

    let start = Instant::now();
    let image = rt.trace_rays(&TraceRaysOptions::new(scene.tlas, width, height, camera));
    let elapsed = start.elapsed();
    println!("Live:     {}", rt.resource_counts());
    scene.destroy(&mut rt);

    let image = image.ok_or_else(|| anyhow!("traceRays failed"))?;
    image
        .save_png(&out)
        .with_context(|| format!("writing {}", out.display()))?;

    info!(
        "{} {}x{} on {} in {:.2} ms -> {}",
        kind.name(),
        width,
        height,
        rt.backend_name(),
        elapsed.as_secs_f64() * 1000.0,
        out.display()
    );
    Ok(())
}

fn cmd_bench(args: &[&str]) -> anyhow::Result<()> {
    let width = flag_u32(args, "--width", 640)?;
    let height = flag_u32(args, "--height", 480)?;
    let frames = flag_u32(args, "--frames", 100)?.max(1);

    let config = load_config(args);
    let mut rt = RayTracer::with_config(&config);
    if !rt.is_supported() {
        bail!("no ray tracing backend available");
    }

    let scene = Scene::build(&mut rt, SceneKind::Box).ok_or_else(|| anyhow!("failed to build box scene"))?;
    let options = TraceRaysOptions::new(scene.tlas, width, height, scene.camera(width as f32 / height.max(1) as f32));

    let mut refit_secs = 0.0;
    let mut trace_secs = 0.0;
    let mut failed = 0u32;
    for frame in 0..frames {
        let instances = box_instances(scene.blas, frame as f32 * 0.1);

        let start = Instant::now();
        if !rt.update_tlas(scene.tlas, &instances) {
            failed += 1;
        }
        refit_secs += start.elapsed().as_secs_f64();

        let start = Instant::now();
        if rt.trace_rays(&options).is_none() {
            failed += 1;
        }
        trace_secs += start.elapsed().as_secs_f64();
    }
    let counts = rt.resource_counts();
    scene.destroy(&mut rt);

    println!("Backend:  {}", rt.backend_name());
    println!("Frames:   {} at {}x{}", frames, width, height);
    println!("Refit:    {:.3} ms/frame", refit_secs * 1000.0 / frames as f64);
    println!("Trace:    {:.3} ms/frame", trace_secs * 1000.0 / frames as f64);
    println!("Live:     {}", counts);
    if failed > 0 {
        bail!("{} calls failed", failed);
    }
    Ok(())
}

fn join(kinds: &[rtcore::BackendKind]) -> String {
    kinds.iter().map(|k| k.name()).collect::<Vec<_>>().join(",")
}
