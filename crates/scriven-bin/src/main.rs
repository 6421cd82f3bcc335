//! Scriven entrypoint: shape a string against the built-in demo face and
//! print the resulting slot stream, optionally with a structured trace.

mod config;

use anyhow::Result;
use clap::Parser;
use core_engine::demo::{demo_shaper, DemoFace, SPACE_GID};
use core_engine::{CachedShaper, Font};
use core_slot::Segment;
use core_trace::{TraceSink, VecSink};
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "scriven", version, about = "Scriven shaping demo")]
struct Args {
    /// Text to shape (demo cmap covers 'a'..'f' and space).
    pub text: String,
    /// Optional configuration file path (overrides discovery of
    /// `scriven.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
    /// Write the structured shaping trace as JSON to this path.
    #[arg(long = "trace-out")]
    pub trace_out: Option<PathBuf>,
    /// Pixels per em for the advance column.
    #[arg(long = "ppem", default_value_t = 12.0)]
    pub ppem: f32,
    /// Shape without the word cache.
    #[arg(long = "no-cache")]
    pub no_cache: bool,
}

fn configure_logging() -> Option<WorkerGuard> {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match std::env::var_os("SCRIVEN_LOG_DIR") {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "scriven.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

fn print_segment(seg: &Segment, face: &DemoFace, font: Font) {
    println!("{:>4}  {:>5}  {:>8}  {:>8}  {:>8}", "slot", "gid", "x", "y", "advance");
    for (i, ix) in seg.iter().enumerate() {
        let slot = seg.slot(ix);
        let origin = slot.origin();
        println!(
            "{:>4}  {:>5}  {:>8.2}  {:>8.2}  {:>8.2}",
            i,
            slot.gid(),
            origin.x,
            origin.y,
            font.pixel_advance(face, slot.gid()),
        );
    }
    println!("total advance: {:.2}", seg.advance().x);
}

fn main() -> Result<()> {
    let _log_guard = configure_logging();
    let args = Args::parse();
    let cfg = config::load_from(args.config.clone())?;

    info!(
        target: "runtime",
        text_len = args.text.len(),
        cached = !args.no_cache && cfg.file.cache.enabled,
        "startup"
    );

    let face = DemoFace::new();
    let font = Font::new(args.ppem, 24.0);
    let want_trace = args.trace_out.is_some() || cfg.file.trace.emit;
    let mut sink = VecSink::default();
    let sink_ref: Option<&mut dyn TraceSink> = if want_trace { Some(&mut sink) } else { None };

    let seg = if args.no_cache || !cfg.file.cache.enabled {
        demo_shaper(&face).shape(&face, &args.text, sink_ref)
    } else {
        let mut cached = CachedShaper::new(
            demo_shaper(&face),
            cfg.effective_max_segments(),
            SPACE_GID,
        );
        cached.shape(&face, &args.text, sink_ref)
    };

    print_segment(&seg, &face, font);

    if want_trace {
        let json = serde_json::to_string_pretty(&sink.records)?;
        match &args.trace_out {
            Some(path) => {
                std::fs::write(path, &json)?;
                info!(target: "runtime", path = %path.display(), "trace written");
            }
            None => println!("{json}"),
        }
    }
    Ok(())
}
