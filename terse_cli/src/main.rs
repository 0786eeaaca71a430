use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use xxhash_rust::xxh3::xxh3_64;

use terse_core::{
    with_typed_array, ElementType, Frame, Mode, Reader, Settings, TypedArray, Writer,
    DEFAULT_BLOCK_SIZE, FORMAT_VERSION,
};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "terse",
    about = "Terse: lossless compression of fixed-width integer arrays (TRPX files)",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a raw array file into a Terse file
    ///
    /// The input holds k × product(dims) host-native elements and becomes k frames.
    Compress {
        /// Raw element file ("-" reads stdin)
        input: PathBuf,
        /// Destination Terse file
        output: PathBuf,
        /// Element type: i8 | u8 | i16 | u16 | i32 | u32 | i64 | u64
        #[arg(short = 't', long)]
        dtype: ElementType,
        /// Frame dimensions, comma separated (e.g. 512,512)
        #[arg(short, long, value_delimiter = ',', required = true)]
        dims: Vec<usize>,
        /// Encoding mode: default | signed | unsigned | small-unsigned
        #[arg(short, long, default_value = "default")]
        mode: Mode,
        /// Elements per block
        #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: usize,
        /// Single-pass unsigned encoding for the default mode
        #[arg(long)]
        fast: bool,
        /// Try splitting blocks at their midpoint when that is smaller
        #[arg(long)]
        small: bool,
        /// Fraction of hardware threads to use, 0.0 to 1.0
        #[arg(long, default_value_t = 1.0)]
        dop: f64,
        /// Metadata string attached to every frame
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Decompress every frame of a Terse file to raw host-native bytes
    Decompress {
        /// Source Terse file
        input: PathBuf,
        /// Destination file ("-" writes to stdout)
        output: PathBuf,
    },
    /// Print the stream header and per-frame statistics
    Inspect {
        /// Terse file to inspect
        file: PathBuf,
        /// Print per-block details
        #[arg(long)]
        blocks: bool,
    },
    /// Decompress a single frame by index
    ReadFrame {
        /// Terse file
        file: PathBuf,
        /// Zero-based frame index
        #[arg(short, long)]
        index: usize,
        /// Write raw bytes to a file instead of printing a preview
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    match unit {
        0 => format!("{} B", n),
        _ => format!("{:.2} {}", value, UNITS[unit]),
    }
}

fn ratio(raw: usize, compressed: usize) -> f64 {
    raw as f64 / compressed.max(1) as f64
}

fn per_second(bytes: usize, seconds: f64) -> String {
    human_bytes((bytes as f64 / seconds.max(1e-9)) as u64)
}

fn read_input(input: &PathBuf) -> anyhow::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    if input.to_str() == Some("-") {
        io::stdin().lock().read_to_end(&mut bytes)?;
    } else {
        File::open(input)
            .with_context(|| format!("opening input file {:?}", input))?
            .read_to_end(&mut bytes)?;
    }
    Ok(bytes)
}

fn open_output(output: &PathBuf) -> anyhow::Result<Box<dyn Write>> {
    Ok(if output.to_str() == Some("-") {
        Box::new(io::stdout().lock())
    } else {
        Box::new(BufWriter::new(
            File::create(output).with_context(|| format!("creating output file {:?}", output))?,
        ))
    })
}

fn format_base(frame: &Frame, base: u64, signed: bool) -> String {
    if signed {
        (base as i64).to_string()
    } else if frame.element_type().is_signed() {
        // unsigned view of a signed type: show the raw bit pattern
        format!("{:#x}", base)
    } else {
        base.to_string()
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn run_compress(
    input: PathBuf,
    output: PathBuf,
    dtype: ElementType,
    dims: Vec<usize>,
    mode: Mode,
    settings: Settings,
    metadata: Option<String>,
) -> anyhow::Result<()> {
    let settings = settings.validate()?;
    let bytes = read_input(&input)?;
    let array = TypedArray::from_ne_bytes(dtype, &bytes)
        .with_context(|| format!("interpreting {:?} as {} elements", input, dtype))?;

    let frame_len: usize = dims.iter().product();
    if frame_len == 0 || array.len() % frame_len != 0 {
        anyhow::bail!(
            "{} elements do not split into frames of dims {:?}",
            array.len(),
            dims
        );
    }
    let frame_count = array.len() / frame_len;

    let t0 = Instant::now();
    let mut writer = Writer::create(&output, frame_count)
        .with_context(|| format!("creating output file {:?}", output))?;
    with_typed_array!(&array, values => {
        for chunk in values.chunks(frame_len) {
            let mut frame = Frame::from_slice(chunk, &dims, mode, &settings)?;
            if let Some(text) = &metadata {
                frame.set_metadata(text.as_str());
            }
            writer.write_frame(&frame)?;
        }
    });
    let written = writer.finish()?;
    let elapsed = t0.elapsed().as_secs_f64();

    eprintln!("  element type : {}", dtype);
    eprintln!("  mode         : {}", mode);
    eprintln!("  frames       : {} × {:?}", frame_count, dims);
    eprintln!("  block size   : {} elements", settings.block_size);
    eprintln!("  workers      : {}", settings.workers());
    eprintln!("  raw size     : {}", human_bytes(bytes.len() as u64));
    eprintln!("  compressed   : {}", human_bytes(written as u64));
    eprintln!("  ratio        : {:.2}x", ratio(bytes.len(), written));
    eprintln!("  throughput   : {}/s", per_second(bytes.len(), elapsed));
    eprintln!("  elapsed      : {:.3}s", elapsed);
    Ok(())
}

fn run_decompress(input: PathBuf, output: PathBuf) -> anyhow::Result<()> {
    let mut reader =
        Reader::open(&input).with_context(|| format!("opening Terse file {:?}", input))?;
    let mut dst = open_output(&output)?;

    let t0 = Instant::now();
    let mut total_raw = 0usize;
    let frame_count = reader.frame_count();
    while let Some(frame) = reader.next_frame()? {
        let raw = frame.decompress()?.to_ne_bytes();
        total_raw += raw.len();
        dst.write_all(&raw)?;
    }
    dst.flush()?;

    let elapsed = t0.elapsed().as_secs_f64();
    eprintln!("  frames       : {}", frame_count);
    eprintln!("  raw size     : {}", human_bytes(total_raw as u64));
    eprintln!("  throughput   : {}/s", per_second(total_raw, elapsed));
    eprintln!("  elapsed      : {:.3}s", elapsed);
    Ok(())
}

fn run_inspect(file: PathBuf, show_blocks: bool) -> anyhow::Result<()> {
    let mut reader =
        Reader::open(&file).with_context(|| format!("opening Terse file {:?}", file))?;
    let file_size = std::fs::metadata(&file)?.len();

    println!("=== Terse file: {:?} ===", file);
    println!();
    println!("  format version : {}", FORMAT_VERSION);
    println!("  frames         : {}", reader.frame_count());
    println!("  file on disk   : {}", human_bytes(file_size));

    let mut index = 0usize;
    while let Some(frame) = reader.next_frame()? {
        let raw = frame.size() * frame.element_type().width();
        println!();
        println!("  frame {}", index);
        println!("    dims         : {:?}", frame.dims());
        println!("    element type : {}", frame.element_type());
        println!("    mode         : {}", frame.mode());
        if !frame.metadata().is_empty() {
            println!("    metadata     : {}", frame.metadata());
        }
        println!("    blocks       : {}", frame.blocks().len());
        println!("    raw          : {}", human_bytes(raw as u64));
        println!("    used         : {}", human_bytes(frame.used_bytes() as u64));
        println!("    ratio        : {:.2}x", ratio(raw, frame.used_bytes()));

        if show_blocks {
            println!();
            println!(
                "    {:>8}  {:>8}  {:>5}  {:>6}  {:>20}  {:>10}  {:>16}",
                "block", "count", "bits", "signed", "base", "payload", "xxh3"
            );
            println!("    {}", "-".repeat(86));
            for (i, block) in frame.blocks().iter().enumerate() {
                let payload = frame.block_payload(i).unwrap_or_default();
                println!(
                    "    {:>8}  {:>8}  {:>5}  {:>6}  {:>20}  {:>10}  {:016x}",
                    i,
                    block.count(),
                    block.bit_width(),
                    block.is_signed(),
                    format_base(&frame, block.base(), block.is_signed()),
                    human_bytes(payload.len() as u64),
                    xxh3_64(payload)
                );
            }
        }
        index += 1;
    }
    Ok(())
}

fn run_read_frame(file: PathBuf, index: usize, output: Option<PathBuf>) -> anyhow::Result<()> {
    let mut reader =
        Reader::open(&file).with_context(|| format!("opening Terse file {:?}", file))?;
    if index >= reader.frame_count() {
        anyhow::bail!(
            "frame index {} out of range (file holds {} frames)",
            index,
            reader.frame_count()
        );
    }
    reader.skip_frames(index)?;
    let frame = reader
        .next_frame()?
        .with_context(|| format!("frame {} missing from {:?}", index, file))?;

    let t0 = Instant::now();
    let array = frame.decompress()?;
    let elapsed = t0.elapsed();
    eprintln!(
        "  decoded frame {} ({} {} values) in {:.3}ms",
        index,
        array.len(),
        array.element_type(),
        elapsed.as_secs_f64() * 1000.0
    );

    match output {
        Some(path) => {
            std::fs::write(&path, array.to_ne_bytes())?;
            eprintln!("  written to {:?}", path);
        }
        None => {
            println!("--- frame {} {:?} ---", index, frame.dims());
            with_typed_array!(&array, values => {
                let shown = values.len().min(64);
                for (row, chunk) in values[..shown].chunks(16).enumerate() {
                    let cells: Vec<String> = chunk.iter().map(|v| format!("{:>6}", v)).collect();
                    println!("  {:>6}  {}", row * 16, cells.join(" "));
                }
                if values.len() > shown {
                    println!("  ... ({} values not shown)", values.len() - shown);
                }
            });
        }
    }
    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Compress {
            input,
            output,
            dtype,
            dims,
            mode,
            block_size,
            fast,
            small,
            dop,
            metadata,
        } => run_compress(
            input,
            output,
            dtype,
            dims,
            mode,
            Settings {
                block_size,
                fast,
                small,
                degree_of_parallelism: dop,
            },
            metadata,
        ),
        Commands::Decompress { input, output } => run_decompress(input, output),
        Commands::Inspect { file, blocks } => run_inspect(file, blocks),
        Commands::ReadFrame {
            file,
            index,
            output,
        } => run_read_frame(file, index, output),
    }
}
