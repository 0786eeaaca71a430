//! Terse Demo
//!
//! Generates a synthetic stack of X-ray detector frames (low photon counts,
//! a few hot pixels, a dark beam-stop region), compresses it with every mode
//! and setting combination, verifies each round trip, and shows that the
//! encoded bytes do not depend on the number of worker threads.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use xxhash_rust::xxh3::xxh3_64;

use terse_core::{Frame, Mode, Reader, Settings, Terse, Writer, DEFAULT_BLOCK_SIZE};

// ── constants ──────────────────────────────────────────────────────────────

const FRAMES: usize = 40;
const ROWS: usize = 512;
const COLS: usize = 512;
const FRAME_LEN: usize = ROWS * COLS;

// ── data generator ──────────────────────────────────────────────────────────

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

/// Deterministic detector frame `index`: mostly 0–3 counts, brighter rings,
/// a zeroed beam stop and roughly one saturated pixel in two thousand.
fn detector_frame(index: u64) -> Vec<u16> {
    let mut rng = Lcg(0x5EED_0000 + index);
    let (cy, cx) = (ROWS as i64 / 2, COLS as i64 / 2);
    let mut out = Vec::with_capacity(FRAME_LEN);
    for y in 0..ROWS as i64 {
        for x in 0..COLS as i64 {
            let r2 = (y - cy) * (y - cy) + (x - cx) * (x - cx);
            let noise = rng.next();
            let value = if r2 < 400 {
                0
            } else if noise % 2048 == 0 {
                u16::MAX
            } else {
                let ring = if (r2 as f64).sqrt() as i64 % 60 < 4 { 40 } else { 0 };
                (noise % 4) as u16 + ring
            };
            out.push(value);
        }
    }
    out
}

fn dataset() -> Vec<u16> {
    let mut all = Vec::with_capacity(FRAMES * FRAME_LEN);
    for i in 0..FRAMES as u64 {
        all.extend(detector_frame(i));
    }
    all
}

// ── timing ──────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const U: &[&str] = &["B", "KB", "MB", "GB"];
    let mut v = n as f64;
    let mut u = 0;
    while v >= 1024.0 && u < U.len() - 1 { v /= 1024.0; u += 1; }
    if u == 0 { format!("{n} B") } else { format!("{v:.2} {}", U[u]) }
}

fn fmt_duration(d: Duration) -> String {
    let ms = d.as_secs_f64() * 1000.0;
    if ms < 1.0 {
        format!("{:.1} µs", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{ms:.1} ms")
    } else {
        format!("{:.2} s", d.as_secs_f64())
    }
}

fn throughput(bytes: u64, d: Duration) -> String {
    format!("{}/s", human_bytes((bytes as f64 / d.as_secs_f64().max(1e-9)) as u64))
}

// ── compression variants ────────────────────────────────────────────────────

struct Variant {
    label: &'static str,
    mode: Mode,
    fast: bool,
    small: bool,
}

const VARIANTS: &[Variant] = &[
    Variant { label: "default",              mode: Mode::Default,       fast: false, small: false },
    Variant { label: "default + fast",       mode: Mode::Default,       fast: true,  small: false },
    Variant { label: "default + small",      mode: Mode::Default,       fast: false, small: true  },
    Variant { label: "unsigned",             mode: Mode::Unsigned,      fast: false, small: false },
    Variant { label: "signed",               mode: Mode::Signed,        fast: false, small: false },
    Variant { label: "small-unsigned",       mode: Mode::SmallUnsigned, fast: false, small: false },
    Variant { label: "small-unsigned+small", mode: Mode::SmallUnsigned, fast: false, small: true  },
];

struct Outcome {
    label: &'static str,
    bytes: usize,
    encode: Duration,
    decode: Duration,
}

fn run_variant(data: &[u16], variant: &Variant) -> Result<Outcome> {
    let settings = Settings { fast: variant.fast, small: variant.small, ..Settings::default() };
    let t0 = Instant::now();
    let mut terse = Terse::with_settings(settings)?;
    for frame in data.chunks(FRAME_LEN) {
        terse.append(frame, &[ROWS, COLS], variant.mode)?;
    }
    let encode = t0.elapsed();

    let t1 = Instant::now();
    let back = terse.decompress_all()?;
    let decode = t1.elapsed();
    if back.as_slice::<u16>() != Some(data) {
        bail!("round trip mismatch for {}", variant.label);
    }
    Ok(Outcome { label: variant.label, bytes: terse.terse_size(), encode, decode })
}

/// Serialized bytes of the first frames encoded at `dop`.
fn encode_at(data: &[u16], dop: f64, small: bool) -> Result<Vec<u8>> {
    let settings = Settings { degree_of_parallelism: dop, small, ..Settings::default() };
    let mut terse = Terse::with_settings(settings)?;
    for frame in data.chunks(FRAME_LEN).take(4) {
        terse.append(frame, &[ROWS, COLS], Mode::Default)?;
    }
    let mut out = Vec::with_capacity(terse.file_size());
    terse.write(&mut out)?;
    Ok(out)
}

fn write_stack(path: &Path, data: &[u16]) -> Result<usize> {
    let settings = Settings::default();
    let mut writer = Writer::create(path, FRAMES)?;
    for (i, frame) in data.chunks(FRAME_LEN).enumerate() {
        let mut f = Frame::from_slice(frame, &[ROWS, COLS], Mode::Default, &settings)?;
        f.set_metadata(format!("{{\"frame\": {i}, \"exposure_ms\": 10}}"));
        writer.write_frame(&f)?;
    }
    Ok(writer.finish()?)
}

// ── demo runner ─────────────────────────────────────────────────────────────

fn run() -> Result<()> {
    let out_dir = std::env::temp_dir().join("terse_demo");
    std::fs::create_dir_all(&out_dir)?;
    let stack_path = out_dir.join("stack.trpx");

    println!();
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║        Terse · lossless integer array compression  ·  Demo       ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    // ── Phase 0: Data Generation ─────────────────────────────────────────────
    section("0 · DATA GENERATION");
    let data = timed_step("detector frames", || Ok(dataset()))?;
    let raw_bytes = (data.len() * 2) as u64;
    println!("  frames        : {} × {}×{} u16", FRAMES, ROWS, COLS);
    println!("  values        : {}", format_number(data.len() as u64));
    println!("  raw size      : {}", human_bytes(raw_bytes));
    println!("  block size    : {} values", format_number(DEFAULT_BLOCK_SIZE as u64));
    println!();

    // ── Phase 1: Compression ─────────────────────────────────────────────────
    section("1 · COMPRESSION · every mode, verified round trip");
    println!("  {:<22} {:>12}  {:>8}  {:>14}  {:>14}",
             "Variant", "Compressed", "Ratio", "Encode", "Decode");
    println!("  {}", "─".repeat(78));
    let mut outcomes = Vec::with_capacity(VARIANTS.len());
    for variant in VARIANTS {
        let o = run_variant(&data, variant)?;
        println!("  {:<22} {:>12}  {:>7.2}x  {:>14}  {:>14}",
            o.label,
            human_bytes(o.bytes as u64),
            raw_bytes as f64 / o.bytes as f64,
            throughput(raw_bytes, o.encode),
            throughput(raw_bytes, o.decode));
        outcomes.push(o);
    }
    println!();
    println!("  All {} variants decoded back to the original values ✓", outcomes.len());

    // ── Phase 2: Inspection ──────────────────────────────────────────────────
    section("2 · BLOCK WIDTHS · frame 0, default mode");
    let frame0 = Frame::from_slice(&data[..FRAME_LEN], &[ROWS, COLS], Mode::Default, &Settings::default())?;
    let mut histogram = [0usize; 65];
    for block in frame0.blocks() {
        histogram[block.bit_width() as usize] += 1;
    }
    for (width, count) in histogram.into_iter().enumerate() {
        if count == 0 {
            continue;
        }
        println!("  {:>2} bits : {:>5} blocks  {}", width, count, "▇".repeat(count.min(50)));
    }
    let widest = frame0.blocks().iter().map(|b| b.bit_width()).max().unwrap_or(0);
    println!("  widest block: {} bits of {} per value", widest, frame0.bits_per_val());

    // ── Phase 3: Streaming file I/O ──────────────────────────────────────────
    section("3 · STREAMING FILE · write, then read one frame");
    let written = timed_step("stack.trpx", || write_stack(&stack_path, &data))?;
    println!("  file size     : {} ({:.2}x)", human_bytes(written as u64), raw_bytes as f64 / written as f64);

    let target = FRAMES * 3 / 4;
    let t0 = Instant::now();
    let mut reader = Reader::open(&stack_path)?;
    reader.skip_frames(target)?;
    let Some(frame) = reader.next_frame()? else {
        bail!("frame {target} missing from {:?}", stack_path);
    };
    let values = frame.decompress_as::<u16>()?;
    let read_dur = t0.elapsed();
    let expected = &data[target * FRAME_LEN..(target + 1) * FRAME_LEN];
    println!("  frame {} read in {}  metadata {}", target, fmt_duration(read_dur), frame.metadata());
    println!("  content check : {}",
        if values.as_slice() == expected { "✓ identical to the source frame" } else { "⚠ MISMATCH" });

    // ── Phase 4: Determinism ─────────────────────────────────────────────────
    section("4 · DETERMINISM · output independent of thread count");
    for small in [false, true] {
        let reference = encode_at(&data, 0.0, small)?;
        for dop in [0.5, 1.0] {
            let other = encode_at(&data, dop, small)?;
            if other != reference {
                bail!("dop {dop} (small={small}) produced different bytes");
            }
        }
        println!("  small={:<5}  dop 0 / 0.5 / 1  →  xxh3 {:016x}  ✓ identical",
            small, xxh3_64(&reference));
    }

    // ── Phase 5: Entropy floor ───────────────────────────────────────────────
    section("5 · ENTROPY FLOOR");
    let mut rng = Lcg(0x1234_5678_9ABC_DEF0);
    let noise: Vec<u16> = (0..FRAME_LEN).map(|_| rng.next() as u16).collect();
    let noisy = Terse::from_slice(&noise, &[ROWS, COLS], Mode::Default)?;
    let noise_raw = (noise.len() * 2) as u64;
    println!("  uniform u16 noise : {} → {} ({:.3}x)",
        human_bytes(noise_raw),
        human_bytes(noisy.terse_size() as u64),
        noise_raw as f64 / noisy.terse_size() as f64);
    println!("  Full-range values need all 16 bits; the block headers are the only overhead.");

    // ── Summary ───────────────────────────────────────────────────────────────
    section("SUMMARY");
    if let Some(best) = outcomes.iter().min_by_key(|o| o.bytes) {
        println!("  {:<36}  {} ({:.2}x)", "Best variant:", best.label, raw_bytes as f64 / best.bytes as f64);
    }
    if let Some(fastest) = outcomes.iter().min_by_key(|o| o.encode) {
        println!("  {:<36}  {} ({})", "Fastest encode:", fastest.label, throughput(raw_bytes, fastest.encode));
    }
    println!("  {:<36}  {}", "Single frame read from file:", fmt_duration(read_dur));
    println!();

    let _ = std::fs::remove_file(&stack_path);
    Ok(())
}

// ── small helpers ──────────────────────────────────────────────────────────

fn section(title: &str) {
    println!("━━━ {title} {}", "━".repeat(70usize.saturating_sub(title.len() + 5)));
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 { out.push(','); }
        out.push(c);
    }
    out.chars().rev().collect()
}

fn timed_step<T, F: FnOnce() -> Result<T>>(label: &str, f: F) -> Result<T> {
    eprint!("  building {label:<24} ");
    let t0 = Instant::now();
    let r = f()?;
    eprintln!("done  ({:.2}s)", t0.elapsed().as_secs_f64());
    Ok(r)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
