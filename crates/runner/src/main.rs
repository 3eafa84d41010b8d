//! Headless HMCS400 runner.
//!
//! Assembles a machine from the part-number catalog, loads a ROM image
//! (raw little-endian words or Intel HEX), runs it for a cycle budget and
//! prints the register file. Interrupt lines can be raised at given cycles
//! and the machine state can be saved or restored around the run.

use hmcs400_core::savestate::{self, SaveState};
use hmcs400_core::{Divider, Hmcs400, Memory, Registry, RunState};
use std::env;
use std::fs;
use std::path::Path;

/// Default part when `--model` is not given
const DEFAULT_MODEL: &str = "hd614042";
/// Default cycle budget
const DEFAULT_CYCLES: u64 = 1000;

// ─── Logging ────────────────────────────────────────────────────────────────

struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{:5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logging(level: log::LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

// ─── Options ────────────────────────────────────────────────────────────────

fn opt_value<'a>(args: &'a [String], name: &str) -> Option<&'a String> {
    args.iter().position(|a| a == name).and_then(|i| args.get(i + 1))
}

/// Every value of a repeatable option.
fn opt_values<'a>(args: &'a [String], name: &str) -> Vec<&'a String> {
    let mut out = Vec::new();
    let mut i = 1;
    while i < args.len() {
        if args[i] == name {
            if let Some(v) = args.get(i + 1) { out.push(v); }
            i += 1;
        }
        i += 1;
    }
    out
}

fn usage(prog: &str, registry: &Registry) -> ! {
    eprintln!("HMCS400 runner v{} - Rust", env!("CARGO_PKG_VERSION"));
    eprintln!("Usage: {} <rom.bin|rom.hex> [options]", prog);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --model NAME         Part number (default {})", DEFAULT_MODEL);
    eprintln!("  --cycles N           Instruction cycles to run (default {})", DEFAULT_CYCLES);
    eprintln!("  --divider N          Clock divider 4, 8 or 16 (HMCS408 only)");
    eprintln!("  --int0 N             Raise INT0 at cycle N (repeatable)");
    eprintln!("  --int1 N             Raise INT1 at cycle N (repeatable)");
    eprintln!("  --save-state F       Write machine state to F after the run");
    eprintln!("  --load-state F       Restore machine state from F before the run");
    eprintln!("  --debug              Log interrupts, halts and diagnostics");
    eprintln!("  --trace              Log every instruction");
    eprintln!();
    eprintln!("Models: {}", registry.names().join(" "));
    std::process::exit(1);
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let registry = Registry::new();
    if args.len() < 2 || args[1].starts_with("--") {
        usage(&args[0], &registry);
    }

    let rom_path = &args[1];
    let debug = args.iter().any(|a| a == "--debug");
    let trace = args.iter().any(|a| a == "--trace");
    init_logging(if trace {
        log::LevelFilter::Trace
    } else if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    });

    if let Err(e) = run(&args, &registry, rom_path) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String], registry: &Registry, rom_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let model_name = opt_value(args, "--model").map(String::as_str).unwrap_or(DEFAULT_MODEL);
    let model = registry.get(model_name)?;

    let mut variant = model.variant;
    if let Some(d) = opt_value(args, "--divider") {
        variant = variant.with_divider(Divider::from_value(d.parse()?)?)?;
    }

    let cycles: u64 = match opt_value(args, "--cycles") {
        Some(s) => s.parse()?,
        None => DEFAULT_CYCLES,
    };

    let mut events: Vec<(u64, usize)> = Vec::new();
    for (name, line) in [("--int0", 0), ("--int1", 1)] {
        for v in opt_values(args, name) {
            events.push((v.parse()?, line));
        }
    }
    events.sort_unstable();

    let mut mem = Memory::new(&variant);
    let words = if rom_path.to_ascii_lowercase().ends_with(".hex") {
        mem.load_hex(&fs::read_to_string(rom_path)?)?
    } else {
        mem.load_rom(&fs::read(rom_path)?)?
    };
    eprintln!("Loaded {} ({} words) as {} {:?} rev {}",
        rom_path, words, model.name, model.grade, model.revision);

    let mut core = Hmcs400::new(variant);
    core.reset();

    if let Some(path) = opt_value(args, "--load-state") {
        let state = savestate::load_from_file(Path::new(path), &variant)?;
        core.restore_state(&mut mem, state);
        eprintln!("State loaded from {}", path);
    }

    let mut done = 0u64;
    for (at, line) in events {
        if at > done {
            done += core.run(&mut mem, at - done);
        }
        log::debug!("raise INT{} at cycle {}", line, done);
        core.set_input_line(line, true);
    }
    if cycles > done {
        done += core.run(&mut mem, cycles - done);
    }

    println!("{}", dump_regs(&core));
    println!("Cycles: {} ({} clocks)", done, variant.cycles_to_clocks(done));
    let diag = core.diagnostics();
    if diag.total() > 0 {
        println!("Diagnostics: illegal={} overflow={} underflow={} window={}",
            diag.illegal_opcodes, diag.stack_overflows,
            diag.stack_underflows, diag.stack_window_accesses);
    }

    if let Some(path) = opt_value(args, "--save-state") {
        let state: SaveState = core.save_state(&mem);
        savestate::save_to_file(&state, &variant, Path::new(path))?;
        eprintln!("State saved to {}", path);
    }
    Ok(())
}

fn dump_regs(core: &Hmcs400) -> String {
    let c = &core.cpu;
    let state = match c.state {
        RunState::Running => "run",
        RunState::Standby => "standby",
        RunState::Stop => "stop",
    };
    format!(
        "PC=${:04X} A={:X} B={:X} W={:X} X={:X} Y={:X} SPX={:X} SPY={:X} SP=${:03X} CA={} \
         IE={} IF={}{} IM={}{} depth={} state={}",
        c.pc, c.a, c.b, c.w, c.x, c.y, c.spx, c.spy, c.sp, c.ca as u8,
        c.ie as u8, c.irq_flag[0] as u8, c.irq_flag[1] as u8,
        c.irq_mask[0] as u8, c.irq_mask[1] as u8, c.stack_depth(), state,
    )
}
