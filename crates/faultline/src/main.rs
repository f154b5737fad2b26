use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use faultline_core::fault::AccessKind;
use faultline_core::platform::guards::ThreadSuspendGuard;
use faultline_core::platform::simulated::SimulatedThread;
use faultline_core::platform::{ContextAccess, ThreadControl};
use faultline_core::signals::{self, FpeCode, HANDLED_SIGNALS};
use faultline_core::types::X86_64Registers;
use faultline_core::{
    dispatch, Address, ConsoleEvent, Disposition, FaultCode, FaultRecord, FaultlineResult, PendingTransfer, Profiler,
    SignalConfig, SignalSubsystem, ThreadId, ThreadState,
};
use faultline_utils::{info, init_logging};

mod runtime;

use runtime::{DemoRuntime, SAFEPOINT_PAGE};

/// Drive fault translation, interrupt delivery and sampling against a simulated thread.
#[derive(Parser, Debug)]
#[command(name = "faultline")]
#[command(version)]
#[command(about = "Turn faults and console interrupts into runtime exceptions, and sample stacks", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Print the structured-exception codes, CRT signals and FPE sub-codes
    Codes,
    /// Inject one synthetic fault into a simulated thread
    Fault
    {
        /// Which fault to raise
        #[arg(value_enum)]
        kind: FaultKind,
    },
    /// Fire console interrupts at a simulated main thread
    Interrupt
    {
        /// Number of Ctrl-C events
        #[arg(short, long, default_value_t = 1)]
        count: u32,
        /// Keep the main thread in a defer-signals region while they arrive
        #[arg(long, default_value_t = false)]
        defer: bool,
        /// Mark the main thread as blocked in I/O
        #[arg(long, default_value_t = false)]
        io_wait: bool,
    },
    /// Run the sampling profiler against a busy simulated thread
    Profile
    {
        /// Nanoseconds between samples
        #[arg(long, default_value_t = 1_000_000)]
        interval_ns: u64,
        /// How long to sample
        #[arg(long, default_value_t = 200)]
        duration_ms: u64,
        /// Ring buffer capacity in words
        #[arg(long, default_value_t = 4096)]
        capacity: usize,
        /// Maximum frames per sample
        #[arg(long, default_value_t = 32)]
        max_frames: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FaultKind
{
    /// Integer division by zero
    Divide,
    /// Stack guard page hit
    StackOverflow,
    /// Write to read-only memory
    Readonly,
    /// Poll of the safepoint page with an interrupt pending
    Safepoint,
    /// Illegal instruction (fatal)
    Illegal,
    /// An exception code nobody handles (fatal)
    Unknown,
}

fn main()
{
    let _logging = match init_logging() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    let cli = Cli::parse();
    if let Err(e) = run_command(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(cli: Cli) -> Result<(), Box<dyn std::error::Error>>
{
    match cli.command {
        Commands::Codes => {
            print_codes();
            Ok(())
        }
        Commands::Fault { kind } => Ok(inject_fault(kind)?),
        Commands::Interrupt { count, defer, io_wait } => Ok(fire_interrupts(count, defer, io_wait)?),
        Commands::Profile {
            interval_ns,
            duration_ms,
            capacity,
            max_frames,
        } => {
            let config = SignalConfig {
                nsec_per_sample: interval_ns,
                profile_capacity: capacity,
                max_frames_per_sample: max_frames,
                ..SignalConfig::from_env()?
            };
            profile(config, Duration::from_millis(duration_ms))
        }
    }
}

fn build_subsystem(config: SignalConfig) -> FaultlineResult<Arc<SignalSubsystem>>
{
    Ok(Arc::new(SignalSubsystem::builder(Arc::new(DemoRuntime)).config(config).build()?))
}

/// Register a fresh simulated main thread with `subsystem`.
fn attach_main_thread(subsystem: &SignalSubsystem) -> FaultlineResult<(Arc<ThreadState>, Arc<SimulatedThread>)>
{
    let state = Arc::new(ThreadState::new(ThreadId::MAIN));
    let thread = Arc::new(SimulatedThread::new());
    subsystem.set_main_thread(Arc::clone(&state), Arc::clone(&thread) as Arc<dyn ThreadControl>)?;
    subsystem.install_thread_handler(Arc::clone(&state));
    Ok((state, thread))
}

fn print_codes()
{
    println!("Structured exception codes:");
    for code in FaultCode::KNOWN {
        println!("  0x{:08X}  {}", code.raw(), code.name());
    }
    println!("\nCRT signals:");
    for sig in HANDLED_SIGNALS {
        println!("  {sig:>2}  {}", signals::signal_name(sig));
    }
    println!("\nSIGFPE sub-codes:");
    for code in FpeCode::KNOWN {
        println!("  0x{:02X}  {}", code.0, code.name());
    }
}

fn print_registers(label: &str, regs: &X86_64Registers)
{
    println!(
        "{label:>7}: rip=0x{:016x} rsp=0x{:016x} rbp=0x{:016x}",
        regs.rip, regs.rsp, regs.rbp
    );
}

fn inject_fault(kind: FaultKind) -> FaultlineResult<()>
{
    let subsystem = build_subsystem(SignalConfig::from_env()?)?;
    let (state, thread) = attach_main_thread(&subsystem)?;

    let ip = Address::new(thread.registers().rip);
    let record = match kind {
        FaultKind::Divide => FaultRecord::new(FaultCode::INT_DIVIDE_BY_ZERO, ip),
        FaultKind::StackOverflow => FaultRecord::new(FaultCode::STACK_OVERFLOW, ip),
        FaultKind::Readonly => FaultRecord::access_violation(ip, AccessKind::Write, Address::new(0x2000_0000)),
        FaultKind::Safepoint => {
            subsystem.request_sigint();
            FaultRecord::access_violation(ip, AccessKind::Read, SAFEPOINT_PAGE)
        }
        FaultKind::Illegal => FaultRecord::new(FaultCode::ILLEGAL_INSTRUCTION, ip),
        FaultKind::Unknown => FaultRecord::new(FaultCode(0xE06D_7363), ip),
    };

    let class = dispatch::classify(&record, &state, subsystem.hooks());
    println!("fault: {} at {}", record.code, record.address);
    println!("class: {class:?}");

    let before = thread.registers();
    let guard = ThreadSuspendGuard::new(&*thread)?;
    let mut disposition = Disposition::ContinueSearch;
    thread.with_context(ContextAccess::ReadWrite, &mut |ctx| {
        // SAFETY: the simulated thread is suspended and its stack is a live buffer.
        disposition = unsafe { subsystem.handle_fault(&state, &record, ctx) };
    })?;
    guard.resume()?;
    let after = thread.registers();

    println!("disposition: {disposition:?}");
    print_registers("before", &before);
    print_registers("after", &after);
    match state.pending() {
        Some(PendingTransfer::Throw(value)) => {
            println!("pending: throw {} ({} backtrace frames)", DemoRuntime::describe(value), state.backtrace_len());
        }
        Some(PendingTransfer::Restore(marker)) => println!("pending: unwind to probe {marker:#x}"),
        None => println!("pending: nothing"),
    }
    Ok(())
}

fn fire_interrupts(count: u32, defer: bool, io_wait: bool) -> FaultlineResult<()>
{
    let subsystem = build_subsystem(SignalConfig::from_env()?)?;
    let (state, thread) = attach_main_thread(&subsystem)?;
    state.set_io_wait(io_wait);

    {
        let _deferring = defer.then(|| state.defer_signals());
        for n in 1..=count {
            let outcome = subsystem.handle_console_interrupt(ConsoleEvent::CtrlC);
            println!("interrupt {n}: {outcome:?}");
        }
    }

    if let Some(value) = subsystem.poll_interrupt(&state) {
        println!("next safepoint throws {}", DemoRuntime::describe(value));
    }
    match state.take_pending() {
        Some(PendingTransfer::Throw(value)) => {
            println!("context was redirected to throw {}", DemoRuntime::describe(value));
        }
        _ => println!("context untouched"),
    }
    println!("final state: {:?}", subsystem.safepoint().state());
    print_registers("main", &thread.registers());
    Ok(())
}

fn profile(config: SignalConfig, duration: Duration) -> Result<(), Box<dyn std::error::Error>>
{
    let subsystem = build_subsystem(config)?;
    let (_state, thread) = attach_main_thread(&subsystem)?;

    let stop = Arc::new(AtomicBool::new(false));
    let worker = {
        let stop = Arc::clone(&stop);
        let thread = Arc::clone(&thread);
        thread::Builder::new()
            .name("faultline-busy".into())
            .spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    thread.step();
                    std::hint::spin_loop();
                }
            })?
    };

    let profiler = Profiler::new(Arc::clone(&subsystem));
    profiler.start()?;
    let started = Instant::now();
    thread::sleep(duration);
    profiler.stop();
    drop(profiler);

    stop.store(true, Ordering::Relaxed);
    let _ = worker.join();
    info!(elapsed = ?started.elapsed(), "profiling finished");

    let ring = subsystem.lock_profile();
    println!(
        "samples: {} ({} of {} words used)",
        ring.sample_count(),
        ring.len(),
        ring.capacity()
    );
    let mut ips: Vec<usize> = ring.samples().filter_map(|s| s.frames.first().copied()).collect();
    ips.sort_unstable();
    ips.dedup();
    println!("distinct instruction pointers: {}", ips.len());
    for sample in ring.samples().take(5) {
        println!(
            "  tid={} task={} clock={} frames={:x?}",
            sample.metadata.thread_id, sample.metadata.task, sample.metadata.cycle_clock, sample.frames
        );
    }
    Ok(())
}
