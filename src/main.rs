//! vm13 - CLI entry point
//!
//! Commands:
//! - `vm13 run <program>` - Run an ASM/IMG/BIN program file
//! - `vm13 debug <program>` - Interactive TUI debugger
//! - `vm13 asm <source>` - Assemble to an image file
//! - `vm13 disasm <image>` - Disassemble an image
//! - `vm13 demo` - Run the built-in demo program
//! - `vm13 test` - Run the built-in self-test

use clap::{Parser, Subcommand};
use vm13::asm::{self, ProgramImage};
use vm13::cpu::io::ScriptedIo;
use vm13::{assemble, disassemble, Cpu, CpuState, Word13};

#[derive(Parser)]
#[command(name = "vm13")]
#[command(version = "0.1.0")]
#[command(about = "Emulator for a crackme virtual machine with packed 13-bit memory")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts or traps
    Run {
        /// Path to an .asm, .img or .bin program file
        program: String,
        /// Maximum number of instructions to execute
        #[arg(short, long, default_value = "1000000")]
        max_cycles: u64,
        /// Trace each instruction with its disassembly and flags
        #[arg(short, long)]
        trace: bool,
        /// Feed input from this file instead of stdin
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Interactive debugger
    Debug {
        /// Path to the program file to debug
        program: String,
        /// Feed input from this file (the debugger has no live stdin)
        #[arg(short, long)]
        input: Option<String>,
    },
    /// Assemble source to an image file
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file
        #[arg(short, long)]
        output: Option<String>,
        /// Write the packed binary layout instead of the text image
        #[arg(short, long)]
        packed: bool,
    },
    /// Disassemble an image to readable text
    Disasm {
        /// Path to the .img or .bin file
        image: String,
    },
    /// Run the built-in demo program
    Demo,
    /// Run the built-in self-test
    Test,
}

/// The embedded demo: walks a zero-terminated string through a pointer
/// cell, printing one character per loop iteration.
const DEMO_SOURCE: &str = r#"
START:  MOV PTR, MSG
LOOP:   CMP @PTR, ZERO
        JZ DONE
        OUT @@PTR
        INC PTR
        JMP LOOP
DONE:   HALT
ZERO:   DAT 0
MSG:    DAT 'v'
        DAT 'm'
        DAT '1'
        DAT '3'
        DAT ' '
        DAT 'o'
        DAT 'k'
        DAT '\n'
        DAT 0
PTR:    DAT 0
"#;

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { program, max_cycles, trace, input }) => {
            run_program(&program, max_cycles, trace, input.as_deref());
        }
        Some(Commands::Debug { program, input }) => {
            debug_program(&program, input.as_deref());
        }
        Some(Commands::Asm { source, output, packed }) => {
            assemble_file(&source, output, packed);
        }
        Some(Commands::Disasm { image }) => {
            disassemble_file(&image);
        }
        Some(Commands::Demo) => {
            run_demo();
        }
        Some(Commands::Test) => {
            run_self_test();
        }
        None => {
            println!("vm13 v0.1.0");
            println!("A virtual machine with 8192 x 13-bit packed memory cells");
            println!();
            println!("Use --help for available commands");
            println!();
            demo_packed_memory();
        }
    }
}

/// Load a program from a file, assembling it if it is a source file.
fn load_program_file(path: &str) -> Vec<Word13> {
    if path.ends_with(".asm") {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Failed to read {}: {}", path, e);
                std::process::exit(1);
            }
        };
        match assemble(&source) {
            Ok(words) => {
                println!("Assembled {} words", words.len());
                words
            }
            Err(e) => {
                eprintln!("Assembly error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        let image = if path.ends_with(".bin") {
            asm::load_packed(path)
        } else {
            asm::load_image(path)
        };
        match image {
            Ok(image) => {
                println!("Loaded {} words", image.len());
                image.words
            }
            Err(e) => {
                eprintln!("Failed to load {}: {}", path, e);
                std::process::exit(1);
            }
        }
    }
}

fn run_program(path: &str, max_cycles: u64, trace: bool, input: Option<&str>) {
    println!("Running: {}", path);
    let program = load_program_file(path);

    if program.is_empty() {
        eprintln!("No words to execute");
        std::process::exit(1);
    }

    // Scripted input captures output as well, so it is echoed at the end.
    let scripted = input.map(|input_path| {
        match std::fs::read_to_string(input_path) {
            Ok(text) => ScriptedIo::new(&text),
            Err(e) => {
                eprintln!("Failed to read {}: {}", input_path, e);
                std::process::exit(1);
            }
        }
    });

    let mut cpu = match &scripted {
        Some(io) => Cpu::with_io(Box::new(io.clone())),
        None => Cpu::new(),
    };
    if let Err(e) = cpu.load_program(&program) {
        eprintln!("Failed to load program: {}", e);
        std::process::exit(1);
    }

    println!();

    while cpu.is_running() && cpu.cycles < max_cycles {
        let ip = cpu.mem.ip().get();

        match cpu.step() {
            Ok(instr) => {
                if trace {
                    // Re-read the executed words for a faithful listing.
                    let count = instr.opcode.operand_count();
                    let slice: Vec<Word13> =
                        (0..=count as u16).map(|i| cpu.mem.peek((ip + i) & 0x1FFF)).collect();
                    let (text, _) = asm::disassemble_at(&slice, 0);
                    let f = cpu.flags;
                    println!(
                        "{:04X}: {:<24} Z={} S={} C={} V={}",
                        ip, text, f.zero as u8, f.sign as u8, f.carry as u8, f.overflow as u8
                    );
                }
            }
            Err(e) => {
                if let Some(io) = &scripted {
                    print!("{}", io.output());
                }
                eprintln!("Trap at {:04X}: {}", ip, e);
                std::process::exit(1);
            }
        }
    }

    if let Some(io) = &scripted {
        print!("{}", io.output());
    }

    println!();
    println!("Cycles: {}", cpu.cycles);
    println!("State:  {:?}", cpu.state);

    if cpu.state == CpuState::Running {
        eprintln!("Reached max cycles limit ({}). Use --max-cycles to raise it.", max_cycles);
        std::process::exit(1);
    }
}

#[cfg(feature = "tui")]
fn debug_program(path: &str, input: Option<&str>) {
    println!("Loading: {}", path);
    let program = load_program_file(path);

    if program.is_empty() {
        eprintln!("No words to execute");
        std::process::exit(1);
    }

    let input_text = match input {
        Some(input_path) => match std::fs::read_to_string(input_path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("Failed to read {}: {}", input_path, e);
                std::process::exit(1);
            }
        },
        None => String::new(),
    };

    if let Err(e) = vm13::tui::run_debugger(program, &input_text) {
        eprintln!("Debugger error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "tui"))]
fn debug_program(_path: &str, _input: Option<&str>) {
    eprintln!("This build has no debugger; rebuild with the `tui` feature.");
    std::process::exit(1);
}

fn assemble_file(source_path: &str, output: Option<String>, packed: bool) {
    let extension = if packed { ".bin" } else { ".img" };
    let out_path = output.unwrap_or_else(|| source_path.replace(".asm", extension));

    println!("Assembling: {} -> {}", source_path, out_path);

    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to read {}: {}", source_path, e);
            std::process::exit(1);
        }
    };

    let words = match assemble(&source) {
        Ok(words) => words,
        Err(e) => {
            eprintln!("Assembly error: {}", e);
            std::process::exit(1);
        }
    };

    println!("Assembled {} words", words.len());

    let image = ProgramImage::from_words(words);
    let result = if packed {
        asm::save_packed(&out_path, &image)
    } else {
        asm::save_image(&out_path, &image)
    };

    if let Err(e) = result {
        eprintln!("Failed to save {}: {}", out_path, e);
        std::process::exit(1);
    }

    println!("Saved to {}", out_path);
}

fn disassemble_file(path: &str) {
    let image = if path.ends_with(".bin") {
        asm::load_packed(path)
    } else {
        asm::load_image(path)
    };

    let image = match image {
        Ok(image) => image,
        Err(e) => {
            eprintln!("Failed to load {}: {}", path, e);
            std::process::exit(1);
        }
    };

    print!("{}", disassemble(&image.words));
}

fn run_demo() {
    let program = match assemble(DEMO_SOURCE) {
        Ok(words) => words,
        Err(e) => {
            eprintln!("Demo assembly error: {}", e);
            std::process::exit(1);
        }
    };

    let mut cpu = Cpu::new();
    if let Err(e) = cpu.load_program(&program) {
        eprintln!("Failed to load demo: {}", e);
        std::process::exit(1);
    }

    match cpu.run() {
        Ok(cycles) => println!("({} cycles)", cycles),
        Err(e) => {
            eprintln!("Trap: {}", e);
            std::process::exit(1);
        }
    }
}

fn demo_packed_memory() {
    use vm13::PackedMemory;

    println!("--- Packed memory demo ---");
    println!();

    let mut mem = PackedMemory::new();
    println!("8192 cells x 13 bits = 13312 bytes (+1 guard) of backing store");
    println!();

    mem.poke(0, Word13::new(0x1FFF));
    mem.poke(1, Word13::new(0x0001));
    mem.poke(2, Word13::new(0x1234));

    println!("Cells 0..3 hold 1FFF, 0001, 1234; the first 5 packed bytes:");
    let bytes: Vec<String> = mem.as_bytes()[..5].iter().map(|b| format!("{:02X}", b)).collect();
    println!("  {}", bytes.join(" "));
    println!();

    for addr in 0..3u16 {
        let word = mem.peek(addr);
        println!("  cell {} = {} (signed {})", addr, word, word.to_i16());
    }
    println!();

    println!("Try `vm13 demo` to run the embedded program.");
}

fn run_self_test() {
    use vm13::cpu::memory::SP_INITIAL;

    println!("--- vm13 self-test ---");
    println!();

    let mut passed = 0;
    let mut failed = 0;

    let mut check = |name: &str, ok: bool| {
        if ok {
            println!("{}... ✓", name);
            passed += 1;
        } else {
            println!("{}... ✗", name);
            failed += 1;
        }
    };

    // Packed memory roundtrip at every bit offset.
    {
        let mut mem = vm13::PackedMemory::new();
        let mut ok = true;
        for addr in 0..16u16 {
            let value = Word13::new(addr.wrapping_mul(0x0333) | 1);
            mem.poke(addr, value);
            if mem.peek(addr) != value {
                ok = false;
                break;
            }
        }
        check("Packed roundtrip", ok);
    }

    // Neighbour preservation.
    {
        let mut mem = vm13::PackedMemory::new();
        mem.poke(10, Word13::new(0x1555));
        mem.poke(12, Word13::new(0x0AAA));
        mem.poke(11, Word13::new(0x1FFF));
        check(
            "Neighbour preservation",
            mem.peek(10).get() == 0x1555 && mem.peek(12).get() == 0x0AAA,
        );
    }

    // SUB a,a law.
    {
        let (r, f) = vm13::cpu::alu::sub(Word13::new(0x123), Word13::new(0x123));
        check("SUB a,a", r.is_zero() && f.zero && !f.sign && !f.carry && !f.overflow);
    }

    // Decode ABI.
    {
        let instr = vm13::Instruction::decode(Word13::new(0x290));
        check(
            "Opcode ABI",
            matches!(instr, Ok(i) if i.opcode == vm13::Opcode::Halt),
        );
    }

    // HALT program.
    {
        let mut cpu = Cpu::new();
        let ok = cpu.load_program(&[Word13::new(0x290)]).is_ok()
            && cpu.run().is_ok()
            && cpu.is_halted();
        check("CPU halt", ok);
    }

    // Literal add program.
    {
        let program: Vec<Word13> = [
            0x010u16, 0x010, 0x003, 0x010, 0x011, 0x004, 0x030, 0x010, 0x011, 0x290,
        ]
        .iter()
        .map(|&w| Word13::new(w))
        .collect();
        let mut cpu = Cpu::new();
        let ok = cpu.load_program(&program).is_ok()
            && cpu.run().is_ok()
            && cpu.mem.peek(0x10).get() == 7;
        check("CPU add", ok);
    }

    // Stack roundtrip.
    {
        let program: Vec<Word13> = [
            0x220u16, 0x100, 0x220, 0x200, 0x230, 0x030, 0x230, 0x031, 0x290,
        ]
        .iter()
        .map(|&w| Word13::new(w))
        .collect();
        let mut cpu = Cpu::new();
        let ok = cpu.load_program(&program).is_ok()
            && cpu.run().is_ok()
            && cpu.mem.peek(0x30).get() == 0x200
            && cpu.mem.peek(0x31).get() == 0x100
            && cpu.mem.sp().get() == SP_INITIAL;
        check("Stack roundtrip", ok);
    }

    // Demo program output through a scripted bridge.
    {
        let io = ScriptedIo::new("");
        let ok = match assemble(DEMO_SOURCE) {
            Ok(program) => {
                let mut cpu = Cpu::with_io(Box::new(io.clone()));
                cpu.load_program(&program).is_ok()
                    && cpu.run().is_ok()
                    && io.output() == "vm13 ok\n"
            }
            Err(_) => false,
        };
        check("Demo program", ok);
    }

    println!();
    println!("Results: {} passed, {} failed", passed, failed);

    if failed == 0 {
        println!("✓ All tests passed!");
    } else {
        std::process::exit(1);
    }
}
