// convdec - Underworld conversation decompiler
//
// Decompiles or disassembles conversation images, and runs them on the
// console through the script VM.
//
// Usage:
//   convdec decompile conv.bin --strings strings.txt -o conv.c
//   convdec disasm conv.bin
//   convdec run conv.bin --strings strings.txt --choices 2,1 --break 1a

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uwconv::vm::NO_SLOT;
use uwconv::{CodeCallback, CodeVm, ConvGlobals, ConvStack, Debugger, Opcode, RenderOptions, StopReason};

#[derive(Parser, Debug)]
#[command(name = "convdec")]
#[command(about = "Underworld conversation decompiler and script runner")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose output (-v for info, -vv for debug logging)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decompile a conversation image to source text
    Decompile {
        /// Conversation image
        image: PathBuf,

        /// Strings file, one string per line
        #[arg(long)]
        strings: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show functions nothing calls as raw opcodes
        #[arg(long)]
        show_unreachable: bool,
    },

    /// Disassemble a conversation image
    Disasm {
        /// Conversation image
        image: PathBuf,

        /// Strings file, one string per line
        #[arg(long)]
        strings: Option<PathBuf>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a conversation on the console
    Run {
        /// Conversation image
        image: PathBuf,

        /// Strings file, one string per line
        #[arg(long)]
        strings: Option<PathBuf>,

        /// Conversation slot of the persisted globals
        #[arg(long)]
        slot: Option<u16>,

        /// Persisted globals file
        #[arg(long, requires = "slot")]
        globals: Option<PathBuf>,

        /// Write the globals back to this file after the run
        #[arg(long, requires = "globals")]
        save_globals: Option<PathBuf>,

        /// Menu answers to pick, in order (1-based)
        #[arg(long, value_delimiter = ',')]
        choices: Vec<u16>,

        /// Report the VM state at these code positions (hex)
        #[arg(long = "break", value_parser = parse_hex)]
        breakpoints: Vec<u16>,

        /// Print every executed instruction
        #[arg(long)]
        trace: bool,

        /// Seed for the random() intrinsic
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn parse_hex(text: &str) -> Result<u16, String> {
    let digits = text.trim_start_matches("0x");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid position {}: {}", text, e))
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Decompile {
            image,
            strings,
            output,
            show_unreachable,
        } => {
            let data = std::fs::read(&image).context("Failed to read conversation image")?;
            let options = RenderOptions {
                show_unreachable,
                ..Default::default()
            };
            let text = uwconv::decompile(&data, load_strings(strings.as_deref())?, &options)?;
            write_output(output.as_deref(), &text)
        }
        Command::Disasm { image, strings, output } => {
            let data = std::fs::read(&image).context("Failed to read conversation image")?;
            let text = uwconv::disassemble(&data, load_strings(strings.as_deref())?)?;
            write_output(output.as_deref(), &text)
        }
        Command::Run {
            image,
            strings,
            slot,
            globals,
            save_globals,
            choices,
            breakpoints,
            trace,
            seed,
        } => {
            let data = std::fs::read(&image).context("Failed to read conversation image")?;
            let image = uwconv::image::parse(&data).context("Failed to parse conversation image")?;

            let mut persisted = match &globals {
                Some(path) => {
                    let data = std::fs::read(path).context("Failed to read globals file")?;
                    ConvGlobals::parse(&data).context("Failed to parse globals file")?
                }
                None => ConvGlobals::default(),
            };

            let slot = slot.unwrap_or(NO_SLOT);
            let mut vm = match seed {
                Some(seed) => CodeVm::with_seed(&image, slot, seed),
                None => CodeVm::new(&image, slot),
            };
            vm.set_strings(load_strings(strings.as_deref())?);

            let mut console = Console::new(choices);
            vm.init(&mut console, &persisted).context("Failed to start conversation")?;

            let mut debugger = Debugger::new(vm);
            for pos in breakpoints {
                debugger.add_breakpoint(pos);
            }

            let outcome = run(&mut debugger, &mut console, trace);

            debugger.vm().done(&mut persisted);
            if let Some(path) = save_globals {
                std::fs::write(&path, persisted.to_bytes()).context("Failed to write globals file")?;
                info!("globals written to {}", path.display());
            }
            outcome
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "warn,uwconv=info",
        _ => "warn,uwconv=debug",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_strings(path: Option<&Path>) -> Result<Vec<String>> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).context("Failed to read strings file")?;
            Ok(uwconv::parse_strings(&text))
        }
        None => Ok(Vec::new()),
    }
}

fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(path) => std::fs::write(path, text).context("Failed to write output"),
        None => {
            print!("{}", text);
            Ok(())
        }
    }
}

/// Step the script to its end, printing its output as it happens
fn run(debugger: &mut Debugger, console: &mut Console, trace: bool) -> Result<()> {
    let breakpoints: Vec<u16> = debugger.breakpoints().collect();

    loop {
        if trace {
            eprintln!("{}", current_instruction(debugger.vm()));
        }

        let reason = debugger.step_into(console);
        console.flush(debugger.vm());

        match reason {
            StopReason::Step | StopReason::Breakpoint(_) => {
                let vm = debugger.vm();
                let ip = vm.instruction_pointer();
                if breakpoints.contains(&ip) {
                    eprintln!(
                        "break at {:04x}: bp={:04x} sp={:04x} depth={} result={}",
                        ip,
                        vm.base_pointer(),
                        vm.stack().stack_pointer(),
                        vm.call_depth(),
                        vm.result_register()
                    );
                }
            }
            StopReason::Finished => return Ok(()),
            StopReason::Fault(fault) => bail!("Conversation stopped: {}", fault),
        }
    }
}

fn current_instruction(vm: &CodeVm) -> String {
    let ip = vm.instruction_pointer();
    let code = vm.code();
    let Some(&word) = code.get(ip as usize) else {
        return format!("{:04x} <end of code>", ip);
    };

    match Opcode::from_word(word) {
        Some(opcode) if opcode.arg_count() > 0 => {
            let arg = code.get(ip as usize + 1).copied().unwrap_or(0);
            format!("{:04x} {} {:#06x}", ip, opcode.mnemonic(), arg)
        }
        Some(opcode) => format!("{:04x} {}", ip, opcode.mnemonic()),
        None => format!("{:04x} ??? ({:#06x})", ip, word),
    }
}

enum Output {
    Say(u16),
    Menu { answers: Vec<u16>, choice: u16 },
}

/// Console host. Output is queued during a step and printed afterwards,
/// when the VM state for placeholders can be read.
struct Console {
    choices: VecDeque<u16>,
    globals: BTreeMap<String, u16>,
    output: Vec<Output>,
}

impl Console {
    fn new(choices: Vec<u16>) -> Self {
        Console {
            choices: choices.into(),
            globals: BTreeMap::new(),
            output: Vec::new(),
        }
    }

    fn flush(&mut self, vm: &CodeVm) {
        for output in self.output.drain(..) {
            match output {
                Output::Say(id) => println!("{}", message(vm, id)),
                Output::Menu { answers, choice } => {
                    for (n, id) in answers.iter().enumerate() {
                        println!("  {}. {}", n + 1, message(vm, *id));
                    }
                    println!("> {}", choice);
                }
            }
        }
    }
}

fn message(vm: &CodeVm, string_id: u16) -> String {
    match vm.local_string(string_id) {
        Some(text) => vm.replace_placeholder(text),
        None => format!("<string {}>", string_id),
    }
}

impl CodeCallback for Console {
    fn text_output(&mut self, string_id: u16) {
        self.output.push(Output::Say(string_id));
    }

    fn menu(&mut self, answer_string_ids: &[u16]) -> u16 {
        let count = answer_string_ids.len() as u16;
        let choice = match self.choices.pop_front() {
            Some(choice) if (1..=count).contains(&choice) => choice,
            Some(choice) => {
                warn!("choice {} out of range 1..={}, taking the first answer", choice, count);
                1
            }
            None => 1,
        };

        self.output.push(Output::Menu {
            answers: answer_string_ids.to_vec(),
            choice,
        });
        choice
    }

    fn external_call(&mut self, name: &str, _stack: &ConvStack) -> u16 {
        info!("intrinsic {}() has no effect on the console", name);
        0
    }

    fn get_global(&mut self, name: &str) -> u16 {
        self.globals.get(name).copied().unwrap_or(0)
    }

    fn set_global(&mut self, name: &str, value: u16) {
        self.globals.insert(name.to_string(), value);
    }
}
