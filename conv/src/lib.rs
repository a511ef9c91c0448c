// uwconv - Conversation script VM and decompiler
//
// Underworld conversations are compiled to a small stack machine bytecode.
// This library runs that bytecode and turns it back into readable source.
//
// # Architecture
//
// Running a conversation:
//
// 1. **Image Loading** (`image.rs`): header, imported symbols and code words
// 2. **Execution** (`vm.rs`, `stack.rs`): one instruction per step, with the
//    host reached through the `CodeCallback` trait
// 3. **Debugging** (`debugger.rs`): stepping and breakpoints over the VM
//
// Decompiling works in several phases over one code graph:
//
// 1. **Graph Building** (`graph.rs`): one node per opcode, jump targets and
//    cross references resolved to labels
// 2. **Function Detection** (`functions.rs`): prologue/epilogue matching,
//    then a worklist of functions reachable from main
// 3. **Expression Reduction** (`expr.rs`): stack operations folded into
//    expressions and statements
// 4. **Control Structures** (`cfg.rs`): switch, loops, if/else and gotos
// 5. **Formatting** (`format.rs`): indented source or a disassembly
//
// # Graph Model
//
// Opcodes are never deleted. Each phase marks the nodes it consumed as
// processed and inserts new nodes in front of them, so the final graph holds
// both the bytecode and the recovered source.

pub mod cfg;
pub mod debugger;
pub mod error;
pub mod expr;
pub mod format;
pub mod functions;
pub mod globals;
pub mod graph;
pub mod image;
pub mod opcode;
pub mod stack;
pub mod vm;

pub use debugger::{Debugger, StopReason};
pub use error::{GlobalsError, ImageError, StackError, VmFault};
pub use format::RenderOptions;
pub use functions::{ArrayInfo, FuncInfo};
pub use globals::ConvGlobals;
pub use graph::{CodeGraph, GraphNode, NodeId, NodeKind};
pub use image::{ConvImage, ImportKind, ImportedItem};
pub use opcode::{DataType, Opcode};
pub use stack::ConvStack;
pub use vm::{CodeCallback, CodeVm};

use anyhow::Context;

/// Decompile a conversation image to source text
pub fn decompile(image_data: &[u8], strings: Vec<String>, options: &RenderOptions) -> anyhow::Result<String> {
    // Load image
    let image = image::parse(image_data).context("Failed to parse conversation image")?;
    if image.code.is_empty() {
        anyhow::bail!("Conversation has no code");
    }

    // Build graph and analyze, starting at main
    let mut graph = CodeGraph::from_image(&image, strings);
    graph.decompile();

    Ok(format::render(&graph, options))
}

/// Disassemble a conversation image, with function boundaries and callers
pub fn disassemble(image_data: &[u8], strings: Vec<String>) -> anyhow::Result<String> {
    let options = RenderOptions {
        disassembly: true,
        ..Default::default()
    };
    decompile(image_data, strings, &options)
}

/// Split a strings file into one string per line; `\n` and `\\` are
/// unescaped
pub fn parse_strings(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            let mut unescaped = String::with_capacity(line.len());
            let mut chars = line.chars();
            while let Some(ch) = chars.next() {
                if ch != '\\' {
                    unescaped.push(ch);
                    continue;
                }
                match chars.next() {
                    Some('n') => unescaped.push('\n'),
                    Some(other) => unescaped.push(other),
                    None => unescaped.push('\\'),
                }
            }
            unescaped
        })
        .collect()
}
