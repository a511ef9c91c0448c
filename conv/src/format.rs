// format.rs - Text listings of a code graph
//
// Two views over the same graph: the decompiled source, built from the
// statements the analysis inserted, and a disassembly listing every opcode
// with function boundaries and their callers.

use crate::graph::{CodeGraph, GraphNode, NodeKind};

const INDENT: &str = "   ";

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Render the disassembly instead of decompiled source
    pub disassembly: bool,
    /// Show the raw opcodes of functions nothing calls
    pub show_unreachable: bool,
}

/// Render the graph as text
pub fn render(graph: &CodeGraph, options: &RenderOptions) -> String {
    let mut out = Listing::default();
    if options.disassembly {
        render_disassembly(graph, &mut out);
    } else {
        render_decompiled(graph, options.show_unreachable, &mut out);
    }
    out.text
}

#[derive(Default)]
struct Listing {
    text: String,
    level: i32,
}

impl Listing {
    fn line(&mut self, text: &str) {
        for _ in 0..self.level.max(0) {
            self.text.push_str(INDENT);
        }
        self.text.push_str(text);
        self.text.push('\n');
    }

    fn statement(&mut self, node: &GraphNode) {
        if let NodeKind::Statement(data) = &node.kind {
            self.level += data.indent_before;
            self.line(&data.text);
            self.level += data.indent_after;
        }
    }

    fn label(&mut self, node: &GraphNode) {
        if let Some(label) = &node.label {
            self.line(&format!("{}:", label));
        }
    }
}

fn render_decompiled(graph: &CodeGraph, show_unreachable: bool, out: &mut Listing) {
    let mut nodes = graph.iter();

    while let Some((_, node)) = nodes.next() {
        if node.processed {
            continue;
        }

        match &node.kind {
            NodeKind::FuncStart => {
                // only functions never analyzed keep an open start node
                let name = node.label.as_deref().unwrap_or("?");
                if show_unreachable {
                    out.line(&format!("// {} is never called", name));
                }
                for (_, inner) in nodes.by_ref() {
                    if matches!(inner.kind, NodeKind::FuncEnd) {
                        break;
                    }
                    if show_unreachable && inner.opcode().is_some() {
                        out.line(&inner.format_opcode());
                    }
                }
                if show_unreachable {
                    out.line("");
                }
            }
            NodeKind::FuncEnd => {}
            NodeKind::Statement(_) => out.statement(node),
            NodeKind::Opcode(_) => {
                out.label(node);
                out.line(&node.format_opcode());
            }
            NodeKind::Expression(_) | NodeKind::Operator(_) => {
                out.label(node);
                out.line(&format!("// {}", node.format()));
            }
        }
    }
}

fn render_disassembly(graph: &CodeGraph, out: &mut Listing) {
    for (_, node) in graph.iter() {
        match &node.kind {
            NodeKind::FuncStart => {
                let name = node.label.as_deref().unwrap_or("?");
                let callers = graph
                    .functions()
                    .get(&node.pos)
                    .map(|info| info.callers.iter().cloned().collect::<Vec<_>>())
                    .unwrap_or_default();

                if callers.is_empty() {
                    out.line(&format!("// function {}", name));
                } else {
                    out.line(&format!("// function {}, called by {}", name, callers.join(", ")));
                }
            }
            NodeKind::FuncEnd => out.label(node),
            NodeKind::Opcode(_) => {
                out.label(node);
                out.line(&node.opcode_text());
            }
            NodeKind::Statement(_) | NodeKind::Expression(_) | NodeKind::Operator(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::graph;
    use crate::opcode::op::*;
    use pretty_assertions::assert_eq;

    // main calls the empty func_0013 if local_1 is 0; a stray NOP sits
    // between them and a function nothing calls follows
    fn sample() -> CodeGraph {
        let mut g = graph(&[
            PUSHBP, SPTOBP, PUSHI, 1, ADDSP, // 0..4
            PUSHI_EFF, 1, FETCHM, PUSHI, 0, TSTEQ, BEQ, 3, CALL, 19, // 5..14
            BPTOSP, POPBP, RET, NOP, // 15..18
            PUSHBP, SPTOBP, PUSHI, 0, ADDSP, BPTOSP, POPBP, RET, // 19..26
            PUSHBP, SPTOBP, PUSHI, 0, ADDSP, BPTOSP, POPBP, RET, // 27..34
        ]);
        g.decompile();
        g
    }

    #[test]
    fn test_render_decompiled() {
        let text = render(&sample(), &RenderOptions::default());
        assert_eq!(
            text,
            "void main() // referenced 1 times\n\
             {\n\
             \x20  int local_1;\n\
             \x20  if (local_1 == 0) {\n\
             \x20     func_0013();\n\
             \x20  } // end-if\n\
             } // end-function\n\
             \n\
             0012 NOP\n\
             void func_0013() // referenced 1 times\n\
             {\n\
             } // end-function\n\
             \n"
        );
    }

    #[test]
    fn test_render_unreachable() {
        let options = RenderOptions {
            show_unreachable: true,
            ..Default::default()
        };
        let text = render(&sample(), &options);
        assert!(text.contains(
            "// unused_001b is never called\n\
             // 001b PUSHBP\n\
             // 001c SPTOBP\n\
             // 001d PUSHI 0x0000\n\
             // 001f ADDSP\n"
        ));
        assert!(!render(&sample(), &RenderOptions::default()).contains("unused_001b"));
    }

    #[test]
    fn test_render_disassembly() {
        let options = RenderOptions {
            disassembly: true,
            ..Default::default()
        };
        let text = render(&sample(), &options);
        assert!(text.starts_with("// function main\n"));
        assert!(text.contains("// function func_0013, called by main\n"));
        assert!(text.contains("\n000b BEQ label_000f\n"));
        assert!(text.contains("\n0012 NOP\n"));
        assert!(!text.contains("if ("));
        assert!(text.contains("label_000f:\n"));
        assert!(text.contains("// function unused_001b\n"));
    }

    #[test]
    fn test_indentation_balanced() {
        let g = sample();
        let mut level = 0;
        for (_, node) in g.iter().filter(|(_, node)| !node.processed) {
            if let Some(statement) = node.statement_data() {
                level += statement.indent_before;
                assert!(level >= 0, "negative indent at {}", statement.text);
                level += statement.indent_after;
            }
        }
        assert_eq!(level, 0);
    }
}
