// graph.rs - Code graph for decompiling conversation code
//
// The graph starts as one node per instruction and is rewritten in place by
// the later passes: opcodes are never removed, only marked processed, and
// synthetic operator, expression and statement nodes are inserted next to
// the opcodes they were derived from. Nodes live in an arena and are linked
// into a list through stable NodeIds, so passes can keep positions while
// inserting.

use crate::functions::FuncInfo;
use crate::image::{ConvImage, ImportedItem};
use crate::opcode::{DataType, Opcode, ATOM_PRECEDENCE};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::warn;

/// Stable index of a node in the graph arena
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpcodeData {
    /// Raw code word
    pub word: u16,
    /// Decoded opcode, None for unknown words
    pub opcode: Option<Opcode>,
    pub arg: u16,
    /// Label or function name the opcode jumps to
    pub jump_target: String,
    pub jump_target_pos: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorData {
    pub opcode: Opcode,
    pub arg: u16,
    pub needed_expressions: usize,
    pub returns_expression: bool,
    pub returned_type: DataType,
    /// Argument types, for call operators
    pub arg_types: Vec<DataType>,
    /// Operands were swapped by a SWAP opcode
    pub swap_expressions: bool,
    pub precedence: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementData {
    pub text: String,
    pub indent_before: i32,
    pub indent_after: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionData {
    pub text: String,
    /// Address of a variable rather than its value
    pub is_address: bool,
    /// Created from an immediate PUSHI value
    pub is_pushi_imm: bool,
    pub pushi_imm_value: u16,
    pub precedence: u8,
}

impl ExpressionData {
    pub fn value(text: impl Into<String>) -> Self {
        ExpressionData {
            text: text.into(),
            is_address: false,
            is_pushi_imm: false,
            pushi_imm_value: 0,
            precedence: ATOM_PRECEDENCE,
        }
    }

    pub fn address(text: impl Into<String>) -> Self {
        ExpressionData {
            is_address: true,
            ..ExpressionData::value(text)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Opcode(OpcodeData),
    FuncStart,
    FuncEnd,
    Operator(OperatorData),
    Statement(StatementData),
    Expression(ExpressionData),
}

#[derive(Debug, Clone)]
pub struct GraphNode {
    pub kind: NodeKind,
    /// Code position; synthetic nodes share the position of their origin
    pub pos: u16,
    pub label: Option<String>,
    pub xrefs: u32,
    pub processed: bool,
    prev: Option<NodeId>,
    next: Option<NodeId>,
}

impl GraphNode {
    pub fn new(kind: NodeKind, pos: u16) -> Self {
        GraphNode {
            kind,
            pos,
            label: None,
            xrefs: 0,
            processed: false,
            prev: None,
            next: None,
        }
    }

    pub fn statement(pos: u16, text: impl Into<String>, indent_before: i32, indent_after: i32) -> Self {
        GraphNode::new(
            NodeKind::Statement(StatementData {
                text: text.into(),
                indent_before,
                indent_after,
            }),
            pos,
        )
    }

    pub fn opcode(&self) -> Option<&OpcodeData> {
        match &self.kind {
            NodeKind::Opcode(data) => Some(data),
            _ => None,
        }
    }

    pub fn statement_data(&self) -> Option<&StatementData> {
        match &self.kind {
            NodeKind::Statement(data) => Some(data),
            _ => None,
        }
    }

    pub fn expression(&self) -> Option<&ExpressionData> {
        match &self.kind {
            NodeKind::Expression(data) => Some(data),
            _ => None,
        }
    }

    /// Is this an opcode node with the given opcode?
    pub fn is(&self, opcode: Opcode) -> bool {
        self.opcode().is_some_and(|data| data.opcode == Some(opcode))
    }

    /// Render the raw opcode, e.g. `0005 BEQ label_0011`; opcodes the
    /// decompiler consumed are commented out
    pub fn format_opcode(&self) -> String {
        let text = self.opcode_text();
        if self.processed && !text.is_empty() {
            format!("// {}", text)
        } else {
            text
        }
    }

    /// The raw opcode without regard to the processed flag
    pub fn opcode_text(&self) -> String {
        let Some(data) = self.opcode() else {
            return String::new();
        };
        let Some(opcode) = data.opcode else {
            return format!("{:04x} ??? ({:#06x})", self.pos, data.word);
        };

        let mut text = format!("{:04x} {}", self.pos, opcode.mnemonic());
        if opcode.arg_count() > 0 {
            if (opcode.has_code_target() || opcode == Opcode::CALLI) && !data.jump_target.is_empty() {
                text.push(' ');
                text.push_str(&data.jump_target);
            } else {
                text.push_str(&format!(" {:#06x}", data.arg));
            }
        }
        text
    }

    /// Render the node for listings
    pub fn format(&self) -> String {
        let prefix = if self.processed { "// " } else { "" };
        match &self.kind {
            NodeKind::Opcode(_) => self.format_opcode(),
            NodeKind::FuncStart => format!("{}function start {}", prefix, self.label.as_deref().unwrap_or("")),
            NodeKind::FuncEnd => format!("{}function end", prefix),
            NodeKind::Operator(data) => format!(
                "{}operator {}, needs {} expressions, yields {} expression{}; level={}",
                prefix,
                data.opcode.mnemonic(),
                data.needed_expressions,
                if data.returns_expression { "an" } else { "no" },
                if data.swap_expressions { ", swaps args" } else { "" },
                data.precedence
            ),
            NodeKind::Statement(data) => data.text.clone(),
            NodeKind::Expression(data) => format!(
                "{}expression: {} ({}); level={}",
                prefix,
                data.text,
                if data.is_address { "address-of" } else { "value-of" },
                data.precedence
            ),
        }
    }
}

/// The decompiler's code graph
pub struct CodeGraph {
    nodes: Vec<GraphNode>,
    head: Option<NodeId>,
    tail: Option<NodeId>,

    pub(crate) strings: Vec<String>,
    pub(crate) imported_functions: BTreeMap<u16, ImportedItem>,
    pub(crate) imported_variables: BTreeMap<u16, ImportedItem>,
    pub(crate) reserved_globals: u16,

    /// Functions keyed by start position
    pub(crate) functions: BTreeMap<u16, FuncInfo>,
    pub(crate) function_queue: VecDeque<u16>,
    pub(crate) processed_functions: BTreeSet<u16>,
    /// (loop condition position, back jump position) of recognized loops
    pub(crate) continue_ranges: BTreeSet<(u16, u16)>,
}

impl CodeGraph {
    /// Build the graph from the code words in `start..end`
    pub fn new(
        code: &[u16],
        start: u16,
        end: u16,
        strings: Vec<String>,
        imported_functions: BTreeMap<u16, ImportedItem>,
        imported_variables: BTreeMap<u16, ImportedItem>,
        reserved_globals: u16,
    ) -> Self {
        let mut graph = CodeGraph {
            nodes: Vec::new(),
            head: None,
            tail: None,
            strings,
            imported_functions,
            imported_variables,
            reserved_globals,
            functions: BTreeMap::new(),
            function_queue: VecDeque::new(),
            processed_functions: BTreeSet::new(),
            continue_ranges: BTreeSet::new(),
        };

        let end = (end as usize).min(code.len());
        let mut pos = start as usize;
        while pos < end {
            let word = code[pos];
            let opcode = Opcode::from_word(word);
            let arg_count = opcode.map(|o| o.arg_count() as usize).unwrap_or(0);

            let arg = if arg_count > 0 {
                match code.get(pos + 1) {
                    Some(arg) if pos + 1 < end => *arg,
                    _ => {
                        warn!("opcode {:#06x} at {:04x} is missing its argument", word, pos);
                        0
                    }
                }
            } else {
                0
            };

            if opcode.is_none() {
                warn!("unknown opcode {:#06x} at {:04x}", word, pos);
            }

            graph.push_back(GraphNode::new(
                NodeKind::Opcode(OpcodeData {
                    word,
                    opcode,
                    arg,
                    jump_target: String::new(),
                    jump_target_pos: 0,
                }),
                pos as u16,
            ));

            pos += 1 + arg_count;
        }

        graph
    }

    pub fn from_image(image: &ConvImage, strings: Vec<String>) -> Self {
        CodeGraph::new(
            &image.code,
            0,
            image.code.len().min(u16::MAX as usize) as u16,
            strings,
            image.imported_functions.clone(),
            image.imported_globals.clone(),
            image.reserved_globals,
        )
    }

    /// Only resolve jump targets, for a plain disassembly
    pub fn disassemble(&mut self) {
        self.collect_xrefs();
    }

    // ===================================================================
    // Arena and list access
    // ===================================================================

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut GraphNode {
        &mut self.nodes[id]
    }

    pub fn first(&self) -> Option<NodeId> {
        self.head
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].next
    }

    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id].prev
    }

    /// Iterate nodes in list order
    pub fn iter(&self) -> NodeIter<'_> {
        NodeIter {
            graph: self,
            cur: self.head,
        }
    }

    /// Number of nodes in the graph
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn push_back(&mut self, mut node: GraphNode) -> NodeId {
        let id = self.nodes.len();
        node.prev = self.tail;
        node.next = None;
        match self.tail {
            Some(tail) => self.nodes[tail].next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.nodes.push(node);
        id
    }

    /// Insert a node before `anchor`, returning its id
    pub fn insert_before(&mut self, anchor: NodeId, mut node: GraphNode) -> NodeId {
        let id = self.nodes.len();
        let prev = self.nodes[anchor].prev;
        node.prev = prev;
        node.next = Some(anchor);
        match prev {
            Some(prev) => self.nodes[prev].next = Some(id),
            None => self.head = Some(id),
        }
        self.nodes[anchor].prev = Some(id);
        self.nodes.push(node);
        id
    }

    /// Insert a statement before `anchor`
    pub(crate) fn insert_statement(
        &mut self,
        anchor: NodeId,
        text: impl Into<String>,
        indent_before: i32,
        indent_after: i32,
    ) -> NodeId {
        let pos = self.nodes[anchor].pos;
        self.insert_before(anchor, GraphNode::statement(pos, text, indent_before, indent_after))
    }

    /// Insert an expression before `anchor`; the expression takes over the
    /// anchor's label
    pub(crate) fn insert_expression(&mut self, anchor: NodeId, data: ExpressionData) -> NodeId {
        let pos = self.nodes[anchor].pos;
        let label = self.nodes[anchor].label.take();
        let mut node = GraphNode::new(NodeKind::Expression(data), pos);
        node.label = label;
        self.insert_before(anchor, node)
    }

    /// First node at the given code position
    pub fn find_pos(&self, pos: u16) -> Option<NodeId> {
        self.iter().find(|(_, node)| node.pos == pos).map(|(id, _)| id)
    }

    pub(crate) fn opcode_data(&self, id: NodeId) -> Option<&OpcodeData> {
        self.nodes[id].opcode()
    }

    /// Unprocessed opcode node with the given opcode?
    pub(crate) fn is_open_opcode(&self, id: NodeId, opcode: Opcode) -> bool {
        let node = &self.nodes[id];
        !node.processed && node.is(opcode)
    }

    pub(crate) fn is_open_expression(&self, id: NodeId) -> bool {
        let node = &self.nodes[id];
        !node.processed && node.expression().is_some()
    }

    pub(crate) fn jump_target_pos(&self, id: NodeId) -> u16 {
        self.opcode_data(id).map(|data| data.jump_target_pos).unwrap_or(0)
    }

    pub(crate) fn mark_processed(&mut self, id: NodeId) {
        self.nodes[id].processed = true;
    }

    /// Next node inside a function body; None at the function end
    pub(crate) fn body_next(&self, id: NodeId, end: NodeId) -> Option<NodeId> {
        self.next(id).filter(|&next| next != end)
    }

    /// First unprocessed node after `id` and before `end`, of any kind
    pub(crate) fn next_open_node(&self, id: NodeId, end: NodeId) -> Option<NodeId> {
        let mut cur = self.body_next(id, end);
        while let Some(next) = cur {
            if !self.nodes[next].processed {
                return Some(next);
            }
            cur = self.body_next(next, end);
        }
        None
    }

    /// Nearest opcode node before `id`
    pub(crate) fn prev_opcode(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = self.prev(id);
        while let Some(prev) = cur {
            if self.nodes[prev].opcode().is_some() {
                return Some(prev);
            }
            cur = self.prev(prev);
        }
        None
    }

    /// Do the nodes starting at `id` form exactly this opcode sequence?
    pub(crate) fn match_opcode_pattern(&self, id: NodeId, pattern: &[Opcode]) -> bool {
        let mut cur = Some(id);
        for &opcode in pattern {
            match cur {
                Some(node) if self.nodes[node].is(opcode) => cur = self.next(node),
                _ => return false,
            }
        }
        true
    }

    /// Find the next run of unprocessed opcodes matching `pattern`, starting
    /// at `from`. Non-opcode nodes in between are skipped.
    pub(crate) fn find_opcode_pattern(&self, from: NodeId, pattern: &[Opcode]) -> Option<NodeId> {
        let open_opcodes: Vec<NodeId> = NodeIter {
            graph: self,
            cur: Some(from),
        }
        .filter(|(_, node)| !node.processed && node.opcode().is_some())
        .map(|(id, _)| id)
        .collect();

        open_opcodes
            .windows(pattern.len())
            .find(|window| {
                window
                    .iter()
                    .zip(pattern)
                    .all(|(&id, &opcode)| self.nodes[id].is(opcode))
            })
            .map(|window| window[0])
    }

    /// Mark the next `count` opcode nodes starting at `id` processed
    pub(crate) fn set_opcodes_processed(&mut self, id: NodeId, count: usize) {
        let mut cur = Some(id);
        let mut marked = 0;
        while let Some(node) = cur {
            if marked == count {
                break;
            }
            if self.nodes[node].opcode().is_some() {
                self.nodes[node].processed = true;
                marked += 1;
            }
            cur = self.next(node);
        }
    }

    // ===================================================================
    // Cross references
    // ===================================================================

    /// Resolve jump targets, count references and create labels
    pub(crate) fn collect_xrefs(&mut self) {
        let Some(first) = self.head else {
            return;
        };
        self.nodes[first].label = Some("main".to_string());
        self.nodes[first].xrefs = 1;

        let ids: Vec<NodeId> = self.iter().map(|(id, _)| id).collect();
        for id in ids {
            let pos = self.nodes[id].pos;
            let Some(data) = self.nodes[id].opcode() else {
                continue;
            };
            let Some(opcode) = data.opcode else {
                continue;
            };
            let arg = data.arg;

            if opcode == Opcode::CALLI {
                let name = match self.imported_functions.get(&arg) {
                    Some(item) => item.name.clone(),
                    None => {
                        warn!("unknown intrinsic {:#06x} called at {:04x}", arg, pos);
                        continue;
                    }
                };
                if let NodeKind::Opcode(data) = &mut self.nodes[id].kind {
                    data.jump_target = name;
                }
                continue;
            }

            let target = match opcode {
                Opcode::CALL if arg == 0xffff => continue,
                Opcode::JMP | Opcode::CALL => arg,
                Opcode::BEQ | Opcode::BNE | Opcode::BRA => crate::vm::branch_target(pos, arg),
                _ => continue,
            };

            let Some(target_id) = self.find_pos(target) else {
                warn!("{} at {:04x} jumps to unknown position {:04x}", opcode.mnemonic(), pos, target);
                continue;
            };

            let target_node = &mut self.nodes[target_id];
            if target_node.xrefs == 0 && target_node.label.is_none() {
                target_node.label = Some(format!("label_{:04x}", target));
            }
            target_node.xrefs += 1;
            let label = target_node.label.clone().unwrap_or_default();

            if let NodeKind::Opcode(data) = &mut self.nodes[id].kind {
                data.jump_target = label;
                data.jump_target_pos = target;
            }
        }
    }

    // ===================================================================
    // Names and strings
    // ===================================================================

    /// Name of the global at a memory index
    pub(crate) fn memory_var_name(&self, index: u16) -> String {
        match self.imported_variables.get(&index) {
            Some(item) => item.name.clone(),
            None => format!("global_{}", index),
        }
    }

    /// String table entry as a quoted, escaped literal
    pub(crate) fn string_literal(&self, index: u16) -> Option<String> {
        let text = self.strings.get(index as usize)?;
        Some(format!("\"{}\"", escape(text)))
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Functions found in the code, keyed by start position
    pub fn functions(&self) -> &BTreeMap<u16, FuncInfo> {
        &self.functions
    }
}

/// Escape a string for display inside double quotes
pub(crate) fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\n' => escaped.push_str("\\n"),
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Iterator over graph nodes in list order
pub struct NodeIter<'a> {
    graph: &'a CodeGraph,
    cur: Option<NodeId>,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = (NodeId, &'a GraphNode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let node = &self.graph.nodes[id];
        self.cur = node.next;
        Some((id, node))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::opcode::op::*;

    /// Graph over bare code, no strings or imports
    pub(crate) fn graph(code: &[u16]) -> CodeGraph {
        CodeGraph::new(code, 0, code.len() as u16, Vec::new(), BTreeMap::new(), BTreeMap::new(), 0)
    }

    #[test]
    fn test_build_consumes_arguments() {
        let g = graph(&[PUSHI, 5, POP, JMP, 0, 0x99]);
        let positions: Vec<u16> = g.iter().map(|(_, n)| n.pos).collect();
        assert_eq!(positions, vec![0, 2, 3, 5]);
        assert_eq!(g.node(2).opcode().map(|d| d.arg), Some(0));
        assert_eq!(g.node(3).opcode().and_then(|d| d.opcode), None);
    }

    #[test]
    fn test_insert_before_keeps_order() {
        let mut g = graph(&[NOP, NOP, NOP]);
        let second = g.find_pos(1).unwrap();
        let inserted = g.insert_statement(second, "x;", 0, 0);
        let head = g.first().unwrap();
        let inserted_head = g.insert_statement(head, "first;", 0, 0);

        let order: Vec<NodeId> = g.iter().map(|(id, _)| id).collect();
        assert_eq!(order, vec![inserted_head, 0, inserted, 1, 2]);
        assert_eq!(g.prev(1), Some(inserted));
        assert_eq!(g.find_pos(1), Some(inserted));
        assert_eq!(g.first(), Some(inserted_head));
    }

    #[test]
    fn test_xrefs_and_labels() {
        // 0: BEQ -> 4, 2: JMP 4, 4: CALL 0, 6: BRA -> 0, 8: CALL ffff
        let mut g = graph(&[BEQ, 3, JMP, 4, CALL, 0, BRA, 0xfff9, CALL, 0xffff]);
        g.disassemble();

        let main = g.node(0);
        assert_eq!(main.label.as_deref(), Some("main"));
        assert_eq!(main.xrefs, 3);

        let target = g.find_pos(4).unwrap();
        assert_eq!(g.node(target).label.as_deref(), Some("label_0004"));
        assert_eq!(g.node(target).xrefs, 2);
        assert_eq!(g.node(0).opcode().unwrap().jump_target, "label_0004");
        assert_eq!(g.node(target).format_opcode(), "0004 CALL main");
    }

    #[test]
    fn test_xref_conservation() {
        let code = [
            PUSHI, 1, BEQ, 5, CALL, 16, JMP, 0, BRA, 0xfffb, // 0..9
            PUSHI, 2, BNE, 0xfff3, JMP, 10, RET,
        ];
        let mut g = graph(&code);
        g.disassemble();

        for (_, node) in g.iter() {
            let mut expected = node.xrefs;
            if node.pos == 0 {
                // entry point reference
                expected -= 1;
            }
            let sources = g
                .iter()
                .filter_map(|(_, n)| n.opcode())
                .filter(|d| d.opcode.is_some_and(|o| o.has_code_target()))
                .filter(|d| !d.jump_target.is_empty() && d.jump_target_pos == node.pos)
                .count() as u32;
            assert_eq!(sources, expected, "references to {:04x}", node.pos);
        }
    }

    #[test]
    fn test_calli_target_name() {
        let mut imports = BTreeMap::new();
        imports.insert(3, ImportedItem::function("babl_menu", DataType::Int));
        let code = [PUSHI, 0, CALLI, 3];
        let mut g = CodeGraph::new(&code, 0, 4, Vec::new(), imports, BTreeMap::new(), 0);
        g.disassemble();

        let calli = g.find_pos(2).unwrap();
        assert_eq!(g.node(calli).format_opcode(), "0002 CALLI babl_menu");
    }

    #[test]
    fn test_pattern_search_restarts() {
        // the first PUSHBP is not followed by SPTOBP
        let g = graph(&[PUSHBP, PUSHBP, SPTOBP, PUSHI, 0, ADDSP]);
        let found = g.find_opcode_pattern(0, &[Opcode::PUSHBP, Opcode::SPTOBP, Opcode::PUSHI, Opcode::ADDSP]);
        assert_eq!(found.map(|id| g.node(id).pos), Some(1));
        assert!(g.match_opcode_pattern(1, &[Opcode::PUSHBP, Opcode::SPTOBP]));
        assert!(!g.match_opcode_pattern(0, &[Opcode::PUSHBP, Opcode::SPTOBP]));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("a\n\"b\""), "a\\n\\\"b\\\"");
    }
}
