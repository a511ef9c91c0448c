// functions.rs - Function boundaries and the analysis worklist
//
// The conversation compiler brackets every function with a fixed prologue
// and epilogue. Analysis starts at main and follows calls breadth first, so
// functions nothing calls are never decompiled.

use crate::graph::{CodeGraph, GraphNode, NodeId, NodeKind};
use crate::opcode::{function_name, DataType, Opcode};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

const PROLOGUE: [Opcode; 4] = [Opcode::PUSHBP, Opcode::SPTOBP, Opcode::PUSHI, Opcode::ADDSP];
const EPILOGUE: [Opcode; 3] = [Opcode::BPTOSP, Opcode::POPBP, Opcode::RET];

/// Local array, found through its indexed accesses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayInfo {
    pub local_start: u16,
    /// Highest index seen; indices are 1-based
    pub size: u16,
}

#[derive(Debug, Clone)]
pub struct FuncInfo {
    pub name: String,
    /// Start position, including a leading START opcode
    pub start: u16,
    /// Position of the PUSHBP opcode
    pub entry: u16,
    /// Position of the epilogue
    pub end: u16,
    pub return_type: DataType,
    pub param_types: Vec<DataType>,
    /// Types indexed by frame slot; slot 0 holds the saved base pointer
    pub locals_types: Vec<DataType>,
    pub arrays: Vec<ArrayInfo>,
    /// Names of the functions calling this one
    pub callers: BTreeSet<String>,
    pub(crate) start_node: NodeId,
    pub(crate) end_node: NodeId,
}

impl FuncInfo {
    /// Record an indexed access to a local array
    pub(crate) fn add_array_access(&mut self, local_start: u16, index: u16) {
        match self.arrays.iter_mut().find(|a| a.local_start == local_start) {
            Some(array) => array.size = array.size.max(index),
            None => self.arrays.push(ArrayInfo {
                local_start,
                size: index,
            }),
        }
    }

    fn in_array(&self, slot: usize) -> bool {
        self.arrays.iter().any(|a| {
            let start = a.local_start as usize;
            slot >= start && slot < start + (a.size.max(1) as usize)
        })
    }
}

impl CodeGraph {
    /// Run the whole decompiler over the graph
    pub fn decompile(&mut self) {
        self.collect_xrefs();
        self.find_functions();
        self.update_call_jump_targets();

        match self.functions.values().find(|f| f.name == "main") {
            Some(main) => self.function_queue.push_back(main.start),
            None => warn!("no main function found"),
        }

        self.process_function_queue();
        self.mark_unused_functions();
    }

    /// Detect function boundaries; returns the number of new functions
    pub(crate) fn find_functions(&mut self) -> usize {
        let mut found = 0;
        let mut cursor = self.first();

        while let Some(from) = cursor {
            let Some(prologue) = self.find_opcode_pattern(from, &PROLOGUE) else {
                break;
            };
            let Some(epilogue) = self.find_opcode_pattern(prologue, &EPILOGUE) else {
                warn!("function at {:04x} has no exit", self.node(prologue).pos);
                break;
            };

            let info = self.add_function(prologue, epilogue);
            debug!(
                "found function {} at {:04x}..{:04x}",
                info.name, info.start, info.end
            );

            cursor = self.next(info.end_node);
            self.functions.insert(info.start, info);
            found += 1;
        }

        found
    }

    fn add_function(&mut self, prologue: NodeId, epilogue: NodeId) -> FuncInfo {
        let entry = self.node(prologue).pos;
        let num_locals = self
            .next(prologue)
            .and_then(|id| self.next(id))
            .and_then(|id| self.opcode_data(id))
            .map(|data| data.arg)
            .unwrap_or(0);

        // calls may target a START opcode right before the prologue
        let start_opcode = self.prev(prologue).filter(|&id| self.node(id).is(Opcode::START));
        let first = start_opcode.unwrap_or(prologue);
        let start = self.node(first).pos;

        let mut xrefs = std::mem::take(&mut self.node_mut(prologue).xrefs);
        let mut label = self.node_mut(prologue).label.take();
        let mut label_pos = entry;
        if let Some(id) = start_opcode {
            let node = self.node_mut(id);
            xrefs += std::mem::take(&mut node.xrefs);
            if let Some(start_label) = node.label.take() {
                label = Some(start_label);
                label_pos = start;
            }
        }

        let name = if start <= 1 {
            xrefs = 1;
            "main".to_string()
        } else {
            match label {
                None if xrefs == 0 => format!("unused_{:04x}", start),
                None => function_name(start),
                Some(label) if label.starts_with("label_") => function_name(label_pos),
                Some(label) => label,
            }
        };

        let mut func_start = GraphNode::new(NodeKind::FuncStart, start);
        func_start.label = Some(name.clone());
        func_start.xrefs = xrefs;
        let start_node = self.insert_before(first, func_start);
        self.set_opcodes_processed(first, PROLOGUE.len() + usize::from(start_opcode.is_some()));

        let end = self.node(epilogue).pos;
        let mut func_end = GraphNode::new(NodeKind::FuncEnd, end);
        func_end.label = self.node_mut(epilogue).label.take();
        func_end.xrefs = std::mem::take(&mut self.node_mut(epilogue).xrefs);
        let end_node = self.insert_before(epilogue, func_end);
        self.set_opcodes_processed(epilogue, EPILOGUE.len());

        FuncInfo {
            name,
            start,
            entry,
            end,
            return_type: DataType::Void,
            param_types: Vec::new(),
            locals_types: vec![DataType::Unknown; num_locals as usize + 1],
            arrays: Vec::new(),
            callers: BTreeSet::new(),
            start_node,
            end_node,
        }
    }

    /// Key of the function starting or entered at `pos`
    pub(crate) fn function_key(&self, pos: u16) -> Option<u16> {
        if self.functions.contains_key(&pos) {
            return Some(pos);
        }
        self.functions
            .values()
            .find(|info| info.entry == pos)
            .map(|info| info.start)
    }

    /// Name calls after the functions they reach
    pub(crate) fn update_call_jump_targets(&mut self) {
        let calls: Vec<NodeId> = self
            .iter()
            .filter(|(_, node)| node.is(Opcode::CALL))
            .map(|(id, _)| id)
            .collect();

        for id in calls {
            let arg = self.opcode_data(id).map(|data| data.arg).unwrap_or(0);
            let name = if arg == 0xffff {
                "invalid_ffff".to_string()
            } else {
                match self.function_key(arg).and_then(|key| self.functions.get(&key)) {
                    Some(info) => info.name.clone(),
                    None => {
                        warn!("call at {:04x} to {:04x} reaches no function", self.node(id).pos, arg);
                        continue;
                    }
                }
            };

            if let NodeKind::Opcode(data) = &mut self.node_mut(id).kind {
                data.jump_target = name;
            }
        }
    }

    fn process_function_queue(&mut self) {
        while let Some(start) = self.function_queue.pop_front() {
            if !self.processed_functions.insert(start) {
                continue;
            }
            let Some(mut info) = self.functions.remove(&start) else {
                warn!("queued function at {:04x} does not exist", start);
                continue;
            };

            debug!("analyzing function {} at {:04x}", info.name, info.start);

            self.analyze_function(&mut info);
            self.combine_operators(&mut info);
            self.find_switch_case(&info);
            self.find_while(&info);
            self.find_do_while(&info);
            self.find_if_else(&info);
            self.add_goto_jumps(&info);
            self.post_process_function(&info);

            self.functions.insert(start, info);
        }
    }

    /// Add header, braces and declarations around an analyzed function
    fn post_process_function(&mut self, info: &FuncInfo) {
        let params: Vec<String> = info
            .param_types
            .iter()
            .enumerate()
            .map(|(i, ty)| format!("{} param{}", ty.as_str(), i + 1))
            .collect();

        let header = format!(
            "{} {}({}) // referenced {} times",
            info.return_type.as_str(),
            info.name,
            params.join(", "),
            self.node(info.start_node).xrefs
        );

        let start = info.start_node;
        self.insert_statement(start, header, 0, 0);
        self.insert_statement(start, "{", 0, 1);

        for (slot, ty) in info.locals_types.iter().enumerate() {
            if *ty == DataType::Unknown || info.in_array(slot) {
                continue;
            }
            self.insert_statement(start, format!("{} local_{};", ty.as_str(), slot), 0, 0);
        }
        for array in &info.arrays {
            self.insert_statement(
                start,
                format!("int local_{}[{}];", array.local_start, array.size),
                0,
                0,
            );
        }

        self.insert_statement(info.end_node, "} // end-function", -1, 0);
        self.insert_statement(info.end_node, "", 0, 0);

        self.mark_processed(info.start_node);
        self.mark_processed(info.end_node);
    }

    /// Functions never reached from main lose their references
    fn mark_unused_functions(&mut self) {
        let unreached: Vec<(NodeId, String)> = self
            .functions
            .values()
            .filter(|info| !self.processed_functions.contains(&info.start))
            .filter(|info| !info.name.starts_with("unused_"))
            .map(|info| (info.start_node, info.name.clone()))
            .collect();

        for (node, name) in unreached {
            info!("function {} is never called", name);
            self.node_mut(node).xrefs = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::graph;
    use crate::opcode::op::*;

    #[test]
    fn test_find_functions_idempotent() {
        let mut g = graph(&[
            PUSHBP, SPTOBP, PUSHI, 0, ADDSP, CALL, 11, BPTOSP, POPBP, RET, // 0..9
            START, PUSHBP, SPTOBP, PUSHI, 2, ADDSP, BPTOSP, POPBP, RET, // 10..18
            PUSHBP, SPTOBP, PUSHI, 0, ADDSP, BPTOSP, POPBP, RET, // 19..
        ]);
        g.collect_xrefs();
        assert_eq!(g.find_functions(), 3);
        assert_eq!(g.find_functions(), 0);

        let names: Vec<&str> = g.functions().values().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["main", "func_000b", "unused_0013"]);

        let sub = &g.functions()[&10];
        assert_eq!(sub.entry, 11);
        assert_eq!(sub.end, 16);
        assert_eq!(sub.locals_types.len(), 3);
        assert_eq!(g.node(sub.start_node).xrefs, 1);
    }

    #[test]
    fn test_entry_without_exit_stops_detection() {
        let mut g = graph(&[
            PUSHBP, SPTOBP, PUSHI, 0, ADDSP, BPTOSP, POPBP, RET, // 0..7
            PUSHBP, SPTOBP, PUSHI, 0, ADDSP, NOP, RET, // 8.. no epilogue
        ]);
        g.collect_xrefs();
        assert_eq!(g.find_functions(), 1);

        let starts: Vec<u16> = g.functions().keys().copied().collect();
        assert_eq!(starts, vec![0]);
        assert!(!g.iter().any(|(_, node)| matches!(node.kind, NodeKind::FuncStart) && node.pos == 8));
    }

    #[test]
    fn test_call_targets_renamed() {
        let mut g = graph(&[
            PUSHBP, SPTOBP, PUSHI, 0, ADDSP, CALL, 12, CALL, 0xffff, BPTOSP, POPBP, RET, // 0..11
            PUSHBP, SPTOBP, PUSHI, 0, ADDSP, BPTOSP, POPBP, RET,
        ]);
        g.collect_xrefs();
        g.find_functions();
        g.update_call_jump_targets();

        let call = g.find_pos(5).unwrap();
        assert_eq!(g.node(call).format_opcode(), "0005 CALL func_000c");
        let invalid = g.find_pos(7).unwrap();
        assert_eq!(g.opcode_data(invalid).unwrap().jump_target, "invalid_ffff");
    }

    #[test]
    fn test_worklist_follows_calls() {
        let mut g = graph(&[
            PUSHBP, SPTOBP, PUSHI, 0, ADDSP, CALL, 10, BPTOSP, POPBP, RET, // 0..9
            PUSHBP, SPTOBP, PUSHI, 0, ADDSP, BPTOSP, POPBP, RET, // 10..17
            PUSHBP, SPTOBP, PUSHI, 0, ADDSP, BPTOSP, POPBP, RET, // 18.. never called
        ]);
        g.decompile();

        let callee = &g.functions()[&10];
        assert!(callee.callers.contains("main"));
        assert!(g.processed_functions.contains(&10));
        assert!(!g.processed_functions.contains(&18));
        assert!(g.functions()[&18].name.starts_with("unused_"));
    }

    #[test]
    fn test_unreached_function_loses_xrefs() {
        // main never calls func_0008, which is only called by itself
        let mut g = graph(&[
            PUSHBP, SPTOBP, PUSHI, 0, ADDSP, BPTOSP, POPBP, RET, // 0..7
            PUSHBP, SPTOBP, PUSHI, 0, ADDSP, CALL, 8, BPTOSP, POPBP, RET,
        ]);
        g.decompile();

        let func = &g.functions()[&8];
        assert_eq!(func.name, "func_0008");
        assert_eq!(g.node(func.start_node).xrefs, 0);
        assert!(!g.node(func.start_node).processed);
    }
}
