// cfg.rs - Control structure recognition
//
// Runs after expression reduction. Each recognizer looks for an open
// condition expression followed by an open BEQ and matches the branch shape
// the compiler emits for one control structure. Whatever no recognizer
// claims is turned into goto, continue or return statements at the end.

use crate::functions::FuncInfo;
use crate::graph::{CodeGraph, NodeId, NodeKind};
use crate::opcode::Opcode;
use tracing::{debug, warn};

/// Negate a condition, stripping a leading `!` when present
fn negate(condition: &str) -> String {
    match condition.strip_prefix('!') {
        Some(rest) => rest.to_string(),
        None => format!("!({})", condition),
    }
}

impl CodeGraph {
    fn expression_text(&self, id: NodeId) -> String {
        self.node(id).expression().map(|e| e.text.clone()).unwrap_or_default()
    }

    fn pos(&self, id: NodeId) -> u16 {
        self.node(id).pos
    }

    /// Open expressions of a function body, in order. Recognizers only
    /// insert statements, so the list stays valid while they run.
    fn open_expressions(&self, info: &FuncInfo) -> Vec<NodeId> {
        let mut expressions = Vec::new();
        let mut cursor = self.body_next(info.start_node, info.end_node);
        while let Some(id) = cursor {
            if self.is_open_expression(id) {
                expressions.push(id);
            }
            cursor = self.body_next(id, info.end_node);
        }
        expressions
    }

    /// The BEQ testing a condition expression: the next open node
    fn condition_branch(&self, info: &FuncInfo, expression: NodeId) -> Option<NodeId> {
        self.next_open_node(expression, info.end_node)
            .filter(|&id| self.is_open_opcode(id, Opcode::BEQ))
    }

    // ===================================================================
    // switch
    // ===================================================================

    /// ```text
    ///   {var == 1}
    ///   BEQ case2 -----+      switch (var) {
    ///   {code}         |      case 1:
    ///   JMP end ----+  |         break;
    /// case2: <------|--+
    ///   {var == 2}  |         case 2:
    ///   BEQ end ----+
    ///   {code}      |
    ///   JMP end ----+            break;
    /// end:                    } // end-switch
    /// ```
    pub(crate) fn find_switch_case(&mut self, info: &FuncInfo) {
        for start in self.open_expressions(info) {
            if !self.is_open_expression(start) {
                continue;
            }

            let mut switch_end = None;
            let mut variable = None;
            let mut expression = start;

            while let Some(next) = self.add_next_switch_case(info, expression, &mut switch_end, &mut variable) {
                expression = next;
                let more_cases = self.is_open_expression(expression)
                    && switch_end.is_some_and(|end| self.pos(expression) < end);
                if !more_cases {
                    break;
                }
            }

            if variable.is_some() {
                let anchor = self.prev(expression).unwrap_or(expression);
                self.insert_statement(anchor, "} // end-switch", 0, 0);
            }
        }
    }

    /// Add one case; returns the node where the next case would start.
    /// Every case compares the same variable.
    fn add_next_switch_case(
        &mut self,
        info: &FuncInfo,
        expression: NodeId,
        switch_end: &mut Option<u16>,
        variable: &mut Option<String>,
    ) -> Option<NodeId> {
        let beq = self.condition_branch(info, expression)?;
        let beq_target = self.jump_target_pos(beq);
        let next_case = self.find_pos(beq_target)?;

        let mut break_jump = self.prev(next_case)?;
        if !self.is_open_opcode(break_jump, Opcode::JMP) {
            return None;
        }

        // two jumps with the same target are one break
        let duplicate = self
            .prev(break_jump)
            .filter(|&id| self.is_open_opcode(id, Opcode::JMP))
            .filter(|&id| self.jump_target_pos(id) == self.jump_target_pos(break_jump));

        let text = self.expression_text(expression);
        let split = text.find(" == ")?;
        let case_variable = &text[..split];

        match variable.as_deref() {
            Some(switch_variable) if switch_variable != case_variable => return None,
            Some(_) => {}
            None => {
                // a single case is an if
                let next_text = self.expression_text(next_case);
                let same_variable = next_text
                    .find(" == ")
                    .is_some_and(|next_split| &next_text[..next_split] == case_variable);
                if !self.is_open_expression(next_case) || !same_variable {
                    return None;
                }
            }
        }

        if let Some(duplicate) = duplicate {
            self.mark_processed(break_jump);
            break_jump = duplicate;
        }

        if switch_end.is_none() {
            *switch_end = Some(self.jump_target_pos(break_jump));
        }

        if variable.is_none() {
            debug!("switch on {} at {:04x}", case_variable, self.pos(expression));
            self.insert_statement(expression, format!("switch ({}) {{", case_variable), 0, 0);
            *variable = Some(case_variable.to_string());
        }

        self.insert_statement(expression, format!("case {}:", &text[split + 4..]), 0, 1);
        self.mark_processed(expression);
        self.mark_processed(beq);

        self.insert_statement(break_jump, "break;", 0, -1);
        self.mark_processed(break_jump);

        self.find_pos(beq_target)
    }

    // ===================================================================
    // loops
    // ===================================================================

    /// ```text
    /// start: <-----+
    ///   {expr}     |        while (expr) {
    ///   BEQ end ---|--+
    ///   {code}     |  |
    ///   BRA start -+  |     } // end-while
    /// end: <----------+
    /// ```
    pub(crate) fn find_while(&mut self, info: &FuncInfo) {
        for expression in self.open_expressions(info) {
            let Some(beq) = self.condition_branch(info, expression) else {
                continue;
            };
            let target_pos = self.jump_target_pos(beq);
            if target_pos <= self.pos(beq) {
                continue;
            }

            let Some(bra) = self.find_pos(target_pos).and_then(|target| self.prev(target)) else {
                continue;
            };
            if !self.is_open_opcode(bra, Opcode::BRA) {
                continue;
            }

            let bra_target = self.jump_target_pos(bra);
            if bra_target > target_pos {
                // jumps down, so an if/else
                continue;
            }
            if bra_target != self.pos(expression) {
                debug!(
                    "possible for loop at {:04x}, back jump to {:04x}",
                    self.pos(expression),
                    bra_target
                );
                continue;
            }

            let range = (self.pos(expression), self.pos(bra));
            self.continue_ranges.insert(range);

            let text = format!("while ({}) {{", self.expression_text(expression));
            self.insert_statement(expression, text, 0, 1);
            self.mark_processed(expression);
            self.mark_processed(beq);

            self.insert_statement(bra, "} // end-while", -1, 0);
            self.mark_processed(bra);
        }
    }

    /// ```text
    /// start: <-----+        do {
    ///   {code}     |
    ///   {expr}     |
    ///   BEQ end ---|--+     } while (expr);
    ///   JMP start -+  |
    /// end: <----------+
    /// ```
    pub(crate) fn find_do_while(&mut self, info: &FuncInfo) {
        for expression in self.open_expressions(info) {
            let Some(beq) = self.condition_branch(info, expression) else {
                continue;
            };
            if self.jump_target_pos(beq) <= self.pos(beq) {
                continue;
            }

            let Some(jump) = self.next(beq).filter(|&id| self.is_open_opcode(id, Opcode::JMP)) else {
                continue;
            };
            let loop_start = self.jump_target_pos(jump);
            if loop_start > self.pos(beq) {
                continue;
            }
            let jump_pos = self.pos(jump);
            if self.is_continue(loop_start, jump_pos) {
                // the same shape as `if (expr) continue;`
                continue;
            }
            let Some(do_anchor) = self.find_pos(loop_start) else {
                continue;
            };

            self.continue_ranges.insert((loop_start, jump_pos));

            self.insert_statement(do_anchor, "do {", 0, 1);

            let text = format!("}} while ({});", self.expression_text(expression));
            self.insert_statement(expression, text, -1, 0);
            self.mark_processed(expression);
            self.mark_processed(beq);
            self.mark_processed(jump);

            if let Some(second) = self.next(jump).filter(|&id| self.is_open_opcode(id, Opcode::JMP)) {
                self.mark_processed(second);
            }
        }
    }

    // ===================================================================
    // if/else
    // ===================================================================

    /// Plain if:
    ///
    /// ```text
    ///   {expr}
    ///   BEQ endif ---+      if (expr) {
    ///   {code}       |
    /// endif: <-------+      } // end-if
    /// ```
    ///
    /// With else, possibly with extra JMPs to the end before the else and
    /// before the end:
    ///
    /// ```text
    ///   {expr}
    ///   BEQ else ------+    if (expr) {
    ///   {code}         |
    ///   BRA endif --+  |    } else {
    /// else: <-------|--+
    ///   {code}      |
    /// endif: <------+       } // end-if
    /// ```
    ///
    /// The if-not shape, where the compiler sometimes adds a BRA after the
    /// JMP and a JMP to the following position at the BEQ target:
    ///
    /// ```text
    ///   {expr}
    ///   BEQ then -----+     if (!(expr)) {
    ///   JMP endif --+ |
    /// then: <-------|-+
    ///   {code}      |
    /// endif: <------+       } // end-if
    /// ```
    pub(crate) fn find_if_else(&mut self, info: &FuncInfo) {
        for expression in self.open_expressions(info) {
            let Some(beq) = self.condition_branch(info, expression) else {
                continue;
            };
            let beq_pos = self.pos(beq);
            let beq_target = self.jump_target_pos(beq);
            if beq_target <= beq_pos {
                debug!("conditional branch at {:04x} jumps backwards", beq_pos);
                continue;
            }
            let Some(target) = self.find_pos(beq_target) else {
                warn!("branch target {:04x} not found", beq_target);
                continue;
            };

            let before_target = self.prev(target).filter(|&id| self.is_open_opcode(id, Opcode::BRA));
            let after_beq = self
                .next(beq)
                .filter(|&id| self.is_open_opcode(id, Opcode::JMP))
                .filter(|_| beq_target == beq_pos + 4 || beq_target == beq_pos + 6)
                .filter(|&id| self.jump_target_pos(id) > beq_target);

            let (else_start, endif, negated) = if let (Some(bra), None) = (before_target, after_beq) {
                let bra_target = self.jump_target_pos(bra);
                if bra_target < beq_target {
                    warn!("else branch at {:04x} jumps backwards", self.pos(bra));
                    continue;
                }
                let Some(endif) = self.find_pos(bra_target) else {
                    continue;
                };

                self.mark_processed(bra);

                if let Some(jump) = self.prev(bra) {
                    if self.is_open_opcode(jump, Opcode::JMP) && self.jump_target_pos(jump) == bra_target {
                        self.mark_processed(jump);
                    }
                }
                if let Some(jump) = self.prev_opcode(endif) {
                    if self.is_open_opcode(jump, Opcode::JMP) && self.jump_target_pos(jump) == bra_target {
                        self.mark_processed(jump);
                    }
                }

                (self.next(bra), endif, false)
            } else if let Some(jump) = after_beq {
                let Some(endif) = self.find_pos(self.jump_target_pos(jump)) else {
                    continue;
                };

                self.mark_processed(jump);

                // spurious branch pair
                if let Some(bra) = self.next(jump).filter(|&id| self.is_open_opcode(id, Opcode::BRA)) {
                    self.mark_processed(bra);
                }
                if self.is_open_opcode(target, Opcode::JMP)
                    && self.jump_target_pos(target) == self.pos(target).wrapping_add(2)
                {
                    self.mark_processed(target);
                }

                let (else_start, endif) = self.if_not_else(endif);
                (else_start, endif, true)
            } else {
                (None, target, false)
            };

            self.mark_processed(beq);

            let mut condition = self.expression_text(expression);
            if negated {
                condition = negate(&condition);
            }
            self.insert_statement(expression, format!("if ({}) {{", condition), 0, 1);
            self.mark_processed(expression);

            if let Some(else_start) = else_start.filter(|&id| id != endif) {
                self.insert_statement(else_start, "} else {", -1, 1);
            }
            self.insert_statement(endif, "} // end-if", -1, 0);
        }
    }

    /// An if-not body ending in a forward jump past its end has an else
    /// branch up to the jump target
    fn if_not_else(&mut self, endif: NodeId) -> (Option<NodeId>, NodeId) {
        let Some(jump) = self.prev_opcode(endif) else {
            return (None, endif);
        };
        let is_jump = self.is_open_opcode(jump, Opcode::JMP) || self.is_open_opcode(jump, Opcode::BRA);
        let target_pos = self.jump_target_pos(jump);
        if !is_jump || target_pos <= self.pos(endif) {
            return (None, endif);
        }

        match self.find_pos(target_pos) {
            Some(new_endif) => {
                self.mark_processed(jump);
                (Some(endif), new_endif)
            }
            None => (None, endif),
        }
    }

    // ===================================================================
    // leftover jumps
    // ===================================================================

    /// Turn remaining jumps into return, continue or goto statements
    pub(crate) fn add_goto_jumps(&mut self, info: &FuncInfo) {
        let mut cursor = self.body_next(info.start_node, info.end_node);
        while let Some(id) = cursor {
            cursor = self.body_next(id, info.end_node);

            let node = self.node(id);
            if node.processed {
                continue;
            }
            let Some(opcode) = node.opcode().and_then(|data| data.opcode) else {
                continue;
            };

            match opcode {
                Opcode::JMP | Opcode::BRA => {
                    let jump = self.jump_statement(info, id);
                    self.insert_statement(id, jump, 0, 0);
                    self.mark_processed(id);
                }
                Opcode::BEQ | Opcode::BNE => {
                    let condition = std::iter::successors(self.prev(id), |&prev| self.prev(prev))
                        .find(|&prev| !self.node(prev).processed)
                        .filter(|&prev| self.is_open_expression(prev));

                    let Some(condition) = condition else {
                        warn!(
                            "{} at {:04x} has no condition",
                            opcode.mnemonic(),
                            self.pos(id)
                        );
                        continue;
                    };

                    let text = self.expression_text(condition);
                    // BEQ branches when the condition is false
                    let text = if opcode == Opcode::BEQ { negate(&text) } else { text };
                    let jump = self.jump_statement(info, id);
                    self.insert_statement(condition, format!("if ({}) {}", text, jump), 0, 0);
                    self.mark_processed(condition);
                    self.mark_processed(id);
                }
                _ => debug!("unhandled opcode {} at {:04x}", opcode.mnemonic(), self.pos(id)),
            }
        }
    }

    /// Does a jump to `target_pos` continue an enclosing loop?
    fn is_continue(&self, target_pos: u16, jump_pos: u16) -> bool {
        self.continue_ranges
            .iter()
            .any(|&(condition, back_jump)| condition == target_pos && jump_pos < back_jump)
    }

    fn jump_statement(&mut self, info: &FuncInfo, jump: NodeId) -> String {
        let target_pos = self.jump_target_pos(jump);
        if target_pos == info.end {
            return "return;".to_string();
        }

        if self.is_continue(target_pos, self.pos(jump)) {
            return "continue;".to_string();
        }

        let label = match self.opcode_data(jump).map(|data| data.jump_target.clone()) {
            Some(label) if !label.is_empty() => label,
            _ => format!("label_{:04x}", target_pos),
        };

        match self.find_pos(target_pos) {
            Some(target) => {
                let label_statement = format!("{}:;", label);
                let has_label = matches!(
                    &self.node(target).kind,
                    NodeKind::Statement(statement) if statement.text == label_statement
                );
                if !has_label {
                    self.insert_statement(target, label_statement, -1, 1);
                }
            }
            None => warn!("goto target {:04x} not found", target_pos),
        }

        format!("goto {};", label)
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::tests::graph;
    use crate::graph::CodeGraph;
    use crate::opcode::op::*;
    use pretty_assertions::assert_eq;

    const PROLOGUE: [u16; 5] = [PUSHBP, SPTOBP, PUSHI, 1, ADDSP];
    // local_1 == 0 at 5..10, followed by the branch at 11
    const CONDITION: [u16; 6] = [PUSHI_EFF, 1, FETCHM, PUSHI, 0, TSTEQ];
    const EPILOGUE: [u16; 3] = [BPTOSP, POPBP, RET];

    fn function(body: &[u16]) -> Vec<u16> {
        let mut code = PROLOGUE.to_vec();
        code.extend_from_slice(body);
        code.extend_from_slice(&EPILOGUE);
        code
    }

    fn conditional(rest: &[u16]) -> Vec<u16> {
        let mut body = CONDITION.to_vec();
        body.extend_from_slice(rest);
        function(&body)
    }

    fn decompile(code: &[u16]) -> CodeGraph {
        let mut g = graph(code);
        g.decompile();
        g
    }

    /// Open statements of the graph, one per line
    fn code_text(g: &CodeGraph) -> Vec<String> {
        g.iter()
            .filter(|(_, node)| !node.processed)
            .filter_map(|(_, node)| node.statement_data())
            .map(|statement| statement.text.clone())
            .collect()
    }

    fn listing(declarations: &[&str], body: &[&str]) -> Vec<String> {
        let mut lines = vec!["void main() // referenced 1 times".to_string(), "{".to_string()];
        lines.extend(declarations.iter().map(|line| line.to_string()));
        lines.extend(body.iter().map(|line| line.to_string()));
        lines.push("} // end-function".to_string());
        lines.push(String::new());
        lines
    }

    fn expected(body: &[&str]) -> Vec<String> {
        listing(&["int local_1;"], body)
    }

    fn indent_balance(g: &CodeGraph) -> i32 {
        g.iter()
            .filter(|(_, node)| !node.processed)
            .filter_map(|(_, node)| node.statement_data())
            .map(|statement| statement.indent_before + statement.indent_after)
            .sum()
    }

    #[test]
    fn test_empty_function() {
        let g = decompile(&[PUSHBP, SPTOBP, PUSHI, 0, ADDSP, BPTOSP, POPBP, RET]);
        assert_eq!(
            code_text(&g),
            vec!["void main() // referenced 1 times", "{", "} // end-function", ""]
        );
        assert!(g.iter().all(|(_, node)| node.opcode().is_none() || node.processed));
    }

    #[test]
    fn test_if_without_else() {
        let g = decompile(&conditional(&[BEQ, 3, CALL, 0]));
        assert_eq!(
            code_text(&g),
            expected(&["if (local_1 == 0) {", "main();", "} // end-if"])
        );
    }

    #[test]
    fn test_if_with_else() {
        let g = decompile(&conditional(&[BEQ, 5, CALL, 0, BRA, 3, CALL, 0]));
        assert_eq!(
            code_text(&g),
            expected(&["if (local_1 == 0) {", "main();", "} else {", "main();", "} // end-if"])
        );
    }

    #[test]
    fn test_if_with_jmp_bra_at_then_end() {
        let g = decompile(&conditional(&[BEQ, 7, CALL, 0, JMP, 0x15, BRA, 3, CALL, 0]));
        assert_eq!(
            code_text(&g),
            expected(&["if (local_1 == 0) {", "main();", "} else {", "main();", "} // end-if"])
        );
    }

    #[test]
    fn test_if_with_jmp_at_else_end() {
        let g = decompile(&conditional(&[BEQ, 7, CALL, 0, JMP, 0x17, BRA, 5, CALL, 0, JMP, 0x17]));
        assert_eq!(
            code_text(&g),
            expected(&["if (local_1 == 0) {", "main();", "} else {", "main();", "} // end-if"])
        );
    }

    #[test]
    fn test_if_not() {
        let g = decompile(&conditional(&[BEQ, 3, JMP, 0x11, CALL, 0]));
        assert_eq!(
            code_text(&g),
            expected(&["if (!(local_1 == 0)) {", "main();", "} // end-if"])
        );
    }

    #[test]
    fn test_if_not_without_code() {
        let g = decompile(&conditional(&[BEQ, 3, JMP, 0x0f, PUSHI, 42, PUSHI_EFF, 1, SWAP, STO]));
        assert_eq!(
            code_text(&g),
            expected(&["if (!(local_1 == 0)) {", "} // end-if", "local_1 = 42;"])
        );
    }

    #[test]
    fn test_if_not_with_spurious_branches() {
        let bra_after_jmp = decompile(&conditional(&[BEQ, 5, JMP, 0x13, BRA, 3, CALL, 0]));
        let jmp_in_else = decompile(&conditional(&[BEQ, 5, JMP, 0x15, BRA, 3, JMP, 0x13, CALL, 0]));

        let if_not = expected(&["if (!(local_1 == 0)) {", "main();", "} // end-if"]);
        assert_eq!(code_text(&bra_after_jmp), if_not);
        assert_eq!(code_text(&jmp_in_else), if_not);
    }

    #[test]
    fn test_if_not_with_else() {
        let g = decompile(&conditional(&[BEQ, 5, JMP, 0x15, BRA, 5, CALL, 0, JMP, 0x17, CALL, 0xffff]));
        assert_eq!(
            code_text(&g),
            expected(&[
                "if (!(local_1 == 0)) {",
                "main();",
                "} else {",
                "func_ffff();",
                "} // end-if",
            ])
        );
    }

    #[test]
    fn test_while() {
        // while (local_1 != 0) main();
        let g = decompile(&function(&[
            PUSHI_EFF, 1, FETCHM, PUSHI, 0, TSTNE, // 5..10
            BEQ, 5, CALL, 0, BRA, 0xfff5, // 11..16
        ]));
        assert_eq!(
            code_text(&g),
            expected(&["while (local_1 != 0) {", "main();", "} // end-while"])
        );
    }

    #[test]
    fn test_do_while() {
        let g = decompile(&function(&[
            CALL, 0, // 5
            PUSHI_EFF, 1, FETCHM, PUSHI, 0, TSTEQ, // 7..12
            BEQ, 3, JMP, 5, // 13..16
        ]));
        assert_eq!(
            code_text(&g),
            expected(&["do {", "main();", "} while (local_1 == 0);"])
        );
    }

    #[test]
    fn test_switch() {
        let g = decompile(&function(&[
            PUSHI_EFF, 1, FETCHM, PUSHI, 1, TSTEQ, BEQ, 5, CALL, 0, JMP, 29, // 5..16
            PUSHI_EFF, 1, FETCHM, PUSHI, 2, TSTEQ, BEQ, 5, CALL, 0, JMP, 29, // 17..28
        ]));
        assert_eq!(
            code_text(&g),
            expected(&[
                "switch (local_1) {",
                "case 1:",
                "main();",
                "break;",
                "case 2:",
                "main();",
                "break;",
                "} // end-switch",
            ])
        );
        assert_eq!(indent_balance(&g), 0);
    }

    #[test]
    fn test_switch_needs_common_variable() {
        let mixed = decompile(&function(&[
            PUSHI_EFF, 1, FETCHM, PUSHI, 1, TSTEQ, BEQ, 5, CALL, 0, JMP, 29, // 5..16
            PUSHI_EFF, 2, FETCHM, PUSHI, 2, TSTEQ, BEQ, 5, CALL, 0, JMP, 29, // 17..28
        ]));
        let text = code_text(&mixed);
        assert!(!text.iter().any(|line| line.starts_with("switch")), "{:#?}", text);
        assert!(!text.iter().any(|line| line.starts_with("case")), "{:#?}", text);

        // the chain ends before the first case on another variable
        let g = decompile(&function(&[
            PUSHI_EFF, 1, FETCHM, PUSHI, 1, TSTEQ, BEQ, 5, CALL, 0, JMP, 41, // 5..16
            PUSHI_EFF, 1, FETCHM, PUSHI, 2, TSTEQ, BEQ, 5, CALL, 0, JMP, 41, // 17..28
            PUSHI_EFF, 2, FETCHM, PUSHI, 3, TSTEQ, BEQ, 5, CALL, 0, JMP, 41, // 29..40
        ]));
        let text = code_text(&g);
        let line = |wanted: &str| text.iter().position(|line| line == wanted);
        assert!(line("switch (local_1) {").is_some(), "{:#?}", text);
        assert!(line("case 2:").is_some());
        assert_eq!(line("case 3:"), None);
        let end_switch = line("} // end-switch").unwrap_or(usize::MAX);
        let other_variable = text
            .iter()
            .position(|line| line.contains("local_2 == 3"))
            .unwrap_or(0);
        assert!(end_switch < other_variable, "{:#?}", text);
    }

    #[test]
    fn test_goto_and_return() {
        let goto = decompile(&function(&[JMP, 9, CALL, 0, CALL, 0]));
        assert_eq!(
            code_text(&goto),
            listing(&[], &["goto label_0009;", "main();", "label_0009:;", "main();"])
        );

        let early_return = decompile(&function(&[JMP, 9, CALL, 0]));
        assert_eq!(code_text(&early_return), listing(&[], &["return;", "main();"]));
    }

    #[test]
    fn test_continue_in_while() {
        // while (local_1 != 0) { if (local_1 == 0) continue; main(); }
        let g = decompile(&function(&[
            PUSHI_EFF, 1, FETCHM, PUSHI, 0, TSTNE, BEQ, 15, // 5..12
            PUSHI_EFF, 1, FETCHM, PUSHI, 0, TSTEQ, BEQ, 3, JMP, 5, // 13..22
            CALL, 0, BRA, 0xffeb, // 23..26
        ]));
        assert_eq!(
            code_text(&g),
            expected(&[
                "while (local_1 != 0) {",
                "if (local_1 == 0) {",
                "continue;",
                "} // end-if",
                "main();",
                "} // end-while",
            ])
        );
        assert_eq!(indent_balance(&g), 0);
    }

    #[test]
    fn test_leftover_conditional_goto() {
        // BNE backwards to the condition is no structure
        let g = decompile(&function(&[CALL, 0, PUSHI_EFF, 1, FETCHM, BNE, 0xfffa]));
        assert_eq!(
            code_text(&g),
            expected(&["label_0005:;", "main();", "if (local_1) goto label_0005;"])
        );
    }
}
