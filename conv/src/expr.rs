// expr.rs - Expression and statement reduction
//
// Two passes per function. The analysis pass turns opcodes into operator and
// expression nodes; the combine pass repeatedly folds the earliest open
// operator with the expressions it consumes, until no operator is left.

use crate::functions::FuncInfo;
use crate::graph::{CodeGraph, ExpressionData, GraphNode, NodeId, NodeKind, OperatorData};
use crate::opcode::{function_name, intrinsic_param_types, DataType, Opcode};
use tracing::{debug, warn};

const LOCAL_ARRAY: [Opcode; 3] = [Opcode::PUSHI, Opcode::PUSHI_EFF, Opcode::OFFSET];
const RETURN_VALUE: [Opcode; 2] = [Opcode::SAVE_REG, Opcode::POP];

impl CodeGraph {
    /// Replace the opcodes of a function body with operators and expressions
    pub(crate) fn analyze_function(&mut self, info: &mut FuncInfo) {
        let end = info.end_node;
        let mut cursor = self.body_next(info.start_node, end);

        while let Some(id) = cursor {
            cursor = self.body_next(id, end);

            let node = self.node(id);
            if node.processed {
                continue;
            }
            let Some(data) = node.opcode() else {
                continue;
            };
            let Some(opcode) = data.opcode else {
                warn!("unknown opcode {:#06x} at {:04x} left as is", data.word, node.pos);
                continue;
            };
            let arg = data.arg;

            if self.match_opcode_pattern(id, &LOCAL_ARRAY) {
                self.add_local_array_expression(id, info);
                self.set_opcodes_processed(id, LOCAL_ARRAY.len());
                continue;
            }

            if opcode == Opcode::SAVE_REG {
                let consumed = if self.match_opcode_pattern(id, &RETURN_VALUE) { 2 } else { 1 };
                self.add_operator(id, Opcode::SAVE_REG, 1, false, DataType::Void);
                self.set_opcodes_processed(id, consumed);
                info.return_type = DataType::Int;
                continue;
            }

            match opcode {
                Opcode::SAY_OP => {
                    self.add_operator(id, opcode, 1, false, DataType::Void);
                }
                Opcode::EXIT_OP => {
                    self.insert_statement(id, "exit;", 0, 0);
                    self.mark_processed(id);
                }
                Opcode::CALLI => self.add_call_operator(id, info, true),
                Opcode::CALL => self.add_call_operator(id, info, false),
                _ if opcode.is_binary_operator() => {
                    self.add_operator(id, opcode, 2, true, DataType::Int);
                }
                Opcode::OPNEG | Opcode::OPNOT => {
                    self.add_operator(id, opcode, 1, true, DataType::Int);
                }
                Opcode::STO => self.add_assignment_operator(id),
                Opcode::PUSHI_EFF => self.add_local_address_expression(id, info),
                Opcode::PUSHI => {
                    // argument count of an intrinsic call
                    if self.next(id).is_some_and(|next| self.node(next).is(Opcode::CALLI)) {
                        continue;
                    }
                    self.add_immediate_expression(id, arg);
                }
                Opcode::FETCHM => {
                    self.add_operator(id, opcode, 1, true, DataType::Int);
                }
                Opcode::OFFSET => {
                    self.add_operator(id, opcode, 2, true, DataType::Int);
                }
                Opcode::NOP | Opcode::START | Opcode::RESPOND_OP => self.mark_processed(id),
                _ => {}
            }
        }
    }

    fn add_operator(
        &mut self,
        id: NodeId,
        opcode: Opcode,
        needed_expressions: usize,
        returns_expression: bool,
        returned_type: DataType,
    ) -> NodeId {
        self.mark_processed(id);
        let pos = self.node(id).pos;
        let arg = self.opcode_data(id).map(|data| data.arg).unwrap_or(0);

        let operator = OperatorData {
            opcode,
            arg,
            needed_expressions,
            returns_expression,
            returned_type,
            arg_types: Vec::new(),
            swap_expressions: false,
            precedence: opcode.info().precedence,
        };
        self.insert_before(id, GraphNode::new(NodeKind::Operator(operator), pos))
    }

    fn add_local_array_expression(&mut self, id: NodeId, info: &mut FuncInfo) {
        let index = self.opcode_data(id).map(|data| data.arg).unwrap_or(0);
        let local = self
            .next(id)
            .and_then(|next| self.opcode_data(next))
            .map(|data| data.arg)
            .unwrap_or(0);

        if index > 0x7fff {
            warn!("negative array index {} at {:04x}", index as i16, self.node(id).pos);
        }

        self.insert_expression(id, ExpressionData::address(format!("local_{}[{}]", local, index)));
        info.add_array_access(local, index);
    }

    fn add_call_operator(&mut self, id: NodeId, info: &FuncInfo, intrinsic: bool) {
        self.mark_processed(id);
        let pos = self.node(id).pos;
        let (target, target_name) = match self.opcode_data(id) {
            Some(data) => (data.arg, data.jump_target.clone()),
            None => return,
        };

        let mut anchor = id;
        if intrinsic {
            match self.prev(id) {
                Some(prev) if self.node(prev).is(Opcode::PUSHI) => {
                    self.mark_processed(prev);
                    anchor = prev;
                }
                _ => warn!("intrinsic call at {:04x} has no argument count", pos),
            }
        }

        // the immediate argument count can be wrong, count the POPs instead
        let mut arguments = 0usize;
        let mut cursor = self.body_next(id, info.end_node);
        while let Some(pop) = cursor.filter(|&c| self.node(c).is(Opcode::POP)) {
            self.mark_processed(pop);
            arguments += 1;
            cursor = self.body_next(pop, info.end_node);
        }

        let returns_value = match cursor.filter(|&c| self.node(c).is(Opcode::PUSH_REG)) {
            Some(push_reg) => {
                self.mark_processed(push_reg);
                true
            }
            None => false,
        };

        let mut arg_types = Vec::new();
        if intrinsic {
            // one POP removes the argument count
            arguments = arguments.saturating_sub(1);

            if let Some(types) = intrinsic_param_types(&target_name) {
                if types.len() == arguments {
                    arg_types = types.to_vec();
                } else {
                    warn!(
                        "{} called with {} arguments at {:04x}, expected {}",
                        target_name,
                        arguments,
                        pos,
                        types.len()
                    );
                }
            }
        }

        let opcode = if intrinsic { Opcode::CALLI } else { Opcode::CALL };
        let operator = OperatorData {
            opcode,
            arg: target,
            needed_expressions: arguments,
            returns_expression: returns_value,
            returned_type: if returns_value { DataType::Int } else { DataType::Void },
            arg_types,
            swap_expressions: false,
            precedence: Opcode::CALL.info().precedence,
        };
        let anchor_pos = self.node(anchor).pos;
        self.insert_before(anchor, GraphNode::new(NodeKind::Operator(operator), anchor_pos));

        if intrinsic {
            return;
        }
        if target == info.start || target == info.entry {
            debug!("recursive call to {} at {:04x}", info.name, pos);
            return;
        }
        if target == 0xffff {
            return;
        }

        let Some(key) = self.function_key(target) else {
            warn!("call at {:04x} to unknown function {:04x}", pos, target);
            return;
        };
        if let Some(callee) = self.functions.get_mut(&key) {
            callee.callers.insert(info.name.clone());
        }
        if !self.processed_functions.contains(&key) {
            self.function_queue.push_back(key);
        }
    }

    fn add_assignment_operator(&mut self, id: NodeId) {
        let swap = self.prev(id).filter(|&prev| self.node(prev).is(Opcode::SWAP));
        if let Some(swap) = swap {
            self.mark_processed(swap);
        }

        let operator = self.add_operator(id, Opcode::STO, 2, false, DataType::Void);
        if let NodeKind::Operator(data) = &mut self.node_mut(operator).kind {
            data.swap_expressions = swap.is_some();
        }
    }

    fn add_local_address_expression(&mut self, id: NodeId, info: &mut FuncInfo) {
        self.mark_processed(id);
        let arg = self.opcode_data(id).map(|data| data.arg).unwrap_or(0);

        let fetchm = self.next(id).filter(|&next| self.node(next).is(Opcode::FETCHM));
        if let Some(fetchm) = fetchm {
            self.mark_processed(fetchm);
        }

        let expression = if arg > 0x7fff {
            // parameters sit below the frame and are passed by reference
            let param = (-(arg as i16 as i32) - 1) as usize;
            if param > info.param_types.len() {
                info.param_types.resize(param, DataType::Int);
            }
            ExpressionData::address(format!("param{}", param))
        } else {
            let slot = arg as usize;
            if slot >= info.locals_types.len() {
                info.locals_types.resize(slot + 1, DataType::Unknown);
            }
            info.locals_types[slot] = DataType::Int;

            let text = format!("local_{}", arg);
            if fetchm.is_some() {
                ExpressionData::value(text)
            } else {
                ExpressionData::address(text)
            }
        };

        self.insert_expression(id, expression);
    }

    fn add_immediate_expression(&mut self, id: NodeId, value: u16) {
        self.mark_processed(id);

        match self.next(id).filter(|&next| self.node(next).is(Opcode::FETCHM)) {
            Some(fetchm) => {
                self.mark_processed(fetchm);
                let name = self.memory_var_name(value);
                self.insert_expression(id, ExpressionData::value(name));
            }
            None => {
                // an immediate, or a global address resolved when combining
                let expression = ExpressionData {
                    is_pushi_imm: true,
                    pushi_imm_value: value,
                    ..ExpressionData::value(value.to_string())
                };
                self.insert_expression(id, expression);
            }
        }
    }

    // ===================================================================
    // Combining
    // ===================================================================

    /// Fold operators with their operands until none is left
    pub(crate) fn combine_operators(&mut self, info: &mut FuncInfo) {
        while let Some(operator_id) = self.next_open_operator(info) {
            let Some(operator) = self.operator_data(operator_id) else {
                break;
            };

            let (expressions, statement_between) =
                self.collect_expressions(info, operator_id, operator.needed_expressions);

            if expressions.len() < operator.needed_expressions {
                warn!(
                    "{} at {:04x} is missing {} operand(s)",
                    operator.opcode.mnemonic(),
                    self.node(operator_id).pos,
                    operator.needed_expressions - expressions.len()
                );
                if operator.returns_expression {
                    self.insert_expression(operator_id, ExpressionData::value("?"));
                } else {
                    let text = format!("// {} with missing operands", operator.opcode.mnemonic());
                    self.insert_statement(operator_id, text, 0, 0);
                }
                self.mark_processed(operator_id);
                continue;
            }

            // new nodes go where the farthest operand was, unless an
            // assignment sits between operator and operands
            let insert_at = match expressions.last() {
                Some(&farthest) if !statement_between => farthest,
                _ => operator_id,
            };

            self.combine_operator(info, operator_id, &operator, insert_at, &expressions);

            self.mark_processed(operator_id);
            for &expression in &expressions {
                self.mark_processed(expression);
            }
        }
    }

    fn next_open_operator(&self, info: &FuncInfo) -> Option<NodeId> {
        let mut cursor = self.body_next(info.start_node, info.end_node);
        while let Some(id) = cursor {
            let node = self.node(id);
            if !node.processed && matches!(node.kind, NodeKind::Operator(_)) {
                return Some(id);
            }
            cursor = self.body_next(id, info.end_node);
        }
        None
    }

    fn operator_data(&self, id: NodeId) -> Option<OperatorData> {
        match &self.node(id).kind {
            NodeKind::Operator(data) => Some(data.clone()),
            _ => None,
        }
    }

    fn expression_data(&self, id: NodeId) -> ExpressionData {
        self.node(id)
            .expression()
            .cloned()
            .unwrap_or_else(|| ExpressionData::value("?"))
    }

    fn set_expression_data(&mut self, id: NodeId, data: ExpressionData) {
        if let NodeKind::Expression(expression) = &mut self.node_mut(id).kind {
            *expression = data;
        }
    }

    /// Collect up to `needed` open expressions before the operator, nearest
    /// first, never scanning past the function start
    fn collect_expressions(&self, info: &FuncInfo, operator_id: NodeId, needed: usize) -> (Vec<NodeId>, bool) {
        let mut expressions = Vec::with_capacity(needed);
        let mut statement_between = false;

        let mut cursor = self.prev(operator_id);
        while let Some(id) = cursor {
            if id == info.start_node || expressions.len() == needed {
                break;
            }
            let node = self.node(id);
            match node.kind {
                NodeKind::Expression(_) if !node.processed => expressions.push(id),
                NodeKind::Statement(_) => statement_between = true,
                _ => {}
            }
            cursor = self.prev(id);
        }

        (expressions, statement_between)
    }

    fn combine_operator(
        &mut self,
        info: &mut FuncInfo,
        operator_id: NodeId,
        operator: &OperatorData,
        insert_at: NodeId,
        expressions: &[NodeId],
    ) {
        match operator.opcode {
            Opcode::CALL | Opcode::CALLI => self.combine_call(info, operator, insert_at, expressions),
            Opcode::SAVE_REG => {
                let value = self.expression_data(expressions[0]);
                self.insert_statement(insert_at, format!("return {};", value.text), 0, 0);
            }
            Opcode::FETCHM => {
                let value = ExpressionData {
                    is_address: false,
                    ..self.expression_data(expressions[0])
                };
                self.insert_expression(insert_at, value);
            }
            Opcode::OFFSET => {
                // the base address is pushed last
                if self.expression_data(expressions[0]).is_pushi_imm {
                    self.pushi_immediate_to_global(expressions[0]);
                }
                let base = self.expression_data(expressions[0]);
                let index = self.expression_data(expressions[1]);
                let text = format!("{}[{}]", base.text, index.text);
                self.insert_expression(insert_at, ExpressionData::address(text));
            }
            Opcode::OPNEG | Opcode::OPNOT => {
                let operand = self.expression_data(expressions[0]);
                let prefix = operator.opcode.info().operator_text;
                let value = if operand.precedence < operator.precedence {
                    ExpressionData {
                        text: format!("{}({})", prefix, operand.text),
                        precedence: operator.precedence,
                        ..operand
                    }
                } else {
                    ExpressionData {
                        text: format!("{}{}", prefix, operand.text),
                        ..operand
                    }
                };
                self.insert_expression(insert_at, value);
            }
            Opcode::SAY_OP => self.combine_say(insert_at, expressions[0]),
            Opcode::STO => self.combine_assignment(info, operator_id, operator, insert_at, expressions),
            opcode if opcode.is_binary_operator() => self.combine_binary(operator, insert_at, expressions),
            opcode => warn!("cannot combine operator {}", opcode.mnemonic()),
        }
    }

    fn combine_binary(&mut self, operator: &OperatorData, insert_at: NodeId, expressions: &[NodeId]) {
        let mut rhs = self.expression_data(expressions[0]);
        let mut lhs = self.expression_data(expressions[1]);

        // keep the variable on the left of an equality test
        if operator.opcode == Opcode::TSTEQ && lhs.is_pushi_imm {
            std::mem::swap(&mut lhs, &mut rhs);
        }

        // the result binds as loosely as its weakest operand left unwrapped
        let level = operator.precedence;
        let mut precedence = level;
        let left = if level > lhs.precedence {
            format!("({})", lhs.text)
        } else {
            precedence = precedence.min(lhs.precedence);
            lhs.text.clone()
        };
        let right = if level >= rhs.precedence {
            format!("({})", rhs.text)
        } else {
            precedence = precedence.min(rhs.precedence);
            rhs.text.clone()
        };

        let text = format!("{} {} {}", left, operator.opcode.info().operator_text, right);
        let expression = ExpressionData {
            precedence,
            ..ExpressionData::value(text)
        };
        self.insert_expression(insert_at, expression);
    }

    fn combine_call(&mut self, info: &mut FuncInfo, operator: &OperatorData, insert_at: NodeId, expressions: &[NodeId]) {
        let name = if operator.opcode == Opcode::CALLI {
            match self.imported_functions.get(&operator.arg) {
                Some(item) => item.name.clone(),
                None => format!("intrinsic_{:04x}", operator.arg),
            }
        } else if operator.arg == info.start || operator.arg == info.entry {
            info.name.clone()
        } else {
            match self.function_key(operator.arg).and_then(|key| self.functions.get(&key)) {
                Some(callee) => callee.name.clone(),
                None => function_name(operator.arg),
            }
        };

        let mut args = Vec::with_capacity(expressions.len());
        for (n, &expression) in expressions.iter().enumerate() {
            let arg_type = operator.arg_types.get(n).copied().unwrap_or(DataType::Int);

            let data = self.expression_data(expression);
            if data.is_address && data.text.starts_with("local_") {
                self.replace_local_with_value(info, expression, arg_type);
            }
            if self.expression_data(expression).is_pushi_imm {
                self.pushi_immediate_to_global(expression);
            }
            args.push(self.expression_data(expression).text);
        }

        let call = format!("{}({})", name, args.join(", "));
        if operator.returns_expression {
            self.insert_expression(insert_at, ExpressionData::value(call));
        } else {
            self.insert_statement(insert_at, format!("{};", call), 0, 0);
        }
    }

    /// An argument `local_N` set by an earlier `local_N = <int>;` is shown
    /// with the value; the assignment is commented out and the local is no
    /// longer declared
    fn replace_local_with_value(&mut self, info: &mut FuncInfo, expression: NodeId, arg_type: DataType) {
        let local = self.expression_data(expression).text;
        let prefix = format!("{} = ", local);

        let mut cursor = self.prev(expression);
        let mut assignment = None;
        while let Some(id) = cursor {
            if id == info.start_node {
                break;
            }
            if let Some(statement) = self.node(id).statement_data() {
                if statement.text.starts_with(&prefix) {
                    assignment = Some(id);
                    break;
                }
            }
            cursor = self.prev(id);
        }
        let Some(assignment) = assignment else {
            return;
        };

        let statement = self.node(assignment).statement_data().map(|s| s.text.clone()).unwrap_or_default();
        let value = statement[prefix.len()..].split(';').next().unwrap_or("").to_string();
        if value.is_empty() || !value.chars().all(|ch| ch.is_ascii_digit() || ch == '-') {
            return;
        }

        let mut text = value.clone();
        if arg_type == DataType::String {
            if let Some(literal) = value.parse::<u16>().ok().and_then(|id| self.string_reference(id)) {
                text = format!("{} /* {} */", literal, value);
            }
        }
        self.set_expression_data(expression, ExpressionData::value(text));

        let slot = local.strip_prefix("local_").and_then(|n| n.parse::<usize>().ok());
        if let Some(ty) = slot.and_then(|slot| info.locals_types.get_mut(slot)) {
            *ty = DataType::Unknown;
        }

        let node = self.node_mut(assignment);
        node.processed = true;
        if let NodeKind::Statement(data) = &mut node.kind {
            data.text = format!("// {}", data.text);
        }
    }

    /// String literal for a string id used as a value; id 0 is no string
    fn string_reference(&self, id: u16) -> Option<String> {
        if id == 0 {
            return None;
        }
        self.string_literal(id)
    }

    /// An immediate used as an address is a global variable
    fn pushi_immediate_to_global(&mut self, expression: NodeId) {
        let index = self.expression_data(expression).pushi_imm_value;
        let name = self.memory_var_name(index);
        self.set_expression_data(expression, ExpressionData::address(name));
    }

    fn combine_say(&mut self, insert_at: NodeId, expression: NodeId) {
        let data = self.expression_data(expression);
        let literal = if data.is_pushi_imm {
            self.string_literal(data.pushi_imm_value)
        } else {
            None
        };

        let text = match literal {
            Some(literal) => format!("say({});", literal),
            None => {
                warn!("say with non-string operand {} at {:04x}", data.text, self.node(insert_at).pos);
                format!("say({});", data.text)
            }
        };
        self.insert_statement(insert_at, text, 0, 0);
    }

    fn combine_assignment(
        &mut self,
        info: &FuncInfo,
        operator_id: NodeId,
        operator: &OperatorData,
        insert_at: NodeId,
        expressions: &[NodeId],
    ) {
        let (mut rvalue, mut lvalue) = (expressions[0], expressions[1]);
        if operator.swap_expressions {
            std::mem::swap(&mut rvalue, &mut lvalue);
        }

        if self.expression_data(lvalue).is_pushi_imm {
            self.pushi_immediate_to_global(lvalue);
        }

        let target = self.expression_data(lvalue);
        let value = self.expression_data(rvalue);
        if !target.is_address {
            debug!("assignment to non-address {} at {:04x}", target.text, self.node(operator_id).pos);
        }

        let text = match self.menu_string(info, operator_id, &target, &value) {
            Some((literal, id)) => format!("{} = {}; // {}", target.text, literal, id),
            None => format!("{} = {};", target.text, value.text),
        };
        self.insert_statement(insert_at, text, 0, 0);
    }

    /// Immediates stored into an array that a later babl_menu or babl_fmenu
    /// call reads are string ids
    fn menu_string(
        &self,
        info: &FuncInfo,
        operator_id: NodeId,
        target: &ExpressionData,
        value: &ExpressionData,
    ) -> Option<(String, u16)> {
        if !value.is_pushi_imm || !target.text.contains('[') {
            return None;
        }

        let mut cursor = self.body_next(operator_id, info.end_node);
        let mut call = None;
        while let Some(id) = cursor {
            if let NodeKind::Operator(data) = &self.node(id).kind {
                if data.opcode == Opcode::CALLI {
                    call = Some((id, data.arg));
                    break;
                }
            }
            cursor = self.body_next(id, info.end_node);
        }
        let (call, intrinsic) = call?;

        let name = self.imported_functions.get(&intrinsic).map(|item| item.name.as_str())?;
        match name {
            "babl_menu" => {}
            "babl_fmenu" => {
                // only the string array argument holds string ids
                let strings_arg = self
                    .prev(call)
                    .and_then(|prev| self.opcode_data(prev))
                    .filter(|data| data.opcode == Some(Opcode::PUSHI_EFF))
                    .map(|data| data.arg);
                if let Some(local) = strings_arg {
                    if !target.text.starts_with(&format!("local_{}[", local)) {
                        return None;
                    }
                }
            }
            _ => return None,
        }

        let id = value.pushi_imm_value;
        self.string_reference(id).map(|literal| (literal, id))
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::tests::graph;
    use crate::graph::CodeGraph;
    use crate::image::ImportedItem;
    use crate::opcode::op::*;
    use crate::opcode::DataType;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    const PROLOGUE_2_LOCALS: [u16; 5] = [PUSHBP, SPTOBP, PUSHI, 2, ADDSP];
    const EPILOGUE: [u16; 3] = [BPTOSP, POPBP, RET];

    fn function(body: &[u16]) -> Vec<u16> {
        let mut code = PROLOGUE_2_LOCALS.to_vec();
        code.extend_from_slice(body);
        code.extend_from_slice(&EPILOGUE);
        code
    }

    /// Text of the open statements of the decompiled graph
    fn statements(g: &CodeGraph) -> Vec<String> {
        g.iter()
            .filter(|(_, node)| !node.processed)
            .filter_map(|(_, node)| node.statement_data())
            .map(|statement| statement.text.clone())
            .collect()
    }

    fn body(g: &CodeGraph) -> Vec<String> {
        let all = statements(g);
        // header, brace and declarations come first, closing brace last
        all.into_iter()
            .skip_while(|text| !text.starts_with("int local") && text != "{")
            .skip_while(|text| text == "{" || text.starts_with("int local"))
            .take_while(|text| text != "} // end-function")
            .collect()
    }

    fn with_imports(code: &[u16], strings: &[&str], functions: &[(u16, &str)]) -> CodeGraph {
        let imports: BTreeMap<u16, ImportedItem> = functions
            .iter()
            .map(|&(index, name)| (index, ImportedItem::function(name, DataType::Int)))
            .collect();
        let mut variables = BTreeMap::new();
        variables.insert(3, ImportedItem::variable("play_hunger", DataType::Int));
        CodeGraph::new(
            code,
            0,
            code.len() as u16,
            strings.iter().map(|s| s.to_string()).collect(),
            imports,
            variables,
            16,
        )
    }

    #[test]
    fn test_assignment_with_swap() {
        let mut g = graph(&function(&[PUSHI, 42, PUSHI_EFF, 1, SWAP, STO]));
        g.decompile();
        assert_eq!(body(&g), vec!["local_1 = 42;"]);
        assert_eq!(
            statements(&g)[..3].to_vec(),
            vec!["void main() // referenced 1 times", "{", "int local_1;"]
        );
    }

    #[test]
    fn test_equality_swap() {
        // if (0 == local_1) local_2 = 1;
        let mut g = graph(&function(&[
            PUSHI, 0, PUSHI_EFF, 1, FETCHM, TSTEQ, BEQ, 7, // 5..12
            PUSHI, 1, PUSHI_EFF, 2, SWAP, STO, // 13..
        ]));
        g.decompile();
        assert_eq!(
            body(&g),
            vec!["if (local_1 == 0) {", "local_2 = 1;", "} // end-if"]
        );
    }

    #[test]
    fn test_parenthesization() {
        // local_1 = local_2 - (3 - 1) * 2
        let mut g = graph(&function(&[
            PUSHI_EFF, 2, FETCHM, PUSHI, 3, PUSHI, 1, OPSUB, PUSHI, 2, OPMUL, OPSUB, // 5..16
            PUSHI_EFF, 1, SWAP, STO,
        ]));
        g.decompile();
        assert_eq!(body(&g), vec!["local_1 = local_2 - (3 - 1) * 2;"]);
    }

    #[test]
    fn test_unary_operand_wrapped_when_looser() {
        // local_1 = -(local_2 - 1); local_1 = -local_2;
        let mut g = graph(&function(&[
            PUSHI_EFF, 2, FETCHM, PUSHI, 1, OPSUB, OPNEG, PUSHI_EFF, 1, SWAP, STO, // 5..15
            PUSHI_EFF, 2, FETCHM, OPNEG, PUSHI_EFF, 1, SWAP, STO,
        ]));
        g.decompile();
        assert_eq!(body(&g), vec!["local_1 = -(local_2 - 1);", "local_1 = -local_2;"]);
    }

    #[test]
    fn test_intrinsic_call_result() {
        let code = function(&[
            PUSHI_EFF, 1, PUSHI, 1, CALLI, 0, POP, POP, PUSH_REG, // 5..13
            PUSHI_EFF, 2, SWAP, STO,
        ]);
        let mut g = with_imports(&code, &[], &[(0, "length")]);
        g.decompile();
        assert_eq!(body(&g), vec!["local_2 = length(local_1);"]);
    }

    #[test]
    fn test_global_and_say() {
        let code = function(&[
            PUSHI, 3, PUSHI, 3, FETCHM, PUSHI, 7, FETCHM, OPADD, STO, // 5..14
            PUSHI, 1, SAY_OP, EXIT_OP,
        ]);
        let mut g = with_imports(&code, &["", "Hello\n\"you\""], &[]);
        g.decompile();
        assert_eq!(
            body(&g),
            vec![
                "play_hunger = play_hunger + global_7;",
                "say(\"Hello\\n\\\"you\\\"\");",
                "exit;",
            ]
        );
    }

    #[test]
    fn test_assignment_as_call_argument() {
        // local_1 = 2; print(local_1), where print takes a string
        let code = [
            PUSHBP, SPTOBP, PUSHI, 1, ADDSP, // 0..4
            PUSHI, 2, PUSHI_EFF, 1, SWAP, STO, // 5..10
            PUSHI_EFF, 1, PUSHI, 1, CALLI, 0, POP, POP, // 11..18
            BPTOSP, POPBP, RET,
        ];
        let mut g = with_imports(&code, &["", "one", "two"], &[(0, "print")]);
        g.decompile();
        assert_eq!(body(&g), vec!["print(\"two\" /* 2 */);"]);

        let commented = g
            .iter()
            .filter_map(|(_, node)| node.statement_data())
            .any(|statement| statement.text == "// local_1 = 2;");
        assert!(commented);
        assert!(!statements(&g).contains(&"int local_1;".to_string()));
    }

    #[test]
    fn test_babl_menu_strings() {
        // local_1[1] = 1; local_1[2] = 0; local_3 = babl_menu(local_1);
        let code = [
            PUSHBP, SPTOBP, PUSHI, 3, ADDSP, // 0..4
            PUSHI, 1, PUSHI, 1, PUSHI_EFF, 1, OFFSET, SWAP, STO, // 5..13
            PUSHI, 0, PUSHI, 2, PUSHI_EFF, 1, OFFSET, SWAP, STO, // 14..22
            PUSHI_EFF, 1, PUSHI, 1, CALLI, 5, POP, POP, PUSH_REG, // 23..31
            PUSHI_EFF, 3, SWAP, STO, // 32..35
            BPTOSP, POPBP, RET,
        ];
        let mut g = with_imports(&code, &["", "Bye."], &[(5, "babl_menu")]);
        g.decompile();
        assert_eq!(
            body(&g),
            vec![
                "local_1[1] = \"Bye.\"; // 1",
                "local_1[2] = 0;",
                "local_3 = babl_menu(local_1);",
            ]
        );
        let declarations: Vec<String> = statements(&g)
            .into_iter()
            .filter(|text| text.starts_with("int "))
            .collect();
        assert_eq!(declarations, vec!["int local_3;", "int local_1[2];"]);
    }

    #[test]
    fn test_return_value_and_params() {
        // int func(int param1) { return param1 + 1; }
        let code = [
            PUSHBP, SPTOBP, PUSHI, 0, ADDSP, PUSHI, 9, CALL, 13, POP, BPTOSP, POPBP, RET, // 0..12
            PUSHBP, SPTOBP, PUSHI, 0, ADDSP, // 13..17
            PUSHI_EFF, 0xfffe, FETCHM, PUSHI, 1, OPADD, SAVE_REG, POP, // 18..26
            BPTOSP, POPBP, RET,
        ];
        let mut g = graph(&code);
        g.decompile();

        let text = statements(&g);
        assert!(text.contains(&"func_000d(global_9);".to_string()), "{:?}", text);
        assert!(text.contains(&"int func_000d(int param1) // referenced 1 times".to_string()));
        assert!(text.contains(&"return param1 + 1;".to_string()));
    }
}
