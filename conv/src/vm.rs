// vm.rs - Conversation bytecode interpreter
//
// Executes one instruction per step() call so a host or debugger controls
// pacing. Intrinsic calls that only touch strings are handled here; all
// others are forwarded to the host through CodeCallback.

use crate::error::VmFault;
use crate::globals::ConvGlobals;
use crate::image::{ConvImage, ImportedItem};
use crate::opcode::Opcode;
use crate::stack::ConvStack;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// Number of stack cells allocated for a conversation
pub const STACK_CAPACITY: usize = 4096;

/// Slot value for conversations without persisted globals
pub const NO_SLOT: u16 = 0xffff;

/// Filler value for freshly reserved local variables
const LOCAL_FILLER: u16 = 0xdddd;

/// Host side of the VM
pub trait CodeCallback {
    /// Print the string with the given index
    fn text_output(&mut self, string_id: u16);

    /// Let the player choose an answer; returns the selected 1-based entry
    fn menu(&mut self, answer_string_ids: &[u16]) -> u16;

    /// Execute an intrinsic the VM doesn't handle itself
    fn external_call(&mut self, name: &str, stack: &ConvStack) -> u16;

    /// Value of an imported global
    fn get_global(&mut self, name: &str) -> u16 {
        warn!("get global: unknown global {}", name);
        0
    }

    /// Store a value to an imported global
    fn set_global(&mut self, name: &str, value: u16) {
        warn!("set global: unknown global {} = {:04x}", name, value);
    }
}

/// Conversation VM
pub struct CodeVm {
    conversation_slot: u16,
    code: Vec<u16>,
    reserved_globals: u16,
    imported_functions: BTreeMap<u16, ImportedItem>,
    imported_globals: BTreeMap<u16, ImportedItem>,
    strings: Vec<String>,

    ip: u16,
    bp: u16,
    stack: ConvStack,
    call_depth: u32,
    result_register: u16,
    finished: bool,
    fault: Option<VmFault>,
    rng: StdRng,
}

impl CodeVm {
    pub fn new(image: &ConvImage, conversation_slot: u16) -> Self {
        Self::with_rng(image, conversation_slot, StdRng::from_entropy())
    }

    /// VM with a reproducible random() intrinsic
    pub fn with_seed(image: &ConvImage, conversation_slot: u16, seed: u64) -> Self {
        Self::with_rng(image, conversation_slot, StdRng::seed_from_u64(seed))
    }

    fn with_rng(image: &ConvImage, conversation_slot: u16, rng: StdRng) -> Self {
        CodeVm {
            conversation_slot,
            code: image.code.clone(),
            reserved_globals: image.reserved_globals,
            imported_functions: image.imported_functions.clone(),
            imported_globals: image.imported_globals.clone(),
            strings: Vec::new(),
            ip: 0,
            bp: 0xffff,
            stack: ConvStack::default(),
            call_depth: 1,
            result_register: 0,
            finished: false,
            fault: None,
            rng,
        }
    }

    /// Set the conversation's string table
    pub fn set_strings(&mut self, strings: Vec<String>) {
        self.strings = strings;
    }

    /// Add a string to the local string table, returning its index
    pub fn alloc_string(&mut self, text: &str) -> u16 {
        self.strings.push(text.to_string());
        (self.strings.len() - 1) as u16
    }

    pub fn local_string(&self, index: u16) -> Option<&str> {
        self.strings.get(index as usize).map(String::as_str)
    }

    /// Reset registers and load globals onto the stack
    pub fn init(&mut self, callback: &mut dyn CodeCallback, globals: &ConvGlobals) -> Result<(), VmFault> {
        self.ip = 0;
        self.bp = 0xffff;
        self.result_register = 0;
        self.finished = false;
        self.fault = None;
        self.call_depth = 1;

        self.stack = ConvStack::new(STACK_CAPACITY);
        self.stack.set_stack_pointer(self.reserved_globals);

        // persisted globals of this conversation
        if self.conversation_slot != NO_SLOT {
            for (index, value) in globals.slot(self.conversation_slot).iter().enumerate() {
                self.stack.set(index as u16, *value)?;
            }
        }

        // imported globals
        for (pos, item) in &self.imported_globals {
            let value = callback.get_global(&item.name);
            self.stack.set(*pos, value)?;
        }

        Ok(())
    }

    /// Write the conversation's globals back to persistent storage
    pub fn done(&self, globals: &mut ConvGlobals) {
        if self.conversation_slot == NO_SLOT {
            return;
        }
        if let Some(slot) = globals.slot_mut(self.conversation_slot) {
            for (index, value) in slot.iter_mut().enumerate() {
                match self.stack.at(index as u16) {
                    Ok(v) => *value = v,
                    Err(err) => warn!("storing global {}: {}", index, err),
                }
            }
        }
    }

    /// Execute one instruction; returns false when the run has ended
    pub fn step(&mut self, callback: &mut dyn CodeCallback) -> bool {
        if self.finished {
            return false;
        }

        if let Err(fault) = self.execute(callback) {
            warn!("conversation stopped: {}", fault);
            self.fault = Some(fault);
            self.finished = true;
        }

        !self.finished
    }

    fn fetch(&self, at: u16) -> Result<u16, VmFault> {
        self.code
            .get(at as usize)
            .copied()
            .ok_or(VmFault::InstructionPointer { ip: at })
    }

    fn execute(&mut self, callback: &mut dyn CodeCallback) -> Result<(), VmFault> {
        let pos = self.ip;
        let word = self.fetch(pos)?;
        let opcode = Opcode::from_word(word).ok_or(VmFault::UnknownOpcode { word, pos })?;
        let arg = if opcode.arg_count() > 0 {
            self.fetch(pos.wrapping_add(1))?
        } else {
            0
        };

        trace!("{:04x} {} {:04x} sp={:04x}", pos, opcode.mnemonic(), arg, self.stack.stack_pointer());

        let mut next = pos.wrapping_add(1 + opcode.arg_count());

        match opcode {
            Opcode::NOP | Opcode::START | Opcode::RESPOND_OP => {}

            Opcode::OPADD => self.binary(|a, b| a.wrapping_add(b))?,
            Opcode::OPMUL => self.binary(|a, b| a.wrapping_mul(b))?,
            Opcode::OPSUB => self.binary(|a, b| a.wrapping_sub(b))?,
            Opcode::OPDIV | Opcode::OPMOD => {
                let arg1 = self.stack.pop()?;
                let arg2 = self.stack.pop()?;
                if arg1 == 0 {
                    return Err(VmFault::DivisionByZero { pos });
                }
                let value = if opcode == Opcode::OPDIV {
                    arg2 / arg1
                } else {
                    arg2 % arg1
                };
                self.stack.push(value)?;
            }
            Opcode::OPOR => self.binary(|a, b| (a != 0 || b != 0) as u16)?,
            Opcode::OPAND => self.binary(|a, b| (a != 0 && b != 0) as u16)?,
            Opcode::OPNOT => {
                let value = self.stack.pop()?;
                self.stack.push((value == 0) as u16)?;
            }
            Opcode::TSTGT => self.binary(|a, b| (a > b) as u16)?,
            Opcode::TSTGE => self.binary(|a, b| (a >= b) as u16)?,
            Opcode::TSTLT => self.binary(|a, b| (a < b) as u16)?,
            Opcode::TSTLE => self.binary(|a, b| (a <= b) as u16)?,
            Opcode::TSTEQ => self.binary(|a, b| (a == b) as u16)?,
            Opcode::TSTNE => self.binary(|a, b| (a != b) as u16)?,

            Opcode::JMP => next = arg,
            Opcode::BEQ => {
                if self.stack.pop()? == 0 {
                    next = branch_target(pos, arg);
                }
            }
            Opcode::BNE => {
                if self.stack.pop()? != 0 {
                    next = branch_target(pos, arg);
                }
            }
            Opcode::BRA => next = branch_target(pos, arg),

            Opcode::CALL => {
                self.stack.push(pos.wrapping_add(1))?;
                self.call_depth += 1;
                next = arg;
            }
            Opcode::CALLI => {
                let name = self
                    .imported_functions
                    .get(&arg)
                    .map(|item| item.name.clone())
                    .ok_or(VmFault::UnknownIntrinsic { index: arg, pos })?;
                self.result_register = self.intrinsic(callback, &name)?;
            }
            Opcode::RET => {
                self.call_depth = self.call_depth.saturating_sub(1);
                if self.call_depth == 0 {
                    debug!("conversation returned from top level at {:04x}", pos);
                    self.finished = true;
                } else {
                    next = self.stack.pop()?.wrapping_add(1);
                }
            }

            Opcode::PUSHI => self.stack.push(arg)?,
            Opcode::PUSHI_EFF => self.stack.push(self.bp.wrapping_add(arg as i16 as u16))?,
            Opcode::POP => {
                self.stack.pop()?;
            }
            Opcode::SWAP => {
                let arg1 = self.stack.pop()?;
                let arg2 = self.stack.pop()?;
                self.stack.push(arg1)?;
                self.stack.push(arg2)?;
            }
            Opcode::PUSHBP => self.stack.push(self.bp)?,
            Opcode::POPBP => self.bp = self.stack.pop()?,
            Opcode::SPTOBP => self.bp = self.stack.stack_pointer(),
            Opcode::BPTOSP => self.stack.set_stack_pointer(self.bp),
            Opcode::ADDSP => {
                let count = self.stack.pop()?;
                for _ in 0..count {
                    self.stack.push(LOCAL_FILLER)?;
                }
            }
            Opcode::FETCHM => {
                let address = self.stack.pop()?;
                let value = self.stack.at(address)?;
                if let Some(item) = self.imported_globals.get(&address) {
                    trace!("fetching {} returned {:04x}", item.name, value);
                }
                self.stack.push(value)?;
            }
            Opcode::STO => {
                let value = self.stack.pop()?;
                let address = self.stack.pop()?;
                if let Some(item) = self.imported_globals.get(&address) {
                    trace!("storing {} = {:04x}", item.name, value);
                    callback.set_global(&item.name, value);
                }
                self.stack.set(address, value)?;
            }
            Opcode::OFFSET => {
                let arg1 = self.stack.pop()?;
                let arg2 = self.stack.pop()?;
                self.stack.push(arg1.wrapping_add(arg2).wrapping_sub(1))?;
            }
            Opcode::SAVE_REG => self.result_register = self.stack.pop()?,
            Opcode::PUSH_REG => self.stack.push(self.result_register)?,
            Opcode::EXIT_OP => {
                debug!("conversation exited at {:04x}", pos);
                self.finished = true;
            }
            Opcode::SAY_OP => {
                let string_id = self.stack.pop()?;
                callback.text_output(string_id);
            }
            Opcode::OPNEG => {
                let value = self.stack.pop()?;
                self.stack.push(value.wrapping_neg())?;
            }
            Opcode::STRCMP => {
                return Err(VmFault::UnsupportedOpcode {
                    mnemonic: opcode.mnemonic(),
                    pos,
                })
            }
        }

        self.ip = next;
        Ok(())
    }

    /// Pop arg1 (top) and arg2, push op(arg2, arg1)
    fn binary(&mut self, op: impl Fn(u16, u16) -> u16) -> Result<(), VmFault> {
        let arg1 = self.stack.pop()?;
        let arg2 = self.stack.pop()?;
        self.stack.push(op(arg2, arg1))?;
        Ok(())
    }

    /// Local string referenced by a pointer argument
    fn string_arg(&self, address_pos: u16) -> Result<String, VmFault> {
        let address = self.stack.at(address_pos)?;
        let index = self.stack.at(address)?;
        self.strings
            .get(index as usize)
            .cloned()
            .ok_or(VmFault::InvalidString { index })
    }

    fn intrinsic(&mut self, callback: &mut dyn CodeCallback, name: &str) -> Result<u16, VmFault> {
        let sp = self.stack.stack_pointer();
        let argcount = self.stack.at(sp)?;
        let argpos = sp.wrapping_sub(1);

        debug!("executing intrinsic {}() with {} arguments", name, argcount);

        match name {
            "babl_menu" => {
                // first argument is ignored
                let mut address = self.stack.at(argpos.wrapping_sub(1))?;
                let mut answers = Vec::new();
                loop {
                    let string_id = self.stack.at(address)?;
                    if string_id == 0 {
                        break;
                    }
                    answers.push(string_id);
                    address = address.wrapping_add(1);
                }
                Ok(callback.menu(&answers))
            }
            "compare" => {
                let first = self.string_arg(argpos)?.to_lowercase();
                let second = self.string_arg(argpos.wrapping_sub(1))?.to_lowercase();
                Ok((first == second) as u16)
            }
            "contains" => {
                let first = self.string_arg(argpos)?.to_lowercase();
                let second = self.string_arg(argpos.wrapping_sub(1))?.to_lowercase();
                Ok(first.contains(&second) as u16)
            }
            "length" => Ok(self.string_arg(argpos)?.len() as u16),
            "random" => {
                let address = self.stack.at(argpos)?;
                let upper = self.stack.at(address)?;
                if upper == 0 {
                    return Ok(1);
                }
                Ok(self.rng.gen_range(1..=upper))
            }
            "plural" | "append" | "copy" | "find" | "val" | "say" | "respond" => {
                Err(VmFault::UnsupportedIntrinsic {
                    name: name.to_string(),
                })
            }
            _ => Ok(callback.external_call(name, &self.stack)),
        }
    }

    /// Expand @ placeholders in a message text.
    ///
    /// A placeholder is `@` followed by a source (`G` global, `S` stack
    /// parameter, `P` pointer parameter), a type (`S` string, `I` integer)
    /// and a decimal number.
    pub fn replace_placeholder(&self, text: &str) -> String {
        let mut result = text.to_string();
        let mut search = 0;

        while let Some(found) = result[search..].find('@') {
            let pos = search + found;
            let bytes = result.as_bytes();
            let source = bytes.get(pos + 1).copied().unwrap_or(0);
            let var_type = bytes.get(pos + 2).copied().unwrap_or(0);
            if !source.is_ascii() || !var_type.is_ascii() {
                // not a placeholder, and not a place to slice the text
                search = pos + 1;
                continue;
            }

            // signed decimal number after the two type characters
            let number_start = (pos + 3).min(result.len());
            let mut number_end = number_start;
            if matches!(bytes.get(number_end), Some(b'-') | Some(b'+')) {
                number_end += 1;
            }
            let digits_start = number_end;
            while bytes.get(number_end).is_some_and(u8::is_ascii_digit) {
                number_end += 1;
            }
            if number_end == digits_start {
                number_end = number_start;
            }
            let param: i32 = result[number_start..number_end].parse().unwrap_or(0);

            let value = match source {
                b'G' => self.stack.at(param as u16),
                b'S' => self.stack.at((self.bp as i32 + param) as u16),
                b'P' => self
                    .stack
                    .at((self.bp as i32 + param) as u16)
                    .and_then(|address| self.stack.at(address)),
                _ => Ok(0),
            }
            .unwrap_or_else(|err| {
                warn!("placeholder in \"{}\": {}", text, err);
                0
            });

            let replacement = match var_type {
                b'S' => self.local_string(value).unwrap_or_default().to_string(),
                b'I' => value.to_string(),
                _ => String::new(),
            };

            result.replace_range(pos..number_end, &replacement);
            search = pos + replacement.len();
        }

        result
    }

    pub fn instruction_pointer(&self) -> u16 {
        self.ip
    }

    pub fn base_pointer(&self) -> u16 {
        self.bp
    }

    pub fn call_depth(&self) -> u32 {
        self.call_depth
    }

    pub fn result_register(&self) -> u16 {
        self.result_register
    }

    pub fn set_result_register(&mut self, value: u16) {
        self.result_register = value;
    }

    pub fn stack(&self) -> &ConvStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut ConvStack {
        &mut self.stack
    }

    pub fn code(&self) -> &[u16] {
        &self.code
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Fault that ended the run, if any
    pub fn fault(&self) -> Option<&VmFault> {
        self.fault.as_ref()
    }
}

/// Target of a relative branch at pos
pub fn branch_target(pos: u16, arg: u16) -> u16 {
    pos.wrapping_add(1).wrapping_add(arg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackError;
    use crate::opcode::op::*;
    use crate::opcode::DataType;

    #[derive(Default)]
    struct Recorder {
        said: Vec<u16>,
        menus: Vec<Vec<u16>>,
        externals: Vec<String>,
        stored: Vec<(String, u16)>,
    }

    impl CodeCallback for Recorder {
        fn text_output(&mut self, string_id: u16) {
            self.said.push(string_id);
        }

        fn menu(&mut self, answer_string_ids: &[u16]) -> u16 {
            self.menus.push(answer_string_ids.to_vec());
            2
        }

        fn external_call(&mut self, name: &str, _stack: &ConvStack) -> u16 {
            self.externals.push(name.to_string());
            7
        }

        fn get_global(&mut self, name: &str) -> u16 {
            if name == "play_hunger" {
                33
            } else {
                0
            }
        }

        fn set_global(&mut self, name: &str, value: u16) {
            self.stored.push((name.to_string(), value));
        }
    }

    fn image(code: Vec<u16>, reserved_globals: u16) -> ConvImage {
        ConvImage {
            code,
            reserved_globals,
            ..Default::default()
        }
    }

    fn run(vm: &mut CodeVm, callback: &mut Recorder) -> usize {
        let mut steps = 0;
        while vm.step(callback) {
            steps += 1;
            assert!(steps < 1000, "runaway script");
        }
        steps
    }

    fn start(image: &ConvImage) -> (CodeVm, Recorder) {
        let mut vm = CodeVm::with_seed(image, NO_SLOT, 1);
        let mut callback = Recorder::default();
        vm.init(&mut callback, &ConvGlobals::default()).unwrap();
        (vm, callback)
    }

    #[test]
    fn test_arithmetic_and_say() {
        let image = image(
            vec![PUSHI, 10, PUSHI, 3, OPSUB, PUSHI, 4, OPMUL, SAY_OP, PUSHI, 9, PUSHI, 2, OPMOD, SAY_OP, EXIT_OP],
            0,
        );
        let (mut vm, mut callback) = start(&image);
        run(&mut vm, &mut callback);

        assert_eq!(callback.said, vec![28, 1]);
        assert!(vm.is_finished());
        assert!(vm.fault().is_none());
    }

    #[test]
    fn test_comparisons_and_branches() {
        // 3 > 2 is true, so BEQ falls through and says 1; BRA skips say 2
        let image = image(
            vec![
                PUSHI, 3, PUSHI, 2, TSTGT, // 0..4
                BEQ, 6, // 5
                PUSHI, 1, SAY_OP, // 7..9
                BRA, 4, // 10
                PUSHI, 2, SAY_OP, // 12..14
                EXIT_OP, // 15
            ],
            0,
        );
        let (mut vm, mut callback) = start(&image);
        run(&mut vm, &mut callback);
        assert_eq!(callback.said, vec![1]);
    }

    #[test]
    fn test_call_and_return_depth() {
        let image = image(vec![CALL, 4, EXIT_OP, NOP, PUSHI, 9, SAY_OP, RET], 0);
        let (mut vm, mut callback) = start(&image);

        assert!(vm.step(&mut callback));
        assert_eq!(vm.call_depth(), 2);
        assert_eq!(vm.instruction_pointer(), 4);

        for _ in 0..3 {
            assert!(vm.step(&mut callback));
        }
        assert_eq!(callback.said, vec![9]);
        assert_eq!(vm.call_depth(), 1);
        assert_eq!(vm.instruction_pointer(), 2);

        assert!(!vm.step(&mut callback));
        assert!(vm.fault().is_none());
    }

    #[test]
    fn test_top_level_return_finishes() {
        let image = image(vec![PUSHI, 7, SAY_OP, RET, PUSHI, 8, SAY_OP], 0);
        let (mut vm, mut callback) = start(&image);
        run(&mut vm, &mut callback);
        assert_eq!(callback.said, vec![7]);
        assert_eq!(vm.call_depth(), 0);
        assert!(vm.fault().is_none());
    }

    #[test]
    fn test_division_by_zero_faults() {
        let image = image(vec![PUSHI, 1, PUSHI, 0, OPDIV, EXIT_OP], 0);
        let (mut vm, mut callback) = start(&image);

        assert!(vm.step(&mut callback));
        assert!(vm.step(&mut callback));
        assert!(!vm.step(&mut callback));
        assert_eq!(vm.fault(), Some(&VmFault::DivisionByZero { pos: 4 }));
        assert!(!vm.step(&mut callback));
    }

    #[test]
    fn test_unknown_opcode_and_underflow_fault() {
        let (mut vm, mut callback) = start(&image(vec![0x77], 0));
        assert!(!vm.step(&mut callback));
        assert_eq!(vm.fault(), Some(&VmFault::UnknownOpcode { word: 0x77, pos: 0 }));

        let (mut vm, mut callback) = start(&image(vec![POP, POP], 0));
        assert!(vm.step(&mut callback));
        assert!(!vm.step(&mut callback));
        assert_eq!(vm.fault(), Some(&VmFault::Stack(StackError::Underflow)));
    }

    #[test]
    fn test_unresolved_intrinsic_faults() {
        let (mut vm, mut callback) = start(&image(vec![PUSHI, 0, CALLI, 5], 0));
        assert!(vm.step(&mut callback));
        assert!(!vm.step(&mut callback));
        assert_eq!(vm.fault(), Some(&VmFault::UnknownIntrinsic { index: 5, pos: 2 }));
    }

    fn intrinsic_image(name: &str, code: Vec<u16>) -> ConvImage {
        let mut image = image(code, 8);
        image
            .imported_functions
            .insert(0, ImportedItem::function(name, DataType::Int));
        image
    }

    /// Stores string ids 1 and 2 to globals 1 and 2, then calls intrinsic 0
    /// with the two addresses and says the result
    fn string_call() -> Vec<u16> {
        vec![
            PUSHI, 1, PUSHI, 1, STO, PUSHI, 2, PUSHI, 2, STO, // globals
            PUSHI, 2, PUSHI, 1, PUSHI, 2, CALLI, 0, POP, POP, POP, // call
            PUSH_REG, SAY_OP, EXIT_OP,
        ]
    }

    #[test]
    fn test_compare_and_contains() {
        for (name, strings, expected) in [
            ("compare", ["", "Hello", "hELLo"], 1),
            ("compare", ["", "Hello", "World"], 0),
            ("contains", ["", "Hello World", "world"], 1),
            ("contains", ["", "Hello", "world"], 0),
        ] {
            let image = intrinsic_image(name, string_call());
            let (mut vm, mut callback) = start(&image);
            vm.set_strings(strings.iter().map(|s| s.to_string()).collect());
            run(&mut vm, &mut callback);
            assert_eq!(callback.said, vec![expected], "{}({:?})", name, strings);
        }
    }

    #[test]
    fn test_babl_menu_reads_answer_list() {
        // answers 5, 6, 0 stored at globals 3..5, menu array address as second argument
        let code = vec![
            PUSHI, 3, PUSHI, 5, STO, PUSHI, 4, PUSHI, 6, STO, PUSHI, 5, PUSHI, 0, STO, //
            PUSHI, 3, PUSHI, 0, PUSHI, 2, CALLI, 0, POP, POP, POP, PUSH_REG, SAY_OP, EXIT_OP,
        ];
        let image = intrinsic_image("babl_menu", code);
        let (mut vm, mut callback) = start(&image);
        run(&mut vm, &mut callback);

        assert_eq!(callback.menus, vec![vec![5, 6]]);
        assert_eq!(callback.said, vec![2]);
    }

    #[test]
    fn test_random_in_range() {
        let code = vec![PUSHI, 1, PUSHI, 6, STO, PUSHI, 1, PUSHI, 1, CALLI, 0, POP, POP, PUSH_REG, SAY_OP, EXIT_OP];
        let image = intrinsic_image("random", code);
        for seed in 0..20 {
            let mut vm = CodeVm::with_seed(&image, NO_SLOT, seed);
            let mut callback = Recorder::default();
            vm.init(&mut callback, &ConvGlobals::default()).unwrap();
            run(&mut vm, &mut callback);
            assert!((1..=6).contains(&callback.said[0]));
        }
    }

    #[test]
    fn test_external_call_forwarded() {
        let code = vec![PUSHI, 0, CALLI, 0, POP, PUSH_REG, SAY_OP, EXIT_OP];
        let image = intrinsic_image("get_quest", code);
        let (mut vm, mut callback) = start(&image);
        run(&mut vm, &mut callback);
        assert_eq!(callback.externals, vec!["get_quest".to_string()]);
        assert_eq!(callback.said, vec![7]);
    }

    #[test]
    fn test_globals_loaded_and_written_back() {
        let mut image = image(vec![PUSHI, 1, PUSHI, 1, FETCHM, PUSHI, 10, OPADD, STO, PUSHI, 4, PUSHI, 5, STO, EXIT_OP], 8);
        image
            .imported_globals
            .insert(3, ImportedItem::variable("play_hunger", DataType::Int));
        image
            .imported_globals
            .insert(4, ImportedItem::variable("npc_xhome", DataType::Int));

        let mut globals = ConvGlobals::with_sizes(&[0, 3]);
        if let Some(slot) = globals.slot_mut(1) {
            slot.copy_from_slice(&[1, 2, 3]);
        }

        let mut vm = CodeVm::with_seed(&image, 1, 0);
        let mut callback = Recorder::default();
        vm.init(&mut callback, &globals).unwrap();
        assert_eq!(vm.stack().at(3).unwrap(), 33);

        run(&mut vm, &mut callback);
        vm.done(&mut globals);

        assert_eq!(globals.slot(1), &[1, 12, 3]);
        assert_eq!(callback.stored, vec![("npc_xhome".to_string(), 5)]);
    }

    #[test]
    fn test_replace_placeholder() {
        let (mut vm, _) = start(&image(vec![EXIT_OP], 8));
        let name = vm.alloc_string("Garamon");
        vm.stack_mut().set(2, 42).unwrap();
        vm.stack_mut().set(3, name).unwrap();

        assert_eq!(vm.replace_placeholder("You have @GI2 coins"), "You have 42 coins");
        assert_eq!(vm.replace_placeholder("I am @GS3, and @GS3!"), "I am Garamon, and Garamon!");
        assert_eq!(vm.replace_placeholder("no placeholder"), "no placeholder");
    }

    #[test]
    fn test_replace_placeholder_non_ascii() {
        let (mut vm, _) = start(&image(vec![EXIT_OP], 8));
        vm.stack_mut().set(2, 7).unwrap();

        assert_eq!(vm.replace_placeholder("Grüße @Gé aus Britannia"), "Grüße @Gé aus Britannia");
        assert_eq!(vm.replace_placeholder("@é"), "@é");
        assert_eq!(vm.replace_placeholder("Grüße, @GI2 Münzen"), "Grüße, 7 Münzen");
        assert_eq!(vm.replace_placeholder("@GI2é"), "7é");
    }

    #[test]
    fn test_replace_placeholder_parameters() {
        let (mut vm, _) = start(&image(vec![EXIT_OP], 8));
        // frame at 5: parameter at bp-1 points to global 2
        vm.stack_mut().set(2, 17).unwrap();
        vm.stack_mut().set(4, 2).unwrap();
        vm.bp = 5;

        assert_eq!(vm.replace_placeholder("@SI-1"), "2");
        assert_eq!(vm.replace_placeholder("@PI-1 gold"), "17 gold");
    }
}
