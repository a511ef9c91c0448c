// opcode.rs - Conversation bytecode instruction set
//
// Static description of every opcode: mnemonic, immediate argument count,
// operator text and precedence. Also holds the fixed lookup tables the
// decompiler consults (known function names, intrinsic parameter types).

/// Conversation VM opcodes
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    NOP = 0x00,
    OPADD = 0x01,
    OPMUL = 0x02,
    OPSUB = 0x03,
    OPDIV = 0x04,
    OPMOD = 0x05,
    OPOR = 0x06,
    OPAND = 0x07,
    OPNOT = 0x08,
    TSTGT = 0x09,
    TSTGE = 0x0a,
    TSTLT = 0x0b,
    TSTLE = 0x0c,
    TSTEQ = 0x0d,
    TSTNE = 0x0e,
    JMP = 0x0f,
    BEQ = 0x10,
    BNE = 0x11,
    BRA = 0x12,
    CALL = 0x13,
    CALLI = 0x14,
    RET = 0x15,
    PUSHI = 0x16,
    PUSHI_EFF = 0x17,
    POP = 0x18,
    SWAP = 0x19,
    PUSHBP = 0x1a,
    POPBP = 0x1b,
    SPTOBP = 0x1c,
    BPTOSP = 0x1d,
    ADDSP = 0x1e,
    FETCHM = 0x1f,
    STO = 0x20,
    OFFSET = 0x21,
    START = 0x22,
    SAVE_REG = 0x23,
    PUSH_REG = 0x24,
    STRCMP = 0x25,
    EXIT_OP = 0x26,
    SAY_OP = 0x27,
    RESPOND_OP = 0x28,
    OPNEG = 0x29,
}

/// Static per-opcode information
#[derive(Debug, Clone, Copy)]
pub struct InstructionInfo {
    pub mnemonic: &'static str,
    /// Number of immediate argument words following the opcode
    pub args: u16,
    /// Operator text used when rendering expressions
    pub operator_text: &'static str,
    /// Binding strength; higher binds tighter
    pub precedence: u8,
}

/// Precedence of a plain, non-operator expression
pub const ATOM_PRECEDENCE: u8 = 0xff;

const fn info(mnemonic: &'static str, args: u16, operator_text: &'static str, precedence: u8) -> InstructionInfo {
    InstructionInfo {
        mnemonic,
        args,
        operator_text,
        precedence,
    }
}

const fn plain(mnemonic: &'static str) -> InstructionInfo {
    info(mnemonic, 0, "", ATOM_PRECEDENCE)
}

/// Instruction table, indexed by opcode value
pub static INSTRUCTIONS: [InstructionInfo; 0x2a] = [
    plain("NOP"),
    info("OPADD", 0, "+", 12),
    info("OPMUL", 0, "*", 13),
    info("OPSUB", 0, "-", 12),
    info("OPDIV", 0, "/", 13),
    info("OPMOD", 0, "%", 13),
    info("OPOR", 0, "||", 3),
    info("OPAND", 0, "&&", 4),
    info("OPNOT", 0, "!", 14),
    info("TSTGT", 0, ">", 10),
    info("TSTGE", 0, ">=", 10),
    info("TSTLT", 0, "<", 10),
    info("TSTLE", 0, "<=", 10),
    info("TSTEQ", 0, "==", 9),
    info("TSTNE", 0, "!=", 9),
    info("JMP", 1, "", ATOM_PRECEDENCE),
    info("BEQ", 1, "", ATOM_PRECEDENCE),
    info("BNE", 1, "", ATOM_PRECEDENCE),
    info("BRA", 1, "", ATOM_PRECEDENCE),
    info("CALL", 1, "", 15),
    info("CALLI", 1, "", 15),
    plain("RET"),
    info("PUSHI", 1, "", ATOM_PRECEDENCE),
    info("PUSHI_EFF", 1, "", ATOM_PRECEDENCE),
    plain("POP"),
    plain("SWAP"),
    plain("PUSHBP"),
    plain("POPBP"),
    plain("SPTOBP"),
    plain("BPTOSP"),
    plain("ADDSP"),
    plain("FETCHM"),
    plain("STO"),
    plain("OFFSET"),
    plain("START"),
    plain("SAVE_REG"),
    plain("PUSH_REG"),
    plain("STRCMP"),
    plain("EXIT_OP"),
    plain("SAY_OP"),
    plain("RESPOND_OP"),
    info("OPNEG", 0, "-", 14),
];

const ALL: [Opcode; 0x2a] = [
    Opcode::NOP,
    Opcode::OPADD,
    Opcode::OPMUL,
    Opcode::OPSUB,
    Opcode::OPDIV,
    Opcode::OPMOD,
    Opcode::OPOR,
    Opcode::OPAND,
    Opcode::OPNOT,
    Opcode::TSTGT,
    Opcode::TSTGE,
    Opcode::TSTLT,
    Opcode::TSTLE,
    Opcode::TSTEQ,
    Opcode::TSTNE,
    Opcode::JMP,
    Opcode::BEQ,
    Opcode::BNE,
    Opcode::BRA,
    Opcode::CALL,
    Opcode::CALLI,
    Opcode::RET,
    Opcode::PUSHI,
    Opcode::PUSHI_EFF,
    Opcode::POP,
    Opcode::SWAP,
    Opcode::PUSHBP,
    Opcode::POPBP,
    Opcode::SPTOBP,
    Opcode::BPTOSP,
    Opcode::ADDSP,
    Opcode::FETCHM,
    Opcode::STO,
    Opcode::OFFSET,
    Opcode::START,
    Opcode::SAVE_REG,
    Opcode::PUSH_REG,
    Opcode::STRCMP,
    Opcode::EXIT_OP,
    Opcode::SAY_OP,
    Opcode::RESPOND_OP,
    Opcode::OPNEG,
];

impl Opcode {
    /// Decode a code word; None for words outside the instruction set
    pub fn from_word(word: u16) -> Option<Opcode> {
        ALL.get(word as usize).copied()
    }

    pub fn info(&self) -> &'static InstructionInfo {
        &INSTRUCTIONS[*self as usize]
    }

    pub fn mnemonic(&self) -> &'static str {
        self.info().mnemonic
    }

    /// Number of argument words following the opcode
    pub fn arg_count(&self) -> u16 {
        self.info().args
    }

    /// Is this a relative branch (target = pos + 1 + arg)?
    pub fn is_relative_branch(&self) -> bool {
        matches!(self, Opcode::BEQ | Opcode::BNE | Opcode::BRA)
    }

    /// Is this an absolute jump or call?
    pub fn is_absolute_jump(&self) -> bool {
        matches!(self, Opcode::JMP | Opcode::CALL)
    }

    /// Does this opcode transfer control to a position in the code?
    pub fn has_code_target(&self) -> bool {
        self.is_relative_branch() || self.is_absolute_jump()
    }

    /// Binary arithmetic, logical or comparison operator?
    pub fn is_binary_operator(&self) -> bool {
        matches!(
            self,
            Opcode::OPADD
                | Opcode::OPMUL
                | Opcode::OPSUB
                | Opcode::OPDIV
                | Opcode::OPMOD
                | Opcode::OPOR
                | Opcode::OPAND
                | Opcode::TSTGT
                | Opcode::TSTGE
                | Opcode::TSTLT
                | Opcode::TSTLE
                | Opcode::TSTEQ
                | Opcode::TSTNE
        )
    }
}

impl From<Opcode> for u16 {
    fn from(opcode: Opcode) -> u16 {
        opcode as u16
    }
}

/// Opcode values as plain code words, for assembling bytecode by hand
pub mod op {
    use super::Opcode;

    pub const NOP: u16 = Opcode::NOP as u16;
    pub const OPADD: u16 = Opcode::OPADD as u16;
    pub const OPMUL: u16 = Opcode::OPMUL as u16;
    pub const OPSUB: u16 = Opcode::OPSUB as u16;
    pub const OPDIV: u16 = Opcode::OPDIV as u16;
    pub const OPMOD: u16 = Opcode::OPMOD as u16;
    pub const OPOR: u16 = Opcode::OPOR as u16;
    pub const OPAND: u16 = Opcode::OPAND as u16;
    pub const OPNOT: u16 = Opcode::OPNOT as u16;
    pub const TSTGT: u16 = Opcode::TSTGT as u16;
    pub const TSTGE: u16 = Opcode::TSTGE as u16;
    pub const TSTLT: u16 = Opcode::TSTLT as u16;
    pub const TSTLE: u16 = Opcode::TSTLE as u16;
    pub const TSTEQ: u16 = Opcode::TSTEQ as u16;
    pub const TSTNE: u16 = Opcode::TSTNE as u16;
    pub const JMP: u16 = Opcode::JMP as u16;
    pub const BEQ: u16 = Opcode::BEQ as u16;
    pub const BNE: u16 = Opcode::BNE as u16;
    pub const BRA: u16 = Opcode::BRA as u16;
    pub const CALL: u16 = Opcode::CALL as u16;
    pub const CALLI: u16 = Opcode::CALLI as u16;
    pub const RET: u16 = Opcode::RET as u16;
    pub const PUSHI: u16 = Opcode::PUSHI as u16;
    pub const PUSHI_EFF: u16 = Opcode::PUSHI_EFF as u16;
    pub const POP: u16 = Opcode::POP as u16;
    pub const SWAP: u16 = Opcode::SWAP as u16;
    pub const PUSHBP: u16 = Opcode::PUSHBP as u16;
    pub const POPBP: u16 = Opcode::POPBP as u16;
    pub const SPTOBP: u16 = Opcode::SPTOBP as u16;
    pub const BPTOSP: u16 = Opcode::BPTOSP as u16;
    pub const ADDSP: u16 = Opcode::ADDSP as u16;
    pub const FETCHM: u16 = Opcode::FETCHM as u16;
    pub const STO: u16 = Opcode::STO as u16;
    pub const OFFSET: u16 = Opcode::OFFSET as u16;
    pub const START: u16 = Opcode::START as u16;
    pub const SAVE_REG: u16 = Opcode::SAVE_REG as u16;
    pub const PUSH_REG: u16 = Opcode::PUSH_REG as u16;
    pub const STRCMP: u16 = Opcode::STRCMP as u16;
    pub const EXIT_OP: u16 = Opcode::EXIT_OP as u16;
    pub const SAY_OP: u16 = Opcode::SAY_OP as u16;
    pub const RESPOND_OP: u16 = Opcode::RESPOND_OP as u16;
    pub const OPNEG: u16 = Opcode::OPNEG as u16;
}

/// Functions at fixed addresses whose purpose is known
static KNOWN_FUNCTIONS: &[(u16, &str)] = &[
    (0x0012, "set_global_and_exit"),
    (0x0020, "is_npc_not_attacking"),
    (0x0063, "set_npc_attitude_upset_flee_player_and_exit"),
    (0x0081, "target_player_and_exit"),
    (0x008b, "target_player_and_exit"),
    (0x00b1, "set_npc_attitude_and_exit"),
    (0x00c2, "set_npc_attitude_mellow_and_exit"),
    (0x00d1, "set_npc_attitude_upset_and_exit"),
    (0x00e0, "set_global_and_exit2"),
    (0x00ea, "get_game_time"),
    (0x0106, "subtract_and_check_game_time"),
    (0x018f, "subtract_and_compare_game_times"),
    (0x029d, "start"),
];

/// Name for a function at the given address
pub fn function_name(pos: u16) -> String {
    KNOWN_FUNCTIONS
        .iter()
        .find(|(addr, _)| *addr == pos)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("func_{:04x}", pos))
}

/// Data types used for variables, parameters and return values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    #[default]
    Unknown,
    Void,
    Int,
    String,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Unknown => "unknown",
            DataType::Void => "void",
            DataType::Int => "int",
            DataType::String => "string",
        }
    }
}

static INTRINSIC_PARAMS: &[(&str, &[DataType])] = &[
    ("babl_menu", &[DataType::String]),
    ("babl_fmenu", &[DataType::String, DataType::Int]),
    ("length", &[DataType::String]),
    ("compare", &[DataType::String, DataType::String]),
    ("contains", &[DataType::String, DataType::String]),
    ("print", &[DataType::String]),
    ("sex", &[DataType::String, DataType::String]),
];

/// Known parameter types of an intrinsic, if any
pub fn intrinsic_param_types(name: &str) -> Option<&'static [DataType]> {
    INTRINSIC_PARAMS
        .iter()
        .find(|(intrinsic, _)| *intrinsic == name)
        .map(|(_, params)| *params)
}
