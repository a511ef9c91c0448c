// image.rs - Conversation image parsing
//
// A conversation image holds a small header, the table of imported
// functions and variables, and the code segment as 16-bit words.

use crate::error::ImageError;
use crate::opcode::DataType;
use std::collections::BTreeMap;
use tracing::warn;

/// Expected value of the first header word
pub const IMAGE_MAGIC: u32 = 0x0828;

const IMPORT_FUNCTION: u16 = 0x0111;
const IMPORT_VARIABLE: u16 = 0x010f;

const TYPE_VOID: u16 = 0x0000;
const TYPE_INT: u16 = 0x0129;
const TYPE_STRING: u16 = 0x012b;

/// Kind of an imported symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Function,
    Variable,
}

/// An imported function or variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedItem {
    pub name: String,
    pub kind: ImportKind,
    pub data_type: DataType,
}

impl ImportedItem {
    pub fn function(name: &str, data_type: DataType) -> Self {
        ImportedItem {
            name: name.to_string(),
            kind: ImportKind::Function,
            data_type,
        }
    }

    pub fn variable(name: &str, data_type: DataType) -> Self {
        ImportedItem {
            name: name.to_string(),
            kind: ImportKind::Variable,
            data_type,
        }
    }
}

/// A loaded conversation
#[derive(Debug, Clone, Default)]
pub struct ConvImage {
    /// Code segment
    pub code: Vec<u16>,
    /// String block holding this conversation's strings
    pub string_block: u16,
    /// Number of stack cells reserved for globals
    pub reserved_globals: u16,
    /// Imported functions, keyed by intrinsic index
    pub imported_functions: BTreeMap<u16, ImportedItem>,
    /// Imported variables, keyed by memory index
    pub imported_globals: BTreeMap<u16, ImportedItem>,
}

/// Little-endian reader over the image bytes
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], ImageError> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(ImageError::Truncated { offset: self.pos });
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u16(&mut self) -> Result<u16, ImageError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ImageError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Parse a conversation image
pub fn parse(data: &[u8]) -> Result<ConvImage, ImageError> {
    let mut reader = Reader::new(data);

    let magic = reader.u32()?;
    if magic != IMAGE_MAGIC {
        warn!("unexpected conversation header {:#06x}", magic);
    }

    let code_size = reader.u16()?;
    reader.u16()?;
    reader.u16()?;
    let string_block = reader.u16()?;
    let reserved_globals = reader.u16()?;

    let mut image = ConvImage {
        string_block,
        reserved_globals,
        ..Default::default()
    };

    // Imports
    let count = reader.u16()?;
    for _ in 0..count {
        let name_len = reader.u16()? as usize;
        let name = String::from_utf8_lossy(reader.bytes(name_len)?).into_owned();

        let id = reader.u16()?;
        let _unknown = reader.u16()?;
        let import_type = reader.u16()?;
        let return_type = reader.u16()?;

        let data_type = match return_type {
            TYPE_VOID => DataType::Void,
            TYPE_INT => DataType::Int,
            TYPE_STRING => DataType::String,
            _ => return Err(ImageError::UnknownReturnType { name, return_type }),
        };

        match import_type {
            IMPORT_FUNCTION => {
                image
                    .imported_functions
                    .insert(id, ImportedItem::function(&name, data_type));
            }
            IMPORT_VARIABLE => {
                image
                    .imported_globals
                    .insert(id, ImportedItem::variable(&name, data_type));
            }
            _ => return Err(ImageError::UnknownImportType { name, import_type }),
        }
    }

    // Code segment
    image.code.reserve(code_size as usize);
    for _ in 0..code_size {
        image.code.push(reader.u16()?);
    }

    Ok(image)
}
