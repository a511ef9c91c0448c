// uwconv-wasm: Conversation decompiler for the browser
//
// This crate wraps the uwconv decompiler for use inside a WebAssembly
// environment. It compiles to wasm32-unknown-unknown via wasm-bindgen, so a
// web page can turn conversation images into readable source.

use wasm_bindgen::prelude::*;

/// Decompile a conversation image to source text.
///
/// `strings` holds the conversation's string block, one string per line
/// with `\n` escapes; pass an empty string when it isn't available.
#[wasm_bindgen]
pub fn decompile_conversation(image: &[u8], strings: String) -> Result<String, JsValue> {
    decompile_inner(image, &strings).map_err(|e| JsValue::from_str(&format!("{:#}", e)))
}

/// Disassemble a conversation image, with function boundaries and callers
#[wasm_bindgen]
pub fn disassemble_conversation(image: &[u8], strings: String) -> Result<String, JsValue> {
    disassemble_inner(image, &strings).map_err(|e| JsValue::from_str(&format!("{:#}", e)))
}

fn decompile_inner(image: &[u8], strings: &str) -> anyhow::Result<String> {
    if image.is_empty() {
        anyhow::bail!("Empty conversation image");
    }
    uwconv::decompile(image, uwconv::parse_strings(strings), &uwconv::RenderOptions::default())
}

fn disassemble_inner(image: &[u8], strings: &str) -> anyhow::Result<String> {
    if image.is_empty() {
        anyhow::bail!("Empty conversation image");
    }
    uwconv::disassemble(image, uwconv::parse_strings(strings))
}

/// Get version string
#[wasm_bindgen]
pub fn version() -> String {
    format!("uwconv-wasm {}", env!("CARGO_PKG_VERSION"))
}
