pub mod asm;
pub mod charset;
pub mod config;
pub mod decompile;
pub mod disasm;
pub mod error;
pub mod keys;
pub mod symbols;
pub mod text;

pub use asm::{Assembled, Assembler, OutputFormat, TargetMode};
pub use charset::Charset;
pub use config::{Tables, TargetConfig};
pub use decompile::{decompile, Decompiled, Decompiler};
pub use disasm::Disassembly;
pub use error::{CompileError, DecompileError, Error, ErrorClass, Note};
pub use keys::KeyCost;
pub use symbols::{AddressTable, Registry};
