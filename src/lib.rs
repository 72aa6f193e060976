//! Operand-stack interpretation and class-hierarchy reasoning for JVM
//! bytecode, plus the scanner, method walker and rules built on them.

pub mod cfg;
pub mod classfile;
pub mod constant_pool;
pub mod descriptor;
pub mod engine;
pub mod interpreter;
pub mod ir;
pub mod opcodes;
pub mod rules;
pub mod scan;
pub mod types;
pub mod value;
