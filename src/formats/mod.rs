//! Binary format parsers used to locate memory in kernel images.

pub mod elf;
