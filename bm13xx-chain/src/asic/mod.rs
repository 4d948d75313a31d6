//! ASIC protocol support.

pub mod bm13xx;
