// crates/recut-media/src/helpers/mod.rs

pub mod frame;
pub mod seek;
