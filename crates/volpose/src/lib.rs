#![doc = env!("CARGO_PKG_DESCRIPTION")]

#[doc(inline)]
pub use volpose_calib as calib;

#[doc(inline)]
pub use volpose_repro as repro;
