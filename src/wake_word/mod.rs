//! Fixed wake-word matcher ("ASR wake-word" in the work-mode enumeration).
//! A small always-on model, not general local ASR.

pub mod oww;

pub use oww::OpenWakeWord;
