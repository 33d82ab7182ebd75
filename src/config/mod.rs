pub mod defs;
pub mod run;
