//! Small ambient-stack helpers that don't belong to any one component

pub mod trace;
