#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod build_info;
pub mod cli;
pub mod config;
pub mod domain_xml;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod parse;
pub mod paths;
pub mod progress;
pub mod remote;
pub mod storage;
pub mod types;
pub mod util;
pub mod virsh;
pub mod vm_state;
