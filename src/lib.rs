//! # dev-stress
//!
//! A device stressor: walks a device namespace (normally `/dev`) and hammers
//! every reachable node with short, time-boxed batteries of control-code
//! probes, looking for kernel hangs, crashes and leaks rather than checking
//! any device for correct behaviour.
//!
//! ## Architecture
//!
//! - **stressor**: the stressor contract, exit statuses and the fork-shared run state
//! - **registry**: per-worker memo of paths that must not be visited again
//! - **cache**: positive sub-classification cache and the published path, under one lock
//! - **namespace**: directory listing and bounded opens, behind a trait
//! - **subclass**: SCSI-backed block device detection via the sysfs registry
//! - **ioctl**: request encoding and descriptor-driven probe sets
//! - **probes**: per-class batteries (block, optical, terminal, console, memory, ...)
//! - **dispatch**: ordered prefix to battery table built for the running platform
//! - **probe**: the budgeted per-device probe sequence
//! - **scan**: recursive walk with hash ordering, throttling and memoization
//! - **worker**: walker plus background exerciser threads
//! - **supervisor**: forked worker, termination classification and restarts
//! - **report**: JSON run summary

pub mod cache;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod ioctl;
pub mod namespace;
pub mod probe;
pub mod probes;
pub mod registry;
pub mod report;
pub mod scan;
pub mod stressor;
pub mod subclass;
pub mod supervisor;
pub mod worker;
