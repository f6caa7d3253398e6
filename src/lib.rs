#[macro_use]
extern crate log;

pub mod app;
pub mod cli;
pub mod crash;
pub mod daemon_client;
pub mod env;
pub mod error;
pub mod gui;
pub mod instance;
pub mod ipc;
pub mod logger;
pub mod managed_process;
pub mod ports;
pub mod procs;
pub mod ready_state;
pub mod readiness;
pub mod settings;
pub mod shutdown;
pub mod state_file;
pub mod supervisor;
pub mod web;

pub use miette::Result;
