//! Event-dispatch daemon for the shake map pipeline: receives earthquake
//! triggers over TCP, schedules magnitude-tiered reprocessing, and
//! supervises the external map generator as child processes.

pub mod cli;
pub mod config;
pub mod events;
pub mod pidfile;
pub mod queue;
pub mod workers;
