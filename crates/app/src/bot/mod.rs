/**
 * Chat front end: command parsing, update
 *  dispatch, reply rendering, the polling loop
 *  and the background job worker.
 */
pub mod command;
mod dispatch;
pub mod render;
pub mod updates;
mod worker;

pub use dispatch::{Dispatcher, Outbound};
pub use worker::run_worker;
