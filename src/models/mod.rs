//! Plain data: options, settings file and tickets.

pub mod options;
pub mod settings;
pub mod ticket;
