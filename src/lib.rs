//! Outreach mailer: paced, resumable personalized email sends.

pub mod checkpoint;
pub mod composer;
pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod recipients;
pub mod transport;
