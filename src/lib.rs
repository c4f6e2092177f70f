pub mod config;
pub mod depth_service;
pub mod detect;
pub mod error;
pub mod frame;
pub mod inference;
pub mod localize;
pub mod pipeline;
pub mod protocol;
pub mod report;
