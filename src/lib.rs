pub mod aws;
pub mod config;
pub mod error;
pub mod select;
pub mod template;
pub mod wait;
