#![doc = include_str!("../README.md")]

mod block;
mod cache;
mod config;
mod error;
mod id;
mod manager;
mod registration;
mod service;
mod source;

pub use crate::block::*;
pub use crate::cache::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::id::*;
pub use crate::manager::*;
pub use crate::registration::*;
pub use crate::service::*;
pub use crate::source::*;
