pub use crate::{
    config::{read_config, Settings},
    invite::{CommandEvent, InviteHandler},
    message::Reply,
};

pub mod api;
pub mod auth;
pub mod config;
pub mod dialect;
pub mod invite;
pub mod message;

#[cfg(test)]
mod test_support;
