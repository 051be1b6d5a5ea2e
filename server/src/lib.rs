#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod ci;
pub mod command;
pub mod engine;
pub mod event;
pub mod github;
pub mod reconcile;
pub mod store;
pub mod webhook;

mod utils;
