#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

pub mod expand;
pub mod proxy;
pub mod schema;

#[path = "../shared/config.rs"]
pub mod config;
#[path = "../shared/step.rs"]
pub mod step;

#[path = "../pipeline/mod.rs"]
pub mod pipeline;

#[path = "../train/mod.rs"]
pub mod train;

#[path = "../store/mod.rs"]
pub mod store;

#[path = "../service/mod.rs"]
pub mod service;
