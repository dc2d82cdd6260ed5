pub mod config;
pub mod db;
pub mod dispatcher;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod media;
pub mod model;
pub mod pipeline;
pub mod queue;
pub mod schedule;
pub mod selector;
pub mod youtube;
