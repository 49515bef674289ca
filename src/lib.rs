// Ideological Turing Test backend: asynchronous head-to-head matches.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod matches;
pub mod metrics;
pub mod prompts;
pub mod rate_limit;
pub mod sweeper;
