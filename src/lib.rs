pub mod aggregate;
pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod flatten;
pub mod input;
pub mod openalex;
pub mod output;
pub mod package;
pub mod resolver;
pub mod store;
