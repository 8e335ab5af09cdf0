pub mod caption;
pub mod config;
pub mod engine;
pub mod error;
pub mod facebook;
pub mod feed;
pub mod ledger;
pub mod media;
pub mod pages;
pub mod pipeline;
pub mod publish;
