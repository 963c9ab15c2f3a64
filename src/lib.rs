pub mod app;
pub mod codec;
pub mod config;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod lazy_view;
pub mod model;
pub mod output;
pub mod patches;
pub mod pyramid;
pub mod resample;
pub mod store;
pub mod tiling;
