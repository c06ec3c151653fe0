pub mod audit;
pub mod boundary;
pub mod config;
pub mod paths;
pub mod record;
pub mod sessions;
pub mod splice;
pub mod strip;
pub mod transcript;
pub mod tree;
pub mod util;
pub mod warn;
pub mod writer;
