pub mod config;
pub mod image2text;
pub mod logger;
pub mod translate;
