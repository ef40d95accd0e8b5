pub mod calc_config;
pub mod core;
pub mod grades;
pub mod weights;
