pub mod engine_features;
pub mod simple_makefiles;
pub mod specific_features;
