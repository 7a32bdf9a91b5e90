//! Integration test modules

mod pipeline_test;
mod store_test;
mod supervisor_test;
