mod common;

mod catalog_tests;
mod queue_tests;
mod schedule_tests;
mod task_tests;
