//! Binary-level tests: the main loop's state handling and end-to-end polling.

mod pipeline_tests;
