//! Unit test modules.

mod cadence_test;
mod ftms_parser_test;
