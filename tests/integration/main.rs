//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises the threaded
//! controller against the simulated GPIO.  No hardware is required.

mod controller_tests;
mod mock_hw;
