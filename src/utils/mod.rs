//! helpers shared by the on-disk structures
pub mod digest;
pub mod fs_size_calculator;
#[cfg(test)]
pub(crate) mod init_test_environment;
pub mod time_util;
pub mod traits;
