pub mod checksum;
pub mod process;
