pub mod error;
pub mod util;
pub mod working_dir;
