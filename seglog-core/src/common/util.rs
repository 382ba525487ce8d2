use std::path::Path;

use crate::common::error::{Error, Result};

/// Initialises the global logger from a log4rs yaml file.
pub fn setup_log4rs_from_file<P: AsRef<Path>>(file_path: P) -> Result<()> {
    let file_path = file_path.as_ref();

    log4rs::init_file(file_path, Default::default()).map_err(|error| {
        Error::new_config(
            Some(error.into()),
            Some(format!("init log4rs from {} failed", file_path.display())),
        )
    })
}

/// Gives every log record to `env_logger`, used when no log4rs file exists.
/// Calling it more than once is harmless.
pub fn setup_env_logger() {
    dotenv::dotenv().ok();
    env_logger::try_init().ok();
}
