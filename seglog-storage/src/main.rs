use seglog_core::common::{
    error::Error,
    util::{setup_env_logger, setup_log4rs_from_file},
    working_dir::WorkingDir,
};
use seglog_storage::{
    config::{Config, DEFAULT_CONFIG_FILE},
    segment::Segment,
};

fn main() -> Result<(), Error> {
    let wd = WorkingDir::new();
    setup_log(&wd)?;

    let config = match wd.get_path_by_entry(DEFAULT_CONFIG_FILE) {
        Some(cfg_file) => Config::from_file(cfg_file)?,
        None => Config::new(),
    };

    let data_dir = config.data_dir()?;
    let mut segment = Segment::new(
        &data_dir,
        config.segment.initial_offset,
        config.segment.clone(),
    )?;

    let mut offsets = vec![];
    for value in std::env::args().skip(1) {
        match segment.append(value.as_bytes()) {
            Ok(offset) => offsets.push(offset),
            Err(error) if error.is_capacity_exhausted() => {
                log::warn!("{error}, skip the remaining values");
                break;
            }
            Err(error) => Err(error)?,
        }
    }

    for offset in offsets {
        let value = segment.read(offset)?;
        log::info!("{}: {}", offset, String::from_utf8_lossy(&value));
    }

    log::info!(
        "segment {} in {} holds offsets up to {}, maxed: {}",
        segment.base_offset(),
        data_dir.display(),
        segment.next_offset(),
        segment.is_maxed()?
    );

    segment.close()
}

fn setup_log(wd: &WorkingDir) -> Result<(), Error> {
    match wd.get_path_by_entry("log4rs.yml") {
        Some(file_path) => setup_log4rs_from_file(file_path),
        None => {
            setup_env_logger();
            Ok(())
        }
    }
}
