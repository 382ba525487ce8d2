use std::path::PathBuf;

/// Directories searched for runtime files such as `seglog.yml` and
/// `log4rs.yml`: the executable's directory and all of its ancestors, then
/// the current directory.
#[derive(Debug)]
pub struct WorkingDir {
    exec_pathes: Vec<PathBuf>,
}

impl WorkingDir {
    pub fn new() -> Self {
        let mut exec_pathes: Vec<PathBuf> = vec![];

        let exec_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|v| v.to_owned()));

        let mut iter_dir = exec_dir;
        while let Some(path) = iter_dir {
            iter_dir = path.parent().map(|v| v.to_owned());
            exec_pathes.push(path);
        }

        if let Ok(current_dir) = std::env::current_dir() {
            if !exec_pathes.contains(&current_dir) {
                exec_pathes.push(current_dir);
            }
        }

        WorkingDir { exec_pathes }
    }

    pub fn exec_pathes(&self) -> &Vec<PathBuf> {
        &self.exec_pathes
    }

    /// First existing `entry` under the search directories.
    pub fn get_path_by_entry(&self, entry: &str) -> Option<PathBuf> {
        self.exec_pathes
            .iter()
            .map(|path| path.join(entry))
            .find(|p| p.exists())
    }
}

impl Default for WorkingDir {
    fn default() -> Self {
        Self::new()
    }
}
