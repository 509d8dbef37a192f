use std::path::PathBuf;

pub struct Context {
    pub cluster_data: PathBuf,
    pub conninfo: String,
}

impl Context {
    pub fn new(cluster_data: PathBuf, conninfo: String) -> Self {
        Self {
            cluster_data,
            conninfo,
        }
    }
}
