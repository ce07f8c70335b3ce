use std::fs;
use std::io;
use std::path::Path;

/// Filesystem checks used by the namespace managers. The live filespace
/// only exists on a host running a client, so the checks sit behind a
/// trait the same way process spawning does.
pub trait PathProbe {
    fn exists(&self, path: &Path) -> bool;
    fn stat(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Default)]
pub struct DiskProbe;

impl PathProbe for DiskProbe {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn stat(&self, path: &Path) -> io::Result<()> {
        fs::metadata(path).map(|_| ())
    }
}
