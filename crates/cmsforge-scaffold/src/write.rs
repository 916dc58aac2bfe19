use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use cmsforge_provision_api::ScaffoldError;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ScaffoldError + '_ {
    move |source| ScaffoldError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `content` via a temporary file in the same directory, then rename.
///
/// Line endings are normalized to LF so generated files are identical on
/// every platform.
pub(crate) fn write_file_atomic(path: &Path, content: &str) -> Result<(), ScaffoldError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(io_error(parent))?;

    let normalized = content.replace("\r\n", "\n");
    let mut temp = NamedTempFile::new_in(parent).map_err(io_error(parent))?;
    temp.write_all(normalized.as_bytes()).map_err(io_error(path))?;
    temp.as_file().sync_all().map_err(io_error(path))?;
    temp.persist(path).map_err(|e| io_error(path)(e.error))?;
    Ok(())
}
