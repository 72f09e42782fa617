use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

/// Write `bytes` to `path` through a sibling temp file that replaces the
/// destination only once everything has been written. `None` means stdout.
pub fn write_output(path: Option<&Path>, bytes: &[u8]) -> io::Result<()> {
    let Some(path) = path else {
        let mut stdout = io::stdout().lock();
        stdout.write_all(bytes)?;
        return stdout.flush();
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    debug!(
        target: "snapshot_cli::output",
        path = %path.display(),
        bytes = bytes.len(),
        "output.persisted"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_destination_atomically() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("out.csv");
        write_output(Some(&path), b"a,b\r\n").expect("first write");
        write_output(Some(&path), b"c,d\r\n").expect("second write");
        assert_eq!(fs::read(&path).expect("read back"), b"c,d\r\n");

        let leftovers: Vec<_> = fs::read_dir(path.parent().expect("parent"))
            .expect("list dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("out.csv")]);
    }
}
