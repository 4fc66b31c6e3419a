use std::{
    fs::{self, OpenOptions, ReadDir},
    io::{self, Write as _},
    path::{Path, PathBuf},
    time::SystemTime,
};

pub mod error {
    use std::{io, path::PathBuf};

    pub type Result<T> = std::result::Result<T, self::Error>;

    type Msg = &'static str;

    #[derive(Debug, thiserror::Error)]
    pub enum Error {
        #[error("{0} ({1}): {2}")]
        SingleIO(Msg, PathBuf, #[source] io::Error),

        #[error("No entry matched glob '{0}' in '{1}'")]
        NoEntryMatchedGlob(::glob::Pattern, PathBuf),

        #[error("Directory is locked by another process (lock file: '{0}')")]
        Locked(PathBuf),
    }

    impl Error {
        /// Kind of the underlying I/O error, if any.
        pub fn io_kind(&self) -> Option<io::ErrorKind> {
            match self {
                Self::SingleIO(_, _, e) => Some(e.kind()),
                _ => None,
            }
        }
    }
}
pub use error::{Error, Result};

#[must_use]
pub fn mkdir_all(path: impl AsRef<Path>) -> Result<()> {
    let dir = path.as_ref();
    fs::create_dir_all(dir).map_err(|e| Error::SingleIO("Cannot create dir", dir.to_owned(), e))
}

#[must_use]
pub fn write_with_mkdir<P, C>(filepath: P, contents: C) -> Result<()>
where
    P: AsRef<Path>,
    C: AsRef<[u8]>,
{
    let filepath = filepath.as_ref();
    if let Some(dir) = filepath.parent() {
        self::mkdir_all(dir)?;
    }
    fs::write(filepath, contents)
        .map_err(|e| Error::SingleIO("Cannot write file", filepath.to_owned(), e))
}

/// Writes `contents` to a file that must not exist yet.
///
/// Fails with an `AlreadyExists` I/O kind when the path is taken, so that
/// concurrent writers never clobber each other.
#[must_use]
pub fn write_new<P, C>(filepath: P, contents: C) -> Result<()>
where
    P: AsRef<Path>,
    C: AsRef<[u8]>,
{
    let filepath = filepath.as_ref();
    if let Some(dir) = filepath.parent() {
        self::mkdir_all(dir)?;
    }
    let mut f = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(filepath)
        .map_err(|e| Error::SingleIO("Cannot create file", filepath.to_owned(), e))?;
    f.write_all(contents.as_ref())
        .map_err(|e| Error::SingleIO("Cannot write file", filepath.to_owned(), e))
}

#[must_use]
pub fn read(filepath: impl AsRef<Path>) -> Result<Vec<u8>> {
    fs::read(&filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn read_to_string(filepath: impl AsRef<Path>) -> Result<String> {
    fs::read_to_string(&filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn remove_file(filepath: impl AsRef<Path>) -> Result<()> {
    fs::remove_file(&filepath)
        .map_err(|e| Error::SingleIO("Cannot remove file", filepath.as_ref().to_owned(), e))
}

#[must_use]
pub fn read_dir(dir: impl AsRef<Path>) -> Result<ReadDir> {
    fs::read_dir(&dir).map_err(|e| Error::SingleIO("Cannot read dir", dir.as_ref().to_owned(), e))
}

/// Editor backups and hidden files: `*~`, `#*#` and `.*`.
///
/// ```
/// use fsutil::is_backup_or_hidden;
///
/// assert!(is_backup_or_hidden("1.in~"));
/// assert!(is_backup_or_hidden("#1.in#"));
/// assert!(is_backup_or_hidden(".1.in.swp"));
/// assert!(!is_backup_or_hidden("1.in"));
/// assert!(!is_backup_or_hidden("#1.in"));
/// ```
pub fn is_backup_or_hidden(filename: &str) -> bool {
    filename.starts_with('.')
        || filename.ends_with('~')
        || (filename.len() >= 2 && filename.starts_with('#') && filename.ends_with('#'))
}

#[cfg(unix)]
pub fn is_executable(path: impl AsRef<Path>) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: impl AsRef<Path>) -> bool {
    path.as_ref().is_file()
}

/// Lists regular files of `dir` sorted by file name.
pub fn list_files_sorted(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut files: Vec<_> = self::read_dir(&dir)?
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .map(|entry| entry.path())
        .collect();
    files.sort();
    Ok(files)
}

pub fn find_most_recently_modified_file(
    dir: impl AsRef<Path>,
    filename_pattern: &::glob::Pattern,
) -> Result<PathBuf> {
    let mut ans_filepath = None;
    let mut max_modified = SystemTime::UNIX_EPOCH;

    for entry in self::read_dir(&dir)?.filter_map(std::result::Result::ok) {
        let file_type = entry.file_type();
        let modified = entry.metadata().and_then(|info| info.modified());
        let (Ok(file_type), Ok(modified)) = (file_type, modified) else {
            continue
        };
        if file_type.is_dir() {
            continue;
        }
        let filename = entry.file_name();
        if filename_pattern.matches(filename.to_string_lossy().as_ref()) && max_modified < modified
        {
            max_modified = modified;
            ans_filepath = Some(entry.path());
        }
    }
    ans_filepath.ok_or_else(|| {
        Error::NoEntryMatchedGlob(filename_pattern.to_owned(), dir.as_ref().to_owned())
    })
}

/// Exclusive lock on a directory, held while the value lives.
///
/// Backed by a lock file created with create-new semantics; the file is
/// removed on drop.
#[derive(Debug)]
pub struct DirLock {
    lockfile: PathBuf,
}

impl DirLock {
    pub const FILENAME: &str = ".pjudge.lock";

    pub fn acquire(dir: impl AsRef<Path>) -> Result<Self> {
        let lockfile = dir.as_ref().join(Self::FILENAME);
        match self::write_new(&lockfile, std::process::id().to_string()) {
            Ok(()) => Ok(Self { lockfile }),
            Err(e) if e.io_kind() == Some(io::ErrorKind::AlreadyExists) => {
                Err(Error::Locked(lockfile))
            }
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.lockfile
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = self::remove_file(&self.lockfile) {
            log::warn!("{}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_new_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/hack-1.in");

        write_new(&path, "1\n").unwrap();
        let err = write_new(&path, "2\n").unwrap_err();

        assert_eq!(err.io_kind(), Some(io::ErrorKind::AlreadyExists));
        assert_eq!(read(&path).unwrap(), b"1\n");
    }

    #[test]
    fn dir_lock_is_exclusive_and_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();

        let lock = DirLock::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());
        assert!(matches!(
            DirLock::acquire(dir.path()),
            Err(Error::Locked(_))
        ));

        drop(lock);
        assert!(!dir.path().join(DirLock::FILENAME).exists());
        DirLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn list_files_sorted_skips_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mkdir(dir.path().join("b.in"), "").unwrap();
        write_with_mkdir(dir.path().join("a.in"), "").unwrap();
        mkdir_all(dir.path().join("c")).unwrap();

        let files = list_files_sorted(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.in", "b.in"]);
    }
}
