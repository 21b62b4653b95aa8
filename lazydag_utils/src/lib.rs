use std::{
    env,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    str::FromStr,
    thread,
};

use anyhow::{Context, Result};

pub const UPSTREAM_TASK_ID_KEY: &str = "upstream_task_id";
pub const UPSTREAM_TASK_RESULT_KEY: &str = "key";

const DEFAULT_N_WORKERS: usize = 4;
const DEFAULT_DATA_DIR: &str = "data/";

pub fn function_name_as_string<T>(_: T) -> String {
    let name = std::any::type_name::<T>();
    let name = &name.replace(['}', '{'], "");

    // Find and cut the rest of the path
    match name.rfind(':') {
        Some(pos) => name[pos + 1..].into(),
        None => name.into(),
    }
}

/// Reads the whole file at `path` as UTF-8 text.
///
/// The error names the path and keeps the `std::io::Error` as its source, so
/// a missing file can be detected with `err.downcast_ref::<std::io::Error>()`
/// and `ErrorKind::NotFound`.
pub fn read_text_file(path: &Path) -> Result<String> {
    let context = || format!("couldn't read {}", path.display());

    let mut file = File::open(path).with_context(context)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).with_context(context)?;
    Ok(contents)
}

pub fn get_default_max_parallelism() -> usize {
    thread::available_parallelism()
        .map(usize::from)
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

pub fn parse_env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value '{raw}' for {name}")),
        Err(_) => Ok(default),
    }
}

pub fn get_n_workers() -> Result<usize> {
    parse_env_or("LAZYDAG_N_WORKERS", DEFAULT_N_WORKERS)
}

pub fn get_data_dir() -> PathBuf {
    env::var("LAZYDAG_DATA_DIR")
        .unwrap_or(DEFAULT_DATA_DIR.to_string())
        .into()
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use super::*;

    fn hello_world(_: ()) {}

    #[test]
    fn test_function_name_as_string() {
        assert_eq!(function_name_as_string(hello_world), "hello_world");
        assert_eq!(function_name_as_string(|x: i64| x), "closure");
    }

    #[test]
    fn test_read_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scores.txt");
        std::fs::write(&path, "abc").unwrap();

        assert_eq!(read_text_file(&path).unwrap(), "abc");
    }

    #[test]
    fn test_read_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_text_file(&dir.path().join("missing.txt")).unwrap_err();

        let io_err = err.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(io_err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("missing.txt"));
    }

    #[test]
    fn test_parse_env_or_default() {
        let n: usize = parse_env_or("LAZYDAG_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(n, 7);
    }

    #[test]
    fn test_default_max_parallelism_is_positive() {
        assert!(get_default_max_parallelism() >= 1);
    }
}
