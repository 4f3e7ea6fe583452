use std::path::{Path, PathBuf};

use stacked_errors::{Result, StackableErr};

/// Canonicalizes `path` and checks that it exists, regardless of whether it is
/// a file or directory.
pub async fn acquire_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref().to_owned();
    tokio::task::spawn_blocking(move || dunce::canonicalize(&path).stack())
        .await
        .stack()?
}

/// [acquire_path] plus a check that the result is a file.
pub async fn acquire_file_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let canonical = acquire_path(path).await?;
    if !canonical.is_file() {
        return Err(stacked_errors::Error::from_kind_locationless(format!(
            "acquire_file_path -> \"{}\" is not a file",
            canonical.display()
        )));
    }
    Ok(canonical)
}

/// [acquire_path] plus a check that the result is a directory.
pub async fn acquire_dir_path(path: impl AsRef<Path>) -> Result<PathBuf> {
    let canonical = acquire_path(path).await?;
    if !canonical.is_dir() {
        return Err(stacked_errors::Error::from_kind_locationless(format!(
            "acquire_dir_path -> \"{}\" is not a directory",
            canonical.display()
        )));
    }
    Ok(canonical)
}

/// Initializes a [tracing_subscriber] `EnvFilter` subscriber reading from the
/// `RUST_LOG` environment variable, defaulting to `info` if unset. Meant to be
/// called once at the top of `main`.
pub fn std_init() -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).try_init().map_err(|e| {
        stacked_errors::Error::from_kind_locationless(format!(
            "std_init -> subscriber already set: {e}"
        ))
    })
}

/// Installs a `ctrlc` handler that sets [CTRLC_ISSUED] to true. Should be
/// called at most once per process.
pub fn ctrlc_init() -> Result<()> {
    ctrlc::set_handler(|| {
        CTRLC_ISSUED.store(true, std::sync::atomic::Ordering::SeqCst);
    })
    .map_err(|e| stacked_errors::Error::from_kind_locationless(format!("ctrlc_init -> {e}")))
}

/// Set to `true` once a `SIGINT`/`SIGTERM` has been observed by the handler
/// installed by [ctrlc_init]. The [dispatcher](crate::dispatcher) polls this
/// to begin an abort-and-clean-up sequence.
pub static CTRLC_ISSUED: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

/// Returns `"{name}-{six random hex chars}"`, used to derive per-run network
/// and temporary file names that cannot collide across concurrent runs.
pub fn random_name(name: impl std::fmt::Display) -> String {
    format!("{name}-{}", &uuid::Uuid::new_v4().to_string()[..6])
}
