use crate::error::{Error, Result};
use log::{debug, info};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const DEFAULT_TARGET: &str = "x86_64-unknown-linux-gnu";
pub const LAMBDA_BIN: &str = "lambda";

/// Name the `provided.al2023` runtime executes.
const BOOTSTRAP: &str = "bootstrap";

/// Where cargo leaves the release build of the Lambda binary for `target`.
pub fn binary_path(target_dir: &Path, target: &str) -> PathBuf {
    target_dir.join(target).join("release").join(LAMBDA_BIN)
}

/// Arguments for a release build of the Lambda binary into `target_dir`.
pub fn build_args(target: &str, target_dir: &Path) -> Vec<String> {
    vec![
        "build".to_string(),
        "--release".to_string(),
        "--target".to_string(),
        target.to_string(),
        "--target-dir".to_string(),
        target_dir.display().to_string(),
        "--bin".to_string(),
        LAMBDA_BIN.to_string(),
    ]
}

/// Compiles the Lambda binary in release mode for `target`, leaving it at
/// [`binary_path`].
pub fn build(target: &str, target_dir: &Path) -> Result<()> {
    let args = build_args(target, target_dir);
    info!("Running cargo {}", args.join(" "));

    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        return Err(Error::provisioning(
            "build",
            format!("cargo exited with {status}"),
        ));
    }

    Ok(())
}

/// Writes `binary` into a new zip at `zip_path` as an executable `bootstrap`.
pub fn zip_bootstrap(binary: &Path, zip_path: &Path) -> Result<()> {
    let contents = fs::read(binary).map_err(|e| {
        Error::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read {}: {e}", binary.display()),
        ))
    })?;

    if let Some(parent) = zip_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut zip = ZipWriter::new(File::create(zip_path)?);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);

    zip.start_file(BOOTSTRAP, options)
        .map_err(|e| Error::provisioning("package", e))?;
    zip.write_all(&contents)?;
    zip.finish().map_err(|e| Error::provisioning("package", e))?;

    debug!(
        "Packaged {} ({} bytes) into {}",
        binary.display(),
        contents.len(),
        zip_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::ZipArchive;

    #[test]
    fn test_binary_path() {
        assert_eq!(
            Path::new("target/x86_64-unknown-linux-gnu/release/lambda"),
            binary_path(Path::new("target"), DEFAULT_TARGET)
        );
    }

    #[test]
    fn test_build_args() {
        assert_eq!(
            vec![
                "build",
                "--release",
                "--target",
                DEFAULT_TARGET,
                "--target-dir",
                "out",
                "--bin",
                "lambda",
            ],
            build_args(DEFAULT_TARGET, Path::new("out"))
        );
    }

    #[test]
    fn test_build_args_match_binary_path() {
        let target_dir = Path::new("out");
        let args = build_args(DEFAULT_TARGET, target_dir);

        let flag_value = |flag: &str| {
            let i = args.iter().position(|arg| arg == flag).unwrap();
            args[i + 1].clone()
        };

        let built = Path::new(&flag_value("--target-dir"))
            .join(flag_value("--target"))
            .join("release")
            .join(flag_value("--bin"));
        assert_eq!(binary_path(target_dir, DEFAULT_TARGET), built);
    }

    #[test]
    fn test_zip_bootstrap() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("lambda");
        fs::write(&binary, b"\x7fELF not really").unwrap();

        let zip_path = dir.path().join("dist").join("getstories.zip");
        zip_bootstrap(&binary, &zip_path).unwrap();

        let mut archive = ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        assert_eq!(1, archive.len());

        let mut entry = archive.by_name(BOOTSTRAP).unwrap();
        assert_eq!(Some(0o755), entry.unix_mode().map(|mode| mode & 0o777));

        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).unwrap();
        assert_eq!(b"\x7fELF not really".to_vec(), contents);
    }

    #[test]
    fn test_zip_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let result = zip_bootstrap(&dir.path().join("missing"), &dir.path().join("out.zip"));

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(!dir.path().join("out.zip").exists());
    }
}
