//! External conversion of legacy binary workbooks (XLS/XLSB) into XLSX.
//!
//! The converter is a separate process (LibreOffice by default) invoked
//! synchronously from the caller's point of view. A conversion that does not
//! finish within the timeout is abandoned: the process is not killed and may
//! keep running in the background.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

pub const DEFAULT_CONVERTER_PROGRAM: &str = "soffice";
pub const DEFAULT_CONVERTER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("failed to start converter '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("converter did not finish within {0:?}")]
    Timeout(Duration),

    #[error("converter exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("converter produced no output at {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("cannot derive an output name from {}", .0.display())]
    InvalidInput(PathBuf),
}

/// Turns a binary workbook into an XLSX file inside `out_dir`
pub trait Converter {
    fn convert(
        &self,
        input: &Path,
        out_dir: &Path,
    ) -> impl Future<Output = Result<PathBuf, ConversionError>> + Send;
}

/// Converter backed by an external program
///
/// Invoked as `<program> <args...> --convert-to xlsx --outdir <out_dir> <input>`
/// and expected to leave `<out_dir>/<input stem>.xlsx` behind.
#[derive(Debug, Clone)]
pub struct ExternalConverter {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl Default for ExternalConverter {
    fn default() -> Self {
        Self::soffice(DEFAULT_CONVERTER_PROGRAM, DEFAULT_CONVERTER_TIMEOUT)
    }
}

impl ExternalConverter {
    /// LibreOffice in headless mode
    pub fn soffice(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: vec!["--headless".to_string()],
            timeout,
        }
    }
}

/// Path the converter is expected to produce for `input`
pub fn expected_output(input: &Path, out_dir: &Path) -> Result<PathBuf, ConversionError> {
    let stem = input
        .file_stem()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConversionError::InvalidInput(input.to_path_buf()))?;
    let mut name = stem.to_os_string();
    name.push(".xlsx");
    Ok(out_dir.join(name))
}

impl Converter for ExternalConverter {
    async fn convert(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, ConversionError> {
        let expected = expected_output(input, out_dir)?;

        log::info!(
            "Converting {} with '{}' (timeout {:?})",
            input.display(),
            self.program,
            self.timeout
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--convert-to")
            .arg("xlsx")
            .arg("--outdir")
            .arg(out_dir)
            .arg(input)
            .stdin(Stdio::null());

        // Dropping the pending output on timeout leaves the process running.
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|source| ConversionError::Spawn {
                program: self.program.clone(),
                source,
            })?,
            Err(_) => {
                log::warn!("Converter abandoned after {:?}", self.timeout);
                return Err(ConversionError::Timeout(self.timeout));
            }
        };

        if !output.status.success() {
            return Err(ConversionError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        if !expected.is_file() {
            return Err(ConversionError::MissingOutput(expected));
        }

        log::debug!("Converted file at {}", expected.display());
        Ok(expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str, timeout: Duration) -> ExternalConverter {
        // `sh -c <script> sh` makes the converter arguments $1..$5:
        // --convert-to xlsx --outdir <out_dir> <input>
        ExternalConverter {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string(), "sh".to_string()],
            timeout,
        }
    }

    #[test]
    fn test_expected_output_name() {
        let out = expected_output(Path::new("/tmp/upload/informe.xls"), Path::new("/tmp/out")).unwrap();
        assert_eq!(out, PathBuf::from("/tmp/out/informe.xlsx"));
    }

    #[test]
    fn test_expected_output_keeps_inner_dots() {
        let out = expected_output(Path::new("informe.2024.xlsb"), Path::new("/tmp/out")).unwrap();
        assert_eq!(out, PathBuf::from("/tmp/out/informe.2024.xlsx"));
    }

    #[test]
    fn test_expected_output_rejects_empty_name() {
        assert!(matches!(
            expected_output(Path::new("/"), Path::new("/tmp/out")),
            Err(ConversionError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_default_is_headless_soffice() {
        let conv = ExternalConverter::default();
        assert_eq!(conv.program, "soffice");
        assert_eq!(conv.args, vec!["--headless"]);
        assert_eq!(conv.timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let conv = ExternalConverter::soffice("definitely-not-a-converter-xyz", Duration::from_secs(5));
        let dir = tempfile::tempdir().unwrap();
        let err = conv
            .convert(&dir.path().join("in.xls"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_returns_output_path() {
        let conv = shell(r#"touch "$4/$(basename "$5" .xls).xlsx""#, Duration::from_secs(10));
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("informe.xls");
        std::fs::write(&input, b"legacy").unwrap();

        let out = conv.convert(&input, dir.path()).await.unwrap();
        assert_eq!(out, dir.path().join("informe.xlsx"));
        assert!(out.is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let conv = shell("echo broken >&2; exit 3", Duration::from_secs(10));
        let dir = tempfile::tempdir().unwrap();
        let err = conv.convert(&dir.path().join("a.xls"), dir.path()).await.unwrap_err();
        match err {
            ConversionError::Failed { stderr, .. } => assert_eq!(stderr, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_output_is_failure() {
        let conv = shell("exit 0", Duration::from_secs(10));
        let dir = tempfile::tempdir().unwrap();
        let err = conv.convert(&dir.path().join("a.xls"), dir.path()).await.unwrap_err();
        assert!(matches!(err, ConversionError::MissingOutput(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_abandons_conversion() {
        let conv = shell("sleep 5", Duration::from_millis(200));
        let dir = tempfile::tempdir().unwrap();
        let err = conv.convert(&dir.path().join("a.xls"), dir.path()).await.unwrap_err();
        assert!(matches!(err, ConversionError::Timeout(_)));
    }
}
