use std::path::Path;

use serde::Serialize;

use crate::config::UploadSection;
use crate::error::{IngestError, IngestResult};

/// Result of the pre-flight checks on an upload. Rejections are data, not errors.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileValidation {
    pub valid: bool,
    pub error: Option<String>,
    pub file_size: Option<u64>,
    pub format: Option<String>,
}

impl FileValidation {
    fn rejected(error: String, file_size: Option<u64>, format: Option<String>) -> Self {
        Self {
            valid: false,
            error: Some(error),
            file_size,
            format,
        }
    }

    pub fn into_result(self) -> IngestResult<AcceptedFile> {
        match (self.valid, self.file_size, self.format) {
            (true, Some(file_size), Some(format)) => Ok(AcceptedFile { file_size, format }),
            _ => Err(IngestError::Validation(
                self.error
                    .unwrap_or_else(|| "file rejected".to_string()),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedFile {
    pub file_size: u64,
    pub format: String,
}

#[derive(Debug, Clone)]
pub struct FileValidator {
    max_file_size: u64,
    allowed_formats: Vec<String>,
}

impl FileValidator {
    pub fn new(section: &UploadSection) -> Self {
        Self {
            max_file_size: section.max_file_size,
            allowed_formats: section
                .allowed_formats
                .iter()
                .map(|format| format.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn validate(&self, path: &Path) -> FileValidation {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                return FileValidation::rejected(
                    format!("{} is not a regular file", path.display()),
                    None,
                    None,
                )
            }
            Err(_) => {
                return FileValidation::rejected(
                    format!("file not found: {}", path.display()),
                    None,
                    None,
                )
            }
        };
        let file_size = metadata.len();
        let format = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());

        if file_size > self.max_file_size {
            return FileValidation::rejected(
                format!(
                    "file size {} bytes exceeds the {} byte limit",
                    file_size, self.max_file_size
                ),
                Some(file_size),
                format,
            );
        }
        let Some(format) = format else {
            return FileValidation::rejected(
                format!("{} has no file extension", path.display()),
                Some(file_size),
                None,
            );
        };
        if !self.allowed_formats.iter().any(|allowed| allowed == &format) {
            return FileValidation::rejected(
                format!(
                    "unsupported format .{format}; allowed: {}",
                    self.allowed_formats.join(", ")
                ),
                Some(file_size),
                Some(format),
            );
        }

        FileValidation {
            valid: true,
            error: None,
            file_size: Some(file_size),
            format: Some(format),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn validator(max_file_size: u64) -> FileValidator {
        FileValidator::new(&UploadSection {
            max_file_size,
            allowed_formats: vec!["mp4".into(), ".MOV".into()],
        })
    }

    fn write(dir: &TempDir, name: &str, size: usize) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, vec![0u8; size]).unwrap();
        path
    }

    #[test]
    fn accepts_allowed_format_within_limit() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "match.mp4", 1024);
        let result = validator(2048).validate(&path);
        assert!(result.valid);
        assert_eq!(result.file_size, Some(1024));
        assert_eq!(result.format.as_deref(), Some("mp4"));
        assert!(result.error.is_none());
    }

    #[test]
    fn size_equal_to_limit_is_accepted() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "match.mp4", 2048);
        assert!(validator(2048).validate(&path).valid);
    }

    #[test]
    fn extension_check_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "training.MOV", 10);
        assert!(validator(2048).validate(&path).valid);
    }

    #[test]
    fn rejects_missing_oversized_and_unknown_files() {
        let dir = TempDir::new().unwrap();
        let validator = validator(2048);

        let missing = validator.validate(&dir.path().join("absent.mp4"));
        assert!(!missing.valid);
        assert!(missing.error.unwrap().contains("not found"));

        let oversized = validator.validate(&write(&dir, "big.mp4", 4096));
        assert!(!oversized.valid);
        assert_eq!(oversized.file_size, Some(4096));
        assert!(oversized.error.unwrap().contains("exceeds"));

        let unknown = validator.validate(&write(&dir, "clip.xyz", 10));
        assert!(!unknown.valid);
        assert!(unknown.error.unwrap().contains(".xyz"));

        let bare = validator.validate(&write(&dir, "noext", 10));
        assert!(!bare.valid);
    }

    #[test]
    fn rejection_converts_to_validation_error() {
        let dir = TempDir::new().unwrap();
        let err = validator(2048)
            .validate(&write(&dir, "clip.xyz", 10))
            .into_result()
            .unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
    }
}
