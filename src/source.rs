// Source provider: a readable byte stream plus name/mime hints

use std::fmt;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;

use crate::error::ImportError;

/// One user-supplied file, exclusively owned by the import that consumes it
pub struct ImportSource {
    reader: Box<dyn Read + Send>,
    file_name: Option<String>,
    mime: Option<String>,
}

impl ImportSource {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ImportError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            ImportError::SourceIo(format!("failed to open {}: {}", path.display(), e))
        })?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_string());

        Ok(ImportSource {
            reader: Box::new(file),
            file_name,
            mime: None,
        })
    }

    pub fn from_bytes(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        ImportSource {
            reader: Box::new(Cursor::new(bytes.into())),
            file_name: Some(file_name.into()),
            mime: None,
        }
    }

    /// Forward-only stream without a name
    pub fn from_reader(reader: impl Read + Send + 'static) -> Self {
        ImportSource {
            reader: Box::new(reader),
            file_name: None,
            mime: None,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    /// Label used in logs and error details
    pub fn display_name(&self) -> String {
        self.file_name
            .clone()
            .unwrap_or_else(|| "<stream>".to_string())
    }

    pub(crate) fn into_parts(self) -> (Box<dyn Read + Send>, Option<String>, Option<String>) {
        (self.reader, self.file_name, self.mime)
    }
}

impl fmt::Debug for ImportSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportSource")
            .field("file_name", &self.file_name)
            .field("mime", &self.mime)
            .finish_non_exhaustive()
    }
}
