use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use axum::body::Bytes;
use chrono::Utc;
use parlor_types::models::MessageType;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::ChatError;

/// 5 MB per attachment.
pub const MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;

pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/pdf",
    "text/plain",
];

/// Longest stem kept from an uploaded name, so stored names stay well under
/// the 255-byte filesystem limit.
pub const MAX_STEM_BYTES: usize = 100;

/// Longest extension kept, dot included.
pub const MAX_EXTENSION_BYTES: usize = 16;

/// URL prefix attachments are served under.
pub const PUBLIC_PREFIX: &str = "uploads";

/// A file as received from the client, before validation.
#[derive(Debug, Clone)]
pub struct Upload {
    pub bytes: Bytes,
    pub original_name: String,
    pub mime_type: String,
    pub declared_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    pub stored_name: String,
    pub size: u64,
    pub message_type: MessageType,
}

impl StoredAttachment {
    pub fn public_path(&self) -> String {
        format!("{}/{}", PUBLIC_PREFIX, self.stored_name)
    }
}

/// Flat directory of uploaded files, each under a generated name that is
/// never reused.
pub struct AttachmentStore {
    dir: PathBuf,
}

impl AttachmentStore {
    pub async fn new(dir: PathBuf) -> std::io::Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Attachment directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_path(&self, stored_name: &str) -> PathBuf {
        self.dir.join(stored_name)
    }

    /// Validate an upload and write it to disk. Each check fails with its own
    /// error and nothing touches the disk until all of them pass.
    pub async fn store(&self, upload: Option<Upload>) -> Result<StoredAttachment, ChatError> {
        let upload = upload.ok_or(ChatError::NoFile)?;

        let size = upload.declared_size.max(upload.bytes.len() as u64);
        if size > MAX_ATTACHMENT_BYTES {
            warn!("Rejected upload '{}': {} bytes", upload.original_name, size);
            return Err(ChatError::TooLarge {
                max: MAX_ATTACHMENT_BYTES,
            });
        }

        if !ALLOWED_MIME_TYPES.contains(&upload.mime_type.as_str()) {
            warn!("Rejected upload '{}': type {}", upload.original_name, upload.mime_type);
            return Err(ChatError::UnsupportedType(upload.mime_type));
        }

        let stored_name = format!(
            "{}_{}_{}",
            Uuid::new_v4().simple(),
            Utc::now().timestamp(),
            cap_file_name(&sanitize_file_name(&upload.original_name))
        );
        self.write_new(&stored_name, &upload.bytes).await?;

        info!("Stored attachment {} ({} bytes)", stored_name, size);
        Ok(StoredAttachment {
            stored_name,
            size,
            message_type: MessageType::for_mime(&upload.mime_type),
        })
    }

    async fn write_new(&self, stored_name: &str, bytes: &[u8]) -> Result<(), ChatError> {
        let path = self.file_path(stored_name);
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| self.write_error(&path, e))?;

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&path).await {
                error!("Failed to remove partial attachment {}: {}", path.display(), cleanup);
            }
            return Err(self.write_error(&path, e));
        }
        Ok(())
    }

    fn write_error(&self, path: &Path, e: std::io::Error) -> ChatError {
        error!("Failed to write attachment {}: {}", path.display(), e);
        ChatError::Persistence(format!(
            "could not write to upload directory {}",
            self.dir.display()
        ))
    }

    /// Remove a stored attachment. A file that is already gone is not an error.
    pub async fn delete(&self, stored_name: &str) -> std::io::Result<()> {
        match fs::remove_file(self.file_path(stored_name)).await {
            Ok(()) => {
                info!("Deleted attachment {}", stored_name);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Attachment {} already gone", stored_name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

/// Replace everything outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Trim a sanitized name to a bounded length, keeping a short extension.
/// Input is ASCII, so byte slicing is safe.
pub fn cap_file_name(name: &str) -> String {
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= MAX_EXTENSION_BYTES => name.split_at(dot),
        _ => (name, ""),
    };
    format!("{}{}", &stem[..stem.len().min(MAX_STEM_BYTES)], ext)
}
