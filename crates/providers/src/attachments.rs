//! Files to inline `image_url` content parts.

use std::io::ErrorKind;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use local_llm_core::error::AttachmentError;
use local_llm_core::message::AttachmentRef;
use local_llm_core::provider::{ContentPart, ImageUrl};
use tracing::debug;

const PDF_MIME: &str = "application/pdf";

/// Encode every attachment, in input order.
///
/// File reads happen on the blocking pool. The first failing attachment aborts
/// the whole batch.
pub async fn encode_attachments(
    files: Vec<AttachmentRef>,
) -> Result<Vec<ContentPart>, AttachmentError> {
    let mut parts = Vec::with_capacity(files.len());

    for file in files {
        let path = file.path.clone();
        let part = tokio::task::spawn_blocking(move || encode_one(&file))
            .await
            .map_err(|e| AttachmentError::Read {
                path,
                reason: e.to_string(),
            })??;
        parts.push(part);
    }

    Ok(parts)
}

fn encode_one(file: &AttachmentRef) -> Result<ContentPart, AttachmentError> {
    let path = file.path.as_path();
    let mime = resolve_mime(file);

    if !path.exists() {
        return Err(AttachmentError::NotFound(path.to_path_buf()));
    }

    let essence = mime.split(';').next().unwrap_or_default().trim();
    let is_pdf = essence == PDF_MIME;
    if !is_pdf && !essence.starts_with("image/") {
        return Err(AttachmentError::UnsupportedMediaType {
            path: path.to_path_buf(),
            mime,
        });
    }

    let bytes = read_file(path)?;
    let url = format!("data:{mime};base64,{}", STANDARD.encode(&bytes));

    let detail = if is_pdf {
        debug!(
            path = %path.display(),
            "Sending PDF as image_url data URI; not every server accepts this"
        );
        None
    } else {
        Some("auto".to_string())
    };

    debug!(path = %path.display(), mime = %mime, size = bytes.len(), "Encoded attachment");

    Ok(ContentPart::ImageUrl {
        image_url: ImageUrl { url, detail },
    })
}

fn resolve_mime(file: &AttachmentRef) -> String {
    match &file.mime_type {
        Some(hint) if !hint.trim().is_empty() => hint.trim().to_ascii_lowercase(),
        _ => mime_guess::from_path(&file.path)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string(),
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, AttachmentError> {
    std::fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => AttachmentError::NotFound(path.to_path_buf()),
        _ => AttachmentError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn url_of(part: &ContentPart) -> (&str, Option<&str>) {
        match part {
            ContentPart::ImageUrl { image_url } => (&image_url.url, image_url.detail.as_deref()),
            other => panic!("expected image_url part, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn png_becomes_data_uri_with_auto_detail() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "pixel.png", b"\x89PNG fake");

        let parts = encode_attachments(vec![AttachmentRef::new(&path)])
            .await
            .unwrap();
        assert_eq!(parts.len(), 1);

        let (url, detail) = url_of(&parts[0]);
        assert_eq!(
            url,
            format!("data:image/png;base64,{}", STANDARD.encode(b"\x89PNG fake"))
        );
        assert_eq!(detail, Some("auto"));
    }

    #[tokio::test]
    async fn pdf_has_no_detail() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "report.pdf", b"%PDF-1.7");

        let parts = encode_attachments(vec![AttachmentRef::new(&path)])
            .await
            .unwrap();
        let (url, detail) = url_of(&parts[0]);
        assert!(url.starts_with("data:application/pdf;base64,"));
        assert_eq!(detail, None);
    }

    #[tokio::test]
    async fn text_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "notes.txt", b"hello");

        let err = encode_attachments(vec![AttachmentRef::new(&path)])
            .await
            .unwrap_err();
        match err {
            AttachmentError::UnsupportedMediaType { path: p, mime } => {
                assert_eq!(p, path);
                assert_eq!(mime, "text/plain");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "blob.zzzunknown", b"\x00\x01");

        let err = encode_attachments(vec![AttachmentRef::new(&path)])
            .await
            .unwrap_err();
        assert!(matches!(err, AttachmentError::UnsupportedMediaType { .. }));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.png");

        let err = encode_attachments(vec![AttachmentRef::new(&path)])
            .await
            .unwrap_err();
        assert!(matches!(err, AttachmentError::NotFound(p) if p == path));
    }

    #[tokio::test]
    async fn hint_overrides_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "scan.bin", b"jpegbytes");

        let parts = encode_attachments(vec![
            AttachmentRef::new(&path).with_mime_type("image/jpeg"),
        ])
        .await
        .unwrap();
        let (url, _) = url_of(&parts[0]);
        assert!(url.starts_with("data:image/jpeg;base64,"));
    }

    #[tokio::test]
    async fn pdf_hint_with_parameters_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "upload", b"%PDF-1.4");

        let parts = encode_attachments(vec![
            AttachmentRef::new(&path).with_mime_type("application/pdf; charset=binary"),
        ])
        .await
        .unwrap();
        let (url, detail) = url_of(&parts[0]);
        assert!(url.starts_with("data:application/pdf; charset=binary;base64,"));
        assert_eq!(detail, None);
    }

    #[tokio::test]
    async fn output_follows_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(&dir, "a.png", b"a");
        let b = write(&dir, "b.pdf", b"b");
        let c = write(&dir, "c.gif", b"c");

        let parts = encode_attachments(vec![
            AttachmentRef::new(&a),
            AttachmentRef::new(&b),
            AttachmentRef::new(&c),
        ])
        .await
        .unwrap();

        let prefixes: Vec<&str> = parts
            .iter()
            .map(|p| url_of(p).0.split(';').next().unwrap())
            .collect();
        assert_eq!(
            prefixes,
            vec!["data:image/png", "data:application/pdf", "data:image/gif"]
        );
    }

    #[tokio::test]
    async fn empty_input_is_empty_output() {
        assert!(encode_attachments(Vec::new()).await.unwrap().is_empty());
    }
}
