use crate::error::IngestError;
use crate::models::{DocumentKey, IngestionReport};
use crate::orchestrator::Pipeline;
use crate::traits::{ObjectStore, VectorIndex};
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};
use walkdir::WalkDir;

const DOCUMENT_CONCURRENCY: usize = 4;
const FALLBACK_USER_ID: &str = "dev-user";

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

fn upload_layout() -> Result<&'static Regex, IngestError> {
    static LAYOUT: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    LAYOUT
        .get_or_init(|| Regex::new(r"^user/([^/]+)/papers/([^/]+)"))
        .as_ref()
        .map_err(|error| IngestError::Regex(error.clone()))
}

/// Reads `(user_id, paper_id)` from keys shaped `user/<user_id>/papers/<file>`.
/// Any other key belongs to the fallback development user and uses the file
/// stem as paper id.
pub fn derive_document_key(object_key: &str) -> Result<DocumentKey, IngestError> {
    let (user_id, file_name) = match upload_layout()?.captures(object_key) {
        Some(captures) => (captures[1].to_string(), captures[2].to_string()),
        None => (
            FALLBACK_USER_ID.to_string(),
            object_key.rsplit('/').next().unwrap_or_default().to_string(),
        ),
    };

    let paper_id = match file_name.rsplit_once('.') {
        Some((stem, _extension)) => stem,
        None => file_name.as_str(),
    };
    if paper_id.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "cannot derive a paper id from key {object_key}"
        )));
    }

    Ok(DocumentKey::new(user_id, paper_id))
}

pub fn paper_id_from_path(path: &Path) -> Result<String, IngestError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            IngestError::InvalidArgument(format!("path has no usable file name: {}", path.display()))
        })
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

pub struct FolderIngestionReport {
    pub documents: Vec<IngestionReport>,
    pub skipped_files: Vec<SkippedPdf>,
}

/// Uploads every PDF under `folder` for `user_id` and runs the PDF stage and
/// ingestion on each. Documents are independent: a failing file is reported
/// in `skipped_files` and does not stop the others. Paper ids come from file
/// stems, so when several files share one (`a/intro.pdf`, `b/intro.pdf`) only
/// the first in path order is ingested.
pub async fn ingest_folder<O, V>(
    pipeline: &Pipeline<O, V>,
    folder: &Path,
    user_id: &str,
) -> Result<FolderIngestionReport, IngestError>
where
    O: ObjectStore,
    V: VectorIndex,
{
    if user_id.trim().is_empty() || user_id.contains('/') {
        return Err(IngestError::InvalidArgument(format!(
            "user id `{user_id}` must be non-empty and contain no `/`"
        )));
    }

    let files = discover_pdf_files(folder);
    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }
    info!(folder = %folder.display(), files = files.len(), "ingesting folder");

    let (planned, mut skipped_files) = plan_papers(files);

    let mut outcomes = stream::iter(planned)
        .map(|(path, paper_id)| async move {
            let outcome = ingest_pdf_file(pipeline, &path, user_id, &paper_id).await;
            (path, outcome)
        })
        .buffer_unordered(DOCUMENT_CONCURRENCY)
        .collect::<Vec<_>>()
        .await;
    outcomes.sort_by(|left, right| left.0.cmp(&right.0));

    let mut documents = Vec::new();
    for (path, outcome) in outcomes {
        match outcome {
            Ok(report) => documents.push(report),
            Err(error) => {
                warn!(path = %path.display(), %error, "skipped pdf");
                skipped_files.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    skipped_files.sort_by(|left, right| left.path.cmp(&right.path));

    Ok(FolderIngestionReport {
        documents,
        skipped_files,
    })
}

/// Pairs each file with its paper id. Files without a usable stem, and files
/// whose id is already taken by an earlier path, are skipped.
fn plan_papers(files: Vec<PathBuf>) -> (Vec<(PathBuf, String)>, Vec<SkippedPdf>) {
    let mut claimed: HashMap<String, PathBuf> = HashMap::new();
    let mut planned = Vec::new();
    let mut skipped = Vec::new();

    for path in files {
        let paper_id = match paper_id_from_path(&path) {
            Ok(paper_id) => paper_id,
            Err(error) => {
                skipped.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                });
                continue;
            }
        };

        if let Some(first) = claimed.get(&paper_id) {
            warn!(path = %path.display(), paper_id, first = %first.display(), "duplicate paper id");
            skipped.push(SkippedPdf {
                reason: format!("paper id `{paper_id}` already used by {}", first.display()),
                path,
            });
            continue;
        }

        claimed.insert(paper_id.clone(), path.clone());
        planned.push((path, paper_id));
    }

    (planned, skipped)
}

async fn ingest_pdf_file<O, V>(
    pipeline: &Pipeline<O, V>,
    path: &Path,
    user_id: &str,
    paper_id: &str,
) -> Result<IngestionReport, IngestError>
where
    O: ObjectStore,
    V: VectorIndex,
{
    let bytes = tokio::fs::read(path).await?;
    let document = DocumentKey::new(user_id, paper_id);
    let bucket = &pipeline.options().pdf_bucket;
    let pdf_key = document.pdf_object_key();

    pipeline.objects().put(bucket, &pdf_key, &bytes).await?;
    let trigger = pipeline.index_pdf(bucket, &pdf_key).await?;
    pipeline.ingest(&trigger).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmbeddingOptions, PipelineOptions};
    use crate::stores::LocalObjectStore;
    use crate::test_support::{PrefixExtractor, RecordingIndex, ScriptedProvider};
    use std::fs::{self, File};
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("notes.txt"))?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn keys_in_user_layout_yield_owner_and_paper() -> Result<(), IngestError> {
        let key = derive_document_key("user/u-42/papers/attention.v2.pdf")?;
        assert_eq!(key, DocumentKey::new("u-42", "attention.v2"));

        let key = derive_document_key("user/u-42/papers/notes")?;
        assert_eq!(key.paper_id, "notes");
        Ok(())
    }

    #[test]
    fn other_keys_fall_back_to_dev_user() -> Result<(), IngestError> {
        let key = derive_document_key("uploads/2024/My Paper.pdf")?;
        assert_eq!(key, DocumentKey::new("dev-user", "My Paper"));
        Ok(())
    }

    #[test]
    fn upload_layout_is_compiled_once() -> Result<(), IngestError> {
        assert!(std::ptr::eq(upload_layout()?, upload_layout()?));
        Ok(())
    }

    #[test]
    fn key_without_stem_is_rejected() {
        assert!(matches!(
            derive_document_key("user/u-1/papers/.pdf"),
            Err(IngestError::InvalidArgument(_))
        ));
    }

    fn pipeline(root: &Path) -> Result<Pipeline<LocalObjectStore, RecordingIndex>, IngestError> {
        let options = PipelineOptions {
            embedding: EmbeddingOptions {
                dimensions: 4,
                ..EmbeddingOptions::default()
            },
            ..PipelineOptions::default()
        };
        Ok(Pipeline::new(
            options,
            LocalObjectStore::new(root),
            Arc::new(ScriptedProvider::new()),
            RecordingIndex::new(4),
        )?
        .with_extractor(PrefixExtractor))
    }

    #[tokio::test]
    async fn ingestion_fails_without_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let storage = tempdir()?;
        let folder = tempdir()?;
        let pipeline = pipeline(storage.path())?;

        let result = ingest_folder(&pipeline, folder.path(), "u-1").await;
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
        Ok(())
    }

    #[tokio::test]
    async fn folder_ingestion_skips_unreadable_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let storage = tempdir()?;
        let folder = tempdir()?;
        fs::write(folder.path().join("good.pdf"), b"%TEXT:scaled dot product attention")?;
        fs::write(folder.path().join("unreadable.pdf"), b"%PDF-1.4\n%broken")?;
        let pipeline = pipeline(storage.path())?;

        let report = ingest_folder(&pipeline, folder.path(), "u-1").await?;

        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.documents[0].paper_id, "good");
        assert_eq!(report.documents[0].records_written, 1);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("unreadable.pdf")
        );
        assert!(storage
            .path()
            .join("papers/user/u-1/papers/good.pdf")
            .is_file());
        assert!(pipeline
            .index()
            .records()
            .iter()
            .all(|record| record.metadata.paper_id == "good"));
        Ok(())
    }

    #[tokio::test]
    async fn same_stem_in_subfolders_is_ingested_once() -> Result<(), Box<dyn std::error::Error>> {
        let storage = tempdir()?;
        let folder = tempdir()?;
        fs::create_dir(folder.path().join("a"))?;
        fs::create_dir(folder.path().join("b"))?;
        fs::create_dir(folder.path().join("c"))?;
        fs::write(folder.path().join("a/intro.pdf"), b"%TEXT:alpha beta")?;
        fs::write(folder.path().join("b/intro.pdf"), b"%TEXT:gamma delta epsilon")?;
        fs::write(folder.path().join("c/intro.PDF"), b"%TEXT:zeta")?;
        let pipeline = pipeline(storage.path())?;

        let report = ingest_folder(&pipeline, folder.path(), "u-1").await?;

        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.documents[0].paper_id, "intro");
        assert_eq!(report.skipped_files.len(), 2);
        assert!(report
            .skipped_files
            .iter()
            .all(|skipped| skipped.reason.contains("already used by")));

        let texts = pipeline
            .index()
            .records()
            .into_iter()
            .map(|record| record.metadata.source_text)
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["alpha beta"]);
        assert_eq!(pipeline.index().events(), vec!["delete:u-1/intro", "upsert:1"]);
        Ok(())
    }

    #[tokio::test]
    async fn user_ids_with_separators_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let storage = tempdir()?;
        let pipeline = pipeline(storage.path())?;

        let result = ingest_folder(&pipeline, storage.path(), "a/b").await;
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
        Ok(())
    }
}
