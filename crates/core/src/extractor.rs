use crate::error::IngestError;
use lopdf::Document;
use tracing::warn;

pub trait PdfExtractor: Send + Sync {
    fn extract_text(&self, pdf: &[u8]) -> Result<String, IngestError>;
}

/// Concatenates the text of every page, one page per line group. Pages whose
/// text cannot be decoded contribute an empty string.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_text(&self, pdf: &[u8]) -> Result<String, IngestError> {
        let document =
            Document::load_mem(pdf).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let pages = document
            .get_pages()
            .into_keys()
            .map(|page_no| {
                document.extract_text(&[page_no]).unwrap_or_else(|error| {
                    warn!(page = page_no, %error, "page text could not be extracted");
                    String::new()
                })
            })
            .collect::<Vec<_>>();

        Ok(pages.join("\n"))
    }
}
