//! Content enrichment seam.
//!
//! Page bodies come from an external content-generation collaborator,
//! abstracted behind [`ContentEnricher`] so the applier can run without
//! it. When the collaborator is unavailable, fails, or returns nothing,
//! the applier substitutes [`fallback_blocks`] so a page is never
//! created empty.

use std::future::Future;

use tracing::debug;

use pressforge_core::{Block, BlockKind, ContentError};

/// Produces enriched block content for one page.
pub trait ContentEnricher: Send + Sync {
    /// Generates blocks for a page given its title, inferred type, and
    /// the site's business context. Implementations validate and repair
    /// malformed generator output before returning it; they never
    /// surface raw model text.
    fn enrich(
        &self,
        page_title: &str,
        page_type: &str,
        business_context: &str,
    ) -> impl Future<Output = Result<Vec<Block>, ContentError>> + Send;
}

/// Enricher that always answers with the deterministic fallback.
///
/// Used when no content-generation collaborator is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackEnricher;

impl ContentEnricher for FallbackEnricher {
    async fn enrich(
        &self,
        page_title: &str,
        page_type: &str,
        _business_context: &str,
    ) -> Result<Vec<Block>, ContentError> {
        debug!(page_title, page_type, "using fallback page content");
        Ok(fallback_blocks(page_title))
    }
}

/// Minimal deterministic page content: a heading plus one descriptive
/// paragraph.
pub fn fallback_blocks(page_title: &str) -> Vec<Block> {
    vec![
        Block::text(BlockKind::Heading, page_title),
        Block::text(
            BlockKind::Paragraph,
            format!("Welcome to the {page_title} page. Content coming soon."),
        ),
    ]
}

/// Infers a coarse page type from slug and title, used to key the
/// enrichment request.
pub fn infer_page_type(slug: &str, title: &str) -> &'static str {
    let slug = slug.to_lowercase();
    let title = title.to_lowercase();
    if slug == "home" || slug == "accueil" || title == "home" || title == "accueil" {
        "home"
    } else if slug.contains("about") || slug.contains("a-propos") {
        "about"
    } else if slug.contains("contact") {
        "contact"
    } else if slug.contains("service") || slug.contains("product") {
        "services"
    } else {
        "generic"
    }
}
