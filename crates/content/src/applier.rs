//! Structure applier.
//!
//! Applies a full [`StructureSpec`] to an installed instance: enriches
//! and encodes each page, creates it over WP-CLI, wires the homepage,
//! builds and assigns the navigation menu, and flushes caches. Per-page
//! and menu failures are isolated into the returned [`ApplyReport`];
//! only structurally invalid input aborts before any mutation.

use std::collections::HashMap;
use std::time::Duration;

use metrics::counter;
use tracing::{debug, info, warn};

use pressforge_core::command::{CommandOutput, CommandRunner};
use pressforge_core::error::{ContentError, ParseError};
use pressforge_core::metrics::{
    CONTENT_PAGES_CREATED_TOTAL, CONTENT_STRUCTURES_APPLIED_TOTAL, LABEL_RESULT,
};
use pressforge_core::types::{MenuItem, PageSpec, StructureSpec};

use crate::codec::encode_blocks;
use crate::enrich::{ContentEnricher, fallback_blocks, infer_page_type};

/// Menu locations tried in order of preference; any further discovered
/// locations are appended after these.
const PREFERRED_MENU_LOCATIONS: [&str; 4] = ["primary", "header", "main-menu", "top"];

/// Slugs/titles recognized as the homepage candidate.
const HOMEPAGE_SLUGS: [&str; 2] = ["home", "accueil"];

/// Outcome of one page creation attempt.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub title: String,
    pub slug: String,
    /// Created page ID on success
    pub page_id: Option<i64>,
    /// Failure description on error
    pub error: Option<String>,
}

impl PageOutcome {
    pub fn succeeded(&self) -> bool {
        self.page_id.is_some()
    }
}

/// Result of applying one structure.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// One outcome per input page, in input order
    pub pages: Vec<PageOutcome>,
    /// Page set as the front page, if a homepage candidate was created
    pub homepage_id: Option<i64>,
    /// Whether a menu was created
    pub menu_created: bool,
    /// Whether the menu was assigned to a location
    pub menu_assigned: bool,
}

impl ApplyReport {
    /// Count of successfully created pages.
    pub fn pages_created(&self) -> usize {
        self.pages.iter().filter(|p| p.succeeded()).count()
    }
}

/// Applies content structures to installed instances over WP-CLI.
pub struct StructureApplier<R, E> {
    runner: R,
    enricher: E,
    command_timeout: Duration,
}

impl<R: CommandRunner, E: ContentEnricher> StructureApplier<R, E> {
    pub fn new(runner: R, enricher: E, command_timeout: Duration) -> Self {
        Self {
            runner,
            enricher,
            command_timeout,
        }
    }

    /// Rejects structurally invalid input before any mutation.
    pub fn validate(structure: &StructureSpec) -> Result<(), ContentError> {
        if structure.pages.is_empty() {
            return Err(ContentError::StructureValidation(
                "structure has no pages".to_owned(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for page in &structure.pages {
            if page.title.trim().is_empty() {
                return Err(ContentError::StructureValidation(format!(
                    "page '{}' has an empty title",
                    page.slug
                )));
            }
            if page.slug.trim().is_empty() {
                return Err(ContentError::StructureValidation(format!(
                    "page '{}' has an empty slug",
                    page.title
                )));
            }
            if !seen.insert(page.slug.as_str()) {
                return Err(ContentError::StructureValidation(format!(
                    "duplicate page slug '{}'",
                    page.slug
                )));
            }
        }
        Ok(())
    }

    /// Applies `structure` inside `container`.
    ///
    /// Page and menu failures are recorded in the report; the cache
    /// flush at the end runs regardless of how many pages failed.
    pub async fn apply(
        &self,
        container: &str,
        structure: &StructureSpec,
        business_context: &str,
    ) -> Result<ApplyReport, ContentError> {
        Self::validate(structure)?;

        let mut report = ApplyReport::default();
        let mut created: HashMap<String, i64> = HashMap::new();

        for page in &structure.pages {
            let outcome = self.create_page(container, page, business_context).await;
            match &outcome.page_id {
                Some(id) => {
                    counter!(CONTENT_PAGES_CREATED_TOTAL, LABEL_RESULT => "success").increment(1);
                    created.insert(page.slug.clone(), *id);
                }
                None => {
                    counter!(CONTENT_PAGES_CREATED_TOTAL, LABEL_RESULT => "failure").increment(1);
                    warn!(
                        container,
                        page = page.slug.as_str(),
                        error = outcome.error.as_deref().unwrap_or(""),
                        "page creation failed, continuing with remaining pages"
                    );
                }
            }
            report.pages.push(outcome);
        }

        report.homepage_id = self.set_homepage(container, structure, &created).await;

        if !structure.menu.is_empty() {
            let (menu_created, menu_assigned) =
                self.build_menu(container, &structure.menu, &created).await;
            report.menu_created = menu_created;
            report.menu_assigned = menu_assigned;
        }

        self.flush_caches(container).await;

        let result = if report.pages_created() == report.pages.len() {
            "success"
        } else {
            "failure"
        };
        counter!(CONTENT_STRUCTURES_APPLIED_TOTAL, LABEL_RESULT => result).increment(1);
        info!(
            container,
            pages = report.pages.len(),
            created = report.pages_created(),
            menu_assigned = report.menu_assigned,
            "structure applied"
        );
        Ok(report)
    }

    async fn create_page(
        &self,
        container: &str,
        page: &PageSpec,
        business_context: &str,
    ) -> PageOutcome {
        let page_type = infer_page_type(&page.slug, &page.title);
        let blocks = if page.blocks.is_empty() {
            match self
                .enricher
                .enrich(&page.title, page_type, business_context)
                .await
            {
                Ok(blocks) if !blocks.is_empty() => blocks,
                Ok(_) => fallback_blocks(&page.title),
                Err(e) => {
                    debug!(page = page.slug.as_str(), error = %e, "enrichment failed, using fallback");
                    fallback_blocks(&page.title)
                }
            }
        } else {
            page.blocks.clone()
        };

        let markup = encode_blocks(&blocks);
        let args = wp_args(&[
            "post",
            "create",
            "--post_type=page",
            "--post_status=publish",
            &format!("--post_title={}", page.title),
            &format!("--post_name={}", page.slug),
            &format!("--post_content={markup}"),
            "--porcelain",
        ]);

        let result = self.run_checked(container, &args).await;
        match result.and_then(|out| parse_created_id(&out).map_err(|e| e.to_string())) {
            Ok(id) => PageOutcome {
                title: page.title.clone(),
                slug: page.slug.clone(),
                page_id: Some(id),
                error: None,
            },
            Err(reason) => PageOutcome {
                title: page.title.clone(),
                slug: page.slug.clone(),
                page_id: None,
                error: Some(
                    ContentError::PageCreation {
                        page: page.slug.clone(),
                        reason,
                    }
                    .to_string(),
                ),
            },
        }
    }

    async fn set_homepage(
        &self,
        container: &str,
        structure: &StructureSpec,
        created: &HashMap<String, i64>,
    ) -> Option<i64> {
        let candidate = structure.pages.iter().find(|p| {
            HOMEPAGE_SLUGS.contains(&p.slug.to_lowercase().as_str())
                || HOMEPAGE_SLUGS.contains(&p.title.to_lowercase().as_str())
        })?;
        let id = *created.get(&candidate.slug)?;

        let front = wp_args(&["option", "update", "show_on_front", "page"]);
        if let Err(e) = self.run_checked(container, &front).await {
            warn!(container, error = e.as_str(), "failed to switch front page mode");
            return None;
        }
        let page = wp_args(&["option", "update", "page_on_front", &id.to_string()]);
        match self.run_checked(container, &page).await {
            Ok(_) => {
                debug!(container, page_id = id, "homepage set");
                Some(id)
            }
            Err(e) => {
                warn!(container, error = e.as_str(), "failed to set homepage");
                None
            }
        }
    }

    /// Creates the menu, attaches items, and assigns a location.
    /// Returns `(menu_created, menu_assigned)`.
    async fn build_menu(
        &self,
        container: &str,
        items: &[MenuItem],
        created: &HashMap<String, i64>,
    ) -> (bool, bool) {
        let create = wp_args(&["menu", "create", "Main Navigation", "--porcelain"]);
        let menu_id = match self
            .run_checked(container, &create)
            .await
            .and_then(|out| parse_created_id(&out).map_err(|e| e.to_string()))
        {
            Ok(id) => id,
            Err(e) => {
                warn!(container, error = e.as_str(), "menu creation failed");
                return (false, false);
            }
        };

        for item in items {
            self.attach_menu_item(container, menu_id, item, None, created)
                .await;
        }

        let assigned = self.assign_menu(container, menu_id).await;
        (true, assigned)
    }

    async fn attach_menu_item(
        &self,
        container: &str,
        menu_id: i64,
        item: &MenuItem,
        parent_item: Option<i64>,
        created: &HashMap<String, i64>,
    ) {
        let menu = menu_id.to_string();
        let page_id = created.get(url_slug(&item.url).as_str()).copied();

        let mut args = match page_id {
            Some(id) => wp_args(&[
                "menu",
                "item",
                "add-post",
                &menu,
                &id.to_string(),
                &format!("--title={}", item.label),
                "--porcelain",
            ]),
            None if item.kind == "custom" => wp_args(&[
                "menu",
                "item",
                "add-custom",
                &menu,
                &item.label,
                &item.url,
                "--porcelain",
            ]),
            None => {
                // Page reference that was never created; skip the item.
                debug!(
                    container,
                    label = item.label.as_str(),
                    url = item.url.as_str(),
                    "menu item references a missing page, skipping"
                );
                return;
            }
        };
        if let Some(parent) = parent_item {
            args.push(format!("--parent-id={parent}"));
        }

        let item_id = match self
            .run_checked(container, &args)
            .await
            .and_then(|out| parse_created_id(&out).map_err(|e| e.to_string()))
        {
            Ok(id) => id,
            Err(e) => {
                warn!(
                    container,
                    label = item.label.as_str(),
                    error = e.as_str(),
                    "menu item attach failed, skipping"
                );
                return;
            }
        };

        for child in &item.children {
            Box::pin(self.attach_menu_item(container, menu_id, child, Some(item_id), created))
                .await;
        }
    }

    /// Discovers theme menu locations and assigns the menu to the first
    /// one that accepts it, preferred locations first. All candidates
    /// failing leaves the menu unassigned, degraded but non-fatal.
    async fn assign_menu(&self, container: &str, menu_id: i64) -> bool {
        let list = wp_args(&[
            "menu",
            "location",
            "list",
            "--format=csv",
            "--fields=location",
        ]);
        let discovered = match self.run_checked(container, &list).await {
            Ok(out) => parse_menu_locations(&out),
            Err(e) => {
                warn!(container, error = e.as_str(), "menu location discovery failed");
                return false;
            }
        };

        let mut candidates: Vec<&str> = PREFERRED_MENU_LOCATIONS
            .iter()
            .copied()
            .filter(|p| discovered.iter().any(|d| d == p))
            .collect();
        for loc in &discovered {
            if !candidates.contains(&loc.as_str()) {
                candidates.push(loc);
            }
        }

        let menu = menu_id.to_string();
        for location in candidates {
            let assign = wp_args(&["menu", "location", "assign", &menu, location]);
            match self.run_checked(container, &assign).await {
                Ok(_) => {
                    debug!(container, location, "menu assigned");
                    return true;
                }
                Err(e) => {
                    debug!(container, location, error = e.as_str(), "menu assignment failed, trying next location");
                }
            }
        }
        warn!(container, "menu left unassigned, no location accepted it");
        false
    }

    async fn flush_caches(&self, container: &str) {
        for args in [
            wp_args(&["cache", "flush"]),
            wp_args(&["rewrite", "flush", "--hard"]),
        ] {
            if let Err(e) = self.run_checked(container, &args).await {
                warn!(container, error = e.as_str(), "cache flush command failed");
            }
        }
    }

    /// Runs one command, folding transport errors and non-zero exits
    /// into a single error string for per-item recording.
    async fn run_checked(&self, container: &str, args: &[String]) -> Result<CommandOutput, String> {
        match self.runner.run(container, args, self.command_timeout).await {
            Ok(out) if out.success() => Ok(out),
            Ok(out) => Err(format!("exit {}: {}", out.exit_code, out.stderr.trim())),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Builds a WP-CLI arg vector with the standard invocation flags.
pub fn wp_args(parts: &[&str]) -> Vec<String> {
    let mut args = vec![
        "wp".to_owned(),
        "--allow-root".to_owned(),
        "--path=/var/www/html".to_owned(),
    ];
    args.extend(parts.iter().map(|s| (*s).to_owned()));
    args
}

/// Parses a `--porcelain` created-entity ID from command output.
pub fn parse_created_id(output: &CommandOutput) -> Result<i64, ParseError> {
    let trimmed = output.stdout_trimmed();
    trimmed
        .lines()
        .last()
        .and_then(|line| line.trim().parse::<i64>().ok())
        .ok_or_else(|| ParseError::EntityId(trimmed.to_owned()))
}

/// Parses `wp menu location list --format=csv --fields=location` output.
pub fn parse_menu_locations(output: &CommandOutput) -> Vec<String> {
    output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != "location")
        .map(str::to_owned)
        .collect()
}

/// Last path segment of a menu URL, matched against created page slugs.
fn url_slug(url: &str) -> String {
    let trimmed = url.trim_matches('/');
    let segment = trimmed.rsplit('/').next().unwrap_or(trimmed);
    if segment.is_empty() {
        "home".to_owned()
    } else {
        segment.to_owned()
    }
}
