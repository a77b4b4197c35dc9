//! Domain types shared across the platform.
//!
//! One [`SiteInstance`] exists per tenant site (siteSlug is the unique
//! key, 1:1 with its application container). [`HealthRecord`] rows are
//! append-only: the monitor writes them and nothing mutates them.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provisioning lifecycle state of a site instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    /// Resources are being allocated and configured
    #[default]
    Provisioning,
    /// Instance is installed and serving
    Ready,
    /// Content or configuration update in progress
    Updating,
    /// A fatal provisioning step failed
    Failed,
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioning => write!(f, "provisioning"),
            Self::Ready => write!(f, "ready"),
            Self::Updating => write!(f, "updating"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Health state of a site instance.
///
/// `Down` is only ever persisted after the debounce threshold of
/// consecutive failed probes; a single transient failure stays invisible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Instance responds and reports itself healthy
    #[default]
    Healthy,
    /// Instance responds but reports degraded conditions
    Warning,
    /// Instance unreachable or confirmed down
    Down,
}

impl HealthStatus {
    /// Parses a status string, case-insensitively.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "healthy" | "ok" => Some(Self::Healthy),
            "warning" | "warn" => Some(Self::Warning),
            "down" => Some(Self::Down),
            _ => None,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// One provisioned tenant site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteInstance {
    /// Unique site key, also the basis for container/network names
    pub slug: String,
    /// Human-readable site title
    pub site_name: String,
    /// Per-site virtual network name
    pub network_name: String,
    /// Backing database container name
    pub db_ref: String,
    /// Application container name (1:1 with slug)
    pub app_ref: String,
    /// Host port the instance is published on; unique among active sites
    pub port: u16,
    /// Active theme slug, once one has been applied
    pub theme_slug: Option<String>,
    /// Provisioning lifecycle state
    pub status: SiteStatus,
    /// Last persisted health state
    pub health: HealthStatus,
    /// Consecutive failed health probes (reset on any non-down probe)
    pub failed_checks: u32,
    /// Whether the runtime install has completed inside the container
    pub installed: bool,
    /// Whether the content structure has been applied
    pub content_applied: bool,
    /// Soft-deletion flag; inactive sites are skipped by the sweep
    pub active: bool,
    /// Owner identifier forwarded to the alerting collaborator
    pub owner_id: String,
    /// Last health check time (debounce guard for on-demand checks)
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl SiteInstance {
    /// Creates a new instance record in the `Provisioning` state.
    pub fn new(slug: impl Into<String>, site_name: impl Into<String>, port: u16) -> Self {
        let slug = slug.into();
        Self {
            site_name: site_name.into(),
            network_name: format!("net-{slug}"),
            db_ref: format!("db-{slug}"),
            app_ref: format!("wp-{slug}"),
            slug,
            port,
            theme_slug: None,
            status: SiteStatus::Provisioning,
            health: HealthStatus::Healthy,
            failed_checks: 0,
            installed: false,
            content_applied: false,
            active: true,
            owner_id: String::new(),
            last_checked_at: None,
            created_at: Utc::now(),
        }
    }

    /// Preview URL of the instance on the local host.
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

impl fmt::Display for SiteInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) port={} status={} health={}",
            self.slug, self.app_ref, self.port, self.status, self.health,
        )
    }
}

/// Resource usage reported by the instance's health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    /// One-minute CPU load average
    pub cpu: Option<f64>,
    /// Current memory usage (MB)
    pub mem_mb: Option<f64>,
    /// Disk used (MB)
    pub disk_mb: Option<f64>,
}

/// Software versions reported by the instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SoftwareVersions {
    /// Application (WordPress) version
    pub app: String,
    /// Language runtime (PHP) version
    pub lang: String,
    /// Database server version, when reachable
    pub db: Option<String>,
}

/// One health observation. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    /// Site this record belongs to
    pub site_slug: String,
    /// Status derived for this observation (pre-debounce)
    pub status: HealthStatus,
    /// Observation time
    pub checked_at: DateTime<Utc>,
    /// Probe round-trip time in milliseconds
    pub response_time_ms: f64,
    /// Resource usage snapshot
    pub resources: ResourceMetrics,
    /// Software versions snapshot
    pub versions: SoftwareVersions,
}

impl fmt::Display for HealthRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {:.1}ms",
            self.checked_at.to_rfc3339(),
            self.site_slug,
            self.status,
            self.response_time_ms,
        )
    }
}

/// Content block vocabulary.
///
/// Anything outside the known set deserializes to `Unknown` and is
/// encoded as a paragraph by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Hero,
    Heading,
    Paragraph,
    Features,
    Cta,
    Image,
    Gallery,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Hero => "hero",
            Self::Heading => "heading",
            Self::Paragraph => "paragraph",
            Self::Features => "features",
            Self::Cta => "cta",
            Self::Image => "image",
            Self::Gallery => "gallery",
            Self::Unknown => "unknown",
        };
        write!(f, "{name}")
    }
}

/// An atomic typed content unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Block type
    #[serde(rename = "type")]
    pub kind: BlockKind,
    /// Text content (heading text, paragraph body, button label, ...)
    #[serde(default)]
    pub text: String,
    /// Type-specific attributes (image url, cta target, feature items, ...)
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Block {
    /// Convenience constructor for a text-only block.
    pub fn text(kind: BlockKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            attributes: HashMap::new(),
        }
    }
}

/// One page of the abstract content tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSpec {
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// One navigation entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItem {
    pub label: String,
    pub url: String,
    /// Entry type (e.g. "page", "custom")
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub children: Vec<MenuItem>,
}

/// Full abstract content tree for one site.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructureSpec {
    #[serde(default)]
    pub pages: Vec<PageSpec>,
    #[serde(default)]
    pub menu: Vec<MenuItem>,
    #[serde(default)]
    pub theme_suggestions: Vec<String>,
}
