use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_TARGET_URL: &str = "https://maelle.framer.website/";
pub const DEFAULT_FOLDER: &str = "cloned-site";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Logical asset group. Picks the filename prefix and, for fonts, the subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Image,
    Background,
    Stylesheet,
    CssAsset,
    Script,
    Module,
    Icon,
    Video,
    Font,
    Media,
    PlatformImage,
    SocialImage,
}

impl Category {
    pub fn prefix(self) -> &'static str {
        match self {
            Category::Image => "img",
            Category::Background => "bg",
            Category::Stylesheet => "style",
            Category::CssAsset => "css_asset",
            Category::Script => "script",
            Category::Module => "module",
            Category::Icon => "icon",
            Category::Video => "video",
            Category::Font => "font",
            Category::Media => "media",
            Category::PlatformImage => "platform_img",
            Category::SocialImage => "og_image",
        }
    }

    pub fn subdir(self) -> Option<&'static str> {
        match self {
            Category::Font => Some("fonts"),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// The page being mirrored and where its bundle goes. Fixed for one run.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: Url,
    pub folder: String,
    pub public_root: PathBuf,
}

impl Target {
    pub fn new(url: &str, folder: &str, public_root: &Path) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("Failed to parse target URL: {}", url))?;
        let folder = folder.trim_matches('/').to_string();
        anyhow::ensure!(!folder.is_empty(), "Output folder name must not be empty");

        Ok(Self {
            url,
            folder,
            public_root: public_root.to_path_buf(),
        })
    }

    pub fn output_dir(&self) -> PathBuf {
        self.public_root.join(&self.folder)
    }

    /// URL prefix the rewritten document uses to reach the bundle.
    pub fn default_public_prefix(&self) -> String {
        format!("/{}", self.folder)
    }
}

/// What to do with the platform's runtime module files after download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulePolicy {
    /// Keep local copies. Cross-module relative imports stay stale.
    #[default]
    KeepLocal,
    /// Point known module files back at their remote URLs.
    Revert,
}

/// Knobs for a single run, usually built from the command line.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub public_prefix: String,
    pub canonical_path: String,
    pub user_agent: String,
    pub max_concurrent: usize,
    pub timeout: Option<Duration>,
    pub module_policy: ModulePolicy,
}

impl MirrorOptions {
    pub fn for_target(target: &Target) -> Self {
        Self {
            public_prefix: target.default_public_prefix(),
            canonical_path: target.default_public_prefix(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_concurrent: 8,
            timeout: None,
            module_policy: ModulePolicy::default(),
        }
    }
}

/// Regex sweep over the serialized document for URLs the tree walk cannot see,
/// e.g. fonts and modules referenced from inline scripts and styles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepRule {
    pub name: String,
    pub pattern: String,
    pub category: Category,
    /// Starts a separate counter for this rule instead of the shared one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_start: Option<u64>,
}

/// One literal `local -> remote` substitution for the module revert patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRevert {
    pub local: String,
    pub remote: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChromeRules {
    /// Opening fragment of inline scripts that only work inside the editor.
    #[serde(default)]
    pub script_markers: Vec<String>,
    /// `name` values of platform-only `<meta>` tags.
    #[serde(default)]
    pub meta_names: Vec<String>,
}

/// Per-platform rule table. Supporting a new site builder means writing one of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorRules {
    #[serde(default)]
    pub sweeps: Vec<SweepRule>,
    #[serde(default)]
    pub module_reverts: Vec<ModuleRevert>,
    #[serde(default)]
    pub chrome: ChromeRules,
    #[serde(default)]
    pub preconnect_origins: Vec<String>,
    #[serde(default = "default_skip_script_markers")]
    pub skip_script_markers: Vec<String>,
}

fn default_skip_script_markers() -> Vec<String> {
    vec!["analytics".to_string(), "gtag".to_string()]
}

impl MirrorRules {
    pub fn from_json(json: &str) -> Result<Self> {
        let rules: Self = serde_json::from_str(json).context("Failed to parse mirror rules")?;
        rules.validate()?;
        Ok(rules)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules file: {:?}", path))?;
        Self::from_json(&json).with_context(|| format!("Invalid rules file: {:?}", path))
    }

    fn validate(&self) -> Result<()> {
        for sweep in &self.sweeps {
            regex::Regex::new(&sweep.pattern)
                .with_context(|| format!("Sweep rule '{}' has an invalid pattern", sweep.name))?;
        }
        Ok(())
    }

    /// Rules for sites published by the Framer website builder.
    pub fn framer() -> Self {
        let sweep = |name: &str, pattern: &str, category: Category, counter_start: Option<u64>| {
            SweepRule {
                name: name.to_string(),
                pattern: pattern.to_string(),
                category,
                counter_start,
            }
        };

        Self {
            sweeps: vec![
                sweep(
                    "google-fonts",
                    r#"https://fonts\.gstatic\.com/s/[^"')]+\.woff2"#,
                    Category::Font,
                    None,
                ),
                sweep(
                    "framer-fonts",
                    r#"https://framerusercontent\.com/assets/[^"')]+\.woff2"#,
                    Category::Font,
                    Some(20),
                ),
                sweep(
                    "framer-modules",
                    r#"https://framerusercontent\.com/sites/[^"'\s]+\.mjs"#,
                    Category::Module,
                    Some(30),
                ),
                sweep(
                    "framer-images",
                    r#"https://framerusercontent\.com/images/[^"')\s]+"#,
                    Category::PlatformImage,
                    None,
                ),
            ],
            module_reverts: Vec::new(),
            chrome: ChromeRules {
                script_markers: vec![
                    r#"<script>try{if(localStorage.get("__framer_force_showing_editorbar_since"))"#
                        .to_string(),
                ],
                meta_names: vec![
                    "framer-search-index".to_string(),
                    "framer-search-index-fallback".to_string(),
                ],
            },
            preconnect_origins: vec!["https://fonts.gstatic.com".to_string()],
            skip_script_markers: default_skip_script_markers(),
        }
    }
}

impl Default for MirrorRules {
    fn default() -> Self {
        Self::framer()
    }
}
