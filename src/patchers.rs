//! Text passes applied to the serialized document after the tree walk.
//!
//! Sweeps localize URLs the walker cannot see as attributes (fonts and modules
//! referenced from inline scripts, for instance). Patches are declarative
//! [`PatchRule`]s gathered into a [`PatchSet`] and applied in `order`; each
//! rule works on the output of the previous one and is a no-op once its
//! pattern no longer matches.

use anyhow::{Context, Result};
use regex::{Captures, NoExpand, Regex};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use url::Url;

use crate::asset_store::{AssetStore, CounterNamespace, StoredAsset};
use crate::config::{Category, ChromeRules, ModulePolicy, ModuleRevert, SweepRule};

pub const MODULE_REVERT_ORDER: u32 = 100;
pub const CHROME_ORDER: u32 = 200;
pub const CANONICAL_ORDER: u32 = 300;

#[derive(Debug, Clone)]
pub enum PatchAction {
    /// Replace every literal occurrence of `from`.
    Literal { from: String, to: String },
    /// Replace every match of `pattern` with the literal `replacement`.
    Pattern { pattern: Regex, replacement: String },
}

#[derive(Debug, Clone)]
pub struct PatchRule {
    pub order: u32,
    pub name: String,
    pub action: PatchAction,
}

impl PatchRule {
    pub fn literal(order: u32, name: &str, from: &str, to: &str) -> Self {
        Self {
            order,
            name: name.to_string(),
            action: PatchAction::Literal {
                from: from.to_string(),
                to: to.to_string(),
            },
        }
    }

    pub fn pattern(order: u32, name: &str, pattern: &str, replacement: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .with_context(|| format!("Patch rule '{}' has an invalid pattern", name))?;
        Ok(Self {
            order,
            name: name.to_string(),
            action: PatchAction::Pattern {
                pattern,
                replacement: replacement.to_string(),
            },
        })
    }

    pub fn removal(order: u32, name: &str, pattern: &str) -> Result<Self> {
        Self::pattern(order, name, pattern, "")
    }

    pub fn apply(&self, text: &str) -> String {
        match &self.action {
            PatchAction::Literal { from, to } if !from.is_empty() => text.replace(from, to),
            PatchAction::Literal { .. } => text.to_string(),
            PatchAction::Pattern {
                pattern,
                replacement,
            } => pattern
                .replace_all(text, NoExpand(replacement.as_str()))
                .into_owned(),
        }
    }
}

/// Ordered collection of patch rules. Rules with equal `order` keep insertion order.
#[derive(Debug, Clone, Default)]
pub struct PatchSet {
    rules: Vec<PatchRule>,
}

impl PatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rule: PatchRule) {
        self.rules.push(rule);
    }

    pub fn extend(&mut self, rules: impl IntoIterator<Item = PatchRule>) {
        self.rules.extend(rules);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn apply(&self, html: &str) -> String {
        let mut ordered: Vec<&PatchRule> = self.rules.iter().collect();
        ordered.sort_by_key(|rule| rule.order);

        let mut text = html.to_string();
        for rule in ordered {
            let patched = rule.apply(&text);
            if patched != text {
                debug!(rule = %rule.name, "patch applied");
            }
            text = patched;
        }
        text
    }
}

/// Patterns of the sweeps that collect runtime modules.
pub fn module_patterns(sweeps: &[SweepRule]) -> Result<Vec<Regex>> {
    sweeps
        .iter()
        .filter(|rule| rule.category == Category::Module)
        .map(|rule| {
            Regex::new(&rule.pattern)
                .with_context(|| format!("Sweep rule '{}' has an invalid pattern", rule.name))
        })
        .collect()
}

/// Literal `local -> remote` substitutions for the runtime module graph.
///
/// Under [`ModulePolicy::Revert`] the explicit table is applied first, then
/// every stored module is pointed back at the URL it came from. A module is
/// any asset stored as [`Category::Module`] or whose URL matches one of
/// `module_patterns`, which catches the graph's entry script localized by
/// the script pass. Under [`ModulePolicy::KeepLocal`] nothing is reverted.
pub fn module_revert_rules(
    policy: ModulePolicy,
    reverts: &[ModuleRevert],
    module_patterns: &[Regex],
    stored: &[StoredAsset],
) -> Vec<PatchRule> {
    if policy == ModulePolicy::KeepLocal {
        return Vec::new();
    }

    let explicit = reverts
        .iter()
        .map(|revert| {
            PatchRule::literal(MODULE_REVERT_ORDER, "module-revert", &revert.local, &revert.remote)
        });
    let discovered = stored
        .iter()
        .filter(|asset| {
            asset.category == Category::Module
                || module_patterns.iter().any(|pattern| pattern.is_match(&asset.url))
        })
        .map(|asset| {
            PatchRule::literal(MODULE_REVERT_ORDER, "module-revert", &asset.local_path, &asset.url)
        });

    explicit.chain(discovered).collect()
}

/// Removes editor-only script blocks and platform-only meta tags.
pub fn chrome_rules(chrome: &ChromeRules) -> Result<Vec<PatchRule>> {
    let scripts = chrome.script_markers.iter().map(|marker| {
        PatchRule::removal(
            CHROME_ORDER,
            "strip-editor-script",
            &format!(r"{}[\s\S]*?</script>", regex::escape(marker)),
        )
    });
    let metas = chrome.meta_names.iter().map(|name| {
        PatchRule::removal(
            CHROME_ORDER,
            "strip-platform-meta",
            &format!(r#"<meta name="{}"[^>]*>"#, regex::escape(name)),
        )
    });

    scripts.chain(metas).collect()
}

/// Points canonical and Open Graph URLs at the local copy and drops
/// preconnect hints to origins the bundle no longer needs.
pub fn canonical_rules(
    site_url: &str,
    canonical_path: &str,
    preconnect_origins: &[String],
) -> Result<Vec<PatchRule>> {
    let mut rules = vec![
        PatchRule::literal(
            CANONICAL_ORDER,
            "canonical-href",
            &format!(r#"href="{}""#, site_url),
            &format!(r#"href="{}""#, canonical_path),
        ),
        PatchRule::literal(
            CANONICAL_ORDER,
            "canonical-content",
            &format!(r#"content="{}""#, site_url),
            &format!(r#"content="{}""#, canonical_path),
        ),
    ];

    for origin in preconnect_origins {
        let href = format!(r#"href="{}""#, regex::escape(origin));
        rules.push(PatchRule::removal(
            CANONICAL_ORDER,
            "strip-preconnect",
            &format!(
                r#"<link\s[^>]*{href}[^>]*rel="preconnect"[^>]*>|<link\s[^>]*rel="preconnect"[^>]*{href}[^>]*>"#
            ),
        )?);
    }

    Ok(rules)
}

/// Distinct matches of `pattern` in first-seen order.
pub fn distinct_matches(pattern: &Regex, text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    pattern
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Localizes every URL a sweep rule matches and rewrites all its occurrences.
///
/// Rewriting goes match by match, so a URL that is a prefix of a longer
/// matched URL (`a.png` and `a.png?scale-down-to=512`) never clobbers it.
pub async fn apply_sweep(store: &AssetStore, rule: &SweepRule, html: String) -> Result<String> {
    let pattern = Regex::new(&rule.pattern)
        .with_context(|| format!("Sweep rule '{}' has an invalid pattern", rule.name))?;
    let namespace = rule.counter_start.map(|start| CounterNamespace {
        name: rule.name.clone(),
        start,
    });

    let found = distinct_matches(&pattern, &html);
    debug!(rule = %rule.name, found = found.len(), "sweep");

    let mut localized: HashMap<String, String> = HashMap::new();
    for matched in found {
        // Serialized attributes carry `&amp;` where the real URL has `&`.
        let url = match Url::parse(&matched.replace("&amp;", "&")) {
            Ok(url) => url,
            Err(e) => {
                warn!("⚠️  Sweep '{}' matched an invalid URL {}: {}", rule.name, matched, e);
                store
                    .record_failure(&matched, rule.category, e.to_string())
                    .await;
                continue;
            }
        };

        if let Some(local_path) = store
            .fetch_asset_in(&url, rule.category, namespace.as_ref())
            .await
        {
            localized.insert(matched, local_path);
        }
    }

    if localized.is_empty() {
        return Ok(html);
    }

    let html = pattern.replace_all(&html, |caps: &Captures<'_>| {
        let matched = &caps[0];
        localized
            .get(matched)
            .cloned()
            .unwrap_or_else(|| matched.to_string())
    });
    Ok(html.into_owned())
}
