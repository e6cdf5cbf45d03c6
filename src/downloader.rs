use anyhow::{bail, Context, Result};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use url::Url;

use crate::asset_store::{AssetFailure, AssetStore};
use crate::config::{MirrorOptions, MirrorRules, Target};
use crate::file_manager::FileManager;
use crate::html_parser::{parse_html, serialize_html};
use crate::patchers::{self, PatchSet};
use crate::url_resolver::UrlResolver;
use crate::walker::{DocumentWalker, Pass};

/// What a finished run produced.
#[derive(Debug, Clone)]
pub struct MirrorReport {
    pub output_dir: PathBuf,
    pub index_path: PathBuf,
    pub asset_count: usize,
    pub fetch_count: usize,
    pub failures: Vec<AssetFailure>,
}

/// Mirrors one page into `<public-root>/<folder>/`.
///
/// Every call to [`mirror_website`](Self::mirror_website) gets a fresh
/// [`AssetStore`], so identity map, counters and failures never leak between runs.
pub struct WebsiteMirror {
    target: Target,
    options: MirrorOptions,
    rules: MirrorRules,
    client: Client,
    files: FileManager,
}

impl WebsiteMirror {
    pub fn new(target: Target, options: MirrorOptions, rules: MirrorRules) -> Result<Self> {
        let client = AssetStore::build_http_client(&options.user_agent, options.timeout)?;
        let files = FileManager::new(&target, &options.public_prefix);

        Ok(Self {
            target,
            options,
            rules,
            client,
            files,
        })
    }

    pub async fn mirror_website(&self) -> Result<MirrorReport> {
        let files = &self.files;
        println!("🚀 Cloning: {}", self.target.url.as_str().blue());
        println!("📁 Output: {:?}", files.base_dir());
        println!("⚡ Max concurrent downloads: {}", self.options.max_concurrent);

        files.create_layout().await?;

        println!("\n📄 Fetching HTML...");
        let store = AssetStore::new(self.client.clone(), files.clone());
        let (html, page_url) = self.fetch_document().await.inspect_err(|e| {
            error!("❌ {:#}", e);
        })?;

        let dom = parse_html(&html);
        let walker = DocumentWalker::new(
            &store,
            &self.rules,
            UrlResolver::new(page_url),
            self.options.max_concurrent,
        );

        println!("\n{}", "🧹 Cleaning HTML...".cyan());
        walker.clean(&dom);

        let progress_bar = ProgressBar::new_spinner();
        progress_bar.set_style(ProgressStyle::default_spinner().template("{spinner} {msg}")?);
        progress_bar.enable_steady_tick(Duration::from_millis(120));

        for pass in Pass::ALL {
            progress_bar.println(pass.label().cyan().to_string());
            progress_bar.set_message(pass.label());
            let rewritten = walker.run_pass(&dom, pass).await;
            info!(?pass, rewritten, "pass complete");
        }

        let mut output_html = serialize_html(&dom)?;

        for rule in &self.rules.sweeps {
            let message = format!("🔍 Sweeping {}...", rule.name);
            progress_bar.println(message.cyan().to_string());
            progress_bar.set_message(message);
            output_html = patchers::apply_sweep(&store, rule, output_html).await?;
        }

        progress_bar.finish_and_clear();

        println!("\n{}", "🧹 Final cleanup...".cyan());
        let patches = self.build_patches(&store).await?;
        let output_html = patches.apply(&output_html);

        let index_path = files.save_index(&output_html).await?;

        let report = MirrorReport {
            output_dir: files.base_dir().to_path_buf(),
            index_path,
            asset_count: store.stored_assets().await.len(),
            fetch_count: store.fetch_count(),
            failures: store.failures().await,
        };
        print_summary(&report);

        Ok(report)
    }

    /// The one fetch whose failure ends the run.
    async fn fetch_document(&self) -> Result<(String, Url)> {
        let url = &self.target.url;
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?;

        if !response.status().is_success() {
            bail!("Failed to fetch {}: HTTP {}", url, response.status());
        }

        let page_url = response.url().clone();
        let html = response
            .text()
            .await
            .with_context(|| format!("Failed to read document body from {}", url))?;

        Ok((html, page_url))
    }

    async fn build_patches(&self, store: &AssetStore) -> Result<PatchSet> {
        let stored = store.stored_assets().await;
        let mut patches = PatchSet::new();

        let module_patterns = patchers::module_patterns(&self.rules.sweeps)?;
        patches.extend(patchers::module_revert_rules(
            self.options.module_policy,
            &self.rules.module_reverts,
            &module_patterns,
            &stored,
        ));
        patches.extend(patchers::chrome_rules(&self.rules.chrome)?);
        patches.extend(patchers::canonical_rules(
            self.target.url.as_str(),
            &self.options.canonical_path,
            &self.rules.preconnect_origins,
        )?);

        Ok(patches)
    }
}

fn print_summary(report: &MirrorReport) {
    println!("\n{}", "═".repeat(50));
    println!("{}", "✅ Cloning complete!".green().bold());
    println!("📁 Output: {:?}", report.output_dir);
    println!("📄 HTML: {:?}", report.index_path);
    println!("📦 Assets: {} files", report.asset_count);
    if !report.failures.is_empty() {
        println!(
            "{}",
            format!("⚠️  {} references left pointing at the remote origin", report.failures.len())
                .yellow()
        );
        for failure in &report.failures {
            println!("   {} {} ({})", "✗".red(), failure.url, failure.reason);
        }
    }
    println!("{}", "═".repeat(50));
}
