use futures::stream::{self, StreamExt};
use markup5ever_rcdom::{Handle, RcDom};
use tracing::debug;

use crate::asset_store::AssetStore;
use crate::config::{Category, MirrorRules};
use crate::css_rewriter::{self, url_expression_regex};
use crate::html_parser::{
    attr_tokens, elements, elements_named, get_attr, is_element, remove_attr, remove_elements,
    set_attr, set_text_content, text_content,
};
use crate::url_resolver::{is_inline_reference, UrlResolver};

const AUXILIARY_ATTRS: [&str; 3] = ["poster", "data-poster", "data-background"];
const ICON_RELS: [&str; 3] = ["icon", "apple-touch-icon", "shortcut icon"];

/// One sweep over the tree for a family of asset-bearing locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Images,
    Backgrounds,
    Stylesheets,
    StyleBlocks,
    Scripts,
    Icons,
    Videos,
    Fonts,
    Auxiliary,
    SocialImages,
}

impl Pass {
    pub const ALL: [Pass; 10] = [
        Pass::Images,
        Pass::Backgrounds,
        Pass::Stylesheets,
        Pass::StyleBlocks,
        Pass::Scripts,
        Pass::Icons,
        Pass::Videos,
        Pass::Fonts,
        Pass::Auxiliary,
        Pass::SocialImages,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Pass::Images => "🖼️  Downloading images...",
            Pass::Backgrounds => "🎨 Downloading background images...",
            Pass::Stylesheets => "📝 Downloading CSS...",
            Pass::StyleBlocks => "📝 Rewriting inline style blocks...",
            Pass::Scripts => "📜 Downloading scripts...",
            Pass::Icons => "🔷 Downloading icons...",
            Pass::Videos => "🎬 Downloading videos...",
            Pass::Fonts => "🔤 Downloading preloaded fonts...",
            Pass::Auxiliary => "📎 Downloading media attributes...",
            Pass::SocialImages => "🖼️  Downloading social preview images...",
        }
    }
}

#[derive(Debug, Clone)]
enum Job {
    Asset(Category),
    Stylesheet,
    /// Replace `expression` (the first `url(...)` of `style`) with the local copy.
    InlineStyle { style: String, expression: String },
    StyleBlock,
}

/// A location in the tree that may be rewritten, with what to do about it.
struct Site {
    node: Handle,
    attr: &'static str,
    reference: String,
    job: Job,
}

impl Site {
    fn attr(node: &Handle, attr: &'static str, job: Job) -> Option<Self> {
        let reference = get_attr(node, attr)?;
        Some(Self {
            node: node.clone(),
            attr,
            reference,
            job,
        })
    }
}

/// Finds every asset-bearing location in a parsed document and points it at
/// a local copy obtained through the [`AssetStore`].
///
/// Fetches within a pass run concurrently; the rewritten values are written
/// back to the tree one at a time once the pass's fetches have finished.
pub struct DocumentWalker<'a> {
    store: &'a AssetStore,
    rules: &'a MirrorRules,
    resolver: UrlResolver,
    max_concurrent: usize,
}

impl<'a> DocumentWalker<'a> {
    pub fn new(
        store: &'a AssetStore,
        rules: &'a MirrorRules,
        resolver: UrlResolver,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            rules,
            resolver,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Removes `<base>` and the `integrity`/`crossorigin` attributes, which
    /// would break relative resolution and the rewritten local copies.
    pub fn clean(&self, dom: &RcDom) {
        let removed = remove_elements(&dom.document, "base");
        let mut stripped = 0;
        for node in elements(&dom.document) {
            stripped += remove_attr(&node, "integrity") as usize;
            stripped += remove_attr(&node, "crossorigin") as usize;
        }
        debug!(base_tags = removed, attributes = stripped, "cleaned document");
    }

    /// Runs one pass and returns how many locations were rewritten.
    pub async fn run_pass(&self, dom: &RcDom, pass: Pass) -> usize {
        let sites = self.collect(&dom.document, pass);
        if sites.is_empty() {
            return 0;
        }

        let results: Vec<(usize, Option<String>)> = stream::iter(sites.iter().enumerate())
            .map(|(index, site)| async move { (index, self.localize(site).await) })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        let mut rewritten = 0;
        for (index, value) in results {
            let Some(value) = value else { continue };
            let site = &sites[index];
            match site.job {
                Job::StyleBlock => set_text_content(&site.node, &value),
                _ => {
                    set_attr(&site.node, site.attr, &value);
                }
            }
            rewritten += 1;
        }

        debug!(?pass, found = sites.len(), rewritten, "pass finished");
        rewritten
    }

    /// New value for the site's attribute (or text), or `None` to leave it be.
    async fn localize(&self, site: &Site) -> Option<String> {
        match &site.job {
            Job::Asset(category) => {
                let url = self
                    .store
                    .resolve(&self.resolver, &site.reference, *category)
                    .await?;
                self.store.fetch_asset(&url, *category).await
            }
            Job::Stylesheet => {
                let url = self
                    .store
                    .resolve(&self.resolver, &site.reference, Category::Stylesheet)
                    .await?;
                self.store.fetch_stylesheet(&url).await
            }
            Job::InlineStyle { style, expression } => {
                let url = self
                    .store
                    .resolve(&self.resolver, &site.reference, Category::Background)
                    .await?;
                let local_path = self.store.fetch_asset(&url, Category::Background).await?;
                Some(style.replacen(expression, &format!("url('{}')", local_path), 1))
            }
            Job::StyleBlock => {
                let rewritten =
                    css_rewriter::rewrite_stylesheet(self.store, &self.resolver, &site.reference)
                        .await;
                (rewritten != site.reference).then_some(rewritten)
            }
        }
    }

    fn collect(&self, root: &Handle, pass: Pass) -> Vec<Site> {
        match pass {
            Pass::Images => self.collect_images(root),
            Pass::Backgrounds => self.collect_backgrounds(root),
            Pass::Stylesheets => elements_named(root, "link")
                .iter()
                .filter(|node| attr_tokens(node, "rel").iter().any(|t| t == "stylesheet"))
                .filter_map(|node| Site::attr(node, "href", Job::Stylesheet))
                .collect(),
            Pass::StyleBlocks => elements_named(root, "style")
                .into_iter()
                .map(|node| Site {
                    reference: text_content(&node),
                    node,
                    attr: "",
                    job: Job::StyleBlock,
                })
                .filter(|site| site.reference.contains("url("))
                .collect(),
            Pass::Scripts => elements_named(root, "script")
                .iter()
                .filter_map(|node| Site::attr(node, "src", Job::Asset(Category::Script)))
                .filter(|site| !self.is_skipped_script(&site.reference))
                .collect(),
            Pass::Icons => elements_named(root, "link")
                .iter()
                .filter(|node| {
                    let rel = attr_tokens(node, "rel").join(" ");
                    ICON_RELS.contains(&rel.as_str())
                })
                .filter_map(|node| Site::attr(node, "href", Job::Asset(Category::Icon)))
                .collect(),
            Pass::Videos => self.collect_videos(root),
            Pass::Fonts => elements_named(root, "link")
                .iter()
                .filter(|node| {
                    attr_tokens(node, "rel").iter().any(|t| t == "preload")
                        && get_attr(node, "as").is_some_and(|v| v.eq_ignore_ascii_case("font"))
                })
                .filter_map(|node| Site::attr(node, "href", Job::Asset(Category::Font)))
                .collect(),
            Pass::Auxiliary => {
                let nodes = elements(root);
                AUXILIARY_ATTRS
                    .iter()
                    .flat_map(|&attr| {
                        nodes.iter().filter_map(move |node| {
                            Site::attr(node, attr, Job::Asset(Category::Media))
                        })
                    })
                    .collect()
            }
            Pass::SocialImages => elements_named(root, "meta")
                .iter()
                .filter(|node| {
                    get_attr(node, "property").as_deref() == Some("og:image")
                        || get_attr(node, "name").as_deref() == Some("twitter:image")
                })
                .filter_map(|node| Site::attr(node, "content", Job::Asset(Category::SocialImage)))
                .collect(),
        }
    }

    /// `src` and `data-src` of every image. Responsive `srcset` candidates are
    /// dropped rather than rewritten.
    fn collect_images(&self, root: &Handle) -> Vec<Site> {
        let mut sites = Vec::new();
        for node in elements_named(root, "img") {
            remove_attr(&node, "srcset");
            for attr in ["src", "data-src"] {
                sites.extend(Site::attr(&node, attr, Job::Asset(Category::Image)));
            }
        }
        sites
    }

    /// Only the first `url(...)` of each style attribute is handled.
    fn collect_backgrounds(&self, root: &Handle) -> Vec<Site> {
        elements(root)
            .iter()
            .filter_map(|node| {
                let style = get_attr(node, "style")?;
                let caps = url_expression_regex().captures(&style)?;
                let expression = caps.get(0)?.as_str().to_string();
                let reference = caps.get(1)?.as_str().to_string();
                if is_inline_reference(&reference) {
                    return None;
                }
                Some(Site {
                    node: node.clone(),
                    attr: "style",
                    reference,
                    job: Job::InlineStyle { style, expression },
                })
            })
            .collect()
    }

    fn collect_videos(&self, root: &Handle) -> Vec<Site> {
        let mut sites = Vec::new();
        for video in elements_named(root, "video") {
            sites.extend(Site::attr(&video, "src", Job::Asset(Category::Video)));
            for source in elements(&video).iter().filter(|n| is_element(n, "source")) {
                sites.extend(Site::attr(source, "src", Job::Asset(Category::Video)));
            }
        }
        sites
    }

    fn is_skipped_script(&self, src: &str) -> bool {
        self.rules
            .skip_script_markers
            .iter()
            .any(|marker| src.contains(marker.as_str()))
    }
}
