use regex::Regex;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::OnceLock;

use crate::asset_store::AssetStore;
use crate::config::Category;
use crate::url_resolver::{is_inline_reference, UrlResolver};

/// Matches `url(...)` with a single-quoted, double-quoted or bare argument.
pub fn url_expression_regex() -> &'static Regex {
    static URL_EXPRESSION: OnceLock<Regex> = OnceLock::new();
    URL_EXPRESSION.get_or_init(|| {
        Regex::new(r#"url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#).expect("url() pattern is valid")
    })
}

/// A `url(...)` occurrence in stylesheet text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlExpression {
    pub span: Range<usize>,
    pub reference: String,
}

/// Every `url(...)` expression in `css`, in text order, embedded data excluded.
pub fn find_url_expressions(css: &str) -> Vec<UrlExpression> {
    url_expression_regex()
        .captures_iter(css)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let reference = caps.get(1)?.as_str();
            (!is_inline_reference(reference)).then(|| UrlExpression {
                span: whole.range(),
                reference: reference.to_string(),
            })
        })
        .collect()
}

/// Downloads everything `css` points at and returns the text with each
/// `url(...)` expression pointing at the local copy.
///
/// Replacements are computed from the original matches, so every occurrence
/// of the same URL ends up with the same local path however it was quoted. A
/// reference that cannot be localized is written out as its absolute URL,
/// since the rewritten sheet no longer lives next to the files it named. The
/// same goes for references to stylesheets that are mid-rewrite.
pub async fn rewrite_stylesheet(store: &AssetStore, resolver: &UrlResolver, css: &str) -> String {
    let expressions = find_url_expressions(css);
    if expressions.is_empty() {
        return css.to_string();
    }

    let mut replacements: HashMap<&str, String> = HashMap::new();
    for expression in &expressions {
        if replacements.contains_key(expression.reference.as_str()) {
            continue;
        }

        let Some(url) = store
            .resolve(resolver, &expression.reference, Category::CssAsset)
            .await
        else {
            continue;
        };

        // Sheets still being rewritten (this one included) cannot be waited on.
        let target = if store.is_rewriting(&url) {
            url.to_string()
        } else {
            match store.fetch_asset(&url, Category::CssAsset).await {
                Some(local_path) => local_path,
                None => url.to_string(),
            }
        };
        replacements.insert(expression.reference.as_str(), format!("url('{}')", target));
    }

    let mut rewritten = String::with_capacity(css.len());
    let mut cursor = 0;
    for expression in &expressions {
        if let Some(replacement) = replacements.get(expression.reference.as_str()) {
            rewritten.push_str(&css[cursor..expression.span.start]);
            rewritten.push_str(replacement);
            cursor = expression.span.end;
        }
    }
    rewritten.push_str(&css[cursor..]);
    rewritten
}
