use mockito::{Mock, Server, ServerGuard};
use site_mirror::config::{Category, SweepRule};
use site_mirror::{MirrorOptions, MirrorReport, MirrorRules, ModulePolicy, Target, WebsiteMirror};
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};

const FOLDER: &str = "site";

async fn html_mock(server: &mut ServerGuard, html: &str) -> Mock {
    server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(html)
        .create_async()
        .await
}

async fn asset_mock(
    server: &mut ServerGuard,
    path: &str,
    content_type: &str,
    body: &str,
    hits: usize,
) -> Mock {
    server
        .mock("GET", path)
        .with_status(200)
        .with_header("content-type", content_type)
        .with_body(body)
        .expect(hits)
        .create_async()
        .await
}

fn target(server: &ServerGuard, root: &TempDir) -> Target {
    Target::new(&format!("{}/", server.url()), FOLDER, root.path()).unwrap()
}

async fn run(
    server: &ServerGuard,
    root: &TempDir,
    configure: impl FnOnce(&mut MirrorOptions),
    rules: MirrorRules,
) -> anyhow::Result<MirrorReport> {
    let target = target(server, root);
    let mut options = MirrorOptions::for_target(&target);
    configure(&mut options);
    WebsiteMirror::new(target, options, rules)?
        .mirror_website()
        .await
}

fn read_index(report: &MirrorReport) -> String {
    fs::read_to_string(&report.index_path).unwrap()
}

fn asset_exists(root: &TempDir, relative: &str) -> bool {
    root.path().join(FOLDER).join(relative).is_file()
}

#[tokio::test]
async fn test_shared_asset_is_fetched_once_across_tags_and_css() {
    let mut server = Server::new_async().await;
    let _page = html_mock(
        &mut server,
        r#"<html><head><link rel="stylesheet" href="/style.css"></head>
        <body><img src="/a.png"><img src="a.png"></body></html>"#,
    )
    .await;
    let css = asset_mock(
        &mut server,
        "/style.css",
        "text/css",
        r#".hero { background: url('a.png') no-repeat, url("a.png"); }"#,
        1,
    )
    .await;
    let image = asset_mock(&mut server, "/a.png", "image/png", "PNG", 1).await;

    let root = tempdir().unwrap();
    let report = run(&server, &root, |_| {}, MirrorRules::framer()).await.unwrap();

    image.assert_async().await;
    css.assert_async().await;
    assert_eq!(report.fetch_count, 2);
    assert!(report.failures.is_empty());

    let html = read_index(&report);
    assert_eq!(html.matches(r#"src="/site/assets/img_0.png""#).count(), 2);
    assert!(html.contains(r#"href="/site/assets/style_1.css""#));

    let stylesheet = fs::read_to_string(root.path().join("site/assets/style_1.css")).unwrap();
    assert_eq!(
        stylesheet,
        ".hero { background: url('/site/assets/img_0.png') no-repeat, url('/site/assets/img_0.png'); }"
    );
}

#[tokio::test]
async fn test_stylesheets_referencing_each_other_complete() {
    let mut server = Server::new_async().await;
    let _page = html_mock(
        &mut server,
        r#"<head><link rel="stylesheet" href="/a.css"><link rel="stylesheet" href="/b.css"></head>"#,
    )
    .await;
    let _a = asset_mock(&mut server, "/a.css", "text/css", ".a { background: url(b.css) }", 1).await;
    let _b = asset_mock(&mut server, "/b.css", "text/css", ".b { background: url(a.css) }", 1).await;

    let root = tempdir().unwrap();
    let report = run(&server, &root, |_| {}, MirrorRules::framer()).await.unwrap();

    assert_eq!(report.fetch_count, 2);
    assert_eq!(report.asset_count, 2);
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_concurrent_duplicates_share_one_download() {
    let mut server = Server::new_async().await;
    let body: String = (0..20).map(|_| r#"<img src="/same.jpg">"#).collect();
    let _page = html_mock(&mut server, &format!("<body>{}</body>", body)).await;
    let image = asset_mock(&mut server, "/same.jpg", "image/jpeg", "JPG", 1).await;

    let root = tempdir().unwrap();
    let report = run(&server, &root, |o| o.max_concurrent = 8, MirrorRules::framer())
        .await
        .unwrap();

    image.assert_async().await;
    assert_eq!(report.asset_count, 1);
    assert_eq!(
        read_index(&report).matches("/site/assets/img_0.jpg").count(),
        20
    );
}

#[tokio::test]
async fn test_extensions_and_counter_order() {
    let mut server = Server::new_async().await;
    let _page = html_mock(
        &mut server,
        r#"<body><img src="/photo"><img src="/hero.JPEG"><img src="/icon.svg"></body>"#,
    )
    .await;
    let _photo = asset_mock(&mut server, "/photo", "image/webp", "W", 1).await;
    let _hero = asset_mock(&mut server, "/hero.JPEG", "image/jpeg", "J", 1).await;
    let _icon = asset_mock(&mut server, "/icon.svg", "image/svg+xml", "<svg/>", 1).await;

    let root = tempdir().unwrap();
    let report = run(&server, &root, |o| o.max_concurrent = 1, MirrorRules::framer())
        .await
        .unwrap();

    let html = read_index(&report);
    assert!(html.contains(r#"<img src="/site/assets/img_0.webp">"#));
    assert!(html.contains(r#"<img src="/site/assets/img_1.jpeg">"#));
    assert!(html.contains(r#"<img src="/site/assets/img_2.svg">"#));
    assert!(asset_exists(&root, "assets/img_0.webp"));
    assert!(asset_exists(&root, "assets/img_2.svg"));
}

#[tokio::test]
async fn test_embedded_data_is_left_alone() {
    let mut server = Server::new_async().await;
    let _page = html_mock(
        &mut server,
        r#"<body><img src="data:image/png;base64,iVBORw0KGgo="><div style="background: url(data:image/gif;base64,R0lGOD)"></div></body>"#,
    )
    .await;

    let root = tempdir().unwrap();
    let report = run(&server, &root, |_| {}, MirrorRules::framer()).await.unwrap();

    assert_eq!(report.fetch_count, 0);
    let html = read_index(&report);
    assert!(html.contains(r#"src="data:image/png;base64,iVBORw0KGgo=""#));
    assert!(html.contains("url(data:image/gif;base64,R0lGOD)"));
}

#[tokio::test]
async fn test_failed_asset_keeps_original_reference() {
    let mut server = Server::new_async().await;
    let _page = html_mock(
        &mut server,
        r#"<body><img src="/missing.png"><img src="/missing.png"><img src="/ok.png"></body>"#,
    )
    .await;
    let missing = server
        .mock("GET", "/missing.png")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;
    let _ok = asset_mock(&mut server, "/ok.png", "image/png", "PNG", 1).await;

    let root = tempdir().unwrap();
    let report = run(&server, &root, |o| o.max_concurrent = 1, MirrorRules::framer())
        .await
        .unwrap();

    missing.assert_async().await;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].category, Category::Image);
    assert!(report.failures[0].url.ends_with("/missing.png"));

    let html = read_index(&report);
    assert_eq!(html.matches(r#"src="/missing.png""#).count(), 2);
    assert!(html.contains(r#"src="/site/assets/img_0.png""#));
}

#[tokio::test]
async fn test_unreachable_document_is_fatal() {
    let mut server = Server::new_async().await;
    let _page = server
        .mock("GET", "/")
        .with_status(404)
        .create_async()
        .await;

    let root = tempdir().unwrap();
    let result = run(&server, &root, |_| {}, MirrorRules::framer()).await;

    assert!(result.is_err());
    assert!(!root.path().join("site/index.html").exists());
}

#[tokio::test]
async fn test_document_cleanup_and_canonical_links() {
    let mut server = Server::new_async().await;
    let page_url = format!("{}/", server.url());
    let html = format!(
        r#"<html><head><base href="https://cdn.example.com/"><link rel="canonical" href="{0}"><meta property="og:url" content="{0}"><link rel="preconnect" href="https://fonts.gstatic.com"><meta name="framer-search-index" content="x.json"><script src="/app.js" integrity="sha384-abc" crossorigin="anonymous"></script></head><body></body></html>"#,
        page_url
    );
    let _page = html_mock(&mut server, &html).await;
    let _app = asset_mock(&mut server, "/app.js", "text/javascript", "run()", 1).await;

    let root = tempdir().unwrap();
    let report = run(&server, &root, |_| {}, MirrorRules::framer()).await.unwrap();

    let html = read_index(&report);
    assert!(!html.contains("<base"));
    assert!(!html.contains("integrity"));
    assert!(!html.contains("crossorigin"));
    assert!(!html.contains("preconnect"));
    assert!(!html.contains("framer-search-index"));
    assert!(html.contains(r#"<link rel="canonical" href="/site">"#));
    assert!(html.contains(r#"content="/site""#));
    assert!(html.contains(r#"<script src="/site/assets/script_0.js"></script>"#));
}

#[tokio::test]
async fn test_fonts_land_in_the_fonts_directory() {
    let mut server = Server::new_async().await;
    let _page = html_mock(
        &mut server,
        r#"<head><link rel="preload" as="font" href="/inter.woff2"></head>"#,
    )
    .await;
    let _font = asset_mock(&mut server, "/inter.woff2", "font/woff2", "WOFF", 1).await;

    let root = tempdir().unwrap();
    let report = run(&server, &root, |_| {}, MirrorRules::framer()).await.unwrap();

    assert!(asset_exists(&root, "assets/fonts/font_0.woff2"));
    assert!(read_index(&report).contains(r#"href="/site/assets/fonts/font_0.woff2""#));
}

#[tokio::test]
async fn test_analytics_scripts_are_not_downloaded() {
    let mut server = Server::new_async().await;
    let _page = html_mock(
        &mut server,
        r#"<head><script src="/analytics.js"></script><script src="/main.js"></script></head>"#,
    )
    .await;
    let analytics = asset_mock(&mut server, "/analytics.js", "text/javascript", "", 0).await;
    let _main = asset_mock(&mut server, "/main.js", "text/javascript", "main()", 1).await;

    let root = tempdir().unwrap();
    let report = run(&server, &root, |_| {}, MirrorRules::framer()).await.unwrap();

    analytics.assert_async().await;
    let html = read_index(&report);
    assert!(html.contains(r#"<script src="/analytics.js"></script>"#));
    assert!(html.contains(r#"<script src="/site/assets/script_0.js"></script>"#));
}

#[tokio::test]
async fn test_inline_styles_and_style_blocks() {
    let mut server = Server::new_async().await;
    let _page = html_mock(
        &mut server,
        r#"<head><style>.hero { background: url(hero.png) }</style></head><body><div style="background-image: url('/bg.jpg'); color: red"></div></body>"#,
    )
    .await;
    let _bg = asset_mock(&mut server, "/bg.jpg", "image/jpeg", "J", 1).await;
    let _hero = asset_mock(&mut server, "/hero.png", "image/png", "P", 1).await;

    let root = tempdir().unwrap();
    let report = run(&server, &root, |_| {}, MirrorRules::framer()).await.unwrap();

    let html = read_index(&report);
    assert!(html.contains(r#"style="background-image: url('/site/assets/bg_0.jpg'); color: red""#));
    assert!(html.contains(".hero { background: url('/site/assets/css_asset_1.png') }"));
}

fn module_rules(server: &ServerGuard) -> MirrorRules {
    let mut rules = MirrorRules::framer();
    rules.sweeps = vec![SweepRule {
        name: "local-modules".to_string(),
        pattern: format!(r#"{}/sites/[^"'\s]+\.mjs"#, regex::escape(&server.url())),
        category: Category::Module,
        counter_start: Some(30),
    }];
    rules
}

#[tokio::test]
async fn test_module_sweep_keeps_local_copies_by_default() {
    let mut server = Server::new_async().await;
    let module_url = format!("{}/sites/react.mjs", server.url());
    let _page = html_mock(
        &mut server,
        &format!(r#"<body><script>import("{}")</script></body>"#, module_url),
    )
    .await;
    let _module = asset_mock(&mut server, "/sites/react.mjs", "text/javascript", "export {}", 1).await;

    let root = tempdir().unwrap();
    let rules = module_rules(&server);
    let report = run(&server, &root, |_| {}, rules).await.unwrap();

    assert!(asset_exists(&root, "assets/module_30.mjs"));
    let html = read_index(&report);
    assert!(html.contains(r#"import("/site/assets/module_30.mjs")"#));
    assert!(!html.contains(&module_url));
}

#[tokio::test]
async fn test_module_revert_points_back_at_remote() {
    let mut server = Server::new_async().await;
    let module_url = format!("{}/sites/react.mjs", server.url());
    let _page = html_mock(
        &mut server,
        &format!(r#"<body><script>import("{}")</script></body>"#, module_url),
    )
    .await;
    let _module = asset_mock(&mut server, "/sites/react.mjs", "text/javascript", "export {}", 1).await;

    let root = tempdir().unwrap();
    let rules = module_rules(&server);
    let report = run(
        &server,
        &root,
        |o| o.module_policy = ModulePolicy::Revert,
        rules,
    )
    .await
    .unwrap();

    assert!(asset_exists(&root, "assets/module_30.mjs"));
    let html = read_index(&report);
    assert!(html.contains(&format!(r#"import("{}")"#, module_url)));
    assert!(!html.contains("module_30.mjs"));
}

#[tokio::test]
async fn test_module_entry_script_is_reverted_with_its_graph() {
    let mut server = Server::new_async().await;
    let entry_url = format!("{}/sites/script_main.mjs", server.url());
    let module_url = format!("{}/sites/react.mjs", server.url());
    let _page = html_mock(
        &mut server,
        &format!(
            r#"<head><script type="module" src="{}"></script><link rel="modulepreload" href="{}"></head>"#,
            entry_url, module_url
        ),
    )
    .await;
    let _entry = asset_mock(&mut server, "/sites/script_main.mjs", "text/javascript", "import './react.mjs'", 1).await;
    let _module = asset_mock(&mut server, "/sites/react.mjs", "text/javascript", "export {}", 1).await;

    let root = tempdir().unwrap();
    let rules = module_rules(&server);
    let report = run(
        &server,
        &root,
        |o| o.module_policy = ModulePolicy::Revert,
        rules,
    )
    .await
    .unwrap();

    assert!(asset_exists(&root, "assets/script_0.mjs"));
    assert!(asset_exists(&root, "assets/module_30.mjs"));
    let html = read_index(&report);
    assert!(html.contains(&format!(r#"<script type="module" src="{}"></script>"#, entry_url)));
    assert!(html.contains(&format!(r#"<link rel="modulepreload" href="{}">"#, module_url)));
    assert!(!html.contains("/site/assets/"));
}

#[tokio::test]
async fn test_fragment_references_are_not_fetched() {
    let mut server = Server::new_async().await;
    let page = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body(
            r#"<head><style>.m { mask: url(#m) }</style></head><body><div style="clip-path: url(#clip)"></div></body>"#,
        )
        .expect(1)
        .create_async()
        .await;

    let root = tempdir().unwrap();
    let report = run(&server, &root, |_| {}, MirrorRules::framer()).await.unwrap();

    page.assert_async().await;
    assert_eq!(report.fetch_count, 0);
    assert_eq!(report.asset_count, 0);
    let html = read_index(&report);
    assert!(html.contains(r#"style="clip-path: url(#clip)""#));
    assert!(html.contains(".m { mask: url(#m) }"));
}

#[tokio::test]
async fn test_every_asset_location_is_localized() {
    let mut server = Server::new_async().await;
    let _page = html_mock(
        &mut server,
        r#"<html><head>
        <link rel="icon" href="/favicon.ico">
        <link rel="apple-touch-icon" href="/touch.png">
        <link rel="shortcut icon" href="/short.ico">
        <meta property="og:image" content="/og.png">
        <meta name="twitter:image" content="/tw.png">
        </head><body>
        <img src="/a.png" srcset="/a-2x.png 2x">
        <img data-src="/lazy.png">
        <video src="/clip.mp4" poster="/poster.jpg"><source src="/clip.webm"></video>
        <div data-poster="/dp.jpg" data-background="/db.jpg"></div>
        </body></html>"#,
    )
    .await;
    let _favicon = asset_mock(&mut server, "/favicon.ico", "image/x-icon", "I", 1).await;
    let _touch = asset_mock(&mut server, "/touch.png", "image/png", "T", 1).await;
    let _short = asset_mock(&mut server, "/short.ico", "image/x-icon", "S", 1).await;
    let _og = asset_mock(&mut server, "/og.png", "image/png", "O", 1).await;
    let _tw = asset_mock(&mut server, "/tw.png", "image/png", "W", 1).await;
    let _img = asset_mock(&mut server, "/a.png", "image/png", "A", 1).await;
    let retina = asset_mock(&mut server, "/a-2x.png", "image/png", "A2", 0).await;
    let _lazy = asset_mock(&mut server, "/lazy.png", "image/png", "L", 1).await;
    let _mp4 = asset_mock(&mut server, "/clip.mp4", "video/mp4", "M", 1).await;
    let _webm = asset_mock(&mut server, "/clip.webm", "video/webm", "V", 1).await;
    let _poster = asset_mock(&mut server, "/poster.jpg", "image/jpeg", "P", 1).await;
    let _dp = asset_mock(&mut server, "/dp.jpg", "image/jpeg", "D", 1).await;
    let _db = asset_mock(&mut server, "/db.jpg", "image/jpeg", "B", 1).await;

    let root = tempdir().unwrap();
    let report = run(&server, &root, |_| {}, MirrorRules::framer()).await.unwrap();

    retina.assert_async().await;
    assert!(report.failures.is_empty());
    assert_eq!(report.asset_count, 12);

    let html = read_index(&report);
    assert_eq!(html.matches(r#"href="/site/assets/icon_"#).count(), 3);
    assert_eq!(html.matches(r#"content="/site/assets/og_image_"#).count(), 2);
    assert_eq!(html.matches(r#"<img src="/site/assets/img_"#).count(), 1);
    assert_eq!(html.matches(r#"data-src="/site/assets/img_"#).count(), 1);
    assert!(!html.contains("srcset"));
    assert_eq!(html.matches(r#"<video src="/site/assets/video_"#).count(), 1);
    assert_eq!(html.matches(r#"<source src="/site/assets/video_"#).count(), 1);
    assert_eq!(html.matches(r#" poster="/site/assets/media_"#).count(), 1);
    assert_eq!(html.matches(r#"data-poster="/site/assets/media_"#).count(), 1);
    assert_eq!(html.matches(r#"data-background="/site/assets/media_"#).count(), 1);
}

#[tokio::test]
async fn test_sweep_does_not_clobber_longer_urls() {
    let mut server = Server::new_async().await;
    let base = format!("{}/images/a.png", server.url());
    let _page = html_mock(
        &mut server,
        &format!(
            r#"<body><script>const a="{0}"; const b="{0}?scale-down-to=512";</script></body>"#,
            base
        ),
    )
    .await;
    let full = asset_mock(&mut server, "/images/a.png", "image/png", "FULL", 1).await;
    let scaled = asset_mock(&mut server, "/images/a.png?scale-down-to=512", "image/png", "SMALL", 1).await;

    let mut rules = MirrorRules::framer();
    rules.sweeps = vec![SweepRule {
        name: "local-images".to_string(),
        pattern: format!(r#"{}/images/[^"')\s]+"#, regex::escape(&server.url())),
        category: Category::PlatformImage,
        counter_start: None,
    }];

    let root = tempdir().unwrap();
    let report = run(&server, &root, |_| {}, rules).await.unwrap();

    full.assert_async().await;
    scaled.assert_async().await;
    let html = read_index(&report);
    assert!(html.contains(r#"const a="/site/assets/platform_img_0.png""#));
    assert!(html.contains(r#"const b="/site/assets/platform_img_1.png""#));
    assert!(!html.contains("scale-down-to"));
}

#[test]
fn test_output_layout_paths() {
    let root = Path::new("public");
    let target = Target::new("https://example.com/", "portfolio", root).unwrap();
    let options = MirrorOptions::for_target(&target);

    assert_eq!(target.output_dir(), root.join("portfolio"));
    assert_eq!(options.public_prefix, "/portfolio");
    assert_eq!(options.max_concurrent, 8);
}
