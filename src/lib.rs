pub mod asset_store;
pub mod cli;
pub mod config;
pub mod css_rewriter;
pub mod downloader;
pub mod error;
pub mod extension;
pub mod file_manager;
pub mod html_parser;
pub mod logging;
pub mod patchers;
pub mod url_resolver;
pub mod walker;

// Re-export main types for convenience
pub use asset_store::{AssetFailure, AssetStore, StoredAsset};
pub use cli::MirrorCommand;
pub use config::{Category, MirrorOptions, MirrorRules, ModulePolicy, Target};
pub use downloader::{MirrorReport, WebsiteMirror};
pub use error::AssetError;
pub use file_manager::FileManager;
pub use patchers::{PatchRule, PatchSet};
pub use url_resolver::UrlResolver;
