use anyhow::Result;
use clap::Parser;

use site_mirror::cli::MirrorCommand;
use site_mirror::downloader::WebsiteMirror;
use site_mirror::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let args = MirrorCommand::parse();
    init_logging(args.verbose)?;

    let target = args.target()?;
    let options = args.options(&target);
    let rules = args.mirror_rules()?;

    let mirror = WebsiteMirror::new(target, options, rules)?;
    let report = mirror.mirror_website().await?;

    println!(
        "✅ Website mirroring completed successfully! Open {:?}",
        report.index_path
    );
    Ok(())
}
