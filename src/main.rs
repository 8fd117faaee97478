use anyhow::Context;
use clap::Parser;
use ledger_ocr_prep::config::{Args, Command, Config};
use ledger_ocr_prep::planning::PageContext;
use ledger_ocr_prep::preprocessing::codec::{decode_image, encode_png};
use ledger_ocr_prep::preprocessing::{PageSide, Pipeline};
use ledger_ocr_prep::server;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing (stderr, so `process` can print JSON on stdout)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let command = args.command.clone().unwrap_or(Command::Serve);
    let config = Config::from(args);

    match command {
        Command::Serve => {
            tracing::info!("Starting ledger-ocr-prep v{}", env!("CARGO_PKG_VERSION"));
            tracing::info!("Binding to {}:{}", config.host, config.port);
            server::run(config).await
        }
        Command::Process {
            path,
            out_dir,
            record_type,
            layout_template_id,
        } => {
            let context = PageContext {
                record_type,
                layout_template_id,
            };
            process_file(&config, &path, out_dir.as_deref(), &context)
        }
    }
}

fn process_file(
    config: &Config,
    path: &Path,
    out_dir: Option<&Path>,
    context: &PageContext,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(config.load_pipeline_config()?);
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let output = pipeline.process(decode_image(&bytes)?, context)?;

    if let Some(dir) = out_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        for page in &output.pages {
            let side = match page.side {
                PageSide::Full => "full",
                PageSide::Left => "left",
                PageSide::Right => "right",
            };
            let image_path = dir.join(format!("{}.png", side));
            std::fs::write(&image_path, encode_png(&page.image)?)
                .with_context(|| format!("writing {}", image_path.display()))?;
            let mask_path = dir.join(format!("{}_mask.png", side));
            let mask = image::DynamicImage::ImageLuma8(page.mask.clone());
            std::fs::write(&mask_path, encode_png(&mask)?)
                .with_context(|| format!("writing {}", mask_path.display()))?;
        }
        tracing::info!(dir = %dir.display(), pages = output.pages.len(), "wrote page images");
    }

    println!("{}", serde_json::to_string_pretty(&output.report)?);
    Ok(())
}
