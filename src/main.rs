use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use image::ColorType;
use log::{info, warn};
use simplelog::{Config, LevelFilter, WriteLogger};

use pagewise::settings::{load_config, load_config_from_path};
use pagewise::{CacheEntry, MupdfBackend, PageViewer, PixelFormat, Point, Rect};

/// Headless driver: lay out a document, render the visible window and
/// optionally export pages and selected text
#[derive(Parser, Debug)]
#[command(name = "pagewise", version, about)]
struct Cli {
    /// Document to open
    file: PathBuf,

    /// Zoom factor (1.0 = 100%)
    #[arg(long)]
    zoom: Option<f32>,

    /// Base rendering DPI
    #[arg(long)]
    dpi: Option<f32>,

    /// Scroll offset of the viewport top, in pixels
    #[arg(long, default_value_t = 0.0)]
    scroll: f32,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 1000.0)]
    height: f32,

    /// Jump to this page (1-based) instead of using --scroll
    #[arg(long)]
    page: Option<usize>,

    /// Drag rectangle in content space, as x0,y0,x1,y1
    #[arg(long, value_parser = parse_rect)]
    select: Option<Rect>,

    /// Write the visible pages as PNG files into this directory
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Config file (defaults to the per-user config)
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "pagewise.log")]
    log_file: PathBuf,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// Give up waiting for renders after this many seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

fn parse_rect(s: &str) -> Result<Rect, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid number in {s:?}: {e}"))?;

    match values.as_slice() {
        [x0, y0, x1, y1] => Ok(Rect::new(*x0, *y0, *x1, *y1)),
        _ => Err(format!("expected x0,y0,x1,y1, got {s:?}")),
    }
}

fn main() -> Result<()> {
    better_panic::install();
    let cli = Cli::parse();

    WriteLogger::init(
        cli.log_level,
        Config::default(),
        File::create(&cli.log_file)
            .with_context(|| format!("creating log file {}", cli.log_file.display()))?,
    )?;
    info!("Starting pagewise on {}", cli.file.display());

    let config = match &cli.config {
        Some(path) => load_config_from_path(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => load_config(),
    };

    let doc = MupdfBackend::open(&cli.file)
        .with_context(|| format!("opening {}", cli.file.display()))?;

    let mut viewer = PageViewer::new(config);
    if let Some(dpi) = cli.dpi {
        viewer.set_dpi(dpi);
    }
    match cli.zoom {
        Some(zoom) => viewer.set_document_with_zoom(Arc::new(doc), zoom),
        None => viewer.set_document(Arc::new(doc)),
    }
    viewer.update_viewport(cli.scroll, cli.height);
    if let Some(page) = cli.page {
        viewer.go_to_page(page.saturating_sub(1));
    }

    wait_for_visible(&mut viewer, Duration::from_secs(cli.timeout))?;

    let visible = viewer.state().visible_pages();
    println!(
        "{} pages, zoom {:.2}, current page {}, visible {:?}",
        viewer.layout().len(),
        viewer.zoom(),
        viewer.current_page() + 1,
        visible.iter().map(|p| p + 1).collect::<Vec<_>>()
    );

    if let Some(dir) = &cli.out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
        for page in &visible {
            if let Some(entry) = viewer.cached_page(*page) {
                let path = write_png(dir, &entry)?;
                println!("wrote {}", path.display());
            }
        }
    }

    if let Some(rect) = cli.select {
        if viewer.start_selection(Point::new(rect.x0, rect.y0)) {
            viewer.update_selection(Point::new(rect.x1, rect.y1));
            println!("{}", viewer.end_selection());
        } else {
            warn!("Selection start ({}, {}) is not over text", rect.x0, rect.y0);
            eprintln!("no text at selection start");
        }
    }

    viewer.shutdown();
    info!("Shutting down pagewise");
    Ok(())
}

/// Pump the viewer until every visible page is cached or nothing is left in
/// flight
fn wait_for_visible(viewer: &mut PageViewer, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        viewer.pump();
        let cached = viewer.cached_pages();
        let visible = viewer.state().visible_pages();
        let missing = visible.iter().filter(|p| !cached.contains(p)).count();

        if missing == 0 {
            return Ok(());
        }
        if viewer.pending_pages().is_empty() {
            warn!("{missing} visible pages failed to render");
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("timed out waiting for {missing} pages to render");
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

fn write_png(dir: &Path, entry: &CacheEntry) -> Result<PathBuf> {
    let path = dir.join(format!("page-{:04}.png", entry.page_index + 1));
    let color = match entry.pixels.format {
        PixelFormat::Rgba8 => ColorType::Rgba8,
        PixelFormat::Rgb8 => ColorType::Rgb8,
    };

    image::save_buffer(
        &path,
        &entry.pixels.data,
        entry.pixels.width,
        entry.pixels.height,
        color,
    )
    .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}
