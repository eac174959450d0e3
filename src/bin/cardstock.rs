use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use cardstock::{
    Canvas, Card, FramePackTemplate, FsAssets, MemoryCatalog, MemoryFonts, RenderInputs, render,
};

#[derive(Parser, Debug)]
#[command(name = "cardstock", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a card to a PNG.
    Render(RenderArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Template catalog JSON (a single template or an array of templates).
    #[arg(long)]
    templates: PathBuf,

    /// Card state JSON.
    #[arg(long)]
    card: PathBuf,

    /// Asset directory (frame bitmaps, masks, symbols/ subdirectory).
    #[arg(long)]
    assets: PathBuf,

    /// Font directory (name.ttf, name-italic.ttf, name-bold.ttf).
    #[arg(long)]
    fonts: Option<PathBuf>,

    /// Output raster width in pixels.
    #[arg(long, default_value_t = 1500)]
    width: u32,

    /// Output raster height in pixels.
    #[arg(long, default_value_t = 2100)]
    height: u32,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
    }
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let catalog = read_catalog(&args.templates)?;
    let card = read_card(&args.card)?;
    let assets = FsAssets::new(&args.assets);
    let fonts = match &args.fonts {
        Some(dir) => load_fonts(dir)?,
        None => MemoryFonts::new(),
    };

    let canvas = Canvas::new(args.width, args.height)?;
    let inputs = RenderInputs {
        catalog: &catalog,
        assets: &assets,
        fonts: &fonts,
    };
    let output = render(&inputs, &card, canvas)?;

    for problem in &output.problems {
        eprintln!("render problem [{}]: {}", problem.source, problem.error);
    }

    let raster = output.raster;
    let img = image::RgbaImage::from_raw(
        raster.width(),
        raster.height(),
        unpremultiply(raster.into_data()),
    )
    .context("assemble output image")?;
    img.save(&args.out)
        .with_context(|| format!("write '{}'", args.out.display()))?;

    println!("wrote {}", args.out.display());
    Ok(())
}

fn read_catalog(path: &Path) -> anyhow::Result<MemoryCatalog> {
    let f = File::open(path).with_context(|| format!("open templates '{}'", path.display()))?;
    let value: serde_json::Value = serde_json::from_reader(BufReader::new(f))
        .with_context(|| format!("parse templates '{}'", path.display()))?;

    let templates: Vec<FramePackTemplate> = if value.is_array() {
        serde_json::from_value(value).context("parse template array")?
    } else {
        vec![serde_json::from_value(value).context("parse template")?]
    };

    let mut catalog = MemoryCatalog::new();
    for template in templates {
        catalog.insert(template)?;
    }
    Ok(catalog)
}

fn read_card(path: &Path) -> anyhow::Result<Card> {
    let f = File::open(path).with_context(|| format!("open card '{}'", path.display()))?;
    serde_json::from_reader(BufReader::new(f))
        .with_context(|| format!("parse card '{}'", path.display()))
}

fn load_fonts(dir: &Path) -> anyhow::Result<MemoryFonts> {
    let mut fonts = MemoryFonts::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("read fonts '{}'", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let is_font = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("ttf") || ext.eq_ignore_ascii_case("otf"));
        if !is_font {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let bytes =
            std::fs::read(&path).with_context(|| format!("read font '{}'", path.display()))?;
        fonts
            .insert_bytes(stem, &bytes)
            .with_context(|| format!("parse font '{}'", path.display()))?;
    }
    Ok(fonts)
}

/// PNG wants straight alpha; the engine works premultiplied throughout.
fn unpremultiply(mut data: Vec<u8>) -> Vec<u8> {
    for px in data.chunks_exact_mut(4) {
        let a = px[3] as u32;
        if a == 0 || a == 255 {
            continue;
        }
        px[0] = ((px[0] as u32 * 255 + a / 2) / a).min(255) as u8;
        px[1] = ((px[1] as u32 * 255 + a / 2) / a).min(255) as u8;
        px[2] = ((px[2] as u32 * 255 + a / 2) / a).min(255) as u8;
    }
    data
}
