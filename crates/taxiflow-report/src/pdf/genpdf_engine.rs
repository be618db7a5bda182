use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use genpdf::elements::{Break, FrameCellDecorator, Image, Paragraph, TableLayout};
use genpdf::fonts::{FontData, FontFamily};
use genpdf::style::{Style, StyledString};
use genpdf::{Alignment, Document, Element as _, SimplePageDecorator};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use super::{PdfRenderer, RenderError};
use crate::compose::HtmlDocument;

const ENGINE: &str = "genpdf";

/// Charts are downsampled to this width before embedding; printed at [`IMAGE_DPI`] this is
/// six inches, inside the A4 text width.
pub const IMAGE_MAX_WIDTH: u32 = 600;
const IMAGE_DPI: f64 = 100.0;

static BLOCK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?is)<h(?P<level>[1-6])(?:\s[^>]*)?>(?P<heading>.*?)</h[1-6]>",
        r"|<p(?:\s[^>]*)?>(?P<para>.*?)</p>",
        r"|<pre(?:\s[^>]*)?>(?P<pre>.*?)</pre>",
        r"|<table(?:\s[^>]*)?>(?P<table>.*?)</table>",
        r"|<img\b(?P<img>[^>]*)>",
    ))
    .expect("block pattern is valid")
});
static TITLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title pattern is valid"));
static ROW_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<tr(?:\s[^>]*)?>(.*?)</tr>").expect("row pattern is valid"));
static CELL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(t[hd])(?:\s[^>]*)?>(.*?)</t[hd]>").expect("cell pattern is valid")
});
static TAG_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag pattern is valid"));
static SRC_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bsrc\s*=\s*"([^"]*)""#).expect("src pattern is valid"));
static ALT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\balt\s*=\s*"([^"]*)""#).expect("alt pattern is valid"));

/// The block-level content the fallback engine knows how to lay out.
#[derive(Debug, Clone, PartialEq)]
pub enum HtmlBlock {
    Heading { level: u8, text: String },
    Paragraph(String),
    Preformatted(String),
    Table {
        header: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Image { alt: String, png: Vec<u8> },
}

/// Extracts headings, paragraphs, preformatted text, tables and data-URL images, in
/// document order. Everything else (styles, wrappers, external images) is ignored.
pub fn parse_blocks(html: &str) -> Vec<HtmlBlock> {
    let mut blocks = Vec::new();

    for caps in BLOCK_PATTERN.captures_iter(html) {
        if let (Some(level), Some(body)) = (caps.name("level"), caps.name("heading")) {
            let text = inline_text(body.as_str());
            if !text.is_empty() {
                blocks.push(HtmlBlock::Heading {
                    level: level.as_str().parse().unwrap_or(1),
                    text,
                });
            }
        } else if let Some(body) = caps.name("para") {
            let text = inline_text(body.as_str());
            if !text.is_empty() {
                blocks.push(HtmlBlock::Paragraph(text));
            }
        } else if let Some(body) = caps.name("pre") {
            let text = decode_entities(&TAG_PATTERN.replace_all(body.as_str(), ""));
            blocks.push(HtmlBlock::Preformatted(text.trim_matches('\n').to_string()));
        } else if let Some(body) = caps.name("table") {
            if let Some(table) = parse_table(body.as_str()) {
                blocks.push(table);
            }
        } else if let Some(attrs) = caps.name("img") {
            if let Some(image) = parse_image(attrs.as_str()) {
                blocks.push(image);
            }
        }
    }
    blocks
}

pub fn document_title(html: &str) -> Option<String> {
    TITLE_PATTERN
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|title| inline_text(title.as_str()))
        .filter(|title| !title.is_empty())
}

fn parse_table(body: &str) -> Option<HtmlBlock> {
    let mut header = Vec::new();
    let mut rows = Vec::new();

    for row in ROW_PATTERN.captures_iter(body) {
        let mut is_header = false;
        let cells: Vec<String> = CELL_PATTERN
            .captures_iter(&row[1])
            .map(|cell| {
                is_header |= cell[1].eq_ignore_ascii_case("th");
                inline_text(&cell[2])
            })
            .collect();
        if cells.is_empty() {
            continue;
        }
        if is_header && header.is_empty() && rows.is_empty() {
            header = cells;
        } else {
            rows.push(cells);
        }
    }

    if header.is_empty() && rows.is_empty() {
        return None;
    }
    Some(HtmlBlock::Table { header, rows })
}

fn parse_image(attrs: &str) -> Option<HtmlBlock> {
    let src = SRC_PATTERN.captures(attrs)?.get(1)?.as_str();
    let alt = ALT_PATTERN
        .captures(attrs)
        .and_then(|caps| caps.get(1))
        .map(|alt| decode_entities(alt.as_str()))
        .unwrap_or_default();

    let Some(payload) = src
        .strip_prefix("data:image/")
        .and_then(|rest| rest.split_once(";base64,"))
        .map(|(_, payload)| payload)
    else {
        debug!(src, "skipping image without an embedded payload");
        return None;
    };

    match STANDARD.decode(decode_entities(payload).trim()) {
        Ok(png) => Some(HtmlBlock::Image { alt, png }),
        Err(err) => {
            warn!(image = %alt, error = %err, "embedded image is not valid base64");
            None
        }
    }
}

/// Text content of an inline fragment: tags dropped, entities decoded, whitespace collapsed.
fn inline_text(fragment: &str) -> String {
    let stripped = TAG_PATTERN.replace_all(fragment, " ");
    decode_entities(&stripped)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn decode_entities(text: &str) -> String {
    const ENTITIES: [(&str, &str); 10] = [
        ("&lt;", "<"),
        ("&gt;", ">"),
        ("&quot;", "\""),
        ("&#39;", "'"),
        ("&#x27;", "'"),
        ("&#x3D;", "="),
        ("&#x60;", "`"),
        ("&nbsp;", " "),
        ("&times;", "×"),
        ("&amp;", "&"),
    ];
    ENTITIES
        .iter()
        .fold(text.to_string(), |acc, (entity, plain)| acc.replace(entity, plain))
}

/// Lays the HTML out natively with genpdf. Needs a TrueType font family on disk; without
/// one the engine reports itself unavailable.
#[derive(Debug, Clone)]
pub struct GenpdfRenderer {
    font_dirs: Vec<PathBuf>,
    font_family: String,
}

impl GenpdfRenderer {
    pub fn new(font_dirs: Vec<PathBuf>, font_family: impl Into<String>) -> Self {
        Self {
            font_dirs,
            font_family: font_family.into(),
        }
    }

    fn load_fonts(&self) -> Result<FontFamily<FontData>, RenderError> {
        for dir in &self.font_dirs {
            match genpdf::fonts::from_files(dir, &self.font_family, None) {
                Ok(family) => {
                    debug!(dir = %dir.display(), family = %self.font_family, "loaded PDF fonts");
                    return Ok(family);
                }
                Err(err) => {
                    debug!(dir = %dir.display(), error = %err, "font family not found");
                }
            }
        }
        Err(RenderError::Unavailable {
            engine: ENGINE,
            reason: format!(
                "font family `{}` not found in {:?}",
                self.font_family, self.font_dirs
            ),
        })
    }
}

impl PdfRenderer for GenpdfRenderer {
    fn name(&self) -> &'static str {
        ENGINE
    }

    fn render(&self, html: &HtmlDocument, output: &Path) -> Result<(), RenderError> {
        let fonts = self.load_fonts()?;

        let mut doc = Document::new(fonts);
        doc.set_title(document_title(&html.content).unwrap_or_else(|| "Report".to_string()));
        doc.set_font_size(10);
        let mut decorator = SimplePageDecorator::new();
        decorator.set_margins(18);
        doc.set_page_decorator(decorator);

        for block in parse_blocks(&html.content) {
            push_block(&mut doc, block)?;
        }

        doc.render_to_file(output).map_err(|err| RenderError::Failed {
            engine: ENGINE,
            message: err.to_string(),
        })
    }
}

fn push_block(doc: &mut Document, block: HtmlBlock) -> Result<(), RenderError> {
    match block {
        HtmlBlock::Heading { level, text } => {
            let size = match level {
                1 => 20,
                2 => 15,
                _ => 12,
            };
            doc.push(Break::new(0.5));
            doc.push(Paragraph::new(StyledString::new(
                text,
                Style::new().bold().with_font_size(size),
            )));
            doc.push(Break::new(0.25));
        }
        HtmlBlock::Paragraph(text) => {
            doc.push(Paragraph::new(text));
            doc.push(Break::new(0.25));
        }
        HtmlBlock::Preformatted(text) => {
            let style = Style::new().with_font_size(8);
            for line in text.lines() {
                doc.push(Paragraph::new(StyledString::new(line.to_string(), style)));
            }
            doc.push(Break::new(0.25));
        }
        HtmlBlock::Table { header, rows } => {
            doc.push(build_table(header, rows)?);
            doc.push(Break::new(0.5));
        }
        HtmlBlock::Image { alt, png } => match load_image(&png) {
            Ok(image) => {
                doc.push(image.with_alignment(Alignment::Center).with_dpi(IMAGE_DPI));
                doc.push(Break::new(0.5));
            }
            Err(err) => {
                warn!(image = %alt, error = %err, "image left out of the PDF");
                doc.push(Paragraph::new(format!("[{alt}]")));
            }
        },
    }
    Ok(())
}

fn build_table(header: Vec<String>, rows: Vec<Vec<String>>) -> Result<TableLayout, RenderError> {
    let columns = rows.iter().map(Vec::len).chain([header.len()]).max().unwrap_or(1).max(1);
    let mut table = TableLayout::new(vec![1; columns]);
    table.set_cell_decorator(FrameCellDecorator::new(true, true, false));

    if !header.is_empty() {
        push_row(&mut table, header, columns, Style::new().bold())?;
    }
    for row in rows {
        push_row(&mut table, row, columns, Style::new())?;
    }
    Ok(table)
}

fn push_row(
    table: &mut TableLayout,
    mut cells: Vec<String>,
    columns: usize,
    style: Style,
) -> Result<(), RenderError> {
    cells.resize(columns, String::new());
    let mut row = table.row();
    for cell in cells {
        row.push_element(Paragraph::new(StyledString::new(cell, style)).padded(1));
    }
    row.push().map_err(|err| RenderError::Failed {
        engine: ENGINE,
        message: err.to_string(),
    })
}

fn load_image(png: &[u8]) -> Result<Image, RenderError> {
    let decoded = image::load_from_memory_with_format(png, ImageFormat::Png).map_err(|err| {
        RenderError::Failed {
            engine: ENGINE,
            message: err.to_string(),
        }
    })?;
    Image::from_dynamic_image(downsample(decoded)).map_err(|err| RenderError::Failed {
        engine: ENGINE,
        message: err.to_string(),
    })
}

/// Shrinks wide images to [`IMAGE_MAX_WIDTH`] and drops any alpha channel, which genpdf
/// rejects. The pixels are embedded uncompressed, so this bounds the PDF size.
fn downsample(image: DynamicImage) -> DynamicImage {
    let image = if image.width() > IMAGE_MAX_WIDTH {
        image.resize(IMAGE_MAX_WIDTH, u32::MAX, FilterType::Triangle)
    } else {
        image
    };
    DynamicImage::ImageRgb8(image.to_rgb8())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<!DOCTYPE html>
<html><head><title>Trip &amp; Fare Report</title>
<style>h1 { font-size: 24pt; } p.meta { color: #666; }</style></head>
<body>
<h1>Trip Report</h1>
<p class="meta">Generated
   today</p>
<pre>col   dtype
fare  f64</pre>
<table>
<tr><th>Column</th><th>Missing</th></tr>
<tr><td>fare_amount</td><td>0</td></tr>
<tr><td>PULocationID</td><td>3</td></tr>
</table>
<div class="plot"><h3>Fare Vs Distance</h3>
<img src="data:image/png;base64,cG5n" alt="Fare Vs Distance"></div>
<img src="plots/external.png" alt="External">
<p>10,000 rows &times; 20 columns</p>
</body></html>"#;

    #[test]
    fn blocks_are_extracted_in_document_order() {
        let blocks = parse_blocks(SAMPLE);
        assert_eq!(
            blocks,
            vec![
                HtmlBlock::Heading {
                    level: 1,
                    text: "Trip Report".to_string()
                },
                HtmlBlock::Paragraph("Generated today".to_string()),
                HtmlBlock::Preformatted("col   dtype\nfare  f64".to_string()),
                HtmlBlock::Table {
                    header: vec!["Column".to_string(), "Missing".to_string()],
                    rows: vec![
                        vec!["fare_amount".to_string(), "0".to_string()],
                        vec!["PULocationID".to_string(), "3".to_string()],
                    ],
                },
                HtmlBlock::Heading {
                    level: 3,
                    text: "Fare Vs Distance".to_string()
                },
                HtmlBlock::Image {
                    alt: "Fare Vs Distance".to_string(),
                    png: b"png".to_vec()
                },
                HtmlBlock::Paragraph("10,000 rows × 20 columns".to_string()),
            ]
        );
    }

    #[test]
    fn title_is_decoded() {
        assert_eq!(document_title(SAMPLE).as_deref(), Some("Trip & Fare Report"));
        assert_eq!(document_title("<p>no head</p>"), None);
    }

    #[test]
    fn escaped_padding_is_decoded_before_base64() {
        let blocks = parse_blocks(r#"<img alt="x" src="data:image/png;base64,cG5nIQ&#x3D;&#x3D;">"#);
        assert_eq!(
            blocks,
            vec![HtmlBlock::Image {
                alt: "x".to_string(),
                png: b"png!".to_vec()
            }]
        );
    }

    #[test]
    fn missing_fonts_make_the_engine_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = GenpdfRenderer::new(vec![dir.path().to_path_buf()], "NoSuchFont");
        let html = HtmlDocument {
            path: dir.path().join("report.html"),
            content: SAMPLE.to_string(),
        };
        let result = renderer.render(&html, &dir.path().join("report.pdf"));
        assert!(matches!(result, Err(RenderError::Unavailable { .. })));
        assert!(!dir.path().join("report.pdf").exists());
    }

    #[test]
    fn wide_charts_are_downsampled_to_rgb() {
        let chart = DynamicImage::new_rgba8(1000, 600);
        let shrunk = downsample(chart);
        assert_eq!((shrunk.width(), shrunk.height()), (IMAGE_MAX_WIDTH, 360));
        assert!(!shrunk.color().has_alpha());

        let small = downsample(DynamicImage::new_rgb8(320, 200));
        assert_eq!((small.width(), small.height()), (320, 200));
    }

    #[test]
    fn png_bytes_load_as_embeddable_images() {
        let mut png = Vec::new();
        DynamicImage::new_rgba8(1000, 600)
            .write_to(&mut png, image::ImageOutputFormat::Png)
            .unwrap();
        assert!(load_image(&png).is_ok());
        assert!(matches!(load_image(b"png"), Err(RenderError::Failed { .. })));
    }

    /// Needs a Liberation Sans install; skipped when none of the default font dirs has it.
    #[test]
    fn installed_fonts_produce_a_pdf() {
        let settings = taxiflow_core::config::PdfSettings::default();
        let Some(font_dir) = settings.font_dirs.iter().find(|dir| {
            ["Regular", "Bold", "Italic", "BoldItalic"]
                .iter()
                .all(|style| dir.join(format!("{}-{style}.ttf", settings.font_family)).exists())
        }) else {
            return;
        };

        let dir = tempfile::tempdir().unwrap();
        let mut png = Vec::new();
        DynamicImage::new_rgb8(1000, 600)
            .write_to(&mut png, image::ImageOutputFormat::Png)
            .unwrap();
        let content = SAMPLE.replace("cG5n", &STANDARD.encode(&png));
        let html = HtmlDocument {
            path: dir.path().join("report.html"),
            content,
        };
        let output = dir.path().join("report.pdf");

        let renderer = GenpdfRenderer::new(vec![font_dir.clone()], settings.font_family.clone());
        renderer.render(&html, &output).unwrap();

        let bytes = std::fs::read(&output).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert!(bytes.len() < 4 * 1024 * 1024, "PDF is {} bytes", bytes.len());
    }
}
