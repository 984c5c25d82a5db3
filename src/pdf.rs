use std::{
    io::BufWriter,
    path::Path,
    sync::{Arc, OnceLock},
};

use bytes::Bytes;
use chrono::{Local, Utc};
use image::RgbImage;
use printpdf::{
    BuiltinFont, ColorBits, ColorSpace, Image as PdfImage, ImageTransform, ImageXObject, IndirectFontRef, Mm,
    PdfDocument, PdfDocumentReference, PdfLayerReference, Px,
};
use tracing::{error, info, warn};

use crate::{
    error::DocumentError,
    models::{ChartKind, ChartSet, FontKind, GeneratedDocument, ReportTier},
};

const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const MARGIN: f32 = 20.0;
const CONTENT_W: f32 = PAGE_W - 2.0 * MARGIN;
const MAX_IMAGE_W: f32 = 150.0;
const MAX_IMAGE_H: f32 = 110.0;
const PT_TO_MM: f32 = 0.3528;

/// What the document renderer can draw text with.
#[derive(Debug, Clone)]
pub enum FontCapability {
    Unicode(Arc<Vec<u8>>),
    AsciiOnly,
}

impl FontCapability {
    pub fn kind(&self) -> FontKind {
        match self {
            FontCapability::Unicode(_) => FontKind::Unicode,
            FontCapability::AsciiOnly => FontKind::Ascii,
        }
    }
}

/// Holds the Unicode font for the lifetime of the process. Only the first
/// `register` call touches the filesystem.
#[derive(Debug, Default)]
pub struct FontRegistry {
    cell: OnceLock<FontCapability>,
}

static GLOBAL_FONTS: FontRegistry = FontRegistry::new();

impl FontRegistry {
    pub const fn new() -> Self { Self { cell: OnceLock::new() } }

    pub fn global() -> &'static FontRegistry { &GLOBAL_FONTS }

    pub fn register(&self, path: &Path) -> FontCapability {
        self.cell.get_or_init(|| load_font(path)).clone()
    }

    /// Registered capability, or ASCII when nothing was registered.
    pub fn current(&self) -> FontCapability {
        self.cell.get().cloned().unwrap_or(FontCapability::AsciiOnly)
    }
}

fn load_font(path: &Path) -> FontCapability {
    match std::fs::read(path) {
        Ok(bytes) if looks_like_font(&bytes) => {
            info!("🔤 Unicode font registered from {}", path.display());
            FontCapability::Unicode(Arc::new(bytes))
        }
        Ok(_) => {
            warn!("{} is not a TrueType/OpenType font; PDFs will use ASCII text", path.display());
            FontCapability::AsciiOnly
        }
        Err(e) => {
            warn!("Unicode font {} unavailable ({}); PDFs will use ASCII text", path.display(), e);
            FontCapability::AsciiOnly
        }
    }
}

fn looks_like_font(bytes: &[u8]) -> bool {
    matches!(bytes.get(..4), Some([0, 1, 0, 0]) | Some(b"OTTO") | Some(b"true") | Some(b"ttcf"))
}

/// Layout model shared by the Unicode and ASCII paths.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Title(String),
    Subtitle(String),
    Heading(String),
    Paragraph(String),
    Note(String),
    Chart { caption: String, image: RgbImage },
}

struct Strings {
    title: &'static str,
    date: &'static str,
    body_heading: &'static str,
    empty_body: &'static str,
    charts_heading: &'static str,
    disclaimer: &'static str,
}

const UNICODE_STRINGS: Strings = Strings {
    title: "醫美智能評估報告",
    date: "報告日期：",
    body_heading: "面部分析與治療建議",
    empty_body: "報告內容暫不可用。",
    charts_heading: "數據可視化",
    disclaimer: "免責聲明：本報告僅供參考，具體治療需諮詢專業醫生。",
};

const ASCII_STRINGS: Strings = Strings {
    title: "Medical Beauty Assessment Report",
    date: "Report date: ",
    body_heading: "Analysis and Recommendations",
    empty_body: "No report content is available.",
    charts_heading: "Visualizations",
    disclaimer: "Disclaimer: this report is for reference only. Consult a qualified physician before any treatment.",
};

pub const LOCALIZED_BODY_NOTE: &str =
    "The detailed report is written in a language this font cannot display. Generate the premium report to read it.";

fn caption(kind: ChartKind, font: FontKind) -> &'static str {
    match (kind, font) {
        (ChartKind::Heatmap, FontKind::Unicode) => "面部問題熱力圖",
        (ChartKind::Radar, FontKind::Unicode) => "面部狀況評分",
        (ChartKind::Priority, FontKind::Unicode) => "治療方案優先級",
        (ChartKind::Heatmap, FontKind::Ascii) => "Face Problem Heat Map",
        (ChartKind::Radar, FontKind::Ascii) => "Facial Condition Score",
        (ChartKind::Priority, FontKind::Ascii) => "Treatment Priority",
    }
}

// Charts are only labeled when a Unicode font is registered, so the values
// also go under the caption.
fn chart_summary(kind: ChartKind, charts: &ChartSet) -> String {
    match kind {
        ChartKind::Heatmap => charts
            .severities
            .iter()
            .map(|(region, s)| format!("{} {:.1}", region.as_str(), s))
            .collect::<Vec<_>>()
            .join(", "),
        ChartKind::Radar => charts
            .radar_scores
            .iter()
            .map(|(name, score)| format!("{} {}/5", name, score))
            .collect::<Vec<_>>()
            .join(", "),
        ChartKind::Priority => charts
            .treatments
            .iter()
            .map(|t| format!("{} ({})", t.name, t.priority))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

/// `1. Heading` style lines.
fn is_numbered_heading(line: &str) -> bool {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return false;
    }
    let mut rest = line[digits..].chars();
    if rest.next() != Some('.') {
        return false;
    }
    let after_dot: String = rest.collect();
    let trimmed = after_dot.trim_start();
    trimmed.len() < after_dot.len() && trimmed.chars().next().is_some_and(|c| c.is_alphanumeric() || c == '_')
}

fn body_blocks(body: &str) -> Vec<Block> {
    body.lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .map(|line| {
            let clean = line.replace("**", "");
            if let Some(heading) = clean.strip_prefix('#') {
                Block::Heading(heading.trim_start_matches('#').trim().to_string())
            } else if is_numbered_heading(&clean) {
                Block::Heading(clean)
            } else {
                Block::Paragraph(clean)
            }
        })
        .collect()
}

pub fn build_story(report: &str, charts: &ChartSet, font: FontKind, date: &str) -> Vec<Block> {
    let strings = match font {
        FontKind::Unicode => &UNICODE_STRINGS,
        FontKind::Ascii => &ASCII_STRINGS,
    };
    let mut story = vec![
        Block::Title(strings.title.to_string()),
        Block::Subtitle(format!("{}{}", strings.date, date)),
        Block::Heading(strings.body_heading.to_string()),
    ];

    let body = report.trim();
    if body.is_empty() {
        story.push(Block::Paragraph(strings.empty_body.to_string()));
    } else if font == FontKind::Ascii && !body.is_ascii() {
        story.push(Block::Note(LOCALIZED_BODY_NOTE.to_string()));
    } else {
        story.extend(body_blocks(body));
    }

    let mut chart_blocks = Vec::new();
    for (kind, path) in charts.available() {
        match image::open(path) {
            Ok(img) => {
                chart_blocks.push(Block::Chart { caption: caption(kind, font).to_string(), image: img.to_rgb8() });
                let summary = chart_summary(kind, charts);
                if !summary.is_empty() && (font == FontKind::Unicode || summary.is_ascii()) {
                    chart_blocks.push(Block::Note(summary));
                }
            }
            Err(e) => warn!("Skipping chart {}: {}", path.display(), e),
        }
    }
    if !chart_blocks.is_empty() {
        story.push(Block::Heading(strings.charts_heading.to_string()));
        story.extend(chart_blocks);
    }

    story.push(Block::Note(strings.disclaimer.to_string()));
    story
}

fn char_width_mm(c: char, size: f32) -> f32 {
    let em = if c.is_ascii() { 0.55 } else { 1.0 };
    em * size * PT_TO_MM
}

/// Greedy line wrap by estimated glyph width, preferring breaks at spaces.
pub fn wrap(text: &str, size: f32, max_width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();
    let mut width = 0.0;
    for c in text.chars() {
        let w = char_width_mm(c, size);
        if width + w > max_width && !line.is_empty() {
            match line.rfind(' ') {
                Some(idx) if idx > 0 => {
                    let rest = line[idx + 1..].to_string();
                    line.truncate(idx);
                    lines.push(std::mem::take(&mut line));
                    line = rest;
                }
                _ => lines.push(std::mem::take(&mut line)),
            }
            width = line.chars().map(|c| char_width_mm(c, size)).sum();
        }
        line.push(c);
        width += w;
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

struct Pen<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    font: IndirectFontRef,
    ascii: bool,
    y: f32,
    pages: usize,
}

impl Pen<'_> {
    fn room(&mut self, needed: f32) {
        if self.y - needed >= MARGIN {
            return;
        }
        self.pages += 1;
        let (page, layer) = self.doc.add_page(Mm(PAGE_W), Mm(PAGE_H), format!("Page {}", self.pages));
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.y = PAGE_H - MARGIN;
    }

    fn text(&mut self, text: &str, size: f32) {
        let text: String = if self.ascii {
            text.chars().map(|c| if c.is_ascii() { c } else { '?' }).collect()
        } else {
            text.to_string()
        };
        let line_height = size * PT_TO_MM * 1.4;
        for line in wrap(&text, size, CONTENT_W) {
            self.room(line_height);
            self.y -= line_height;
            self.layer.use_text(line, size, Mm(MARGIN), Mm(self.y), &self.font);
        }
    }

    fn gap(&mut self, mm: f32) { self.y -= mm; }

    fn image(&mut self, img: &RgbImage) {
        let (px_w, px_h) = img.dimensions();
        if px_w == 0 || px_h == 0 {
            return;
        }
        let mut w = MAX_IMAGE_W.min(CONTENT_W);
        let mut h = w * px_h as f32 / px_w as f32;
        if h > MAX_IMAGE_H {
            w *= MAX_IMAGE_H / h;
            h = MAX_IMAGE_H;
        }
        self.room(h);
        self.y -= h;
        let xobject = ImageXObject {
            width: Px(px_w as usize),
            height: Px(px_h as usize),
            color_space: ColorSpace::Rgb,
            bits_per_component: ColorBits::Bit8,
            interpolate: true,
            image_data: img.as_raw().clone(),
            image_filter: None,
            smask: None,
            clipping_bbox: None,
        };
        PdfImage::from(xobject).add_to_layer(
            self.layer.clone(),
            ImageTransform {
                translate_x: Some(Mm(MARGIN + (CONTENT_W - w) / 2.0)),
                translate_y: Some(Mm(self.y)),
                dpi: Some(px_w as f32 * 25.4 / w),
                ..Default::default()
            },
        );
    }
}

pub fn render(story: &[Block], font: &FontCapability) -> Result<Vec<u8>, DocumentError> {
    let title = story
        .iter()
        .find_map(|b| match b {
            Block::Title(t) => Some(t.clone()),
            _ => None,
        })
        .unwrap_or_else(|| ASCII_STRINGS.title.to_string());
    let (doc, page, layer) = PdfDocument::new(title, Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
    let font_ref = match font {
        FontCapability::Unicode(bytes) => doc.add_external_font(bytes.as_slice()),
        FontCapability::AsciiOnly => doc.add_builtin_font(BuiltinFont::Helvetica),
    }
    .map_err(|e| DocumentError::Font(format!("{:?}", e)))?;

    let mut pen = Pen {
        doc: &doc,
        layer: doc.get_page(page).get_layer(layer),
        font: font_ref,
        ascii: matches!(font, FontCapability::AsciiOnly),
        y: PAGE_H - MARGIN,
        pages: 1,
    };
    for block in story {
        match block {
            Block::Title(t) => {
                pen.text(t, 20.0);
                pen.gap(2.0);
            }
            Block::Subtitle(t) => {
                pen.text(t, 10.0);
                pen.gap(6.0);
            }
            Block::Heading(t) => {
                pen.gap(3.0);
                pen.text(t, 14.0);
                pen.gap(1.5);
            }
            Block::Paragraph(t) => {
                pen.text(t, 11.0);
                pen.gap(1.5);
            }
            Block::Note(t) => {
                pen.text(t, 9.0);
                pen.gap(3.0);
            }
            Block::Chart { caption, image } => {
                pen.gap(2.0);
                pen.image(image);
                pen.gap(1.0);
                pen.text(caption, 10.0);
            }
        }
    }
    drop(pen);

    let mut buf: Vec<u8> = Vec::new();
    {
        let mut writer = BufWriter::new(&mut buf);
        doc.save(&mut writer).map_err(|e| DocumentError::Pdf(format!("{:?}", e)))?;
    }
    if buf.is_empty() {
        return Err(DocumentError::Pdf("renderer produced no bytes".into()));
    }
    Ok(buf)
}

/// Builds the PDF for `tier`, stepping down to ASCII and then to a text-only
/// ASCII document when a richer render fails.
pub fn assemble(
    report: &str,
    charts: &ChartSet,
    tier: ReportTier,
    registry: &FontRegistry,
) -> Result<GeneratedDocument, DocumentError> {
    let date = Local::now().format("%Y-%m-%d").to_string();
    let finish = |bytes: Vec<u8>, font: FontKind| {
        info!("📄 PDF generated: {} bytes, tier={:?}, font={:?}", bytes.len(), tier, font);
        GeneratedDocument { bytes: Bytes::from(bytes), tier, font, created_at: Utc::now() }
    };

    let capability = match tier {
        ReportTier::Premium => registry.current(),
        ReportTier::Standard => FontCapability::AsciiOnly,
    };
    if let FontCapability::Unicode(_) = capability {
        let story = build_story(report, charts, FontKind::Unicode, &date);
        match render(&story, &capability) {
            Ok(bytes) => return Ok(finish(bytes, FontKind::Unicode)),
            Err(e) => error!("Unicode PDF render failed, falling back to ASCII: {}", e),
        }
    }

    let story = build_story(report, charts, FontKind::Ascii, &date);
    match render(&story, &FontCapability::AsciiOnly) {
        Ok(bytes) => return Ok(finish(bytes, FontKind::Ascii)),
        Err(e) => error!("ASCII PDF render failed, retrying without images: {}", e),
    }
    let text_only: Vec<Block> = story.into_iter().filter(|b| !matches!(b, Block::Chart { .. })).collect();
    render(&text_only, &FontCapability::AsciiOnly).map(|bytes| finish(bytes, FontKind::Ascii))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Region, Treatment};
    use image::Rgb;
    use pretty_assertions::assert_eq;

    const FAKE_TTF: &[u8] = &[0, 1, 0, 0, 0, 12, 0, 128];

    #[test]
    fn font_registration_happens_once() {
        let tmp = tempfile::tempdir().unwrap();
        let font = tmp.path().join("font.ttf");
        std::fs::write(&font, FAKE_TTF).unwrap();

        let registry = FontRegistry::new();
        let first = registry.register(&font);
        let second = registry.register(&tmp.path().join("missing.ttf"));
        assert_eq!(first.kind(), FontKind::Unicode);
        assert_eq!(second.kind(), FontKind::Unicode);
        match (first, second) {
            (FontCapability::Unicode(a), FontCapability::Unicode(b)) => assert!(Arc::ptr_eq(&a, &b)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_font_sticks_as_ascii() {
        let tmp = tempfile::tempdir().unwrap();
        let font = tmp.path().join("font.ttf");
        let registry = FontRegistry::new();
        assert_eq!(registry.register(&font).kind(), FontKind::Ascii);
        std::fs::write(&font, FAKE_TTF).unwrap();
        assert_eq!(registry.register(&font).kind(), FontKind::Ascii);
        assert_eq!(registry.current().kind(), FontKind::Ascii);
    }

    #[test]
    fn non_font_files_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("readme.txt");
        std::fs::write(&path, b"hello").unwrap();
        assert_eq!(FontRegistry::new().register(&path).kind(), FontKind::Ascii);
    }

    #[test]
    fn empty_report_without_charts_still_renders() {
        let doc = assemble("", &ChartSet::default(), ReportTier::Premium, &FontRegistry::new()).unwrap();
        assert!(!doc.bytes.is_empty());
        assert!(doc.bytes.starts_with(b"%PDF"));
        assert_eq!(doc.font, FontKind::Ascii);
    }

    #[test]
    fn empty_report_gets_placeholder_paragraph() {
        let story = build_story("  ", &ChartSet::default(), FontKind::Ascii, "2024-01-01");
        assert!(story.contains(&Block::Paragraph(ASCII_STRINGS.empty_body.to_string())));
        assert_eq!(story.last(), Some(&Block::Note(ASCII_STRINGS.disclaimer.to_string())));
    }

    #[test]
    fn unicode_story_keeps_localized_body() {
        let report = "# 綜合評估\n1. 額頭評估\n額頭 **皮膚狀況** 3/5\n\n1) 玻尿酸填充";
        let story = build_story(report, &ChartSet::default(), FontKind::Unicode, "2024-01-01");
        assert_eq!(
            &story[..7],
            &[
                Block::Title("醫美智能評估報告".into()),
                Block::Subtitle("報告日期：2024-01-01".into()),
                Block::Heading("面部分析與治療建議".into()),
                Block::Heading("綜合評估".into()),
                Block::Heading("1. 額頭評估".into()),
                Block::Paragraph("額頭 皮膚狀況 3/5".into()),
                Block::Paragraph("1) 玻尿酸填充".into()),
            ]
        );
    }

    #[test]
    fn ascii_story_replaces_localized_body_with_note() {
        let story = build_story("額頭 皮膚狀況 3/5", &ChartSet::default(), FontKind::Ascii, "2024-01-01");
        assert!(story.contains(&Block::Note(LOCALIZED_BODY_NOTE.to_string())));
        assert!(!story.iter().any(|b| matches!(b, Block::Paragraph(t) if t.contains("3/5"))));
    }

    #[test]
    fn ascii_story_keeps_english_body() {
        let story = build_story("Overall the skin is even.", &ChartSet::default(), FontKind::Ascii, "2024-01-01");
        assert!(story.contains(&Block::Paragraph("Overall the skin is even.".into())));
    }

    #[test]
    fn only_decodable_chart_files_become_blocks() {
        let tmp = tempfile::tempdir().unwrap();
        let heatmap = tmp.path().join(ChartKind::Heatmap.file_name());
        RgbImage::from_pixel(40, 30, Rgb([255, 0, 0])).save(&heatmap).unwrap();
        let broken = tmp.path().join(ChartKind::Priority.file_name());
        std::fs::write(&broken, b"not a png").unwrap();
        let charts = ChartSet {
            run_dir: tmp.path().to_path_buf(),
            heatmap: Some(heatmap),
            radar: Some(tmp.path().join("missing.png")),
            priority: Some(broken),
            severities: vec![(Region::Forehead, 0.6)],
            radar_scores: vec![],
            treatments: vec![Treatment { name: "Laser".into(), priority: 5 }],
        };

        let story = build_story("text", &charts, FontKind::Ascii, "2024-01-01");
        let captions: Vec<&str> = story
            .iter()
            .filter_map(|b| match b {
                Block::Chart { caption, .. } => Some(caption.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(captions, vec!["Face Problem Heat Map"]);
        assert!(story.contains(&Block::Note("forehead 0.6".into())));

        let doc = assemble("text", &charts, ReportTier::Standard, &FontRegistry::new()).unwrap();
        assert!(doc.bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn numbered_headings_need_text_after_the_dot() {
        assert!(is_numbered_heading("2. Treatment plan"));
        assert!(is_numbered_heading("12. 風險提示"));
        assert!(!is_numbered_heading("2.5 ml"));
        assert!(!is_numbered_heading("1) Laser"));
        assert!(!is_numbered_heading("Note 1. x"));
    }

    #[test]
    fn wrapping_respects_width() {
        let text = "word ".repeat(80);
        let lines = wrap(text.trim(), 11.0, CONTENT_W);
        assert!(lines.len() > 1);
        for line in &lines {
            let w: f32 = line.chars().map(|c| char_width_mm(c, 11.0)).sum();
            assert!(w <= CONTENT_W + 0.01, "{line}");
            assert!(!line.starts_with(' '));
        }
        let cjk = wrap(&"額".repeat(100), 11.0, CONTENT_W);
        assert_eq!(cjk.concat(), "額".repeat(100));
        assert!(cjk.len() > 1);
    }

    #[test]
    fn standard_tier_forces_ascii_even_with_unicode_font() {
        let tmp = tempfile::tempdir().unwrap();
        let font = tmp.path().join("font.ttf");
        std::fs::write(&font, FAKE_TTF).unwrap();
        let registry = FontRegistry::new();
        registry.register(&font);
        let doc = assemble("報告", &ChartSet::default(), ReportTier::Standard, &registry).unwrap();
        assert_eq!(doc.font, FontKind::Ascii);
        assert_eq!(doc.tier, ReportTier::Standard);
    }
}
