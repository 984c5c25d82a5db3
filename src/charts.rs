//! Heat map, radar and treatment-priority charts.
//!
//! Scores are recovered from free-form model output with regular expressions.
//! This is a best-effort heuristic: anything that does not match falls back to
//! a fixed default and never raises.

use std::{
    f32::consts::PI,
    path::{Path, PathBuf},
};

use ab_glyph::FontArc;
use image::{
    imageops::{self, FilterType},
    GrayImage, Luma, Rgb, RgbImage,
};
use imageproc::{
    drawing::{
        draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_polygon_mut, draw_line_segment_mut, draw_polygon_mut,
        draw_text_mut, text_size,
    },
    filter::gaussian_blur_f32,
    point::Point,
    rect::Rect as DrawRect,
};
use regex::Regex;
use tracing::{error, info, warn};

use crate::{
    error::ChartError,
    models::{ChartKind, ChartSet, FaceRegions, Region, Treatment},
    pdf::FontCapability,
};

pub const DEFAULT_SEVERITY: f32 = 0.5;
pub const DEFAULT_RADAR_SCORE: u8 = 4;
const HEATMAP_ALPHA: f32 = 0.5;
const HEATMAP_SIGMA: f32 = 8.0;

/// Label sets the heuristics search for. Model output language is not fixed,
/// so every entry carries aliases.
#[derive(Debug, Clone)]
pub struct ScoreLabels {
    pub regions: Vec<(Region, Vec<String>)>,
    pub condition_keywords: Vec<String>,
    pub radar_categories: Vec<(String, Vec<String>)>,
    pub fallback_treatments: Vec<String>,
}

fn owned(items: &[&str]) -> Vec<String> { items.iter().map(|s| s.to_string()).collect() }

impl Default for ScoreLabels {
    fn default() -> Self {
        Self {
            regions: vec![
                (Region::Forehead, owned(&["forehead", "額頭", "额头"])),
                (Region::Cheeks, owned(&["cheeks", "cheek", "頰骨", "臉頰", "脸颊"])),
                (Region::Chin, owned(&["chin", "下巴"])),
            ],
            condition_keywords: owned(&["skin condition", "皮膚狀況", "皮肤状况"]),
            radar_categories: vec![
                ("Skin Quality".into(), owned(&["Skin Quality", "膚質"])),
                ("Elasticity".into(), owned(&["Elasticity", "彈性"])),
                ("Firmness".into(), owned(&["Firmness", "緊致度"])),
                ("Radiance".into(), owned(&["Radiance", "光澤"])),
                ("Evenness".into(), owned(&["Evenness", "均勻度"])),
            ],
            fallback_treatments: owned(&["Hyaluronic Acid Filler", "Botulinum Toxin Injection", "Laser Treatment"]),
        }
    }
}

fn alternation(aliases: &[String]) -> String {
    aliases.iter().map(|a| regex::escape(a)).collect::<Vec<_>>().join("|")
}

/// Compiled score patterns.
pub struct Heuristics {
    regions: Vec<(Region, Regex)>,
    radar: Vec<(String, Regex)>,
    treatment_line: Regex,
    fallback_treatments: Vec<String>,
}

impl Heuristics {
    pub fn new(labels: &ScoreLabels) -> Result<Self, regex::Error> {
        let keywords = alternation(&labels.condition_keywords);
        let regions: Vec<(Region, Regex)> = labels
            .regions
            .iter()
            .map(|(region, aliases)| {
                let pattern = format!(r"(?i)(?:{}).*?(?:{})\s*(\d)\s*/\s*5", alternation(aliases), keywords);
                Regex::new(&pattern).map(|re| (*region, re))
            })
            .collect::<Result<_, _>>()?;
        let radar: Vec<(String, Regex)> = labels
            .radar_categories
            .iter()
            .map(|(name, aliases)| {
                let pattern = format!(r"(?i)(?:{}).*?(\d)\s*/\s*5", alternation(aliases));
                Regex::new(&pattern).map(|re| (name.clone(), re))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            regions,
            radar,
            treatment_line: Regex::new(r"(\d+)\)\s*([^\d\n]+)")?,
            fallback_treatments: labels.fallback_treatments.clone(),
        })
    }

    /// `(5 - score) / 5` for the first `<region> ... <condition> n/5` match, else 0.5.
    pub fn region_severity(&self, text: &str, region: Region) -> f32 {
        self.regions
            .iter()
            .find(|(r, _)| *r == region)
            .and_then(|(_, re)| first_digit(re, text))
            .map(|score| (5 - score.min(5)) as f32 / 5.0)
            .unwrap_or(DEFAULT_SEVERITY)
    }

    pub fn radar_scores(&self, text: &str) -> Vec<(String, u8)> {
        self.radar
            .iter()
            .map(|(name, re)| (name.clone(), first_digit(re, text).map(|d| d.min(5)).unwrap_or(DEFAULT_RADAR_SCORE)))
            .collect()
    }

    /// Ranked `N) treatment` lines mapped to priority `6 - N`, highest first.
    pub fn treatment_priorities(&self, report: &str) -> Vec<Treatment> {
        let mut treatments: Vec<Treatment> = report
            .lines()
            .filter_map(|line| {
                let caps = self.treatment_line.captures(line)?;
                let rank: u8 = caps[1].parse().ok()?;
                if !(1..=5).contains(&rank) {
                    return None;
                }
                let name = caps[2].trim().trim_matches(|c: char| "*:：,，。-".contains(c) || c.is_whitespace());
                (!name.is_empty()).then(|| Treatment { name: name.to_string(), priority: 6 - rank })
            })
            .collect();

        if treatments.is_empty() {
            return self
                .fallback_treatments
                .iter()
                .zip([5u8, 4, 3])
                .map(|(name, priority)| Treatment { name: name.clone(), priority })
                .collect();
        }
        treatments.sort_by(|a, b| b.priority.cmp(&a.priority));
        treatments
    }
}

fn first_digit(re: &Regex, text: &str) -> Option<u8> {
    re.captures(text).and_then(|c| c[1].parse().ok())
}

/// Red-yellow-green diverging colormap, reversed: 0 is green, 1 is red.
fn rdylgn_r(t: f32) -> [f32; 3] {
    const GREEN: [f32; 3] = [26.0, 152.0, 80.0];
    const YELLOW: [f32; 3] = [255.0, 255.0, 191.0];
    const RED: [f32; 3] = [215.0, 48.0, 39.0];
    let t = t.clamp(0.0, 1.0);
    let (from, to, f) = if t < 0.5 { (GREEN, YELLOW, t * 2.0) } else { (YELLOW, RED, (t - 0.5) * 2.0) };
    [0, 1, 2].map(|i| from[i] + (to[i] - from[i]) * f)
}

/// Photos are scaled to this longer side before blurring; the chart is a
/// preview, not a full-resolution overlay.
const HEATMAP_MAX_SIDE: u32 = 800;

pub fn render_heatmap(image: &RgbImage, regions: &FaceRegions, severities: &[(Region, f32)]) -> Result<RgbImage, ChartError> {
    let (full_w, full_h) = image.dimensions();
    if full_w == 0 || full_h == 0 {
        return Err(ChartError::NoData("photo"));
    }
    let scale = (HEATMAP_MAX_SIDE as f32 / full_w.max(full_h) as f32).min(1.0);
    let base = if scale < 1.0 {
        let w = ((full_w as f32 * scale).round() as u32).max(1);
        let h = ((full_h as f32 * scale).round() as u32).max(1);
        imageops::resize(image, w, h, FilterType::Triangle)
    } else {
        image.clone()
    };
    let (width, height) = base.dimensions();
    let scaled = |v: u32| (v as f32 * scale).round() as u32;

    let mut mask = GrayImage::new(width, height);
    for (region, severity) in severities {
        let Some(rect) = regions.get(*region) else { continue };
        let value = Luma([(severity.clamp(0.0, 1.0) * 255.0).round() as u8]);
        for y in scaled(rect.y1)..scaled(rect.y2).min(height) {
            for x in scaled(rect.x1)..scaled(rect.x2).min(width) {
                mask.put_pixel(x, y, value);
            }
        }
    }
    let mask = gaussian_blur_f32(&mask, HEATMAP_SIGMA);

    Ok(RgbImage::from_fn(width, height, |x, y| {
        let base = base.get_pixel(x, y).0;
        let color = rdylgn_r(mask.get_pixel(x, y).0[0] as f32 / 255.0);
        Rgb([0, 1, 2].map(|i| (base[i] as f32 * (1.0 - HEATMAP_ALPHA) + color[i] * HEATMAP_ALPHA).round() as u8))
    }))
}

const RADAR_SIZE: u32 = 600;
const RADAR_RADIUS: f32 = 240.0;
const LABEL_SCALE: f32 = 18.0;

fn radar_point(index: usize, count: usize, value: f32) -> Point<f32> {
    let c = RADAR_SIZE as f32 / 2.0;
    let angle = -PI / 2.0 + 2.0 * PI * index as f32 / count as f32;
    let r = RADAR_RADIUS * value / 5.0;
    Point::new(c + r * angle.cos(), c + r * angle.sin())
}

/// Rounds to pixels and drops repeated vertices, including a closing vertex
/// equal to the first. imageproc panics on either.
fn pixel_polygon(points: &[Point<f32>]) -> Vec<Point<i32>> {
    let mut poly: Vec<Point<i32>> = Vec::with_capacity(points.len());
    for p in points {
        let p = Point::new(p.x.round() as i32, p.y.round() as i32);
        if poly.last() != Some(&p) {
            poly.push(p);
        }
    }
    while poly.len() > 1 && poly.first() == poly.last() {
        poly.pop();
    }
    poly
}

fn fill_polygon(canvas: &mut RgbImage, points: &[Point<f32>], color: Rgb<u8>) {
    let poly = pixel_polygon(points);
    if poly.len() >= 3 {
        draw_polygon_mut(canvas, &poly, color);
    }
}

fn outline_polygon(canvas: &mut RgbImage, points: &[Point<f32>], color: Rgb<u8>) {
    let poly: Vec<Point<f32>> = pixel_polygon(points).into_iter().map(|p| Point::new(p.x as f32, p.y as f32)).collect();
    if poly.len() >= 2 {
        draw_hollow_polygon_mut(canvas, &poly, color);
    }
}

/// Draws `text` centred on `(x, y)`, kept inside the canvas.
fn centered_label(canvas: &mut RgbImage, font: &FontArc, x: f32, y: f32, text: &str, color: Rgb<u8>) {
    let (w, h) = text_size(LABEL_SCALE, font, text);
    let max_x = canvas.width().saturating_sub(w) as i32;
    let max_y = canvas.height().saturating_sub(h) as i32;
    let left = ((x - w as f32 / 2.0).round() as i32).clamp(0, max_x);
    let top = ((y - h as f32 / 2.0).round() as i32).clamp(0, max_y);
    draw_text_mut(canvas, color, left, top, LABEL_SCALE, font, text);
}

pub fn render_radar(scores: &[(String, u8)], font: Option<&FontArc>) -> Result<RgbImage, ChartError> {
    if scores.is_empty() {
        return Err(ChartError::NoData("radar scores"));
    }
    let mut canvas = RgbImage::from_pixel(RADAR_SIZE, RADAR_SIZE, Rgb([255, 255, 255]));
    let n = scores.len().max(3);
    let ring = |value: f32| (0..n).map(|i| radar_point(i, n, value)).collect::<Vec<_>>();

    fill_polygon(&mut canvas, &ring(5.0), Rgb([211, 228, 245]));
    for level in 1..=5 {
        outline_polygon(&mut canvas, &ring(level as f32), Rgb([190, 190, 190]));
    }
    let center = RADAR_SIZE as f32 / 2.0;
    for i in 0..n {
        let tip = radar_point(i, n, 5.0);
        draw_line_segment_mut(&mut canvas, (center, center), (tip.x, tip.y), Rgb([170, 170, 170]));
    }

    let current: Vec<Point<f32>> = scores.iter().enumerate().map(|(i, (_, s))| radar_point(i, n, *s as f32)).collect();
    fill_polygon(&mut canvas, &current, Rgb([164, 199, 240]));
    outline_polygon(&mut canvas, &current, Rgb([0, 0, 0]));
    for p in &current {
        draw_filled_circle_mut(&mut canvas, (p.x.round() as i32, p.y.round() as i32), 5, Rgb([74, 144, 226]));
    }

    if let Some(font) = font {
        for (i, (name, score)) in scores.iter().enumerate() {
            let at = radar_point(i, n, 5.6);
            centered_label(&mut canvas, font, at.x, at.y, &format!("{} {}/5", name, score), Rgb([40, 40, 40]));
        }
    }
    Ok(canvas)
}

const PRIORITY_WIDTH: u32 = 600;
const PRIORITY_HEIGHT: u32 = 400;

fn blues(priority: u8) -> Rgb<u8> {
    const LIGHT: [f32; 3] = [198.0, 219.0, 239.0];
    const DARK: [f32; 3] = [8.0, 48.0, 107.0];
    let t = (priority.min(5) as f32 / 5.0).clamp(0.0, 1.0);
    Rgb([0, 1, 2].map(|i| (LIGHT[i] + (DARK[i] - LIGHT[i]) * t).round() as u8))
}

pub fn render_priority(treatments: &[Treatment], font: Option<&FontArc>) -> Result<RgbImage, ChartError> {
    if treatments.is_empty() {
        return Err(ChartError::NoData("treatments"));
    }
    let mut canvas = RgbImage::from_pixel(PRIORITY_WIDTH, PRIORITY_HEIGHT, Rgb([255, 255, 255]));
    let (left, top, right, bottom) = (40i32, 30i32, PRIORITY_WIDTH as i32 - 30, PRIORITY_HEIGHT as i32 - 40);
    let plot_w = (right - left) as f32;
    let slot = (bottom - top) / treatments.len() as i32;

    for unit in 1..=5 {
        let x = left as f32 + plot_w * unit as f32 / 5.0;
        draw_line_segment_mut(&mut canvas, (x, top as f32), (x, bottom as f32), Rgb([230, 230, 230]));
        if let Some(font) = font {
            centered_label(&mut canvas, font, x, bottom as f32 + 16.0, &unit.to_string(), Rgb([80, 80, 80]));
        }
    }
    for (i, t) in treatments.iter().enumerate() {
        let bar_w = (plot_w * t.priority.min(5) as f32 / 5.0).round() as u32;
        let bar_h = (slot as f32 * 0.7).max(1.0) as u32;
        let y = top + slot * i as i32 + (slot - bar_h as i32) / 2;
        if bar_w > 0 {
            draw_filled_rect_mut(&mut canvas, DrawRect::at(left, y).of_size(bar_w, bar_h), blues(t.priority));
        }
        if let Some(font) = font {
            let ink = if t.priority >= 3 { Rgb([255, 255, 255]) } else { Rgb([20, 20, 20]) };
            let (_, text_h) = text_size(LABEL_SCALE, font, &t.name);
            let text_y = y + (bar_h as i32 - text_h as i32) / 2;
            draw_text_mut(&mut canvas, ink, left + 8, text_y, LABEL_SCALE, font, &t.name);
        }
    }
    draw_line_segment_mut(&mut canvas, (left as f32, top as f32), (left as f32, bottom as f32), Rgb([0, 0, 0]));
    draw_line_segment_mut(&mut canvas, (left as f32, bottom as f32), (right as f32, bottom as f32), Rgb([0, 0, 0]));
    Ok(canvas)
}

/// Font for chart labels, taken from the registered Unicode font. Charts are
/// drawn without text when there is none.
pub fn label_font(capability: &FontCapability) -> Option<FontArc> {
    match capability {
        FontCapability::Unicode(bytes) => match FontArc::try_from_vec(bytes.to_vec()) {
            Ok(font) => Some(font),
            Err(e) => {
                warn!("Registered font cannot be used for chart labels: {}", e);
                None
            }
        },
        FontCapability::AsciiOnly => None,
    }
}

/// Draws the three charts for one run into `run_dir`.
pub struct ChartBuilder {
    heuristics: Heuristics,
    font: Option<FontArc>,
}

impl ChartBuilder {
    pub fn new(labels: &ScoreLabels, font: Option<FontArc>) -> Result<Self, regex::Error> {
        Ok(Self { heuristics: Heuristics::new(labels)?, font })
    }

    pub fn build(&self, photo: &RgbImage, regions: &FaceRegions, analysis: &str, report: &str, run_dir: &Path) -> ChartSet {
        let severities: Vec<(Region, f32)> =
            Region::ALL.into_iter().map(|r| (r, self.heuristics.region_severity(analysis, r))).collect();
        let radar_scores = self.heuristics.radar_scores(analysis);
        let treatments = self.heuristics.treatment_priorities(report);
        let font = self.font.as_ref();

        let heatmap = save_chart(run_dir, ChartKind::Heatmap, || render_heatmap(photo, regions, &severities));
        let radar = save_chart(run_dir, ChartKind::Radar, || render_radar(&radar_scores, font));
        let priority = save_chart(run_dir, ChartKind::Priority, || render_priority(&treatments, font));

        ChartSet { run_dir: run_dir.to_path_buf(), heatmap, radar, priority, severities, radar_scores, treatments }
    }
}

fn save_chart<F>(run_dir: &Path, kind: ChartKind, render: F) -> Option<PathBuf>
where
    F: FnOnce() -> Result<RgbImage, ChartError>,
{
    let path = run_dir.join(kind.file_name());
    match render().and_then(|img| img.save(&path).map_err(ChartError::from)) {
        Ok(()) => {
            info!("Chart generated: {}", path.display());
            Some(path)
        }
        Err(e) => {
            error!("Chart {:?} generation failed: {}", kind, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{face::{locate_regions, NoFaceDetector}, models::Rect};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn heuristics() -> Heuristics { Heuristics::new(&ScoreLabels::default()).unwrap() }

    fn names(ts: &[Treatment]) -> Vec<(&str, u8)> { ts.iter().map(|t| (t.name.as_str(), t.priority)).collect() }

    #[test]
    fn numbered_treatments_rank_by_inverse_position() {
        let report = "推薦方案\n3) Filler\n1) Laser Treatment\n2) Botox\n";
        assert_eq!(
            names(&heuristics().treatment_priorities(report)),
            vec![("Laser Treatment", 5), ("Botox", 4), ("Filler", 3)]
        );
    }

    #[test]
    fn treatment_names_stop_before_digits_and_drop_markup() {
        let report = "1) **玻尿酸填充**：適用於頰骨 2 次療程\n6) ignored\nno numbers here";
        assert_eq!(names(&heuristics().treatment_priorities(report)), vec![("玻尿酸填充**：適用於頰骨", 5)]);
    }

    #[test]
    fn no_numbered_lines_uses_fixed_examples() {
        let ts = heuristics().treatment_priorities("A plain paragraph.");
        assert_eq!(
            names(&ts),
            vec![("Hyaluronic Acid Filler", 5), ("Botulinum Toxin Injection", 4), ("Laser Treatment", 3)]
        );
    }

    #[test]
    fn radar_matches_case_insensitively_with_default() {
        let text = "skin quality: 2/5\nELASTICITY looks fine 3/5\n彈性 1/5\nRadiance\n5/5";
        let scores = heuristics().radar_scores(text);
        assert_eq!(
            scores,
            vec![
                ("Skin Quality".to_string(), 2),
                ("Elasticity".to_string(), 3),
                ("Firmness".to_string(), 4),
                ("Radiance".to_string(), 4),
                ("Evenness".to_string(), 4),
            ]
        );
    }

    #[test]
    fn region_severity_uses_condition_score() {
        let h = heuristics();
        let text = "額頭 皮膚狀況 2/5\nChin: skin condition 5/5";
        assert!((h.region_severity(text, Region::Forehead) - 0.6).abs() < 1e-6);
        assert!((h.region_severity(text, Region::Chin) - 0.0).abs() < 1e-6);
        assert_eq!(h.region_severity(text, Region::Cheeks), DEFAULT_SEVERITY);
    }

    #[test]
    fn custom_labels_replace_defaults() {
        let labels = ScoreLabels {
            radar_categories: vec![("Hydration".into(), vec!["Hydration".into()])],
            ..ScoreLabels::default()
        };
        let h = Heuristics::new(&labels).unwrap();
        assert_eq!(h.radar_scores("hydration 1/5"), vec![("Hydration".to_string(), 1)]);
    }

    #[test]
    fn colormap_endpoints() {
        assert_eq!(rdylgn_r(0.0), [26.0, 152.0, 80.0]);
        assert_eq!(rdylgn_r(1.0), [215.0, 48.0, 39.0]);
    }

    #[test]
    fn heatmap_reddens_severe_regions() {
        let photo = RgbImage::from_pixel(300, 300, Rgb([128, 128, 128]));
        let regions = locate_regions(&photo, &NoFaceDetector);
        let out =
            render_heatmap(&photo, &regions, &[(Region::Forehead, 1.0), (Region::Cheeks, 0.5), (Region::Chin, 0.0)]).unwrap();
        let top = out.get_pixel(150, 10).0;
        let bottom = out.get_pixel(150, 290).0;
        assert!(top[0] > top[1], "forehead should lean red: {top:?}");
        assert!(bottom[1] > bottom[0], "chin should lean green: {bottom:?}");
    }

    #[test]
    fn large_photos_are_scaled_down_before_blurring() {
        let photo = RgbImage::from_pixel(1600, 1200, Rgb([90, 90, 90]));
        let regions = locate_regions(&photo, &NoFaceDetector);
        let out = render_heatmap(&photo, &regions, &[(Region::Forehead, 1.0), (Region::Chin, 0.0)]).unwrap();
        assert_eq!(out.dimensions(), (800, 600));
        let top = out.get_pixel(400, 20).0;
        assert!(top[0] > top[1], "forehead should lean red: {top:?}");
    }

    #[test]
    fn radar_survives_all_zero_scores() {
        let scores: Vec<(String, u8)> = (0..5).map(|i| (format!("c{i}"), 0)).collect();
        let img = render_radar(&scores, None).unwrap();
        assert_eq!(img.dimensions(), (RADAR_SIZE, RADAR_SIZE));
    }

    #[test]
    fn radar_draws_one_or_two_categories() {
        for count in 1..=2 {
            let scores: Vec<(String, u8)> = (0..count).map(|i| (format!("c{i}"), 3)).collect();
            assert!(render_radar(&scores, None).is_ok(), "{count} categories");
        }
        assert!(matches!(render_radar(&[], None), Err(ChartError::NoData(_))));
    }

    #[test]
    fn degenerate_polygons_lose_repeated_vertices() {
        let center = Point::new(300.0, 300.0);
        assert_eq!(pixel_polygon(&[center, center, center]), vec![Point::new(300, 300)]);
        let open = pixel_polygon(&[center, Point::new(310.2, 300.0), Point::new(299.9, 300.1)]);
        assert_eq!(open, vec![Point::new(300, 300), Point::new(310, 300)]);
    }

    #[test]
    fn priority_without_treatments_is_an_error() {
        assert!(matches!(render_priority(&[], None), Err(ChartError::NoData(_))));
    }

    #[test]
    fn label_font_needs_a_parseable_unicode_font() {
        assert!(label_font(&FontCapability::AsciiOnly).is_none());
        let junk = FontCapability::Unicode(std::sync::Arc::new(vec![0, 1, 0, 0, 0, 12]));
        assert!(label_font(&junk).is_none());
    }

    #[test]
    fn zero_scores_at_both_ends_still_chart() {
        let tmp = tempfile::tempdir().unwrap();
        let photo = RgbImage::from_pixel(150, 150, Rgb([200, 170, 150]));
        let regions = locate_regions(&photo, &NoFaceDetector);
        let builder = ChartBuilder::new(&ScoreLabels::default(), None).unwrap();
        let charts = builder.build(&photo, &regions, "Skin Quality 0/5\nEvenness 0/5", "", tmp.path());

        assert_eq!(charts.radar_scores.first(), Some(&("Skin Quality".to_string(), 0)));
        assert_eq!(charts.radar_scores.last(), Some(&("Evenness".to_string(), 0)));
        assert_eq!(charts.available().len(), 3);
    }

    #[test]
    fn a_failing_renderer_only_loses_its_own_chart() {
        let tmp = tempfile::tempdir().unwrap();
        let photo = RgbImage::from_pixel(150, 150, Rgb([200, 170, 150]));
        let regions = locate_regions(&photo, &NoFaceDetector);
        let labels = ScoreLabels { radar_categories: vec![], ..ScoreLabels::default() };
        let charts = ChartBuilder::new(&labels, None).unwrap().build(&photo, &regions, "", "", tmp.path());

        assert!(charts.radar.is_none());
        assert!(charts.heatmap.is_some());
        assert!(charts.priority.is_some());
    }

    #[test]
    fn builder_writes_three_charts_into_run_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let photo = RgbImage::from_pixel(200, 240, Rgb([200, 170, 150]));
        let regions = FaceRegions {
            face_detected: true,
            regions: BTreeMap::from([
                (Region::Forehead, Rect::new(50, 20, 150, 60)),
                (Region::Cheeks, Rect::new(50, 60, 150, 100)),
                (Region::Chin, Rect::new(50, 100, 150, 140)),
            ]),
        };
        let builder = ChartBuilder::new(&ScoreLabels::default(), None).unwrap();
        let charts = builder.build(&photo, &regions, "Skin Quality 3/5", "1) Laser Treatment\n2) Botox", tmp.path());

        assert_eq!(charts.available().len(), 3);
        for (kind, path) in charts.available() {
            assert_eq!(path, &tmp.path().join(kind.file_name()));
            assert!(image::open(path).is_ok());
        }
        assert_eq!(charts.treatments.len(), 2);
        assert_eq!(charts.radar_scores[0], ("Skin Quality".to_string(), 3));
    }

    #[test]
    fn unwritable_run_dir_maps_every_chart_to_none() {
        let photo = RgbImage::from_pixel(120, 120, Rgb([0, 0, 0]));
        let regions = locate_regions(&photo, &NoFaceDetector);
        let builder = ChartBuilder::new(&ScoreLabels::default(), None).unwrap();
        let charts = builder.build(&photo, &regions, "", "", Path::new("/nonexistent/run_x"));
        assert!(charts.available().is_empty());
        assert_eq!(charts.treatments.len(), 3);
    }
}
