//! Annotation overlays composited onto question background images.
//!
//! Drag-and-drop questions are exported as a picture of the background with
//! the placed labels drawn on top. The scene is laid out here, written as an
//! SVG document that embeds the background, and rasterized with resvg.
//!
//! Layout rules:
//! - the font size follows the background height (capped at 15px)
//! - every label box is anchored with its top-left corner on the anchor point
//! - boxes that share a rectangular target are stacked inside the rectangle
//!   when redistribution is requested
//! - boxes are drawn left to right; the canvas grows (white padding) when a
//!   box does not fit onto the background

use resvg::tiny_skia::{Pixmap, Transform};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;
use usvg::fontdb::Database;

use crate::error::{ExportError, Result};
use crate::html::markup::{data_url, escape_attr, escape_text};

const MAX_FONT_SIZE: f64 = 15.0;
const MARGIN: i64 = 3;
const BORDER: i64 = 1;
const CANVAS_PADDING: i64 = 3;
const CROSSHAIR_SIZE: i64 = 15;
/// Inner margin kept free when stacking labels inside a target rectangle.
const SHAPE_MARGIN: i64 = 10;
const TILE_OPACITY: f64 = 0.76;
const LINE_HEIGHT_FACTOR: f64 = 1.2;
/// Approximate advance of one glyph relative to the font size.
const GLYPH_WIDTH_FACTOR: f64 = 0.55;

/// A drop target of a marker question.
#[derive(Debug, Clone, PartialEq)]
pub enum DropShape {
    Rectangle {
        x: i64,
        y: i64,
        width: i64,
        height: i64,
    },
    Circle {
        cx: i64,
        cy: i64,
        radius: i64,
    },
    Polygon(Vec<(i64, i64)>),
}

impl DropShape {
    /// Parses a stored shape: `rectangle` uses `x,y;w,h`, `circle` uses
    /// `cx,cy;r` and `polygon` a `;`-separated list of `x,y` vertices.
    pub fn parse(shape: &str, coords: &str) -> Option<Self> {
        let parts: Vec<&str> = coords
            .split(';')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        match shape.trim().to_ascii_lowercase().as_str() {
            "rectangle" => {
                let (x, y) = parse_pair(parts.first()?)?;
                let (width, height) = parse_pair(parts.get(1)?)?;
                Some(DropShape::Rectangle {
                    x,
                    y,
                    width,
                    height,
                })
            }
            "circle" => {
                let (cx, cy) = parse_pair(parts.first()?)?;
                let radius = parse_number(parts.get(1)?)?;
                Some(DropShape::Circle { cx, cy, radius })
            }
            "polygon" => {
                let points = parts
                    .iter()
                    .map(|part| parse_pair(part))
                    .collect::<Option<Vec<_>>>()?;
                (!points.is_empty()).then_some(DropShape::Polygon(points))
            }
            _ => None,
        }
    }

    /// Point labels are anchored to when the shape is the target.
    pub fn center(&self) -> (i64, i64) {
        match self {
            DropShape::Rectangle {
                x,
                y,
                width,
                height,
            } => (x + width / 2, y + height / 2),
            DropShape::Circle { cx, cy, .. } => (*cx, *cy),
            DropShape::Polygon(points) => {
                let n = points.len().max(1) as i64;
                let (sx, sy) = points
                    .iter()
                    .fold((0, 0), |(sx, sy), (x, y)| (sx + x, sy + y));
                (sx / n, sy / n)
            }
        }
    }

    fn to_svg(&self) -> String {
        const STROKE: &str = r##"fill="none" stroke="#0f6cbf" stroke-width="2""##;
        match self {
            DropShape::Rectangle {
                x,
                y,
                width,
                height,
            } => format!(
                r#"<rect x="{}" y="{}" width="{}" height="{}" {}/>"#,
                x, y, width, height, STROKE
            ),
            DropShape::Circle { cx, cy, radius } => format!(
                r#"<circle cx="{}" cy="{}" r="{}" {}/>"#,
                cx, cy, radius, STROKE
            ),
            DropShape::Polygon(points) => {
                let points: Vec<String> =
                    points.iter().map(|(x, y)| format!("{},{}", x, y)).collect();
                format!(r#"<polygon points="{}" {}/>"#, points.join(" "), STROKE)
            }
        }
    }
}

fn parse_number(value: &str) -> Option<i64> {
    value.trim().parse::<f64>().ok().map(|n| n.round() as i64)
}

fn parse_pair(value: &str) -> Option<(i64, i64)> {
    let (a, b) = value.split_once(',')?;
    Some((parse_number(a)?, parse_number(b)?))
}

/// Dimensions and type of a raster image the renderer can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub mime_type: &'static str,
}

impl ImageInfo {
    /// Probes PNG, JPEG, GIF and WebP data; anything else is `None`.
    pub fn probe(bytes: &[u8]) -> Option<Self> {
        let mime_type = match imagesize::image_type(bytes).ok()? {
            imagesize::ImageType::Png => "image/png",
            imagesize::ImageType::Jpeg => "image/jpeg",
            imagesize::ImageType::Gif => "image/gif",
            imagesize::ImageType::Webp => "image/webp",
            _ => return None,
        };
        let size = imagesize::blob_size(bytes).ok()?;
        if size.width == 0 || size.height == 0 {
            return None;
        }
        Some(Self {
            width: u32::try_from(size.width).ok()?,
            height: u32::try_from(size.height).ok()?,
            mime_type,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnnotationLabel {
    Text(String),
    Image {
        bytes: Vec<u8>,
        info: ImageInfo,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayAnnotation {
    /// Top-left corner of the label box, in background pixels.
    pub anchor: (i64, i64),
    pub label: AnnotationLabel,
    /// Target the label belongs to; rectangles are used for redistribution.
    pub shape: Option<DropShape>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayStyle {
    /// Labels are tiles placed into drop zones.
    TextTiles,
    /// Labels hang off a crosshair marking the dropped point.
    Markers,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayScene {
    pub style: OverlayStyle,
    pub annotations: Vec<OverlayAnnotation>,
    /// Target outlines drawn beneath the labels.
    pub shapes: Vec<DropShape>,
    /// Stack labels that share a rectangle target inside that rectangle.
    pub redistribute: bool,
}

impl OverlayScene {
    pub fn new(style: OverlayStyle) -> Self {
        Self {
            style,
            annotations: Vec::new(),
            shapes: Vec::new(),
            redistribute: false,
        }
    }
}

/// Final position of one label box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedBox {
    /// Index into [`OverlayScene::annotations`].
    pub annotation: usize,
    pub x_from: i64,
    pub y_from: i64,
    pub x_to: i64,
    pub y_to: i64,
}

impl PlacedBox {
    fn at(annotation: usize, (x, y): (i64, i64), (width, height): (i64, i64)) -> Self {
        Self {
            annotation,
            x_from: x,
            y_from: y,
            x_to: x + width,
            y_to: y + height,
        }
    }

    pub fn width(&self) -> i64 {
        self.x_to - self.x_from
    }

    pub fn height(&self) -> i64 {
        self.y_to - self.y_from
    }

    fn move_to(&mut self, x: i64, y: i64) {
        let (width, height) = (self.width(), self.height());
        self.x_from = x;
        self.y_from = y;
        self.x_to = x + width;
        self.y_to = y + height;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayLayout {
    pub font_size: f64,
    /// Boxes in drawing order (left to right).
    pub boxes: Vec<PlacedBox>,
    pub canvas: (u32, u32),
}

impl OverlayLayout {
    pub fn grows_canvas(&self, background: (u32, u32)) -> bool {
        self.canvas != background
    }
}

pub fn font_size(style: OverlayStyle, background_height: u32) -> f64 {
    let divisor = match style {
        OverlayStyle::TextTiles => 15.0,
        OverlayStyle::Markers => 18.0,
    };
    (background_height as f64 / divisor).clamp(1.0, MAX_FONT_SIZE)
}

fn line_height(font_size: f64) -> i64 {
    (font_size * LINE_HEIGHT_FACTOR).ceil() as i64
}

fn label_size(label: &AnnotationLabel, font_size: f64) -> (i64, i64) {
    let frame = 2 * (MARGIN + BORDER);
    match label {
        AnnotationLabel::Text(text) => {
            let lines: Vec<&str> = text.split('\n').collect();
            let widest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
            let width = (widest as f64 * GLYPH_WIDTH_FACTOR * font_size).ceil() as i64;
            (
                width + frame,
                lines.len() as i64 * line_height(font_size) + frame,
            )
        }
        AnnotationLabel::Image { info, .. } => {
            (info.width as i64 + frame, info.height as i64 + frame)
        }
    }
}

/// Places every label of `scene` over a background of the given size.
pub fn layout(scene: &OverlayScene, background: (u32, u32)) -> OverlayLayout {
    let font_size = font_size(scene.style, background.1);
    let mut boxes: Vec<PlacedBox> = scene
        .annotations
        .iter()
        .enumerate()
        .map(|(i, annotation)| {
            PlacedBox::at(i, annotation.anchor, label_size(&annotation.label, font_size))
        })
        .collect();

    if scene.redistribute {
        let mut groups: Vec<(&DropShape, Vec<usize>)> = Vec::new();
        for (i, annotation) in scene.annotations.iter().enumerate() {
            let Some(shape @ DropShape::Rectangle { .. }) = &annotation.shape else {
                continue;
            };
            match groups.iter_mut().find(|(known, _)| *known == shape) {
                Some((_, members)) => members.push(i),
                None => groups.push((shape, vec![i])),
            }
        }
        for (shape, members) in groups {
            if members.len() < 2 {
                continue;
            }
            let mut group: Vec<PlacedBox> = members.iter().map(|&i| boxes[i]).collect();
            redistribute(shape, &mut group);
            for placed in group {
                boxes[placed.annotation] = placed;
            }
        }
    }

    boxes.sort_by_key(|placed| placed.x_from);

    let (bg_width, bg_height) = (background.0 as i64, background.1 as i64);
    let max_x = boxes.iter().map(|b| b.x_to).max().unwrap_or(0);
    let max_y = boxes.iter().map(|b| b.y_to).max().unwrap_or(0);
    let canvas = if max_x > bg_width || max_y > bg_height {
        (
            bg_width.max(max_x + CANVAS_PADDING) as u32,
            bg_height.max(max_y + CANVAS_PADDING) as u32,
        )
    } else {
        background
    };

    OverlayLayout {
        font_size,
        boxes,
        canvas,
    }
}

/// Stacks `boxes` vertically inside a rectangle, spreading the free height
/// evenly between them. Other shapes are left untouched.
pub fn redistribute(shape: &DropShape, boxes: &mut [PlacedBox]) {
    let DropShape::Rectangle { x, y, height, .. } = *shape else {
        return;
    };
    if boxes.is_empty() {
        return;
    }
    let total: i64 = boxes.iter().map(PlacedBox::height).sum();
    let offset = (height - total - SHAPE_MARGIN)
        .div_euclid(boxes.len() as i64)
        .max(0);

    let mut next_y = y + SHAPE_MARGIN;
    for placed in boxes.iter_mut() {
        placed.move_to(x + SHAPE_MARGIN, next_y);
        next_y = placed.y_to + offset;
    }
}

fn scene_svg(
    scene: &OverlayScene,
    layout: &OverlayLayout,
    background: &[u8],
    info: ImageInfo,
) -> String {
    let (width, height) = layout.canvas;
    let mut svg = format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    );
    if layout.grows_canvas((info.width, info.height)) {
        let _ = write!(svg, r##"<rect width="{}" height="{}" fill="#ffffff"/>"##, width, height);
    }
    let _ = write!(
        svg,
        r#"<image x="0" y="0" width="{}" height="{}" xlink:href="{}"/>"#,
        info.width,
        info.height,
        data_url(info.mime_type, background)
    );

    for shape in &scene.shapes {
        svg.push_str(&shape.to_svg());
    }

    let font_size = layout.font_size;
    for placed in &layout.boxes {
        let Some(annotation) = scene.annotations.get(placed.annotation) else {
            continue;
        };
        if scene.style == OverlayStyle::Markers {
            let half = CROSSHAIR_SIZE / 2;
            let _ = write!(
                svg,
                r#"<path d="M{} {} H{} M{} {} V{}" stroke="black" stroke-width="2"/>"#,
                placed.x_from - half,
                placed.y_from,
                placed.x_from + half,
                placed.x_from,
                placed.y_from - half,
                placed.y_from + half
            );
        }
        let _ = write!(
            svg,
            r#"<rect x="{}" y="{}" width="{}" height="{}" fill="white" fill-opacity="{}" stroke="black" stroke-width="{}"/>"#,
            placed.x_from,
            placed.y_from,
            placed.width(),
            placed.height(),
            TILE_OPACITY,
            BORDER
        );
        let inner_x = placed.x_from + BORDER + MARGIN;
        let inner_y = placed.y_from + BORDER + MARGIN;
        match &annotation.label {
            AnnotationLabel::Text(text) => {
                for (line_no, line) in text.split('\n').enumerate() {
                    let baseline =
                        inner_y as f64 + font_size + (line_no as i64 * line_height(font_size)) as f64;
                    let _ = write!(
                        svg,
                        r#"<text x="{}" y="{:.1}" font-family="sans-serif" font-size="{:.1}" fill="black">{}</text>"#,
                        inner_x,
                        baseline,
                        font_size,
                        escape_text(line)
                    );
                }
            }
            AnnotationLabel::Image { bytes, info } => {
                let _ = write!(
                    svg,
                    r#"<image x="{}" y="{}" width="{}" height="{}" xlink:href="{}"/>"#,
                    inner_x,
                    inner_y,
                    info.width,
                    info.height,
                    escape_attr(&data_url(info.mime_type, bytes))
                );
            }
        }
    }

    svg.push_str("</svg>");
    svg
}

/// Rasterizes overlay scenes and other SVG documents to PNG.
#[derive(Clone)]
pub struct OverlayRenderer {
    fontdb: Arc<Database>,
}

impl OverlayRenderer {
    /// Renderer using the fonts installed on the system.
    pub fn new() -> Self {
        let mut fontdb = Database::new();
        fontdb.load_system_fonts();
        debug!(faces = fontdb.len(), "Loaded system fonts for overlays");
        Self::with_fontdb(Arc::new(fontdb))
    }

    pub fn with_fontdb(fontdb: Arc<Database>) -> Self {
        Self { fontdb }
    }

    /// Composites `scene` onto `background` and returns PNG bytes.
    pub fn render(&self, background: &[u8], scene: &OverlayScene) -> Result<Vec<u8>> {
        let info = ImageInfo::probe(background)
            .ok_or_else(|| ExportError::Render("unsupported background image".to_string()))?;
        let layout = layout(scene, (info.width, info.height));
        debug!(
            labels = layout.boxes.len(),
            width = layout.canvas.0,
            height = layout.canvas.1,
            "Rendering overlay"
        );
        self.rasterize_svg(&scene_svg(scene, &layout, background, info))
    }

    /// Re-encodes a decodable raster image as PNG.
    pub fn reencode_png(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let info = ImageInfo::probe(bytes)
            .ok_or_else(|| ExportError::Render("unsupported raster image".to_string()))?;
        let svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}"><image x="0" y="0" width="{w}" height="{h}" xlink:href="{href}"/></svg>"#,
            w = info.width,
            h = info.height,
            href = data_url(info.mime_type, bytes)
        );
        self.rasterize_svg(&svg)
    }

    /// Intrinsic size of an SVG document, if it parses.
    pub fn svg_size(&self, bytes: &[u8]) -> Option<(u32, u32)> {
        let mut options = usvg::Options::default();
        options.fontdb = Arc::clone(&self.fontdb);
        let tree = usvg::Tree::from_data(bytes, &options).ok()?;
        let size = tree.size().to_int_size();
        Some((size.width(), size.height()))
    }

    pub fn rasterize_svg(&self, svg: &str) -> Result<Vec<u8>> {
        let mut options = usvg::Options::default();
        options.fontdb = Arc::clone(&self.fontdb);
        let tree = usvg::Tree::from_str(svg, &options)
            .map_err(|err| ExportError::Render(format!("failed to parse SVG: {}", err)))?;

        let size = tree.size().to_int_size();
        let mut pixmap = Pixmap::new(size.width(), size.height()).ok_or_else(|| {
            ExportError::Render(format!(
                "invalid canvas size {}x{}",
                size.width(),
                size.height()
            ))
        })?;
        resvg::render(&tree, Transform::default(), &mut pixmap.as_mut());
        pixmap
            .encode_png()
            .map_err(|err| ExportError::Render(format!("failed to encode PNG: {}", err)))
    }
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// 1x1 transparent PNG.
    pub(crate) const TINY_PNG: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
        0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
        0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
        0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ];

    fn text(anchor: (i64, i64), label: &str, shape: Option<DropShape>) -> OverlayAnnotation {
        OverlayAnnotation {
            anchor,
            label: AnnotationLabel::Text(label.to_string()),
            shape,
        }
    }

    fn overlaps(a: &PlacedBox, b: &PlacedBox) -> bool {
        a.x_from < b.x_to && b.x_from < a.x_to && a.y_from < b.y_to && b.y_from < a.y_to
    }

    #[test]
    fn test_parse_shapes() {
        assert_eq!(
            DropShape::parse("rectangle", "10,20;100,50"),
            Some(DropShape::Rectangle {
                x: 10,
                y: 20,
                width: 100,
                height: 50
            })
        );
        assert_eq!(
            DropShape::parse("circle", "50,60;15"),
            Some(DropShape::Circle {
                cx: 50,
                cy: 60,
                radius: 15
            })
        );
        let polygon = DropShape::parse("polygon", "0,0;10,0;10,10;0,10").unwrap();
        assert_eq!(polygon.center(), (5, 5));
        assert!(DropShape::parse("rectangle", "10,20").is_none());
        assert!(DropShape::parse("star", "1,1").is_none());
    }

    #[test]
    fn test_shape_centers() {
        let rect = DropShape::parse("rectangle", "10,20;100,50").unwrap();
        assert_eq!(rect.center(), (60, 45));
        let circle = DropShape::parse("circle", "50,60;15").unwrap();
        assert_eq!(circle.center(), (50, 60));
    }

    #[test]
    fn test_font_size_scales_with_background() {
        assert_eq!(font_size(OverlayStyle::TextTiles, 600), 15.0);
        assert_eq!(font_size(OverlayStyle::TextTiles, 150), 10.0);
        assert_eq!(font_size(OverlayStyle::Markers, 180), 10.0);
    }

    #[test]
    fn test_redistribution_avoids_overlap() {
        let rect = DropShape::Rectangle {
            x: 100,
            y: 100,
            width: 200,
            height: 120,
        };
        let mut scene = OverlayScene::new(OverlayStyle::Markers);
        scene.redistribute = true;
        let center = rect.center();
        scene.annotations.push(text(center, "first", Some(rect.clone())));
        scene.annotations.push(text(center, "second", Some(rect.clone())));

        let laid_out = layout(&scene, (600, 400));
        let a = laid_out.boxes[0];
        let b = laid_out.boxes[1];
        assert!(a.height() + b.height() + SHAPE_MARGIN < 120);
        assert!(!overlaps(&a, &b));
        for placed in [a, b] {
            assert!(placed.x_from >= 100 && placed.x_to <= 300);
            assert!(placed.y_from >= 100 && placed.y_to <= 220);
        }
    }

    #[test]
    fn test_lone_label_keeps_its_anchor() {
        let rect = DropShape::Rectangle {
            x: 100,
            y: 100,
            width: 200,
            height: 120,
        };
        let mut scene = OverlayScene::new(OverlayStyle::Markers);
        scene.redistribute = true;
        scene.annotations.push(text(rect.center(), "only", Some(rect.clone())));

        let laid_out = layout(&scene, (600, 400));
        let placed = laid_out.boxes[0];
        assert_eq!((placed.x_from, placed.y_from), (200, 160));
    }

    #[test]
    fn test_without_redistribution_labels_stay_on_anchor() {
        let rect = DropShape::Rectangle {
            x: 0,
            y: 0,
            width: 100,
            height: 100,
        };
        let mut scene = OverlayScene::new(OverlayStyle::Markers);
        scene.annotations.push(text((30, 40), "a", Some(rect.clone())));
        scene.annotations.push(text((30, 40), "b", Some(rect)));

        let laid_out = layout(&scene, (200, 200));
        assert!(laid_out.boxes.iter().all(|b| (b.x_from, b.y_from) == (30, 40)));
    }

    #[test]
    fn test_boxes_sorted_left_to_right() {
        let mut scene = OverlayScene::new(OverlayStyle::TextTiles);
        scene.annotations.push(text((80, 0), "right", None));
        scene.annotations.push(text((5, 0), "left", None));

        let laid_out = layout(&scene, (300, 300));
        assert_eq!(laid_out.boxes[0].annotation, 1);
        assert_eq!(laid_out.boxes[1].annotation, 0);
    }

    #[test]
    fn test_canvas_grows_for_out_of_bounds_labels() {
        let mut scene = OverlayScene::new(OverlayStyle::TextTiles);
        scene.annotations.push(text((90, 90), "overflowing label", None));

        let laid_out = layout(&scene, (100, 100));
        let placed = laid_out.boxes[0];
        assert!(laid_out.grows_canvas((100, 100)));
        assert_eq!(
            laid_out.canvas,
            ((placed.x_to + CANVAS_PADDING) as u32, (placed.y_to + CANVAS_PADDING) as u32)
        );

        let mut fitting = OverlayScene::new(OverlayStyle::TextTiles);
        fitting.annotations.push(text((0, 0), "x", None));
        assert_eq!(layout(&fitting, (100, 100)).canvas, (100, 100));
    }

    #[test]
    fn test_multiline_text_is_taller() {
        let one = label_size(&AnnotationLabel::Text("a".into()), 15.0);
        let two = label_size(&AnnotationLabel::Text("a\nb".into()), 15.0);
        assert_eq!(two.1 - one.1, line_height(15.0));
    }

    #[test]
    fn test_probe_rejects_non_images() {
        assert!(ImageInfo::probe(b"not an image").is_none());
        let info = ImageInfo::probe(TINY_PNG).unwrap();
        assert_eq!((info.width, info.height, info.mime_type), (1, 1, "image/png"));
    }

    #[test]
    fn test_render_produces_png() {
        let renderer = OverlayRenderer::with_fontdb(Arc::new(Database::new()));
        let mut scene = OverlayScene::new(OverlayStyle::TextTiles);
        scene.annotations.push(OverlayAnnotation {
            anchor: (0, 0),
            label: AnnotationLabel::Image {
                bytes: TINY_PNG.to_vec(),
                info: ImageInfo::probe(TINY_PNG).unwrap(),
            },
            shape: None,
        });

        let png = renderer.render(TINY_PNG, &scene).unwrap();
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));
        let info = ImageInfo::probe(&png).unwrap();
        // The 1x1 background grows to fit the framed tile.
        assert!(info.width > 1 && info.height > 1);
    }

    #[test]
    fn test_reencode_rejects_garbage() {
        let renderer = OverlayRenderer::with_fontdb(Arc::new(Database::new()));
        assert!(renderer.reencode_png(b"definitely not an image").is_err());
        assert!(renderer.reencode_png(TINY_PNG).is_ok());
    }
}
