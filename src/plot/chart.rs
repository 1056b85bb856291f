//! Chart container and `plotters` rendering.

use crate::error::{DaaError, Result};
use crate::plot::{ErrorBarLayout, HeatmapLayout, PcaLayout, PlotStyle};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::path::Path;

/// Layout computed by one of the renderers.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartLayout {
    ErrorBar(ErrorBarLayout),
    Heatmap(HeatmapLayout),
    Pca(PcaLayout),
}

/// A laid-out chart, ready to render.
#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    layout: ChartLayout,
    style: PlotStyle,
}

impl Chart {
    pub(crate) fn new(layout: ChartLayout, style: PlotStyle) -> Self {
        Self { layout, style }
    }

    pub fn layout(&self) -> &ChartLayout {
        &self.layout
    }

    pub fn style(&self) -> &PlotStyle {
        &self.style
    }

    pub fn errorbar(&self) -> Option<&ErrorBarLayout> {
        match &self.layout {
            ChartLayout::ErrorBar(l) => Some(l),
            _ => None,
        }
    }

    pub fn heatmap(&self) -> Option<&HeatmapLayout> {
        match &self.layout {
            ChartLayout::Heatmap(l) => Some(l),
            _ => None,
        }
    }

    pub fn pca(&self) -> Option<&PcaLayout> {
        match &self.layout {
            ChartLayout::Pca(l) => Some(l),
            _ => None,
        }
    }

    /// Render to an SVG document.
    pub fn to_svg(&self) -> Result<String> {
        let mut svg = String::new();
        {
            let root = SVGBackend::with_string(
                &mut svg,
                (self.style.width, self.style.height),
            )
            .into_drawing_area();
            self.draw(&root)?;
            root.present().map_err(plot_err)?;
        }
        Ok(svg)
    }

    /// Write to `path`; `.png` renders a bitmap, anything else SVG.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let size = (self.style.width, self.style.height);
        let is_png = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("png"))
            .unwrap_or(false);
        if is_png {
            let root = BitMapBackend::new(path, size).into_drawing_area();
            self.draw(&root)?;
            root.present().map_err(plot_err)?;
        } else {
            std::fs::write(path, self.to_svg()?)?;
        }
        log::info!("wrote {}", path.display());
        Ok(())
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> Result<()> {
        root.fill(&WHITE).map_err(plot_err)?;
        match &self.layout {
            ChartLayout::ErrorBar(layout) => draw_errorbar(root, layout, &self.style),
            ChartLayout::Heatmap(layout) => draw_heatmap(root, layout, &self.style),
            ChartLayout::Pca(layout) => draw_pca(root, layout, &self.style),
        }
    }
}

fn plot_err<E: std::fmt::Display>(e: E) -> DaaError {
    DaaError::Plot(e.to_string())
}

fn text_style(style: &PlotStyle, delta: i32) -> TextStyle<'_> {
    let size = (style.font_size as i32 + delta).max(6) as f64;
    TextStyle::from((style.font_family.as_str(), size).into_font())
}

fn rgb(c: [u8; 3]) -> RGBColor {
    RGBColor(c[0], c[1], c[2])
}

/// Label of the row whose centre is nearest `y`, or nothing between rows.
fn row_label(labels: &[String], y: f64) -> String {
    let i = y.round();
    if (y - i).abs() > 1e-6 || i < 0.0 {
        return String::new();
    }
    labels.get(i as usize).cloned().unwrap_or_default()
}

fn draw_errorbar<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    layout: &ErrorBarLayout,
    style: &PlotStyle,
) -> Result<()> {
    let n = layout.rows.len();
    let labels: Vec<String> = layout.rows.iter().map(|r| r.label.clone()).collect();
    let title = style
        .title
        .clone()
        .unwrap_or_else(|| format!("{}: differentially abundant features", layout.method));
    let root = root
        .titled(&title, text_style(style, 4))
        .map_err(plot_err)?;
    let (left, right) = root.split_horizontally((style.width as f64 * 0.62) as u32);

    let x_max = layout
        .rows
        .iter()
        .flat_map(|r| r.groups.iter().map(|g| (g.mean + g.sd) * 100.0))
        .fold(0.0_f64, f64::max)
        .max(1e-6)
        * 1.05;
    let y_range = -0.5..(n as f64 - 0.5);
    let label_fmt = |y: &f64| row_label(&labels, *y);

    let mut chart = ChartBuilder::on(&left)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size((style.width as f64 * 0.22) as u32)
        .build_cartesian_2d(0.0..x_max, y_range.clone())
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(n.max(1) * 2 + 1)
        .y_label_formatter(&label_fmt)
        .x_desc("Mean relative abundance (%)")
        .label_style(text_style(style, -2))
        .draw()
        .map_err(plot_err)?;

    let n_levels = layout.levels.len().max(1);
    let band = 0.8 / n_levels as f64;
    for (g, level) in layout.levels.iter().enumerate() {
        let color = rgb(style.color(g));
        let bars: Vec<(f64, f64, f64)> = layout
            .rows
            .iter()
            .enumerate()
            .filter_map(|(i, r)| {
                let s = r.groups.iter().find(|s| &s.level == level)?;
                let y0 = i as f64 - 0.4 + g as f64 * band;
                Some((y0, s.mean * 100.0, s.sd * 100.0))
            })
            .collect();
        chart
            .draw_series(
                bars.iter()
                    .map(|&(y0, m, _)| {
                        Rectangle::new([(0.0, y0), (m, y0 + band * 0.9)], color.filled())
                    }),
            )
            .map_err(plot_err)?
            .label(level.clone())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 12, y + 5)], color.filled()));
        chart
            .draw_series(bars.iter().map(|&(y0, m, s)| {
                let yc = y0 + band * 0.45;
                PathElement::new(vec![((m - s).max(0.0), yc), (m + s, yc)], BLACK.stroke_width(1))
            }))
            .map_err(plot_err)?;
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .label_font(text_style(style, -2))
        .draw()
        .map_err(plot_err)?;

    // fold change and adjusted p-value
    let lfc_max = layout
        .rows
        .iter()
        .map(|r| r.log2_fold_change.abs())
        .filter(|v| v.is_finite())
        .fold(0.0_f64, f64::max)
        .max(0.5)
        * 1.3;
    let mut chart = ChartBuilder::on(&right)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(10)
        .build_cartesian_2d(-lfc_max..lfc_max, y_range)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .disable_y_mesh()
        .y_labels(0)
        .x_desc("log2 fold change")
        .label_style(text_style(style, -2))
        .draw()
        .map_err(plot_err)?;
    chart
        .draw_series(std::iter::once(PathElement::new(
            vec![(0.0, -0.5), (0.0, n as f64 - 0.5)],
            BLACK.mix(0.4).stroke_width(1),
        )))
        .map_err(plot_err)?;
    chart
        .draw_series(
            layout
                .rows
                .iter()
                .enumerate()
                .filter(|(_, r)| r.log2_fold_change.is_finite())
                .map(|(i, r)| {
                    let color = rgb(style.color(usize::from(r.log2_fold_change >= 0.0)));
                    Circle::new((r.log2_fold_change, i as f64), 5, color.filled())
                }),
        )
        .map_err(plot_err)?;
    chart
        .draw_series(layout.rows.iter().enumerate().map(|(i, r)| {
            Text::new(
                format!("{:.1e}", r.p_adjust),
                (-lfc_max * 0.95, i as f64 + 0.3),
                text_style(style, -3),
            )
        }))
        .map_err(plot_err)?;
    Ok(())
}

/// Blue-white-red for z-scores clipped to [-2, 2].
fn diverging(z: f64) -> RGBColor {
    let t = (z.clamp(-2.0, 2.0) / 2.0 + 1.0) / 2.0;
    let lerp = |a: u8, b: u8, t: f64| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
    if t < 0.5 {
        let u = t / 0.5;
        RGBColor(lerp(0x3a, 0xff, u), lerp(0x7c, 0xff, u), lerp(0xc1, 0xff, u))
    } else {
        let u = (t - 0.5) / 0.5;
        RGBColor(lerp(0xff, 0xd9, u), lerp(0xff, 0x3f, u), lerp(0xff, 0x3f, u))
    }
}

fn draw_heatmap<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    layout: &HeatmapLayout,
    style: &PlotStyle,
) -> Result<()> {
    let (n_features, n_samples) = layout.z_scores.shape();
    let title =
        style.title.clone().unwrap_or_else(|| "Relative abundance (row z-score)".to_string());
    let root = root.titled(&title, text_style(style, 4)).map_err(plot_err)?;

    // first feature on top
    let top_down: Vec<String> = layout.labels.iter().rev().cloned().collect();
    let feature_fmt = |y: &f64| row_label(&top_down, *y - 0.5);
    let sample_fmt = |x: &f64| row_label(&layout.sample_ids, *x - 0.5);

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .x_label_area_size(60)
        .y_label_area_size((style.width as f64 * 0.25) as u32)
        .build_cartesian_2d(0.0..n_samples as f64, 0.0..n_features as f64)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(n_samples * 2 + 1)
        .y_labels(n_features * 2 + 1)
        .x_label_formatter(&sample_fmt)
        .y_label_formatter(&feature_fmt)
        .label_style(text_style(style, -3))
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series((0..n_features).flat_map(|i| {
            (0..n_samples).map(move |j| {
                let y = (n_features - 1 - i) as f64;
                Rectangle::new(
                    [(j as f64, y), (j as f64 + 1.0, y + 1.0)],
                    diverging(layout.z(i, j)).filled(),
                )
            })
        }))
        .map_err(plot_err)?;

    // group bands along the top edge
    for (g, level) in layout.levels.iter().enumerate() {
        let color = rgb(style.color(g));
        let columns: Vec<usize> =
            (0..n_samples).filter(|&j| &layout.sample_groups[j] == level).collect();
        chart
            .draw_series(columns.iter().map(|&j| {
                let top = n_features as f64;
                Rectangle::new([(j as f64, top - 0.08), (j as f64 + 1.0, top)], color.filled())
            }))
            .map_err(plot_err)?
            .label(level.clone())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 12, y + 5)], color.filled()));
    }
    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .label_font(text_style(style, -2))
        .draw()
        .map_err(plot_err)?;
    Ok(())
}

fn draw_pca<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    layout: &PcaLayout,
    style: &PlotStyle,
) -> Result<()> {
    let title = style.title.clone().unwrap_or_else(|| "PCA of relative abundance".to_string());
    let root = root.titled(&title, text_style(style, 4)).map_err(plot_err)?;

    let extent = |f: fn(&crate::plot::PcaPoint) -> f64| {
        let (lo, hi) = layout
            .points
            .iter()
            .map(f)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
        let pad = ((hi - lo) * 0.1).max(0.1);
        (lo - pad)..(hi + pad)
    };
    let x_range = extent(|p| p.pc1);
    let y_range = extent(|p| p.pc2);

    let mut chart = ChartBuilder::on(&root)
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc(format!("PC1 ({:.1}%)", layout.explained[0] * 100.0))
        .y_desc(format!("PC2 ({:.1}%)", layout.explained[1] * 100.0))
        .label_style(text_style(style, -2))
        .draw()
        .map_err(plot_err)?;

    for (g, level) in layout.levels.iter().enumerate() {
        let color = rgb(style.color(g));
        chart
            .draw_series(
                layout
                    .points
                    .iter()
                    .filter(|p| &p.group == level)
                    .map(|p| Circle::new((p.pc1, p.pc2), 6, color.filled())),
            )
            .map_err(plot_err)?
            .label(level.clone())
            .legend(move |(x, y)| Circle::new((x + 6, y), 5, color.filled()));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .label_font(text_style(style, -2))
        .draw()
        .map_err(plot_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::{fixtures, pathway_pca};
    use tempfile::tempdir;

    #[test]
    fn test_row_label() {
        let labels = vec!["a".to_string(), "b".to_string()];
        assert_eq!(row_label(&labels, 1.0), "b");
        assert_eq!(row_label(&labels, 0.5), "");
        assert_eq!(row_label(&labels, 5.0), "");
        assert_eq!(row_label(&labels, -1.0), "");
    }

    #[test]
    fn test_diverging_endpoints() {
        assert_eq!(diverging(0.0), RGBColor(0xff, 0xff, 0xff));
        assert_eq!(diverging(5.0), RGBColor(0xd9, 0x3f, 0x3f));
        assert_eq!(diverging(-5.0), RGBColor(0x3a, 0x7c, 0xc1));
    }

    #[test]
    fn test_render_errors_are_plot_errors() {
        let (table, metadata) = fixtures::table();
        let chart = pathway_pca(&table, &metadata, "group", &PlotStyle::default()).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("pca.svg");
        // text rendering needs a system font; without one the failure is a Plot error
        match chart.save(&path) {
            Ok(()) => assert!(std::fs::read_to_string(&path).unwrap().contains("<svg")),
            Err(e) => assert!(matches!(e, DaaError::Plot(_)), "{}", e),
        }
        let copy = chart.clone();
        assert_eq!(copy.layout(), chart.layout());
    }

    #[test]
    fn test_svg_file_matches_string_render() {
        let (table, metadata) = fixtures::table();
        let chart = pathway_pca(&table, &metadata, "group", &PlotStyle::default()).unwrap();
        let dir = tempdir().unwrap();
        let path = dir.path().join("pca");
        match (chart.to_svg(), chart.save(&path)) {
            (Ok(svg), Ok(())) => {
                assert!(svg.contains("<svg"));
                assert_eq!(std::fs::read_to_string(&path).unwrap(), svg);
            }
            (Err(e), _) | (_, Err(e)) => assert!(matches!(e, DaaError::Plot(_)), "{}", e),
        }
    }
}
