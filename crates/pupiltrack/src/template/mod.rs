//! Template store: positive pupil templates and anti-templates.
//!
//! A fresh store holds one synthetic dark-disc template per radius in a
//! configured range. Adding the first manual template replaces those discs;
//! [`TemplateStore::regenerate_auto_templates`] restores them. Brightness
//! statistics over the positive set are recomputed on every change and feed
//! the blink detector.

mod bundle;
mod disc;
mod stats;

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::error::TrackError;
use crate::geometry::{PatchRect, SearchWindow};

pub use stats::{BrightnessStatistics, RunningStats};

#[cfg(test)]
pub(crate) use disc::paint_disc;

/// A reference patch scored against frames by correlation.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    image: GrayImage,
    radius: Option<f64>,
    center: [f64; 2],
    pupil_brightness: f64,
    window_brightness: f64,
}

impl Template {
    /// Build a template from an already-clipped patch.
    ///
    /// `center` is the pupil center relative to the patch's top-left corner.
    pub fn new(
        image: GrayImage,
        radius: Option<f64>,
        center: [f64; 2],
        window_brightness: f64,
    ) -> Self {
        let pupil_brightness = mean_intensity(&image);
        Self {
            image,
            radius,
            center,
            pupil_brightness,
            window_brightness,
        }
    }

    fn auto_disc(radius: u32) -> Self {
        let image = disc::disc_patch(radius);
        let half = f64::from(image.width()) / 2.0;
        Self::new(image, Some(f64::from(radius)), [half, half], 0.0)
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Declared pupil radius; `None` for anti-templates.
    pub fn radius(&self) -> Option<f64> {
        self.radius
    }

    /// Sub-pixel pupil center relative to the patch bounds.
    pub fn center(&self) -> [f64; 2] {
        self.center
    }

    /// Mean patch intensity, cached at creation.
    pub fn pupil_brightness(&self) -> f64 {
        self.pupil_brightness
    }

    /// Mean search-window intensity at creation (`0` when unknown).
    pub fn window_brightness(&self) -> f64 {
        self.window_brightness
    }
}

fn mean_intensity(img: &GrayImage) -> f64 {
    let n = img.as_raw().len();
    if n == 0 {
        return f64::NAN;
    }
    img.as_raw().iter().map(|&p| f64::from(p)).sum::<f64>() / n as f64
}

/// Which positive templates take part in matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateSelection {
    /// Every positive template.
    #[default]
    All,
    /// The `k` most recently added templates.
    MostRecent(usize),
}

/// Radius range of the synthetic disc templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoTemplateConfig {
    pub min_radius: u32,
    pub max_radius: u32,
}

impl Default for AutoTemplateConfig {
    fn default() -> Self {
        Self {
            min_radius: 8,
            max_radius: 14,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetKind {
    Auto,
    Custom,
}

/// Positive templates plus anti-templates, with cached brightness statistics.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    templates: Vec<Template>,
    anti_templates: Vec<Template>,
    kind: SetKind,
    window_brightness_available: bool,
    brightness: BrightnessStatistics,
}

impl TemplateStore {
    /// Store holding auto-generated disc templates for `config`'s radius range.
    pub fn new(config: &AutoTemplateConfig) -> Result<Self, TrackError> {
        let mut store = Self {
            templates: Vec::new(),
            anti_templates: Vec::new(),
            kind: SetKind::Auto,
            window_brightness_available: false,
            brightness: BrightnessStatistics::default(),
        };
        store.regenerate_auto_templates(config.min_radius, config.max_radius)?;
        Ok(store)
    }

    pub(crate) fn from_parts(
        templates: Vec<Template>,
        anti_templates: Vec<Template>,
        window_brightness_available: bool,
    ) -> Self {
        let brightness = BrightnessStatistics::compute(&templates, window_brightness_available);
        Self {
            templates,
            anti_templates,
            kind: SetKind::Custom,
            window_brightness_available,
            brightness,
        }
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn anti_templates(&self) -> &[Template] {
        &self.anti_templates
    }

    /// `true` once a manual template has replaced the synthetic discs.
    pub fn is_customized(&self) -> bool {
        self.kind == SetKind::Custom
    }

    pub fn window_brightness_available(&self) -> bool {
        self.window_brightness_available
    }

    pub fn brightness(&self) -> &BrightnessStatistics {
        &self.brightness
    }

    /// Templates taking part in matching under `selection`, oldest first.
    pub fn active_templates(&self, selection: TemplateSelection) -> &[Template] {
        match selection {
            TemplateSelection::All => &self.templates,
            TemplateSelection::MostRecent(k) => {
                let k = k.clamp(1, self.templates.len());
                &self.templates[self.templates.len() - k..]
            }
        }
    }

    /// Crop a positive template out of `frame`.
    ///
    /// Returns the new template's index. The first manual template discards
    /// the synthetic disc set.
    pub fn add_template(
        &mut self,
        frame: &GrayImage,
        rect: PatchRect,
        radius: f64,
        window: SearchWindow,
    ) -> Result<usize, TrackError> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(TrackError::InvalidInput(format!(
                "template radius must be positive, got {}",
                radius
            )));
        }
        let (width, height) = frame.dimensions();
        if window.clamped(width, height).is_empty() {
            return Err(TrackError::InvalidInput(format!(
                "search window {:?} does not overlap the {}x{} frame",
                window, width, height
            )));
        }
        let (image, center) = crop_patch(frame, rect)?;
        let template = Template::new(image, Some(radius), center, window.mean_brightness(frame));

        if self.kind == SetKind::Auto {
            self.templates.clear();
            self.kind = SetKind::Custom;
            self.window_brightness_available = true;
        }
        self.templates.push(template);
        self.refresh_statistics();
        tracing::debug!(
            "added template #{} ({}x{}, r={:.2})",
            self.templates.len() - 1,
            rect.width,
            rect.height,
            radius
        );
        Ok(self.templates.len() - 1)
    }

    /// Crop an anti-template (known false-positive region) out of `frame`.
    pub fn add_anti_template(
        &mut self,
        frame: &GrayImage,
        rect: PatchRect,
    ) -> Result<usize, TrackError> {
        let (image, center) = crop_patch(frame, rect)?;
        self.anti_templates.push(Template::new(image, None, center, 0.0));
        tracing::debug!("added anti-template #{}", self.anti_templates.len() - 1);
        Ok(self.anti_templates.len() - 1)
    }

    /// Remove a positive template. The last remaining one cannot be removed.
    pub fn remove_template(&mut self, index: usize) -> Result<Template, TrackError> {
        if index >= self.templates.len() || self.templates.len() == 1 {
            return Err(TrackError::OutOfRange {
                context: "template",
                index,
                len: self.templates.len(),
            });
        }
        let removed = self.templates.remove(index);
        self.refresh_statistics();
        Ok(removed)
    }

    pub fn remove_anti_template(&mut self, index: usize) -> Result<Template, TrackError> {
        if index >= self.anti_templates.len() {
            return Err(TrackError::OutOfRange {
                context: "anti-template",
                index,
                len: self.anti_templates.len(),
            });
        }
        Ok(self.anti_templates.remove(index))
    }

    /// Discard manual templates and synthesize one disc per radius in
    /// `[min_radius, max_radius]`. Anti-templates are kept.
    pub fn regenerate_auto_templates(
        &mut self,
        min_radius: u32,
        max_radius: u32,
    ) -> Result<(), TrackError> {
        if min_radius == 0 || min_radius > max_radius {
            return Err(TrackError::InvalidInput(format!(
                "auto template radius range [{}, {}] is empty or starts at zero",
                min_radius, max_radius
            )));
        }
        self.templates = (min_radius..=max_radius).map(Template::auto_disc).collect();
        self.kind = SetKind::Auto;
        self.window_brightness_available = false;
        self.refresh_statistics();
        tracing::debug!(
            "regenerated {} disc templates (r={}..={})",
            self.templates.len(),
            min_radius,
            max_radius
        );
        Ok(())
    }

    fn refresh_statistics(&mut self) {
        self.brightness =
            BrightnessStatistics::compute(&self.templates, self.window_brightness_available);
    }
}

/// Clip `rect` to the frame and copy the pixels.
///
/// The returned center is the rectangle's geometric center expressed in the
/// clipped patch's coordinates.
fn crop_patch(frame: &GrayImage, rect: PatchRect) -> Result<(GrayImage, [f64; 2]), TrackError> {
    let clip = rect.clip(frame.width(), frame.height())?;
    let image =
        image::imageops::crop_imm(frame, clip.x, clip.y, clip.width, clip.height).to_image();
    let center = [
        f64::from(rect.width) / 2.0 - f64::from(clip.cut_left),
        f64::from(rect.height) / 2.0 - f64::from(clip.cut_top),
    ];
    Ok((image, center))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::pupil_frame;
    use approx::assert_relative_eq;

    fn store() -> TemplateStore {
        TemplateStore::new(&AutoTemplateConfig {
            min_radius: 5,
            max_radius: 7,
        })
        .unwrap()
    }

    #[test]
    fn default_store_holds_one_disc_per_radius() {
        let s = store();
        assert!(!s.is_customized());
        let radii: Vec<_> = s.templates().iter().map(|t| t.radius()).collect();
        assert_eq!(radii, vec![Some(5.0), Some(6.0), Some(7.0)]);
        for t in s.templates() {
            assert_relative_eq!(t.center()[0], f64::from(t.width()) / 2.0);
        }
        assert!(s.brightness().window.is_none());
    }

    #[test]
    fn first_manual_template_replaces_discs() {
        let frame = pupil_frame(64, 48, [30, 20], 6);
        let mut s = store();
        let idx = s
            .add_template(&frame, PatchRect::centered(30, 20, 9), 6.0, SearchWindow::full(64, 48))
            .unwrap();
        assert_eq!(idx, 0);
        assert!(s.is_customized());
        assert_eq!(s.templates().len(), 1);
        let t = &s.templates()[0];
        assert_eq!((t.width(), t.height()), (19, 19));
        assert_relative_eq!(t.center()[0], 9.5);
        let window = s.brightness().window.unwrap();
        assert_eq!(window.count(), 1);
        assert_relative_eq!(window.mean(), SearchWindow::full(64, 48).mean_brightness(&frame));
    }

    #[test]
    fn clipped_template_shifts_center() {
        let frame = pupil_frame(64, 48, [3, 20], 6);
        let mut s = store();
        s.add_template(&frame, PatchRect::new(-5, 11, 19, 19), 6.0, SearchWindow::full(64, 48))
            .unwrap();
        let t = &s.templates()[0];
        assert_eq!(t.width(), 14);
        assert_relative_eq!(t.center()[0], 9.5 - 5.0);
        assert_relative_eq!(t.center()[1], 9.5);
    }

    #[test]
    fn opposite_edge_overflow_is_geometry_error() {
        let frame = pupil_frame(16, 16, [8, 8], 3);
        let mut s = store();
        let err = s
            .add_template(&frame, PatchRect::new(-2, 0, 20, 5), 3.0, SearchWindow::full(16, 16))
            .unwrap_err();
        assert!(matches!(err, TrackError::Geometry { .. }));
        assert!(!s.is_customized());
        let err = s.add_anti_template(&frame, PatchRect::new(0, -1, 5, 18)).unwrap_err();
        assert!(matches!(err, TrackError::Geometry { .. }));
    }

    #[test]
    fn window_outside_frame_is_rejected() {
        let frame = pupil_frame(64, 48, [30, 20], 6);
        let mut s = store();
        let err = s
            .add_template(
                &frame,
                PatchRect::centered(30, 20, 9),
                6.0,
                SearchWindow::new(100, 100, 200, 200),
            )
            .unwrap_err();
        assert!(matches!(err, TrackError::InvalidInput(_)));
        assert!(!s.is_customized());
        assert!(s.brightness().window.is_none());

        let err = s
            .add_template(&frame, PatchRect::centered(30, 20, 9), 6.0, SearchWindow::new(10, 10, 10, 40))
            .unwrap_err();
        assert!(matches!(err, TrackError::InvalidInput(_)));
    }

    #[test]
    fn last_template_cannot_be_removed() {
        let frame = pupil_frame(64, 48, [30, 20], 6);
        let mut s = store();
        let w = SearchWindow::full(64, 48);
        s.add_template(&frame, PatchRect::centered(30, 20, 9), 6.0, w).unwrap();
        s.add_template(&frame, PatchRect::centered(30, 20, 8), 6.0, w).unwrap();
        assert!(matches!(s.remove_template(5), Err(TrackError::OutOfRange { .. })));
        s.remove_template(0).unwrap();
        assert!(matches!(
            s.remove_template(0),
            Err(TrackError::OutOfRange { len: 1, .. })
        ));
        assert!(matches!(
            s.remove_anti_template(0),
            Err(TrackError::OutOfRange { len: 0, .. })
        ));
    }

    #[test]
    fn most_recent_selection_takes_tail() {
        let s = store();
        let recent = s.active_templates(TemplateSelection::MostRecent(2));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].radius(), Some(6.0));
        assert_eq!(s.active_templates(TemplateSelection::MostRecent(0)).len(), 1);
        assert_eq!(s.active_templates(TemplateSelection::MostRecent(99)).len(), 3);
    }

    #[test]
    fn regenerate_restores_auto_state() {
        let frame = pupil_frame(64, 48, [30, 20], 6);
        let mut s = store();
        s.add_template(&frame, PatchRect::centered(30, 20, 9), 6.0, SearchWindow::full(64, 48))
            .unwrap();
        s.add_anti_template(&frame, PatchRect::centered(10, 10, 4)).unwrap();
        s.regenerate_auto_templates(3, 4).unwrap();
        assert!(!s.is_customized());
        assert_eq!(s.templates().len(), 2);
        assert_eq!(s.anti_templates().len(), 1);
        assert!(s.regenerate_auto_templates(5, 4).is_err());
    }
}
