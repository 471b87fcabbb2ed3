//! Local glow simulation
//!
//! Maps the lantern state to a rendered frame as a pure function of time, so
//! the controller can preview modes without any device attached. Matches the
//! firmware's animation math: solid is a flat wash, fade breathes between two
//! colors on a sine, snake sweeps a gradient band around the ring.

use crate::state::{DeviceState, LightMode, Rgb, SnakeColorMode};

/// One rendered frame of the glow
#[derive(Debug, Clone, PartialEq)]
pub struct GlowFrame {
    pub rgb: Rgb,
    /// 0-1
    pub opacity: f32,
    pub layer: GlowLayer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GlowLayer {
    /// Uniform wash of `rgb` at `opacity`
    Radial,
    /// Horizontal band spanning 200% of the surface, shifted by `offset_pct`
    Sweep {
        stops: Vec<GradientStop>,
        offset_pct: f32,
    },
}

/// One gradient stop; `color: None` is fully transparent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientStop {
    pub color: Option<Rgb>,
    /// Position along the band, 0-100
    pub at: f32,
}

impl GradientStop {
    fn clear(at: f32) -> Self {
        Self { color: None, at }
    }

    fn solid(color: Rgb, at: f32) -> Self {
        Self {
            color: Some(color),
            at,
        }
    }
}

/// CSS named colors the firmware's rainbow cycles through, wrapped back to red
const RAINBOW: [Rgb; 8] = [
    [255, 0, 0],
    [255, 165, 0],
    [255, 255, 0],
    [0, 128, 0],
    [0, 0, 255],
    [75, 0, 130],
    [238, 130, 238],
    [255, 0, 0],
];

/// Opacity of the snake band
const SNAKE_OPACITY: f32 = 0.2;

/// Render the glow for `state` at `now` seconds
///
/// `active` is false while disconnected and not demoing; the glow is then
/// fully dark regardless of state.
pub fn render(state: &DeviceState, now: f64, active: bool) -> GlowFrame {
    if !active {
        return GlowFrame {
            rgb: [0, 0, 0],
            opacity: 0.0,
            layer: GlowLayer::Radial,
        };
    }

    match state.mode {
        LightMode::Solid => GlowFrame {
            rgb: state.solid_color,
            opacity: state.solid_bright,
            layer: GlowLayer::Radial,
        },
        LightMode::Fade => render_fade(state, now),
        LightMode::Snake => render_snake(state, now),
    }
}

fn render_fade(state: &DeviceState, now: f64) -> GlowFrame {
    // Sine breathing between fade_min and fade_max
    let half_sine = ((now * f64::from(state.fade_speed) * 3.0).sin() as f32 + 1.0) / 2.0;
    let m = state.fade_min + half_sine * (state.fade_max - state.fade_min);

    let [r, g, b] = if state.fade_use_2 {
        mix(state.fade_color, state.fade_color_2, m)
    } else {
        scale(state.fade_color, m)
    };

    // Brightness moves to the opacity channel; the color is normalized to
    // full scale so hue stays constant through the breath
    let max = r.max(g).max(b).max(1.0);
    GlowFrame {
        rgb: [
            (r / max * 255.0).round() as u8,
            (g / max * 255.0).round() as u8,
            (b / max * 255.0).round() as u8,
        ],
        opacity: max / 255.0,
        layer: GlowLayer::Radial,
    }
}

fn render_snake(state: &DeviceState, now: f64) -> GlowFrame {
    let (rgb, stops) = match state.snake_color_mode {
        SnakeColorMode::Single => (
            state.snake_color_1,
            vec![
                GradientStop::clear(0.0),
                GradientStop::solid(state.snake_color_1, 50.0),
                GradientStop::clear(100.0),
            ],
        ),
        SnakeColorMode::Gradient => (
            [0, 0, 0],
            vec![
                GradientStop::clear(0.0),
                GradientStop::solid(state.snake_color_1, 40.0),
                GradientStop::solid(state.snake_color_2, 60.0),
                GradientStop::clear(100.0),
            ],
        ),
        SnakeColorMode::Rainbow => (
            [0, 0, 0],
            RAINBOW
                .iter()
                .enumerate()
                .map(|(i, &color)| {
                    GradientStop::solid(color, i as f32 * 100.0 / (RAINBOW.len() - 1) as f32)
                })
                .collect(),
        ),
    };

    // The band spans 200% of the surface, so the offset wraps at 200
    let mut offset = (now * f64::from(state.snake_speed) * 50.0) % 200.0;
    if !state.snake_cw {
        offset = -offset;
    }

    GlowFrame {
        rgb,
        opacity: SNAKE_OPACITY,
        layer: GlowLayer::Sweep {
            stops,
            offset_pct: offset as f32,
        },
    }
}

fn mix(a: Rgb, b: Rgb, m: f32) -> [f32; 3] {
    [
        f32::from(a[0]) + (f32::from(b[0]) - f32::from(a[0])) * m,
        f32::from(a[1]) + (f32::from(b[1]) - f32::from(a[1])) * m,
        f32::from(a[2]) + (f32::from(b[2]) - f32::from(a[2])) * m,
    ]
}

fn scale(c: Rgb, m: f32) -> [f32; 3] {
    [
        f32::from(c[0]) * m,
        f32::from(c[1]) * m,
        f32::from(c[2]) * m,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_inactive_renders_dark() {
        let mut state = DeviceState::default();
        state.mode = LightMode::Snake;
        let frame = render(&state, 12.5, false);
        assert_eq!(frame.rgb, [0, 0, 0]);
        assert_eq!(frame.opacity, 0.0);
        assert_eq!(frame.layer, GlowLayer::Radial);
    }

    #[test]
    fn test_solid_frame() {
        let state = DeviceState::default();
        let frame = render(&state, 3.0, true);
        assert_eq!(frame.rgb, [255, 230, 0]);
        assert!(approx(frame.opacity, 0.8));
        assert_eq!(frame.layer, GlowLayer::Radial);
    }

    #[test]
    fn test_fade_peak_hits_fade_max() {
        let mut state = DeviceState::default();
        state.mode = LightMode::Fade;
        state.fade_use_2 = false;
        state.fade_color = [255, 0, 0];
        state.fade_speed = 1.0;

        // sin(now * speed * 3) == 1 at now = pi/6
        let frame = render(&state, PI / 6.0, true);
        assert_eq!(frame.rgb, [255, 0, 0]);
        assert!(approx(frame.opacity, state.fade_max));
    }

    #[test]
    fn test_fade_trough_hits_fade_min() {
        let mut state = DeviceState::default();
        state.mode = LightMode::Fade;
        state.fade_use_2 = false;
        state.fade_color = [255, 0, 0];
        state.fade_speed = 1.0;

        // sin(now * speed * 3) == -1 at now = pi/2
        let frame = render(&state, PI / 2.0, true);
        assert_eq!(frame.rgb, [255, 0, 0]);
        assert!(approx(frame.opacity, state.fade_min));
    }

    #[test]
    fn test_fade_two_color_mix_normalizes_hue() {
        let mut state = DeviceState::default();
        state.mode = LightMode::Fade;
        state.fade_use_2 = true;
        state.fade_color = [0, 0, 0];
        state.fade_color_2 = [200, 100, 0];
        state.fade_min = 0.1;
        state.fade_max = 0.9;
        state.fade_speed = 1.0;

        // m == fade_max == 0.9 -> mixed [180, 90, 0], max 180
        let frame = render(&state, PI / 6.0, true);
        assert_eq!(frame.rgb, [255, 128, 0]);
        assert!(approx(frame.opacity, 180.0 / 255.0));
    }

    #[test]
    fn test_fade_opacity_stays_inside_band() {
        let mut state = DeviceState::default();
        state.mode = LightMode::Fade;
        state.fade_use_2 = false;
        state.fade_color = [255, 40, 0];
        state.fade_min = 0.25;
        state.fade_max = 0.75;
        state.fade_speed = 1.3;

        // With a full-scale channel the opacity equals the mix factor
        for i in 0..400 {
            let frame = render(&state, i as f64 * 0.037, true);
            assert!(frame.opacity >= state.fade_min - 1e-4);
            assert!(frame.opacity <= state.fade_max + 1e-4);
        }
    }

    #[test]
    fn test_snake_single_band() {
        let mut state = DeviceState::default();
        state.mode = LightMode::Snake;
        state.snake_color_mode = SnakeColorMode::Single;
        state.snake_color_1 = [0, 200, 50];
        state.snake_speed = 1.0;

        let frame = render(&state, 1.0, true);
        assert_eq!(frame.rgb, [0, 200, 50]);
        assert!(approx(frame.opacity, SNAKE_OPACITY));
        match frame.layer {
            GlowLayer::Sweep { stops, offset_pct } => {
                assert_eq!(
                    stops,
                    vec![
                        GradientStop::clear(0.0),
                        GradientStop::solid([0, 200, 50], 50.0),
                        GradientStop::clear(100.0),
                    ]
                );
                assert!(approx(offset_pct, 50.0));
            }
            GlowLayer::Radial => panic!("snake must render a sweep"),
        }
    }

    #[test]
    fn test_snake_counter_clockwise_negates_offset() {
        let mut state = DeviceState::default();
        state.mode = LightMode::Snake;
        state.snake_cw = false;
        state.snake_speed = 1.0;

        let frame = render(&state, 1.0, true);
        match frame.layer {
            GlowLayer::Sweep { offset_pct, .. } => assert!(approx(offset_pct, -50.0)),
            GlowLayer::Radial => panic!("snake must render a sweep"),
        }
    }

    #[test]
    fn test_snake_offset_wraps_at_200() {
        let mut state = DeviceState::default();
        state.mode = LightMode::Snake;
        state.snake_speed = 1.0;

        // 5 s * 50 = 250, wraps to 50
        let frame = render(&state, 5.0, true);
        match frame.layer {
            GlowLayer::Sweep { offset_pct, .. } => assert!(approx(offset_pct, 50.0)),
            GlowLayer::Radial => panic!("snake must render a sweep"),
        }
    }

    #[test]
    fn test_snake_gradient_stop_positions() {
        let mut state = DeviceState::default();
        state.mode = LightMode::Snake;
        state.snake_color_mode = SnakeColorMode::Gradient;
        state.snake_color_1 = [255, 0, 0];
        state.snake_color_2 = [0, 0, 255];

        let frame = render(&state, 0.0, true);
        match frame.layer {
            GlowLayer::Sweep { stops, .. } => {
                assert_eq!(stops.len(), 4);
                assert_eq!(stops[1], GradientStop::solid([255, 0, 0], 40.0));
                assert_eq!(stops[2], GradientStop::solid([0, 0, 255], 60.0));
            }
            GlowLayer::Radial => panic!("snake must render a sweep"),
        }
    }

    #[test]
    fn test_snake_rainbow_wraps_back_to_red() {
        let mut state = DeviceState::default();
        state.mode = LightMode::Snake;
        state.snake_color_mode = SnakeColorMode::Rainbow;

        let frame = render(&state, 0.0, true);
        match frame.layer {
            GlowLayer::Sweep { stops, .. } => {
                assert_eq!(stops.len(), 8);
                assert_eq!(stops[0], GradientStop::solid([255, 0, 0], 0.0));
                assert_eq!(stops[7], GradientStop::solid([255, 0, 0], 100.0));
            }
            GlowLayer::Radial => panic!("snake must render a sweep"),
        }
    }
}
