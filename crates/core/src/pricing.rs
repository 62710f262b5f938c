//! Deterministic token cost model.
//!
//! All arithmetic is done in `rust_decimal::Decimal` and rounded to two
//! decimal places with away-from-zero midpoint rounding, so every node that
//! recomputes a cost arrives at the same figure. A job's cost is fixed at
//! admission and never recomputed afterwards.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::params::VideoResolution;

/// One token is approximately one 1024x1024 image at 20 steps.
const PIXELS_PER_TOKEN: u64 = 1024 * 1024;

/// Step count at which an image costs its resolution-based price.
const BASELINE_STEPS: u32 = 20;

/// The minimum billable cost for any admitted job.
pub fn min_cost() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

/// Round to 2 dp, away from zero on midpoints (billing favours the house).
fn two_dp(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Clamp a raw cost to the billable range, always at scale 2.
fn billable(raw: Decimal) -> Decimal {
    let mut rounded = two_dp(raw);
    rounded.rescale(2);
    if rounded < min_cost() {
        min_cost()
    } else {
        rounded
    }
}

/// `(W * H / 1024^2) * (steps / 20)`.
pub fn image_cost(width: u32, height: u32, steps: u32) -> Decimal {
    let pixels = Decimal::from(u64::from(width) * u64::from(height));
    let resolution_factor = pixels / Decimal::from(PIXELS_PER_TOKEN);
    let steps_factor = Decimal::from(steps) / Decimal::from(BASELINE_STEPS);
    billable(resolution_factor * steps_factor)
}

/// `duration * 3/5`, scaled by the resolution preset multiplier.
pub fn video_cost(duration_secs: u32, resolution: VideoResolution) -> Decimal {
    let base = Decimal::from(duration_secs) * Decimal::from(3) / Decimal::from(5);
    billable(base * resolution.cost_multiplier())
}

/// `max_tokens / 1000`.
pub fn text_cost(max_tokens: u32) -> Decimal {
    billable(Decimal::from(max_tokens) / Decimal::from(1000))
}

/// Flat rate per audio request.
pub fn audio_cost() -> Decimal {
    Decimal::new(50, 2) // 0.50
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    // -- Image --------------------------------------------------------------

    #[test]
    fn baseline_image_costs_one_token() {
        assert_eq!(image_cost(1024, 1024, 20), dec("1.00"));
    }

    #[test]
    fn image_cost_scales_with_steps() {
        assert_eq!(image_cost(1024, 1024, 40), dec("2.00"));
        assert_eq!(image_cost(1024, 1024, 10), dec("0.50"));
    }

    #[test]
    fn image_cost_scales_with_pixels() {
        assert_eq!(image_cost(512, 512, 20), dec("0.25"));
        assert_eq!(image_cost(2048, 2048, 20), dec("4.00"));
    }

    #[test]
    fn tiny_image_hits_minimum_billable_cost() {
        assert_eq!(image_cost(64, 64, 1), min_cost());
    }

    // -- Video --------------------------------------------------------------

    #[test]
    fn video_cost_at_720p_is_unscaled() {
        // 5s * 3/5 = 3.00
        assert_eq!(video_cost(5, VideoResolution::P720), dec("3.00"));
    }

    #[test]
    fn video_cost_halves_at_480p() {
        assert_eq!(video_cost(5, VideoResolution::P480), dec("1.50"));
    }

    #[test]
    fn video_cost_doubles_at_1080p() {
        assert_eq!(video_cost(5, VideoResolution::P1080), dec("6.00"));
    }

    // -- Text / audio -------------------------------------------------------

    #[test]
    fn text_cost_per_thousand_tokens() {
        assert_eq!(text_cost(1000), dec("1.00"));
        assert_eq!(text_cost(500), dec("0.50"));
        assert_eq!(text_cost(4096), dec("4.10"));
    }

    #[test]
    fn one_token_text_hits_minimum() {
        assert_eq!(text_cost(1), min_cost());
    }

    #[test]
    fn audio_is_flat_rate() {
        assert_eq!(audio_cost(), dec("0.50"));
    }
}
