//! Per-capability job parameter parsing and validation.
//!
//! Admission turns the opaque `params` blob into one of the typed structs
//! below, checked against the caller's plan. The raw blob is what gets
//! persisted and shipped to the worker; the typed form exists so the cost
//! model and dispatcher operate on checked values.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::CoreError;
use crate::pricing;
use crate::types::Capability;

/// Prompt length ceiling, in characters.
pub const MAX_PROMPT_CHARS: usize = 2048;

/// Inclusive step-count range for image jobs.
pub const STEPS_RANGE: (u32, u32) = (1, 100);

/// Inclusive duration range for video jobs, seconds.
pub const VIDEO_DURATION_RANGE: (u32, u32) = (1, 30);

/// Inclusive frame-rate range for video jobs.
pub const VIDEO_FPS_RANGE: (u32, u32) = (8, 60);

/// Inclusive `max_tokens` range for text jobs.
pub const TEXT_MAX_TOKENS_RANGE: (u32, u32) = (1, 4096);

/// Audio clips longer than this are rejected regardless of plan.
pub const MAX_AUDIO_SECONDS: u32 = 120;

/// Voice identifiers the audio pipeline ships with.
pub const ALLOWED_VOICES: &[&str] = &["aurora", "breeze", "cobalt", "sage"];

/// Per-job execution deadline, seconds.
pub const DEFAULT_TIMEOUT_SECS: u32 = 300;
pub const MAX_TIMEOUT_SECS: u32 = 600;

/// Default numeric precision for generation, used in batch grouping.
pub const DEFAULT_PRECISION: &str = "fp16";

/// The inference engine that serves a capability.
pub fn engine_for(capability: Capability) -> &'static str {
    match capability {
        Capability::Image | Capability::Video => "comfyui",
        Capability::Text => "koboldcpp",
        Capability::Audio => "whisper",
    }
}

// ---------------------------------------------------------------------------
// Plan-derived validation rules
// ---------------------------------------------------------------------------

/// The subset of a plan that parameter validation needs.
#[derive(Debug, Clone)]
pub struct PlanRules {
    /// Longest allowed side of an image or video frame, pixels.
    pub max_resolution: u32,
    /// Model ids the plan may use; `"*"` is the wildcard.
    pub allowed_models: Vec<String>,
}

impl PlanRules {
    pub fn allows_model(&self, model: &str) -> bool {
        self.allowed_models
            .iter()
            .any(|m| m == "*" || m == model)
    }
}

// ---------------------------------------------------------------------------
// Video resolution presets
// ---------------------------------------------------------------------------

/// The three video resolution presets and their billing multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoResolution {
    P480,
    P720,
    P1080,
}

impl VideoResolution {
    pub fn as_str(self) -> &'static str {
        match self {
            VideoResolution::P480 => "480p",
            VideoResolution::P720 => "720p",
            VideoResolution::P1080 => "1080p",
        }
    }

    /// Longest frame side, used against `plan.max_resolution`.
    pub fn longest_side(self) -> u32 {
        match self {
            VideoResolution::P480 => 854,
            VideoResolution::P720 => 1280,
            VideoResolution::P1080 => 1920,
        }
    }

    pub fn cost_multiplier(self) -> Decimal {
        match self {
            VideoResolution::P480 => Decimal::new(5, 1),  // 0.5
            VideoResolution::P720 => Decimal::from(1),
            VideoResolution::P1080 => Decimal::from(2),
        }
    }
}

impl FromStr for VideoResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "480p" => Ok(VideoResolution::P480),
            "720p" => Ok(VideoResolution::P720),
            "1080p" => Ok(VideoResolution::P1080),
            other => Err(format!("Unknown resolution preset: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ImageParams {
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub model: String,
    pub precision: String,
    pub timeout_seconds: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoParams {
    pub prompt: String,
    pub duration_seconds: u32,
    pub fps: u32,
    pub resolution: VideoResolution,
    pub model: String,
    pub timeout_seconds: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextParams {
    pub prompt: String,
    pub max_tokens: u32,
    pub model: Option<String>,
    pub timeout_seconds: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioParams {
    pub prompt: String,
    pub voice: String,
    pub duration_seconds: u32,
    pub timeout_seconds: u32,
}

/// Validated parameters for one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobParams {
    Image(ImageParams),
    Video(VideoParams),
    Text(TextParams),
    Audio(AudioParams),
}

impl JobParams {
    pub fn capability(&self) -> Capability {
        match self {
            JobParams::Image(_) => Capability::Image,
            JobParams::Video(_) => Capability::Video,
            JobParams::Text(_) => Capability::Text,
            JobParams::Audio(_) => Capability::Audio,
        }
    }

    /// The inference engine that serves this capability.
    pub fn engine(&self) -> &'static str {
        engine_for(self.capability())
    }

    /// The model this job requests, when the capability takes one.
    pub fn model(&self) -> Option<&str> {
        match self {
            JobParams::Image(p) => Some(&p.model),
            JobParams::Video(p) => Some(&p.model),
            JobParams::Text(p) => p.model.as_deref(),
            JobParams::Audio(_) => None,
        }
    }

    pub fn timeout_seconds(&self) -> u32 {
        match self {
            JobParams::Image(p) => p.timeout_seconds,
            JobParams::Video(p) => p.timeout_seconds,
            JobParams::Text(p) => p.timeout_seconds,
            JobParams::Audio(p) => p.timeout_seconds,
        }
    }

    /// Token cost of this job under the deterministic cost model.
    pub fn cost(&self) -> Decimal {
        match self {
            JobParams::Image(p) => pricing::image_cost(p.width, p.height, p.steps),
            JobParams::Video(p) => pricing::video_cost(p.duration_seconds, p.resolution),
            JobParams::Text(p) => pricing::text_cost(p.max_tokens),
            JobParams::Audio(_) => pricing::audio_cost(),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation entry point
// ---------------------------------------------------------------------------

/// Parse and validate a raw parameter blob for `capability`.
///
/// `model_catalog` is the set of models the platform currently serves; an
/// empty catalog skips the unknown-model check (bootstrap, no workers yet).
/// Plan violations fail `INVALID_PARAMS`; a model missing from the catalog
/// fails `MODEL_NOT_FOUND`.
pub fn validate(
    capability: Capability,
    raw: &Value,
    plan: &PlanRules,
    model_catalog: &[String],
) -> Result<JobParams, CoreError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| CoreError::InvalidParams("params must be a JSON object".into()))?;
    if obj.is_empty() {
        return Err(CoreError::InvalidParams("params must not be empty".into()));
    }

    match capability {
        Capability::Image => validate_image(raw, plan, model_catalog).map(JobParams::Image),
        Capability::Video => validate_video(raw, plan, model_catalog).map(JobParams::Video),
        Capability::Text => validate_text(raw).map(JobParams::Text),
        Capability::Audio => validate_audio(raw).map(JobParams::Audio),
    }
}

fn validate_image(
    raw: &Value,
    plan: &PlanRules,
    catalog: &[String],
) -> Result<ImageParams, CoreError> {
    let prompt = require_prompt(raw)?;
    let (width, height) = parse_resolution(str_field(raw, "resolution")?.unwrap_or("1024x1024"))?;

    let longest = width.max(height);
    if longest > plan.max_resolution {
        return Err(CoreError::InvalidParams(format!(
            "Resolution {width}x{height} exceeds the plan maximum of {} px",
            plan.max_resolution
        )));
    }

    let steps = u32_field(raw, "steps")?.unwrap_or(20);
    require_range("steps", steps, STEPS_RANGE)?;

    let model = str_field(raw, "model")?
        .ok_or_else(|| CoreError::InvalidParams("Missing required field: model".into()))?
        .to_string();
    check_model(&model, plan, catalog)?;

    let precision = str_field(raw, "precision")?
        .unwrap_or(DEFAULT_PRECISION)
        .to_string();

    Ok(ImageParams {
        prompt,
        width,
        height,
        steps,
        model,
        precision,
        timeout_seconds: parse_timeout(raw)?,
    })
}

fn validate_video(
    raw: &Value,
    plan: &PlanRules,
    catalog: &[String],
) -> Result<VideoParams, CoreError> {
    let prompt = require_prompt(raw)?;

    let duration = u32_field(raw, "duration")?
        .ok_or_else(|| CoreError::InvalidParams("Missing required field: duration".into()))?;
    require_range("duration", duration, VIDEO_DURATION_RANGE)?;

    let fps = u32_field(raw, "fps")?.unwrap_or(24);
    require_range("fps", fps, VIDEO_FPS_RANGE)?;

    let resolution: VideoResolution = str_field(raw, "resolution")?
        .unwrap_or("720p")
        .parse()
        .map_err(CoreError::InvalidParams)?;
    if resolution.longest_side() > plan.max_resolution {
        return Err(CoreError::InvalidParams(format!(
            "Resolution preset {} exceeds the plan maximum of {} px",
            resolution.as_str(),
            plan.max_resolution
        )));
    }

    let model = str_field(raw, "model")?
        .ok_or_else(|| CoreError::InvalidParams("Missing required field: model".into()))?
        .to_string();
    check_model(&model, plan, catalog)?;

    Ok(VideoParams {
        prompt,
        duration_seconds: duration,
        fps,
        resolution,
        model,
        timeout_seconds: parse_timeout(raw)?,
    })
}

fn validate_text(raw: &Value) -> Result<TextParams, CoreError> {
    let prompt = require_prompt(raw)?;

    let max_tokens = u32_field(raw, "max_tokens")?.unwrap_or(1024);
    require_range("max_tokens", max_tokens, TEXT_MAX_TOKENS_RANGE)?;

    Ok(TextParams {
        prompt,
        max_tokens,
        model: str_field(raw, "model")?.map(str::to_string),
        timeout_seconds: parse_timeout(raw)?,
    })
}

fn validate_audio(raw: &Value) -> Result<AudioParams, CoreError> {
    let prompt = require_prompt(raw)?;

    let voice = str_field(raw, "voice")?.unwrap_or(ALLOWED_VOICES[0]);
    if !ALLOWED_VOICES.contains(&voice) {
        return Err(CoreError::InvalidParams(format!("Unknown voice: {voice}")));
    }

    let duration = u32_field(raw, "duration")?.unwrap_or(30);
    require_range("duration", duration, (1, MAX_AUDIO_SECONDS))?;

    Ok(AudioParams {
        prompt,
        voice: voice.to_string(),
        duration_seconds: duration,
        timeout_seconds: parse_timeout(raw)?,
    })
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn str_field<'a>(raw: &'a Value, key: &str) -> Result<Option<&'a str>, CoreError> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(CoreError::InvalidParams(format!(
            "Field {key} must be a string"
        ))),
    }
}

fn u32_field(raw: &Value, key: &str) -> Result<Option<u32>, CoreError> {
    match raw.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                CoreError::InvalidParams(format!("Field {key} must be a non-negative integer"))
            }),
    }
}

fn require_range(name: &str, value: u32, (lo, hi): (u32, u32)) -> Result<(), CoreError> {
    if value < lo || value > hi {
        return Err(CoreError::InvalidParams(format!(
            "Field {name} must be between {lo} and {hi}, got {value}"
        )));
    }
    Ok(())
}

/// Extract and vet the prompt: required, non-empty, bounded, printable.
fn require_prompt(raw: &Value) -> Result<String, CoreError> {
    let prompt = str_field(raw, "prompt")?
        .ok_or_else(|| CoreError::InvalidParams("Missing required field: prompt".into()))?
        .trim();

    if prompt.is_empty() {
        return Err(CoreError::InvalidParams("Prompt must not be empty".into()));
    }
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        return Err(CoreError::InvalidParams(format!(
            "Prompt exceeds {MAX_PROMPT_CHARS} characters"
        )));
    }
    if prompt.chars().any(|c| c.is_control() && c != '\n' && c != '\t') {
        return Err(CoreError::InvalidPrompt(
            "Prompt contains control characters".into(),
        ));
    }

    Ok(prompt.to_string())
}

/// Parse a `WxH` resolution string into positive dimensions.
fn parse_resolution(s: &str) -> Result<(u32, u32), CoreError> {
    let err = || CoreError::InvalidParams(format!("Resolution must be WxH, got: {s}"));
    let (w, h) = s.split_once(['x', 'X']).ok_or_else(err)?;
    let width: u32 = w.trim().parse().map_err(|_| err())?;
    let height: u32 = h.trim().parse().map_err(|_| err())?;
    if width == 0 || height == 0 {
        return Err(err());
    }
    Ok((width, height))
}

fn check_model(model: &str, plan: &PlanRules, catalog: &[String]) -> Result<(), CoreError> {
    if !catalog.is_empty() && !catalog.iter().any(|m| m == model) {
        return Err(CoreError::ModelNotFound(model.to_string()));
    }
    if !plan.allows_model(model) {
        return Err(CoreError::InvalidParams(format!(
            "Model {model} is not available on this plan"
        )));
    }
    Ok(())
}

fn parse_timeout(raw: &Value) -> Result<u32, CoreError> {
    let timeout = u32_field(raw, "timeout_seconds")?.unwrap_or(DEFAULT_TIMEOUT_SECS);
    require_range("timeout_seconds", timeout, (1, MAX_TIMEOUT_SECS))?;
    Ok(timeout)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn free_plan() -> PlanRules {
        PlanRules {
            max_resolution: 1024,
            allowed_models: vec!["sdxl".into(), "flux-schnell".into()],
        }
    }

    fn catalog() -> Vec<String> {
        vec!["sdxl".into(), "flux-schnell".into(), "wan".into()]
    }

    fn image_raw() -> serde_json::Value {
        json!({
            "prompt": "a sunset",
            "resolution": "1024x1024",
            "steps": 20,
            "model": "sdxl",
        })
    }

    // -- Image happy path ---------------------------------------------------

    #[test]
    fn valid_image_params_parse() {
        let params = validate(Capability::Image, &image_raw(), &free_plan(), &catalog()).unwrap();
        let JobParams::Image(img) = params else {
            panic!("expected image params");
        };
        assert_eq!(img.width, 1024);
        assert_eq!(img.height, 1024);
        assert_eq!(img.steps, 20);
        assert_eq!(img.model, "sdxl");
        assert_eq!(img.timeout_seconds, DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn image_at_exact_plan_resolution_is_accepted() {
        let raw = json!({"prompt": "p", "resolution": "1024x1024", "model": "sdxl"});
        assert!(validate(Capability::Image, &raw, &free_plan(), &catalog()).is_ok());
    }

    // -- Image boundaries ---------------------------------------------------

    #[test]
    fn one_pixel_over_plan_resolution_is_rejected() {
        let raw = json!({"prompt": "p", "resolution": "1025x1024", "model": "sdxl"});
        let err = validate(Capability::Image, &raw, &free_plan(), &catalog()).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");
    }

    #[test]
    fn steps_out_of_range_is_rejected() {
        for steps in [0u32, 101] {
            let raw = json!({"prompt": "p", "steps": steps, "model": "sdxl"});
            let err = validate(Capability::Image, &raw, &free_plan(), &catalog()).unwrap_err();
            assert_eq!(err.code(), "INVALID_PARAMS");
        }
    }

    #[test]
    fn malformed_resolution_is_rejected() {
        for bad in ["1024", "x1024", "1024x", "0x1024", "ax b"] {
            let raw = json!({"prompt": "p", "resolution": bad, "model": "sdxl"});
            assert!(validate(Capability::Image, &raw, &free_plan(), &catalog()).is_err());
        }
    }

    // -- Models -------------------------------------------------------------

    #[test]
    fn model_outside_plan_is_invalid_params() {
        // "wan" exists in the catalog but the free plan does not allow it.
        let raw = json!({"prompt": "p", "model": "wan"});
        let err = validate(Capability::Image, &raw, &free_plan(), &catalog()).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");
    }

    #[test]
    fn unknown_model_is_model_not_found() {
        let raw = json!({"prompt": "p", "model": "does-not-exist"});
        let err = validate(Capability::Image, &raw, &free_plan(), &catalog()).unwrap_err();
        assert_eq!(err.code(), "MODEL_NOT_FOUND");
    }

    #[test]
    fn wildcard_plan_allows_any_catalog_model() {
        let plan = PlanRules {
            max_resolution: 4096,
            allowed_models: vec!["*".into()],
        };
        let raw = json!({"prompt": "p", "model": "wan"});
        assert!(validate(Capability::Image, &raw, &plan, &catalog()).is_ok());
    }

    #[test]
    fn empty_catalog_skips_unknown_model_check() {
        let raw = json!({"prompt": "p", "model": "sdxl"});
        assert!(validate(Capability::Image, &raw, &free_plan(), &[]).is_ok());
    }

    // -- Prompt rules -------------------------------------------------------

    #[test]
    fn empty_prompt_is_rejected() {
        let raw = json!({"prompt": "   ", "model": "sdxl"});
        let err = validate(Capability::Image, &raw, &free_plan(), &catalog()).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");
    }

    #[test]
    fn oversized_prompt_is_rejected() {
        let raw = json!({"prompt": "x".repeat(MAX_PROMPT_CHARS + 1), "model": "sdxl"});
        let err = validate(Capability::Image, &raw, &free_plan(), &catalog()).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");
    }

    #[test]
    fn control_characters_are_a_policy_rejection() {
        let raw = json!({"prompt": "a\u{0000}b", "model": "sdxl"});
        let err = validate(Capability::Image, &raw, &free_plan(), &catalog()).unwrap_err();
        assert_eq!(err.code(), "INVALID_PROMPT");
    }

    // -- Video --------------------------------------------------------------

    #[test]
    fn valid_video_params_parse() {
        let plan = PlanRules {
            max_resolution: 1920,
            allowed_models: vec!["*".into()],
        };
        let raw = json!({"prompt": "p", "duration": 10, "fps": 24, "resolution": "1080p", "model": "wan"});
        let JobParams::Video(v) = validate(Capability::Video, &raw, &plan, &catalog()).unwrap()
        else {
            panic!("expected video params");
        };
        assert_eq!(v.duration_seconds, 10);
        assert_eq!(v.resolution, VideoResolution::P1080);
    }

    #[test]
    fn video_duration_out_of_range_is_rejected() {
        for duration in [0u32, 31] {
            let raw = json!({"prompt": "p", "duration": duration, "model": "sdxl"});
            assert!(validate(Capability::Video, &raw, &free_plan(), &catalog()).is_err());
        }
    }

    #[test]
    fn video_fps_out_of_range_is_rejected() {
        for fps in [7u32, 61] {
            let raw = json!({"prompt": "p", "duration": 5, "fps": fps, "model": "sdxl"});
            assert!(validate(Capability::Video, &raw, &free_plan(), &catalog()).is_err());
        }
    }

    #[test]
    fn video_preset_above_plan_resolution_is_rejected() {
        // Free plan caps at 1024 px; 720p frames are 1280 wide.
        let raw = json!({"prompt": "p", "duration": 5, "resolution": "720p", "model": "sdxl"});
        let err = validate(Capability::Video, &raw, &free_plan(), &catalog()).unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");
    }

    // -- Text ---------------------------------------------------------------

    #[test]
    fn text_max_tokens_bounds() {
        let ok = json!({"prompt": "p", "max_tokens": 4096});
        assert!(validate(Capability::Text, &ok, &free_plan(), &[]).is_ok());

        let too_big = json!({"prompt": "p", "max_tokens": 4097});
        assert!(validate(Capability::Text, &too_big, &free_plan(), &[]).is_err());
    }

    // -- Audio --------------------------------------------------------------

    #[test]
    fn audio_unknown_voice_is_rejected() {
        let raw = json!({"prompt": "p", "voice": "robot9000"});
        assert!(validate(Capability::Audio, &raw, &free_plan(), &[]).is_err());
    }

    #[test]
    fn audio_defaults_are_applied() {
        let raw = json!({"prompt": "hello"});
        let JobParams::Audio(a) = validate(Capability::Audio, &raw, &free_plan(), &[]).unwrap()
        else {
            panic!("expected audio params");
        };
        assert_eq!(a.voice, ALLOWED_VOICES[0]);
        assert_eq!(a.duration_seconds, 30);
    }

    // -- Timeouts -----------------------------------------------------------

    #[test]
    fn timeout_above_maximum_is_rejected() {
        let raw = json!({"prompt": "p", "model": "sdxl", "timeout_seconds": 601});
        assert!(validate(Capability::Image, &raw, &free_plan(), &catalog()).is_err());
    }

    // -- Cost delegation ----------------------------------------------------

    #[test]
    fn happy_path_image_costs_one_token() {
        let params = validate(Capability::Image, &image_raw(), &free_plan(), &catalog()).unwrap();
        assert_eq!(params.cost().to_string(), "1.00");
    }

    #[test]
    fn engine_follows_capability() {
        let params = validate(Capability::Image, &image_raw(), &free_plan(), &catalog()).unwrap();
        assert_eq!(params.engine(), "comfyui");
    }
}
