use serde::Serialize;

use crate::models::job::{Region, Scenario, ViewType};

pub const DEFAULT_INFERENCE_STEPS: u32 = 30;
pub const DEFAULT_GUIDANCE_SCALE: f32 = 7.5;

const PREAMBLE: &str = "high quality medical photography, anatomically accurate human body, \
    natural lighting, realistic skin texture and detail";

const IDENTITY_SUFFIX: &str = "professional medical documentation style, \
    preserve body identity strictly, maintain exact silhouette and pose, \
    photorealistic result, natural appearance";

const NEGATIVE_PROMPT: &str = "deformed body, distorted proportions, unrealistic anatomy, \
    artificial appearance, cartoon, anime style, oversaturated colors, low quality, blurry, grainy, \
    multiple people, extra limbs, cropped body parts, incomplete body, inappropriate content, nudity, \
    overprocessed, fake looking, plastic appearance, bad anatomy, poorly drawn, awkward pose, \
    wrong proportions, text, watermark, signature";

/// Generation parameters for one view of one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptConfig {
    pub prompt: String,
    pub negative_prompt: String,
    /// img2img strength: how far the output may drift from the input photo.
    pub strength: f32,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
}

fn scenario_description(scenario: Scenario) -> (&'static str, f32) {
    match scenario {
        Scenario::ProjectionLevel1 => (
            "very subtle gluteal projection enhancement, minimal volume increase, \
             natural and conservative aesthetic result",
            0.35,
        ),
        Scenario::ProjectionLevel2 => (
            "moderate glute and hip projection, balanced enhancement, \
             realistic and proportional result",
            0.50,
        ),
        Scenario::ProjectionLevel3 => (
            "stronger glute projection while maintaining anatomical realism, \
             smooth contours, natural appearance",
            0.65,
        ),
    }
}

fn view_description(view: ViewType) -> &'static str {
    match view {
        ViewType::Rear => "posterior view, back angle, full body rear view, emphasize gluteal region",
        ViewType::Side => {
            "lateral profile view, side angle, emphasize posterior projection visible from side profile"
        }
    }
}

fn region_focus(region: Region) -> &'static str {
    match region {
        Region::Gluteal => "focus on the gluteal region",
    }
}

/// Collapse runs of whitespace into single spaces.
fn squash(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn build_prompt(region: Region, scenario: Scenario, view: ViewType, message: Option<&str>) -> PromptConfig {
    let (description, strength) = scenario_description(scenario);

    let mut prompt = format!(
        "{PREAMBLE}, {description}, {}, {}, {IDENTITY_SUFFIX}",
        view_description(view),
        region_focus(region),
    );
    if let Some(extra) = message.map(str::trim).filter(|m| !m.is_empty()) {
        prompt.push_str(", ");
        prompt.push_str(extra);
    }

    PromptConfig {
        prompt: squash(&prompt),
        negative_prompt: squash(NEGATIVE_PROMPT),
        strength,
        num_inference_steps: DEFAULT_INFERENCE_STEPS,
        guidance_scale: DEFAULT_GUIDANCE_SCALE,
    }
}
