// src/prompts.rs
//! Prompt text for each stage. Wording is tunable; structure is not.

use crate::models::{
    AspectRatio, ColorPalette, ContentContext, FontStyle, GenerationStyle, ThumbnailMetadata,
};

/// Article text beyond this many characters is dropped before prompting.
pub const ARTICLE_CHAR_LIMIT: usize = 4000;

/// Cuts `text` to at most `limit` characters on a char boundary.
pub fn truncate_chars(text: &str, limit: usize) -> (&str, bool) {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}

pub fn context_block(context: &ContentContext) -> String {
    match context {
        ContentContext::Article { content } => {
            let (prefix, truncated) = truncate_chars(content, ARTICLE_CHAR_LIMIT);
            let ellipsis = if truncated { "..." } else { "" };
            format!("Content: \"\"\"{}{}\"\"\"", prefix, ellipsis)
        }
        ContentContext::Headline { title, subtitle } => {
            format!("Title: \"{}\", Subtitle: \"{}\"", title, subtitle)
        }
    }
}

pub fn ideation_prompt(context: &ContentContext, style: GenerationStyle) -> String {
    format!(
        r#"You are a professional visual content strategist.

Context: {context}
Style: {style}.

Task: Create a visual design strategy for a high-engagement thumbnail.
1. 'visual_hooks': 3 specific elements to make the image remarkable.
2. 'visual_description': The subject's pose and expression.
3. 'clickbait_text': Impactful headline text (2-3 words).
4. 'props': 2-3 supporting objects.
5. 'background_context': Description of the setting and lighting.

Write 'clickbait_text' in the same language as the context above.

Respond ONLY with JSON:
{{
  "visual_hooks": ["...", "...", "..."],
  "visual_description": "...",
  "clickbait_text": "...",
  "props": ["..."],
  "background_context": "..."
}}"#,
        context = context_block(context),
        style = style.label(),
    )
}

pub fn sketch_prompt(metadata: &ThumbnailMetadata, aspect_ratio: AspectRatio) -> String {
    format!(
        r#"Please create a compositional layout for a thumbnail.

The individual from the reference photo (IMAGE 1) should be the central figure in this pose: {pose}.

Layout Details:
- Use the actual head and face of the person from IMAGE 1, rendered realistically in the layout.
- Render the rest of the scene as a clean, simple black-and-white ink sketch.
- Include clear outlines for: {hooks}.
- Supporting props: {props}.
- Set the scene in: {background}.

The goal is a clear blueprint showing where every element is placed.

Aspect Ratio: {aspect_ratio}"#,
        pose = metadata.visual_description,
        hooks = metadata.visual_hooks.join(", "),
        props = metadata.props.join(", "),
        background = metadata.background_context,
    )
}

pub fn refine_prompt(
    metadata: &ThumbnailMetadata,
    style: GenerationStyle,
    palette: Option<&ColorPalette>,
    font: FontStyle,
    brand_asset_count: usize,
) -> String {
    let palette_instruction = match palette {
        Some(p) => format!(
            "Use a color scheme inspired by {} ({}).",
            p.name,
            p.colors.join(", ")
        ),
        None => "Use vibrant, high-contrast, attention-grabbing colors.".to_string(),
    };

    let realism = if style.is_illustrated() {
        "- REALISM: Keep the face recognisable while matching the illustrated style."
    } else {
        "- REALISM: The person must look like a 100% real human, not an illustration."
    };

    let hyper = if style == GenerationStyle::HyperRealistic {
        "\nHYPER-REALISM MODE: Both the human and the environment MUST be indistinguishable from reality, using master-level photographic clarity.\n"
    } else {
        ""
    };

    let brand = match brand_asset_count {
        0 => String::new(),
        n => format!(
            "\n5. Brand assets: Integrate the {} logo/prop image(s) that follow IMAGE 2 naturally into the scene.",
            n
        ),
    };

    format!(
        r#"Produce a high-end professional thumbnail following the layout in IMAGE 1.

CRITICAL IDENTITY REQUIREMENT:
The subject MUST be the exact individual from IMAGE 2.
- 100% LIKENESS: Transfer every unique facial feature, nose shape, eyes, and bone structure from IMAGE 2.
- COLORIZATION: If IMAGE 2 is black and white, you MUST realistically colorize the face to match a natural human skin tone integrated with the scene's lighting.
{realism}
{hyper}
Specs:
1. Composition: Follow IMAGE 1 precisely.
2. Scene: Detailed {background} with {hooks}.
3. Text: Overlay "{text}" in bold {font}.
4. Style: {style_prompt} {palette_instruction}{brand}

Integrate the person from IMAGE 2 into this world with flawless photographic blending."#,
        background = metadata.background_context,
        hooks = metadata.visual_hooks.join(", "),
        text = metadata.clickbait_text,
        font = font.label(),
        style_prompt = style.prompt_fragment(),
    )
}

pub fn critique_prompt(metadata: &ThumbnailMetadata, style: GenerationStyle) -> String {
    format!(
        r#"Perform a CRITICAL REFLECTION and SELF-CORRECTION on the finished thumbnail (IMAGE 1).

Compare IMAGE 1 (The Finished Thumbnail) to IMAGE 2 (The Original Identity Reference).

Critique Tasks:
1. IDENTITY FIDELITY: Does the subject in IMAGE 1 look exactly like the person in IMAGE 2? Correct any deviations in facial structure, features, or likeness.
2. COLORIZATION CHECK: If IMAGE 2 was black and white, ensure the face in the final result is realistically colorized and skin-toned to match a high-end photograph.
3. REALISM: Remove any artificial-looking artifacts or smoothing. Target finish: {style_prompt}
4. TEXTURE: Add micro-details to the skin, hair, and clothing.

Final Instruction:
Generate the corrected final version of the thumbnail. Maintain the exact composition of IMAGE 1 and keep the overlay text "{text}" unchanged, but fix the face to be a faithful replica of the person in IMAGE 2."#,
        style_prompt = style.prompt_fragment(),
        text = metadata.clickbait_text,
    )
}
