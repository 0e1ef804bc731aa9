const ANALYSIS_INSTRUCTION: &str = "Analyze this pet image in detail. Please provide:
1. Pet type (dog, cat, etc.)
2. Specific breed or breed characteristics
3. Physical features (color, fur type/texture, size, distinctive markings)
4. Body posture and stance (sitting, standing, lying down, running, etc.)
5. Facial expression and mood
6. Fur condition (fluffy, wet, groomed, messy, etc.)
7. Any distinctive accessories or features
8. Overall appearance and notable characteristics

Please be very specific and detailed in your analysis.";

const ANALYSIS_REQUIREMENTS: &str = "CRITICAL REQUIREMENTS:
- The breed, coloring, and markings MUST match the analysis exactly
- The pose and body position MUST be the same as described
- The fur texture and condition (wet/dry/fluffy) MUST be accurate
- Any distinctive features or accessories MUST be included
- Facial expression MUST match the analysis";

const PHOTO_REQUIREMENTS: &str = "CRITICAL REQUIREMENTS:
- The breed, coloring, and markings MUST match the photo exactly
- The pose and body position MUST be the same as in the photo
- The fur texture and condition (wet/dry/fluffy) MUST be accurate
- Any distinctive features or accessories MUST be included
- Facial expression MUST match the photo";

const STYLE_REQUIREMENTS: &str = "Style requirements:
- Cute, stylized, Pixar-like 3D cartoon style
- Large round expressive eyes
- Soft shading and smooth, glossy texture
- Slightly exaggerated proportions for cuteness (larger head, shorter limbs)
- Soft studio lighting with subtle reflections on eyes and nose
- Transparent or white background suitable for sticker use
- Professional toy/mascot quality rendering";

const CLOSING: &str = "The character should look like a high-quality toy design while PERFECTLY preserving ALL distinctive features from the real pet.";

pub fn analysis_prompt() -> &'static str {
    ANALYSIS_INSTRUCTION
}

/// Builds the image-generation brief.
///
/// Blank `analysis` or `instructions` count as absent.
pub fn generation_prompt(analysis: Option<&str>, instructions: Option<&str>) -> String {
    let analysis = non_blank(analysis);
    let instructions = non_blank(instructions);

    let mut sections: Vec<String> = Vec::new();
    match analysis {
        Some(text) => {
            sections.push(format!(
                "Create a 3D-style cartoon character that EXACTLY matches this pet analysis:\n\n{text}"
            ));
            sections.push(ANALYSIS_REQUIREMENTS.to_string());
        }
        None => {
            sections.push(
                "Create a 3D-style cartoon character of the pet in the attached photo.".to_string(),
            );
            sections.push(PHOTO_REQUIREMENTS.to_string());
        }
    }
    if let Some(text) = instructions {
        sections.push(format!("ADDITIONAL USER INSTRUCTIONS:\n{text}"));
    }
    sections.push(STYLE_REQUIREMENTS.to_string());
    sections.push(CLOSING.to_string());
    sections.join("\n\n")
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|text| !text.is_empty())
}
