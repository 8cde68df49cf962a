//! Prompt templates for the vision backend.
//!
//! The comparison weighting (helmet 30%, boots 25%, clothing pattern 25%,
//! clothing color 15%, equipment brands 5%) is documented here and in the
//! prompt text; the public contract is only the [0,1] score.

/// Canonical description of the single primary subject. Used when
/// ingesting a roster reference image.
pub const DESCRIBE_FACE_PROMPT: &str = r#"Analyze this image and provide a detailed description of the clothing and gear worn by the most prominent person.

Focus on, in order of importance:

1. BIB NUMBER: record the racing bib number ONLY if every digit is completely clear and unambiguous. If blurry, partially obscured, at a bad angle, or in any doubt, omit it. A wrong bib number is worse than none.
2. HELMET/HEADGEAR: brand, base colors (be specific: metallic blue, matte black, fluorescent yellow), patterns and graphics, goggle lens color (clear, tinted, mirrored, orange, blue), goggle strap color and pattern.
3. SKI BOOTS: brand, primary and accent colors, racing design features.
4. CLOTHING PATTERNS: stripes, graphics, logos, geometric, racing designs, solid.
5. CLOTHING COLORS: primary, secondary, and accent colors; color blocking.
6. OTHER EQUIPMENT BRANDS: skis, poles, suit logos, as supporting detail.

Do NOT describe faces or facial features.

Reply with a single detailed paragraph."#;

/// Enumerate every distinguishable subject and emit structured detections.
pub const DETECT_SUBJECTS_PROMPT: &str = r#"Identify all people visible in this image and describe their gear and clothing.

For the bib_number field: record it ONLY if you can read ALL digits with complete certainty. If any digit is blurry, obscured, at an extreme angle, or in any doubt, use null. A wrong bib number is worse than no bib number.

Describe, in priority order: helmet brand, helmet colors and patterns, goggle lens color, goggle strap color, boot brand and colors, clothing patterns, clothing colors, and any readable equipment brands. Do NOT describe faces or facial features.

Format your response as a JSON array with this structure:
[
  {
    "position": "where the person sits in the frame",
    "outfit_description": "detailed gear description",
    "bib_number": "123" or null,
    "helmet_brand": "BRAND" or null,
    "helmet_colors": ["color", ...],
    "goggle_lens_color": "color" or null,
    "goggle_strap_color": "color" or null,
    "boot_brand": "BRAND" or null,
    "boot_colors": ["color", ...],
    "clothing_patterns": ["pattern", ...],
    "clothing_colors": ["color", ...],
    "equipment_brands": ["BRAND", ...]
  }
]

If no people are visible, return [].

Return ONLY the JSON, with no additional text or markdown formatting."#;

/// Compare two gear descriptions; `{description1}` / `{description2}` are
/// substituted before sending.
pub const COMPARE_DESCRIPTIONS_PROMPT: &str = r#"Compare these two gear descriptions and determine how similar they are.

Description 1:
{description1}

Description 2:
{description2}

Do NOT use bib numbers for matching; even if both descriptions carry one, ignore them. Judge visual appearance only.

Weigh the evidence as follows:
1. Helmet including goggle lens and strap: 30%. Same brand, base colors, and goggle colors is a very strong match; a different helmet is a significant reduction.
2. Ski boots (brand and colors): 25%. Boots are highly visible and often distinctive.
3. Clothing pattern: 25%. Stripes vs graphics vs solid; two solids count as a pattern match.
4. Clothing color: 15%. Primary colors and color blocking.
5. Other equipment brands: 5%. Supporting evidence only.

Scoring guide:
- 0.9-1.0 nearly identical
- 0.7-0.9 very similar
- 0.5-0.7 moderately similar
- 0.3-0.5 somewhat similar
- 0.0-0.3 very different

Be lenient; err toward higher scores to enable clustering.

Return your analysis as JSON with this exact structure:
{"similarity": 0.0, "reasoning": "brief explanation"}

Return ONLY the JSON, with no additional text or markdown formatting."#;

/// Substitutes the two descriptions into the comparison prompt.
pub fn comparison_prompt(a: &str, b: &str) -> String {
    COMPARE_DESCRIPTIONS_PROMPT
        .replace("{description1}", a)
        .replace("{description2}", b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_prompt_substitution() {
        let prompt = comparison_prompt("white helmet", "blue helmet");
        assert!(prompt.contains("white helmet"));
        assert!(prompt.contains("blue helmet"));
        assert!(!prompt.contains("{description1}"));
        assert!(!prompt.contains("{description2}"));
    }
}
