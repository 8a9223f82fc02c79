//! Prompts sent to vision language models.
//!
//! Two stages talk to a VLM: the `vlm` OCR engine, which transcribes a whole
//! page raster, and the picture-description enricher. Keeping both prompts
//! here lets tests inspect them without a provider.

/// System prompt for transcribing one page raster to Markdown.
pub const PAGE_TRANSCRIPTION_PROMPT: &str = r#"You are an OCR engine. Transcribe the page image to Markdown.

Rules:

1. TEXT
   - Transcribe ALL visible text exactly, in natural reading order
   - Do not summarise, translate or correct wording

2. STRUCTURE
   - Use # / ## / ### for headings by visual prominence
   - Use - for bullet lists and 1. 2. 3. for numbered lists
   - Render tables as GFM pipe tables with a header separator row

3. CODE AND FORMULAS
   - Wrap code listings in triple backticks
   - Render display equations as $$...$$ on their own lines

4. IGNORE
   - Page numbers, running headers and footers
   - Decorative rules and borders

5. OUTPUT
   - Output ONLY the Markdown
   - Do NOT wrap the answer in ```markdown fences
   - Do NOT describe images; skip them
   - If the page has no text, output nothing"#;

/// System prompt for the picture-description enricher.
pub const PICTURE_DESCRIPTION_PROMPT: &str = r#"Describe the image in one or two plain sentences for a reader who cannot see it.
Mention chart types, axis labels or visible text when present.
Output only the description, without any preamble or Markdown."#;
