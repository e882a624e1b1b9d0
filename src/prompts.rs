//! Prompts for VLM-based balloon reading.
//!
//! Kept in one place so the reply contract that [`crate::pipeline::postprocess`]
//! parses and the instructions that produce it cannot drift apart. Callers can
//! override the system prompt via [`crate::config::EngineConfig::system_prompt`];
//! the override must keep the same JSON reply shape.

/// Default system prompt for reading balloon callouts off a GA drawing page.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an inspection assistant reading general-arrangement (GA) engineering drawings.

A "balloon" is a small circle containing a numeral. Each balloon is a callout
that refers to an item number (FIND NUMBER) in the bill of materials.

Rules:
1. Report EVERY balloon on the page, including repeated numbers.
2. Read only the numeral inside the circle. Ignore leader lines, dimensions,
   revision triangles, title-block text, and grid references.
3. Give each balloon's bounding box in pixel coordinates of the image you
   receive: [x1, y1, x2, y2] with (x1, y1) the top-left corner.
4. If a numeral is illegible, skip that balloon.

Output format:
- Reply with ONLY a JSON array, no prose and no code fences.
- Each element: {"number": "12", "bbox": [x1, y1, x2, y2]}
- If the page has no balloons reply with []"#;

/// Per-page user instruction carrying the dimensions of the image sent.
pub fn page_instruction(page: usize, width: u32, height: u32) -> String {
    format!(
        "Page {page}. The image is {width}x{height} pixels. List every balloon as JSON."
    )
}
