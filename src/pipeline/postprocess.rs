//! Post-processing: turn a raw VLM reply into validated detections.
//!
//! Even well-prompted models wrap JSON in code fences, prepend a sentence,
//! return numbers as integers, or give boxes with swapped corners. Each rule
//! below is deterministic and independently testable.
//!
//! ## Rule Order
//!
//! 1. Strip outer code fences
//! 2. Extract the first JSON array from the reply
//! 3. Decode elements leniently (`number` may be a string or an integer)
//! 4. Keep only the digits of the label; skip labels with none
//! 5. Undo the encode-time downscale, normalise corner order, clamp to the raster
//! 6. Drop boxes that enclose no pixels

use crate::model::{BBox, Detection};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

/// Parse a VLM reply into detections in raster pixel space.
///
/// `scale` is the factor applied by [`super::encode::encode_page`];
/// `width`/`height` are the full raster dimensions.
pub fn parse_detections(
    raw: &str,
    scale: f32,
    width: u32,
    height: u32,
) -> Result<Vec<Detection>, String> {
    let s = strip_code_fences(raw);
    let array = extract_json_array(&s).ok_or_else(|| {
        format!(
            "reply contains no JSON array: {:?}",
            s.chars().take(80).collect::<String>()
        )
    })?;

    let items: Vec<RawDetection> =
        serde_json::from_str(array).map_err(|e| format!("malformed detection JSON: {e}"))?;

    Ok(items
        .into_iter()
        .filter_map(|item| {
            let number = normalise_number(&item.number)?;
            let bbox = to_raster_bbox(item.bbox, scale, width, height)?;
            Some(Detection {
                balloon_number: number,
                bbox,
            })
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct RawDetection {
    #[serde(alias = "balloon_number", alias = "label")]
    number: serde_json::Value,
    bbox: [f64; 4],
}

// ── Rule 1: Strip outer code fences ──────────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[a-zA-Z]*\n(.*)\n```\s*$").unwrap());

fn strip_code_fences(input: &str) -> String {
    let trimmed = input.trim();
    if let Some(caps) = RE_OUTER_FENCES.captures(trimmed) {
        caps[1].to_string()
    } else {
        trimmed.to_string()
    }
}

// ── Rule 2: Extract the first JSON array ─────────────────────────────────────

/// Slice from the first `[` to its matching `]`, skipping brackets inside strings.
fn extract_json_array(input: &str) -> Option<&str> {
    let start = input.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in input[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&input[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Rule 4: Label digits ─────────────────────────────────────────────────────

/// `"No. 012"` → `"12"`, `7` → `"7"`, `12.0` → `"12"`, `"?"` → `None`.
fn normalise_number(value: &serde_json::Value) -> Option<String> {
    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => match (n.as_u64(), n.as_f64()) {
            (Some(u), _) => u.to_string(),
            (None, Some(f)) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 => format!("{f:.0}"),
            _ => return None,
        },
        _ => return None,
    };
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let trimmed = digits.trim_start_matches('0');
    Some(if trimmed.is_empty() { "0".to_string() } else { trimmed.to_string() })
}

// ── Rules 5–6: Raster-space box ──────────────────────────────────────────────

fn to_raster_bbox(raw: [f64; 4], scale: f32, width: u32, height: u32) -> Option<BBox> {
    if raw.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let scale = if scale > 0.0 { scale as f64 } else { 1.0 };
    let unscale = |v: f64, max: u32| ((v / scale).round().max(0.0) as u32).min(max);

    let (xa, xb) = (unscale(raw[0], width), unscale(raw[2], width));
    let (ya, yb) = (unscale(raw[1], height), unscale(raw[3], height));
    let bbox = BBox::new(xa.min(xb), ya.min(yb), xa.max(xb), ya.max(yb));

    (!bbox.is_empty()).then_some(bbox)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_array() {
        let d = parse_detections(r#"[{"number":"12","bbox":[10,20,30,40]}]"#, 1.0, 100, 100).unwrap();
        assert_eq!(
            d,
            vec![Detection {
                balloon_number: "12".into(),
                bbox: BBox::new(10, 20, 30, 40)
            }]
        );
    }

    #[test]
    fn fenced_reply_with_integer_numbers() {
        let raw = "```json\n[{\"number\": 7, \"bbox\": [1, 2, 3, 4]}]\n```";
        let d = parse_detections(raw, 1.0, 100, 100).unwrap();
        assert_eq!(d[0].balloon_number, "7");
    }

    #[test]
    fn prose_around_array_and_brackets_in_strings() {
        let raw = r#"Here you go: [{"number":"[5]","bbox":[0,0,9,9]}] hope this helps"#;
        let d = parse_detections(raw, 1.0, 100, 100).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].balloon_number, "5");
    }

    #[test]
    fn empty_array_is_no_balloons() {
        assert!(parse_detections("[]", 1.0, 10, 10).unwrap().is_empty());
    }

    #[test]
    fn no_array_is_an_error() {
        assert!(parse_detections("I could not see any circles.", 1.0, 10, 10).is_err());
        assert!(parse_detections("[{\"number\":", 1.0, 10, 10).is_err());
    }

    #[test]
    fn illegible_and_degenerate_entries_are_dropped() {
        let raw = r#"[
            {"number":"?","bbox":[0,0,5,5]},
            {"number":"3","bbox":[5,5,5,9]},
            {"number":"4","bbox":[1,1,2,2]}
        ]"#;
        let d = parse_detections(raw, 1.0, 10, 10).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].balloon_number, "4");
    }

    #[test]
    fn integral_float_numbers_keep_their_value() {
        let raw = r#"[
            {"number":12.0,"bbox":[0,0,2,2]},
            {"number":3.5,"bbox":[0,0,2,2]},
            {"number":-4,"bbox":[0,0,2,2]}
        ]"#;
        let d = parse_detections(raw, 1.0, 10, 10).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].balloon_number, "12");
    }

    #[test]
    fn leading_zeros_are_trimmed() {
        let raw = r#"[{"label":"007","bbox":[0,0,2,2]},{"balloon_number":"00","bbox":[0,0,2,2]}]"#;
        let d = parse_detections(raw, 1.0, 10, 10).unwrap();
        assert_eq!(d[0].balloon_number, "7");
        assert_eq!(d[1].balloon_number, "0");
    }

    #[test]
    fn scale_is_undone_and_boxes_clamped() {
        // Sent at half size: coordinates double back in raster space.
        let raw = r#"[{"number":"1","bbox":[10,10,20,20]},{"number":"2","bbox":[40,40,90,90]}]"#;
        let d = parse_detections(raw, 0.5, 100, 100).unwrap();
        assert_eq!(d[0].bbox, BBox::new(20, 20, 40, 40));
        assert_eq!(d[1].bbox, BBox::new(80, 80, 100, 100));
    }

    #[test]
    fn swapped_corners_are_normalised() {
        let raw = r#"[{"number":"9","bbox":[30,40,10,20]}]"#;
        let d = parse_detections(raw, 1.0, 100, 100).unwrap();
        assert_eq!(d[0].bbox, BBox::new(10, 20, 30, 40));
    }
}
