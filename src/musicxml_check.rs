//! Cheap structural checks for MusicXML text from untrusted sources.

use roxmltree::{Document, ParsingOptions};

/// Documents larger than this are refused outright.
pub const MAX_MUSICXML_BYTES: usize = 2 * 1024 * 1024;

const ROOTS: [&str; 2] = ["score-partwise", "score-timewise"];

fn parse(xml: &str) -> Result<Document<'_>, roxmltree::Error> {
    let opts = ParsingOptions { allow_dtd: true, ..ParsingOptions::default() };
    Document::parse_with_options(xml, opts)
}

/// XML declaration first, a partwise or timewise root, at most 2 MiB, and
/// well-formed.
pub fn is_likely_musicxml(text: &str) -> bool {
    let trimmed = text.trim_start();
    if !trimmed.starts_with("<?xml") || trimmed.len() > MAX_MUSICXML_BYTES {
        return false;
    }
    match parse(trimmed) {
        Ok(doc) => ROOTS.contains(&doc.root_element().tag_name().name()),
        Err(err) => {
            tracing::debug!(%err, "musicxml candidate is not well-formed");
            false
        }
    }
}

/// Cut a MusicXML document out of surrounding prose or markdown fences:
/// from `<?xml` through the closing root tag.
pub fn try_extract_musicxml(text: &str) -> Option<String> {
    let unfenced = strip_fences(text);
    let start = unfenced.find("<?xml")?;
    let body = &unfenced[start..];
    ROOTS.iter().find_map(|root| {
        let close = format!("</{root}>");
        body.rfind(&close)
            .map(|end| body[..end + close.len()].to_string())
    })
}

fn strip_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Part ids in `<part-list>` order and in `<part>` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartAlignment {
    pub listed: Vec<String>,
    pub parts: Vec<String>,
}

impl PartAlignment {
    pub fn is_aligned(&self) -> bool {
        self.listed == self.parts
    }
}

/// Compare the part-list with the parts. `None` when the text does not parse.
pub fn verify_part_alignment(xml: &str) -> Option<PartAlignment> {
    let doc = parse(xml).ok()?;
    let root = doc.root_element();
    let ids = |tag: &str| -> Vec<String> {
        root.descendants()
            .filter(|n| n.has_tag_name(tag))
            .filter_map(|n| n.attribute("id").map(str::to_string))
            .collect()
    };
    Some(PartAlignment { listed: ids("score-part"), parts: ids("part") })
}
