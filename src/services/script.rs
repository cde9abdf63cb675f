use std::fmt;

/// Longest chunk sent to the speech model in one request, in characters.
pub const MAX_CHUNK_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakerTag {
    Narrator,
    Character,
}

impl SpeakerTag {
    pub const ALL: [SpeakerTag; 2] = [SpeakerTag::Narrator, SpeakerTag::Character];

    /// Speaker name as the speech model expects it.
    pub fn speaker(&self) -> &'static str {
        match self {
            SpeakerTag::Narrator => "NARRATOR",
            SpeakerTag::Character => "CHAR",
        }
    }

    /// Line prefix in a cleaned script.
    pub fn marker(&self) -> &'static str {
        match self {
            SpeakerTag::Narrator => "NARRATOR:",
            SpeakerTag::Character => "CHAR:",
        }
    }
}

impl fmt::Display for SpeakerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.speaker())
    }
}

/// Builds the single "radio script" rewrite request for a chapter.
pub struct RadioScriptGenerator {
    host_name: String,
}

impl RadioScriptGenerator {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
        }
    }

    pub fn get_system_prompt(&self) -> String {
        "You are a professional radio-drama script adapter.".to_string()
    }

    pub fn generate_prompt(&self, text: &str, chapter_title: &str, atmosphere: &str) -> String {
        format!(
            "You are a radio script editor. Turn the following story text into a smooth read-aloud \
            script for the whole chapter \"{title}\".\n\
            Rules:\n\
            - Narration lines: NARRATOR: [content]\n\
            - Dialogue lines: CHAR: [content]\n\
            - Remove dialogue attributions such as \"he said\" or \"she replied\".\n\
            - Open with host {host} welcoming listeners to the chapter \"{title}\".\n\
            - Close with host {host} wishing listeners a good night.\n\
            - Atmosphere: {atmosphere}.\n\
            - Keep the language of the original text.\n\
            \n\
            Text: {text}",
            title = chapter_title,
            host = self.host_name,
            atmosphere = atmosphere,
            text = text,
        )
    }

    /// The cleaned script, or `original` when the model returned nothing.
    pub fn parse_response(&self, response: &str, original: &str) -> String {
        let script = strip_code_blocks(response);
        if script.is_empty() {
            original.to_string()
        } else {
            script
        }
    }
}

pub fn strip_code_blocks(s: &str) -> String {
    let s = s.trim();
    if s.starts_with("```json") {
        s.trim_start_matches("```json").trim_end_matches("```").trim().to_string()
    } else if s.starts_with("```") {
        s.trim_start_matches("```").trim_end_matches("```").trim().to_string()
    } else {
        s.to_string()
    }
}

/// Byte offsets at which a speaker marker starts.
fn tag_boundaries(script: &str) -> Vec<usize> {
    let mut starts: Vec<usize> = SpeakerTag::ALL
        .iter()
        .flat_map(|tag| script.match_indices(tag.marker()).map(|(i, _)| i))
        .collect();
    starts.sort_unstable();
    starts.dedup();
    starts
}

/// Splits `script` right before every speaker marker. Text ahead of the first
/// marker becomes its own segment.
pub fn split_segments(script: &str) -> Vec<&str> {
    let mut cuts = tag_boundaries(script);
    if cuts.first() != Some(&0) {
        cuts.insert(0, 0);
    }
    cuts.push(script.len());
    cuts.windows(2)
        .map(|w| &script[w[0]..w[1]])
        .filter(|s| !s.is_empty())
        .collect()
}

/// Greedily packs speaker segments into chunks of at most `max_chars`
/// characters. A single segment longer than the limit is kept whole.
pub fn split_script(script: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for segment in split_segments(script) {
        let segment_chars = segment.chars().count();
        if current_chars + segment_chars > max_chars && !current.is_empty() {
            push_chunk(&mut chunks, &current);
            current.clear();
            current_chars = 0;
        }
        current.push_str(segment);
        current_chars += segment_chars;
    }
    push_chunk(&mut chunks, &current);
    chunks
}

fn push_chunk(chunks: &mut Vec<String>, chunk: &str) {
    let trimmed = chunk.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starts_at_tag(chunk: &str) -> bool {
        SpeakerTag::ALL.iter().any(|t| chunk.starts_with(t.marker()))
    }

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("json"), "json");
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("  ```json  \n  {}  \n  ```  "), "{}");
    }

    #[test]
    fn test_short_script_is_one_chunk() {
        let script = "NARRATOR: Anh nói.\nCHAR: Xin chào.\nNARRATOR: Cô đáp.\nCHAR: Chào anh.";
        let chunks = split_script(script, MAX_CHUNK_CHARS);
        assert_eq!(chunks, vec![script.to_string()]);
    }

    #[test]
    fn test_chunks_start_at_tags_and_respect_limit() {
        let mut script = String::new();
        for i in 0..60 {
            let tag = if i % 3 == 0 { "CHAR:" } else { "NARRATOR:" };
            script.push_str(&format!("{} line {} {}\n", tag, i, "ầ".repeat(i % 40)));
        }

        let chunks = split_script(&script, 200);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(starts_at_tag(chunk), "chunk starts mid-utterance: {:?}", chunk);
            assert!(chunk.chars().count() <= 200);
        }
        // Nothing lost or reordered.
        let rejoined: String = chunks.join("\n");
        let squash = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(squash(&rejoined), squash(&script));
    }

    #[test]
    fn test_oversized_segment_passes_through_whole() {
        let long_turn = format!("CHAR: {}", "a".repeat(1500));
        let script = format!("NARRATOR: Intro.\n{}\nNARRATOR: Outro.", long_turn);
        let chunks = split_script(&script, MAX_CHUNK_CHARS);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "NARRATOR: Intro.");
        assert_eq!(chunks[1], long_turn);
        assert_eq!(chunks[2], "NARRATOR: Outro.");
        let oversized = chunks.iter().filter(|c| c.chars().count() > MAX_CHUNK_CHARS).count();
        assert_eq!(oversized, 1);
    }

    #[test]
    fn test_untagged_preamble_and_empty_script() {
        assert!(split_script("", MAX_CHUNK_CHARS).is_empty());
        assert!(split_script("   \n ", MAX_CHUNK_CHARS).is_empty());

        let segments = split_segments("Welcome!\nNARRATOR: One.\nCHAR: Two.");
        assert_eq!(segments, vec!["Welcome!\n", "NARRATOR: One.\n", "CHAR: Two."]);
    }

    #[test]
    fn test_limit_counts_characters_not_bytes() {
        // 17 characters but 27 bytes per segment.
        let seg = format!("CHAR: {}\n", "é".repeat(10));
        let script = seg.repeat(4);
        let chunks = split_script(&script, 2 * seg.chars().count());
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_prompt_mentions_title_host_and_atmosphere() {
        let generator = RadioScriptGenerator::new("Gia Dai Tai");
        let prompt = generator.generate_prompt("Anh nói: Xin chào.", "Chương 1", "eerie");
        assert!(prompt.contains("\"Chương 1\""));
        assert!(prompt.contains("host Gia Dai Tai"));
        assert!(prompt.contains("Atmosphere: eerie."));
        assert!(prompt.ends_with("Text: Anh nói: Xin chào."));

        assert_eq!(generator.parse_response("  ", "raw"), "raw");
        assert_eq!(generator.parse_response("NARRATOR: x", "raw"), "NARRATOR: x");
    }
}
