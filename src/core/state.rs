use crate::core::document::{new_id, DocumentNode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prebuilt voices offered by the speech model.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VoiceName {
    Kore,
    Puck,
    Charon,
    Fenrir,
    Zephyr,
}

impl VoiceName {
    pub const ALL: [VoiceName; 5] = [
        VoiceName::Kore,
        VoiceName::Charon,
        VoiceName::Puck,
        VoiceName::Zephyr,
        VoiceName::Fenrir,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceName::Kore => "Kore",
            VoiceName::Puck => "Puck",
            VoiceName::Charon => "Charon",
            VoiceName::Fenrir => "Fenrir",
            VoiceName::Zephyr => "Zephyr",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            VoiceName::Kore => "Clear, steady mid-range male voice.",
            VoiceName::Charon => "Deep, commanding, mysterious male voice.",
            VoiceName::Puck => "Young, lively, bright female voice.",
            VoiceName::Zephyr => "Soft, warm, expressive female voice.",
            VoiceName::Fenrir => "Harsh, forceful voice suited to villains.",
        }
    }
}

impl fmt::Display for VoiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CharacterRole {
    Protagonist,
    Antagonist,
    #[default]
    Supporting,
    Extra,
}

impl fmt::Display for CharacterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CharacterRole::Protagonist => "protagonist",
            CharacterRole::Antagonist => "antagonist",
            CharacterRole::Supporting => "supporting",
            CharacterRole::Extra => "extra",
        };
        f.write_str(label)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: CharacterRole,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub personality: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_name: Option<VoiceName>,
}

impl Character {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: new_id("c"),
            name: name.into(),
            role: CharacterRole::Supporting,
            description: String::new(),
            personality: String::new(),
            goal: String::new(),
            voice_name: Some(VoiceName::Kore),
        }
    }
}

/// Tailwind-style palette the cover color is drawn from.
pub const COVER_COLORS: [&str; 6] = [
    "bg-vip-500",
    "bg-indigo-600",
    "bg-amber-500",
    "bg-emerald-600",
    "bg-rose-600",
    "bg-sky-600",
];

/// Backdrop preset for the cinematic video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackgroundMood {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub visual_prompt: &'static str,
}

pub static BACKGROUND_MOODS: [BackgroundMood; 5] = [
    BackgroundMood {
        id: "mystic",
        name: "Ancient library",
        description: "Flickering candles, towering wooden shelves, golden dust in the air.",
        visual_prompt: "a grand mystical library with thousands of floating candles and old leather books, cinematic lighting",
    },
    BackgroundMood {
        id: "cyber",
        name: "Cyber future",
        description: "Holographic screens, violet neon, hyper-real technology.",
        visual_prompt: "a high-tech cyberpunk study room with neon holographic displays and metallic furniture",
    },
    BackgroundMood {
        id: "zen",
        name: "Quiet tea room",
        description: "A bamboo garden outside, steaming tea, a meditative space.",
        visual_prompt: "a peaceful zen tea room with bamboo forest outside, soft natural light and minimal wood design",
    },
    BackgroundMood {
        id: "horror",
        name: "Haunted chamber",
        description: "Cold mist, creeping darkness, old books burning with blue fire.",
        visual_prompt: "a dark gothic room with cold mist, ghostly blue candlelight and creepy shadows",
    },
    BackgroundMood {
        id: "celestial",
        name: "Starlit galaxy",
        description: "Sitting among the stars while constellations circle the pages.",
        visual_prompt: "an ethereal chamber floating in the galaxy, constellations swirling around the reader",
    },
];

impl BackgroundMood {
    pub fn find(id: &str) -> Option<&'static BackgroundMood> {
        BACKGROUND_MOODS.iter().find(|m| m.id == id)
    }
}

impl fmt::Display for BackgroundMood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.name, self.description)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SavedWork {
    pub id: String,
    pub title: String,
    pub last_updated: DateTime<Utc>,
    pub cover_color: String,
    pub tree: DocumentNode,
    #[serde(default)]
    pub setting: String,
    #[serde(default)]
    pub premise: String,
    #[serde(default)]
    pub characters: Vec<Character>,
}

impl SavedWork {
    pub fn new(title: impl Into<String>) -> Self {
        use rand::seq::IndexedRandom;

        let title = title.into();
        let cover_color = COVER_COLORS
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(COVER_COLORS[0]);
        Self {
            id: new_id("n"),
            tree: DocumentNode::new_root(title.clone()),
            title,
            last_updated: Utc::now(),
            cover_color: cover_color.to_string(),
            setting: String::new(),
            premise: String::new(),
            characters: Vec::new(),
        }
    }

    pub fn character(&self, id: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.id == id)
    }
}
