use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Seasonal style modifier applied to the generation instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Season {
    Spring,
    #[default]
    Summer,
    Autumn,
    Winter,
}

impl Season {
    pub const ALL: [Season; 4] = [
        Season::Spring,
        Season::Summer,
        Season::Autumn,
        Season::Winter,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Season::Spring => "Spring",
            Season::Summer => "Summer",
            Season::Autumn => "Autumn",
            Season::Winter => "Winter",
        }
    }

    /// Content hints the provider is asked to apply for this season.
    pub fn hints(self) -> &'static [&'static str] {
        match self {
            Season::Spring => &["floral elements", "pastel colors", "light clothing"],
            Season::Summer => &["bright lighting", "sunglasses", "summer outfit"],
            Season::Autumn => &["warm colors", "scarf", "sweater"],
            Season::Winter => &["cool tones", "beanie", "scarf", "puffer jacket"],
        }
    }

    /// Optional flavor props, softer than `hints`.
    pub fn accents(self) -> &'static str {
        match self {
            Season::Spring => "maybe blossoms or a flower crown",
            Season::Summer => "maybe ice cream or beach vibe accessories",
            Season::Autumn => "maybe falling autumn leaves",
            Season::Winter => "maybe snow elements",
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Season {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "spring" => Ok(Season::Spring),
            "summer" => Ok(Season::Summer),
            "autumn" | "fall" => Ok(Season::Autumn),
            "winter" => Ok(Season::Winter),
            other => Err(format!("Unknown season '{other}'.")),
        }
    }
}
