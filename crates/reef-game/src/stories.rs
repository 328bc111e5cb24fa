//! Story catalog and prompt rendering.
//!
//! Each story is a two-sided riddle card: the `front` is read to the
//! players, the `back` is the solution only the narrator knows. A
//! built-in catalog ships with the server; operators can replace it
//! with a TOML file.

use std::path::Path;

use reef_common::{ConfigError, GameError};
use serde::{Deserialize, Serialize};
use tracing::info;

/// One riddle card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: u32,
    pub title: String,
    /// The riddle as presented to the players.
    pub front: String,
    /// The solution. Never leaves the server.
    pub back: String,
}

/// Client-facing view of a story. The solution is deliberately absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorySummary {
    pub id: u32,
    pub title: String,
    pub front: String,
}

#[derive(Debug, Deserialize)]
struct StoryFile {
    #[serde(default)]
    stories: Vec<Story>,
}

/// The set of stories a server offers.
#[derive(Debug, Clone)]
pub struct StoryCatalog {
    stories: Vec<Story>,
}

impl StoryCatalog {
    /// The default catalog compiled into the binary.
    pub fn built_in() -> Self {
        Self {
            stories: built_in_stories(),
        }
    }

    /// Load a catalog from a TOML file with `[[stories]]` tables.
    pub fn from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.to_path_buf()))?;
        let file: StoryFile =
            toml::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let catalog = Self {
            stories: file.stories,
        };
        catalog.validate()?;
        info!(path = %path.display(), count = catalog.stories.len(), "story catalog loaded");
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        if self.stories.is_empty() {
            errors.push("catalog contains no stories".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for story in &self.stories {
            if !seen.insert(story.id) {
                errors.push(format!("duplicate story id {}", story.id));
            }
            if story.title.trim().is_empty() {
                errors.push(format!("story {} has an empty title", story.id));
            }
            if story.front.trim().is_empty() || story.back.trim().is_empty() {
                errors.push(format!("story {} is missing a side", story.id));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError(errors.join("; ")))
        }
    }

    pub fn get(&self, id: u32) -> Result<&Story, GameError> {
        self.stories
            .iter()
            .find(|s| s.id == id)
            .ok_or(GameError::StoryNotFound(id))
    }

    /// Everything a client may see of the catalog.
    pub fn summaries(&self) -> Vec<StorySummary> {
        self.stories
            .iter()
            .map(|s| StorySummary {
                id: s.id,
                title: s.title.clone(),
                front: s.front.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.stories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }
}

const INSTRUCTIONS_TEMPLATE: &str = "\
You are the narrator of a cooperative voice mystery game. A group of \
players is trying to reconstruct a strange story by asking you \
questions out loud.

The riddle the players have been given:
{{ FRONT }}

The full solution, which only you know:
{{ BACK }}

Rules you must follow:
- Answer questions with yes, no, or irrelevant, and add a short hint \
only when the players are stuck.
- Never reveal the solution unprompted. Never contradict it.
- Speak briefly. This is a voice conversation, long monologues lose \
the players.
- When the players have pieced together the essence of the solution, \
retell the complete story, congratulate them, and end the game with \
your tool.";

const FIRST_MESSAGE_TEMPLATE: &str = "\
Greet the players warmly, then read them tonight's riddle exactly \
once:

{{ FRONT }}

Invite them to ask their first yes-or-no question.";

const TOOL_DESCRIPTION_TEMPLATE: &str = "\
End the current game. Call this only after the players have uncovered \
the essential solution ({{ BACK }}) and you have retold the full \
story, or when you were asked to wrap the game up.";

fn render(template: &str, story: &Story) -> String {
    template
        .replace("{{ FRONT }}", &story.front)
        .replace("{{ BACK }}", &story.back)
}

/// System instructions for narrating `story`.
pub fn instructions_for(story: &Story) -> String {
    render(INSTRUCTIONS_TEMPLATE, story)
}

/// Introductory turn for a fresh session on `story`.
pub fn first_message_for(story: &Story) -> String {
    render(FIRST_MESSAGE_TEMPLATE, story)
}

/// Description of the end-game tool, parameterized on the solution.
pub fn tool_description_for(story: &Story) -> String {
    render(TOOL_DESCRIPTION_TEMPLATE, story)
}

fn built_in_stories() -> Vec<Story> {
    vec![
        Story {
            id: 1,
            title: "The Dark Lighthouse".to_string(),
            front: "A man turns off a light, goes to sleep, and wakes up to find \
                    he is responsible for dozens of deaths. What happened?"
                .to_string(),
            back: "He was a lighthouse keeper. He switched the lamp off for the \
                   night, and in the darkness a passenger ship ran onto the rocks."
                .to_string(),
        },
        Story {
            id: 2,
            title: "The Diver in the Forest".to_string(),
            front: "A dead man in a full diving suit is found in the middle of a \
                    burnt forest, miles from any water. How did he get there?"
                .to_string(),
            back: "He was scuba diving in a lake when a firefighting aircraft \
                   scooped him up with its water load and dropped him over the \
                   burning forest."
                .to_string(),
        },
        Story {
            id: 3,
            title: "Albatross Soup".to_string(),
            front: "A sailor orders albatross soup in a harbor restaurant, takes \
                    one spoonful, pays, walks out, and takes his own life. Why?"
                .to_string(),
            back: "Years earlier he was shipwrecked. The crew told him the meat \
                   that kept him alive was albatross. Tasting real albatross soup, \
                   he realized he had been fed his dead shipmates."
                .to_string(),
        },
    ]
}
