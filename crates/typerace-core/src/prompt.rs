use rand::RngExt;
use rand::rng;

const BUILTIN_PROMPTS: &[&str] = &[
    "The quick brown fox jumps over the lazy dog while the farmer watches from the porch.",
    "A journey of a thousand miles begins with a single step, and then a great many more.",
    "Rust gives you the power to write fast and reliable software without a garbage collector.",
    "Every keystroke counts when the whole room is racing toward the same finish line.",
    "She sells sea shells by the sea shore, and the shells she sells are surely sea shells.",
    "Practice does not make perfect; perfect practice makes perfect, and patience makes it last.",
    "The mountain was quiet at dawn, until the first hikers reached the ridge and cheered.",
    "Good typists look at the screen, not the keyboard, and let their fingers find the keys.",
];

/// Pool of race prompts, one of which is fixed when a race starts.
#[derive(Debug, Clone)]
pub struct PromptPool {
    prompts: Vec<String>,
}

impl Default for PromptPool {
    fn default() -> Self {
        Self {
            prompts: BUILTIN_PROMPTS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl PromptPool {
    /// One prompt per non-blank line. Falls back to the builtin pool when
    /// the text holds no prompts.
    pub fn from_lines(text: &str) -> Self {
        let prompts: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        if prompts.is_empty() {
            Self::default()
        } else {
            Self { prompts }
        }
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Pick a random prompt.
    pub fn pick(&self) -> String {
        let mut rng = rng();
        let idx = rng.random_range(0..self.prompts.len());
        self.prompts[idx].clone()
    }
}

/// Prompt length in characters, as counted for XP.
pub fn prompt_length(prompt: &str) -> u32 {
    prompt.chars().count() as u32
}
