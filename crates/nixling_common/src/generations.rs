//! Generation listing parser.
//!
//! Parses `nix-env --list-generations` output:
//!
//! ```text
//!   41   2024-01-14 09:12:03
//!   42   2024-01-15 14:30:45   (current)
//! ```

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(\d+)\s+(\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2})\s*(\(current\))?\s*$")
        .expect("static regex")
});

/// One profile generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub number: u64,
    pub created: Option<NaiveDateTime>,
    pub current: bool,
}

/// All generations of one profile, ascending by number
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationListing {
    generations: Vec<Generation>,
}

impl GenerationListing {
    /// Parse listing output; unrecognised lines are skipped
    pub fn parse(text: &str) -> Self {
        let mut generations: Vec<Generation> = text
            .lines()
            .filter_map(|line| {
                let caps = LINE.captures(line)?;
                let number = caps[1].parse().ok()?;
                let stamp = caps[2].split_whitespace().collect::<Vec<_>>().join(" ");
                Some(Generation {
                    number,
                    created: NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S").ok(),
                    current: caps.get(3).is_some(),
                })
            })
            .collect();
        generations.sort_by_key(|g| g.number);
        Self { generations }
    }

    pub fn generations(&self) -> &[Generation] {
        &self.generations
    }

    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }

    pub fn current(&self) -> Option<&Generation> {
        self.generations.iter().find(|g| g.current)
    }

    /// The newest generation older than the current one
    pub fn previous(&self) -> Option<&Generation> {
        let current = self.current()?.number;
        self.generations.iter().rev().find(|g| g.number < current)
    }

    pub fn contains(&self, number: u64) -> bool {
        self.generations.iter().any(|g| g.number == number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
  40   2024-01-10 08:00:00
  41   2024-01-14 09:12:03
  42   2024-01-15 14:30:45   (current)
";

    #[test]
    fn test_parse_listing() {
        let listing = GenerationListing::parse(LISTING);
        assert_eq!(listing.generations().len(), 3);
        assert_eq!(listing.current().map(|g| g.number), Some(42));
        assert_eq!(listing.previous().map(|g| g.number), Some(41));
        assert!(listing.contains(40));
        assert!(!listing.contains(43));

        let created = listing.current().and_then(|g| g.created).unwrap();
        assert_eq!(created.to_string(), "2024-01-15 14:30:45");
    }

    #[test]
    fn test_previous_when_current_is_not_newest() {
        let listing = GenerationListing::parse(
            "  7   2024-02-01 10:00:00\n  8   2024-02-02 10:00:00   (current)\n  9   2024-02-03 10:00:00\n",
        );
        assert_eq!(listing.previous().map(|g| g.number), Some(7));
    }

    #[test]
    fn test_no_previous_for_first_generation() {
        let listing = GenerationListing::parse("   1   2024-01-01 00:00:00   (current)\n");
        assert!(listing.previous().is_none());
    }

    #[test]
    fn test_garbage_is_skipped() {
        let listing = GenerationListing::parse("error: profile does not exist\n\nfoo bar\n");
        assert!(listing.is_empty());
        assert!(listing.current().is_none());
    }
}
