//! Package knowledge base and resolver.
//!
//! Maps an [`Intent`]'s target onto concrete packages. Matching, best first:
//! exact name (1.0), alias (0.9), substring of a name or alias (0.7),
//! substring of a description (0.6), then close spellings (similarity x 0.9,
//! edit distance at most 2). Resolutions are cached in the
//! [`CacheClass::PackageSearch`] class.

use crate::cache::{content_key, CacheClass, CacheManager};
use crate::command::{validate_token, InstallMethod};
use crate::config::KnowledgeSettings;
use crate::error::PipelineError;
use crate::intent::{normalize, Intent, IntentKind};
use crate::similarity::{edit_distance, similarity};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

const EXACT: f32 = 1.0;
const ALIAS: f32 = 0.9;
const NAME_SUBSTRING: f32 = 0.7;
const DESCRIPTION_SUBSTRING: f32 = 0.6;
const FUZZY_FACTOR: f32 = 0.9;
const FUZZY_FLOOR: f32 = 0.4;

/// Longest ranked candidate list returned
const MAX_CANDIDATES: usize = 10;
/// Did-you-mean list length
pub const MAX_SUGGESTIONS: usize = 5;

/// A package that can be installed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    /// nixpkgs attribute path; empty means the same as `name`
    #[serde(default)]
    pub attribute_path: String,
}

impl PackageInfo {
    pub fn new(name: &str, description: &str, aliases: &[&str], attribute_path: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            attribute_path: attribute_path.to_string(),
        }
    }

    fn normalized(mut self) -> Self {
        if self.attribute_path.is_empty() {
            self.attribute_path = self.name.clone();
        }
        self.aliases = self.aliases.iter().map(|a| normalize(a)).collect();
        self
    }
}

/// A package with its match score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPackage {
    pub package: PackageInfo,
    pub score: f32,
}

/// One way of carrying out an intent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateOperation {
    pub intent: Intent,
    /// Empty for operations that act on the whole profile
    pub packages: Vec<PackageInfo>,
    pub method: InstallMethod,
    pub explanation: String,
    pub confidence: f32,
}

// ============================================================================
// Built-in catalog
// ============================================================================

const CATALOG: &[(&str, &str, &[&str])] = &[
    ("firefox", "Mozilla Firefox web browser", &["mozilla firefox"]),
    ("firefox-esr", "Mozilla Firefox extended support release", &[]),
    ("chromium", "Open source web browser from Google", &[]),
    ("google-chrome", "Google's proprietary web browser", &["chrome", "google chrome"]),
    ("gimp", "GNU Image Manipulation Program, raster graphics and photo editor", &[]),
    ("krita", "Digital painting and photo editing application", &[]),
    ("darktable", "Photography workflow application and raw photo editor", &[]),
    ("inkscape", "Vector graphics editor", &[]),
    ("blender", "3D creation suite", &[]),
    ("vlc", "Cross-platform media player", &["vlc media player"]),
    ("mpv", "Minimalist command line video player", &[]),
    ("audacity", "Multi-track audio editor and recorder", &[]),
    ("obs-studio", "Screen recording and live streaming", &["obs"]),
    ("vim", "Highly configurable text editor", &[]),
    ("neovim", "Vim-fork focused on extensibility and usability", &["nvim"]),
    ("emacs", "Extensible, customizable text editor", &[]),
    ("vscode", "Visual Studio Code source code editor", &["code", "vs code", "visual studio code"]),
    ("python3", "Python programming language interpreter", &["python"]),
    ("nodejs", "JavaScript runtime built on V8", &["node", "npm", "node.js"]),
    ("go", "The Go programming language", &["golang"]),
    ("rustc", "The Rust compiler", &["rust"]),
    ("cargo", "The Rust package manager", &[]),
    ("openjdk", "Open source Java development kit", &["java", "jdk"]),
    ("gcc", "GNU compiler collection", &[]),
    ("git", "Distributed version control system", &[]),
    ("htop", "Interactive process viewer", &[]),
    ("btop", "Resource monitor", &[]),
    ("tmux", "Terminal multiplexer", &[]),
    ("zsh", "The Z shell", &[]),
    ("fish", "Smart and user-friendly command line shell", &[]),
    ("ripgrep", "Recursive line-oriented search tool", &["rg"]),
    ("fd", "Simple, fast alternative to find", &[]),
    ("bat", "cat clone with syntax highlighting", &[]),
    ("jq", "Command-line JSON processor", &[]),
    ("curl", "Command line tool for transferring data with URLs", &[]),
    ("wget", "Tool for retrieving files over HTTP and FTP", &[]),
    ("docker", "Container runtime", &[]),
    ("podman", "Daemonless container engine", &[]),
    ("libreoffice", "Comprehensive office suite", &["office"]),
    ("thunderbird", "Mozilla email client", &["email client"]),
    ("keepassxc", "Offline password manager", &[]),
    ("signal-desktop", "Private messenger", &["signal"]),
    ("neofetch", "System information tool", &[]),
];

/// Phrases naming a category of packages
const CATEGORY_ALIASES: &[(&str, &[&str])] = &[
    ("browser", &["firefox", "chromium", "google-chrome"]),
    ("web browser", &["firefox", "chromium", "google-chrome"]),
    ("photo editor", &["gimp", "krita", "darktable"]),
    ("image editor", &["gimp", "krita", "darktable"]),
    ("video player", &["vlc", "mpv"]),
    ("media player", &["vlc", "mpv"]),
    ("text editor", &["vim", "neovim", "emacs", "vscode"]),
    ("office suite", &["libreoffice"]),
    ("password manager", &["keepassxc"]),
];

/// The package catalog plus its alias index
pub struct KnowledgeBase {
    packages: Vec<PackageInfo>,
    by_name: HashMap<String, usize>,
    aliases: BTreeMap<String, BTreeSet<String>>,
    index_lookups: AtomicU64,
}

impl KnowledgeBase {
    /// The built-in catalog only
    pub fn builtin() -> Self {
        let packages = CATALOG
            .iter()
            .map(|(name, description, aliases)| PackageInfo::new(name, description, aliases, name))
            .collect();
        Self::from_packages(packages)
    }

    pub fn from_packages(packages: Vec<PackageInfo>) -> Self {
        let mut kb = Self {
            packages: Vec::new(),
            by_name: HashMap::new(),
            aliases: BTreeMap::new(),
            index_lookups: AtomicU64::new(0),
        };
        kb.extend(packages);
        kb
    }

    /// Built-in catalog extended by the configured JSON index, if any
    pub fn load(settings: &KnowledgeSettings) -> Self {
        let mut kb = Self::builtin();
        if let Some(path) = &settings.package_index {
            match read_index(path) {
                Ok(packages) => {
                    info!(path = %path.display(), count = packages.len(), "Loaded package index");
                    kb.extend(packages);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Package index unusable, using built-in catalog");
                }
            }
        }
        kb
    }

    /// Add packages, replacing any with the same name. Entries whose name or
    /// attribute path would not pass the command whitelist are skipped.
    pub fn extend(&mut self, packages: Vec<PackageInfo>) {
        for package in packages {
            let package = package.normalized();
            if let Err(e) = validate_token(&package.name).and(validate_token(&package.attribute_path)) {
                warn!(
                    target: "nixling::security",
                    name = %package.name,
                    error = %e,
                    "Package index entry rejected"
                );
                continue;
            }
            match self.by_name.get(&package.name) {
                Some(&i) => self.packages[i] = package,
                None => {
                    self.by_name.insert(package.name.clone(), self.packages.len());
                    self.packages.push(package);
                }
            }
        }
        self.rebuild_aliases();
    }

    fn rebuild_aliases(&mut self) {
        self.aliases.clear();
        for package in &self.packages {
            for alias in &package.aliases {
                self.aliases
                    .entry(alias.clone())
                    .or_default()
                    .insert(package.name.clone());
            }
        }
        for (alias, names) in CATEGORY_ALIASES {
            let known = names.iter().filter(|name| self.by_name.contains_key(**name));
            self.aliases
                .entry(alias.to_string())
                .or_default()
                .extend(known.map(|name| name.to_string()));
        }
        self.aliases.retain(|_, names| !names.is_empty());
    }

    pub fn get(&self, name: &str) -> Option<&PackageInfo> {
        self.by_name.get(name).map(|&i| &self.packages[i])
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// How many times the index itself (not the cache) was consulted
    pub fn index_lookups(&self) -> u64 {
        self.index_lookups.load(Ordering::Relaxed)
    }

    /// Rank packages against a search term, uncached
    pub fn lookup(&self, term: &str) -> Vec<ScoredPackage> {
        self.index_lookups.fetch_add(1, Ordering::Relaxed);
        let term = normalize(term);
        if term.is_empty() {
            return Vec::new();
        }

        // package index -> best score so far
        let mut best: HashMap<usize, f32> = HashMap::new();
        let mut offer = |index: usize, score: f32| {
            let slot = best.entry(index).or_insert(0.0);
            *slot = slot.max(score);
        };

        if let Some(names) = self.aliases.get(&term) {
            for name in names {
                if let Some(&index) = self.by_name.get(name) {
                    offer(index, ALIAS);
                }
            }
        }

        for (index, package) in self.packages.iter().enumerate() {
            let name = package.name.as_str();
            if name == term {
                offer(index, EXACT);
                continue;
            }
            if term.len() >= 3
                && (name.contains(term.as_str())
                    || package.aliases.iter().any(|a| a.contains(term.as_str())))
            {
                offer(index, NAME_SUBSTRING);
            }
            if term.len() >= 4 && package.description.to_lowercase().contains(term.as_str()) {
                offer(index, DESCRIPTION_SUBSTRING);
            }
            if edit_distance(name, &term) <= 2 {
                let score = similarity(name, &term) * FUZZY_FACTOR;
                if score >= FUZZY_FLOOR {
                    offer(index, score);
                }
            }
        }

        let mut ranked: Vec<ScoredPackage> = best
            .into_iter()
            .map(|(index, score)| ScoredPackage {
                package: self.packages[index].clone(),
                score,
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.package.name.cmp(&b.package.name))
        });
        ranked.truncate(MAX_CANDIDATES);
        ranked
    }

    /// Cached [`KnowledgeBase::lookup`], keyed by term and intent kind
    pub fn lookup_cached(
        &self,
        cache: &CacheManager,
        term: &str,
        kind: IntentKind,
    ) -> Vec<ScoredPackage> {
        let term = normalize(term);
        let key = content_key(CacheClass::PackageSearch, &["resolve", kind.as_str(), &term]);
        if let Some(hit) = cache.get::<Vec<ScoredPackage>>(&key) {
            debug!(term = %term, kind = %kind, "Resolution served from cache");
            return hit;
        }
        let ranked = self.lookup(&term);
        cache.put(&key, CacheClass::PackageSearch, &ranked);
        ranked
    }

    /// Closest known names and aliases, best first
    pub fn suggestions(&self, term: &str, limit: usize) -> Vec<String> {
        let term = normalize(term);
        let mut scored: Vec<(f32, String)> = self
            .packages
            .iter()
            .map(|p| p.name.as_str())
            .chain(self.aliases.keys().map(String::as_str))
            .map(|name| (similarity(name, &term), name.to_string()))
            .filter(|(score, _)| *score > FUZZY_FLOOR)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        scored.dedup_by(|a, b| a.1 == b.1);
        scored.into_iter().take(limit).map(|(_, name)| name).collect()
    }

    /// Turn an intent into ranked candidate operations
    pub fn resolve(
        &self,
        cache: &CacheManager,
        intent: &Intent,
        method: InstallMethod,
    ) -> Result<Vec<CandidateOperation>, PipelineError> {
        let kind = intent.kind();
        let whole_profile = || CandidateOperation {
            intent: intent.clone(),
            packages: Vec::new(),
            method,
            explanation: explain(kind, None, method),
            confidence: intent.confidence(),
        };

        let Some(target) = intent.target() else {
            if kind.requires_target() {
                return Err(PipelineError::NotFound {
                    target: String::new(),
                    suggestions: Vec::new(),
                });
            }
            return Ok(vec![whole_profile()]);
        };

        let ranked = self.lookup_cached(cache, target, kind);
        if ranked.is_empty() {
            if kind == IntentKind::Search {
                // nixpkgs may still know it
                return Ok(vec![whole_profile()]);
            }
            return Err(PipelineError::NotFound {
                target: target.to_string(),
                suggestions: self.suggestions(target, MAX_SUGGESTIONS),
            });
        }

        Ok(ranked
            .into_iter()
            .map(|scored| CandidateOperation {
                intent: intent.clone(),
                explanation: explain(kind, Some(&scored.package), method),
                packages: vec![scored.package],
                method,
                confidence: scored.score,
            })
            .collect())
    }

    /// Resolve `queries` as install targets into the cache; returns how many matched something
    pub fn prewarm(&self, cache: &CacheManager, queries: &[String]) -> usize {
        queries
            .iter()
            .filter(|query| !self.lookup_cached(cache, query, IntentKind::Install).is_empty())
            .count()
    }
}

fn read_index(path: &Path) -> Result<Vec<PackageInfo>, String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&content).map_err(|e| e.to_string())
}

fn explain(kind: IntentKind, package: Option<&PackageInfo>, method: InstallMethod) -> String {
    let via = match method {
        InstallMethod::Declarative => "the system profile",
        InstallMethod::HomeManager => "the home-manager profile",
        InstallMethod::Imperative => "your nix profile",
    };
    match (kind, package) {
        (IntentKind::Install, Some(p)) => format!("Install {} ({}) into {}", p.name, p.description, via),
        (IntentKind::Remove, Some(p)) => format!("Remove {} from {}", p.name, via),
        (IntentKind::Update, Some(p)) => format!("Upgrade {} in {}", p.name, via),
        (IntentKind::Update, None) => format!("Upgrade everything in {}", via),
        (IntentKind::Search, Some(p)) => format!("{}: {}", p.name, p.description),
        (IntentKind::Search, None) => "Search nixpkgs".to_string(),
        (IntentKind::ListInstalled, _) => format!("List packages in {}", via),
        (IntentKind::Rollback, _) => format!("Switch {} to an earlier generation", via),
        _ => "No action".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheSettings;
    use crate::intent::extract;

    fn cache() -> CacheManager {
        CacheManager::in_memory(&CacheSettings::default())
    }

    #[test]
    fn test_builtin_catalog_is_whitelist_clean() {
        let kb = KnowledgeBase::builtin();
        assert_eq!(kb.len(), CATALOG.len());
    }

    #[test]
    fn test_exact_match_ranks_first() {
        let kb = KnowledgeBase::builtin();
        let ranked = kb.lookup("firefox");
        assert_eq!(ranked[0].package.name, "firefox");
        assert_eq!(ranked[0].score, EXACT);
        assert!(ranked.iter().any(|s| s.package.name == "firefox-esr"));
    }

    #[test]
    fn test_alias_resolves() {
        let kb = KnowledgeBase::builtin();
        let ranked = kb.lookup("nvim");
        assert_eq!(ranked[0].package.name, "neovim");
        assert_eq!(ranked[0].score, ALIAS);
    }

    #[test]
    fn test_category_alias_gives_several() {
        let kb = KnowledgeBase::builtin();
        let names: Vec<_> = kb
            .lookup("photo editor")
            .into_iter()
            .filter(|s| s.score == ALIAS)
            .map(|s| s.package.name)
            .collect();
        assert_eq!(names, vec!["darktable", "gimp", "krita"]);
    }

    #[test]
    fn test_typo_resolves_fuzzily() {
        let kb = KnowledgeBase::builtin();
        let ranked = kb.lookup("firefx");
        assert_eq!(ranked[0].package.name, "firefox");
        assert!(ranked[0].score < ALIAS);
    }

    #[test]
    fn test_unknown_package_not_found_with_suggestions() {
        let kb = KnowledgeBase::builtin();
        let err = kb
            .resolve(&cache(), &extract("install fierfox-nightly"), InstallMethod::Imperative)
            .unwrap_err();
        match err {
            PipelineError::NotFound { target, suggestions } => {
                assert_eq!(target, "fierfox-nightly");
                assert!(suggestions.len() <= MAX_SUGGESTIONS);
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_nonsense_has_no_suggestions() {
        let kb = KnowledgeBase::builtin();
        assert!(kb.suggestions("qqqqqqqqqqqqzz", MAX_SUGGESTIONS).is_empty());
    }

    #[test]
    fn test_second_resolution_hits_cache() {
        let kb = KnowledgeBase::builtin();
        let cache = cache();
        let intent = extract("install firefox");

        let first = kb.resolve(&cache, &intent, InstallMethod::Imperative).unwrap();
        let lookups = kb.index_lookups();
        let second = kb.resolve(&cache, &intent, InstallMethod::Imperative).unwrap();

        assert_eq!(first, second);
        assert_eq!(kb.index_lookups(), lookups);
    }

    #[test]
    fn test_resolution_cache_is_per_kind() {
        let kb = KnowledgeBase::builtin();
        let cache = cache();

        kb.lookup_cached(&cache, "firefox", IntentKind::Install);
        let lookups = kb.index_lookups();
        kb.lookup_cached(&cache, "firefox", IntentKind::Remove);
        assert_eq!(kb.index_lookups(), lookups + 1);

        kb.lookup_cached(&cache, "firefox", IntentKind::Install);
        assert_eq!(kb.index_lookups(), lookups + 1);
    }

    #[test]
    fn test_targetless_intent_acts_on_profile() {
        let kb = KnowledgeBase::builtin();
        let candidates = kb
            .resolve(&cache(), &extract("update my system"), InstallMethod::Declarative)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].packages.is_empty());
    }

    #[test]
    fn test_search_for_unknown_still_searches() {
        let kb = KnowledgeBase::builtin();
        let candidates = kb
            .resolve(&cache(), &extract("search for qqqqqqqzzzz"), InstallMethod::Imperative)
            .unwrap();
        assert!(candidates[0].packages.is_empty());
    }

    #[test]
    fn test_index_entries_override_and_reject_unsafe() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("index.json");
        fs::write(
            &path,
            r#"[
                {"name": "firefox", "description": "Overridden", "attribute_path": "firefox-bin"},
                {"name": "helix", "description": "Post-modern modal editor", "aliases": ["hx"]},
                {"name": "evil;rm", "description": "bad"}
            ]"#,
        )
        .unwrap();

        let kb = KnowledgeBase::load(&KnowledgeSettings {
            package_index: Some(path),
            ..Default::default()
        });

        assert_eq!(kb.len(), CATALOG.len() + 1);
        assert_eq!(kb.get("firefox").unwrap().attribute_path, "firefox-bin");
        assert_eq!(kb.get("helix").unwrap().attribute_path, "helix");
        assert!(kb.get("evil;rm").is_none());
        assert_eq!(kb.lookup("hx")[0].package.name, "helix");
    }

    #[test]
    fn test_missing_index_falls_back_to_builtin() {
        let kb = KnowledgeBase::load(&KnowledgeSettings {
            package_index: Some("/nonexistent/nixling/index.json".into()),
            ..Default::default()
        });
        assert_eq!(kb.len(), CATALOG.len());
    }
}
