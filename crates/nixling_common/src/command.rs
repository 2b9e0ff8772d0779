//! Command builder and whitelist validator.
//!
//! This module defines the ONLY command shapes nixling will run. Each
//! (method, operation) pair maps to one fixed argv template compiled into the
//! binary. Free text from the user only ever fills argument slots, and every
//! slot value must pass the token whitelist: `^[A-Za-z0-9_.-]+$`, no `..`,
//! no leading `-`, at most 200 characters. Commands are built as discrete
//! tokens and are never handed to a shell.

use crate::config::{Elevation, ExecutionSettings};
use crate::error::ValidationError;
use crate::intent::{IntentKind, MOD_GENERATION};
use crate::knowledge::{CandidateOperation, PackageInfo};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Longest accepted argument token
pub const MAX_TOKEN_LEN: usize = 200;

/// How a package change is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InstallMethod {
    /// System-wide via the NixOS system profile (needs elevation to mutate)
    Declarative,
    /// The user's home-manager profile
    HomeManager,
    /// The user's `nix profile`
    #[default]
    Imperative,
}

impl InstallMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallMethod::Declarative => "declarative",
            InstallMethod::HomeManager => "home_manager",
            InstallMethod::Imperative => "imperative",
        }
    }

    /// Parse the value of the `method` intent modifier
    pub fn from_modifier(value: &str) -> Option<Self> {
        match value {
            "declarative" => Some(InstallMethod::Declarative),
            "home_manager" => Some(InstallMethod::HomeManager),
            "imperative" => Some(InstallMethod::Imperative),
            _ => None,
        }
    }
}

impl std::fmt::Display for InstallMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The concrete package-manager operation a command performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Install,
    Remove,
    /// Upgrade everything in the profile
    Update,
    /// Upgrade the named packages only
    UpdatePackages,
    Search,
    ListInstalled,
    Rollback,
    /// Read the generation listing (snapshots, rollback targets)
    ListGenerations,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Install => "install",
            Operation::Remove => "remove",
            Operation::Update => "update",
            Operation::UpdatePackages => "update_packages",
            Operation::Search => "search",
            Operation::ListInstalled => "list_installed",
            Operation::Rollback => "rollback",
            Operation::ListGenerations => "list_generations",
        }
    }

    /// Map an intent to the operation carrying it out
    pub fn for_intent(kind: IntentKind, has_packages: bool) -> Option<Self> {
        match kind {
            IntentKind::Install => Some(Operation::Install),
            IntentKind::Remove => Some(Operation::Remove),
            IntentKind::Update if has_packages => Some(Operation::UpdatePackages),
            IntentKind::Update => Some(Operation::Update),
            IntentKind::Search => Some(Operation::Search),
            IntentKind::ListInstalled => Some(Operation::ListInstalled),
            IntentKind::Rollback => Some(Operation::Rollback),
            IntentKind::Unknown => None,
        }
    }

    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Operation::Install
                | Operation::Remove
                | Operation::Update
                | Operation::UpdatePackages
                | Operation::Rollback
        )
    }
}

// ============================================================================
// argv templates
// ============================================================================

/// One position in an argv template
#[derive(Debug, Clone, Copy)]
enum Slot {
    /// Fixed text
    Lit(&'static str),
    /// The profile path for the template's method (from config)
    Profile,
    /// One token per package: prefix + attribute path
    Attr(&'static str),
    /// One token per package: package name
    Name,
    /// One token per search word
    Terms,
    /// A generation number
    Generation,
}

use Slot::*;

/// The fixed, versioned argv contract with the package manager
fn template(method: InstallMethod, op: Operation) -> &'static [Slot] {
    use InstallMethod::*;
    match (method, op) {
        (Declarative, Operation::Install) => &[
            Lit("nix-env"), Lit("--profile"), Profile, Lit("--install"), Lit("--attr"), Attr("nixos."),
        ],
        (HomeManager, Operation::Install) => &[
            Lit("nix-env"), Lit("--profile"), Profile, Lit("--install"), Lit("--attr"), Attr("nixpkgs."),
        ],
        (Imperative, Operation::Install) => &[
            Lit("nix"), Lit("profile"), Lit("install"), Attr("nixpkgs#"),
        ],

        (Declarative | HomeManager, Operation::Remove) => &[
            Lit("nix-env"), Lit("--profile"), Profile, Lit("--uninstall"), Name,
        ],
        (Imperative, Operation::Remove) => &[Lit("nix"), Lit("profile"), Lit("remove"), Name],

        (Declarative, Operation::Update) => &[Lit("nixos-rebuild"), Lit("switch"), Lit("--upgrade")],
        (HomeManager, Operation::Update) => &[Lit("home-manager"), Lit("switch")],
        (Imperative, Operation::Update) => &[Lit("nix"), Lit("profile"), Lit("upgrade"), Lit("--all")],

        (Declarative | HomeManager, Operation::UpdatePackages) => &[
            Lit("nix-env"), Lit("--profile"), Profile, Lit("--upgrade"), Name,
        ],
        (Imperative, Operation::UpdatePackages) => &[Lit("nix"), Lit("profile"), Lit("upgrade"), Name],

        (_, Operation::Search) => &[Lit("nix"), Lit("search"), Lit("nixpkgs"), Terms],

        (Declarative | HomeManager, Operation::ListInstalled) => &[
            Lit("nix-env"), Lit("--profile"), Profile, Lit("--query"), Lit("--installed"),
        ],
        (Imperative, Operation::ListInstalled) => &[Lit("nix"), Lit("profile"), Lit("list")],

        (Declarative | HomeManager, Operation::Rollback) => &[
            Lit("nix-env"), Lit("--profile"), Profile, Lit("--switch-generation"), Generation,
        ],
        (Imperative, Operation::Rollback) => &[
            Lit("nix"), Lit("profile"), Lit("rollback"), Lit("--to"), Generation,
        ],

        (_, Operation::ListGenerations) => &[
            Lit("nix-env"), Lit("--profile"), Profile, Lit("--list-generations"),
        ],
    }
}

/// Check one free-text token against the whitelist
pub fn validate_token(token: &str) -> Result<(), ValidationError> {
    if token.is_empty() {
        return Err(ValidationError::Empty);
    }
    let len = token.chars().count();
    if len > MAX_TOKEN_LEN {
        return Err(ValidationError::TooLong {
            len,
            limit: MAX_TOKEN_LEN,
        });
    }
    if let Some(found) = token
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(ValidationError::InvalidCharacter {
            token: token.to_string(),
            found,
        });
    }
    if token.starts_with('-') {
        // Would be read as a flag
        return Err(ValidationError::InvalidCharacter {
            token: token.to_string(),
            found: '-',
        });
    }
    if token.contains("..") {
        return Err(ValidationError::PathTraversal {
            token: token.to_string(),
        });
    }
    Ok(())
}

fn validate_generation(token: &str) -> Result<(), ValidationError> {
    validate_token(token)?;
    match token.chars().find(|c| !c.is_ascii_digit()) {
        Some(found) => Err(ValidationError::InvalidCharacter {
            token: token.to_string(),
            found,
        }),
        None => Ok(()),
    }
}

/// A command whose every free-text argument passed the whitelist.
///
/// Only [`CommandBuilder`] can construct one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedCommand {
    argv: Vec<String>,
    requires_elevation: bool,
    elevation_program: Option<&'static str>,
    dry_run_preview: String,
    method: InstallMethod,
    operation: Operation,
}

impl ValidatedCommand {
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn requires_elevation(&self) -> bool {
        self.requires_elevation
    }

    pub fn dry_run_preview(&self) -> &str {
        &self.dry_run_preview
    }

    pub fn method(&self) -> InstallMethod {
        self.method
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn is_mutating(&self) -> bool {
        self.operation.is_mutating()
    }

    /// argv including the privilege prefix, as handed to the process runner
    pub fn full_argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.argv.len() + 1);
        if self.requires_elevation {
            if let Some(program) = self.elevation_program {
                argv.push(program.to_string());
            }
        }
        argv.extend(self.argv.iter().cloned());
        argv
    }
}

/// Builds [`ValidatedCommand`]s from candidates using the fixed templates
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    system_profile: PathBuf,
    home_profile: PathBuf,
    user_profile: PathBuf,
    elevation: Elevation,
}

impl CommandBuilder {
    pub fn new(settings: &ExecutionSettings) -> Self {
        Self {
            system_profile: settings.effective_system_profile(),
            home_profile: settings.effective_home_profile(),
            user_profile: settings.effective_user_profile(),
            elevation: settings.elevation,
        }
    }

    fn profile(&self, method: InstallMethod) -> String {
        let path = match method {
            InstallMethod::Declarative => &self.system_profile,
            InstallMethod::HomeManager => &self.home_profile,
            InstallMethod::Imperative => &self.user_profile,
        };
        path.to_string_lossy().into_owned()
    }

    /// Build the command for a resolved candidate
    pub fn build(&self, candidate: &CandidateOperation) -> Result<ValidatedCommand, ValidationError> {
        let intent = &candidate.intent;
        let op = Operation::for_intent(intent.kind(), !candidate.packages.is_empty()).ok_or_else(
            || ValidationError::UnknownMethod {
                method: candidate.method.to_string(),
                operation: intent.kind().to_string(),
            },
        )?;

        let terms: Vec<&str> = intent
            .target()
            .map(|t| t.split_whitespace().collect())
            .unwrap_or_default();

        self.assemble(
            candidate.method,
            op,
            &candidate.packages,
            &terms,
            intent.modifier(MOD_GENERATION),
        )
        .map_err(|e| {
            warn!(
                target: "nixling::security",
                code = e.code(),
                raw = %intent.raw_text(),
                "Command rejected by whitelist: {}",
                e
            );
            e
        })
    }

    /// Command switching `method`'s profile to a recorded generation
    pub fn build_rollback(
        &self,
        method: InstallMethod,
        generation: &str,
    ) -> Result<ValidatedCommand, ValidationError> {
        self.assemble(method, Operation::Rollback, &[], &[], Some(generation))
    }

    /// Read-only command listing `method`'s generations
    pub fn build_generations_query(
        &self,
        method: InstallMethod,
    ) -> Result<ValidatedCommand, ValidationError> {
        self.assemble(method, Operation::ListGenerations, &[], &[], None)
    }

    fn assemble(
        &self,
        method: InstallMethod,
        op: Operation,
        packages: &[PackageInfo],
        terms: &[&str],
        generation: Option<&str>,
    ) -> Result<ValidatedCommand, ValidationError> {
        let mut argv = Vec::new();

        for slot in template(method, op) {
            match *slot {
                Lit(text) => argv.push(text.to_string()),
                Profile => argv.push(self.profile(method)),
                Attr(prefix) => {
                    if packages.is_empty() {
                        return Err(ValidationError::Empty);
                    }
                    for package in packages {
                        validate_token(&package.attribute_path)?;
                        argv.push(format!("{}{}", prefix, package.attribute_path));
                    }
                }
                Name => {
                    if packages.is_empty() {
                        return Err(ValidationError::Empty);
                    }
                    for package in packages {
                        validate_token(&package.name)?;
                        argv.push(package.name.clone());
                    }
                }
                Terms => {
                    if terms.is_empty() {
                        return Err(ValidationError::Empty);
                    }
                    for term in terms {
                        validate_token(term)?;
                        argv.push(term.to_string());
                    }
                }
                Generation => {
                    let generation = generation.ok_or(ValidationError::Empty)?;
                    validate_generation(generation)?;
                    argv.push(generation.to_string());
                }
            }
        }

        let requires_elevation = method == InstallMethod::Declarative && op.is_mutating();
        let elevation_program = self.elevation.program();
        let dry_run_preview = render_preview(&argv, requires_elevation, elevation_program);

        Ok(ValidatedCommand {
            argv,
            requires_elevation,
            elevation_program,
            dry_run_preview,
            method,
            operation: op,
        })
    }
}

fn render_preview(argv: &[String], elevated: bool, program: Option<&str>) -> String {
    let mut line = String::new();
    if elevated {
        if let Some(program) = program {
            line.push_str(program);
            line.push(' ');
        }
    }
    line.push_str(&argv.join(" "));
    line
}
