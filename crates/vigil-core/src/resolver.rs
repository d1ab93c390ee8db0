//! Canonical application-name resolution.
//!
//! Collapses the many raw spellings of one application (`chrome.exe`,
//! `CHROME`, "Google Chrome 64-bit") into a single [`CanonicalName`].
//! Resolution is data driven: a prioritized rule table is consulted
//! first, then an optional product-name source, then a normalization
//! fallback. It never fails and is idempotent, so a resolved display
//! name fed back in resolves to itself.

use std::sync::LazyLock;

use regex::Regex;

use crate::types::{CanonicalName, ProcessId};

/// Trailing executable extensions stripped during normalization.
static EXTENSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(exe|app|bin|desktop)$").unwrap());

/// Trailing bit-width decorations stripped during normalization.
static BITNESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[\s._-]*(x86|x64|win32|win64|i386|amd64|(?:32|64)(?:[\s-]?bit)?)$").unwrap()
});

/// Which observation field a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchField {
    /// The raw process or executable name.
    Process,
    /// The foreground window title.
    Title,
}

/// One prioritized resolution rule.
///
/// The pattern is matched case-insensitively as a substring of the
/// selected field. Rule order is priority order: the first match wins.
#[derive(Debug, Clone)]
pub struct NameRule {
    field: MatchField,
    pattern: String,
    canonical: String,
}

impl NameRule {
    /// Creates a rule. The pattern is lowercased for matching.
    #[must_use]
    pub fn new(field: MatchField, pattern: impl Into<String>, canonical: impl Into<String>) -> Self {
        Self {
            field,
            pattern: pattern.into().to_lowercase(),
            canonical: canonical.into(),
        }
    }

    fn matches(&self, process_lower: &str, title_lower: &str) -> bool {
        if self.pattern.is_empty() {
            return false;
        }
        let haystack = match self.field {
            MatchField::Process => process_lower,
            MatchField::Title => title_lower,
        };
        haystack.contains(&self.pattern)
    }
}

/// Built-in rule table.
///
/// Every canonical value here must resolve back to itself, otherwise
/// re-resolution would rename already-merged records. Order matters:
/// "xcode" has to precede "code".
const DEFAULT_RULES: &[(MatchField, &str, &str)] = &[
    (MatchField::Process, "chromium", "Chromium"),
    (MatchField::Process, "chrome", "Chrome"),
    (MatchField::Process, "firefox", "Firefox"),
    (MatchField::Process, "msedge", "Edge"),
    (MatchField::Process, "safari", "Safari"),
    (MatchField::Process, "brave", "Brave"),
    (MatchField::Process, "xcode", "Xcode"),
    (MatchField::Process, "code", "Visual Studio Code"),
    (MatchField::Process, "idea", "IntelliJ IDEA"),
    (MatchField::Process, "jetbrains", "IntelliJ IDEA"),
    (MatchField::Process, "slack", "Slack"),
    (MatchField::Process, "discord", "Discord"),
    (MatchField::Process, "spotify", "Spotify"),
    (MatchField::Process, "gnome-terminal", "Terminal"),
    (MatchField::Process, "konsole", "Terminal"),
    (MatchField::Process, "alacritty", "Alacritty"),
    (MatchField::Process, "kitty", "Kitty"),
    (MatchField::Process, "thunderbird", "Thunderbird"),
    // Generic host processes carry no useful name of their own; fall
    // back to what the window title says is running inside them.
    (MatchField::Title, "intellij idea", "IntelliJ IDEA"),
    (MatchField::Title, "visual studio code", "Visual Studio Code"),
    (MatchField::Title, "mozilla firefox", "Firefox"),
    (MatchField::Title, "google chrome", "Chrome"),
];

/// Best-effort source of OS product names (desktop entries, executable
/// version metadata, and the like).
pub trait ProductNameSource {
    /// Returns a human-facing product name for the process, if known.
    ///
    /// Implementations must swallow every failure and return `None`;
    /// resolution falls through to normalization.
    fn product_name(&self, process_name: &str, pid: Option<ProcessId>) -> Option<String>;
}

/// A source that never knows anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProductNames;

impl ProductNameSource for NoProductNames {
    fn product_name(&self, _process_name: &str, _pid: Option<ProcessId>) -> Option<String> {
        None
    }
}

/// Resolves raw window observations to canonical application names.
pub struct Resolver<S = NoProductNames> {
    custom: Vec<NameRule>,
    defaults: Vec<NameRule>,
    products: S,
}

impl Resolver<NoProductNames> {
    /// A resolver with the built-in rules and no product-name source.
    #[must_use]
    pub fn new() -> Self {
        Self::with_source(NoProductNames)
    }
}

impl Default for Resolver<NoProductNames> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ProductNameSource> Resolver<S> {
    /// A resolver with the built-in rules and the given product-name
    /// source.
    pub fn with_source(products: S) -> Self {
        let defaults = DEFAULT_RULES
            .iter()
            .map(|&(field, pattern, canonical)| NameRule::new(field, pattern, canonical))
            .collect();
        Self {
            custom: Vec::new(),
            defaults,
            products,
        }
    }

    /// Appends a custom rule. Custom rules are tried ahead of the
    /// built-in table, in the order they were added.
    pub fn add_rule(&mut self, rule: NameRule) {
        self.custom.push(rule);
    }

    /// Resolves an observation to its canonical application identity.
    ///
    /// Resolution order: rule table, then product-name lookup, then
    /// normalization of the raw process name. Empty input resolves to
    /// the fixed [`CanonicalName::unknown`] identity.
    pub fn resolve(
        &self,
        process_name: &str,
        window_title: &str,
        pid: Option<ProcessId>,
    ) -> CanonicalName {
        let process = process_name.trim();
        let title = window_title.trim();
        let process_lower = process.to_lowercase();
        let title_lower = title.to_lowercase();

        for rule in self.custom.iter().chain(&self.defaults) {
            if rule.matches(&process_lower, &title_lower) {
                if let Ok(name) = CanonicalName::new(rule.canonical.as_str()) {
                    return name;
                }
            }
        }

        if let Some(product) = self.products.product_name(process, pid) {
            if let Ok(name) = CanonicalName::new(normalize(&product)) {
                return name;
            }
        }

        CanonicalName::new(normalize(process)).unwrap_or_else(|_| CanonicalName::unknown())
    }
}

/// Normalizes a raw process or product name into display form.
///
/// Strips a trailing executable extension and bit-width decoration,
/// turns separator punctuation into spaces, collapses whitespace, and
/// uppercases the first letter of each word (the rest of each word is
/// left alone so acronyms survive). Idempotent.
#[must_use]
pub fn normalize(raw: &str) -> String {
    let name = raw.trim();
    let name = EXTENSION_RE.replace(name, "");
    let name = BITNESS_RE.replace(&name, "");
    let name = name.replace(['_', '-', '.'], " ");

    name.split_whitespace()
        .map(title_case_word)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case_word(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
