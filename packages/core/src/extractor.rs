//! Invite code extraction.
//!
//! [`CodeExtractor`] maps free text to the short alphanumeric tokens that
//! look like invite codes. It is stateless after construction and is shared
//! by reference with the scheduler.
//!
//! Extraction runs in four steps:
//! 1. URLs are blanked out so path segments never surface as codes
//! 2. The remaining text is upper-cased and scanned for word-bounded
//!    `[A-Z0-9]{min,max}` runs
//! 3. Runs without a digit, denylisted words, single-character repeats and
//!    ascending digit placeholders (`123456`) are rejected
//! 4. Survivors are returned once each, in first-seen order

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::AppError;

pub const DEFAULT_MIN_LEN: usize = 5;
pub const DEFAULT_MAX_LEN: usize = 8;
pub const DEFAULT_SNIPPET_CONTEXT: usize = 120;

/// Words that suggest the surrounding text is actually sharing a code.
pub const INVITE_KEYWORDS: &[&str] = &[
    "invite",
    "code",
    "beta",
    "access",
    "key",
    "token",
    "giveaway",
    "sharing",
    "redeem",
    "signup",
    "whitelist",
    "waitlist",
    "drop",
    "wave",
];

/// Technical noise: stack traces, HTTP errors, debug dumps.
const NOISE_WORDS: &[&str] = &[
    "error",
    "exception",
    "stack",
    "debug",
    "traceback",
    "csrf",
    "403",
    "404",
];

/// The code has been reported as no longer usable.
const NEGATIVE_WORDS: &[&str] = &["expired", "redeemed", "invalid", "used up"];

const BASE_CONFIDENCE: f64 = 0.4;
const KEYWORD_WEIGHT: f64 = 0.12;
const KEYWORD_CAP: f64 = 0.36;
const TOPIC_WEIGHT: f64 = 0.18;
const NOISE_PENALTY: f64 = 0.35;
const NEGATIVE_PENALTY: f64 = 0.25;
const CODE_BLOCK_BONUS: f64 = 0.05;
const MIN_CONFIDENCE: f64 = 0.05;
const MAX_CONFIDENCE: f64 = 1.0;

static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)https?://\S+").expect("url regex is valid"));
static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

/// Tunable extraction rules.
#[derive(Debug, Clone)]
pub struct ExtractionProfile {
    pub min_len: usize,
    pub max_len: usize,
    /// Tokens that are never codes. Matched exactly, case-insensitively.
    pub denylist: Vec<String>,
    /// Characters kept on each side of a code when building a snippet.
    pub snippet_context: usize,
    /// Attach an advisory confidence score to every candidate.
    pub scoring: bool,
    /// Product names that make a nearby token more credible.
    pub topic_keywords: Vec<String>,
}

impl Default for ExtractionProfile {
    fn default() -> Self {
        Self {
            min_len: DEFAULT_MIN_LEN,
            max_len: DEFAULT_MAX_LEN,
            denylist: Vec::new(),
            snippet_context: DEFAULT_SNIPPET_CONTEXT,
            scoring: true,
            topic_keywords: vec!["sora".to_string()],
        }
    }
}

impl ExtractionProfile {
    pub fn validate(&self) -> Result<(), String> {
        if self.min_len == 0 {
            return Err("MIN_LEN must be at least 1".to_string());
        }
        if self.min_len > self.max_len {
            return Err(format!(
                "MIN_LEN ({}) must not exceed MAX_LEN ({})",
                self.min_len, self.max_len
            ));
        }
        Ok(())
    }
}

/// Stateless invite code extractor built from an [`ExtractionProfile`].
#[derive(Debug)]
pub struct CodeExtractor {
    profile: ExtractionProfile,
    pattern: Regex,
    denylist: HashSet<String>,
}

impl CodeExtractor {
    pub fn new(profile: ExtractionProfile) -> Result<Self, AppError> {
        profile.validate().map_err(AppError::Config)?;

        let pattern = Regex::new(&format!(
            r"\b[A-Z0-9]{{{},{}}}\b",
            profile.min_len, profile.max_len
        ))
        .map_err(|err| AppError::Config(format!("invalid code pattern: {}", err)))?;

        let denylist = profile
            .denylist
            .iter()
            .map(|token| token.trim().to_uppercase())
            .filter(|token| !token.is_empty())
            .collect();

        Ok(Self {
            profile,
            pattern,
            denylist,
        })
    }

    pub fn profile(&self) -> &ExtractionProfile {
        &self.profile
    }

    /// Return the distinct plausible codes in `text`, in first-seen order.
    pub fn extract(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let without_urls = URL_RE.replace_all(text, " ");
        let upper = without_urls.to_uppercase();

        let mut seen = HashSet::new();
        let mut codes = Vec::new();
        for found in self.pattern.find_iter(&upper) {
            let token = found.as_str();
            if self.is_plausible(token) && seen.insert(token) {
                codes.push(token.to_string());
            }
        }
        codes
    }

    fn is_plausible(&self, token: &str) -> bool {
        let len = token.chars().count();
        if len < self.profile.min_len || len > self.profile.max_len {
            return false;
        }
        if !token.bytes().any(|b| b.is_ascii_digit()) {
            return false;
        }
        if self.denylist.contains(token) {
            return false;
        }
        if is_single_repeated(token) || is_ascending_digits(token) {
            return false;
        }
        true
    }

    /// Excerpt of `text` around the first occurrence of `code`.
    pub fn build_snippet(&self, text: &str, code: &str) -> String {
        build_snippet(text, code, self.profile.snippet_context)
    }

    /// Advisory confidence for codes found in `text`, when scoring is enabled.
    pub fn confidence(&self, text: &str) -> Option<f64> {
        self.profile
            .scoring
            .then(|| score_confidence(text, &self.profile.topic_keywords))
    }
}

fn is_single_repeated(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => chars.all(|c| c == first),
        None => false,
    }
}

/// `true` for placeholders such as `12345` or `345678`.
fn is_ascending_digits(token: &str) -> bool {
    let digits: Vec<u32> = match token.chars().map(|c| c.to_digit(10)).collect() {
        Some(digits) => digits,
        None => return false,
    };
    digits.len() > 1 && digits.windows(2).all(|pair| pair[1] == pair[0] + 1)
}

/// Build a whitespace-collapsed window of `context` characters on each side
/// of the first case-insensitive occurrence of `code` in `text`.
///
/// When the code cannot be located the window is centred on the midpoint of
/// the text. Empty text yields the code itself.
pub fn build_snippet(text: &str, code: &str, context: usize) -> String {
    if text.trim().is_empty() {
        return code.to_string();
    }

    let total = text.chars().count();
    let (start, end) = match locate_ignore_case(text, code) {
        Some(span) => span,
        None => {
            let mid = total / 2;
            (mid, (mid + code.chars().count()).min(total))
        }
    };

    let from = start.saturating_sub(context);
    let to = (end + context).min(total);
    let window: String = text.chars().skip(from).take(to - from).collect();

    WHITESPACE_RE.replace_all(window.trim(), " ").into_owned()
}

/// Character span of the first case-insensitive match of `needle`.
fn locate_ignore_case(text: &str, needle: &str) -> Option<(usize, usize)> {
    if needle.is_empty() {
        return None;
    }
    let pattern = Regex::new(&format!("(?i){}", regex::escape(needle))).ok()?;
    let found = pattern.find(text)?;
    let start = text[..found.start()].chars().count();
    let end = text[..found.end()].chars().count();
    Some((start, end))
}

/// Heuristic confidence in `[0.05, 1.0]` that `text` is sharing a real code.
pub fn score_confidence(text: &str, topic_keywords: &[String]) -> f64 {
    let lower = text.to_lowercase();
    let mut score = BASE_CONFIDENCE;

    let keyword_hits = INVITE_KEYWORDS
        .iter()
        .filter(|kw| lower.contains(*kw))
        .count();
    score += (keyword_hits as f64 * KEYWORD_WEIGHT).min(KEYWORD_CAP);

    if topic_keywords
        .iter()
        .any(|topic| !topic.is_empty() && lower.contains(&topic.to_lowercase()))
    {
        score += TOPIC_WEIGHT;
    }
    if NOISE_WORDS.iter().any(|word| lower.contains(word)) {
        score -= NOISE_PENALTY;
    }
    if NEGATIVE_WORDS.iter().any(|word| lower.contains(word)) {
        score -= NEGATIVE_PENALTY;
    }
    if text.contains("```") || lower.contains("<code>") {
        score += CODE_BLOCK_BONUS;
    }

    score.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}
