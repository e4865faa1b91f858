//! Local grading engine for spoken-phrase practice.
//!
//! Compares the phrase a learner was asked to say (the reference) with what a
//! speech recognizer heard (the hypothesis) and turns the result into a
//! 0-100 score, a letter grade and feedback. Optional sub-scores from a richer
//! external assessment are blended in when the caller has them.

mod config;
mod error;

pub use config::{BaselinePolicy, Config, MAX_TEXT_CHARS_LIMIT};
pub use error::{Error, Result};

use std::fmt;

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// Sub-scores produced elsewhere (e.g. by a cloud pronunciation assessment).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuxiliaryScores {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fluency: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completeness: Option<f64>,
}

impl AuxiliaryScores {
    fn is_empty(&self) -> bool {
        self.fluency.is_none() && self.completeness.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonInput {
    pub reference_text: String,
    pub hypothesis_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary_scores: Option<AuxiliaryScores>,
}

impl ComparisonInput {
    pub fn new(reference: impl Into<String>, hypothesis: impl Into<String>) -> Self {
        Self {
            reference_text: reference.into(),
            hypothesis_text: hypothesis.into(),
            auxiliary_scores: None,
        }
    }

    pub fn with_auxiliary(mut self, auxiliary: AuxiliaryScores) -> Self {
        self.auxiliary_scores = Some(auxiliary);
        self
    }
}

/// Outcome of comparing two canonical strings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityResult {
    pub ratio: f64,
    pub distance: usize,
    pub max_len: usize,
}

impl SimilarityResult {
    /// Ratio as a whole percentage, rounded half-up on exact integers.
    pub fn percent(&self) -> i32 {
        if self.max_len == 0 {
            return 100;
        }
        let matched = self.max_len.saturating_sub(self.distance);
        ((200 * matched + self.max_len) / (2 * self.max_len)) as i32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternDetection {
    pub detected: bool,
    pub confidence: f64,
    pub matched_patterns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    E,
}

impl Grade {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::E => "E",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the non-accuracy sub-scores came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Assessment {
    /// Nothing external; every factor mirrors accuracy.
    SimilarityOnly,
    /// Caller passed fluency and/or completeness.
    Supplied,
    /// Placeholder values drawn at random. Not a real measurement.
    Simulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubScores {
    pub accuracy: i32,
    pub fluency: i32,
    /// Also carries externally supplied completeness.
    pub intonation: i32,
    pub rhythm: i32,
}

impl SubScores {
    fn uniform(score: i32) -> Self {
        Self {
            accuracy: score,
            fluency: score,
            intonation: score,
            rhythm: score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub overall_score: i32,
    pub grade: Grade,
    pub subscores: SubScores,
    pub feedback: Vec<String>,
    pub detail: PatternDetection,
    pub similarity: f64,
    pub passed: bool,
    pub assessment: Assessment,
}

// ---------------------------------------------------------------------------
// Hyperparameters
// ---------------------------------------------------------------------------

struct Hyperparameters {
    accuracy_weight: f64,
    fluency_weight: f64,
    intonation_weight: f64,
    rhythm_weight: f64,
    detection_penalty_factor: f64,
    score_floor: i32,
    score_max: i32,
    pattern_confidence_step: f64,
    pattern_confidence_cap: f64,
    short_utterance_max_tokens: usize,
    short_baseline_range: (f64, f64),
    long_baseline_range: (f64, f64),
    simulated_score_range: (f64, f64),
    weak_subscore_threshold: i32,
    pass_threshold: i32,
    grade_a_min: i32,
    grade_b_min: i32,
    grade_c_min: i32,
    grade_d_min: i32,
}

static HP: Hyperparameters = Hyperparameters {
    accuracy_weight: 0.5,
    fluency_weight: 0.2,
    intonation_weight: 0.15,
    rhythm_weight: 0.15,
    detection_penalty_factor: 0.5,
    score_floor: 40,
    score_max: 100,
    pattern_confidence_step: 0.3,
    pattern_confidence_cap: 0.95,
    short_utterance_max_tokens: 2,
    short_baseline_range: (0.2, 0.6),
    long_baseline_range: (0.1, 0.3),
    simulated_score_range: (70.0, 95.0),
    weak_subscore_threshold: 70,
    pass_threshold: 70,
    grade_a_min: 90,
    grade_b_min: 80,
    grade_c_min: 70,
    grade_d_min: 60,
};

// ---------------------------------------------------------------------------
// Compiled patterns
// ---------------------------------------------------------------------------

static NON_CANONICAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s]").unwrap());

struct PatternRule {
    name: &'static str,
    pattern: Regex,
    message: &'static str,
}

// Evaluated in order; messages are reported in the same order.
static PATTERN_RULES: Lazy<Vec<PatternRule>> = Lazy::new(|| {
    vec![
        PatternRule {
            name: "weak_connective",
            pattern: Regex::new(r"(?i)\b(?:and|but|that)\b").unwrap(),
            message: "Connective words ('and', 'but', 'that') sound weak; pronounce them clearly even when unstressed.",
        },
        PatternRule {
            name: "trailing_o",
            // Doubled plosive then the vowel: "guddo", "beddo".
            pattern: Regex::new(r"(?i)\b\w*(?:bb|dd|gg|kk|pp|tt)o\b").unwrap(),
            message: "An extra 'o' vowel follows a final consonant (like 'guddo' for 'good'); end the word on the consonant.",
        },
        PatternRule {
            name: "trailing_u",
            pattern: Regex::new(r"(?i)\b\w*(?:(?:bb|dd|gg|kk|pp|tt)u|[bdgkpst]u[bdgkpst]u)\b").unwrap(),
            message: "An extra 'u' vowel follows a final consonant (like 'desuku' for 'desk'); end the word on the consonant.",
        },
    ]
});

// ---------------------------------------------------------------------------
// Feedback text
// ---------------------------------------------------------------------------

fn band_messages(grade: Grade) -> &'static [&'static str] {
    match grade {
        Grade::A => &[
            "Excellent pronunciation!",
            "Your delivery sounds natural and clear.",
        ],
        Grade::B => &[
            "Good job, you are very close to the model.",
            "Polish a few sounds to reach native-like clarity.",
        ],
        Grade::C => &[
            "Fair attempt; the phrase is understandable.",
            "Listen to the model audio again and copy its rhythm.",
        ],
        Grade::D => &[
            "Keep practicing; several sounds differ from the reference.",
            "Slow down and articulate each word.",
            "Try repeating the phrase in short chunks.",
        ],
        Grade::E => &[
            "The phrase was hard to recognize.",
            "Listen to the reference carefully, then try again slowly.",
            "Check that your microphone picks up your voice clearly.",
        ],
    }
}

const LOW_ACCURACY_MESSAGE: &str =
    "Some words did not match the reference phrase; check the pronunciation of each word.";
const LOW_FLUENCY_MESSAGE: &str =
    "Work on fluency: say the phrase in one smooth breath without long pauses.";
const LOW_COMPLETENESS_MESSAGE: &str = "Parts of the phrase were missing; say the whole phrase.";
const PATTERN_DETECTED_MESSAGE: &str =
    "Katakana-style pronunciation detected; aim for native-like vowel and consonant sounds.";
const DEFAULT_POSITIVE_MESSAGE: &str = "Great pronunciation, keep it up!";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn round_score(value: f64) -> i32 {
    value.round() as i32
}

fn check_text_length(label: &str, text: &str, limit: usize) -> Result<()> {
    let chars = text.chars().count();
    if chars > limit {
        return Err(Error::InvalidInput(format!(
            "{label} is {chars} characters long; the limit is {limit}"
        )));
    }
    Ok(())
}

fn check_auxiliary(auxiliary: &AuxiliaryScores) -> Result<()> {
    for (label, value) in [
        ("fluency", auxiliary.fluency),
        ("completeness", auxiliary.completeness),
    ] {
        if let Some(v) = value {
            if !v.is_finite() || !(0.0..=100.0).contains(&v) {
                return Err(Error::InvalidInput(format!(
                    "{label} score {v} is outside [0, 100]"
                )));
            }
        }
    }
    Ok(())
}

fn check_ratio(ratio: f64, strict: bool) -> Result<f64> {
    if ratio.is_finite() && (0.0..=1.0).contains(&ratio) {
        return Ok(ratio);
    }
    if strict {
        return Err(Error::InvariantViolation(format!(
            "similarity ratio {ratio} outside [0, 1]"
        )));
    }
    warn!(ratio, "similarity ratio outside [0, 1], clamping");
    Ok(if ratio.is_nan() {
        0.0
    } else {
        ratio.clamp(0.0, 1.0)
    })
}

fn compare_canonical(a: &str, b: &str) -> SimilarityResult {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return SimilarityResult {
            ratio: 1.0,
            distance: 0,
            max_len: 0,
        };
    }
    let distance = edit_distance(a, b);
    SimilarityResult {
        ratio: (max_len as f64 - distance as f64) / max_len as f64,
        distance,
        max_len,
    }
}

// ---------------------------------------------------------------------------
// Text comparison
// ---------------------------------------------------------------------------

/// Lowercase, keep only `[a-z0-9]` and whitespace, collapse whitespace runs
/// into single spaces.
pub fn canonicalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let filtered = NON_CANONICAL_RE.replace_all(&lowered, "");
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Levenshtein distance over characters with unit costs.
///
/// Fills the full `(n+1) x (m+1)` table; inputs are short utterances and the
/// boundary layer caps their length.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (m, n) = (a.len(), b.len());

    let mut table = vec![vec![0usize; m + 1]; n + 1];
    for (j, cell) in table[0].iter_mut().enumerate() {
        *cell = j;
    }
    for (i, row) in table.iter_mut().enumerate() {
        row[0] = i;
    }

    for i in 1..=n {
        for j in 1..=m {
            let cost = usize::from(a[j - 1] != b[i - 1]);
            table[i][j] = (table[i - 1][j] + 1)
                .min(table[i][j - 1] + 1)
                .min(table[i - 1][j - 1] + cost);
        }
    }
    table[n][m]
}

/// Canonicalize both sides and compare them.
pub fn compare(a: &str, b: &str) -> SimilarityResult {
    compare_canonical(&canonicalize(a), &canonicalize(b))
}

/// Similarity ratio in `[0, 1]`; two empty strings are a perfect match.
pub fn similarity(a: &str, b: &str) -> f64 {
    compare(a, b).ratio
}

// ---------------------------------------------------------------------------
// Pattern detection
// ---------------------------------------------------------------------------

fn baseline_confidence(token_count: usize, policy: BaselinePolicy) -> f64 {
    let (lo, hi) = if token_count <= HP.short_utterance_max_tokens {
        HP.short_baseline_range
    } else {
        HP.long_baseline_range
    };
    match policy {
        BaselinePolicy::Midpoint => (lo + hi) / 2.0,
        BaselinePolicy::Sampled => rand::thread_rng().gen_range(lo..=hi),
    }
}

/// Scan recognized text for non-native rendering artifacts, using the
/// deterministic baseline.
pub fn detect_patterns(hypothesis: &str) -> PatternDetection {
    detect_patterns_with(hypothesis, BaselinePolicy::Midpoint)
}

pub fn detect_patterns_with(hypothesis: &str, policy: BaselinePolicy) -> PatternDetection {
    let text = canonicalize(hypothesis);
    let mut confidence = baseline_confidence(word_count(&text), policy);
    let mut matched_patterns = Vec::new();

    for rule in PATTERN_RULES.iter() {
        if rule.pattern.is_match(&text) {
            debug!(rule = rule.name, "pattern rule matched");
            matched_patterns.push(rule.message.to_string());
            confidence = (confidence + HP.pattern_confidence_step).min(HP.pattern_confidence_cap);
        }
    }

    PatternDetection {
        detected: !matched_patterns.is_empty(),
        confidence,
        matched_patterns,
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Weighted blend of the four sub-scores, penalised when a pattern was
/// detected, never below the floor of 40.
pub fn aggregate(subscores: &SubScores, detection: &PatternDetection) -> i32 {
    let mut overall = subscores.accuracy as f64 * HP.accuracy_weight
        + subscores.fluency as f64 * HP.fluency_weight
        + subscores.intonation as f64 * HP.intonation_weight
        + subscores.rhythm as f64 * HP.rhythm_weight;
    if detection.detected {
        overall *= 1.0 - detection.confidence * HP.detection_penalty_factor;
    }
    round_score(overall.max(HP.score_floor as f64)).clamp(HP.score_floor, HP.score_max)
}

fn simulated_score() -> i32 {
    let (lo, hi) = HP.simulated_score_range;
    round_score(rand::thread_rng().gen_range(lo..=hi))
}

fn resolve_subscores(
    accuracy: i32,
    auxiliary: Option<&AuxiliaryScores>,
    simulate_missing: bool,
) -> (SubScores, Assessment) {
    match auxiliary {
        Some(aux) if !aux.is_empty() => (
            SubScores {
                accuracy,
                fluency: aux.fluency.map(round_score).unwrap_or(accuracy),
                intonation: aux.completeness.map(round_score).unwrap_or(accuracy),
                rhythm: accuracy,
            },
            Assessment::Supplied,
        ),
        _ if simulate_missing => (
            SubScores {
                accuracy,
                fluency: simulated_score(),
                intonation: simulated_score(),
                rhythm: simulated_score(),
            },
            Assessment::Simulated,
        ),
        _ => (SubScores::uniform(accuracy), Assessment::SimilarityOnly),
    }
}

// ---------------------------------------------------------------------------
// Grading
// ---------------------------------------------------------------------------

pub fn grade(score: i32) -> Grade {
    if score >= HP.grade_a_min {
        Grade::A
    } else if score >= HP.grade_b_min {
        Grade::B
    } else if score >= HP.grade_c_min {
        Grade::C
    } else if score >= HP.grade_d_min {
        Grade::D
    } else {
        Grade::E
    }
}

/// Band messages for the score first, then conditional messages, or one
/// default message when no condition fires.
pub fn feedback(
    overall_score: i32,
    subscores: &SubScores,
    auxiliary: Option<&AuxiliaryScores>,
    detection: &PatternDetection,
) -> Vec<String> {
    let mut out: Vec<String> = band_messages(grade(overall_score))
        .iter()
        .map(|m| m.to_string())
        .collect();

    let mut conditional: Vec<String> = Vec::new();
    if subscores.accuracy < HP.weak_subscore_threshold {
        conditional.push(LOW_ACCURACY_MESSAGE.to_string());
    }
    if let Some(aux) = auxiliary {
        let weak = HP.weak_subscore_threshold as f64;
        if aux.fluency.is_some_and(|f| f < weak) {
            conditional.push(LOW_FLUENCY_MESSAGE.to_string());
        }
        if aux.completeness.is_some_and(|c| c < weak) {
            conditional.push(LOW_COMPLETENESS_MESSAGE.to_string());
        }
    }
    if detection.detected {
        conditional.push(PATTERN_DETECTED_MESSAGE.to_string());
        conditional.extend(detection.matched_patterns.iter().cloned());
    }

    if conditional.is_empty() {
        out.push(DEFAULT_POSITIVE_MESSAGE.to_string());
    } else {
        out.extend(conditional);
    }
    out
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Evaluator {
    config: Config,
}

impl Evaluator {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn evaluate(&self, input: &ComparisonInput) -> Result<EvaluationResult> {
        let limit = self.config.max_text_chars;
        check_text_length("reference text", &input.reference_text, limit)?;
        check_text_length("hypothesis text", &input.hypothesis_text, limit)?;
        let auxiliary = input.auxiliary_scores.as_ref();
        if let Some(aux) = auxiliary {
            check_auxiliary(aux)?;
        }

        let reference = canonicalize(&input.reference_text);
        let hypothesis = canonicalize(&input.hypothesis_text);
        let comparison = compare_canonical(&reference, &hypothesis);
        let ratio = check_ratio(comparison.ratio, self.config.strict_invariants)?;
        let accuracy = if ratio == comparison.ratio {
            comparison.percent()
        } else {
            round_score(ratio * 100.0)
        };

        let detail = detect_patterns_with(&hypothesis, self.config.baseline);
        let (subscores, assessment) =
            resolve_subscores(accuracy, auxiliary, self.config.simulate_missing);
        let overall_score = aggregate(&subscores, &detail);
        let grade = grade(overall_score);
        let feedback = feedback(overall_score, &subscores, auxiliary, &detail);

        debug!(
            overall_score,
            %grade,
            distance = comparison.distance,
            detected = detail.detected,
            ?assessment,
            "evaluated utterance"
        );

        Ok(EvaluationResult {
            overall_score,
            grade,
            subscores,
            feedback,
            detail,
            similarity: ratio,
            passed: overall_score >= HP.pass_threshold,
            assessment,
        })
    }

    /// Deserialize a `ComparisonInput` JSON object and evaluate it.
    pub fn evaluate_json(&self, json: &str) -> Result<EvaluationResult> {
        let input: ComparisonInput = serde_json::from_str(json)?;
        self.evaluate(&input)
    }
}

/// Parse one `ComparisonInput` object or an array of them.
pub fn parse_inputs(json: &str) -> Result<Vec<ComparisonInput>> {
    if json.trim_start().starts_with('[') {
        Ok(serde_json::from_str(json)?)
    } else {
        Ok(vec![serde_json::from_str(json)?])
    }
}

/// Evaluate with the default configuration.
pub fn evaluate(
    reference: &str,
    hypothesis: &str,
    auxiliary: Option<AuxiliaryScores>,
) -> Result<EvaluationResult> {
    let input = ComparisonInput {
        reference_text: reference.to_string(),
        hypothesis_text: hypothesis.to_string(),
        auxiliary_scores: auxiliary,
    };
    Evaluator::default().evaluate(&input)
}
