//! crates/prezentor_core/src/content.rs
//!
//! The retry-and-repair layer around the generative-text provider.
//!
//! The provider is unreliable mostly in *format*: it adds markdown, labels and
//! numbering, or ignores the requested delimiter. Every reply is cleaned, then
//! validated against the shape the caller expects. Rejected replies are retried
//! with a fixed delay; when the attempts run out a fallback of exactly the
//! expected shape is returned, so a paid generation always produces a document.

use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::ports::{PortResult, ProviderError, TextGenerationService};

/// Number of entries in a presentation outline.
pub const OUTLINE_LEN: usize = 10;

/// Free-text replies shorter than this (after cleanup) are treated as degenerate.
pub const MIN_FREE_TEXT_CHARS: usize = 15;

/// The delimiter the prompts ask the provider to separate segments with.
pub const SEGMENT_DELIMITER: char = '$';

pub const OUTLINE_FALLBACK: [&str; OUTLINE_LEN] = [
    "Kirish",
    "Tarix",
    "Asosiy tushunchalar",
    "Turlar",
    "Afzalliklar",
    "Kamchiliklar",
    "Qo'llanilishi",
    "Statistika",
    "Tahlil",
    "Xulosa",
];

pub const PARAGRAPH_FALLBACK: [&str; 3] = [
    "Mavzuning asosiy g'oyasi uning kundalik hayotdagi o'rni va ahamiyati bilan bog'liq.",
    "Ushbu yo'nalish bo'yicha olib borilgan izlanishlar ko'plab amaliy natijalarni berdi.",
    "Kelajakda bu soha yanada rivojlanib, yangi imkoniyatlar yaratishi kutilmoqda.",
];

pub const TEXT_FALLBACK: &str = "Ushbu bo'lim uchun ma'lumot tayyorlashda texnik muammo yuz berdi.";

static FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```[A-Za-z]*").expect("valid regex"));
static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*|__").expect("valid regex"));
static HEADING: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*#+[ \t]*").expect("valid regex"));
static BULLET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*[-*•][ \t]+").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:matn|javob|xulosa|kirish|answer|text|paragraf\s*\d*|paragraph\s*\d*)\s*:\s*")
        .expect("valid regex")
});
static ENUMERATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}\s*[.)]\s+").expect("valid regex"));
static BLANK_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n").expect("valid regex"));
static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:\d{1,2}[ \t]*[.)]|[-*•])[ \t]+").expect("valid regex"));
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+(?:\s+|$)|\n+").expect("valid regex"));

//=========================================================================================
// Shapes and results
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedShape {
    /// Any non-trivial string.
    FreeText,
    /// Exactly `k` non-empty segments.
    FixedCount(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generated {
    Text(String),
    Segments(Vec<String>),
}

impl Generated {
    pub fn into_text(self) -> String {
        match self {
            Generated::Text(text) => text,
            Generated::Segments(segments) => segments.join(" "),
        }
    }

    pub fn into_segments(self) -> Vec<String> {
        match self {
            Generated::Text(text) => vec![text],
            Generated::Segments(segments) => segments,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(2000),
        }
    }
}

/// The only failure that escapes the generator: the provider said retrying is pointless.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("generation aborted by the provider: {0}")]
    Terminal(String),
}

/// Hook invoked before every retry, e.g. to show "attempt 2 of 3" to the user.
#[async_trait]
pub trait RetryObserver: Send + Sync {
    async fn before_retry(&self, attempt: u32, max_attempts: u32, step: &str) -> PortResult<()>;
}

//=========================================================================================
// The generator
//=========================================================================================

#[derive(Clone)]
pub struct ContentGenerator {
    provider: Arc<dyn TextGenerationService>,
    policy: RetryPolicy,
}

impl ContentGenerator {
    pub fn new(provider: Arc<dyn TextGenerationService>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Asks the provider for content of the given shape, making at most
    /// `max_attempts` calls.
    pub async fn generate(
        &self,
        prompt: &str,
        shape: ExpectedShape,
        max_attempts: u32,
        step: &str,
        observer: Option<&dyn RetryObserver>,
    ) -> Result<Generated, GenerationError> {
        let max_attempts = max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let rejection = match self.provider.complete(prompt).await {
                Ok(raw) => match accept(&raw, shape) {
                    Ok(generated) => {
                        debug!(step, attempt, "Generation attempt accepted");
                        return Ok(generated);
                    }
                    Err(reason) => reason,
                },
                Err(ProviderError::Terminal(message)) => {
                    warn!(step, attempt, "Provider refused the request: {}", message);
                    return Err(GenerationError::Terminal(message));
                }
                Err(ProviderError::Transient(message)) => format!("provider error: {}", message),
            };

            warn!(step, attempt, max_attempts, "Generation attempt rejected: {}", rejection);

            if attempt < max_attempts {
                if let Some(observer) = observer {
                    if let Err(e) = observer.before_retry(attempt + 1, max_attempts, step).await {
                        warn!(step, "Retry observer failed: {}", e);
                    }
                }
                if !self.policy.delay.is_zero() {
                    tokio::time::sleep(self.policy.delay).await;
                }
            }
        }

        warn!(step, max_attempts, "Generation attempts exhausted, using fallback content");
        Ok(fallback(shape))
    }

    pub async fn generate_text(
        &self,
        prompt: &str,
        step: &str,
        observer: Option<&dyn RetryObserver>,
    ) -> Result<String, GenerationError> {
        self.generate(prompt, ExpectedShape::FreeText, self.policy.max_attempts, step, observer)
            .await
            .map(Generated::into_text)
    }

    pub async fn generate_segments(
        &self,
        prompt: &str,
        count: usize,
        max_attempts: u32,
        step: &str,
        observer: Option<&dyn RetryObserver>,
    ) -> Result<Vec<String>, GenerationError> {
        self.generate(prompt, ExpectedShape::FixedCount(count), max_attempts, step, observer)
            .await
            .map(Generated::into_segments)
    }
}

/// Validates one raw reply against the expected shape.
pub fn accept(raw: &str, shape: ExpectedShape) -> Result<Generated, String> {
    match shape {
        ExpectedShape::FreeText => {
            let cleaned = cleanup_text(raw);
            let length = cleaned.chars().count();
            if length < MIN_FREE_TEXT_CHARS {
                Err(format!("reply too short after cleanup ({} chars)", length))
            } else {
                Ok(Generated::Text(cleaned))
            }
        }
        ExpectedShape::FixedCount(count) => segment(raw, count)
            .map(Generated::Segments)
            .ok_or_else(|| format!("reply does not split into {} segments", count)),
    }
}

/// The fallback value for a shape. Fixed-count fallbacks always have exactly `k` entries.
pub fn fallback(shape: ExpectedShape) -> Generated {
    match shape {
        ExpectedShape::FreeText => Generated::Text(TEXT_FALLBACK.to_string()),
        ExpectedShape::FixedCount(count) if count == OUTLINE_LEN => {
            Generated::Segments(OUTLINE_FALLBACK.iter().map(|s| s.to_string()).collect())
        }
        ExpectedShape::FixedCount(count) => Generated::Segments(
            PARAGRAPH_FALLBACK
                .iter()
                .cycle()
                .take(count)
                .map(|s| s.to_string())
                .collect(),
        ),
    }
}

//=========================================================================================
// Cleanup and segmentation
//=========================================================================================

/// Strips generation artifacts and flattens the text onto a single line.
pub fn cleanup_text(raw: &str) -> String {
    let text = FENCE.replace_all(raw, "");
    let text = EMPHASIS.replace_all(&text, "");
    let text = HEADING.replace_all(&text, "");
    let text = BULLET.replace_all(&text, "");
    let text = WHITESPACE.replace_all(&text, " ");
    let text = text.trim();
    let text = LABEL.replace(text, "");
    let text = ENUMERATION.replace(&text, "");
    strip_quotes(text.trim()).trim().to_string()
}

fn strip_quotes(text: &str) -> &str {
    const PAIRS: [(char, char); 4] = [('"', '"'), ('«', '»'), ('“', '”'), ('\'', '\'')];
    for (open, close) in PAIRS {
        if text.chars().count() >= 2 && text.starts_with(open) && text.ends_with(close) {
            return &text[open.len_utf8()..text.len() - close.len_utf8()];
        }
    }
    text
}

/// Splits a raw reply into exactly `count` cleaned segments, trying each
/// strategy in turn. Returns `None` when no strategy finds enough.
pub fn segment(raw: &str, count: usize) -> Option<Vec<String>> {
    if count == 0 {
        return Some(Vec::new());
    }

    let strategies: [fn(&str) -> Vec<String>; 3] =
        [split_on_delimiter, split_on_blank_lines, split_on_list_markers];
    for strategy in strategies {
        let parts = strategy(raw);
        if parts.len() >= count {
            return Some(parts.into_iter().take(count).collect());
        }
    }

    split_on_sentences(raw, count)
}

fn usable<'a>(parts: impl Iterator<Item = &'a str>) -> Vec<String> {
    parts
        .map(cleanup_text)
        .filter(|part| !part.is_empty())
        .collect()
}

fn split_on_delimiter(raw: &str) -> Vec<String> {
    usable(raw.split(SEGMENT_DELIMITER))
}

fn split_on_blank_lines(raw: &str) -> Vec<String> {
    usable(BLANK_LINE.split(raw))
}

fn split_on_list_markers(raw: &str) -> Vec<String> {
    let starts: Vec<(usize, usize)> = LIST_MARKER.find_iter(raw).map(|m| (m.start(), m.end())).collect();
    if starts.is_empty() {
        return Vec::new();
    }
    // Text before the first marker is a preamble, not an item.
    let items = starts.iter().enumerate().map(|(i, &(_, body_start))| {
        let body_end = starts.get(i + 1).map(|&(next, _)| next).unwrap_or(raw.len());
        &raw[body_start..body_end]
    });
    usable(items)
}

fn split_on_sentences(raw: &str, count: usize) -> Option<Vec<String>> {
    let mut sentences = Vec::new();
    let mut last = 0;
    for boundary in SENTENCE_END.find_iter(raw) {
        sentences.push(&raw[last..boundary.end()]);
        last = boundary.end();
    }
    if last < raw.len() {
        sentences.push(&raw[last..]);
    }
    let sentences = usable(sentences.into_iter());
    if sentences.len() < count {
        return None;
    }

    let base = sentences.len() / count;
    let extra = sentences.len() % count;
    let mut groups = Vec::with_capacity(count);
    let mut iter = sentences.into_iter();
    for i in 0..count {
        let size = base + usize::from(i < extra);
        let group: Vec<String> = iter.by_ref().take(size).collect();
        groups.push(group.join(" "));
    }
    Some(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use crate::ports::PortError;

    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<String, ProviderError>>>,
        fallback_reply: Result<String, ProviderError>,
        calls: AtomicU32,
    }

    impl ScriptedProvider {
        fn always(reply: Result<String, ProviderError>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(VecDeque::new()),
                fallback_reply: reply,
                calls: AtomicU32::new(0),
            })
        }

        fn sequence(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                fallback_reply: Ok(String::new()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerationService for ScriptedProvider {
        async fn complete(&self, _prompt: &str) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback_reply.clone())
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        seen: Mutex<Vec<(u32, u32)>>,
        fail: bool,
    }

    #[async_trait]
    impl RetryObserver for RecordingObserver {
        async fn before_retry(&self, attempt: u32, max_attempts: u32, _step: &str) -> PortResult<()> {
            self.seen.lock().unwrap().push((attempt, max_attempts));
            if self.fail {
                Err(PortError::Unexpected("message to edit not found".into()))
            } else {
                Ok(())
            }
        }
    }

    fn generator(provider: Arc<ScriptedProvider>) -> ContentGenerator {
        ContentGenerator::new(
            provider,
            RetryPolicy {
                max_attempts: 3,
                delay: Duration::ZERO,
            },
        )
    }

    #[test]
    fn cleanup_strips_markdown_labels_and_newlines() {
        let raw = "```text\nJavob: **Sun'iy intellekt**\nbugungi kunda\n\n juda muhim.\n```";
        assert_eq!(cleanup_text(raw), "Sun'iy intellekt bugungi kunda juda muhim.");
    }

    #[test]
    fn cleanup_strips_enumeration_bullets_and_quotes() {
        assert_eq!(cleanup_text("3. Tarixi"), "Tarixi");
        assert_eq!(cleanup_text("- Turlari"), "Turlari");
        assert_eq!(cleanup_text("## Xulosa: \"Yakuniy fikr\""), "Yakuniy fikr");
        assert_eq!(cleanup_text("«Iqtisodiyot»"), "Iqtisodiyot");
    }

    #[test]
    fn cleanup_keeps_words_that_merely_start_like_labels() {
        assert_eq!(cleanup_text("Kirish qismi mavzuni tanishtiradi"), "Kirish qismi mavzuni tanishtiradi");
    }

    #[test]
    fn delimiter_split_keeps_order_and_drops_empty_parts() {
        let parts = segment("Kirish$$Tarix$ $Turlar$Xulosa$Qo'shimcha", 4).unwrap();
        assert_eq!(parts, vec!["Kirish", "Tarix", "Turlar", "Xulosa"]);
    }

    #[test]
    fn triple_delimiter_yields_three_paragraphs() {
        let parts = segment("Birinchi paragraf.$$$Ikkinchi paragraf.$$$Uchinchi paragraf.", 3).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], "Ikkinchi paragraf.");
    }

    #[test]
    fn blank_lines_are_the_second_strategy() {
        let raw = "Birinchi g'oya.\n\nIkkinchi g'oya.\n \nUchinchi g'oya.";
        assert_eq!(
            segment(raw, 3).unwrap(),
            vec!["Birinchi g'oya.", "Ikkinchi g'oya.", "Uchinchi g'oya."]
        );
    }

    #[test]
    fn list_markers_skip_the_preamble() {
        let raw = "Mana rejalar:\n1. Kirish\n2) Tarix\n3. Turlar\n- Xulosa";
        assert_eq!(segment(raw, 4).unwrap(), vec!["Kirish", "Tarix", "Turlar", "Xulosa"]);
    }

    #[test]
    fn sentences_are_redistributed_evenly() {
        let raw = "Bir. Ikki. Uch. To'rt. Besh.";
        let parts = segment(raw, 3).unwrap();
        assert_eq!(parts, vec!["Bir. Ikki.", "Uch. To'rt.", "Besh."]);
    }

    #[test]
    fn line_per_entry_outline_is_recovered_by_the_last_strategy() {
        let raw = (1..=10).map(|i| format!("Bo'lim {}", i)).collect::<Vec<_>>().join("\n");
        let parts = segment(&raw, OUTLINE_LEN).unwrap();
        assert_eq!(parts.len(), OUTLINE_LEN);
        assert_eq!(parts[9], "Bo'lim 10");
    }

    #[test]
    fn too_few_segments_under_every_strategy_is_rejected() {
        assert!(segment("Faqat bitta gap", 3).is_none());
        assert!(accept("Faqat bitta gap", ExpectedShape::FixedCount(3)).is_err());
    }

    #[test]
    fn fallbacks_have_the_exact_shape() {
        assert_eq!(fallback(ExpectedShape::FixedCount(10)).into_segments().len(), 10);
        assert_eq!(fallback(ExpectedShape::FixedCount(3)).into_segments().len(), 3);
        assert_eq!(fallback(ExpectedShape::FixedCount(7)).into_segments().len(), 7);
        assert_eq!(fallback(ExpectedShape::FreeText), Generated::Text(TEXT_FALLBACK.to_string()));
    }

    #[tokio::test]
    async fn degenerate_replies_exhaust_attempts_and_fall_back() {
        let provider = ScriptedProvider::always(Ok("ok".to_string()));
        let generator = generator(provider.clone());

        let text = generator.generate_text("prompt", "intro", None).await.unwrap();

        assert_eq!(text, TEXT_FALLBACK);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn outline_fallback_is_exact_after_format_failures() {
        let provider = ScriptedProvider::always(Ok("Kirish va tarix".to_string()));
        let generator = generator(provider.clone());

        let outline = generator
            .generate_segments("prompt", OUTLINE_LEN, 5, "outline", None)
            .await
            .unwrap();

        assert_eq!(outline.len(), OUTLINE_LEN);
        assert_eq!(outline[0], "Kirish");
        assert_eq!(provider.calls(), 5);
    }

    #[tokio::test]
    async fn transient_error_then_valid_reply_succeeds() {
        let provider = ScriptedProvider::sequence(vec![
            Err(ProviderError::Transient("timeout".into())),
            Ok("A$B$C".to_string()),
        ]);
        let generator = generator(provider.clone());

        let parts = generator.generate_segments("prompt", 3, 3, "triple", None).await.unwrap();

        assert_eq!(parts, vec!["A", "B", "C"]);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn terminal_error_aborts_without_retrying() {
        let provider = ScriptedProvider::always(Err(ProviderError::Terminal("invalid api key".into())));
        let generator = generator(provider.clone());

        let result = generator.generate_text("prompt", "intro", None).await;

        assert!(matches!(result, Err(GenerationError::Terminal(_))));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn observer_sees_each_retry_and_its_failures_are_ignored() {
        let provider = ScriptedProvider::always(Ok(String::new()));
        let generator = generator(provider.clone());
        let observer = RecordingObserver {
            fail: true,
            ..Default::default()
        };

        let text = generator.generate_text("prompt", "intro", Some(&observer)).await.unwrap();

        assert_eq!(text, TEXT_FALLBACK);
        assert_eq!(*observer.seen.lock().unwrap(), vec![(2, 3), (3, 3)]);
    }
}
